//! # mTLS + WebSocket Transport
//!
//! The broker terminates TLS itself (no reverse proxy) and exposes three
//! HTTP paths on one listener: `/` answers a plain 200 for health checks
//! without ever upgrading, `/worker` upgrades unconditionally, and `/client`
//! upgrades only if the peer presented a certificate matching the broker's
//! pinned allow-list.
//!
//! Trust here is pinning, not a CA chain: the broker accepts any client
//! certificate at the TLS layer (so self-signed certs work) and does the
//! real authorization check itself against [`crate::certs::AuthorizedClients`]
//! once the handshake is done. Symmetrically, workers and clients validate
//! the broker's certificate by pinning too: the caller supplies the exact
//! DER bytes it expects to see (from worker or client config) and the
//! handshake fails unless the broker presents precisely that certificate.
//! Neither direction involves a root store; the broker's certificate is
//! self-signed and never expected to chain to one.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::certs::AuthorizedClients;
use crate::error::{RaiseError, Result};

pub const WORKER_PATH: &str = "/worker";
pub const CLIENT_PATH: &str = "/client";
pub const HEALTH_PATH: &str = "/";

/// A loaded certificate chain and private key, ready to hand to rustls.
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Identity {
    pub fn from_pem_bytes(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::result::Result<_, _>>()?;
        if cert_chain.is_empty() {
            return Err(RaiseError::Config("no certificate found in PEM".into()));
        }
        let key = rustls_pemfile::private_key(&mut &key_pem[..])?
            .ok_or_else(|| RaiseError::Config("no private key found in PEM".into()))?;
        Ok(Self { cert_chain, key })
    }
}

/// Accepts any certificate chain presented by a connecting peer without
/// validating it against a root store. Pinning authorization happens one
/// layer up, after the handshake, by comparing DER bytes directly.
#[derive(Debug)]
struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Accepts the broker's certificate only if it is byte-for-byte the one the
/// dialing side was configured to expect. The broker's certificate is
/// self-signed and never expected to chain to a root store; this pin is the
/// whole of the dialer's trust in the broker's identity.
#[derive(Debug)]
struct AcceptPinnedServerCert {
    provider: Arc<CryptoProvider>,
    expected: CertificateDer<'static>,
}

impl ServerCertVerifier for AcceptPinnedServerCert {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.expected.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "broker certificate does not match pinned certificate".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Which of the two upgrade paths a connection came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Worker,
    Client,
}

/// The broker's TLS + WebSocket front door. Cloning shares the underlying
/// acceptor and allow-list, so each accepted connection can be handled on
/// its own task.
#[derive(Clone)]
pub struct Listener {
    tcp: Arc<TcpListener>,
    acceptor: TlsAcceptor,
    authorized: Arc<AuthorizedClients>,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        identity: Identity,
        authorized: Arc<AuthorizedClients>,
    ) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client_verifier = Arc::new(AcceptAnyClientCert {
            provider: provider.clone(),
        });

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| RaiseError::Other(format!("tls config: {e}")))?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(identity.cert_chain, identity.key)
            .map_err(|e| RaiseError::Other(format!("tls identity rejected: {e}")))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let tcp = TcpListener::bind(addr).await?;
        info!(%addr, "listening");

        Ok(Self {
            tcp: Arc::new(tcp),
            acceptor: TlsAcceptor::from(Arc::new(config)),
            authorized,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Accepts one raw TCP connection. Callers typically spawn
    /// [`Listener::upgrade`] on the result so a slow or hostile peer can't
    /// block the accept loop.
    pub async fn accept_raw(&self) -> Result<(TcpStream, SocketAddr)> {
        Ok(self.tcp.accept().await?)
    }

    /// Runs the TLS handshake and WebSocket upgrade for one connection.
    /// Returns `Ok(None)` for connections that terminated at the HTTP layer
    /// (health check, or a `/client` request with an unrecognised
    /// certificate) rather than completing an upgrade.
    pub async fn upgrade(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<Option<(Incoming, WebSocketStream<tokio_rustls::server::TlsStream<TcpStream>>)>> {
        let tls_stream = self.acceptor.accept(stream).await?;

        let peer_der: Vec<CertificateDer<'static>> = tls_stream
            .get_ref()
            .1
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
            .unwrap_or_default();

        let authorized = self.authorized.clone();
        let mut incoming = None;
        let callback = |req: &WsRequest, resp: WsResponse| -> std::result::Result<WsResponse, ErrorResponse> {
            match req.uri().path() {
                HEALTH_PATH => Err(health_response()),
                WORKER_PATH => {
                    incoming = Some(Incoming::Worker);
                    Ok(resp)
                }
                CLIENT_PATH => {
                    let leaf = peer_der.first();
                    match leaf.and_then(|leaf| authorized.authorizes(leaf)) {
                        Some(name) => {
                            info!(%addr, client = %name, "client authorized");
                            incoming = Some(Incoming::Client);
                            Ok(resp)
                        }
                        None => {
                            warn!(%addr, "rejecting unpinned client certificate");
                            Err(unauthorized_response())
                        }
                    }
                }
                other => Err(not_found_response(other)),
            }
        };

        match tokio_tungstenite::accept_hdr_async(tls_stream, callback).await {
            Ok(ws) => match incoming {
                Some(role) => Ok(Some((role, ws))),
                None => Ok(None),
            },
            Err(tokio_tungstenite::tungstenite::Error::Http(_)) => Ok(None),
            Err(e) => Err(RaiseError::from(e)),
        }
    }
}

fn health_response() -> ErrorResponse {
    http_response(StatusCode::OK, "ok")
}

fn unauthorized_response() -> ErrorResponse {
    http_response(StatusCode::UNAUTHORIZED, "Unauthorised")
}

fn not_found_response(path: &str) -> ErrorResponse {
    http_response(StatusCode::NOT_FOUND, &format!("no such endpoint: {path}"))
}

fn http_response(status: StatusCode, body: &str) -> ErrorResponse {
    tokio_tungstenite::tungstenite::http::Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Some(body.to_string()))
        .expect("static response is well-formed")
}

fn client_config_pinned(broker_cert: CertificateDer<'static>) -> ClientConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(AcceptPinnedServerCert {
        provider: provider.clone(),
        expected: broker_cert,
    });
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("default tls versions are supported")
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth()
}

fn client_config_with_identity(identity: Identity, broker_cert: CertificateDer<'static>) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(AcceptPinnedServerCert {
        provider: provider.clone(),
        expected: broker_cert,
    });
    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RaiseError::Other(format!("tls config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(identity.cert_chain, identity.key)
        .map_err(|e| RaiseError::Other(format!("client identity rejected: {e}")))?)
}

/// Dials the broker's `/worker` endpoint. No client certificate is
/// presented, but the broker's own certificate must match `broker_cert`
/// exactly.
pub async fn dial_worker(
    url: &url::Url,
    broker_cert: CertificateDer<'static>,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, SocketAddr)> {
    dial(url, WORKER_PATH, TlsConnector::from(Arc::new(client_config_pinned(broker_cert)))).await
}

/// Dials the broker's `/client` endpoint, presenting `identity` so the
/// broker can check it against its pinned allow-list, while also checking
/// the broker's own certificate against `broker_cert`.
pub async fn dial_client(
    url: &url::Url,
    identity: Identity,
    broker_cert: CertificateDer<'static>,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, SocketAddr)> {
    let config = client_config_with_identity(identity, broker_cert)?;
    dial(url, CLIENT_PATH, TlsConnector::from(Arc::new(config))).await
}

async fn dial(
    base: &url::Url,
    path: &str,
    connector: TlsConnector,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, SocketAddr)> {
    let mut url = base.clone();
    url.set_path(path);

    let host = url
        .host_str()
        .ok_or_else(|| RaiseError::Config("broker url has no host".into()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| RaiseError::Config("broker url has no port".into()))?;

    let addr = tokio::net::lookup_host((host.as_str(), port))
        .await?
        .next()
        .ok_or_else(|| RaiseError::Config(format!("could not resolve {host}")))?;

    let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
        url.as_str(),
        None,
        false,
        Some(tokio_tungstenite::Connector::Rustls(connector.into())),
    )
    .await
    .map_err(RaiseError::from)?;

    Ok((ws, addr))
}
