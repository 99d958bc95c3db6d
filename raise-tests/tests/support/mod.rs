//! Shared harness for spinning up a broker plus worker/client connections
//! entirely over loopback TLS, so the fabric's end-to-end behavior can be
//! exercised without a real deployment.

use std::net::SocketAddr;
use std::sync::Arc;

use raise_broker::WorkerRegistry;
use raise_common::certs::{self, AuthorizedClients};
use raise_common::protocol::{methods, HelloRequest, HelloResponse};
use raise_common::transport::{self, Identity, Listener};
use raise_common::Endpoint;
use raise_client::facade::Client;
use rustls::pki_types::CertificateDer;

pub struct Broker {
    pub addr: SocketAddr,
    pub url: url::Url,
    pub cert_der: CertificateDer<'static>,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Starts a broker on an ephemeral loopback port with one client pin
/// pre-authorized. Returns the broker handle and that client's identity PEM
/// bytes so a test can dial in immediately.
pub async fn start_broker() -> (Broker, Identity) {
    let broker_identity = certs::generate_self_signed("test-broker").expect("broker cert");
    let broker_cert_der = CertificateDer::from(broker_identity.cert_der.clone());
    let broker_id = Identity::from_pem_bytes(&broker_identity.cert_pem.into_bytes(), &broker_identity.key_pem.into_bytes())
        .expect("parse broker identity");

    let client_cert = certs::generate_self_signed("test-client").expect("client cert");
    let client_identity = Identity::from_pem_bytes(
        &client_cert.cert_pem.clone().into_bytes(),
        &client_cert.key_pem.clone().into_bytes(),
    )
    .expect("parse client identity");

    let client_list_line = format!("{} test-client", client_cert.pin());
    let authorized = Arc::new(
        AuthorizedClients::from_lines(std::iter::once(client_list_line.as_str()))
            .expect("authorized clients"),
    );

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = Listener::bind(addr, broker_id, authorized)
        .await
        .expect("bind broker listener");
    let addr = listener.local_addr().expect("listener addr");

    let registry = Arc::new(WorkerRegistry::new());
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    tokio::spawn(raise_broker::accept_loop(
        listener,
        registry,
        true,
        shutdown_rx,
    ));

    let url = url::Url::parse(&format!("wss://127.0.0.1:{}", addr.port())).unwrap();

    (
        Broker {
            addr,
            url,
            cert_der: broker_cert_der,
            shutdown: shutdown_tx,
        },
        client_identity,
    )
}

/// Dials the broker as a worker, installs the standard worker handlers and
/// announces `name` via `Control_Hello`. The returned endpoint stays
/// connected for as long as it's held; drop it to simulate a disconnect.
pub async fn connect_worker(broker: &Broker, name: &str) -> Arc<Endpoint> {
    let (ws, addr) = transport::dial_worker(&broker.url, broker.cert_der.clone())
        .await
        .expect("dial worker");
    let (endpoint, serve) = Endpoint::new(ws, addr);
    raise_worker::handlers::install(&endpoint, name);
    tokio::spawn(serve.run());

    endpoint
        .call::<HelloRequest, HelloResponse>(
            methods::CONTROL_HELLO,
            HelloRequest {
                name: name.to_string(),
            },
        )
        .await
        .expect("Control_Hello");

    endpoint
}

pub async fn connect_client(broker: &Broker, identity: Identity) -> Client {
    Client::new(broker.url.clone(), identity, broker.cert_der.clone())
}
