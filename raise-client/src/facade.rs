//! # Client Facade
//!
//! Thin, typed wrappers over the raw RPC calls a client tool makes: build a
//! [`Client`] once, list workers, then get a [`Remote`] handle per worker
//! name for the `Common_*` operations. Nothing is dialed at construction —
//! the broker socket is established lazily on whichever call, on either
//! [`Client`] or a [`Remote`] derived from it, happens to go first, and that
//! one socket is then reused for the rest of the object's lifetime.

use std::sync::{Arc, Mutex};

use raise_common::protocol::{
    methods, GetInfoRequest, GetInfoResponse, GetWorkersRequest, GetWorkersResponse, MessageKind,
    PingRequest, PingResponse, SendMessageRequest, SendMessageResponse,
};
use raise_common::transport::{self, Identity};
use raise_common::{Endpoint, Result};
use rustls::pki_types::CertificateDer;
use tokio::sync::OnceCell;

struct Inner {
    url: url::Url,
    identity: Mutex<Option<Identity>>,
    broker_cert: CertificateDer<'static>,
    endpoint: OnceCell<Arc<Endpoint>>,
}

impl Inner {
    async fn endpoint(&self) -> Result<Arc<Endpoint>> {
        self.endpoint
            .get_or_try_init(|| async {
                let identity = self
                    .identity
                    .lock()
                    .unwrap()
                    .take()
                    .expect("a Client only dials once");
                let (ws, addr) =
                    transport::dial_client(&self.url, identity, self.broker_cert.clone()).await?;
                let (endpoint, serve) = Endpoint::new(ws, addr);
                tokio::spawn(serve.run());
                Ok(endpoint)
            })
            .await
            .cloned()
    }

    fn close(&self) {
        if let Some(endpoint) = self.endpoint.get() {
            endpoint.close();
        }
    }
}

pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Builds a client bound to `url`/`identity`/`broker_cert`. No socket is
    /// opened until the first call is made.
    pub fn new(url: url::Url, identity: Identity, broker_cert: CertificateDer<'static>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                identity: Mutex::new(Some(identity)),
                broker_cert,
                endpoint: OnceCell::new(),
            }),
        }
    }

    pub async fn get_workers(&self) -> Result<Vec<String>> {
        let resp: GetWorkersResponse = self
            .inner
            .endpoint()
            .await?
            .call(methods::CLIENT_GET_WORKERS, GetWorkersRequest {})
            .await?;
        Ok(resp.workers)
    }

    pub async fn ping_broker(&self) -> Result<String> {
        let resp: PingResponse = self
            .inner
            .endpoint()
            .await?
            .call(methods::COMMON_PING, PingRequest { name: None })
            .await?;
        Ok(resp.message)
    }

    pub fn remote(&self, name: &str) -> Remote {
        Remote {
            inner: self.inner.clone(),
            name: name.to_string(),
        }
    }

    /// Tears down the underlying socket, if one was ever opened. Calls
    /// already in flight fail with a "connection closed" error; the
    /// [`Client`] and any [`Remote`] handles derived from it remain valid to
    /// hold but every further call fails.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// A handle to one named worker, reachable through the broker this
/// [`Client`] is connected to.
pub struct Remote {
    inner: Arc<Inner>,
    name: String,
}

impl Remote {
    pub async fn ping(&self) -> Result<String> {
        let resp: PingResponse = self
            .inner
            .endpoint()
            .await?
            .call(
                methods::COMMON_PING,
                PingRequest {
                    name: Some(self.name.clone()),
                },
            )
            .await?;
        Ok(resp.message)
    }

    pub async fn info(&self) -> Result<GetInfoResponse> {
        self.inner
            .endpoint()
            .await?
            .call(
                methods::COMMON_GET_INFO,
                GetInfoRequest {
                    name: self.name.clone(),
                },
            )
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp: SendMessageResponse = self
            .inner
            .endpoint()
            .await?
            .call(
                methods::COMMON_SEND_MESSAGE,
                SendMessageRequest {
                    target: Some(self.name.clone()),
                    kind: Some(MessageKind::ReadFile),
                    filename: path.to_string(),
                    content: Vec::new(),
                },
            )
            .await?;
        Ok(resp.content)
    }

    pub async fn write_file(&self, path: &str, content: Vec<u8>) -> Result<()> {
        let _: SendMessageResponse = self
            .inner
            .endpoint()
            .await?
            .call(
                methods::COMMON_SEND_MESSAGE,
                SendMessageRequest {
                    target: Some(self.name.clone()),
                    kind: Some(MessageKind::WriteFile),
                    filename: path.to_string(),
                    content,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn run_script(&self, script: Vec<u8>) -> Result<Vec<u8>> {
        let resp: SendMessageResponse = self
            .inner
            .endpoint()
            .await?
            .call(
                methods::COMMON_SEND_MESSAGE,
                SendMessageRequest {
                    target: Some(self.name.clone()),
                    kind: Some(MessageKind::RunScript),
                    filename: String::new(),
                    content: script,
                },
            )
            .await?;
        Ok(resp.content)
    }
}
