//! # RPC Multiplexer
//!
//! Turns a single duplex WebSocket stream into many concurrent, bidirectional
//! request/response pairs. Either side of a connected socket can `register` a
//! method handler and `call` a method on the peer at any time; the two roles
//! are symmetric, so the exact same type backs the broker's, the worker's and
//! the client's ends of a connection (design note: "the multiplexer itself
//! remains role-agnostic").
//!
//! Frames are a small JSON envelope tagged by direction. The concrete
//! encoding is an implementation detail of this module; both peers only ever
//! see typed `Req`/`Resp` values through [`Endpoint::call`] and
//! [`Endpoint::register`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::error::{RaiseError, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "dir", rename_all = "snake_case")]
enum Frame {
    Req {
        id: u64,
        method: String,
        payload: serde_json::Value,
    },
    Resp {
        id: u64,
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Identity of the peer a handler is currently serving. Handlers that need to
/// log or key off the originating address take this as their first argument.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
}

type HandlerResult = std::result::Result<serde_json::Value, String>;
type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type Handler = Box<dyn Fn(PeerInfo, serde_json::Value) -> HandlerFuture + Send + Sync>;

struct Pending {
    tx: oneshot::Sender<std::result::Result<serde_json::Value, String>>,
}

/// One end of a multiplexed RPC connection.
///
/// Construct with [`Endpoint::new`], register handlers, then drive the socket
/// with [`Endpoint::serve`] (typically on its own task). `call` may be invoked
/// concurrently from any number of tasks, including from within a handler
/// (this is how the broker forwards a client call into a worker call).
pub struct Endpoint {
    peer: PeerInfo,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    handlers: Mutex<HashMap<String, Handler>>,
    outbox: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    closed: AtomicBool,
}

impl Endpoint {
    /// Sends a frame if the connection is still open. Returns `false` once
    /// [`Endpoint::close`] has dropped the writer channel, which also
    /// propagates to the peer as a closed socket.
    fn send_frame(&self, frame: Frame) -> bool {
        match self.outbox.lock().unwrap().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

impl Endpoint {
    /// Wraps an already-upgraded WebSocket stream. Spawns the writer task
    /// immediately; `serve()` must be driven separately (usually via
    /// `tokio::spawn`) to pump incoming frames.
    pub fn new<S>(stream: WebSocketStream<S>, peer_addr: SocketAddr) -> (std::sync::Arc<Self>, ServeLoop<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(writer_task(sink, outbox_rx));

        let endpoint = std::sync::Arc::new(Self {
            peer: PeerInfo { addr: peer_addr },
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Some(outbox_tx)),
            closed: AtomicBool::new(false),
        });

        (endpoint.clone(), ServeLoop { endpoint, source })
    }

    pub fn peer(&self) -> PeerInfo {
        self.peer.clone()
    }

    /// Installs a handler for `method`. At most one handler per method; a
    /// second call with the same name replaces the first.
    pub fn register<Req, Resp, F, Fut>(&self, method: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(PeerInfo, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let handler = std::sync::Arc::new(handler);
        let wrapped: Handler = Box::new(move |peer, payload| {
            let handler = handler.clone();
            Box::pin(async move {
                let req = serde_json::from_value::<Req>(payload)
                    .map_err(|e| format!("malformed request payload: {e}"))?;
                match handler(peer, req).await {
                    Ok(resp) => serde_json::to_value(resp).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            })
        });

        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), wrapped);
    }

    /// Issues a request and awaits the matching response. Resolves to an
    /// error immediately if the endpoint has already been closed.
    pub async fn call<Req, Resp>(&self, method: &str, req: Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RaiseError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_value(req)
            .map_err(|e| RaiseError::Other(format!("failed to encode request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, Pending { tx });

        let frame = Frame::Req {
            id,
            method: method.to_string(),
            payload,
        };

        if !self.send_frame(frame) {
            self.pending.lock().unwrap().remove(&id);
            return Err(RaiseError::Closed);
        }

        trace!(method, id, "rpc call sent");

        match rx.await {
            Ok(Ok(value)) => serde_json::from_value(value)
                .map_err(|e| RaiseError::Other(format!("failed to decode response: {e}"))),
            Ok(Err(message)) => Err(RaiseError::Remote(message)),
            Err(_) => Err(RaiseError::Closed),
        }
    }

    /// Closes the endpoint. All in-flight calls fail with
    /// [`RaiseError::Closed`]; any further `call` fails immediately.
    /// Dropping the writer channel also tears down the underlying socket,
    /// which is what lets the peer notice the disconnect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbox.lock().unwrap().take();
        for (_, pending) in self.pending.lock().unwrap().drain() {
            let _ = pending.tx.send(Err("connection closed".to_string()));
        }
    }

    fn dispatch_request(self: &std::sync::Arc<Self>, id: u64, method: String, payload: serde_json::Value) {
        let handler = self.handlers.lock().unwrap().get(&method).map(|_| ());
        if handler.is_none() {
            let frame = Frame::Resp {
                id,
                payload: serde_json::Value::Null,
                error: Some(format!("unknown method: {method}")),
            };
            self.send_frame(frame);
            return;
        }

        let this = self.clone();
        let peer = self.peer.clone();
        tokio::spawn(async move {
            // Re-acquire the handler inside the task: the lock above only
            // proved presence, avoiding holding it across an await.
            let fut = {
                let handlers = this.handlers.lock().unwrap();
                handlers.get(&method).map(|h| h(peer, payload))
            };
            let (payload, error) = match fut {
                Some(fut) => match fut.await {
                    Ok(value) => (value, None),
                    Err(message) => (serde_json::Value::Null, Some(message)),
                },
                None => (
                    serde_json::Value::Null,
                    Some(format!("unknown method: {method}")),
                ),
            };
            this.send_frame(Frame::Resp { id, payload, error });
        });
    }

    fn dispatch_response(&self, id: u64, payload: serde_json::Value, error: Option<String>) {
        if let Some(pending) = self.pending.lock().unwrap().remove(&id) {
            let result = match error {
                Some(message) => Err(message),
                None => Ok(payload),
            };
            let _ = pending.tx.send(result);
        } else {
            warn!(id, "response for unknown correlation id");
        }
    }
}

/// Owns the read half of the socket. Call `run()` (usually via
/// `tokio::spawn`) to pump frames until the socket closes.
pub struct ServeLoop<S> {
    endpoint: std::sync::Arc<Endpoint>,
    source: futures_util::stream::SplitStream<WebSocketStream<S>>,
}

impl<S> ServeLoop<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub async fn run(mut self) {
        while let Some(message) = self.source.next().await {
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, "websocket read error, closing endpoint");
                    break;
                }
            };

            let text = match message {
                WsMessage::Text(t) => t.to_string(),
                WsMessage::Binary(b) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            match serde_json::from_str::<Frame>(&text) {
                Ok(Frame::Req { id, method, payload }) => {
                    self.endpoint.dispatch_request(id, method, payload)
                }
                Ok(Frame::Resp { id, payload, error }) => {
                    self.endpoint.dispatch_response(id, payload, error)
                }
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }

        self.endpoint.close();
    }
}

async fn writer_task<S>(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbox: mpsc::UnboundedReceiver<Frame>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    while let Some(frame) = outbox.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to encode frame");
                continue;
            }
        };
        if sink.send(WsMessage::text(text)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
