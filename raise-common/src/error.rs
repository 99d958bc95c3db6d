//! # Error Taxonomy
//!
//! Mirrors the error classes called out in the error-handling design: transport,
//! authentication, routing, remote-execution and protocol failures each get their
//! own variant so callers can match on what went wrong rather than parsing strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaiseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid base64 certificate: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed client list entry: {0}")]
    MalformedClientList(String),

    #[error("worker {0} not connected or non existing")]
    WorkerNotFound(String),

    #[error("call to {method} failed: {source}")]
    RemoteCall {
        method: String,
        #[source]
        source: Box<RaiseError>,
    },

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("connection closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RaiseError>;
