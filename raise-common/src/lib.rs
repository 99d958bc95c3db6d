//! Shared building blocks for the `raise` control plane: the RPC multiplexer,
//! wire protocol types, mTLS transport and certificate pinning, configuration
//! loading, logging setup and system-info collection used by all three
//! binaries (broker, worker, client).

pub mod certs;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod rpc;
pub mod sysinfo;
pub mod transport;

pub use error::{RaiseError, Result};
pub use rpc::{Endpoint, PeerInfo, ServeLoop};
