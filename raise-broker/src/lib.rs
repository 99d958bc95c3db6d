//! Library surface for the broker binary, also used directly by the
//! workspace's integration tests to stand up an in-process broker without
//! shelling out to the `raised` executable.

pub mod config;
pub mod handlers;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use raise_common::transport::{Incoming, Listener};
use raise_common::{Endpoint, Result};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub use registry::WorkerRegistry;

/// Runs the accept loop until `shutdown` fires. Each accepted connection is
/// handled on its own task.
pub async fn accept_loop(
    listener: Listener,
    registry: Arc<WorkerRegistry>,
    verify_liveness: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept_raw() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let listener = listener.clone();
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(listener, stream, addr, registry, verify_liveness).await {
                                warn!(%addr, error = %e, "connection handling failed");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        }
    }
}

/// Runs the TLS+WebSocket upgrade for one connection and, on success,
/// serves it for as long as it stays open.
pub async fn handle_connection(
    listener: Listener,
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<WorkerRegistry>,
    verify_liveness: bool,
) -> Result<()> {
    let Some((role, ws)) = listener.upgrade(stream, addr).await? else {
        return Ok(());
    };

    let (endpoint, serve) = Endpoint::new(ws, addr);

    match role {
        Incoming::Worker => {
            handlers::install_worker_handlers(&endpoint, registry.clone(), verify_liveness);
            info!(%addr, "worker connected");
            serve.run().await;
            registry.remove(&endpoint);
        }
        Incoming::Client => {
            handlers::install_client_handlers(&endpoint, registry.clone());
            info!(%addr, "client connected");
            serve.run().await;
        }
    }

    Ok(())
}
