//! The `raised` binary: the control-plane broker.
//!
//! Listens once, over TLS, and serves two upgrade paths from the same
//! socket: `/worker` for workers announcing themselves via `Control_Hello`,
//! and `/client` for pinned clients directing calls at a named worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use raise_broker::config::Config;
use raise_broker::WorkerRegistry;
use raise_common::certs::AuthorizedClients;
use raise_common::logging;
use raise_common::transport::{Identity, Listener};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load().context("loading broker configuration")?;
    logging::init(&config.log_filter);

    let cert_pem = std::fs::read(&config.cert_path)
        .with_context(|| format!("reading {}", config.cert_path.display()))?;
    let key_pem = std::fs::read(&config.key_path)
        .with_context(|| format!("reading {}", config.key_path.display()))?;
    let identity = Identity::from_pem_bytes(&cert_pem, &key_pem)?;

    let client_list_text = std::fs::read_to_string(&config.client_list_path)
        .with_context(|| format!("reading {}", config.client_list_path.display()))?;
    let authorized = Arc::new(AuthorizedClients::from_lines(client_list_text.lines())?);
    info!(pinned_clients = authorized.len(), "loaded client allow-list");

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("parsing listen address {}", config.listen))?;
    let listener = Listener::bind(addr, identity, authorized).await?;
    info!(%addr, "broker listening");

    let registry = Arc::new(WorkerRegistry::new());
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let accept_handle = tokio::spawn(raise_broker::accept_loop(
        listener,
        registry,
        config.verify_worker_liveness,
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        _ = signal::ctrl_c() => info!("ctrl-c received, shutting down"),
        _ = wait_for_sigterm() => info!("sigterm received, shutting down"),
    }

    let _ = shutdown_tx.send(());
    let _ = accept_handle.await;
    info!("broker shutdown complete");
    Ok(())
}

async fn wait_for_sigterm() {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        term.recv().await;
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await
}
