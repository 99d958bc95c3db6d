//! The `raise` worker binary.
//!
//! Dials the broker's `/worker` endpoint, announces itself with
//! `Control_Hello`, then serves `Common_Ping` / `Common_GetInfo` /
//! `Common_SendMessage` until the connection drops. Redials after a fixed
//! backoff so a broker restart or network blip doesn't require manual
//! intervention.

use std::time::Duration;

use anyhow::{Context, Result};
use raise_common::protocol::{methods, HelloRequest, HelloResponse};
use raise_common::{logging, transport, Endpoint};
use raise_worker::config::Config;
use raise_worker::handlers;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load().context("loading worker configuration")?;
    logging::init(&config.log_filter);

    let url = url::Url::parse(&config.broker_url).context("parsing broker url")?;
    let name = match &config.name {
        Some(name) => name.clone(),
        None => raise_common::sysinfo::collect()?.hostname,
    };

    let broker_cert = rustls::pki_types::CertificateDer::from(
        raise_common::certs::base64_to_der(&config.broker_cert).context("parsing --broker-cert")?,
    );

    info!(worker = %name, broker = %config.broker_url, "starting worker");

    loop {
        tokio::select! {
            result = run_session(&url, &name, broker_cert.clone()) => {
                match result {
                    Ok(()) => info!("session ended, reconnecting"),
                    Err(e) => warn!(error = %e, "session failed, reconnecting"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("ctrl-c received, exiting");
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(config.reconnect_seconds)) => {}
            _ = signal::ctrl_c() => {
                info!("ctrl-c received during backoff, exiting");
                return Ok(());
            }
        }
    }
}

async fn run_session(
    url: &url::Url,
    name: &str,
    broker_cert: rustls::pki_types::CertificateDer<'static>,
) -> raise_common::Result<()> {
    let (ws, addr) = transport::dial_worker(url, broker_cert).await?;
    info!(%addr, "connected to broker");

    let (endpoint, serve) = Endpoint::new(ws, addr);
    handlers::install(&endpoint, name);

    endpoint
        .call::<HelloRequest, HelloResponse>(
            methods::CONTROL_HELLO,
            HelloRequest {
                name: name.to_string(),
            },
        )
        .await?;
    info!(worker = %name, "registered with broker");

    serve.run().await;
    info!("connection to broker closed");
    Ok(())
}
