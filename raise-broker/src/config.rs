//! Broker configuration: flags provide defaults, an optional JSON file
//! (`--config`, or `raised.json` beside the binary) overrides them.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "raised", version, about = "raise control-plane broker")]
pub struct Config {
    /// Address to listen on for both worker and client connections.
    #[arg(long, default_value = "0.0.0.0:9443")]
    #[serde(default = "default_listen")]
    pub listen: String,

    /// PEM certificate chain the broker presents for TLS.
    #[arg(long, default_value = "broker-cert.pem")]
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,

    /// PEM private key matching `cert_path`.
    #[arg(long, default_value = "broker-key.pem")]
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// File of authorized clients, one per line as
    /// `<base64 DER certificate> <name>`, that may connect on `/client`.
    #[arg(long, default_value = "authorized-clients.txt")]
    #[serde(default = "default_client_list_path")]
    pub client_list_path: PathBuf,

    /// Reverse-ping a worker before completing its `Control_Hello`
    /// registration, so a half-broken socket never enters the directory.
    #[arg(long, default_value_t = true)]
    #[serde(default = "default_verify_worker_liveness")]
    pub verify_worker_liveness: bool,

    /// Explicit path to a JSON config file. If unset, `raised.json` beside
    /// the executable is used when present.
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `raise_broker=debug,raise_common=info`.
    #[arg(long, default_value = "info")]
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_listen() -> String {
    "0.0.0.0:9443".to_string()
}
fn default_cert_path() -> PathBuf {
    "broker-cert.pem".into()
}
fn default_key_path() -> PathBuf {
    "broker-key.pem".into()
}
fn default_client_list_path() -> PathBuf {
    "authorized-clients.txt".into()
}
fn default_verify_worker_liveness() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> raise_common::Result<Self> {
        let flags = Self::parse();
        let config_path = raise_common::config::resolve_config_path(flags.config.clone(), "raised");
        raise_common::config::load_with_overrides(flags, config_path.as_deref())
    }
}
