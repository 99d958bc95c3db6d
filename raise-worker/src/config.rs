//! Worker configuration: flags provide defaults, an optional JSON file
//! (`--config`, or `raise.json` beside the binary) overrides them.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "raise", version, about = "raise worker")]
pub struct Config {
    /// Broker WebSocket URL, e.g. `wss://broker.example.com:9443`.
    #[arg(long)]
    pub broker_url: String,

    /// Base64 DER of the certificate the broker is expected to present.
    /// The worker refuses to complete the TLS handshake with anything else.
    #[arg(long)]
    pub broker_cert: String,

    /// Name this worker announces in `Control_Hello`. Defaults to the
    /// machine's hostname when unset.
    #[arg(long)]
    #[serde(default)]
    pub name: Option<String>,

    /// Seconds to wait before redialing after a lost or failed connection.
    #[arg(long, default_value_t = 10)]
    #[serde(default = "default_reconnect_seconds")]
    pub reconnect_seconds: u64,

    /// Explicit path to a JSON config file. If unset, `raise.json` beside
    /// the executable is used when present.
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `raise_worker=debug,raise_common=info`.
    #[arg(long, default_value = "info")]
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_reconnect_seconds() -> u64 {
    10
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> raise_common::Result<Self> {
        let flags = Self::parse();
        let config_path = raise_common::config::resolve_config_path(flags.config.clone(), "raise");
        raise_common::config::load_with_overrides(flags, config_path.as_deref())
    }
}
