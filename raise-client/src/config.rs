//! Client configuration. The connection settings (broker URL, cert/key
//! paths) go through the same flag-default / JSON-override loading as the
//! other two binaries; the subcommand is always explicit on the command
//! line, so it never touches the config file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "ra", version, about = "raise client")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Broker WebSocket URL, e.g. `wss://broker.example.com:9443`. Not
    /// needed for `bootstrap`.
    #[arg(long)]
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Base64 DER of the certificate the broker is expected to present.
    /// Not needed for `bootstrap`.
    #[arg(long)]
    #[serde(default)]
    pub broker_cert: Option<String>,

    /// This client's certificate, created by `ra bootstrap`.
    #[arg(long, default_value = "client-cert.pem")]
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,

    /// This client's private key, created by `ra bootstrap`.
    #[arg(long, default_value = "client-key.pem")]
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// Explicit path to a JSON config file. If unset, `ra.json` beside the
    /// executable is used when present.
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `warn` or `raise_client=debug`.
    #[arg(long, default_value = "warn")]
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_cert_path() -> PathBuf {
    "client-cert.pem".into()
}
fn default_key_path() -> PathBuf {
    "client-key.pem".into()
}
fn default_log_filter() -> String {
    "warn".to_string()
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Generate a self-signed client identity and print the pin to hand to
    /// the broker operator for its allow-list.
    Bootstrap,
    /// List the workers currently registered with the broker.
    Workers,
    /// Ping the broker itself, or a named worker through it.
    Ping { worker: Option<String> },
    /// Fetch host facts from a named worker.
    Info { worker: String },
    /// Read a file from a named worker, written to stdout.
    ReadFile { worker: String, path: String },
    /// Write a local file's contents to a path on a named worker.
    WriteFile {
        worker: String,
        path: String,
        local_file: PathBuf,
    },
    /// Run a local script file on a named worker; output goes to stdout.
    RunScript {
        worker: String,
        script_file: PathBuf,
    },
}

impl Cli {
    pub fn load() -> raise_common::Result<Self> {
        let mut cli = Self::parse();
        let config_path =
            raise_common::config::resolve_config_path(cli.connection.config.clone(), "ra");
        cli.connection =
            raise_common::config::load_with_overrides(cli.connection, config_path.as_deref())?;
        Ok(cli)
    }
}
