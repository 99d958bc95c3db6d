//! The `ra` client binary.
//!
//! `ra bootstrap` mints a self-signed identity and prints the pin an
//! operator pastes into the broker's allow-list; every other subcommand
//! connects as that identity and issues one call.

use std::io::Write;

use anyhow::{Context, Result};
use raise_client::config::{Cli, Command, ConnectionConfig};
use raise_client::facade::Client;
use raise_common::transport::Identity;
use raise_common::{certs, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::load().context("loading client configuration")?;
    logging::init(&cli.connection.log_filter);

    if let Command::Bootstrap = cli.command {
        return bootstrap(&cli.connection);
    }

    let broker_url = cli
        .connection
        .broker_url
        .clone()
        .context("--broker-url is required for this command")?;
    let url = url::Url::parse(&broker_url).context("parsing broker url")?;

    let cert_pem = std::fs::read(&cli.connection.cert_path)
        .context("reading client certificate; run `ra bootstrap` first")?;
    let key_pem = std::fs::read(&cli.connection.key_path)
        .context("reading client key; run `ra bootstrap` first")?;
    let identity = Identity::from_pem_bytes(&cert_pem, &key_pem)?;

    let broker_cert_b64 = cli
        .connection
        .broker_cert
        .clone()
        .context("--broker-cert is required for this command")?;
    let broker_cert =
        rustls::pki_types::CertificateDer::from(certs::base64_to_der(&broker_cert_b64)?);

    let client = Client::new(url, identity, broker_cert);

    match cli.command {
        Command::Bootstrap => unreachable!("handled above"),
        Command::Workers => {
            for name in client.get_workers().await? {
                println!("{name}");
            }
        }
        Command::Ping { worker: Some(name) } => {
            println!("{}", client.remote(&name).ping().await?);
        }
        Command::Ping { worker: None } => {
            println!("{}", client.ping_broker().await?);
        }
        Command::Info { worker } => {
            let info = client.remote(&worker).info().await?;
            println!("{info:#?}");
        }
        Command::ReadFile { worker, path } => {
            let content = client.remote(&worker).read_file(&path).await?;
            std::io::stdout().write_all(&content)?;
        }
        Command::WriteFile {
            worker,
            path,
            local_file,
        } => {
            let content = std::fs::read(&local_file)
                .with_context(|| format!("reading {}", local_file.display()))?;
            client.remote(&worker).write_file(&path, content).await?;
        }
        Command::RunScript {
            worker,
            script_file,
        } => {
            let script = std::fs::read(&script_file)
                .with_context(|| format!("reading {}", script_file.display()))?;
            let output = client.remote(&worker).run_script(script).await?;
            std::io::stdout().write_all(&output)?;
        }
    }

    Ok(())
}

fn bootstrap(connection: &ConnectionConfig) -> Result<()> {
    if connection.cert_path.exists() {
        anyhow::bail!(
            "{} already exists; remove it first to regenerate",
            connection.cert_path.display()
        );
    }

    let generated = certs::generate_self_signed("raise-client")?;
    std::fs::write(&connection.cert_path, &generated.cert_pem)?;
    std::fs::write(&connection.key_path, &generated.key_pem)?;

    println!(
        "Generated {} and {}.",
        connection.cert_path.display(),
        connection.key_path.display()
    );
    println!("Add a line like this to the broker's client allow-list, with a name of your choosing:");
    println!("{} <name>", generated.pin());
    Ok(())
}
