//! # Worker-Side Method Handlers
//!
//! Everything a worker actually does lives here: answering pings, reporting
//! host facts, and carrying out the three `Common_SendMessage` kinds. All
//! three handlers are installed on the worker's own endpoint, so the broker
//! can forward a client's call straight through with no further translation.

use std::sync::Arc;

use raise_common::protocol::{
    methods, GetInfoRequest, GetInfoResponse, MessageKind, PingRequest, PingResponse,
    SendMessageRequest, SendMessageResponse,
};
use raise_common::{Endpoint, PeerInfo, RaiseError, Result};
use tokio::process::Command;

pub fn install(endpoint: &Arc<Endpoint>, name: &str) {
    let greeting = format!("Hello from worker {name}");
    endpoint.register(
        methods::COMMON_PING,
        move |_peer: PeerInfo, _req: PingRequest| {
            let greeting = greeting.clone();
            async move { Ok(PingResponse { message: greeting }) }
        },
    );

    endpoint.register(
        methods::COMMON_GET_INFO,
        |_peer: PeerInfo, _req: GetInfoRequest| async move {
            let facts = raise_common::sysinfo::collect()?;
            Ok(GetInfoResponse {
                hostname: facts.hostname,
                home_dir: facts.home_dir,
                operating_system: facts.operating_system,
                architecture: facts.architecture,
            })
        },
    );

    endpoint.register(
        methods::COMMON_SEND_MESSAGE,
        |_peer: PeerInfo, req: SendMessageRequest| async move { handle_send_message(req).await },
    );
}

async fn handle_send_message(req: SendMessageRequest) -> Result<SendMessageResponse> {
    let kind = req
        .kind
        .ok_or_else(|| RaiseError::Other("Common_SendMessage requires a kind".to_string()))?;

    match kind {
        MessageKind::ReadFile => {
            let content = tokio::fs::read(&req.filename).await?;
            Ok(SendMessageResponse { content })
        }
        MessageKind::WriteFile => {
            tokio::fs::write(&req.filename, &req.content).await?;
            Ok(SendMessageResponse { content: Vec::new() })
        }
        MessageKind::RunScript => {
            let output = run_script(&req.content).await?;
            Ok(SendMessageResponse { content: output })
        }
    }
}

/// Runs `script` on the host's default shell, piped in on stdin rather than
/// passed as an argument so scripts containing quotes or newlines survive
/// intact.
async fn run_script(script: &[u8]) -> Result<Vec<u8>> {
    use tokio::io::AsyncWriteExt;

    #[cfg(unix)]
    let mut command = {
        let mut c = Command::new("/bin/bash");
        c.arg("-s");
        c
    };
    #[cfg(windows)]
    let mut command = {
        let mut c = Command::new("powershell.exe");
        c.args(["-Command", "-"]);
        c
    };

    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command.spawn()?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(script)
        .await?;

    let output = child.wait_with_output().await?;
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);

    if !output.status.success() {
        return Err(RaiseError::Other(format!(
            "script exited with status {}",
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(combined)
}
