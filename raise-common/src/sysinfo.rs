//! # Host Facts
//!
//! Backs the `Common_GetInfo` handler: a small, dependency-light snapshot of
//! the machine a worker (or broker, or client) is running on.

use crate::error::{RaiseError, Result};

#[derive(Debug, Clone)]
pub struct SystemFacts {
    pub hostname: String,
    pub home_dir: String,
    pub operating_system: String,
    pub architecture: String,
}

/// Collects the facts reported over `Common_GetInfo`. Fails if any fact
/// can't be obtained, rather than reporting a partial or empty value.
pub fn collect() -> Result<SystemFacts> {
    let hostname = hostname::get()
        .map_err(RaiseError::Io)?
        .to_string_lossy()
        .into_owned();

    let home_dir = dirs::home_dir()
        .ok_or_else(|| RaiseError::Other("could not determine home directory".to_string()))?
        .display()
        .to_string();

    Ok(SystemFacts {
        hostname,
        home_dir,
        operating_system: std::env::consts::OS.to_string(),
        architecture: map_arch(std::env::consts::ARCH),
    })
}

/// Go-style architecture tags, since the fabric's `GetInfo` convention
/// predates this port: `amd64`/`arm64` rather than Rust's own `x86_64`/
/// `aarch64`. Anything else is reported as-is.
fn map_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_without_error_on_this_host() {
        let facts = collect().unwrap();
        assert!(!facts.hostname.is_empty());
        assert!(!facts.architecture.is_empty());
    }
}
