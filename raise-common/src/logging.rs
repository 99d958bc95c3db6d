//! # Logging
//!
//! Structured logging via `tracing` + `tracing-subscriber`, configured the
//! same way across all three binaries: `RUST_LOG` wins if set, otherwise the
//! caller's default filter applies. Kept deliberately thin; there is no
//! rotation or remote shipping here, that belongs to whatever process
//! supervisor runs the binary.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `default_filter` is a standard
/// `tracing_subscriber::EnvFilter` directive string, e.g. `"raise_broker=info,raise_common=info"`.
///
/// Safe to call once per process; a second call is a no-op (the underlying
/// `set_global_default` error is swallowed, matching the common pattern of
/// tests initializing logging repeatedly).
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
