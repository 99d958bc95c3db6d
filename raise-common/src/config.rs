//! # Configuration Loading
//!
//! Every binary's configuration is a plain `clap::Parser` struct so flags
//! provide sane defaults and `--help` documents them, but an operator running
//! a fleet of workers rarely wants to pass the same ten flags each time. A
//! JSON file, specified with `--config` or found beside the binary as
//! `<binary-name>.json`, is deep-merged on top of the flag defaults: any key
//! it sets overrides the corresponding field, any key it omits keeps the
//! flag-derived default.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RaiseError, Result};

/// Looks for a config file at `explicit` first, then beside the running
/// executable as `<binary_name>.json`. Returns `None` if neither exists,
/// which is not an error: flag defaults alone are a valid configuration.
pub fn resolve_config_path(explicit: Option<PathBuf>, binary_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }

    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    let candidate = exe_dir.join(format!("{binary_name}.json"));
    candidate.exists().then_some(candidate)
}

/// Deep-merges the JSON file at `config_path` (if any) onto `defaults` and
/// returns the result. `defaults` is usually a `clap::Parser` struct already
/// populated from argv.
pub fn load_with_overrides<C>(defaults: C, config_path: Option<&Path>) -> Result<C>
where
    C: Serialize + DeserializeOwned,
{
    let Some(path) = config_path else {
        return Ok(defaults);
    };

    let text = std::fs::read_to_string(path)?;
    let overrides: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| RaiseError::Config(format!("{}: {e}", path.display())))?;

    let mut merged = serde_json::to_value(&defaults)
        .map_err(|e| RaiseError::Config(format!("failed to encode defaults: {e}")))?;
    merge_json(&mut merged, overrides);

    serde_json::from_value(merged)
        .map_err(|e| RaiseError::Config(format!("{} does not match expected schema: {e}", path.display())))
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(override_map)) => {
            for (key, value) in override_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Example {
        listen: String,
        port: u16,
    }

    #[test]
    fn file_overrides_apply_on_top_of_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"port": 9999}"#).unwrap();

        let defaults = Example {
            listen: "0.0.0.0".to_string(),
            port: 8080,
        };
        let merged = load_with_overrides(defaults, Some(path.as_path())).unwrap();

        assert_eq!(merged.listen, "0.0.0.0");
        assert_eq!(merged.port, 9999);
    }

    #[test]
    fn missing_config_path_returns_defaults_unchanged() {
        let defaults = Example {
            listen: "127.0.0.1".to_string(),
            port: 1,
        };
        let merged = load_with_overrides(
            Example {
                listen: "127.0.0.1".to_string(),
                port: 1,
            },
            None,
        )
        .unwrap();
        assert_eq!(merged, defaults);
    }
}
