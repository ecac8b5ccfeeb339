//! Layered configuration: compiled-in defaults, overlaid by an optional TOML
//! file, overlaid by environment variables. CLI flags are applied by the
//! caller after extraction, since `clap` already parses those with its own
//! precedence rules.
//!
//! Modeled on the teacher's `MergedConfigLoader` (`cloud-common/src/config.rs`),
//! simplified down to the single `defaults < file < env` chain this project
//! needs.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::DispatcherError;

/// Build a config value of type `T` from its `Default`, optionally overlaid
/// by a TOML file, then overlaid by environment variables prefixed with
/// `env_prefix` (e.g. `DISPATCHER_`).
pub fn load<T>(config_path: Option<&Path>, env_prefix: &str) -> Result<T, DispatcherError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed(env_prefix));
    figment
        .extract()
        .map_err(|e| DispatcherError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Example {
        workers: u32,
        host: String,
    }

    impl Default for Example {
        fn default() -> Self {
            Self {
                workers: 4,
                host: "127.0.0.1".to_string(),
            }
        }
    }

    #[test]
    fn defaults_apply_with_no_overlays() {
        let cfg: Example = load(None, "DISPATCHER_TEST_NOPE_").unwrap();
        assert_eq!(cfg, Example::default());
    }

    #[test]
    fn env_overlay_overrides_defaults() {
        std::env::set_var("DISPATCHER_TEST_ENV_WORKERS", "9");
        let cfg: Example = load(None, "DISPATCHER_TEST_ENV_").unwrap();
        assert_eq!(cfg.workers, 9);
        assert_eq!(cfg.host, "127.0.0.1".to_string());
        std::env::remove_var("DISPATCHER_TEST_ENV_WORKERS");
    }
}
