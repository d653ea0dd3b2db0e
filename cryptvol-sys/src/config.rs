// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration
//!
//! Read from `$CRYPTVOL_CONFIG`, or `/etc/cryptvol.toml` when unset. A
//! missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_ENV: &str = "CRYPTVOL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cryptvol.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit cryptsetup binary; looked up in PATH when unset
    pub cryptsetup_path: Option<PathBuf>,

    /// Upper bound for one cryptsetup invocation
    pub timeout_secs: u64,

    /// Directory for short-lived key files; system temp dir when unset
    pub secret_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cryptsetup_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            secret_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from the environment-selected path or the system default
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn secret_dir(&self) -> PathBuf {
        self.secret_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::load_from(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cryptvol.toml");
        std::fs::write(&path, "cryptsetup_path = \"/sbin/cryptsetup\"\n").expect("write");

        let config = EngineConfig::load_from(&path).expect("load");
        assert_eq!(config.cryptsetup_path, Some(PathBuf::from("/sbin/cryptsetup")));
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cryptvol.toml");
        std::fs::write(&path, "timeout_secs = \"soon\"\n").expect("write");

        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
