//! Runtime configuration: defaults, TOML layer, environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest journal a switch will accept: header block plus one frame of room.
pub const MIN_JOURNAL_BYTES: u64 = 4096;

const DEFAULT_JOURNAL_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("journal capacity {got} below minimum {min}")]
    CapacityTooSmall { got: u64, min: u64 },
}

/// Resolved configuration for a switch instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Path of the journal file. Created (preallocated) on first open.
    pub path: PathBuf,
    /// Fixed size of the journal file in bytes.
    pub capacity_bytes: u64,
    /// Whether each append is fsynced before it is considered durable.
    pub fsync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            journal: JournalConfig {
                path: PathBuf::from("switchboard.journal"),
                capacity_bytes: DEFAULT_JOURNAL_BYTES,
                fsync: true,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.journal.capacity_bytes < MIN_JOURNAL_BYTES {
            return Err(ConfigError::CapacityTooSmall {
                got: self.journal.capacity_bytes,
                min: MIN_JOURNAL_BYTES,
            });
        }
        Ok(())
    }
}

/// Partial configuration as it appears in a TOML file.
///
/// Every field is optional; absent fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub journal: JournalLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JournalLayer {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub fsync: Option<bool>,
}

impl ConfigLayer {
    fn apply_to(self, config: &mut Config) {
        if let Some(path) = self.journal.path {
            config.journal.path = path;
        }
        if let Some(capacity) = self.journal.capacity_bytes {
            config.journal.capacity_bytes = capacity;
        }
        if let Some(fsync) = self.journal.fsync {
            config.journal.fsync = fsync;
        }
    }
}

pub fn load_file(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Load configuration: defaults, then the TOML file (if any), then
/// environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(path) = path
        && let Some(layer) = load_file(path)?
    {
        layer.apply_to(&mut config);
    }
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var("SWITCHBOARD_JOURNAL_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.journal.path = PathBuf::from(trimmed);
        }
    }

    if let Ok(raw) = std::env::var("SWITCHBOARD_JOURNAL_BYTES") {
        match raw.trim().parse::<u64>() {
            Ok(bytes) => config.journal.capacity_bytes = bytes,
            Err(e) => {
                tracing::warn!("ignoring SWITCHBOARD_JOURNAL_BYTES {raw:?}: {e}");
            }
        }
    }

    if std::env::var("SWITCHBOARD_NO_FSYNC").is_ok() {
        config.journal.fsync = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.journal.fsync);
    }

    #[test]
    fn layer_overrides_defaults() {
        let layer: ConfigLayer = toml::from_str(
            r#"
            [journal]
            path = "/tmp/sb.journal"
            capacity_bytes = 8192
            fsync = false
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        layer.apply_to(&mut config);
        assert_eq!(config.journal.path, PathBuf::from("/tmp/sb.journal"));
        assert_eq!(config.journal.capacity_bytes, 8192);
        assert!(!config.journal.fsync);
    }

    #[test]
    fn partial_layer_keeps_defaults() {
        let layer: ConfigLayer = toml::from_str(
            r#"
            [journal]
            capacity_bytes = 65536
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        layer.apply_to(&mut config);
        assert_eq!(config.journal.capacity_bytes, 65536);
        assert_eq!(config.journal.path, Config::default().journal.path);
    }

    #[test]
    fn tiny_capacity_is_rejected() {
        let mut config = Config::default();
        config.journal.capacity_bytes = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapacityTooSmall { .. })
        ));
    }
}
