use sanad_collab::{CompactionConfig, ServerConfig, StoreConfig, WriteRejection};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_FILE: &str = "sanad.toml";

/// Runtime configuration for the sync server.
///
/// Values are loaded from (in order): `sanad.toml` in the working directory
/// or the file passed with `--config`, then environment variables prefixed
/// with `SANAD__` (e.g. `SANAD__BIND_ADDR`, `SANAD__COMPACTION__INTERVAL_SECS`).
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub storage_path: PathBuf,
    pub log_level: String,
    pub compaction: CompactionSettings,
    pub session: SessionSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CompactionSettings {
    pub interval_secs: u64,
    pub gap_threshold_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    pub write_rejection: WriteRejection,
    /// Correction service endpoint; spell/grammar checks answer with an
    /// error when unset.
    pub correction_url: Option<String>,
    pub correction_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    /// token -> user id
    pub tokens: HashMap<String, Uuid>,
}

impl Default for Settings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            bind_addr: server.bind_addr,
            storage_path: StoreConfig::default().path,
            log_level: "info".to_string(),
            compaction: CompactionSettings::default(),
            session: SessionSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Default for CompactionSettings {
    fn default() -> Self {
        let defaults = CompactionConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            gap_threshold_secs: defaults.gap_threshold.as_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_rejection: WriteRejection::default(),
            correction_url: None,
            correction_timeout_secs: 5,
        }
    }
}

impl Settings {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr.clone(),
            write_rejection: self.session.write_rejection,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.storage_path.clone(),
            ..StoreConfig::default()
        }
    }

    pub fn compaction_config(&self) -> CompactionConfig {
        CompactionConfig {
            interval: Duration::from_secs(self.compaction.interval_secs.max(1)),
            gap_threshold: Duration::from_secs(self.compaction.gap_threshold_secs),
        }
    }

    pub fn correction_timeout(&self) -> Duration {
        Duration::from_secs(self.session.correction_timeout_secs.max(1))
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Load settings. An explicit `path` must exist; the default file is optional.
pub fn load(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let file = match path {
        Some(path) => config::File::from(path.to_path_buf()).required(true),
        None => config::File::with_name(DEFAULT_FILE).required(false),
    };

    let cfg = config::Config::builder()
        .add_source(file)
        .add_source(config::Environment::with_prefix("SANAD").prefix_separator("__").separator("__"))
        .build()?;

    Ok(cfg.try_deserialize()?)
}
