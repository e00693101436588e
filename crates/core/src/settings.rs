//! `config.toml`: engine timings and named connection targets.
//!
//! ```toml
//! [settings]
//! connect_timeout_ms = 8000
//!
//! [profiles.staging]
//! host = "10.0.0.5"
//! user = "reader"
//! database = "warehouse"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ConnectionParams;

const CONFIG_DIR_ENV: &str = "ROWDECK_CONFIG_DIR";

/// Engine timings. Zero values are treated as one millisecond.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub notification_ttl_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            connect_timeout_ms: 5_000,
            notification_ttl_ms: 3_000,
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    #[must_use]
    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms.max(1))
    }
}

/// A saved connection target, keyed by name in the file. There is no
/// password field; it is supplied when the profile is turned into
/// [`ConnectionParams`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: String,
}

fn default_port() -> u16 {
    3306
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            database: database.into(),
        }
    }

    #[must_use]
    pub fn params(&self, password: impl Into<String>) -> ConnectionParams {
        ConnectionParams::new(
            self.host.clone(),
            self.port,
            self.user.clone(),
            password,
            self.database.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory: set ROWDECK_CONFIG_DIR or HOME")]
    NoConfigDir,
    #[error("config I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: EngineSettings,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    profiles: BTreeMap<String, ConnectionProfile>,
}

impl Config {
    /// Reads the config at `path`. A file that does not exist, or has no
    /// content, yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the config to `path`, creating missing parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered).map_err(io_error)
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.get(name)
    }

    /// Profiles in name order.
    pub fn profiles(&self) -> impl Iterator<Item = (&str, &ConnectionProfile)> {
        self.profiles
            .iter()
            .map(|(name, profile)| (name.as_str(), profile))
    }

    /// Adds or replaces the profile called `name`.
    pub fn set_profile(&mut self, name: impl Into<String>, profile: ConnectionProfile) {
        self.profiles.insert(name.into(), profile);
    }

    pub fn remove_profile(&mut self, name: &str) -> Option<ConnectionProfile> {
        self.profiles.remove(name)
    }
}

/// `$ROWDECK_CONFIG_DIR/config.toml` when set, else `rowdeck/config.toml`
/// under the platform config directory.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir).join("config.toml"));
    }

    let base = if cfg!(target_os = "windows") {
        env::var_os("APPDATA").map(PathBuf::from)
    } else {
        env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
    };
    base.map(|dir| dir.join("rowdeck").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}
