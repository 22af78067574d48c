//! Configuration system.
//!
//! A single TOML file describes one publishing session: identity key
//! material, the replication peer endpoint, the state URI, the watched
//! directory, and sync tuning. `SEGSYNC_*` environment variables override
//! file values.

use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::watch::WatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// State tree URI this session publishes into.
    pub state_uri: String,

    /// Directory holding the live segments.
    pub watch_dir: PathBuf,

    /// Replication peer settings.
    pub peer: PeerConfig,

    /// Identity key material.
    pub identity: IdentityConfig,

    /// Sync tuning.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Local storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Replication peer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// HTTP endpoint of the peer, e.g. `http://localhost:8080`.
    pub endpoint: String,
}

/// Identity key material: a hex seed inline or in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub seed_hex: Option<String>,
    pub seed_file: Option<PathBuf>,
}

impl IdentityConfig {
    /// Resolve the seed hex, preferring the inline value.
    pub fn resolve_seed_hex(&self) -> Result<String, SyncError> {
        if let Some(seed) = &self.seed_hex {
            return Ok(seed.clone());
        }
        if let Some(path) = &self.seed_file {
            return std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| {
                    SyncError::Config(format!("Failed to read seed file {:?}: {}", path, e))
                });
        }
        Err(SyncError::Config(
            "No identity seed configured (set identity.seed_hex or identity.seed_file)"
                .to_string(),
        ))
    }
}

/// Sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// The mutable index artifact name.
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on each network call, in milliseconds. Zero disables.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
}

fn default_index_file() -> String {
    "index.m3u8".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_network_timeout_ms() -> u64 {
    30_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            index_file: default_index_file(),
            debounce_ms: default_debounce_ms(),
            network_timeout_ms: default_network_timeout_ms(),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the session database. Defaults to the platform data
    /// directory for segsync.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> Result<PathBuf, SyncError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("", "", "segsync")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                SyncError::Config("Could not determine a data directory".to_string())
            })
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        let mut config: SyncConfig = toml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("Failed to parse config {:?}: {}", path, e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("SEGSYNC_PEER_ENDPOINT") {
            self.peer.endpoint = endpoint;
        }
        if let Ok(state_uri) = std::env::var("SEGSYNC_STATE_URI") {
            self.state_uri = state_uri;
        }
        if let Ok(watch_dir) = std::env::var("SEGSYNC_WATCH_DIR") {
            self.watch_dir = PathBuf::from(watch_dir);
        }
        if let Ok(seed) = std::env::var("SEGSYNC_IDENTITY_SEED") {
            self.identity.seed_hex = Some(seed);
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.state_uri.trim().is_empty() {
            return Err(SyncError::Config("state_uri must not be empty".to_string()));
        }
        if self.peer.endpoint.trim().is_empty() {
            return Err(SyncError::Config(
                "peer.endpoint must not be empty".to_string(),
            ));
        }
        if self.sync.index_file.trim().is_empty() {
            return Err(SyncError::Config(
                "sync.index_file must not be empty".to_string(),
            ));
        }
        if self.sync.debounce_ms == 0 {
            return Err(SyncError::Config(
                "sync.debounce_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The watcher configuration derived from this file.
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            watch_dir: self.watch_dir.clone(),
            index_file: self.sync.index_file.clone(),
            debounce_ms: self.sync.debounce_ms,
            network_timeout_ms: if self.sync.network_timeout_ms == 0 {
                None
            } else {
                Some(self.sync.network_timeout_ms)
            },
        }
    }

    /// Write a starter configuration to `path`.
    pub fn write_starter<P: AsRef<Path>>(path: P) -> Result<(), SyncError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(SyncError::Config(format!(
                "Refusing to overwrite existing config {:?}",
                path
            )));
        }
        let starter = SyncConfig {
            state_uri: "example.local/video".to_string(),
            watch_dir: PathBuf::from("./recordings/live/stream"),
            peer: PeerConfig {
                endpoint: "http://localhost:8080".to_string(),
            },
            identity: IdentityConfig {
                seed_hex: None,
                seed_file: Some(PathBuf::from("identity.seed")),
            },
            sync: SyncSettings::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        };
        let rendered = toml::to_string_pretty(&starter)
            .map_err(|e| SyncError::Config(format!("Failed to render config: {}", e)))?;
        std::fs::write(path, rendered)
            .map_err(|e| SyncError::Config(format!("Failed to write config {:?}: {}", path, e)))?;
        Ok(())
    }
}
