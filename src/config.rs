//! Configuration loaded from `pglo.toml`.
//!
//! Lookup order: `./pglo.toml`, then `<config dir>/pglo/config.toml`.
//! Missing files yield the defaults; every field is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::connection::{DEFAULT_CHUNK_SIZE, ISOLATION_LEVEL_READ_COMMITTED};
use crate::error::{LoError, LoResult};

pub const CONFIG_FILE: &str = "pglo.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub large_object: LargeObjectConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub isolation_level: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            isolation_level: ISOLATION_LEVEL_READ_COMMITTED,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LargeObjectConfig {
    /// Bytes per call when importing and exporting.
    pub chunk_size: usize,
}

impl Default for LargeObjectConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "pg_lobject=info".to_string(),
        }
    }
}

impl Config {
    /// Load from the first config file found, or return the defaults.
    pub fn load() -> LoResult<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> LoResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> LoResult<Self> {
        toml::from_str(content).map_err(|e| LoError::Config(e.to_string()))
    }

    fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("pglo").join("config.toml"))
            .filter(|path| path.exists())
    }
}
