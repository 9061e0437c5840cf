//! Configuration system for Quarry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $QUARRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/quarry/config.toml
//!   3. ~/.config/quarry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub engine: EngineConfig,
    pub api: ApiConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max requests computing at once. 0 = available parallelism.
    pub max_concurrent_tasks: u32,
    /// Graphs above either size report progress at every optimization pass.
    pub large_graph_nodes: usize,
    pub large_graph_links: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Loopback port for the HTTP API.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Finished requests are forgotten after N seconds. 0 = keep forever.
    pub retention_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 0,
            large_graph_nodes: 10_000,
            large_graph_links: 50_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9400 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Concurrency limit with 0 resolved to the machine's parallelism.
    pub fn effective_max_tasks(&self) -> usize {
        if self.max_concurrent_tasks == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_tasks as usize
        }
    }

    pub fn is_large_graph(&self, nodes: usize, links: usize) -> bool {
        nodes > self.large_graph_nodes || links > self.large_graph_links
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("quarry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl QuarryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            QuarryConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("QUARRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&QuarryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply QUARRY_* overrides. `lookup` is `std::env::var` in production.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("QUARRY_ENGINE__MAX_CONCURRENT_TASKS") {
            if let Ok(n) = v.parse() {
                self.engine.max_concurrent_tasks = n;
            }
        }
        if let Some(v) = lookup("QUARRY_ENGINE__LARGE_GRAPH_NODES") {
            if let Ok(n) = v.parse() {
                self.engine.large_graph_nodes = n;
            }
        }
        if let Some(v) = lookup("QUARRY_ENGINE__LARGE_GRAPH_LINKS") {
            if let Ok(n) = v.parse() {
                self.engine.large_graph_links = n;
            }
        }
        if let Some(v) = lookup("QUARRY_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
        if let Some(v) = lookup("QUARRY_STORE__RETENTION_SECS") {
            if let Ok(n) = v.parse() {
                self.store.retention_secs = n;
            }
        }
    }
}
