//! Engine configuration loaded from `config.toml`
//!
//! Every field has a default, so a missing file, a missing section or a
//! missing key all fall back silently.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform data dir
pub const APP_DIR: &str = "findex";

/// Config file name inside the application directory
pub const CONFIG_TOML: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub watch: WatchConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file (None = `<data dir>/findex/index.db`)
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Records per store transaction
    pub batch_size: usize,
    /// Files processed between cooperative yields / progress events
    pub yield_every: usize,
    /// Hard cap on path segment count
    pub max_depth: usize,
    /// Extra exclusion tokens merged with caller-supplied ones
    pub exclude: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            yield_every: 50,
            max_depth: crate::exclusion::MAX_PATH_DEPTH,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period a path must observe before its event is applied
    pub debounce_ms: u64,
    /// Events deeper than this (relative to the watched root) are ignored
    pub max_depth: usize,
    /// How often the event loop wakes up to flush settled paths
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            max_depth: 32,
            poll_interval_ms: 100,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Fuzzy snapshot time-to-live
    pub fuzzy_ttl_secs: u64,
    /// Maximum records held by the fuzzy snapshot
    pub fuzzy_max_entries: usize,
    /// Minimum weighted fuzzy score (0.0-1.0) for a record to match
    pub fuzzy_min_score: f64,
    /// Store writes after which the fuzzy snapshot is considered stale
    pub fuzzy_max_mutations: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            fuzzy_ttl_secs: 300,
            fuzzy_max_entries: 200_000,
            fuzzy_min_score: 0.3,
            fuzzy_max_mutations: 5_000,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[store]
# path = "/custom/location/index.db"  # Default: <data dir>/findex/index.db
busy_timeout_ms = 5000

[index]
batch_size = 500    # Records per store transaction
yield_every = 50    # Files between progress updates
max_depth = 64      # Skip paths with more segments than this
exclude = []        # Extra names or path fragments to skip

[watch]
debounce_ms = 2000  # Quiet period before a change is applied
max_depth = 32
poll_interval_ms = 100

[search]
default_limit = 100
fuzzy_ttl_secs = 300
fuzzy_max_entries = 200000
fuzzy_min_score = 0.3
fuzzy_max_mutations = 5000
"#;

/// Platform application directory (e.g. `~/.local/share/findex`)
pub fn app_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("Could not determine a data directory for the index")?;
    Ok(base.join(APP_DIR))
}

impl EngineConfig {
    /// Load config from an explicit path, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => app_dir()?.join(CONFIG_TOML),
        };

        if !path.exists() {
            log::debug!("No config found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        log::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write the commented default config if no file exists yet
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Created default config.toml at {:?}", path);
        Ok(true)
    }

    /// Resolved database path
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(p) => Ok(p.clone()),
            None => Ok(app_dir()?.join(crate::store::DB_FILE)),
        }
    }
}
