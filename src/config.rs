// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{AttentionIndex, MarketId};

const ENV_PATH: &str = "ATTENTION_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/attention.toml";
const ENV_TIMEOUT: &str = "ADAPTER_TIMEOUT_MS";
const ENV_STORE_DIR: &str = "ATTENTION_STORE_DIR";

fn default_timeout_ms() -> u64 {
    5000
}
fn default_tick_secs() -> u64 {
    60
}
fn default_window() -> String {
    "24h".to_string()
}
fn default_user_agent() -> String {
    concat!("attention-index/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
    /// Upper bound for a single adapter call.
    #[serde(default = "default_timeout_ms")]
    pub adapter_timeout_ms: u64,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: default_timeout_ms(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            narrative: NarrativeConfig::default(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Root of the JSON file store.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// JSON array of `{ "market_id", "index" }` loaded into the store at startup.
    #[serde(default)]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Restrict scheduled refreshes to these markets; empty means all.
    #[serde(default)]
    pub markets: Vec<MarketId>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_secs: default_tick_secs(),
            markets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default = "default_window")]
    pub default_window: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            default_window: default_window(),
        }
    }
}

impl AppConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    /// 1) $ATTENTION_CONFIG_PATH (must exist)
    /// 2) config/attention.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_PATH))?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_TIMEOUT) {
            self.adapter_timeout_ms = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TIMEOUT} must be milliseconds, got {v:?}"))?;
        }
        if let Ok(dir) = std::env::var(ENV_STORE_DIR) {
            if !dir.trim().is_empty() {
                self.store.kind = StoreKind::File;
                self.store.dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }
}

/// One market and its index, as listed in a seed file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedEntry {
    pub market_id: MarketId,
    pub index: AttentionIndex,
}

pub fn load_seed(path: &Path) -> Result<Vec<SeedEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading seed from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing seed {}", path.display()))
}
