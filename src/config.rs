use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Operation budget per script call; 0 disables the limit.
    #[serde(default)]
    pub max_operations: u64,
    #[serde(default = "RuntimeConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "RuntimeConfig::default_chunk_cache_limit")]
    pub chunk_cache_limit: usize,
    #[serde(default = "RuntimeConfig::default_init_file")]
    pub init_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "ResourcesConfig::default_root")]
    pub root: PathBuf,
    /// Resources started by the host; empty starts everything discovered.
    #[serde(default)]
    pub autostart: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickConfig {
    #[serde(default = "TickConfig::default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub tick: TickConfig,
}

#[derive(Debug, Clone, Default)]
pub struct HostConfigOverrides {
    pub resources_root: Option<PathBuf>,
    pub max_ticks: Option<u64>,
    pub tick_interval_ms: Option<u64>,
}

impl RuntimeConfig {
    const fn default_max_call_levels() -> usize {
        64
    }

    const fn default_chunk_cache_limit() -> usize {
        256
    }

    fn default_init_file() -> String {
        "__resource.rhai".to_string()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: Self::default_max_call_levels(),
            chunk_cache_limit: Self::default_chunk_cache_limit(),
            init_file: Self::default_init_file(),
        }
    }
}

impl ResourcesConfig {
    fn default_root() -> PathBuf {
        PathBuf::from("resources")
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self { root: Self::default_root(), autostart: Vec::new() }
    }
}

impl TickConfig {
    const fn default_interval_ms() -> u64 {
        50
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { interval_ms: Self::default_interval_ms(), max_ticks: None }
    }
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &HostConfigOverrides) {
        if let Some(root) = &overrides.resources_root {
            self.resources.root = root.clone();
        }
        if let Some(ticks) = overrides.max_ticks {
            self.tick.max_ticks = Some(ticks);
        }
        if let Some(interval) = overrides.tick_interval_ms {
            self.tick.interval_ms = interval;
        }
    }

    pub fn should_autostart(&self, resource: &str) -> bool {
        self.resources.autostart.is_empty() || self.resources.autostart.iter().any(|name| name == resource)
    }
}

impl HostConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.resources_root.is_none() && self.max_ticks.is_none() && self.tick_interval_ms.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.resources_root.is_some() {
            fields.push("resources");
        }
        if self.max_ticks.is_some() {
            fields.push("ticks");
        }
        if self.tick_interval_ms.is_some() {
            fields.push("tick-ms");
        }
        fields
    }
}
