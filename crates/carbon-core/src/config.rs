//! carbond.toml configuration parser.
//!
//! Every field has a default matching the reference experiment, so an
//! empty file (or no file at all) yields a runnable configuration.
//! `SCHEDULING_PERIOD` and `CARBON_API_URL` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NodeMapError, NodeRegionMap};

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("scheduler.total_cycles must be greater than zero")]
    ZeroCycles,

    #[error("scheduler.carbon_aware_fraction must be within [0, 1], got {0}")]
    Fraction(f64),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("workload.exec_time_min ({min}) exceeds workload.exec_time_max ({max})")]
    ExecRange { min: u32, max: u32 },

    #[error("workload.hint_weight must be within 1..=100, got {0}")]
    HintWeight(u32),

    #[error("signal.url is empty")]
    MissingSignalUrl,

    #[error("invalid node list: {0}")]
    Nodes(#[from] NodeMapError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub scheduler: SchedulerConfig,
    pub signal: SignalConfig,
    pub workload: WorkloadConfig,
    pub log: LogConfig,
    pub cluster: ClusterConfig,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between cycles, e.g. "10s".
    pub period: String,
    pub total_cycles: u32,
    /// Share of cycles, from the start, that run carbon-aware.
    pub carbon_aware_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub template: PathBuf,
    pub namespace: String,
    pub name_prefix: String,
    pub exec_time_env: String,
    pub exec_time_min: u32,
    pub exec_time_max: u32,
    pub hint_weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub carbon_aware_file: String,
    pub baseline_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub api_url: String,
    /// Bearer token file. Empty means no token.
    pub token_file: Option<PathBuf>,
    /// PEM bundle trusted for an `https://` API server. Empty means the
    /// public web PKI roots.
    pub ca_file: Option<PathBuf>,
    pub label_selector: String,
    pub watch_retry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub region: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: "10s".to_string(),
            total_cycles: 600,
            carbon_aware_fraction: 0.5,
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            url: "http://carbon-api:8080/intensity".to_string(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("workload.json"),
            namespace: "default".to_string(),
            name_prefix: "carbon-aware".to_string(),
            exec_time_env: "EXEC_TIME".to_string(),
            exec_time_min: 20,
            exec_time_max: 60,
            hint_weight: 100,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/log/carbon-aware"),
            carbon_aware_file: "carbonaware_strategy.log".to_string(),
            baseline_file: "normal_strategy.log".to_string(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            token_file: None,
            ca_file: None,
            label_selector: "app=carbon-aware".to_string(),
            watch_retry: "5s".to_string(),
        }
    }
}

fn default_nodes() -> Vec<NodeConfig> {
    [("vm1", "DE"), ("vm2", "ERCOT"), ("vm3", "NL")]
        .into_iter()
        .map(|(name, region)| NodeConfig {
            name: name.to_string(),
            region: region.to_string(),
        })
        .collect()
}

impl ExperimentConfig {
    /// Built-in defaults including the three reference nodes.
    pub fn reference() -> Self {
        Self {
            nodes: default_nodes(),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML; an omitted `[[nodes]]` list falls back to the reference nodes.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: ExperimentConfig = toml::from_str(content)?;
        if config.nodes.is_empty() {
            config.nodes = default_nodes();
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `SCHEDULING_PERIOD` (seconds) and `CARBON_API_URL` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("SCHEDULING_PERIOD") {
            let secs = secs.trim();
            // Bare integers are seconds; anything else is taken as a duration string.
            if secs.parse::<u64>().is_ok() {
                self.scheduler.period = format!("{secs}s");
            } else {
                self.scheduler.period = secs.to_string();
            }
        }
        if let Some(url) = lookup("CARBON_API_URL") {
            self.signal.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.total_cycles == 0 {
            return Err(ConfigError::ZeroCycles);
        }
        let fraction = self.scheduler.carbon_aware_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::Fraction(fraction));
        }
        self.period()?;
        self.watch_retry()?;
        if self.workload.exec_time_min > self.workload.exec_time_max {
            return Err(ConfigError::ExecRange {
                min: self.workload.exec_time_min,
                max: self.workload.exec_time_max,
            });
        }
        if !(1..=100).contains(&self.workload.hint_weight) {
            return Err(ConfigError::HintWeight(self.workload.hint_weight));
        }
        if self.signal.url.trim().is_empty() {
            return Err(ConfigError::MissingSignalUrl);
        }
        self.node_region_map()?;
        Ok(())
    }

    pub fn period(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.scheduler.period).ok_or_else(|| ConfigError::Duration {
            field: "scheduler.period",
            value: self.scheduler.period.clone(),
        })
    }

    pub fn watch_retry(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.cluster.watch_retry).ok_or_else(|| ConfigError::Duration {
            field: "cluster.watch_retry",
            value: self.cluster.watch_retry.clone(),
        })
    }

    pub fn token_file(&self) -> Option<&Path> {
        non_empty(self.cluster.token_file.as_deref())
    }

    pub fn ca_file(&self) -> Option<&Path> {
        non_empty(self.cluster.ca_file.as_deref())
    }

    pub fn node_region_map(&self) -> Result<NodeRegionMap, NodeMapError> {
        NodeRegionMap::new(
            self.nodes
                .iter()
                .map(|n| (n.name.clone(), n.region.clone())),
        )
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Parse a duration like "500ms", "10s", "2m" or "1h". Bare numbers are
/// seconds. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, millis_per_unit) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        (s, 1_000)
    };
    let value: u64 = value.trim().parse().ok()?;
    value.checked_mul(millis_per_unit).map(Duration::from_millis)
}
