//! TOML configuration for the Sluice proxy.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub log: LogSection,
    /// Diagnostics endpoint.
    #[serde(default)]
    pub stats: StatsSection,
    /// Server pools, in registry order.
    #[serde(rename = "pool")]
    pub pools: Vec<PoolSection>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[stats]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// Address the diagnostics endpoint listens on.
    pub listen: SocketAddr,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 22222)),
        }
    }
}

/// One `[[pool]]` entry.
#[derive(Debug, Deserialize)]
pub struct PoolSection {
    /// Pool name, unique across the config.
    pub name: String,
    /// Eject groups that keep failing probes.
    #[serde(default = "default_auto_eject_hosts")]
    pub auto_eject_hosts: bool,
    /// Consecutive probe failures before a group is ejected.
    #[serde(default = "default_server_failure_limit")]
    pub server_failure_limit: u32,
    /// How long an ejected group stays out of rotation.
    #[serde(default = "default_server_retry_timeout_ms")]
    pub server_retry_timeout_ms: u64,
    /// Upper bound between two rebuilds.
    #[serde(default = "default_rebuild_interval_ms")]
    pub rebuild_interval_ms: u64,
    /// Interval between probe rounds.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Per-server connect timeout for a probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Groups in distribution order.
    #[serde(rename = "group")]
    pub groups: Vec<GroupSection>,
}

/// One `[[pool.group]]` entry.
#[derive(Debug, Deserialize)]
pub struct GroupSection {
    /// Group name.
    pub name: String,
    /// Share of the continuum; must be positive.
    #[serde(default = "default_weight")]
    pub weight: NonZeroU32,
    /// Member server addresses.
    pub servers: Vec<SocketAddr>,
}

fn default_auto_eject_hosts() -> bool {
    true
}

fn default_server_failure_limit() -> u32 {
    2
}

fn default_server_retry_timeout_ms() -> u64 {
    30_000
}

fn default_rebuild_interval_ms() -> u64 {
    1_000
}

fn default_probe_interval_ms() -> u64 {
    1_000
}

fn default_probe_timeout_ms() -> u64 {
    1_500
}

fn default_weight() -> NonZeroU32 {
    NonZeroU32::MIN
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.pools.is_empty() {
            bail!("no pools configured");
        }

        let mut names = HashSet::new();
        for pool in &self.pools {
            if !names.insert(pool.name.as_str()) {
                bail!("duplicate pool name '{}'", pool.name);
            }
            if pool.groups.is_empty() {
                bail!("pool '{}' has no groups", pool.name);
            }
            if pool.server_failure_limit == 0 {
                bail!("pool '{}': server_failure_limit must be positive", pool.name);
            }
            for group in &pool.groups {
                if group.servers.is_empty() {
                    bail!("pool '{}': group '{}' has no servers", pool.name, group.name);
                }
            }
        }
        Ok(())
    }
}

impl PoolSection {
    /// Ejection window as a duration.
    pub fn server_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.server_retry_timeout_ms)
    }

    /// Rebuild interval as a duration.
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild_interval_ms)
    }

    /// Probe interval as a duration.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
