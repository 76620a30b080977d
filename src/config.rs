use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// The monitoring universe: loaded once, immutable for the process.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub kpi: KpiConfig,
}

fn default_true() -> bool {
    true
}

/// One monitored unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable systemd unit name, e.g. "gifter.service".
    pub unit: String,
    /// Human-readable name used in alerts and menus.
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "MonitoringConfig::default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "MonitoringConfig::default_cooldown")]
    pub cooldown_minutes: u64,
    #[serde(default = "MonitoringConfig::default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Grace period between a control action and the follow-up probe.
    #[serde(default = "MonitoringConfig::default_settle_delay")]
    pub settle_delay_secs: u64,
}

impl MonitoringConfig {
    fn default_poll_interval() -> u64 {
        180
    }
    fn default_cooldown() -> u64 {
        30
    }
    fn default_probe_timeout() -> u64 {
        10
    }
    fn default_settle_delay() -> u64 {
        2
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes as i64)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: Self::default_poll_interval(),
            cooldown_minutes: Self::default_cooldown(),
            probe_timeout_secs: Self::default_probe_timeout(),
            settle_delay_secs: Self::default_settle_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Recipient identifiers alerts are fanned out to.
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiConfig {
    #[serde(default)]
    pub enabled: bool,
    pub database_url: Option<String>,
    #[serde(default = "KpiConfig::default_check_interval")]
    pub check_interval_secs: u64,
    /// Divisions that must have a KPI row for the current date.
    #[serde(default)]
    pub expected_divisions: Vec<String>,
    /// Divisions ignored by the completeness query.
    #[serde(default)]
    pub excluded_divisions: Vec<String>,
}

impl KpiConfig {
    fn default_check_interval() -> u64 {
        3600
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: None,
            check_interval_secs: Self::default_check_interval(),
            expected_divisions: Vec::new(),
            excluded_divisions: Vec::new(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            services: vec![ServiceDescriptor {
                unit: "example.service".into(),
                display_name: "Example service".into(),
            }],
            monitoring: MonitoringConfig::default(),
            notify: NotifyConfig::default(),
            kpi: KpiConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Load a config file, creating a default one first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config not found at {}, creating default configuration",
                path.display()
            );
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            let default_toml = toml::to_string_pretty(&FleetConfig::default())
                .context("Failed to serialize default config")?;
            fs::write(path, default_toml).context("Failed to write config file")?;
        }

        let cfg_str = fs::read_to_string(path).context("Failed to read config file")?;
        let cfg: FleetConfig = toml::from_str(&cfg_str).context("Failed to parse config")?;
        Ok(cfg)
    }

    /// Unit names in configuration order.
    pub fn units(&self) -> Vec<String> {
        self.services.iter().map(|s| s.unit.clone()).collect()
    }

    /// Unit -> display name lookup.
    pub fn display_names(&self) -> HashMap<String, String> {
        self.services
            .iter()
            .map(|s| (s.unit.clone(), s.display_name.clone()))
            .collect()
    }

    pub fn display_name_of<'a>(&'a self, unit: &'a str) -> &'a str {
        self.services
            .iter()
            .find(|s| s.unit == unit)
            .map(|s| s.display_name.as_str())
            .unwrap_or(unit)
    }
}

/// Resolve the config path from CLI arguments, mirroring the daemon's
/// search order: explicit path, system-wide file, then the user directory.
pub fn resolve_config_path(explicit: Option<String>, system: bool) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }
    if system {
        return Ok(PathBuf::from("/etc/fleetmond/fleetmond.toml"));
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("fleetmond");
    Ok(config_dir.join("fleetmond.toml"))
}
