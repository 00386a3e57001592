/*!
 * Configuration structures and defaults for Ballast
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BallastError, Result};
use crate::host::MaintenanceWindow;
use crate::modes::RsyncMode;
use crate::size::{parse_size, GIB};

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Main configuration for one rebalance run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Root under which data disks are mounted
    pub disks_root: PathBuf,

    /// Target maximum fill percent per disk; None selects auto-even mode
    pub target_percent: Option<f64>,

    /// Headroom percent when auto-evening
    pub headroom_percent: f64,

    /// Allocation unit depth under each share
    pub unit_depth: u32,

    /// Only move units at least this large (bytes)
    pub min_unit_size: u64,

    /// rsync performance mode
    pub mode: RsyncMode,

    pub include_disks: Option<Vec<String>>,
    pub exclude_disks: Option<Vec<String>>,
    pub include_shares: Option<Vec<String>>,
    pub exclude_shares: Option<Vec<String>>,
    pub exclude_globs: Vec<String>,

    /// Merge into existing destination directories instead of skipping
    pub allow_merge: bool,

    /// Execute moves; false is a dry run
    pub execute: bool,

    /// Extra flags passed through to rsync
    pub extra_rsync_flags: Vec<String>,

    /// Metrics database location
    pub metrics_db: Option<PathBuf>,

    /// Schedule config directory
    pub schedule_dir: PathBuf,

    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,

    /// Maintenance window for scheduled runs
    pub maintenance_window: Option<MaintenanceWindow>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            disks_root: PathBuf::from("/mnt"),
            target_percent: Some(80.0),
            headroom_percent: 5.0,
            unit_depth: 1,
            min_unit_size: GIB,
            mode: RsyncMode::Fast,
            include_disks: None,
            exclude_disks: None,
            include_shares: None,
            exclude_shares: None,
            exclude_globs: Vec::new(),
            allow_merge: false,
            execute: false,
            extra_rsync_flags: Vec::new(),
            metrics_db: None,
            schedule_dir: PathBuf::from("/boot/config/plugins/ballast/schedules"),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            maintenance_window: None,
        }
    }
}

/// Configuration file structure (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: ConfigDefaults,

    #[serde(default)]
    pub exclude: ExcludeConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDefaults {
    pub disks_root: Option<PathBuf>,
    pub target_percent: Option<f64>,
    pub headroom_percent: Option<f64>,
    pub unit_depth: Option<u32>,
    /// Size string, e.g. "5GiB"
    pub min_unit_size: Option<String>,
    pub mode: Option<RsyncMode>,
    pub metrics_db: Option<PathBuf>,
    pub schedule_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExcludeConfig {
    #[serde(default)]
    pub shares: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaintenanceConfig {
    pub window: Option<MaintenanceWindow>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BallastError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| BallastError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. ./ballast.toml (local)
    /// 2. ~/.ballast/ballast.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("ballast.toml")) {
            return config;
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home).join(".ballast").join("ballast.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Apply this config file to a RebalanceConfig
    pub fn apply_to(&self, config: &mut RebalanceConfig) {
        if let Some(ref root) = self.defaults.disks_root {
            config.disks_root = root.clone();
        }
        if let Some(pct) = self.defaults.target_percent {
            config.target_percent = if pct < 0.0 { None } else { Some(pct) };
        }
        if let Some(headroom) = self.defaults.headroom_percent {
            config.headroom_percent = headroom;
        }
        if let Some(depth) = self.defaults.unit_depth {
            config.unit_depth = depth;
        }
        if let Some(ref size) = self.defaults.min_unit_size {
            if let Ok(bytes) = parse_size(size) {
                config.min_unit_size = bytes;
            }
        }
        if let Some(mode) = self.defaults.mode {
            config.mode = mode;
        }
        if let Some(ref path) = self.defaults.metrics_db {
            config.metrics_db = Some(path.clone());
        }
        if let Some(ref dir) = self.defaults.schedule_dir {
            config.schedule_dir = dir.clone();
        }

        if !self.exclude.shares.is_empty() {
            let mut shares = config.exclude_shares.take().unwrap_or_default();
            shares.extend(self.exclude.shares.clone());
            config.exclude_shares = Some(shares);
        }
        config.exclude_globs.extend(self.exclude.globs.clone());

        if let Some(ref window) = self.maintenance.window {
            config.maintenance_window = Some(window.clone());
        }
    }
}
