/*!
 * Rebalance scheduling
 *
 * Persistent schedule configurations (one JSON file per schedule), OS cron
 * registration for time-based triggers, conditional trigger evaluation,
 * execution supervision, and retry with backoff.
 */

pub mod conditions;
pub mod cron;
pub mod crontab;
pub mod execution;
pub mod templates;

pub use conditions::{
    launch_permitted, ConditionalScheduler, ResourceUsage, SysinfoUsage, UsageProvider,
};
pub use cron::CronExpression;
pub use crontab::{CrontabBackend, CrontabRegistry, SystemCrontab};
pub use execution::{
    ExecutionStatus, FailureRecord, FailureType, RecoveryManager, RetryHandle, ScheduleExecution,
    ScheduleMonitor, ScheduleStatistics,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BallastError, Result};
use crate::metrics::now_epoch;
use crate::modes::RsyncMode;
use crate::size::GIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    OneShot,
    Recurring,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Time,
    Resource,
    Idle,
    DiskUsage,
}

/// Resource ceilings for conditional triggers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceThresholds {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_disk_io_bps: f64,
    pub min_idle_minutes: u32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 50.0,
            max_memory_percent: 80.0,
            max_disk_io_bps: 100.0 * 1024.0 * 1024.0,
            min_idle_minutes: 0,
        }
    }
}

/// Rebalance parameters carried by a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceParams {
    /// Target fill percent; None selects auto-even mode
    pub target_percent: Option<f64>,
    pub headroom_percent: f64,
    pub unit_depth: u32,
    pub min_unit_size: u64,
    pub mode: RsyncMode,
    pub include_disks: Option<Vec<String>>,
    pub exclude_disks: Option<Vec<String>>,
    pub include_shares: Option<Vec<String>>,
    pub exclude_shares: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    pub allow_merge: bool,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
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
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy for failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub backoff_multiplier: f64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 3,
            base_delay_secs: 60,
            backoff_multiplier: 2.0,
            max_delay_secs: 3600,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Deterministic delay for a 1-based attempt, before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let secs = match self.strategy {
            RetryStrategy::None => 0.0,
            RetryStrategy::Fixed => self.base_delay_secs as f64,
            RetryStrategy::Linear => self.base_delay_secs as f64 * attempt as f64,
            RetryStrategy::Exponential => {
                let raw = self.base_delay_secs as f64
                    * self.backoff_multiplier.powi(attempt as i32 - 1);
                raw.min(self.max_delay_secs as f64)
            }
        };
        Duration::from_secs_f64(secs)
    }

    /// Final delay with the configured jitter applied: uniform downward
    /// jitter keeps the result in `[delay/2, delay]`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let jittered = rand::rng().random_range(secs / 2.0..=secs);
        Duration::from_secs_f64(jittered)
    }
}

/// A persistent schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub schedule_id: String,
    pub name: String,
    pub enabled: bool,
    pub kind: ScheduleKind,
    pub trigger: TriggerKind,
    pub cron_expression: Option<String>,
    pub resource_thresholds: Option<ResourceThresholds>,
    pub disk_usage_threshold: Option<f64>,
    pub rebalance: RebalanceParams,
    pub max_runtime_hours: Option<u32>,
    pub retry: RetryConfig,
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    pub created_at: f64,
    pub updated_at: f64,
}

impl ScheduleConfig {
    /// Structural validation: recurring schedules need a valid cron
    /// expression, conditional schedules need their trigger's thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.schedule_id.is_empty() {
            return Err(BallastError::Schedule("schedule_id must not be empty".into()));
        }
        if self.kind == ScheduleKind::Recurring || self.trigger == TriggerKind::Time {
            let expression = self.cron_expression.as_deref().ok_or_else(|| {
                BallastError::Schedule(format!(
                    "schedule {} requires a cron expression",
                    self.schedule_id
                ))
            })?;
            CronExpression::parse(expression)?;
        }
        match self.trigger {
            TriggerKind::Resource | TriggerKind::Idle => {
                if self.resource_thresholds.is_none() {
                    return Err(BallastError::Schedule(format!(
                        "schedule {} requires resource thresholds",
                        self.schedule_id
                    )));
                }
            }
            TriggerKind::DiskUsage => {
                if self.disk_usage_threshold.is_none() {
                    return Err(BallastError::Schedule(format!(
                        "schedule {} requires a disk usage threshold",
                        self.schedule_id
                    )));
                }
            }
            TriggerKind::Time => {}
        }
        Ok(())
    }

    fn is_time_registered(&self) -> bool {
        self.enabled && self.trigger == TriggerKind::Time && self.cron_expression.is_some()
    }
}

/// Owns the persistent schedule collection and its crontab registration.
pub struct ScheduleManager {
    config_dir: PathBuf,
    registry: CrontabRegistry,
    schedules: Mutex<HashMap<String, ScheduleConfig>>,
}

impl ScheduleManager {
    pub fn new(config_dir: &Path, registry: CrontabRegistry) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        let manager = Self {
            config_dir: config_dir.to_path_buf(),
            registry,
            schedules: Mutex::new(HashMap::new()),
        };
        manager.load_schedules()?;
        Ok(manager)
    }

    fn config_path(&self, schedule_id: &str) -> PathBuf {
        self.config_dir.join(format!("{}.json", schedule_id))
    }

    fn load_schedules(&self) -> Result<()> {
        let mut schedules = self.schedules.lock().expect("manager lock");
        for entry in std::fs::read_dir(&self.config_dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(BallastError::from)
                .and_then(|text| {
                    serde_json::from_str::<ScheduleConfig>(&text).map_err(|e| {
                        BallastError::Schedule(format!("parse {}: {}", path.display(), e))
                    })
                }) {
                Ok(config) => {
                    schedules.insert(config.schedule_id.clone(), config);
                }
                Err(err) => warn!(path = %path.display(), "skipping unreadable schedule: {}", err),
            }
        }
        info!(count = schedules.len(), "loaded schedules");
        Ok(())
    }

    fn persist(&self, config: &ScheduleConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| BallastError::Schedule(format!("serialize schedule: {}", e)))?;
        std::fs::write(self.config_path(&config.schedule_id), json)?;
        Ok(())
    }

    /// Validate, persist, and (if enabled and time-based) register.
    pub fn create_schedule(&self, mut config: ScheduleConfig) -> Result<()> {
        config.validate()?;
        {
            let schedules = self.schedules.lock().expect("manager lock");
            if schedules.contains_key(&config.schedule_id) {
                return Err(BallastError::Schedule(format!(
                    "duplicate schedule id: {}",
                    config.schedule_id
                )));
            }
        }
        config.created_at = now_epoch();
        config.updated_at = config.created_at;
        self.persist(&config)?;
        if config.is_time_registered() {
            self.registry.install_schedule(&config)?;
        }
        self.schedules
            .lock()
            .expect("manager lock")
            .insert(config.schedule_id.clone(), config);
        Ok(())
    }

    /// Replace an existing schedule: unregister, persist, re-register.
    pub fn update_schedule(&self, schedule_id: &str, mut config: ScheduleConfig) -> Result<()> {
        config.validate()?;
        let previous = self
            .get_schedule(schedule_id)
            .ok_or_else(|| BallastError::Schedule(format!("no such schedule: {}", schedule_id)))?;

        self.registry.remove_schedule(schedule_id)?;
        config.schedule_id = schedule_id.to_string();
        config.created_at = previous.created_at;
        config.updated_at = now_epoch();
        self.persist(&config)?;
        if config.is_time_registered() {
            self.registry.install_schedule(&config)?;
        }
        self.schedules
            .lock()
            .expect("manager lock")
            .insert(schedule_id.to_string(), config);
        Ok(())
    }

    pub fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        self.registry.remove_schedule(schedule_id)?;
        let removed = self
            .schedules
            .lock()
            .expect("manager lock")
            .remove(schedule_id);
        if removed.is_none() {
            return Err(BallastError::Schedule(format!(
                "no such schedule: {}",
                schedule_id
            )));
        }
        let path = self.config_path(schedule_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn enable_schedule(&self, schedule_id: &str) -> Result<()> {
        self.set_enabled(schedule_id, true)
    }

    pub fn disable_schedule(&self, schedule_id: &str) -> Result<()> {
        self.set_enabled(schedule_id, false)
    }

    fn set_enabled(&self, schedule_id: &str, enabled: bool) -> Result<()> {
        let mut config = self
            .get_schedule(schedule_id)
            .ok_or_else(|| BallastError::Schedule(format!("no such schedule: {}", schedule_id)))?;
        config.enabled = enabled;
        config.updated_at = now_epoch();
        self.persist(&config)?;
        if config.is_time_registered() {
            self.registry.install_schedule(&config)?;
        } else {
            self.registry.remove_schedule(schedule_id)?;
        }
        self.schedules
            .lock()
            .expect("manager lock")
            .insert(schedule_id.to_string(), config);
        Ok(())
    }

    pub fn get_schedule(&self, schedule_id: &str) -> Option<ScheduleConfig> {
        self.schedules
            .lock()
            .expect("manager lock")
            .get(schedule_id)
            .cloned()
    }

    pub fn list_schedules(&self) -> Vec<ScheduleConfig> {
        let mut configs: Vec<ScheduleConfig> = self
            .schedules
            .lock()
            .expect("manager lock")
            .values()
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
        configs
    }

    pub fn list_enabled_schedules(&self) -> Vec<ScheduleConfig> {
        self.list_schedules().into_iter().filter(|s| s.enabled).collect()
    }

    /// Reconcile persisted configs with the cron table: install missing
    /// entries, remove orphaned ones.
    pub fn sync_schedules(&self) -> Result<()> {
        let installed = self.registry.list_installed()?;
        let configs = self.list_schedules();

        for config in &configs {
            if config.is_time_registered() && !installed.contains(&config.schedule_id) {
                info!(schedule = %config.schedule_id, "installing missing crontab entry");
                self.registry.install_schedule(config)?;
            }
        }
        for id in &installed {
            let known = configs
                .iter()
                .any(|c| &c.schedule_id == id && c.is_time_registered());
            if !known {
                info!(schedule = %id, "removing orphaned crontab entry");
                self.registry.remove_schedule(id)?;
            }
        }
        Ok(())
    }
}
