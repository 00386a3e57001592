/*!
 * Schedule templates
 *
 * A fixed catalog of named schedule configurations. Templates are pure
 * constructors; instantiation revalidates before handing the config out.
 */

use crate::error::Result;
use crate::modes::RsyncMode;
use crate::scheduler::cron::{daily_expression, weekly_expression};
use crate::scheduler::{
    RebalanceParams, ResourceThresholds, RetryConfig, ScheduleConfig, ScheduleKind, TriggerKind,
};
use crate::size::GIB;

pub const TEMPLATE_NAMES: [&str; 6] = [
    "nightly-light",
    "weekly-full",
    "maintenance-window",
    "parity-safe",
    "idle-based",
    "disk-usage-threshold",
];

fn base_config(id: &str, name: &str) -> ScheduleConfig {
    ScheduleConfig {
        schedule_id: id.to_string(),
        name: name.to_string(),
        enabled: true,
        kind: ScheduleKind::Recurring,
        trigger: TriggerKind::Time,
        cron_expression: None,
        resource_thresholds: None,
        disk_usage_threshold: None,
        rebalance: RebalanceParams::default(),
        max_runtime_hours: Some(8),
        retry: RetryConfig::default(),
        notify_on_success: false,
        notify_on_failure: true,
        created_at: 0.0,
        updated_at: 0.0,
    }
}

/// Nightly run at `hour`, light touch: fast mode, large units only.
pub fn nightly_light(hour: u32) -> Result<ScheduleConfig> {
    let mut config = base_config("nightly-light", "Nightly light rebalance");
    config.cron_expression = Some(daily_expression(hour, 0));
    config.rebalance.mode = RsyncMode::Fast;
    config.rebalance.min_unit_size = 5 * GIB;
    config.max_runtime_hours = Some(4);
    config.validate()?;
    Ok(config)
}

/// Weekly thorough pass in integrity mode.
pub fn weekly_full(day_of_week: u32, hour: u32) -> Result<ScheduleConfig> {
    let mut config = base_config("weekly-full", "Weekly full rebalance");
    config.cron_expression = Some(weekly_expression(day_of_week, hour, 0));
    config.rebalance.mode = RsyncMode::Integrity;
    config.rebalance.min_unit_size = GIB;
    config.max_runtime_hours = Some(12);
    config.validate()?;
    Ok(config)
}

/// Sunday small-hours window with a strict runtime cap.
pub fn maintenance_window() -> Result<ScheduleConfig> {
    let mut config = base_config("maintenance-window", "Maintenance window rebalance");
    config.cron_expression = Some(weekly_expression(0, 1, 0));
    config.rebalance.mode = RsyncMode::Balanced;
    config.max_runtime_hours = Some(5);
    config.validate()?;
    Ok(config)
}

/// Runs only when the host is quiet, so parity operations keep their I/O.
pub fn parity_safe() -> Result<ScheduleConfig> {
    let mut config = base_config("parity-safe", "Parity-safe rebalance");
    config.kind = ScheduleKind::Conditional;
    config.trigger = TriggerKind::Resource;
    config.resource_thresholds = Some(ResourceThresholds {
        max_cpu_percent: 50.0,
        max_memory_percent: 70.0,
        max_disk_io_bps: 50.0 * 1024.0 * 1024.0,
        min_idle_minutes: 0,
    });
    config.rebalance.mode = RsyncMode::Balanced;
    config.validate()?;
    Ok(config)
}

/// Fires after a sustained idle streak.
pub fn idle_based() -> Result<ScheduleConfig> {
    let mut config = base_config("idle-based", "Idle-time rebalance");
    config.kind = ScheduleKind::Conditional;
    config.trigger = TriggerKind::Idle;
    config.resource_thresholds = Some(ResourceThresholds {
        max_cpu_percent: 25.0,
        max_memory_percent: 80.0,
        max_disk_io_bps: 10.0 * 1024.0 * 1024.0,
        min_idle_minutes: 30,
    });
    config.rebalance.mode = RsyncMode::Fast;
    config.validate()?;
    Ok(config)
}

/// Fires when any disk crosses the fill threshold.
pub fn disk_usage_threshold(threshold_percent: f64) -> Result<ScheduleConfig> {
    let mut config = base_config("disk-usage-threshold", "Disk-usage triggered rebalance");
    config.kind = ScheduleKind::Conditional;
    config.trigger = TriggerKind::DiskUsage;
    config.disk_usage_threshold = Some(threshold_percent);
    config.rebalance.mode = RsyncMode::Fast;
    config.validate()?;
    Ok(config)
}

/// Instantiate a template by catalog name with its default parameters.
pub fn by_name(name: &str) -> Option<Result<ScheduleConfig>> {
    match name {
        "nightly-light" => Some(nightly_light(2)),
        "weekly-full" => Some(weekly_full(0, 3)),
        "maintenance-window" => Some(maintenance_window()),
        "parity-safe" => Some(parity_safe()),
        "idle-based" => Some(idle_based()),
        "disk-usage-threshold" => Some(disk_usage_threshold(90.0)),
        _ => None,
    }
}
