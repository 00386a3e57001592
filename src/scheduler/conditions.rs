/*!
 * Conditional trigger evaluation
 *
 * Decides whether a schedule may run right now based on its trigger kind:
 * time-based schedules are gated by cron, the rest by sampled resource
 * usage, idle streaks, or disk fill levels.
 */

use std::time::Instant;

use chrono::NaiveDateTime;
use sysinfo::{Disks as SysDisks, System};
use tracing::debug;

use crate::disk::Disk;
use crate::host::SystemProbe;
use crate::scheduler::{ResourceThresholds, ScheduleConfig, TriggerKind};

/// CPU below this counts the system as idle.
const IDLE_CPU_PERCENT: f64 = 10.0;

/// One point-in-time resource reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_io_bps: f64,
}

impl ResourceUsage {
    /// True when every reading is at or below its threshold.
    pub fn within(&self, thresholds: &ResourceThresholds) -> bool {
        self.cpu_percent <= thresholds.max_cpu_percent
            && self.memory_percent <= thresholds.max_memory_percent
            && self.disk_io_bps <= thresholds.max_disk_io_bps
    }
}

/// Supplies resource readings; the system implementation samples sysinfo,
/// tests supply fixed values.
pub trait UsageProvider {
    fn current_usage(&mut self) -> ResourceUsage;
}

/// Live readings from the host.
pub struct SysinfoUsage {
    sys: System,
    disks: SysDisks,
    last_sample: Option<Instant>,
}

impl SysinfoUsage {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            disks: SysDisks::new_with_refreshed_list(),
            last_sample: None,
        }
    }
}

impl Default for SysinfoUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProvider for SysinfoUsage {
    fn current_usage(&mut self) -> ResourceUsage {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh(true);

        let elapsed = self
            .last_sample
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(1.0)
            .max(0.001);
        self.last_sample = Some(Instant::now());

        let mut io_bytes = 0u64;
        for disk in self.disks.list() {
            let usage = disk.usage();
            io_bytes = io_bytes
                .saturating_add(usage.read_bytes)
                .saturating_add(usage.written_bytes);
        }

        let memory_percent = if self.sys.total_memory() > 0 {
            self.sys.used_memory() as f64 / self.sys.total_memory() as f64 * 100.0
        } else {
            0.0
        };

        ResourceUsage {
            cpu_percent: self.sys.global_cpu_usage() as f64,
            memory_percent,
            disk_io_bps: io_bytes as f64 / elapsed,
        }
    }
}

/// Evaluates conditional triggers, tracking idle streaks between calls.
pub struct ConditionalScheduler {
    idle_since: Option<Instant>,
}

impl ConditionalScheduler {
    pub fn new() -> Self {
        Self { idle_since: None }
    }

    /// Minutes the system has been continuously idle, given a fresh reading.
    fn idle_minutes(&mut self, usage: &ResourceUsage) -> f64 {
        if usage.cpu_percent < IDLE_CPU_PERCENT {
            let since = *self.idle_since.get_or_insert_with(Instant::now);
            since.elapsed().as_secs_f64() / 60.0
        } else {
            self.idle_since = None;
            0.0
        }
    }

    /// Decide whether `schedule` may execute now. Returns the decision and
    /// a human-readable reason.
    pub fn should_execute(
        &mut self,
        schedule: &ScheduleConfig,
        usage_provider: &mut dyn UsageProvider,
        disks: &[Disk],
    ) -> (bool, String) {
        match schedule.trigger {
            // Cron does the gating for time-based schedules
            TriggerKind::Time => (true, "time-based schedule".to_string()),

            TriggerKind::Resource => {
                let Some(ref thresholds) = schedule.resource_thresholds else {
                    return (false, "resource trigger without thresholds".to_string());
                };
                let usage = usage_provider.current_usage();
                if usage.within(thresholds) {
                    (true, "resource usage within thresholds".to_string())
                } else {
                    (
                        false,
                        format!(
                            "resource usage too high (cpu {:.1}%, mem {:.1}%)",
                            usage.cpu_percent, usage.memory_percent
                        ),
                    )
                }
            }

            TriggerKind::Idle => {
                let Some(ref thresholds) = schedule.resource_thresholds else {
                    return (false, "idle trigger without thresholds".to_string());
                };
                let usage = usage_provider.current_usage();
                let idle_minutes = self.idle_minutes(&usage);
                debug!(idle_minutes, "idle streak");
                if idle_minutes < thresholds.min_idle_minutes as f64 {
                    return (
                        false,
                        format!(
                            "system idle for {:.1} of {} required minutes",
                            idle_minutes, thresholds.min_idle_minutes
                        ),
                    );
                }
                if !usage.within(thresholds) {
                    return (false, "idle but resource usage too high".to_string());
                }
                (true, "system idle long enough".to_string())
            }

            TriggerKind::DiskUsage => {
                let Some(threshold) = schedule.disk_usage_threshold else {
                    return (false, "disk-usage trigger without threshold".to_string());
                };
                match disks.iter().find(|d| d.used_percent() > threshold) {
                    Some(disk) => (
                        true,
                        format!(
                            "{} at {:.1}% exceeds {:.1}% threshold",
                            disk.name,
                            disk.used_percent(),
                            threshold
                        ),
                    ),
                    None => (
                        false,
                        format!("no disk above {:.1}% threshold", threshold),
                    ),
                }
            }
        }
    }
}

impl Default for ConditionalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-level gate consulted before any scheduled launch: the system must
/// report safe, and when a maintenance window is configured the launch must
/// fall inside it. Returns the decision and the blocking reasons.
pub fn launch_permitted(
    probe: &dyn SystemProbe,
    window_configured: bool,
    now: NaiveDateTime,
) -> (bool, Vec<String>) {
    let (safe, mut reasons) = probe.is_safe_to_run();
    if !safe && reasons.is_empty() {
        reasons.push("system reports unsafe to rebalance".to_string());
    }
    if window_configured && !probe.in_maintenance_window(now) {
        reasons.push("outside the maintenance window".to_string());
    }
    (reasons.is_empty() && safe, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MaintenanceWindow, NullProbe};
    use crate::scheduler::templates;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    struct FixedUsage(ResourceUsage);

    impl UsageProvider for FixedUsage {
        fn current_usage(&mut self) -> ResourceUsage {
            self.0
        }
    }

    fn disk(name: &str, size: u64, used: u64) -> Disk {
        Disk::new(name, PathBuf::from(format!("/mnt/{}", name)), size, used)
    }

    #[test]
    fn test_time_trigger_always_permitted() {
        let schedule = templates::nightly_light(2).unwrap();
        let mut scheduler = ConditionalScheduler::new();
        let mut usage = FixedUsage(ResourceUsage {
            cpu_percent: 99.0,
            memory_percent: 99.0,
            disk_io_bps: 1e9,
        });
        let (ok, _) = scheduler.should_execute(&schedule, &mut usage, &[]);
        assert!(ok);
    }

    #[test]
    fn test_resource_trigger_thresholds() {
        let schedule = templates::parity_safe().unwrap();
        let mut scheduler = ConditionalScheduler::new();

        let mut low = FixedUsage(ResourceUsage {
            cpu_percent: 5.0,
            memory_percent: 20.0,
            disk_io_bps: 100.0,
        });
        let (ok, _) = scheduler.should_execute(&schedule, &mut low, &[]);
        assert!(ok);

        let mut high = FixedUsage(ResourceUsage {
            cpu_percent: 95.0,
            memory_percent: 20.0,
            disk_io_bps: 100.0,
        });
        let (ok, reason) = scheduler.should_execute(&schedule, &mut high, &[]);
        assert!(!ok);
        assert!(reason.contains("resource usage too high"));
    }

    #[test]
    fn test_idle_trigger_requires_streak() {
        let schedule = templates::idle_based().unwrap();
        let mut scheduler = ConditionalScheduler::new();
        let mut idle = FixedUsage(ResourceUsage {
            cpu_percent: 1.0,
            memory_percent: 10.0,
            disk_io_bps: 0.0,
        });

        // First observation starts the streak; the required minutes have
        // not elapsed yet.
        let (ok, reason) = scheduler.should_execute(&schedule, &mut idle, &[]);
        assert!(!ok);
        assert!(reason.contains("idle for"));

        // A busy reading resets the streak
        let mut busy = FixedUsage(ResourceUsage {
            cpu_percent: 80.0,
            memory_percent: 10.0,
            disk_io_bps: 0.0,
        });
        let (ok, _) = scheduler.should_execute(&schedule, &mut busy, &[]);
        assert!(!ok);
        assert!(scheduler.idle_since.is_none());
    }

    #[test]
    fn test_launch_gate_honors_maintenance_window() {
        let probe = NullProbe {
            window: Some(MaintenanceWindow {
                start_hour: 1,
                end_hour: 5,
                days: Vec::new(),
            }),
        };
        let inside = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        let outside = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        let (ok, reasons) = launch_permitted(&probe, true, inside);
        assert!(ok, "{:?}", reasons);
        let (ok, reasons) = launch_permitted(&probe, true, outside);
        assert!(!ok);
        assert!(reasons[0].contains("maintenance window"));

        // No window configured: any time is fine
        let (ok, _) = launch_permitted(&NullProbe::default(), false, outside);
        assert!(ok);
    }

    #[test]
    fn test_disk_usage_trigger() {
        let schedule = templates::disk_usage_threshold(90.0).unwrap();
        let mut scheduler = ConditionalScheduler::new();
        let mut usage = FixedUsage(ResourceUsage::default());

        let calm = vec![disk("disk1", 1000, 500)];
        let (ok, _) = scheduler.should_execute(&schedule, &mut usage, &calm);
        assert!(!ok);

        let full = vec![disk("disk1", 1000, 950)];
        let (ok, reason) = scheduler.should_execute(&schedule, &mut usage, &full);
        assert!(ok);
        assert!(reason.contains("disk1"));
    }
}
