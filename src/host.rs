/*!
 * Host-integration probes
 *
 * Capability contracts the scheduler consults before launching a rebalance:
 * safety signals (array state, parity activity, disk health), maintenance
 * windows, and the host notification channel. Platform-specific
 * implementations live outside this crate.
 */

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Normal,
    Warning,
    Alert,
    Critical,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Normal => "normal",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Alert => "alert",
            NotificationLevel::Critical => "critical",
        }
    }
}

/// "Is it safe to rebalance now?" and the notification channel.
pub trait SystemProbe: Send + Sync {
    /// Whether a rebalance may start, with the blocking reasons when not.
    fn is_safe_to_run(&self) -> (bool, Vec<String>);

    /// Whether `now` falls inside a configured maintenance window.
    fn in_maintenance_window(&self, now: NaiveDateTime) -> bool;

    /// Deliver a host notification. Returns delivery success.
    fn notify(&self, subject: &str, message: &str, level: NotificationLevel) -> bool;
}

/// Probe used when no host integration is configured: always safe, never
/// in a window, notifications go to the log.
#[derive(Debug, Default)]
pub struct NullProbe {
    pub window: Option<MaintenanceWindow>,
}

impl SystemProbe for NullProbe {
    fn is_safe_to_run(&self) -> (bool, Vec<String>) {
        (true, Vec::new())
    }

    fn in_maintenance_window(&self, now: NaiveDateTime) -> bool {
        self.window.as_ref().map(|w| w.contains(now)).unwrap_or(false)
    }

    fn notify(&self, subject: &str, message: &str, level: NotificationLevel) -> bool {
        info!(level = level.as_str(), subject, "{}", message);
        true
    }
}

/// A recurring window of hours on selected weekdays. Windows may wrap past
/// midnight (e.g. 22 to 6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Hour the window opens, 0-23
    pub start_hour: u32,
    /// Hour the window closes, 0-23; equal start and end means the whole day
    pub end_hour: u32,
    /// Active weekdays, 0 = Sunday .. 6 = Saturday; empty means every day
    #[serde(default)]
    pub days: Vec<u32>,
}

impl MaintenanceWindow {
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let day = now.weekday().num_days_from_sunday();
        // For wrapping windows the late-evening hours belong to the listed
        // day; early-morning hours belong to the day after it.
        let day_matches = |d: u32| self.days.is_empty() || self.days.contains(&d);
        let hour = now.hour();

        if self.start_hour == self.end_hour {
            return day_matches(day);
        }
        if self.start_hour < self.end_hour {
            day_matches(day) && hour >= self.start_hour && hour < self.end_hour
        } else {
            let previous_day = (day + 6) % 7;
            (day_matches(day) && hour >= self.start_hour)
                || (day_matches(previous_day) && hour < self.end_hour)
        }
    }
}
