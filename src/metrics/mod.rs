/*!
 * Operation, transfer, and system metrics
 *
 * Value records collected during a rebalance operation and persisted in the
 * metrics store.
 */

pub mod analytics;
pub mod store;

pub use analytics::{
    CorrelationReport, DailyResourceTrend, DailyTransferTrend, DiskPerformance, ModeComparison,
};
pub use store::{DatabaseStats, IntegrityReport, MetricsStore, RetentionOutcome, RetentionPolicy};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as fractional epoch seconds.
pub fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// One host resource sample, bound to an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub operation_id: String,
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_read_bps: f64,
    pub disk_write_bps: f64,
    pub network_sent_bps: f64,
    pub network_recv_bps: f64,
}

/// Per-unit transfer metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetrics {
    pub operation_id: String,
    pub unit_path: String,
    pub src_disk: String,
    pub dest_disk: String,
    pub size_bytes: u64,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub transfer_rate_bps: Option<f64>,
}

impl TransferMetrics {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time.map(|end| (end - self.start_time).max(0.0))
    }

    pub fn rate_mbps(&self) -> Option<f64> {
        self.transfer_rate_bps
            .map(|bps| bps / (1024.0 * 1024.0))
    }
}

/// Aggregate metrics for one rebalance operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation_id: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub average_transfer_rate_bps: f64,
    pub peak_transfer_rate_bps: f64,
    pub rsync_mode: String,
    #[serde(default)]
    pub transfers: Vec<TransferMetrics>,
    #[serde(default)]
    pub system_samples: Vec<SystemSample>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl OperationMetrics {
    pub fn new(operation_id: &str, rsync_mode: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            start_time: now_epoch(),
            end_time: None,
            total_files: 0,
            completed_files: 0,
            failed_files: 0,
            total_bytes: 0,
            transferred_bytes: 0,
            average_transfer_rate_bps: 0.0,
            peak_transfer_rate_bps: 0.0,
            rsync_mode: rsync_mode.to_string(),
            transfers: Vec::new(),
            system_samples: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time.map(|end| (end - self.start_time).max(0.0))
    }

    /// Completed fraction of attempted units, in [0, 1].
    pub fn success_rate(&self) -> f64 {
        let attempted = self.completed_files + self.failed_files;
        if attempted == 0 {
            return 0.0;
        }
        self.completed_files as f64 / attempted as f64
    }

    pub fn overall_rate_mbps(&self) -> Option<f64> {
        let duration = self.duration_seconds()?;
        if duration <= 0.0 {
            return None;
        }
        Some(self.transferred_bytes as f64 / duration / (1024.0 * 1024.0))
    }

    /// Record one completed unit. Counters never exceed `total_files`.
    pub fn record_completed(&mut self, bytes: u64, rate_bps: Option<f64>) {
        if self.completed_files + self.failed_files < self.total_files {
            self.completed_files += 1;
        }
        self.transferred_bytes = self.transferred_bytes.saturating_add(bytes);
        if self.total_bytes > 0 {
            self.transferred_bytes = self.transferred_bytes.min(self.total_bytes);
        }
        if let Some(rate) = rate_bps {
            if rate > self.peak_transfer_rate_bps {
                self.peak_transfer_rate_bps = rate;
            }
            let completed = self.completed_files.max(1) as f64;
            self.average_transfer_rate_bps +=
                (rate - self.average_transfer_rate_bps) / completed;
        }
    }

    /// Record one failed unit.
    pub fn record_failed(&mut self) {
        if self.completed_files + self.failed_files < self.total_files {
            self.failed_files += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_never_exceed_total() {
        let mut op = OperationMetrics::new("op-1", "fast");
        op.total_files = 2;
        op.total_bytes = 100;
        op.record_completed(50, Some(10.0));
        op.record_completed(50, Some(20.0));
        op.record_failed();
        op.record_failed();

        assert!(op.completed_files + op.failed_files <= op.total_files);
        assert_eq!(op.completed_files, 2);
        assert_eq!(op.failed_files, 0);
    }

    #[test]
    fn test_success_rate() {
        let mut op = OperationMetrics::new("op-1", "fast");
        op.total_files = 4;
        op.total_bytes = 400;
        op.record_completed(100, None);
        op.record_completed(100, None);
        op.record_completed(100, None);
        op.record_failed();
        assert!((op.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_peak_rate_tracking() {
        let mut op = OperationMetrics::new("op-1", "fast");
        op.total_files = 3;
        op.total_bytes = 300;
        op.record_completed(100, Some(10.0));
        op.record_completed(100, Some(50.0));
        op.record_completed(100, Some(30.0));
        assert_eq!(op.peak_transfer_rate_bps, 50.0);
        assert!(op.average_transfer_rate_bps > 10.0);
    }

    #[test]
    fn test_transfer_duration_and_rate() {
        let t = TransferMetrics {
            operation_id: "op-1".to_string(),
            unit_path: "Movies/Alien".to_string(),
            src_disk: "disk1".to_string(),
            dest_disk: "disk2".to_string(),
            size_bytes: 1024 * 1024,
            start_time: 100.0,
            end_time: Some(110.0),
            success: true,
            error_message: None,
            transfer_rate_bps: Some(2.0 * 1024.0 * 1024.0),
        };
        assert_eq!(t.duration_seconds(), Some(10.0));
        assert_eq!(t.rate_mbps(), Some(2.0));
    }
}
