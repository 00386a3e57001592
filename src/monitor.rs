/*!
 * Performance monitoring and ETA estimation
 *
 * A background sampler reads host CPU, memory, disk-I/O, and network usage
 * on a cadence and binds each sample to the running operation. ETA starts
 * from the drive performance model and switches to a recency-weighted
 * moving average of observed transfer rates as history accumulates.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use crate::metrics::{now_epoch, MetricsStore, OperationMetrics, SystemSample, TransferMetrics};
use crate::perf::{conservative_write_rate_mbps, DriveClass};

/// Completed-transfer rates kept for the weighted ETA.
const RATE_HISTORY_LEN: usize = 10;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Initial ETA from the plan's total bytes and a conservative model rate.
/// Falls back to the default drive class when none is supplied.
pub fn initial_eta(total_bytes: u64, drive_class: Option<DriveClass>) -> Duration {
    let rate_mbps = conservative_write_rate_mbps(drive_class.unwrap_or(DriveClass::Default));
    let rate_bps = rate_mbps * 1024.0 * 1024.0;
    if rate_bps <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total_bytes as f64 / rate_bps)
}

/// Recency-weighted moving average: the i-th oldest of n rates carries
/// weight i+1, so a recent fast transfer always outweighs an older one.
pub fn weighted_average_rate(rates: &VecDeque<f64>) -> Option<f64> {
    if rates.is_empty() {
        return None;
    }
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, rate) in rates.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += rate * weight;
        weight_total += weight;
    }
    Some(weighted_sum / weight_total)
}

struct MonitorShared {
    metrics: Mutex<OperationMetrics>,
    recent_rates: Mutex<VecDeque<f64>>,
}

/// Samples host resources for one operation and keeps its live metrics.
pub struct PerformanceMonitor {
    operation_id: String,
    interval: Duration,
    store: Option<Arc<MetricsStore>>,
    shared: Arc<MonitorShared>,
    stop_tx: Option<Sender<()>>,
    sampler: Option<JoinHandle<()>>,
}

impl PerformanceMonitor {
    pub fn new(operation_id: &str, rsync_mode: &str, store: Option<Arc<MetricsStore>>) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            interval: DEFAULT_SAMPLE_INTERVAL,
            store,
            shared: Arc::new(MonitorShared {
                metrics: Mutex::new(OperationMetrics::new(operation_id, rsync_mode)),
                recent_rates: Mutex::new(VecDeque::with_capacity(RATE_HISTORY_LEN)),
            }),
            stop_tx: None,
            sampler: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Seed the operation totals from the plan.
    pub fn set_totals(&self, total_files: u64, total_bytes: u64) {
        let mut metrics = self.shared.metrics.lock().expect("monitor lock");
        metrics.total_files = total_files;
        metrics.total_bytes = total_bytes;
        if let Some(ref store) = self.store {
            if let Err(err) = store.store_operation(&metrics) {
                warn!("failed to persist operation start: {}", err);
            }
        }
    }

    /// Spawn the background sampler.
    pub fn start(&mut self) {
        if self.sampler.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        let store = self.store.clone();
        let operation_id = self.operation_id.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("ballast-sampler".to_string())
            .spawn(move || {
                let mut sys = System::new();
                let mut disks = Disks::new_with_refreshed_list();
                let mut networks = Networks::new_with_refreshed_list();
                let secs = interval.as_secs_f64().max(0.001);

                loop {
                    // recv_timeout doubles as the sampling sleep and wakes
                    // immediately on stop
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    }

                    sys.refresh_cpu_usage();
                    sys.refresh_memory();
                    disks.refresh(true);
                    networks.refresh(true);

                    let memory_percent = if sys.total_memory() > 0 {
                        sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
                    } else {
                        0.0
                    };
                    let (mut read_delta, mut write_delta) = (0u64, 0u64);
                    for disk in disks.list() {
                        let usage = disk.usage();
                        read_delta = read_delta.saturating_add(usage.read_bytes);
                        write_delta = write_delta.saturating_add(usage.written_bytes);
                    }
                    let (mut sent_delta, mut recv_delta) = (0u64, 0u64);
                    for (_name, data) in networks.iter() {
                        sent_delta = sent_delta.saturating_add(data.transmitted());
                        recv_delta = recv_delta.saturating_add(data.received());
                    }

                    let sample = SystemSample {
                        operation_id: operation_id.clone(),
                        timestamp: now_epoch(),
                        cpu_percent: sys.global_cpu_usage() as f64,
                        memory_percent,
                        disk_read_bps: read_delta as f64 / secs,
                        disk_write_bps: write_delta as f64 / secs,
                        network_sent_bps: sent_delta as f64 / secs,
                        network_recv_bps: recv_delta as f64 / secs,
                    };

                    shared
                        .metrics
                        .lock()
                        .expect("monitor lock")
                        .system_samples
                        .push(sample.clone());
                    if let Some(ref store) = store {
                        if let Err(err) = store.store_system_metric(&sample) {
                            debug!("failed to persist system sample: {}", err);
                        }
                    }
                }
            })
            .expect("spawn sampler thread");

        self.stop_tx = Some(stop_tx);
        self.sampler = Some(handle);
    }

    /// Stop the sampler, join it, and close the operation's end time.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.sampler.take() {
            let _ = handle.join();
        }

        let mut metrics = self.shared.metrics.lock().expect("monitor lock");
        metrics.end_time = Some(now_epoch());
        if let Some(ref store) = self.store {
            if let Err(err) = store.update_operation(&metrics) {
                warn!("failed to persist operation end: {}", err);
            }
        }
    }

    /// Begin per-transfer accounting for one unit.
    pub fn start_transfer(&self, unit_path: &str) {
        debug!(operation = %self.operation_id, unit = unit_path, "transfer started");
    }

    /// Close per-transfer accounting, updating counters and rate history.
    pub fn complete_transfer(
        &self,
        unit_path: &str,
        src_disk: &str,
        dest_disk: &str,
        size_bytes: u64,
        started_at: f64,
        success: bool,
        error: Option<String>,
    ) {
        let end = now_epoch();
        let duration = (end - started_at).max(0.0);
        let rate_bps = if success && duration > 0.0 {
            Some(size_bytes as f64 / duration)
        } else {
            None
        };

        let transfer = TransferMetrics {
            operation_id: self.operation_id.clone(),
            unit_path: unit_path.to_string(),
            src_disk: src_disk.to_string(),
            dest_disk: dest_disk.to_string(),
            size_bytes,
            start_time: started_at,
            end_time: Some(end),
            success,
            error_message: error,
            transfer_rate_bps: rate_bps,
        };

        {
            let mut metrics = self.shared.metrics.lock().expect("monitor lock");
            if success {
                metrics.record_completed(size_bytes, rate_bps);
            } else {
                metrics.record_failed();
                if let Some(ref message) = transfer.error_message {
                    metrics.errors.push(message.clone());
                }
            }
            metrics.transfers.push(transfer);
        }

        if let Some(rate) = rate_bps {
            let mut rates = self.shared.recent_rates.lock().expect("monitor lock");
            if rates.len() == RATE_HISTORY_LEN {
                rates.pop_front();
            }
            rates.push_back(rate);
        }
    }

    /// Real-time ETA for the remaining bytes, or None without history.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        if remaining_bytes == 0 {
            return None;
        }
        let rates = self.shared.recent_rates.lock().expect("monitor lock");
        let rate = weighted_average_rate(&rates)?;
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    /// Snapshot of the operation metrics.
    pub fn snapshot(&self) -> OperationMetrics {
        self.shared.metrics.lock().expect("monitor lock").clone()
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.sampler.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_eta_uses_conservative_rate() {
        // 95.2 MB/s conservative for 7200 rpm: 952 MiB should take ~10s
        let eta = initial_eta(952 * 1024 * 1024, Some(DriveClass::Sata7200));
        assert!((eta.as_secs_f64() - 10.0).abs() < 0.1);

        // No model: the default conservative floor applies
        let eta = initial_eta(66 * 1024 * 1024, None);
        assert!((eta.as_secs_f64() - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_weighted_average_prefers_recent() {
        let mut rates = VecDeque::new();
        rates.push_back(100.0); // oldest
        rates.push_back(100.0);
        rates.push_back(400.0); // newest

        let weighted = weighted_average_rate(&rates).unwrap();
        let plain = (100.0 + 100.0 + 400.0) / 3.0;
        assert!(weighted > plain);

        // Recency monotonicity: moving the fast rate later raises the average
        let mut earlier = VecDeque::new();
        earlier.push_back(400.0);
        earlier.push_back(100.0);
        earlier.push_back(100.0);
        assert!(weighted > weighted_average_rate(&earlier).unwrap());
    }

    #[test]
    fn test_weighted_average_empty() {
        assert_eq!(weighted_average_rate(&VecDeque::new()), None);
    }

    #[test]
    fn test_eta_without_history_or_remaining() {
        let monitor = PerformanceMonitor::new("op-1", "fast", None);
        assert_eq!(monitor.eta(1000), None);

        monitor.set_totals(1, 1000);
        monitor.complete_transfer(
            "Movies/Alien",
            "disk1",
            "disk2",
            1000,
            now_epoch() - 2.0,
            true,
            None,
        );
        assert_eq!(monitor.eta(0), None);
        assert!(monitor.eta(1000).is_some());
    }

    #[test]
    fn test_transfer_accounting() {
        let monitor = PerformanceMonitor::new("op-1", "fast", None);
        monitor.set_totals(2, 300);

        monitor.start_transfer("Movies/Alien");
        monitor.complete_transfer(
            "Movies/Alien",
            "disk1",
            "disk2",
            200,
            now_epoch() - 1.0,
            true,
            None,
        );
        monitor.complete_transfer(
            "Movies/Blade",
            "disk1",
            "disk2",
            100,
            now_epoch() - 1.0,
            false,
            Some("rsync exit 23".to_string()),
        );

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.completed_files, 1);
        assert_eq!(snapshot.failed_files, 1);
        assert_eq!(snapshot.transfers.len(), 2);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.completed_files + snapshot.failed_files <= snapshot.total_files);
    }

    #[test]
    fn test_sampler_start_stop_joins() {
        let mut monitor = PerformanceMonitor::new("op-1", "fast", None)
            .with_interval(Duration::from_millis(10));
        monitor.set_totals(0, 0);
        monitor.start();
        std::thread::sleep(Duration::from_millis(50));
        monitor.stop();

        let snapshot = monitor.snapshot();
        assert!(snapshot.end_time.is_some());
        // Samples are timestamp-monotonic
        let times: Vec<f64> = snapshot.system_samples.iter().map(|s| s.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}
