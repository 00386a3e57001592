//! Metrics store integration: persistence round trips, retention cascade,
//! and analytics over a seeded history.

use std::path::Path;

use ballast::metrics::analytics::{
    disk_performance, mode_comparison, operation_correlations, transfer_trends,
};
use ballast::metrics::store::RetentionPolicy;
use ballast::metrics::{now_epoch, MetricsStore, OperationMetrics, SystemSample, TransferMetrics};

fn open(path: &Path) -> MetricsStore {
    MetricsStore::open(&path.join("metrics.db")).unwrap()
}

fn operation(id: &str, mode: &str, start: f64) -> OperationMetrics {
    let mut op = OperationMetrics::new(id, mode);
    op.start_time = start;
    op.total_files = 2;
    op.total_bytes = 2 * 1024 * 1024;
    op
}

fn transfer(op: &str, unit: &str, start: f64, rate: Option<f64>) -> TransferMetrics {
    TransferMetrics {
        operation_id: op.to_string(),
        unit_path: unit.to_string(),
        src_disk: "disk1".to_string(),
        dest_disk: "disk2".to_string(),
        size_bytes: 1024 * 1024,
        start_time: start,
        end_time: rate.map(|_| start + 4.0),
        success: rate.is_some(),
        error_message: None,
        transfer_rate_bps: rate,
    }
}

fn sample(op: &str, at: f64, cpu: f64) -> SystemSample {
    SystemSample {
        operation_id: op.to_string(),
        timestamp: at,
        cpu_percent: cpu,
        memory_percent: cpu / 2.0,
        disk_read_bps: 1000.0,
        disk_write_bps: 2000.0,
        network_sent_bps: 0.0,
        network_recv_bps: 0.0,
    }
}

#[test]
fn test_operation_row_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let mut op = operation("op-1", "integrity", now_epoch());
    op.completed_files = 2;
    op.transferred_bytes = 2 * 1024 * 1024;
    op.average_transfer_rate_bps = 512.0;
    op.peak_transfer_rate_bps = 1024.0;
    op.end_time = Some(op.start_time + 8.0);
    store.store_operation(&op).unwrap();

    let loaded = store.get_operation("op-1").unwrap().unwrap();
    assert_eq!(loaded.operation_id, op.operation_id);
    assert_eq!(loaded.start_time, op.start_time);
    assert_eq!(loaded.end_time, op.end_time);
    assert_eq!(loaded.total_files, op.total_files);
    assert_eq!(loaded.completed_files, op.completed_files);
    assert_eq!(loaded.failed_files, op.failed_files);
    assert_eq!(loaded.total_bytes, op.total_bytes);
    assert_eq!(loaded.transferred_bytes, op.transferred_bytes);
    assert_eq!(loaded.average_transfer_rate_bps, op.average_transfer_rate_bps);
    assert_eq!(loaded.peak_transfer_rate_bps, op.peak_transfer_rate_bps);
    assert_eq!(loaded.rsync_mode, op.rsync_mode);
}

#[test]
fn test_retention_removes_old_operations_and_children() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let now = now_epoch();

    let old_start = now - 45.0 * 86_400.0;
    store
        .store_operation(&operation("old", "fast", old_start))
        .unwrap();
    store
        .store_transfer(&transfer("old", "Movies/Old", old_start, Some(100.0)))
        .unwrap();
    store
        .store_system_metric(&sample("old", old_start, 10.0))
        .unwrap();
    store
        .store_error("old", "ancient failure", Some("copy_tool"), Some(old_start))
        .unwrap();

    store.store_operation(&operation("new", "fast", now)).unwrap();

    let outcome = store
        .apply_retention(&RetentionPolicy {
            operations_days: 30,
            system_metrics_days: 30,
            errors_days: 30,
        })
        .unwrap();

    assert_eq!(outcome.operations_deleted, 1);
    assert!(store.get_operation("old").unwrap().is_none());
    assert!(store.get_transfers("old").unwrap().is_empty());
    assert!(store.get_system_metrics("old").unwrap().is_empty());
    assert!(store.get_operation_errors("old").unwrap().is_empty());
    assert!(store.get_operation("new").unwrap().is_some());
}

#[test]
fn test_analytics_over_seeded_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let now = now_epoch();

    let mut fast = operation("fast-op", "fast", now - 3600.0);
    fast.transferred_bytes = 1024 * 1024;
    fast.end_time = Some(fast.start_time + 100.0);
    store.store_operation(&fast).unwrap();

    let mut integrity = operation("integrity-op", "integrity", now - 1800.0);
    integrity.transferred_bytes = 2 * 1024 * 1024;
    integrity.end_time = Some(integrity.start_time + 400.0);
    store.store_operation(&integrity).unwrap();

    store
        .store_transfer(&transfer("fast-op", "Movies/A", now - 3500.0, Some(250.0)))
        .unwrap();
    store
        .store_transfer(&transfer("fast-op", "Movies/B", now - 3400.0, None))
        .unwrap();

    let trends = transfer_trends(&store, 7).unwrap();
    assert!(!trends.is_empty());
    assert_eq!(trends.iter().map(|t| t.operations).sum::<usize>(), 2);

    let modes = mode_comparison(&store, 7).unwrap();
    let names: Vec<&str> = modes.iter().map(|m| m.mode.as_str()).collect();
    assert_eq!(names, vec!["fast", "integrity"]);

    let disks = disk_performance(&store, 7).unwrap();
    let d1 = disks.iter().find(|d| d.disk == "disk1").unwrap();
    assert_eq!(d1.transfers_out, 2);
}

#[test]
fn test_correlation_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let base = now_epoch() - 1000.0;

    store.store_operation(&operation("op", "fast", base)).unwrap();
    store
        .store_transfer(&transfer("op", "Movies/A", base, Some(100.0)))
        .unwrap();
    // Inside the 10-second window around the transfer
    store.store_system_metric(&sample("op", base + 2.0, 40.0)).unwrap();
    // Far outside the window
    store
        .store_system_metric(&sample("op", base + 600.0, 90.0))
        .unwrap();

    let report = operation_correlations(&store, "op").unwrap();
    assert_eq!(report.points.len(), 1);
    assert!((report.points[0].average_cpu_percent - 40.0).abs() < 1e-9);
}

#[test]
fn test_backup_is_point_in_time() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    store
        .store_operation(&operation("op-1", "fast", now_epoch()))
        .unwrap();

    let backup_path = dir.path().join("snapshot.db");
    store.backup(&backup_path).unwrap();

    // Writes after the snapshot do not appear in it
    store
        .store_operation(&operation("op-2", "fast", now_epoch()))
        .unwrap();

    let snapshot = MetricsStore::open(&backup_path).unwrap();
    assert!(snapshot.get_operation("op-1").unwrap().is_some());
    assert!(snapshot.get_operation("op-2").unwrap().is_none());
}
