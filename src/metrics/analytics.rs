/*!
 * Analytical queries over the metrics store
 *
 * Calendar-day trend rollups, per-disk and per-mode comparisons, and the
 * correlation between transfer rates and system samples.
 */

use std::collections::BTreeMap;

use rusqlite::params;

use crate::error::Result;
use crate::metrics::store::MetricsStore;
use crate::metrics::now_epoch;

/// One calendar day of transfer activity.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTransferTrend {
    /// Day in `YYYY-MM-DD` form
    pub day: String,
    pub operations: usize,
    pub transferred_bytes: u64,
    pub average_rate_bps: f64,
    pub success_rate: f64,
}

/// One calendar day of resource usage.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyResourceTrend {
    pub day: String,
    pub average_cpu_percent: f64,
    pub average_memory_percent: f64,
    pub average_read_bps: f64,
    pub average_write_bps: f64,
}

/// Rollup of one disk's involvement in transfers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiskPerformance {
    pub disk: String,
    pub transfers_out: usize,
    pub transfers_in: usize,
    pub bytes_moved: u64,
    pub average_rate_bps: f64,
    pub failures: usize,
}

/// Rollup of operations by rsync mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeComparison {
    pub mode: String,
    pub operations: usize,
    pub average_rate_mbps: f64,
    pub average_success_rate: f64,
    pub average_duration_seconds: f64,
}

/// One transfer paired with the system samples near its completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationPoint {
    pub unit_path: String,
    pub rate_bps: f64,
    pub average_cpu_percent: f64,
    pub average_memory_percent: f64,
}

/// Rate-vs-resource correlation for one operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CorrelationReport {
    pub points: Vec<CorrelationPoint>,
    pub cpu_rate_correlation: Option<f64>,
    pub memory_rate_correlation: Option<f64>,
}

/// Samples within this many seconds of a transfer are attributed to it.
const CORRELATION_WINDOW_SECS: f64 = 10.0;

/// Transfer activity per calendar day over the trailing window.
pub fn transfer_trends(store: &MetricsStore, days: u32) -> Result<Vec<DailyTransferTrend>> {
    let conn = store.connection()?;
    let cutoff = now_epoch() - days as f64 * 86_400.0;
    let mut stmt = conn.prepare(
        "SELECT date(start_time, 'unixepoch') AS day,
                COUNT(*),
                COALESCE(SUM(transferred_bytes), 0),
                COALESCE(AVG(average_transfer_rate_bps), 0.0),
                COALESCE(AVG(success_rate), 0.0)
         FROM operations
         WHERE start_time >= ?1
         GROUP BY day
         ORDER BY day",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(DailyTransferTrend {
            day: row.get(0)?,
            operations: row.get(1)?,
            transferred_bytes: row.get(2)?,
            average_rate_bps: row.get(3)?,
            success_rate: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Resource usage per calendar day over the trailing window.
pub fn resource_trends(store: &MetricsStore, days: u32) -> Result<Vec<DailyResourceTrend>> {
    let conn = store.connection()?;
    let cutoff = now_epoch() - days as f64 * 86_400.0;
    let mut stmt = conn.prepare(
        "SELECT date(timestamp, 'unixepoch') AS day,
                AVG(cpu_percent), AVG(memory_percent),
                AVG(disk_io_read_bps), AVG(disk_io_write_bps)
         FROM system_metrics
         WHERE timestamp >= ?1
         GROUP BY day
         ORDER BY day",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(DailyResourceTrend {
            day: row.get(0)?,
            average_cpu_percent: row.get(1)?,
            average_memory_percent: row.get(2)?,
            average_read_bps: row.get(3)?,
            average_write_bps: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Per-disk transfer rollups over the trailing window.
pub fn disk_performance(store: &MetricsStore, days: u32) -> Result<Vec<DiskPerformance>> {
    let conn = store.connection()?;
    let cutoff = now_epoch() - days as f64 * 86_400.0;
    let mut by_disk: BTreeMap<String, DiskPerformance> = BTreeMap::new();

    {
        let mut stmt = conn.prepare(
            "SELECT src_disk, COUNT(*), COALESCE(SUM(size_bytes), 0),
                    COALESCE(AVG(transfer_rate_bps), 0.0),
                    SUM(CASE WHEN end_time IS NOT NULL AND success = 0 THEN 1 ELSE 0 END)
             FROM transfers WHERE start_time >= ?1 GROUP BY src_disk",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, usize>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, usize>(4)?,
            ))
        })?;
        for row in rows {
            let (disk, count, bytes, rate, failures) = row?;
            let entry = by_disk.entry(disk.clone()).or_insert_with(|| DiskPerformance {
                disk,
                ..Default::default()
            });
            entry.transfers_out = count;
            entry.bytes_moved += bytes;
            entry.average_rate_bps = rate;
            entry.failures += failures;
        }
    }

    {
        let mut stmt = conn.prepare(
            "SELECT dest_disk, COUNT(*) FROM transfers WHERE start_time >= ?1 GROUP BY dest_disk",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;
        for row in rows {
            let (disk, count) = row?;
            let entry = by_disk.entry(disk.clone()).or_insert_with(|| DiskPerformance {
                disk,
                ..Default::default()
            });
            entry.transfers_in = count;
        }
    }

    Ok(by_disk.into_values().collect())
}

/// Operation rollups by rsync mode over the trailing window.
pub fn mode_comparison(store: &MetricsStore, days: u32) -> Result<Vec<ModeComparison>> {
    let conn = store.connection()?;
    let cutoff = now_epoch() - days as f64 * 86_400.0;
    let mut stmt = conn.prepare(
        "SELECT rsync_mode, COUNT(*),
                COALESCE(AVG(overall_transfer_rate_mbps), 0.0),
                COALESCE(AVG(success_rate), 0.0),
                COALESCE(AVG(duration_seconds), 0.0)
         FROM operations
         WHERE start_time >= ?1
         GROUP BY rsync_mode
         ORDER BY rsync_mode",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(ModeComparison {
            mode: row.get(0)?,
            operations: row.get(1)?,
            average_rate_mbps: row.get(2)?,
            average_success_rate: row.get(3)?,
            average_duration_seconds: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Pair each completed transfer of an operation with the system samples
/// taken within ten seconds of it, and correlate rate against CPU and
/// memory usage.
pub fn operation_correlations(
    store: &MetricsStore,
    operation_id: &str,
) -> Result<CorrelationReport> {
    let transfers = store.get_transfers(operation_id)?;
    let samples = store.get_system_metrics(operation_id)?;

    let mut points = Vec::new();
    for transfer in &transfers {
        let (Some(end), Some(rate)) = (transfer.end_time, transfer.transfer_rate_bps) else {
            continue;
        };
        let nearby: Vec<_> = samples
            .iter()
            .filter(|s| {
                s.timestamp >= transfer.start_time - CORRELATION_WINDOW_SECS
                    && s.timestamp <= end + CORRELATION_WINDOW_SECS
            })
            .collect();
        if nearby.is_empty() {
            continue;
        }
        let n = nearby.len() as f64;
        points.push(CorrelationPoint {
            unit_path: transfer.unit_path.clone(),
            rate_bps: rate,
            average_cpu_percent: nearby.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            average_memory_percent: nearby.iter().map(|s| s.memory_percent).sum::<f64>() / n,
        });
    }

    let rates: Vec<f64> = points.iter().map(|p| p.rate_bps).collect();
    let cpus: Vec<f64> = points.iter().map(|p| p.average_cpu_percent).collect();
    let mems: Vec<f64> = points.iter().map(|p| p.average_memory_percent).collect();

    Ok(CorrelationReport {
        cpu_rate_correlation: pearson(&rates, &cpus),
        memory_rate_correlation: pearson(&rates, &mems),
        points,
    })
}

/// Pearson correlation coefficient; None for degenerate inputs.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{OperationMetrics, SystemSample, TransferMetrics};
    use tempfile::tempdir;

    fn seeded_store() -> (tempfile::TempDir, MetricsStore) {
        let dir = tempdir().unwrap();
        let store = MetricsStore::open(&dir.path().join("metrics.db")).unwrap();

        let mut op = OperationMetrics::new("op-1", "fast");
        op.total_files = 2;
        op.total_bytes = 300;
        op.transferred_bytes = 300;
        op.end_time = Some(op.start_time + 20.0);
        store.store_operation(&op).unwrap();

        let base = op.start_time;
        for (unit, rate, cpu) in [
            ("Movies/Alien", 100.0, 10.0),
            ("Movies/Blade", 300.0, 30.0),
            ("Movies/Dune", 500.0, 50.0),
        ] {
            store
                .store_transfer(&TransferMetrics {
                    operation_id: "op-1".to_string(),
                    unit_path: unit.to_string(),
                    src_disk: "disk1".to_string(),
                    dest_disk: "disk2".to_string(),
                    size_bytes: 100,
                    start_time: base,
                    end_time: Some(base + 5.0),
                    success: true,
                    error_message: None,
                    transfer_rate_bps: Some(rate),
                })
                .unwrap();
            store
                .store_system_metric(&SystemSample {
                    operation_id: "op-1".to_string(),
                    timestamp: base + 4.0 + cpu / 1000.0,
                    cpu_percent: cpu,
                    memory_percent: cpu * 2.0,
                    disk_read_bps: 0.0,
                    disk_write_bps: 0.0,
                    network_sent_bps: 0.0,
                    network_recv_bps: 0.0,
                })
                .unwrap();
        }

        (dir, store)
    }

    #[test]
    fn test_transfer_trends() {
        let (_dir, store) = seeded_store();
        let trends = transfer_trends(&store, 7).unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].operations, 1);
        assert_eq!(trends[0].transferred_bytes, 300);
    }

    #[test]
    fn test_resource_trends() {
        let (_dir, store) = seeded_store();
        let trends = resource_trends(&store, 7).unwrap();
        assert_eq!(trends.len(), 1);
        assert!((trends[0].average_cpu_percent - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_disk_performance() {
        let (_dir, store) = seeded_store();
        let perf = disk_performance(&store, 7).unwrap();
        let d1 = perf.iter().find(|p| p.disk == "disk1").unwrap();
        let d2 = perf.iter().find(|p| p.disk == "disk2").unwrap();
        assert_eq!(d1.transfers_out, 3);
        assert_eq!(d1.bytes_moved, 300);
        assert_eq!(d2.transfers_in, 3);
        assert_eq!(d1.failures, 0);
    }

    #[test]
    fn test_mode_comparison() {
        let (_dir, store) = seeded_store();
        let modes = mode_comparison(&store, 7).unwrap();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].mode, "fast");
        assert_eq!(modes[0].operations, 1);
    }

    #[test]
    fn test_operation_correlations() {
        let (_dir, store) = seeded_store();
        let report = operation_correlations(&store, "op-1").unwrap();
        // Every sample falls inside every transfer's window here, so each
        // point averages all three samples to the same value and the
        // correlation degenerates to None.
        assert_eq!(report.points.len(), 3);
        assert_eq!(report.cpu_rate_correlation, None);
        for p in &report.points {
            assert!((p.average_cpu_percent - 30.0).abs() < 0.1);
        }
    }

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0];
        let up = [2.0, 4.0, 6.0];
        let down = [6.0, 4.0, 2.0];
        assert!((pearson(&xs, &up).unwrap() - 1.0).abs() < 1e-9);
        assert!((pearson(&xs, &down).unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(pearson(&xs, &[1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
    }
}
