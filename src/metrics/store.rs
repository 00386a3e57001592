/*!
 * SQLite-backed metrics store
 *
 * Four tables (operations, transfers, system_metrics, operation_errors)
 * plus a schema_version table with forward-only migrations. Writes are
 * single-row and atomic; connections come from a small pool and are
 * returned on every exit path via a scoped guard.
 */

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{BallastError, Result};
use crate::metrics::{now_epoch, OperationMetrics, SystemSample, TransferMetrics};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Operations table - stores high-level operation information
CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT UNIQUE NOT NULL,
    start_time REAL NOT NULL,
    end_time REAL,
    total_files INTEGER DEFAULT 0,
    completed_files INTEGER DEFAULT 0,
    failed_files INTEGER DEFAULT 0,
    total_bytes INTEGER DEFAULT 0,
    transferred_bytes INTEGER DEFAULT 0,
    average_transfer_rate_bps REAL DEFAULT 0.0,
    peak_transfer_rate_bps REAL DEFAULT 0.0,
    rsync_mode TEXT DEFAULT 'fast',
    success_rate REAL DEFAULT 0.0,
    duration_seconds REAL,
    overall_transfer_rate_mbps REAL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Transfers table - stores individual unit transfer metrics
CREATE TABLE IF NOT EXISTS transfers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT NOT NULL,
    unit_path TEXT NOT NULL,
    src_disk TEXT NOT NULL,
    dest_disk TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    start_time REAL NOT NULL,
    end_time REAL,
    success BOOLEAN DEFAULT 0,
    error_message TEXT,
    transfer_rate_bps REAL,
    transfer_rate_mbps REAL,
    duration_seconds REAL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (operation_id) REFERENCES operations(operation_id) ON DELETE CASCADE
);

-- System metrics table - stores system resource usage over time
CREATE TABLE IF NOT EXISTS system_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT NOT NULL,
    timestamp REAL NOT NULL,
    cpu_percent REAL NOT NULL,
    memory_percent REAL NOT NULL,
    disk_io_read_bps REAL NOT NULL,
    disk_io_write_bps REAL NOT NULL,
    network_sent_bps REAL DEFAULT 0.0,
    network_recv_bps REAL DEFAULT 0.0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (operation_id) REFERENCES operations(operation_id) ON DELETE CASCADE
);

-- Operation errors table - stores detailed error information
CREATE TABLE IF NOT EXISTS operation_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation_id TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_type TEXT,
    timestamp REAL NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (operation_id) REFERENCES operations(operation_id) ON DELETE CASCADE
);

-- Performance indexes for efficient querying
CREATE INDEX IF NOT EXISTS idx_operations_start_time ON operations(start_time);
CREATE INDEX IF NOT EXISTS idx_operations_operation_id ON operations(operation_id);
CREATE INDEX IF NOT EXISTS idx_operations_rsync_mode ON operations(rsync_mode);

CREATE INDEX IF NOT EXISTS idx_transfers_operation_id ON transfers(operation_id);
CREATE INDEX IF NOT EXISTS idx_transfers_start_time ON transfers(start_time);
CREATE INDEX IF NOT EXISTS idx_transfers_src_disk ON transfers(src_disk);
CREATE INDEX IF NOT EXISTS idx_transfers_dest_disk ON transfers(dest_disk);
CREATE INDEX IF NOT EXISTS idx_transfers_success ON transfers(success);

CREATE INDEX IF NOT EXISTS idx_system_metrics_operation_id ON system_metrics(operation_id);
CREATE INDEX IF NOT EXISTS idx_system_metrics_timestamp ON system_metrics(timestamp);

CREATE INDEX IF NOT EXISTS idx_operation_errors_operation_id ON operation_errors(operation_id);
CREATE INDEX IF NOT EXISTS idx_operation_errors_timestamp ON operation_errors(timestamp);
"#;

/// A connection borrowed from the pool. Returned on drop, on every exit
/// path including failures.
pub struct PooledConnection {
    conn: Option<Connection>,
    returns: Sender<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Pool shutdown while borrowed just closes the connection.
            let _ = self.returns.send(conn);
        }
    }
}

struct ConnectionPool {
    idle: Receiver<Connection>,
    returns: Sender<Connection>,
}

impl ConnectionPool {
    fn new(path: &Path, size: usize) -> Result<Self> {
        let (returns, idle) = bounded(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            configure_connection(&conn)?;
            returns
                .send(conn)
                .map_err(|_| BallastError::Database("connection pool closed".into()))?;
        }
        Ok(Self { idle, returns })
    }

    fn acquire(&self) -> Result<PooledConnection> {
        let conn = self
            .idle
            .recv()
            .map_err(|_| BallastError::Database("connection pool closed".into()))?;
        Ok(PooledConnection {
            conn: Some(conn),
            returns: self.returns.clone(),
        })
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", -64000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Retention windows in days per table family.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub operations_days: u32,
    pub system_metrics_days: u32,
    pub errors_days: u32,
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub operations_deleted: usize,
    pub system_metrics_deleted: usize,
    pub errors_deleted: usize,
}

/// Integrity-check report.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub integrity_ok: bool,
    pub foreign_keys_ok: bool,
    pub schema_version_valid: bool,
    pub current_schema_version: i64,
    pub details: Vec<String>,
}

impl IntegrityReport {
    pub fn healthy(&self) -> bool {
        self.integrity_ok && self.foreign_keys_ok && self.schema_version_valid
    }
}

/// Size and row-count snapshot of the database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub file_size_bytes: u64,
    pub operations: usize,
    pub transfers: usize,
    pub system_metrics: usize,
    pub operation_errors: usize,
    pub schema_version: i64,
}

/// An error row for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    pub operation_id: String,
    pub error_message: String,
    pub error_type: Option<String>,
    pub timestamp: f64,
}

pub struct MetricsStore {
    path: PathBuf,
    pool: ConnectionPool,
}

impl MetricsStore {
    /// Open (creating if necessary) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_pool_size(path, 4)
    }

    pub fn open_with_pool_size(path: &Path, pool_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let pool = ConnectionPool::new(path, pool_size.max(1))?;
        let store = Self {
            path: path.to_path_buf(),
            pool,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute_batch(SCHEMA_SQL)?;

        let current = schema_version(&conn)?;
        if current < SCHEMA_VERSION {
            run_migrations(&conn, current)?;
        }
        Ok(())
    }

    // ----- writes -----

    pub fn store_operation(&self, op: &OperationMetrics) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO operations (
                operation_id, start_time, end_time, total_files, completed_files,
                failed_files, total_bytes, transferred_bytes, average_transfer_rate_bps,
                peak_transfer_rate_bps, rsync_mode, success_rate, duration_seconds,
                overall_transfer_rate_mbps
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(operation_id) DO UPDATE SET
                end_time = excluded.end_time,
                total_files = excluded.total_files,
                completed_files = excluded.completed_files,
                failed_files = excluded.failed_files,
                total_bytes = excluded.total_bytes,
                transferred_bytes = excluded.transferred_bytes,
                average_transfer_rate_bps = excluded.average_transfer_rate_bps,
                peak_transfer_rate_bps = excluded.peak_transfer_rate_bps,
                rsync_mode = excluded.rsync_mode,
                success_rate = excluded.success_rate,
                duration_seconds = excluded.duration_seconds,
                overall_transfer_rate_mbps = excluded.overall_transfer_rate_mbps,
                updated_at = CURRENT_TIMESTAMP",
            params![
                op.operation_id,
                op.start_time,
                op.end_time,
                op.total_files,
                op.completed_files,
                op.failed_files,
                op.total_bytes,
                op.transferred_bytes,
                op.average_transfer_rate_bps,
                op.peak_transfer_rate_bps,
                op.rsync_mode,
                op.success_rate(),
                op.duration_seconds(),
                op.overall_rate_mbps(),
            ],
        )?;
        Ok(())
    }

    pub fn update_operation(&self, op: &OperationMetrics) -> Result<()> {
        let conn = self.pool.acquire()?;
        let updated = conn.execute(
            "UPDATE operations SET
                end_time = ?2, total_files = ?3, completed_files = ?4, failed_files = ?5,
                total_bytes = ?6, transferred_bytes = ?7, average_transfer_rate_bps = ?8,
                peak_transfer_rate_bps = ?9, rsync_mode = ?10, success_rate = ?11,
                duration_seconds = ?12, overall_transfer_rate_mbps = ?13,
                updated_at = CURRENT_TIMESTAMP
             WHERE operation_id = ?1",
            params![
                op.operation_id,
                op.end_time,
                op.total_files,
                op.completed_files,
                op.failed_files,
                op.total_bytes,
                op.transferred_bytes,
                op.average_transfer_rate_bps,
                op.peak_transfer_rate_bps,
                op.rsync_mode,
                op.success_rate(),
                op.duration_seconds(),
                op.overall_rate_mbps(),
            ],
        )?;
        if updated == 0 {
            return Err(BallastError::Database(format!(
                "no such operation: {}",
                op.operation_id
            )));
        }
        Ok(())
    }

    pub fn store_transfer(&self, transfer: &TransferMetrics) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO transfers (
                operation_id, unit_path, src_disk, dest_disk, size_bytes, start_time,
                end_time, success, error_message, transfer_rate_bps, transfer_rate_mbps,
                duration_seconds
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                transfer.operation_id,
                transfer.unit_path,
                transfer.src_disk,
                transfer.dest_disk,
                transfer.size_bytes,
                transfer.start_time,
                transfer.end_time,
                transfer.success,
                transfer.error_message,
                transfer.transfer_rate_bps,
                transfer.rate_mbps(),
                transfer.duration_seconds(),
            ],
        )?;
        Ok(())
    }

    /// Update the most recent transfer row for `(operation_id, unit_path)`.
    pub fn update_transfer(
        &self,
        operation_id: &str,
        unit_path: &str,
        transfer: &TransferMetrics,
    ) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "UPDATE transfers SET
                end_time = ?3, success = ?4, error_message = ?5, transfer_rate_bps = ?6,
                transfer_rate_mbps = ?7, duration_seconds = ?8
             WHERE id = (
                SELECT id FROM transfers
                WHERE operation_id = ?1 AND unit_path = ?2
                ORDER BY start_time DESC LIMIT 1
             )",
            params![
                operation_id,
                unit_path,
                transfer.end_time,
                transfer.success,
                transfer.error_message,
                transfer.transfer_rate_bps,
                transfer.rate_mbps(),
                transfer.duration_seconds(),
            ],
        )?;
        Ok(())
    }

    pub fn store_system_metric(&self, sample: &SystemSample) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO system_metrics (
                operation_id, timestamp, cpu_percent, memory_percent,
                disk_io_read_bps, disk_io_write_bps, network_sent_bps, network_recv_bps
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sample.operation_id,
                sample.timestamp,
                sample.cpu_percent,
                sample.memory_percent,
                sample.disk_read_bps,
                sample.disk_write_bps,
                sample.network_sent_bps,
                sample.network_recv_bps,
            ],
        )?;
        Ok(())
    }

    pub fn store_error(
        &self,
        operation_id: &str,
        error_message: &str,
        error_type: Option<&str>,
        timestamp: Option<f64>,
    ) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO operation_errors (operation_id, error_message, error_type, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                operation_id,
                error_message,
                error_type,
                timestamp.unwrap_or_else(now_epoch),
            ],
        )?;
        Ok(())
    }

    // ----- reads -----

    pub fn get_operation(&self, operation_id: &str) -> Result<Option<OperationMetrics>> {
        let conn = self.pool.acquire()?;
        conn.query_row(
            "SELECT operation_id, start_time, end_time, total_files, completed_files,
                    failed_files, total_bytes, transferred_bytes, average_transfer_rate_bps,
                    peak_transfer_rate_bps, rsync_mode
             FROM operations WHERE operation_id = ?1",
            params![operation_id],
            operation_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Most recent operations first.
    pub fn get_operations(&self, limit: usize, offset: usize) -> Result<Vec<OperationMetrics>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT operation_id, start_time, end_time, total_files, completed_files,
                    failed_files, total_bytes, transferred_bytes, average_transfer_rate_bps,
                    peak_transfer_rate_bps, rsync_mode
             FROM operations ORDER BY start_time DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], operation_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_transfers(&self, operation_id: &str) -> Result<Vec<TransferMetrics>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT operation_id, unit_path, src_disk, dest_disk, size_bytes, start_time,
                    end_time, success, error_message, transfer_rate_bps
             FROM transfers WHERE operation_id = ?1 ORDER BY start_time",
        )?;
        let rows = stmt.query_map(params![operation_id], transfer_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Transfers with no recorded end time (in flight, or abandoned by a
    /// previous run).
    pub fn get_incomplete_transfers(&self, operation_id: &str) -> Result<Vec<TransferMetrics>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT operation_id, unit_path, src_disk, dest_disk, size_bytes, start_time,
                    end_time, success, error_message, transfer_rate_bps
             FROM transfers WHERE operation_id = ?1 AND end_time IS NULL ORDER BY start_time",
        )?;
        let rows = stmt.query_map(params![operation_id], transfer_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_system_metrics(&self, operation_id: &str) -> Result<Vec<SystemSample>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT operation_id, timestamp, cpu_percent, memory_percent, disk_io_read_bps,
                    disk_io_write_bps, network_sent_bps, network_recv_bps
             FROM system_metrics WHERE operation_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![operation_id], |row| {
            Ok(SystemSample {
                operation_id: row.get(0)?,
                timestamp: row.get(1)?,
                cpu_percent: row.get(2)?,
                memory_percent: row.get(3)?,
                disk_read_bps: row.get(4)?,
                disk_write_bps: row.get(5)?,
                network_sent_bps: row.get(6)?,
                network_recv_bps: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_operation_errors(&self, operation_id: &str) -> Result<Vec<OperationError>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT operation_id, error_message, error_type, timestamp
             FROM operation_errors WHERE operation_id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![operation_id], |row| {
            Ok(OperationError {
                operation_id: row.get(0)?,
                error_message: row.get(1)?,
                error_type: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ----- retention and maintenance -----

    /// Delete rows older than the per-table windows. Deleting an operation
    /// cascades to its transfers, samples, and errors.
    pub fn apply_retention(&self, policy: &RetentionPolicy) -> Result<RetentionOutcome> {
        let conn = self.pool.acquire()?;
        let now = now_epoch();
        let mut outcome = RetentionOutcome::default();

        let cutoff = now - policy.operations_days as f64 * 86_400.0;
        outcome.operations_deleted = conn.execute(
            "DELETE FROM operations WHERE start_time < ?1",
            params![cutoff],
        )?;

        let cutoff = now - policy.system_metrics_days as f64 * 86_400.0;
        outcome.system_metrics_deleted = conn.execute(
            "DELETE FROM system_metrics WHERE timestamp < ?1",
            params![cutoff],
        )?;

        let cutoff = now - policy.errors_days as f64 * 86_400.0;
        outcome.errors_deleted = conn.execute(
            "DELETE FROM operation_errors WHERE timestamp < ?1",
            params![cutoff],
        )?;

        info!(
            operations = outcome.operations_deleted,
            samples = outcome.system_metrics_deleted,
            errors = outcome.errors_deleted,
            "retention pass complete"
        );
        Ok(outcome)
    }

    /// Thin out system samples for operations older than `days_threshold`,
    /// keeping every `sample_rate`-th row. Returns the number of rows removed.
    pub fn compress_old_system_metrics(
        &self,
        days_threshold: u32,
        sample_rate: usize,
    ) -> Result<usize> {
        if sample_rate <= 1 {
            return Ok(0);
        }
        let conn = self.pool.acquire()?;
        let cutoff = now_epoch() - days_threshold as f64 * 86_400.0;

        let old_ops: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT operation_id FROM operations WHERE start_time < ?1")?;
            let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut removed = 0;
        for op in old_ops {
            let ids: Vec<i64> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM system_metrics WHERE operation_id = ?1 ORDER BY timestamp",
                )?;
                let rows = stmt.query_map(params![op], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            for (idx, id) in ids.iter().enumerate() {
                if idx % sample_rate != 0 {
                    removed += conn.execute("DELETE FROM system_metrics WHERE id = ?1", params![id])?;
                }
            }
        }
        debug!(removed, "compacted old system metrics");
        Ok(removed)
    }

    /// Reclaim space and refresh query-planner statistics.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }

    /// Run referential, schema-version, and generic integrity checks.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let conn = self.pool.acquire()?;
        let mut report = IntegrityReport::default();

        let check: String =
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        report.integrity_ok = check == "ok";
        if !report.integrity_ok {
            report.details.push(format!("integrity_check: {}", check));
        }

        let violations: usize = {
            let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
            let rows = stmt.query_map([], |_| Ok(()))?;
            rows.count()
        };
        report.foreign_keys_ok = violations == 0;
        if violations > 0 {
            report
                .details
                .push(format!("{} foreign key violations", violations));
        }

        report.current_schema_version = schema_version(&conn)?;
        report.schema_version_valid = report.current_schema_version == SCHEMA_VERSION;
        if !report.schema_version_valid {
            report.details.push(format!(
                "schema version {} != expected {}",
                report.current_schema_version, SCHEMA_VERSION
            ));
        }

        Ok(report)
    }

    /// Rebuild indexes and statistics, then re-check integrity.
    pub fn repair(&self) -> Result<IntegrityReport> {
        {
            let conn = self.pool.acquire()?;
            conn.execute_batch("REINDEX; ANALYZE;")?;
        }
        warn!("database repair pass complete, re-checking integrity");
        self.verify_integrity()
    }

    /// Point-in-time snapshot of the database to `target`.
    pub fn backup(&self, target: &Path) -> Result<()> {
        if target.exists() {
            std::fs::remove_file(target)?;
        }
        let conn = self.pool.acquire()?;
        conn.execute(
            "VACUUM INTO ?1",
            params![target.to_string_lossy().to_string()],
        )?;
        info!(target = %target.display(), "metrics database backed up");
        Ok(())
    }

    pub fn database_stats(&self) -> Result<DatabaseStats> {
        let conn = self.pool.acquire()?;
        let mut stats = DatabaseStats {
            file_size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            schema_version: schema_version(&conn)?,
            ..Default::default()
        };
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for table in ["operations", "transfers", "system_metrics", "operation_errors"] {
            let count: usize = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            counts.insert(table, count);
        }
        stats.operations = counts["operations"];
        stats.transfers = counts["transfers"];
        stats.system_metrics = counts["system_metrics"];
        stats.operation_errors = counts["operation_errors"];
        Ok(stats)
    }

    /// Borrow a connection for ad-hoc analytical queries.
    pub(crate) fn connection(&self) -> Result<PooledConnection> {
        self.pool.acquire()
    }
}

fn schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Apply forward-only migrations from `from_version` to `SCHEMA_VERSION`.
fn run_migrations(conn: &Connection, from_version: i64) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        // Version 1 is the base schema created by SCHEMA_SQL.
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
        info!(version, "applied schema migration");
    }
    Ok(())
}

fn operation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OperationMetrics> {
    Ok(OperationMetrics {
        operation_id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        total_files: row.get(3)?,
        completed_files: row.get(4)?,
        failed_files: row.get(5)?,
        total_bytes: row.get(6)?,
        transferred_bytes: row.get(7)?,
        average_transfer_rate_bps: row.get(8)?,
        peak_transfer_rate_bps: row.get(9)?,
        rsync_mode: row.get(10)?,
        transfers: Vec::new(),
        system_samples: Vec::new(),
        errors: Vec::new(),
    })
}

fn transfer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferMetrics> {
    Ok(TransferMetrics {
        operation_id: row.get(0)?,
        unit_path: row.get(1)?,
        src_disk: row.get(2)?,
        dest_disk: row.get(3)?,
        size_bytes: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        success: row.get(7)?,
        error_message: row.get(8)?,
        transfer_rate_bps: row.get(9)?,
    })
}
