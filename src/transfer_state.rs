/*!
 * Transfer-state tracking
 *
 * Persists per-unit in-flight records so an interrupted run can detect
 * orphaned or resumable work. Persistence through the metrics store is
 * best-effort: a failed write never poisons the in-memory state.
 */

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::metrics::{now_epoch, MetricsStore, TransferMetrics};

pub const ORPHAN_CLEANUP_MESSAGE: &str = "orphaned transfer cleaned up";

/// Key of one tracked transfer within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub src_disk: String,
    pub unit_path: String,
}

/// One in-flight or completed transfer record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub operation_id: String,
    pub unit_path: String,
    pub src_disk: String,
    pub dest_disk: String,
    pub size_bytes: u64,
    pub start_time: f64,
    pub completed: bool,
    pub success: bool,
    pub error_message: Option<String>,
}

impl TransferRecord {
    pub fn key(&self) -> TransferKey {
        TransferKey {
            src_disk: self.src_disk.clone(),
            unit_path: self.unit_path.clone(),
        }
    }

    fn to_metrics(&self, end_time: Option<f64>) -> TransferMetrics {
        TransferMetrics {
            operation_id: self.operation_id.clone(),
            unit_path: self.unit_path.clone(),
            src_disk: self.src_disk.clone(),
            dest_disk: self.dest_disk.clone(),
            size_bytes: self.size_bytes,
            start_time: self.start_time,
            end_time,
            success: self.success,
            error_message: self.error_message.clone(),
            transfer_rate_bps: None,
        }
    }
}

/// Tracks the in-flight transfers of one operation.
pub struct TransferTracker {
    operation_id: String,
    store: Option<Arc<MetricsStore>>,
    active: Mutex<HashMap<TransferKey, TransferRecord>>,
}

impl TransferTracker {
    pub fn new(operation_id: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            store: None,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Construct with persistence, hydrating any incomplete records left
    /// behind by a previous run of the same operation.
    pub fn with_store(operation_id: &str, store: Arc<MetricsStore>) -> Self {
        let tracker = Self {
            operation_id: operation_id.to_string(),
            store: Some(store),
            active: Mutex::new(HashMap::new()),
        };
        tracker.load_existing();
        tracker
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    fn load_existing(&self) {
        let Some(ref store) = self.store else {
            return;
        };
        match store.get_incomplete_transfers(&self.operation_id) {
            Ok(rows) => {
                let mut active = self.active.lock().expect("tracker lock");
                for row in rows {
                    let record = TransferRecord {
                        operation_id: row.operation_id,
                        unit_path: row.unit_path,
                        src_disk: row.src_disk,
                        dest_disk: row.dest_disk,
                        size_bytes: row.size_bytes,
                        start_time: row.start_time,
                        completed: false,
                        success: false,
                        error_message: None,
                    };
                    active.insert(record.key(), record);
                }
                if !active.is_empty() {
                    info!(
                        count = active.len(),
                        operation = %self.operation_id,
                        "resumed incomplete transfer records"
                    );
                }
            }
            Err(err) => warn!("could not load existing transfer state: {}", err),
        }
    }

    /// Create (or replace) an in-progress record and persist it.
    pub fn start(
        &self,
        unit_path: &str,
        src_disk: &str,
        dest_disk: &str,
        size_bytes: u64,
    ) -> TransferRecord {
        let record = TransferRecord {
            operation_id: self.operation_id.clone(),
            unit_path: unit_path.to_string(),
            src_disk: src_disk.to_string(),
            dest_disk: dest_disk.to_string(),
            size_bytes,
            start_time: now_epoch(),
            completed: false,
            success: false,
            error_message: None,
        };

        self.active
            .lock()
            .expect("tracker lock")
            .insert(record.key(), record.clone());

        if let Some(ref store) = self.store {
            if let Err(err) = store.store_transfer(&record.to_metrics(None)) {
                warn!("failed to persist transfer start: {}", err);
            }
        }
        record
    }

    /// Mark a record completed. Completed records are never mutated again.
    pub fn complete(&self, record: &TransferRecord, success: bool, error: Option<String>) {
        let mut finished = record.clone();
        finished.completed = true;
        finished.success = success;
        finished.error_message = error;

        self.active
            .lock()
            .expect("tracker lock")
            .remove(&record.key());

        if let Some(ref store) = self.store {
            let metrics = finished.to_metrics(Some(now_epoch()));
            if let Err(err) =
                store.update_transfer(&self.operation_id, &finished.unit_path, &metrics)
            {
                warn!("failed to persist transfer completion: {}", err);
            }
        }
    }

    /// Currently in-progress records.
    pub fn active(&self) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> =
            self.active.lock().expect("tracker lock").values().cloned().collect();
        records.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        records
    }

    /// In-progress records whose `(src_disk, unit_path)` key is absent from
    /// the current plan.
    pub fn find_orphans(&self, plan_keys: &HashSet<(String, String)>) -> Vec<TransferRecord> {
        self.active()
            .into_iter()
            .filter(|r| !plan_keys.contains(&(r.src_disk.clone(), r.unit_path.clone())))
            .collect()
    }

    /// Close each orphan as failed with the cleanup message.
    pub fn cleanup_orphans(&self, orphans: &[TransferRecord]) {
        for orphan in orphans {
            info!(
                unit = %orphan.unit_path,
                src = %orphan.src_disk,
                "cleaning up orphaned transfer"
            );
            self.complete(orphan, false, Some(ORPHAN_CLEANUP_MESSAGE.to_string()));
        }
    }
}
