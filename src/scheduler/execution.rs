/*!
 * Schedule execution supervision and recovery
 *
 * Tracks running executions under a mutex, records failures, classifies
 * them into retryable and terminal types, and drives cancellable background
 * retry workers. Repeated final failures auto-suspend the schedule.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BallastError, Result};
use crate::metrics::now_epoch;
use crate::scheduler::RetryConfig;

/// Consecutive final failures before a schedule is auto-suspended.
pub const DEFAULT_SUSPEND_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
    Retrying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    Permission,
    Disk,
    Network,
    Resource,
    Configuration,
    UserCancelled,
    Unknown,
}

impl FailureType {
    /// Classify an execution failure from its error text.
    pub fn classify(error_text: &str) -> Self {
        let lower = error_text.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            FailureType::Timeout
        } else if lower.contains("permission") || lower.contains("access denied") {
            FailureType::Permission
        } else if lower.contains("no space") || lower.contains("disk full") || lower.contains("disk")
        {
            FailureType::Disk
        } else if lower.contains("network") || lower.contains("connection") {
            FailureType::Network
        } else if lower.contains("memory") || lower.contains("resource") {
            FailureType::Resource
        } else if lower.contains("config") || lower.contains("invalid argument") {
            FailureType::Configuration
        } else if lower.contains("cancel") || lower.contains("interrupt") {
            FailureType::UserCancelled
        } else {
            FailureType::Unknown
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureType::Timeout
                | FailureType::Network
                | FailureType::Resource
                | FailureType::Unknown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub execution_id: String,
    pub schedule_id: String,
    pub failure_type: FailureType,
    pub error_message: String,
    pub stack: Option<String>,
    pub timestamp: f64,
}

/// One run of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub execution_id: String,
    pub schedule_id: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub status: ExecutionStatus,
    pub pid: Option<u32>,
    pub error_message: Option<String>,
    pub retry_attempt: u32,
    pub files_moved: u64,
    pub bytes_moved: u64,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl ScheduleExecution {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time.map(|end| (end - self.start_time).max(0.0))
    }

    pub fn is_finished(&self) -> bool {
        !matches!(
            self.status,
            ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Retrying
        )
    }
}

/// Rollup of one schedule's execution history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleStatistics {
    pub schedule_id: String,
    pub total_runs: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub average_duration_seconds: f64,
    pub total_files_moved: u64,
    pub total_bytes_moved: u64,
}

/// Supervises running executions; bookkeeping is mutex-guarded.
pub struct ScheduleMonitor {
    running: Mutex<HashMap<String, ScheduleExecution>>,
    history: Mutex<Vec<ScheduleExecution>>,
    failure_counts: Mutex<HashMap<String, u32>>,
    suspended: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
    suspend_threshold: u32,
}

impl ScheduleMonitor {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            failure_counts: Mutex::new(HashMap::new()),
            suspended: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            suspend_threshold: DEFAULT_SUSPEND_THRESHOLD,
        }
    }

    pub fn with_suspend_threshold(mut self, threshold: u32) -> Self {
        self.suspend_threshold = threshold;
        self
    }

    /// Create a running execution record.
    pub fn start_execution(&self, schedule_id: &str, pid: Option<u32>) -> ScheduleExecution {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let execution = ScheduleExecution {
            execution_id: format!("exec-{}", id),
            schedule_id: schedule_id.to_string(),
            start_time: now_epoch(),
            end_time: None,
            status: ExecutionStatus::Running,
            pid,
            error_message: None,
            retry_attempt: 0,
            files_moved: 0,
            bytes_moved: 0,
            failures: Vec::new(),
        };
        self.running
            .lock()
            .expect("monitor lock")
            .insert(execution.execution_id.clone(), execution.clone());
        info!(schedule = schedule_id, execution = %execution.execution_id, "execution started");
        execution
    }

    /// Close a running execution from the copy run's exit code.
    pub fn complete_execution(
        &self,
        execution_id: &str,
        exit_code: i32,
        files_moved: u64,
        bytes_moved: u64,
        error: Option<String>,
    ) -> Result<ScheduleExecution> {
        let mut execution = self
            .running
            .lock()
            .expect("monitor lock")
            .remove(execution_id)
            .ok_or_else(|| {
                BallastError::Schedule(format!("no running execution {}", execution_id))
            })?;

        execution.end_time = Some(now_epoch());
        execution.files_moved = files_moved;
        execution.bytes_moved = bytes_moved;
        if exit_code == 0 {
            execution.status = ExecutionStatus::Success;
            self.failure_counts
                .lock()
                .expect("monitor lock")
                .remove(&execution.schedule_id);
        } else {
            execution.status = ExecutionStatus::Failed;
            let message = error.unwrap_or_else(|| format!("exit code {}", exit_code));
            execution.error_message = Some(message.clone());
            execution.failures.push(FailureRecord {
                execution_id: execution.execution_id.clone(),
                schedule_id: execution.schedule_id.clone(),
                failure_type: FailureType::classify(&message),
                error_message: message,
                stack: None,
                timestamp: now_epoch(),
            });
        }

        self.history
            .lock()
            .expect("monitor lock")
            .push(execution.clone());
        Ok(execution)
    }

    /// Mark an execution that exceeded its runtime cap.
    pub fn timeout_execution(&self, execution_id: &str) -> Result<ScheduleExecution> {
        let mut execution = self
            .running
            .lock()
            .expect("monitor lock")
            .remove(execution_id)
            .ok_or_else(|| {
                BallastError::Schedule(format!("no running execution {}", execution_id))
            })?;
        execution.end_time = Some(now_epoch());
        execution.status = ExecutionStatus::Timeout;
        execution.error_message = Some("execution timed out".to_string());
        self.history
            .lock()
            .expect("monitor lock")
            .push(execution.clone());
        Ok(execution)
    }

    /// Cancel a running execution, signalling its process best-effort.
    pub fn cancel_execution(&self, execution_id: &str, reason: &str) -> Result<ScheduleExecution> {
        let mut execution = self
            .running
            .lock()
            .expect("monitor lock")
            .remove(execution_id)
            .ok_or_else(|| {
                BallastError::Schedule(format!("no running execution {}", execution_id))
            })?;

        if let Some(pid) = execution.pid {
            terminate_pid(pid);
        }
        execution.end_time = Some(now_epoch());
        execution.status = ExecutionStatus::Cancelled;
        execution.error_message = Some(reason.to_string());
        self.history
            .lock()
            .expect("monitor lock")
            .push(execution.clone());
        info!(execution = execution_id, reason, "execution cancelled");
        Ok(execution)
    }

    /// Record one final (post-retry) failure; suspends the schedule once
    /// the counter crosses the threshold. Returns the new counter value.
    pub fn record_final_failure(&self, schedule_id: &str, reason: &str) -> u32 {
        let count = {
            let mut counts = self.failure_counts.lock().expect("monitor lock");
            let count = counts.entry(schedule_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if count >= self.suspend_threshold {
            self.suspend_schedule(
                schedule_id,
                &format!("{} consecutive failures (last: {})", count, reason),
            );
        }
        count
    }

    /// Cancel anything running for the schedule and mark it suspended.
    pub fn suspend_schedule(&self, schedule_id: &str, reason: &str) {
        let running_ids: Vec<String> = self
            .running
            .lock()
            .expect("monitor lock")
            .values()
            .filter(|e| e.schedule_id == schedule_id)
            .map(|e| e.execution_id.clone())
            .collect();
        for id in running_ids {
            let _ = self.cancel_execution(&id, "schedule suspended");
        }
        warn!(schedule = schedule_id, reason, "schedule suspended");
        self.suspended
            .lock()
            .expect("monitor lock")
            .insert(schedule_id.to_string(), reason.to_string());
    }

    /// Clear suspension and the failure counter.
    pub fn resume_schedule(&self, schedule_id: &str) {
        self.suspended.lock().expect("monitor lock").remove(schedule_id);
        self.failure_counts
            .lock()
            .expect("monitor lock")
            .remove(schedule_id);
        info!(schedule = schedule_id, "schedule resumed");
    }

    pub fn is_suspended(&self, schedule_id: &str) -> Option<String> {
        self.suspended
            .lock()
            .expect("monitor lock")
            .get(schedule_id)
            .cloned()
    }

    pub fn failure_count(&self, schedule_id: &str) -> u32 {
        self.failure_counts
            .lock()
            .expect("monitor lock")
            .get(schedule_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn running_executions(&self) -> Vec<ScheduleExecution> {
        self.running
            .lock()
            .expect("monitor lock")
            .values()
            .cloned()
            .collect()
    }

    /// Finished executions for one schedule, start-time ascending.
    pub fn history(&self, schedule_id: &str) -> Vec<ScheduleExecution> {
        let mut records: Vec<ScheduleExecution> = self
            .history
            .lock()
            .expect("monitor lock")
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        records
    }

    /// Drop finished executions older than `days`. Returns removed count.
    pub fn cleanup_old_executions(&self, days: u32) -> usize {
        let cutoff = now_epoch() - days as f64 * 86_400.0;
        let mut history = self.history.lock().expect("monitor lock");
        let before = history.len();
        history.retain(|e| e.start_time >= cutoff);
        before - history.len()
    }

    pub fn statistics(&self, schedule_id: &str) -> ScheduleStatistics {
        let records = self.history(schedule_id);
        let mut stats = ScheduleStatistics {
            schedule_id: schedule_id.to_string(),
            total_runs: records.len(),
            ..Default::default()
        };
        let mut duration_sum = 0.0;
        let mut duration_count = 0usize;
        for record in &records {
            match record.status {
                ExecutionStatus::Success => stats.successes += 1,
                ExecutionStatus::Failed | ExecutionStatus::Timeout => stats.failures += 1,
                _ => {}
            }
            stats.total_files_moved += record.files_moved;
            stats.total_bytes_moved += record.bytes_moved;
            if let Some(duration) = record.duration_seconds() {
                duration_sum += duration;
                duration_count += 1;
            }
        }
        if stats.total_runs > 0 {
            stats.success_rate = stats.successes as f64 / stats.total_runs as f64;
        }
        if duration_count > 0 {
            stats.average_duration_seconds = duration_sum / duration_count as f64;
        }
        stats
    }
}

impl Default for ScheduleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort SIGTERM delivery.
fn terminate_pid(pid: u32) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status();
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Handle to one pending retry worker.
pub struct RetryHandle {
    cancel_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
    pub schedule_id: String,
}

impl RetryHandle {
    /// Wake the worker and make it exit without retrying.
    pub fn cancel(mut self) {
        let _ = self.cancel_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Wait for the worker to finish (used by tests).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Classifies failures and schedules retries per the retry configuration.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Whether another attempt should run. Attempts are 1-based, so
    /// `max_attempts = 0` never retries.
    pub fn should_retry(failure: FailureType, attempt: u32, retry: &RetryConfig) -> bool {
        failure.is_retryable() && attempt <= retry.max_attempts
    }

    /// Spawn a cancellable background worker that sleeps `delay` and then
    /// runs `callback`. The worker parks on a channel so cancellation wakes
    /// it immediately; it never blocks the scheduler's evaluation loop.
    pub fn schedule_retry<F>(schedule_id: &str, delay: Duration, callback: F) -> RetryHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let id = schedule_id.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("ballast-retry-{}", id))
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => callback(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!(schedule = %id, "retry cancelled before firing");
                }
            })
            .expect("spawn retry worker");

        RetryHandle {
            cancel_tx,
            handle: Some(handle),
            schedule_id: schedule_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{RetryConfig, RetryStrategy};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_execution_lifecycle_success() {
        let monitor = ScheduleMonitor::new();
        let execution = monitor.start_execution("nightly", Some(4242));
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(monitor.running_executions().len(), 1);

        let done = monitor
            .complete_execution(&execution.execution_id, 0, 12, 4096, None)
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert_eq!(done.files_moved, 12);
        assert!(monitor.running_executions().is_empty());
        assert_eq!(monitor.history("nightly").len(), 1);
    }

    #[test]
    fn test_execution_failure_records_failure() {
        let monitor = ScheduleMonitor::new();
        let execution = monitor.start_execution("nightly", None);
        let done = monitor
            .complete_execution(
                &execution.execution_id,
                1,
                0,
                0,
                Some("network unreachable".to_string()),
            )
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(done.failures.len(), 1);
        assert_eq!(done.failures[0].failure_type, FailureType::Network);
    }

    #[test]
    fn test_cancel_execution() {
        let monitor = ScheduleMonitor::new();
        let execution = monitor.start_execution("nightly", None);
        let cancelled = monitor
            .cancel_execution(&execution.execution_id, "user request")
            .unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(cancelled.error_message.as_deref(), Some("user request"));
    }

    #[test]
    fn test_unknown_execution_errors() {
        let monitor = ScheduleMonitor::new();
        assert!(monitor.complete_execution("exec-404", 0, 0, 0, None).is_err());
        assert!(monitor.cancel_execution("exec-404", "x").is_err());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FailureType::classify("operation timed out"),
            FailureType::Timeout
        );
        assert_eq!(
            FailureType::classify("Permission denied"),
            FailureType::Permission
        );
        assert_eq!(
            FailureType::classify("no space left on device"),
            FailureType::Disk
        );
        assert_eq!(
            FailureType::classify("connection refused"),
            FailureType::Network
        );
        assert_eq!(
            FailureType::classify("out of memory"),
            FailureType::Resource
        );
        assert_eq!(
            FailureType::classify("invalid config value"),
            FailureType::Configuration
        );
        assert_eq!(
            FailureType::classify("cancelled by user"),
            FailureType::UserCancelled
        );
        assert_eq!(FailureType::classify("???"), FailureType::Unknown);
    }

    #[test]
    fn test_retryable_types() {
        assert!(FailureType::Timeout.is_retryable());
        assert!(FailureType::Network.is_retryable());
        assert!(FailureType::Resource.is_retryable());
        assert!(FailureType::Unknown.is_retryable());
        assert!(!FailureType::Permission.is_retryable());
        assert!(!FailureType::Configuration.is_retryable());
        assert!(!FailureType::UserCancelled.is_retryable());
    }

    #[test]
    fn test_should_retry_honors_max_attempts() {
        let retry = RetryConfig {
            strategy: RetryStrategy::Fixed,
            max_attempts: 2,
            base_delay_secs: 1,
            backoff_multiplier: 2.0,
            max_delay_secs: 60,
            jitter: false,
        };
        assert!(RecoveryManager::should_retry(FailureType::Network, 1, &retry));
        assert!(RecoveryManager::should_retry(FailureType::Network, 2, &retry));
        assert!(!RecoveryManager::should_retry(FailureType::Network, 3, &retry));
        // max_attempts = 0 never retries
        let no_retry = RetryConfig {
            max_attempts: 0,
            ..retry
        };
        assert!(!RecoveryManager::should_retry(
            FailureType::Network,
            1,
            &no_retry
        ));
    }

    #[test]
    fn test_auto_suspension_after_repeated_failures() {
        let monitor = ScheduleMonitor::new().with_suspend_threshold(2);
        assert_eq!(monitor.record_final_failure("nightly", "boom"), 1);
        assert!(monitor.is_suspended("nightly").is_none());
        assert_eq!(monitor.record_final_failure("nightly", "boom again"), 2);
        assert!(monitor.is_suspended("nightly").is_some());

        monitor.resume_schedule("nightly");
        assert!(monitor.is_suspended("nightly").is_none());
        assert_eq!(monitor.failure_count("nightly"), 0);
    }

    #[test]
    fn test_suspension_cancels_running_executions() {
        let monitor = ScheduleMonitor::new();
        let execution = monitor.start_execution("nightly", None);
        monitor.suspend_schedule("nightly", "manual");
        assert!(monitor.running_executions().is_empty());
        let history = monitor.history("nightly");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Cancelled);
        assert_eq!(history[0].execution_id, execution.execution_id);
    }

    #[test]
    fn test_retry_worker_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle =
            RecoveryManager::schedule_retry("nightly", Duration::from_millis(10), move || {
                flag.store(true, Ordering::SeqCst);
            });
        handle.join();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_retry_worker_cancellable() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle =
            RecoveryManager::schedule_retry("nightly", Duration::from_secs(60), move || {
                flag.store(true, Ordering::SeqCst);
            });
        // Cancellation wakes the worker immediately; no 60s wait
        handle.cancel();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_statistics_rollup() {
        let monitor = ScheduleMonitor::new();
        for i in 0..3 {
            let execution = monitor.start_execution("nightly", None);
            let code = if i == 2 { 1 } else { 0 };
            monitor
                .complete_execution(&execution.execution_id, code, 10, 1000, None)
                .unwrap();
        }

        let stats = monitor.statistics("nightly");
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_files_moved, 30);
        assert_eq!(stats.total_bytes_moved, 3000);
    }

    #[test]
    fn test_cleanup_old_executions() {
        let monitor = ScheduleMonitor::new();
        let execution = monitor.start_execution("nightly", None);
        monitor
            .complete_execution(&execution.execution_id, 0, 0, 0, None)
            .unwrap();
        // Backdate the record
        monitor.history.lock().unwrap()[0].start_time = now_epoch() - 40.0 * 86_400.0;

        assert_eq!(monitor.cleanup_old_executions(30), 1);
        assert!(monitor.history("nightly").is_empty());
    }
}
