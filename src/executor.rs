/*!
 * Transfer executor
 *
 * Drives each planned move as a single atomic rsync invocation
 * (`--remove-source-files`), strictly in plan order. Progress is parsed
 * from the tool's stderr stream; failures are classified and recorded
 * without aborting the remaining moves.
 */

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::classify::{classify, rollback_partial_destination};
use crate::error::{BallastError, Result};
use crate::metrics::MetricsStore;
use crate::modes::RsyncMode;
use crate::monitor::PerformanceMonitor;
use crate::plan::Plan;
use crate::progress::{parse_line, ProgressEvent};
use crate::size::format_bytes;
use crate::transfer_state::TransferTracker;
use crate::validate::{validate_post_transfer, validate_pre_transfer, DEFAULT_SPACE_BUFFER_PERCENT};

/// Cooperative cancellation handle shared with the executor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for one `perform_plan` run.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Execute moves; false prints the commands and changes nothing
    pub execute: bool,
    pub extra_flags: Vec<String>,
    /// Merge into an existing destination instead of skipping the move
    pub allow_merge: bool,
    pub mode: RsyncMode,
    pub disks_root: PathBuf,
    /// Copy-tool binary, overridable for tests
    pub rsync_bin: String,
    pub space_buffer_percent: f64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            execute: false,
            extra_flags: Vec::new(),
            allow_merge: false,
            mode: RsyncMode::Fast,
            disks_root: PathBuf::from("/mnt"),
            rsync_bin: "rsync".to_string(),
            space_buffer_percent: DEFAULT_SPACE_BUFFER_PERCENT,
        }
    }
}

/// Outcome of one run; `failed` is the executor's contract return value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// Destination existed and merging was not allowed
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Build the rsync argument vector for one move. The source argument is the
/// plain path for directories and files alike; `--remove-source-files`
/// makes the invocation an atomic move.
pub fn build_rsync_args(
    mode: RsyncMode,
    extra_flags: &[String],
    src: &Path,
    dst: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = mode.flags().iter().map(|f| f.to_string()).collect();
    args.extend(extra_flags.iter().cloned());
    args.push("--remove-source-files".to_string());
    args.push(src.to_string_lossy().to_string());
    args.push(dst.to_string_lossy().to_string());
    args
}

/// Execute (or dry-run) every move of the plan in order.
pub fn perform_plan(
    plan: &Plan,
    opts: &ExecutorOptions,
    tracker: &TransferTracker,
    monitor: Option<&PerformanceMonitor>,
    store: Option<&Arc<MetricsStore>>,
    cancel: &CancelToken,
) -> Result<ExecutionSummary> {
    let mut summary = ExecutionSummary::default();

    // Close out records from a previous run that are no longer planned.
    let orphans = tracker.find_orphans(&plan.unit_keys());
    if !orphans.is_empty() {
        info!(count = orphans.len(), "cleaning up orphaned transfers");
        tracker.cleanup_orphans(&orphans);
    }

    let total = plan.moves.len();
    for (idx, mv) in plan.moves.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            info!("cancellation requested; stopping before move {}", idx + 1);
            break;
        }

        let src = mv.unit.src_abs(&opts.disks_root);
        let dst = mv.unit.dest_abs(&opts.disks_root, &mv.dest_disk);
        info!(
            "[{}/{}] moving {} from {} -> {} ({})",
            idx + 1,
            total,
            mv.unit.unit_key(),
            mv.unit.src_disk,
            mv.dest_disk,
            format_bytes(mv.unit.size_bytes)
        );

        if !opts.execute {
            // Dry run: print the command and carry on.
            let args = build_rsync_args(opts.mode, &opts.extra_flags, &src, &dst);
            println!("$ {} {}", opts.rsync_bin, args.join(" "));
            summary.attempted += 1;
            summary.succeeded += 1;
            continue;
        }

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if dst.exists() && !opts.allow_merge {
            info!(
                dest = %dst.display(),
                "destination exists and merging is disabled; skipping"
            );
            summary.skipped += 1;
            continue;
        }

        summary.attempted += 1;

        let report = validate_pre_transfer(
            &src,
            &dst,
            mv.unit.size_bytes,
            &opts.disks_root,
            opts.mode,
            opts.space_buffer_percent,
        );
        if !report.passed() {
            for check in report.failures() {
                error!(check = check.name, "pre-validation failed: {}", check.message);
            }
            record_error(
                store,
                tracker.operation_id(),
                &format!("pre-validation failed for {}", mv.unit.unit_key()),
                "validation",
            );
            summary.failed += 1;
            continue;
        }

        let record = tracker.start(
            &mv.unit.unit_key(),
            &mv.unit.src_disk,
            &mv.dest_disk,
            mv.unit.size_bytes,
        );
        if let Some(monitor) = monitor {
            monitor.start_transfer(&mv.unit.unit_key());
        }

        let outcome = run_rsync(opts, &src, &dst, cancel);

        match outcome {
            Ok(()) => {
                // rsync removes source files but leaves the directory
                // skeleton; prune it before verifying the source is gone
                prune_empty_dirs(&src);
                let post = validate_post_transfer(&src, &dst, Some(mv.unit.size_bytes));
                for check in &post.checks {
                    if matches!(
                        check.status,
                        crate::validate::CheckStatus::Failed | crate::validate::CheckStatus::Warning
                    ) {
                        warn!(check = check.name, "post-transfer: {}", check.message);
                    }
                }
                tracker.complete(&record, true, None);
                if let Some(monitor) = monitor {
                    monitor.complete_transfer(
                        &mv.unit.unit_key(),
                        &mv.unit.src_disk,
                        &mv.dest_disk,
                        mv.unit.size_bytes,
                        record.start_time,
                        true,
                        None,
                    );
                }
                summary.succeeded += 1;
            }
            Err(failure) => {
                let cancelled = cancel.is_cancelled();
                let message = if cancelled {
                    "operation cancelled".to_string()
                } else {
                    failure.to_string()
                };
                error!("move failed: {}", message);
                if let BallastError::Rsync { code, message: ref stderr } = failure {
                    let classified = classify(code, stderr);
                    record_error(
                        store,
                        tracker.operation_id(),
                        &message,
                        classified.category.as_str(),
                    );
                } else {
                    record_error(store, tracker.operation_id(), &message, "unknown");
                }
                tracker.complete(&record, false, Some(message.clone()));
                if let Some(monitor) = monitor {
                    monitor.complete_transfer(
                        &mv.unit.unit_key(),
                        &mv.unit.src_disk,
                        &mv.dest_disk,
                        mv.unit.size_bytes,
                        record.start_time,
                        false,
                        Some(message),
                    );
                }
                summary.failed += 1;
                if cancelled {
                    summary.cancelled = true;
                    break;
                }
            }
        }
    }

    Ok(summary)
}

/// Spawn the copy tool for one move, streaming its progress output.
/// Cancellation kills the child; the source is left intact.
fn run_rsync(
    opts: &ExecutorOptions,
    src: &Path,
    dst: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    let args = build_rsync_args(opts.mode, &opts.extra_flags, src, dst);
    debug!("$ {} {}", opts.rsync_bin, args.join(" "));

    let mut child = Command::new(&opts.rsync_bin)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            BallastError::Other(format!("failed to spawn {}: {}", opts.rsync_bin, e))
        })?;

    let mut stderr_tail = String::new();
    if let Some(stderr) = child.stderr.take() {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                break;
            }
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    match parse_line(&line) {
                        Some(ProgressEvent::Progress {
                            percent, rate_bps, ..
                        }) => {
                            debug!(percent, rate_bps, "transfer progress");
                        }
                        Some(ProgressEvent::CurrentFile(file)) => {
                            debug!(file = %file, "transferring");
                        }
                        Some(ProgressEvent::TotalSize(bytes)) => {
                            debug!(bytes, "total transferred file size");
                        }
                        None => {
                            // Keep the last unparsed lines for classification
                            stderr_tail.push_str(line.trim_end());
                            stderr_tail.push('\n');
                            if stderr_tail.len() > 4096 {
                                let cut = stderr_tail.len() - 4096;
                                stderr_tail.drain(..cut);
                            }
                        }
                    }
                }
                Err(_) => break,
            }
        }
        // Drain whatever remains after a kill
        let mut rest = String::new();
        let _ = reader.read_to_string(&mut rest);
        stderr_tail.push_str(&rest);
    }

    let status = child.wait()?;
    if cancel.is_cancelled() {
        return Err(BallastError::Cancelled);
    }
    if status.success() {
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    let failure = classify(code, &stderr_tail);
    if !failure.recoverable {
        if let Err(err) = rollback_partial_destination(dst) {
            warn!("rollback of partial destination failed: {}", err);
        }
    }
    Err(BallastError::Rsync {
        code,
        message: failure.message,
    })
}

/// Remove the empty directory skeleton rsync leaves at the source after
/// `--remove-source-files`.
fn prune_empty_dirs(path: &Path) {
    if !path.is_dir() {
        return;
    }
    let entries: Vec<PathBuf> = match std::fs::read_dir(path) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(_) => return,
    };
    for entry in entries {
        if entry.is_dir() {
            prune_empty_dirs(&entry);
        }
    }
    // Only removes when empty
    if std::fs::remove_dir(path).is_ok() {
        debug!(path = %path.display(), "removed empty source directory");
    }
}

fn record_error(
    store: Option<&Arc<MetricsStore>>,
    operation_id: &str,
    message: &str,
    error_type: &str,
) {
    if let Some(store) = store {
        if let Err(err) = store.store_error(operation_id, message, Some(error_type), None) {
            warn!("failed to persist error record: {}", err);
        }
    }
}
