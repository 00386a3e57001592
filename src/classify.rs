/*!
 * Copy-tool error classification and recovery
 *
 * Maps rsync exit codes and stderr text to a category, severity, and retry
 * decision. Classification is a pure function of its inputs.
 */

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{BallastError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Validation,
    DiskSpace,
    Permission,
    CopyTool,
    Filesystem,
    Network,
    Interrupt,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Validation => "validation",
            FailureCategory::DiskSpace => "disk_space",
            FailureCategory::Permission => "permission",
            FailureCategory::CopyTool => "copy_tool",
            FailureCategory::Filesystem => "filesystem",
            FailureCategory::Network => "network",
            FailureCategory::Interrupt => "interrupt",
            FailureCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classified copy-tool failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncFailure {
    pub category: FailureCategory,
    pub severity: FailureSeverity,
    pub recoverable: bool,
    pub exit_code: i32,
    pub message: String,
}

/// Human description of an rsync exit code.
pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        1 => "Syntax or usage error",
        2 => "Protocol incompatibility",
        3 => "Errors selecting input/output files, dirs",
        4 => "Requested action not supported",
        5 => "Error starting client-server protocol",
        6 => "Daemon unable to append to log-file",
        10 => "Error in socket I/O",
        11 => "Error in file I/O",
        12 => "Error in rsync protocol data stream",
        13 => "Errors with program diagnostics",
        14 => "Error in IPC code",
        20 => "Received SIGUSR1 or SIGINT",
        21 => "Some error returned by waitpid()",
        22 => "Error allocating core memory buffers",
        23 => "Partial transfer due to error",
        24 => "Partial transfer due to vanished source files",
        25 => "The --max-delete limit stopped deletions",
        30 => "Timeout in data send/receive",
        35 => "Timeout waiting for daemon connection",
        _ => "Unknown rsync error",
    }
}

/// Classify an rsync failure from its exit code and stderr text.
pub fn classify(exit_code: i32, stderr: &str) -> RsyncFailure {
    let (category, severity, recoverable) = match exit_code {
        1 | 2 | 4 | 5 | 6 => (FailureCategory::CopyTool, FailureSeverity::High, false),
        3 | 11 => (FailureCategory::Filesystem, FailureSeverity::High, true),
        10 | 30 | 35 => (FailureCategory::Network, FailureSeverity::Medium, true),
        20 | 21 => (FailureCategory::Interrupt, FailureSeverity::Medium, true),
        23 | 24 => (FailureCategory::CopyTool, FailureSeverity::Medium, true),
        22 => (FailureCategory::Filesystem, FailureSeverity::High, false),
        _ => (FailureCategory::Unknown, FailureSeverity::High, true),
    };

    // stderr text can upgrade the classification
    let lower = stderr.to_lowercase();
    let (category, severity, recoverable) =
        if lower.contains("no space left") || lower.contains("disk full") {
            (FailureCategory::DiskSpace, FailureSeverity::High, false)
        } else if lower.contains("permission denied") {
            (FailureCategory::Permission, FailureSeverity::High, false)
        } else if lower.contains("network") || lower.contains("connection") {
            (FailureCategory::Network, FailureSeverity::Medium, true)
        } else {
            (category, severity, recoverable)
        };

    let message = if stderr.trim().is_empty() {
        describe_exit_code(exit_code).to_string()
    } else {
        stderr.trim().to_string()
    };

    RsyncFailure {
        category,
        severity,
        recoverable,
        exit_code,
        message,
    }
}

/// Remove a partially written destination after a critical failure.
/// The source is never touched.
pub fn rollback_partial_destination(dest: &Path) -> Result<()> {
    if !dest.exists() {
        return Ok(());
    }
    warn!(dest = %dest.display(), "rolling back partial destination");
    if dest.is_dir() {
        std::fs::remove_dir_all(dest)?;
    } else {
        std::fs::remove_file(dest)?;
    }
    Ok(())
}

/// Run a copy operation with retry for recoverable failures.
///
/// Recoverable failures back off exponentially (base delay doubled per
/// attempt) up to `max_retries`. Non-recoverable or exhausted failures roll
/// back the partial destination and surface an error.
pub fn run_with_recovery<F>(
    max_retries: u32,
    base_delay: Duration,
    dest: &Path,
    mut operation: F,
) -> Result<()>
where
    F: FnMut() -> std::result::Result<(), RsyncFailure>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(()) => return Ok(()),
            Err(failure) => {
                if failure.recoverable && attempt < max_retries {
                    attempt += 1;
                    let delay = base_delay * 2_u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        max_retries,
                        category = failure.category.as_str(),
                        "recoverable copy failure, retrying after {:?}",
                        delay
                    );
                    thread::sleep(delay);
                    continue;
                }

                error!(
                    category = failure.category.as_str(),
                    exit_code = failure.exit_code,
                    "copy failed: {}",
                    failure.message
                );
                if let Err(rollback_err) = rollback_partial_destination(dest) {
                    warn!("rollback failed: {}", rollback_err);
                }
                return Err(BallastError::Rsync {
                    code: failure.exit_code,
                    message: failure.message,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_table() {
        let f = classify(1, "");
        assert_eq!(f.category, FailureCategory::CopyTool);
        assert_eq!(f.severity, FailureSeverity::High);
        assert!(!f.recoverable);

        let f = classify(11, "");
        assert_eq!(f.category, FailureCategory::Filesystem);
        assert!(f.recoverable);

        let f = classify(30, "");
        assert_eq!(f.category, FailureCategory::Network);
        assert_eq!(f.severity, FailureSeverity::Medium);
        assert!(f.recoverable);

        let f = classify(20, "");
        assert_eq!(f.category, FailureCategory::Interrupt);

        let f = classify(23, "");
        assert_eq!(f.category, FailureCategory::CopyTool);
        assert_eq!(f.severity, FailureSeverity::Medium);
        assert!(f.recoverable);

        let f = classify(22, "");
        assert_eq!(f.category, FailureCategory::Filesystem);
        assert!(!f.recoverable);

        let f = classify(99, "");
        assert_eq!(f.category, FailureCategory::Unknown);
        assert!(f.recoverable);
    }

    #[test]
    fn test_stderr_upgrades() {
        let f = classify(11, "rsync: write failed: No space left on device (28)");
        assert_eq!(f.category, FailureCategory::DiskSpace);
        assert_eq!(f.severity, FailureSeverity::High);
        assert!(!f.recoverable);

        let f = classify(23, "rsync: opendir failed: Permission denied (13)");
        assert_eq!(f.category, FailureCategory::Permission);
        assert!(!f.recoverable);

        let f = classify(1, "connection unexpectedly closed");
        assert_eq!(f.category, FailureCategory::Network);
        assert!(f.recoverable);
    }

    #[test]
    fn test_classification_is_pure() {
        let a = classify(23, "some error");
        let b = classify(23, "some error");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rollback_removes_partial_destination() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("partial");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("chunk"), b"half").unwrap();

        rollback_partial_destination(&dest).unwrap();
        assert!(!dest.exists());

        // Missing destination is not an error
        rollback_partial_destination(&dest).unwrap();
    }

    #[test]
    fn test_recovery_retries_then_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("dest");
        let mut calls = 0;

        let result = run_with_recovery(3, Duration::from_millis(1), &dest, || {
            calls += 1;
            if calls < 3 {
                Err(classify(23, ""))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_recovery_gives_up_on_non_recoverable() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("dest");
        std::fs::write(&dest, b"partial").unwrap();
        let mut calls = 0;

        let result = run_with_recovery(3, Duration::from_millis(1), &dest, || {
            calls += 1;
            Err(classify(1, ""))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(!dest.exists());
    }
}
