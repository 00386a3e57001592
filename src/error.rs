/*!
 * Error types for Ballast
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BallastError>;

#[derive(Debug)]
pub enum BallastError {
    /// Source file or directory not found
    SourceNotFound(PathBuf),

    /// Invalid path
    InvalidPath(PathBuf),

    /// I/O error
    Io(io::Error),

    /// Insufficient disk space on the destination disk
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Configuration error
    Config(String),

    /// Plan serialization or load error
    Plan(String),

    /// Pre- or post-transfer validation failure
    Validation(String),

    /// The copy tool exited non-zero
    Rsync { code: i32, message: String },

    /// Metrics database error
    Database(String),

    /// Cron expression error
    Cron(String),

    /// Crontab registry error
    Crontab(String),

    /// Schedule configuration or lifecycle error
    Schedule(String),

    /// An execution exceeded its runtime cap
    Timeout(String),

    /// The operation was cancelled
    Cancelled,

    /// Generic error with message
    Other(String),
}

/// Error kind for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Path or precondition validation errors
    Validation,
    /// Destination out of space
    DiskSpace,
    /// Permission errors
    Permission,
    /// Copy-tool failures
    CopyTool,
    /// Filesystem operation errors
    Filesystem,
    /// Network errors
    Network,
    /// Interrupted transfers
    Interrupt,
    /// Configuration errors
    Configuration,
    /// Runtime-cap timeouts
    Timeout,
    /// Resource exhaustion
    Resource,
    /// Cancelled by the user
    UserCancelled,
    /// Uncategorized errors
    Unknown,
}

impl BallastError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            BallastError::SourceNotFound(_) => true,
            BallastError::InvalidPath(_) => true,
            BallastError::Config(_) => true,
            BallastError::Plan(_) => true,
            BallastError::Validation(_) => true,
            BallastError::InsufficientDiskSpace { .. } => true,
            BallastError::Schedule(_) => true,
            BallastError::Cancelled => true,

            BallastError::Io(_) => false,
            BallastError::Rsync { .. } => false,
            BallastError::Database(_) => false,
            BallastError::Cron(_) => true,
            BallastError::Crontab(_) => false,
            BallastError::Timeout(_) => false,
            BallastError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            BallastError::Io(io_err) => Self::is_io_transient(io_err),
            BallastError::Rsync { .. } => true,
            BallastError::Database(_) => true,
            BallastError::Crontab(_) => true,
            BallastError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        )
    }

    /// Get error kind for logging and instrumentation
    pub fn kind(&self) -> ErrorKind {
        match self {
            BallastError::SourceNotFound(_)
            | BallastError::InvalidPath(_)
            | BallastError::Validation(_) => ErrorKind::Validation,
            BallastError::Io(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                ErrorKind::Permission
            }
            BallastError::Io(_) => ErrorKind::Filesystem,
            BallastError::InsufficientDiskSpace { .. } => ErrorKind::DiskSpace,
            BallastError::Config(_)
            | BallastError::Plan(_)
            | BallastError::Cron(_)
            | BallastError::Schedule(_) => ErrorKind::Configuration,
            BallastError::Rsync { .. } => ErrorKind::CopyTool,
            BallastError::Database(_) => ErrorKind::Resource,
            BallastError::Crontab(_) => ErrorKind::Filesystem,
            BallastError::Timeout(_) => ErrorKind::Timeout,
            BallastError::Cancelled => ErrorKind::UserCancelled,
            BallastError::Other(_) => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::DiskSpace => write!(f, "disk_space"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::CopyTool => write!(f, "copy_tool"),
            ErrorKind::Filesystem => write!(f, "filesystem"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Interrupt => write!(f, "interrupt"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::UserCancelled => write!(f, "user_cancelled"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for BallastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallastError::SourceNotFound(path) => {
                write!(f, "Source not found: {}", path.display())
            }
            BallastError::InvalidPath(path) => {
                write!(f, "Invalid path: {}", path.display())
            }
            BallastError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            BallastError::InsufficientDiskSpace {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient disk space: {} bytes required, {} bytes available",
                    required, available
                )
            }
            BallastError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            BallastError::Plan(msg) => {
                write!(f, "Plan error: {}", msg)
            }
            BallastError::Validation(msg) => {
                write!(f, "Validation error: {}", msg)
            }
            BallastError::Rsync { code, message } => {
                write!(f, "rsync failed with exit code {}: {}", code, message)
            }
            BallastError::Database(msg) => {
                write!(f, "Metrics database error: {}", msg)
            }
            BallastError::Cron(msg) => {
                write!(f, "Invalid cron expression: {}", msg)
            }
            BallastError::Crontab(msg) => {
                write!(f, "Crontab error: {}", msg)
            }
            BallastError::Schedule(msg) => {
                write!(f, "Schedule error: {}", msg)
            }
            BallastError::Timeout(msg) => {
                write!(f, "Timed out: {}", msg)
            }
            BallastError::Cancelled => {
                write!(f, "Operation cancelled")
            }
            BallastError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for BallastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BallastError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BallastError {
    fn from(err: io::Error) -> Self {
        BallastError::Io(err)
    }
}

impl From<serde_json::Error> for BallastError {
    fn from(err: serde_json::Error) -> Self {
        BallastError::Plan(format!("JSON error: {}", err))
    }
}

impl From<rusqlite::Error> for BallastError {
    fn from(err: rusqlite::Error) -> Self {
        BallastError::Database(err.to_string())
    }
}

impl From<glob::PatternError> for BallastError {
    fn from(err: glob::PatternError) -> Self {
        BallastError::Config(format!("Invalid glob pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(BallastError::SourceNotFound(PathBuf::from("/mnt/disk1")).is_fatal());
        assert!(BallastError::Config("test".to_string()).is_fatal());
        assert!(BallastError::InsufficientDiskSpace {
            required: 100,
            available: 50,
        }
        .is_fatal());
        assert!(BallastError::Cancelled.is_fatal());
    }

    #[test]
    fn test_non_fatal_errors() {
        assert!(!BallastError::Io(io::Error::new(io::ErrorKind::Other, "test")).is_fatal());
        assert!(!BallastError::Rsync {
            code: 23,
            message: "partial".to_string(),
        }
        .is_fatal());
        assert!(!BallastError::Other("test".to_string()).is_fatal());
    }

    #[test]
    fn test_transient_errors() {
        assert!(BallastError::Database("locked".to_string()).is_transient());
        assert!(BallastError::Timeout("runtime cap".to_string()).is_transient());
        assert!(!BallastError::Config("bad".to_string()).is_transient());

        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        assert!(BallastError::Io(io_err).is_transient());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BallastError::SourceNotFound(PathBuf::from("/mnt/disk1")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            BallastError::InsufficientDiskSpace {
                required: 1,
                available: 0
            }
            .kind(),
            ErrorKind::DiskSpace
        );
        assert_eq!(
            BallastError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied")).kind(),
            ErrorKind::Permission
        );
        assert_eq!(
            BallastError::Rsync {
                code: 1,
                message: "syntax".to_string()
            }
            .kind(),
            ErrorKind::CopyTool
        );
        assert_eq!(BallastError::Cancelled.kind(), ErrorKind::UserCancelled);
    }

    #[test]
    fn test_error_display() {
        let err = BallastError::Rsync {
            code: 23,
            message: "partial transfer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rsync failed with exit code 23: partial transfer"
        );
        assert_eq!(ErrorKind::DiskSpace.to_string(), "disk_space");
        assert_eq!(ErrorKind::UserCancelled.to_string(), "user_cancelled");
    }
}
