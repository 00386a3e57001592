/*!
 * Pre- and post-transfer validation
 *
 * Pre-transfer checks gate each move; a failed check prevents the copy tool
 * from running at all. Post-transfer checks verify the atomic move left the
 * filesystem in the expected state.
 */

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sysinfo::Disks;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::modes::RsyncMode;
use crate::size::{directory_size, format_bytes};

/// Default extra free space required at the destination, as a fraction of
/// the unit size.
pub const DEFAULT_SPACE_BUFFER_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl ValidationCheck {
    fn passed(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Passed,
            message: String::new(),
        }
    }

    fn failed(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: CheckStatus::Failed,
            message,
        }
    }

    fn warning(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: CheckStatus::Warning,
            message,
        }
    }

    fn skipped(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            message,
        }
    }
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Failed if any check failed, warning if any warned, else passed.
    pub fn overall(&self) -> CheckStatus {
        if self.checks.iter().any(|c| c.status == CheckStatus::Failed) {
            CheckStatus::Failed
        } else if self.checks.iter().any(|c| c.status == CheckStatus::Warning) {
            CheckStatus::Warning
        } else {
            CheckStatus::Passed
        }
    }

    /// True when the transfer may proceed.
    pub fn passed(&self) -> bool {
        self.overall() != CheckStatus::Failed
    }

    pub fn failures(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .collect()
    }
}

/// Pre-transfer prerequisite checks for one move.
pub fn validate_pre_transfer(
    src: &Path,
    dst: &Path,
    size_bytes: u64,
    disks_root: &Path,
    mode: RsyncMode,
    space_buffer_percent: f64,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Source exists and is readable
    report.checks.push(match std::fs::metadata(src) {
        Ok(_) => match check_readable(src) {
            Ok(()) => ValidationCheck::passed("source_readable"),
            Err(err) => ValidationCheck::failed("source_readable", err),
        },
        Err(err) => ValidationCheck::failed("source_readable", format!("{}: {}", src.display(), err)),
    });

    // Destination parent exists and is writable
    report.checks.push(match dst.parent() {
        Some(parent) if parent.exists() => match NamedTempFile::new_in(parent) {
            Ok(_) => ValidationCheck::passed("destination_writable"),
            Err(err) => ValidationCheck::failed(
                "destination_writable",
                format!("cannot write to {}: {}", parent.display(), err),
            ),
        },
        Some(parent) => ValidationCheck::failed(
            "destination_writable",
            format!("destination parent missing: {}", parent.display()),
        ),
        None => ValidationCheck::failed("destination_writable", "destination has no parent".into()),
    });

    // Enough free space at the destination, with buffer
    report
        .checks
        .push(check_free_space(dst, size_bytes, space_buffer_percent));

    // Both endpoints under the expected disks root
    let on_root = src.starts_with(disks_root) && dst.starts_with(disks_root);
    report.checks.push(if on_root {
        ValidationCheck::passed("paths_on_disks_root")
    } else {
        ValidationCheck::failed(
            "paths_on_disks_root",
            format!("paths must live under {}", disks_root.display()),
        )
    });

    // Source and destination should sit on different filesystems
    report.checks.push(check_cross_filesystem(src, dst));

    // Mode compatibility
    report.checks.push(if mode.preserves_hard_links() {
        ValidationCheck::passed("mode_compatibility")
    } else {
        ValidationCheck::warning(
            "mode_compatibility",
            format!(
                "{} mode does not preserve hard links or ACLs",
                mode.as_str()
            ),
        )
    });

    report
}

fn check_readable(path: &Path) -> std::result::Result<(), String> {
    if path.is_dir() {
        std::fs::read_dir(path)
            .map(|_| ())
            .map_err(|e| format!("{}: {}", path.display(), e))
    } else {
        File::open(path)
            .map(|_| ())
            .map_err(|e| format!("{}: {}", path.display(), e))
    }
}

fn check_free_space(dst: &Path, size_bytes: u64, buffer_percent: f64) -> ValidationCheck {
    let disks = Disks::new_with_refreshed_list();
    let holding_disk = disks.iter().find(|d| {
        dst.starts_with(d.mount_point())
            || dst
                .parent()
                .map(|p| p.starts_with(d.mount_point()))
                .unwrap_or(false)
    });

    let Some(disk) = holding_disk else {
        return ValidationCheck::skipped(
            "destination_free_space",
            format!("could not resolve a mount for {}", dst.display()),
        );
    };

    let required = (size_bytes as f64 * (1.0 + buffer_percent / 100.0)) as u64;
    let available = disk.available_space();
    if available >= required {
        ValidationCheck::passed("destination_free_space")
    } else {
        ValidationCheck::failed(
            "destination_free_space",
            format!(
                "need {} (incl. {:.0}% buffer), only {} available",
                format_bytes(required),
                buffer_percent,
                format_bytes(available)
            ),
        )
    }
}

#[cfg(unix)]
fn check_cross_filesystem(src: &Path, dst: &Path) -> ValidationCheck {
    use std::os::unix::fs::MetadataExt;

    let src_dev = std::fs::metadata(src).map(|m| m.dev());
    let dst_dev = dst
        .parent()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.dev());
    match (src_dev, dst_dev) {
        (Ok(s), Some(d)) if s == d => ValidationCheck::warning(
            "cross_filesystem",
            "source and destination appear to be on the same filesystem".into(),
        ),
        (Ok(_), Some(_)) => ValidationCheck::passed("cross_filesystem"),
        _ => ValidationCheck::skipped("cross_filesystem", "device ids unavailable".into()),
    }
}

#[cfg(not(unix))]
fn check_cross_filesystem(_src: &Path, _dst: &Path) -> ValidationCheck {
    ValidationCheck::skipped("cross_filesystem", "not supported on this platform".into())
}

/// Post-transfer verification for one completed move.
pub fn validate_post_transfer(
    src: &Path,
    dst: &Path,
    expected_size: Option<u64>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.checks.push(if src.exists() {
        ValidationCheck::failed(
            "source_removed",
            format!("source still present: {}", src.display()),
        )
    } else {
        ValidationCheck::passed("source_removed")
    });

    report.checks.push(if dst.exists() {
        ValidationCheck::passed("destination_present")
    } else {
        ValidationCheck::failed(
            "destination_present",
            format!("destination missing: {}", dst.display()),
        )
    });

    if let Some(expected) = expected_size {
        let actual = directory_size(dst);
        report.checks.push(if actual == expected {
            ValidationCheck::passed("size_match")
        } else {
            ValidationCheck::warning(
                "size_match",
                format!(
                    "expected {}, found {}",
                    format_bytes(expected),
                    format_bytes(actual)
                ),
            )
        });
    }

    report.checks.push(check_readability_sample(dst));

    report
}

/// Open the first few files under the destination and read a byte from each.
fn check_readability_sample(dst: &Path) -> ValidationCheck {
    const SAMPLE_LIMIT: usize = 3;

    if !dst.exists() {
        return ValidationCheck::skipped("readability_sample", "destination missing".into());
    }

    let mut sampled = 0;
    for entry in WalkDir::new(dst)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .take(SAMPLE_LIMIT)
    {
        let mut buf = [0u8; 1];
        match File::open(entry.path()) {
            Ok(mut f) => {
                if let Err(err) = f.read(&mut buf) {
                    return ValidationCheck::failed(
                        "readability_sample",
                        format!("cannot read {}: {}", entry.path().display(), err),
                    );
                }
            }
            Err(err) => {
                return ValidationCheck::failed(
                    "readability_sample",
                    format!("cannot open {}: {}", entry.path().display(), err),
                );
            }
        }
        sampled += 1;
    }

    if sampled == 0 {
        ValidationCheck::skipped("readability_sample", "no files to sample".into())
    } else {
        ValidationCheck::passed("readability_sample")
    }
}
