/*!
 * Size parsing, formatting, and directory sizing
 */

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{BallastError, Result};

/// Bytes in one GiB, used for safety margins throughout.
pub const GIB: u64 = 1024 * 1024 * 1024;

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([KMGT]?i?B)\s*$").expect("valid size regex")
    })
}

/// Parse a human size string like "5GiB", "1.5 TB", or "800MB" into bytes.
///
/// Decimal units (KB, MB, GB, TB) are powers of 1000; binary units
/// (KiB, MiB, GiB, TiB) are powers of 1024. Matching is case-insensitive.
pub fn parse_size(s: &str) -> Result<u64> {
    let caps = size_regex()
        .captures(s)
        .ok_or_else(|| BallastError::Config(format!("Invalid size: {}", s)))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| BallastError::Config(format!("Invalid size: {}", s)))?;

    let multiplier: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "b" => 1,
        "kb" => 1000,
        "mb" => 1000_u64.pow(2),
        "gb" => 1000_u64.pow(3),
        "tb" => 1000_u64.pow(4),
        "kib" => 1024,
        "mib" => 1024_u64.pow(2),
        "gib" => 1024_u64.pow(3),
        "tib" => 1024_u64.pow(4),
        other => {
            return Err(BallastError::Config(format!(
                "Unknown unit in size: {}",
                other
            )))
        }
    };

    Ok((value * multiplier as f64) as u64)
}

/// Format bytes into human-readable binary units (B, KiB, MiB, ...).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    for (i, unit) in UNITS.iter().enumerate() {
        if value < 1024.0 || i == UNITS.len() - 1 {
            if i == 0 {
                return format!("{} {}", bytes, unit);
            }
            return format!("{:.2} {}", value, unit);
        }
        value /= 1024.0;
    }
    unreachable!()
}

/// Total size of a path (file or directory) in bytes.
///
/// Directory sizes are the recursive sum of contained file sizes.
/// Unreadable or vanished entries are skipped.
pub fn directory_size(path: &Path) -> u64 {
    if path.is_file() {
        return path.metadata().map(|m| m.len()).unwrap_or(0);
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                total = total.saturating_add(metadata.len());
            }
        }
    }
    total
}

/// Format a duration in seconds as "Xh Ym Zs".
pub fn format_duration_secs(secs: u64) -> String {
    let minutes = secs / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, secs % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
