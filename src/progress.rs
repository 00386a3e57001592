/*!
 * rsync progress-stream parsing
 *
 * Extracts rate, percent, and current-file information from the lines rsync
 * writes with `--info=progress2`. Unrecognized lines parse to `None`; this
 * parser never fails.
 */

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// A parsed line from the rsync progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A `--info=progress2` line: bytes so far, percent, rate, elapsed
    Progress {
        transferred_bytes: u64,
        percent: u8,
        rate_bps: f64,
        elapsed: Duration,
    },
    /// "Total transferred file size: N bytes"
    TotalSize(u64),
    /// A filename line announcing the file currently being transferred
    CurrentFile(String),
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // e.g. "1,234,567  45%   10.50MB/s    0:01:23"
        Regex::new(r"(?i)(\d+(?:,\d+)*)\s+(\d+)%\s+([\d.]+)(KB|MB|GB)/s\s+(\d+):(\d+):(\d+)")
            .expect("valid progress regex")
    })
}

fn total_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Total transferred file size: ([\d,]+) bytes").expect("valid total regex")
    })
}

fn strip_separators(s: &str) -> u64 {
    s.chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

fn rate_multiplier(unit: &str) -> f64 {
    match unit.to_ascii_uppercase().as_str() {
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

/// Parse one line of rsync output.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = progress_regex().captures(trimmed) {
        let transferred_bytes = strip_separators(&caps[1]);
        let percent: u8 = caps[2].parse().ok()?;
        let rate: f64 = caps[3].parse().ok()?;
        let rate_bps = rate * rate_multiplier(&caps[4]);
        let hours: u64 = caps[5].parse().ok()?;
        let minutes: u64 = caps[6].parse().ok()?;
        let seconds: u64 = caps[7].parse().ok()?;
        return Some(ProgressEvent::Progress {
            transferred_bytes,
            percent,
            rate_bps,
            elapsed: Duration::from_secs(hours * 3600 + minutes * 60 + seconds),
        });
    }

    if let Some(caps) = total_size_regex().captures(trimmed) {
        return Some(ProgressEvent::TotalSize(strip_separators(&caps[1])));
    }

    // A bare filename line: contains a path separator and is not a totals line
    if trimmed.contains('/') && !trimmed.starts_with("Total") {
        return Some(ProgressEvent::CurrentFile(trimmed.to_string()));
    }

    None
}
