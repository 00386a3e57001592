/*!
 * rsync performance modes
 *
 * A closed set of named presets, each expanding to a canonical rsync flag
 * vector. All modes keep partial transfers, update in place, preserve
 * numeric ids, and emit a progress stream.
 */

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RsyncMode {
    /// Fastest transfers, minimal CPU overhead
    Fast,
    /// Balanced speed and features with extended attributes
    Balanced,
    /// Maximum integrity with hard links, ACLs, and checksums
    Integrity,
}

impl Default for RsyncMode {
    fn default() -> Self {
        Self::Fast
    }
}

impl RsyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RsyncMode::Fast => "fast",
            RsyncMode::Balanced => "balanced",
            RsyncMode::Integrity => "integrity",
        }
    }

    /// Canonical flag vector for this mode.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            RsyncMode::Fast => &[
                "-av",
                "--partial",
                "--inplace",
                "--numeric-ids",
                "--no-compress",
                "--info=progress2",
            ],
            RsyncMode::Balanced => &[
                "-av",
                "-X",
                "--partial",
                "--inplace",
                "--numeric-ids",
                "--info=progress2",
            ],
            RsyncMode::Integrity => &[
                "-aHAX",
                "--partial",
                "--inplace",
                "--numeric-ids",
                "--info=progress2",
                "--checksum",
            ],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RsyncMode::Fast => "Fastest transfers, minimal CPU overhead with progress reporting",
            RsyncMode::Balanced => "Balanced speed and features with extended attributes",
            RsyncMode::Integrity => {
                "Maximum integrity checking with hard links, ACLs, and checksums"
            }
        }
    }

    /// Static feature list for display.
    pub fn features(&self) -> &'static [&'static str] {
        match self {
            RsyncMode::Fast => &[
                "basic_archive",
                "no_compression",
                "progress_reporting",
                "minimal_cpu",
            ],
            RsyncMode::Balanced => &[
                "extended_attrs",
                "progress_reporting",
                "moderate_features",
                "mid_range_cpu",
            ],
            RsyncMode::Integrity => &[
                "hard_links",
                "acls",
                "extended_attrs",
                "checksum_verification",
                "detailed_progress",
                "maximum_integrity",
            ],
        }
    }

    pub fn target_hardware(&self) -> &'static str {
        match self {
            RsyncMode::Fast => "Lower-end CPUs, slower storage",
            RsyncMode::Balanced => "Mid-range CPUs, mixed storage types",
            RsyncMode::Integrity => "High-end CPUs, fast storage, integrity-critical operations",
        }
    }

    /// True when this mode preserves hard links and ACLs.
    pub fn preserves_hard_links(&self) -> bool {
        matches!(self, RsyncMode::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_modes_share_baseline_flags() {
        for mode in [RsyncMode::Fast, RsyncMode::Balanced, RsyncMode::Integrity] {
            let flags = mode.flags();
            assert!(flags.contains(&"--partial"));
            assert!(flags.contains(&"--inplace"));
            assert!(flags.contains(&"--numeric-ids"));
            assert!(flags.contains(&"--info=progress2"));
        }
    }

    #[test]
    fn test_fast_mode_flags() {
        let flags = RsyncMode::Fast.flags();
        assert!(flags.contains(&"-av"));
        assert!(flags.contains(&"--no-compress"));
        assert!(!flags.contains(&"--checksum"));
    }

    #[test]
    fn test_integrity_mode_flags() {
        let flags = RsyncMode::Integrity.flags();
        assert!(flags.contains(&"-aHAX"));
        assert!(flags.contains(&"--checksum"));
        assert!(RsyncMode::Integrity.preserves_hard_links());
        assert!(!RsyncMode::Fast.preserves_hard_links());
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&RsyncMode::Balanced).unwrap(),
            "\"balanced\""
        );
        let parsed: RsyncMode = serde_json::from_str("\"integrity\"").unwrap();
        assert_eq!(parsed, RsyncMode::Integrity);
    }
}
