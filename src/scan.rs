/*!
 * Allocation-unit scanner
 *
 * Walks each disk and yields the movable units under its shares at a
 * configurable depth. A unit is a directory subtree or a single file that
 * moves as a whole.
 */

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::disk::Disk;
use crate::error::Result;
use crate::size::directory_size;

/// A movable subtree or single file, sized once at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Top-level share name, e.g. `Movies`
    pub share: String,
    /// Path relative to the share root on the source disk; empty for a
    /// whole-share unit
    pub rel_path: String,
    pub size_bytes: u64,
    /// Source disk name, e.g. `disk1`
    pub src_disk: String,
}

impl Unit {
    /// Absolute source path: `<disks_root>/<src_disk>/<share>/<rel_path>`.
    pub fn src_abs(&self, disks_root: &Path) -> PathBuf {
        let mut path = disks_root.join(&self.src_disk).join(&self.share);
        if !self.rel_path.is_empty() {
            path = path.join(&self.rel_path);
        }
        path
    }

    /// Absolute destination path on `dest_disk`.
    pub fn dest_abs(&self, disks_root: &Path, dest_disk: &str) -> PathBuf {
        let mut path = disks_root.join(dest_disk).join(&self.share);
        if !self.rel_path.is_empty() {
            path = path.join(&self.rel_path);
        }
        path
    }

    /// Stable key used by the transfer-state tracker: `share/rel_path`,
    /// or just `share` for a whole-share unit.
    pub fn unit_key(&self) -> String {
        if self.rel_path.is_empty() {
            self.share.clone()
        } else {
            format!("{}/{}", self.share, self.rel_path)
        }
    }
}

/// Scanner options for one disk walk.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 0 = whole share, 1 = direct children of the share root, n = level n
    pub unit_depth: u32,
    pub include_shares: Option<Vec<String>>,
    pub exclude_shares: Option<Vec<String>>,
    /// Units smaller than this are dropped
    pub min_unit_size: u64,
    /// Globs matched against `share` or `share/rel_path`
    pub exclude_globs: Vec<Pattern>,
}

impl ScanOptions {
    pub fn compile_globs(globs: &[String]) -> Result<Vec<Pattern>> {
        globs
            .iter()
            .map(|g| Pattern::new(g).map_err(Into::into))
            .collect()
    }

    fn share_included(&self, share: &str) -> bool {
        if let Some(ref include) = self.include_shares {
            if !include.iter().any(|s| s == share) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude_shares {
            if exclude.iter().any(|s| s == share) {
                return false;
            }
        }
        true
    }

    fn glob_excluded(&self, key: &str) -> bool {
        self.exclude_globs.iter().any(|g| g.matches(key))
    }
}

/// Scan one disk, yielding units lazily share by share.
pub fn scan_disk<'a>(disk: &'a Disk, opts: &'a ScanOptions) -> impl Iterator<Item = Unit> + 'a {
    share_roots(&disk.path)
        .into_iter()
        .filter(move |(share, _)| opts.share_included(share))
        .flat_map(move |(share, root)| units_for_share(disk, opts, share, root))
}

/// Top-level share directories on a disk, sorted by name.
fn share_roots(disk_path: &Path) -> Vec<(String, PathBuf)> {
    let mut roots = Vec::new();
    let entries = match fs::read_dir(disk_path) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %disk_path.display(), %err, "cannot read disk root");
            return roots;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                roots.push((name.to_string(), path));
            }
        }
    }
    roots.sort();
    roots
}

fn units_for_share(disk: &Disk, opts: &ScanOptions, share: String, root: PathBuf) -> Vec<Unit> {
    if opts.unit_depth == 0 {
        if opts.glob_excluded(&share) {
            return Vec::new();
        }
        let size = directory_size(&root);
        if size < opts.min_unit_size {
            return Vec::new();
        }
        return vec![Unit {
            share,
            rel_path: String::new(),
            size_bytes: size,
            src_disk: disk.name.clone(),
        }];
    }

    let mut candidates = Vec::new();
    collect_candidates(&root, opts.unit_depth, &mut candidates);

    let mut units = Vec::new();
    for candidate in candidates {
        let rel = match candidate.strip_prefix(&root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        let match_key = format!("{}/{}", share, rel);
        if opts.glob_excluded(&match_key) || opts.glob_excluded(&share) {
            continue;
        }
        let size = directory_size(&candidate);
        if size < opts.min_unit_size {
            continue;
        }
        units.push(Unit {
            share: share.clone(),
            rel_path: rel,
            size_bytes: size,
            src_disk: disk.name.clone(),
        });
    }
    units.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    units
}

/// Descend `depth` levels below `root`, collecting directories at the target
/// depth and files at or above it. Unreadable entries are skipped.
fn collect_candidates(root: &Path, depth: u32, out: &mut Vec<PathBuf>) {
    if depth == 0 {
        out.push(root.to_path_buf());
        return;
    }
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %root.display(), %err, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_candidates(&path, depth - 1, out);
        } else if depth == 1 && path.is_file() {
            // Files at the target depth count as units too
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_disk(root: &Path) -> Disk {
        Disk::new("disk1", root.to_path_buf(), 1000 * 1024, 500 * 1024)
    }

    /// Layout:
    ///   Movies/Alien/alien.mkv (6 bytes)
    ///   Movies/Blade/blade.mkv (4 bytes)
    ///   Movies/readme.txt      (9 bytes)
    ///   TV/Show/S01/e01.mkv    (5 bytes)
    fn populate(root: &Path) {
        fs::create_dir_all(root.join("Movies/Alien")).unwrap();
        fs::create_dir_all(root.join("Movies/Blade")).unwrap();
        fs::create_dir_all(root.join("TV/Show/S01")).unwrap();
        fs::write(root.join("Movies/Alien/alien.mkv"), b"alien!").unwrap();
        fs::write(root.join("Movies/Blade/blade.mkv"), b"runr").unwrap();
        fs::write(root.join("Movies/readme.txt"), b"some text").unwrap();
        fs::write(root.join("TV/Show/S01/e01.mkv"), b"pilot").unwrap();
    }

    #[test]
    fn test_depth_zero_whole_share() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());
        let opts = ScanOptions::default();

        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        // One unit per share at most
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.rel_path.is_empty()));
        let movies = units.iter().find(|u| u.share == "Movies").unwrap();
        assert_eq!(movies.size_bytes, 19);
    }

    #[test]
    fn test_depth_one_children_and_root_files() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());
        let opts = ScanOptions {
            unit_depth: 1,
            ..Default::default()
        };

        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        let keys: Vec<String> = units.iter().map(|u| u.unit_key()).collect();
        assert!(keys.contains(&"Movies/Alien".to_string()));
        assert!(keys.contains(&"Movies/Blade".to_string()));
        // Files directly under the share root are units as well
        assert!(keys.contains(&"Movies/readme.txt".to_string()));
        assert!(keys.contains(&"TV/Show".to_string()));
        // Depth 1: no unit's relative path contains a separator
        assert!(units.iter().all(|u| !u.rel_path.contains('/')));
    }

    #[test]
    fn test_depth_two() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());
        let opts = ScanOptions {
            unit_depth: 2,
            ..Default::default()
        };

        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        let keys: Vec<String> = units.iter().map(|u| u.unit_key()).collect();
        assert!(keys.contains(&"TV/Show/S01".to_string()));
        assert!(keys.contains(&"Movies/Alien/alien.mkv".to_string()));
    }

    #[test]
    fn test_min_unit_size_filters() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());
        let opts = ScanOptions {
            unit_depth: 1,
            min_unit_size: 5,
            ..Default::default()
        };

        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        let keys: Vec<String> = units.iter().map(|u| u.unit_key()).collect();
        assert!(keys.contains(&"Movies/Alien".to_string())); // 6 bytes
        assert!(!keys.contains(&"Movies/Blade".to_string())); // 4 bytes
    }

    #[test]
    fn test_share_filters() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());

        let opts = ScanOptions {
            unit_depth: 1,
            exclude_shares: Some(vec!["Movies".to_string()]),
            ..Default::default()
        };
        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        assert!(units.iter().all(|u| u.share == "TV"));

        let opts = ScanOptions {
            unit_depth: 1,
            include_shares: Some(vec!["Movies".to_string()]),
            ..Default::default()
        };
        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        assert!(units.iter().all(|u| u.share == "Movies"));
    }

    #[test]
    fn test_exclude_globs() {
        let temp = tempdir().unwrap();
        populate(temp.path());
        let disk = make_disk(temp.path());
        let opts = ScanOptions {
            unit_depth: 1,
            exclude_globs: ScanOptions::compile_globs(&["Movies/*".to_string()]).unwrap(),
            ..Default::default()
        };

        let units: Vec<Unit> = scan_disk(&disk, &opts).collect();
        assert!(units.iter().all(|u| u.share != "Movies"));
        assert!(units.iter().any(|u| u.share == "TV"));
    }

    #[test]
    fn test_unit_paths() {
        let unit = Unit {
            share: "Movies".to_string(),
            rel_path: "Alien (1979)".to_string(),
            size_bytes: 1,
            src_disk: "disk1".to_string(),
        };
        let root = Path::new("/mnt");
        assert_eq!(
            unit.src_abs(root),
            PathBuf::from("/mnt/disk1/Movies/Alien (1979)")
        );
        assert_eq!(
            unit.dest_abs(root, "disk2"),
            PathBuf::from("/mnt/disk2/Movies/Alien (1979)")
        );
        assert_eq!(unit.unit_key(), "Movies/Alien (1979)");
    }
}
