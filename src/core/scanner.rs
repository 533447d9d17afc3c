//! Source tree scanner with exclusion processing
//!
//! Walks the source root without following symlinks, prunes excluded
//! directories before descending into them, and produces the entry sequence
//! in lexicographic relpath order. Per-entry failures are collected, not
//! fatal: the scan continues and the caller decides what to do with them.

use crate::config::{FreezeConfig, DEFAULT_VCS_DIRS};
use crate::core::entry::{
    mode_from_metadata, mtime_from_metadata, normalize_relpath, owner_from_metadata, EntryKind,
    SourceEntry,
};
use crate::error::{PermafrostError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A per-entry scan failure, reported in aggregate
#[derive(Debug, Clone)]
pub struct ScanError {
    /// Path that could not be scanned
    pub path: PathBuf,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Entry counts and aggregate size for a completed scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub other: u64,
    /// Sum of regular file sizes in bytes
    pub total_file_bytes: u64,
}

impl ScanSummary {
    pub fn total(&self) -> u64 {
        self.files + self.dirs + self.symlinks + self.other
    }
}

/// Result of one scan: ordered entries plus collected failures
///
/// The entry sequence is finite and consumed once per freeze; re-scanning
/// starts from the root again.
#[derive(Debug, Default)]
pub struct Scan {
    /// Entries in lexicographic relpath order
    pub entries: Vec<SourceEntry>,
    /// Per-entry failures encountered along the way
    pub errors: Vec<ScanError>,
}

impl Scan {
    /// Counts by kind and total file bytes
    pub fn summary(&self) -> ScanSummary {
        let mut s = ScanSummary::default();
        for entry in &self.entries {
            match entry.kind {
                EntryKind::File => {
                    s.files += 1;
                    s.total_file_bytes += entry.size;
                }
                EntryKind::Dir => s.dirs += 1,
                EntryKind::Symlink => s.symlinks += 1,
                EntryKind::Other => s.other += 1,
            }
        }
        s
    }
}

/// Directory tree scanner
///
/// Exclusion rules are compiled once at construction: user glob patterns,
/// the version-control directory defaults, and (when enabled) patterns from
/// the root `.gitignore`. Globs are matched against the full relative path
/// and against the bare file name, so `*.log` and `__pycache__` both behave
/// as expected.
pub struct Scanner {
    root: PathBuf,
    exclude: GlobSet,
    exclude_vcs: bool,
}

impl Scanner {
    /// Build a scanner for `root` with the given configuration
    pub fn new(root: &Path, config: &FreezeConfig) -> Result<Self> {
        if !root.exists() {
            return Err(PermafrostError::SourceNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(PermafrostError::SourceNotADirectory(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        let mut patterns: Vec<String> = config.exclude.clone();
        if config.respect_ignore {
            patterns.extend(load_ignore_patterns(&root));
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| PermafrostError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let exclude = builder
            .build()
            .map_err(|e| PermafrostError::InvalidPattern {
                pattern: patterns.join(", "),
                reason: e.to_string(),
            })?;

        Ok(Scanner {
            root,
            exclude,
            exclude_vcs: config.exclude_vcs,
        })
    }

    /// Source root (canonicalized)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative path (or its bare name) is excluded
    fn is_excluded(&self, relpath: &str, name: &str, is_dir: bool) -> bool {
        if is_dir && self.exclude_vcs && DEFAULT_VCS_DIRS.contains(&name) {
            return true;
        }
        self.exclude.is_match(relpath) || self.exclude.is_match(name)
    }

    /// Walk the tree and produce the ordered entry sequence
    ///
    /// Excluded directories are pruned before descending, so a matched
    /// directory costs nothing for its subtree. Entry metadata is collected
    /// and sorted globally by relpath; file content is never read here.
    pub fn scan(&self) -> Result<Scan> {
        let mut scan = Scan::default();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                let rel = match e.path().strip_prefix(&self.root) {
                    Ok(r) => normalize_relpath(r),
                    Err(_) => return false,
                };
                let name = e.file_name().to_string_lossy();
                let is_dir = e.file_type().is_dir();
                let keep = !self.is_excluded(&rel, &name, is_dir);
                if !keep {
                    debug!(path = %rel, "excluded");
                }
                keep
            });

        for item in walker {
            let dirent = match item {
                Ok(d) => d,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    warn!(path = %path.display(), "cannot scan: {e}");
                    scan.errors.push(ScanError {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let rel = match dirent.path().strip_prefix(&self.root) {
                Ok(r) => normalize_relpath(r),
                Err(_) => continue,
            };

            let meta = match fs::symlink_metadata(dirent.path()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %rel, "cannot stat: {e}");
                    scan.errors.push(ScanError {
                        path: dirent.path().to_path_buf(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let kind = EntryKind::classify(&meta);

            let link_target = if kind == EntryKind::Symlink {
                match fs::read_link(dirent.path()) {
                    Ok(t) => Some(t.to_string_lossy().into_owned()),
                    Err(e) => {
                        warn!(path = %rel, "cannot read link target: {e}");
                        scan.errors.push(ScanError {
                            path: dirent.path().to_path_buf(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            let (uid, gid) = owner_from_metadata(&meta);
            scan.entries.push(SourceEntry {
                relpath: rel,
                kind,
                size: if kind == EntryKind::File { meta.len() } else { 0 },
                mode: mode_from_metadata(&meta),
                uid,
                gid,
                mtime: mtime_from_metadata(&meta),
                link_target,
            });
        }

        scan.entries.sort_by(|a, b| a.relpath.cmp(&b.relpath));
        Ok(scan)
    }
}

/// Load exclusion patterns from the root `.gitignore`, if present
///
/// Deliberately basic: one glob per non-comment line, directory markers and
/// leading slashes stripped. Negation is not interpreted.
fn load_ignore_patterns(root: &Path) -> Vec<String> {
    let path = root.join(".gitignore");
    let Ok(contents) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .map(|l| {
            l.trim_start_matches('/')
                .trim_end_matches('/')
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().write_all(contents).unwrap();
    }

    #[test]
    fn test_entries_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/b.txt"), b"b");
        touch(&dir.path().join("sub-x"), b"x");
        touch(&dir.path().join("a.txt"), b"a");

        let scanner = Scanner::new(dir.path(), &FreezeConfig::default()).unwrap();
        let scan = scanner.scan().unwrap();
        let paths: Vec<_> = scan.entries.iter().map(|e| e.relpath.as_str()).collect();

        // '-' (0x2D) sorts before '/' (0x2F), so "sub-x" precedes "sub/b.txt"
        // in the flat ordering even though a sorted traversal would visit
        // sub's children first
        assert_eq!(paths, vec!["a.txt", "sub", "sub-x", "sub/b.txt"]);

        for pair in paths.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_glob_exclusion_prunes_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep.txt"), b"k");
        touch(&dir.path().join("skip.log"), b"s");
        touch(&dir.path().join("sub/deep.log"), b"d");

        let config = FreezeConfig::default().with_excludes(["*.log".to_string()]);
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let scan = scanner.scan().unwrap();
        let paths: Vec<_> = scan.entries.iter().map(|e| e.relpath.as_str()).collect();

        assert_eq!(paths, vec!["keep.txt", "sub"]);
    }

    #[test]
    fn test_directory_exclusion_prunes_subtree() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("node_modules/pkg/index.js"), b"x");
        touch(&dir.path().join("src/main.rs"), b"y");

        let config = FreezeConfig::default().with_excludes(["node_modules".to_string()]);
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let scan = scanner.scan().unwrap();

        assert!(scan
            .entries
            .iter()
            .all(|e| !e.relpath.starts_with("node_modules")));
    }

    #[test]
    fn test_vcs_directories_excluded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".git/HEAD"), b"ref");
        touch(&dir.path().join(".hg/store"), b"x");
        touch(&dir.path().join("README.md"), b"hello");

        let scanner = Scanner::new(dir.path(), &FreezeConfig::default()).unwrap();
        let scan = scanner.scan().unwrap();
        let paths: Vec<_> = scan.entries.iter().map(|e| e.relpath.as_str()).collect();

        assert_eq!(paths, vec!["README.md"]);
    }

    #[test]
    fn test_vcs_directories_kept_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".git/HEAD"), b"ref");

        let mut config = FreezeConfig::default();
        config.exclude_vcs = false;
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let scan = scanner.scan().unwrap();

        assert!(scan.entries.iter().any(|e| e.relpath == ".git/HEAD"));
    }

    #[test]
    fn test_respect_ignore_loads_root_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".gitignore"), b"# build output\ntarget/\n*.tmp\n");
        touch(&dir.path().join("target/out.bin"), b"o");
        touch(&dir.path().join("scratch.tmp"), b"t");
        touch(&dir.path().join("main.rs"), b"m");

        let mut config = FreezeConfig::default();
        config.respect_ignore = true;
        let scanner = Scanner::new(dir.path(), &config).unwrap();
        let scan = scanner.scan().unwrap();
        let paths: Vec<_> = scan.entries.iter().map(|e| e.relpath.as_str()).collect();

        assert_eq!(paths, vec![".gitignore", "main.rs"]);
    }

    #[test]
    fn test_missing_source_rejected() {
        let err = Scanner::new(Path::new("/nonexistent/permafrost-src"), &FreezeConfig::default());
        assert!(matches!(err, Err(PermafrostError::SourceNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_captured_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("target.txt"), b"t");
        std::os::unix::fs::symlink("../target.txt", dir.path().join("link")).unwrap();

        let scanner = Scanner::new(dir.path(), &FreezeConfig::default()).unwrap();
        let scan = scanner.scan().unwrap();
        let link = scan.entries.iter().find(|e| e.relpath == "link").unwrap();

        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("../target.txt"));
        assert_eq!(link.size, 0);
    }

    #[test]
    fn test_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"), b"12345");
        touch(&dir.path().join("sub/b.txt"), b"123");

        let scanner = Scanner::new(dir.path(), &FreezeConfig::default()).unwrap();
        let scan = scanner.scan().unwrap();
        let summary = scan.summary();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.dirs, 1);
        assert_eq!(summary.total_file_bytes, 8);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_empty_directory_scan() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::new(dir.path(), &FreezeConfig::default()).unwrap();
        let scan = scanner.scan().unwrap();

        assert!(scan.entries.is_empty());
        assert!(scan.errors.is_empty());
    }
}
