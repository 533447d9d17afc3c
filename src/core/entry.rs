//! Source tree entries and path normalization
//!
//! Relative paths are the single key every layer agrees on: POSIX separators,
//! Unicode NFC, no leading `./`. Entry ordering by this key is what makes two
//! freezes of an unchanged tree byte-identical.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Entry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link (never followed; target captured verbatim)
    Symlink,
    /// Anything else (fifo, socket, device)
    Other,
}

impl EntryKind {
    /// Classify from filesystem metadata taken with `symlink_metadata`
    pub fn classify(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }

    /// Lowercase name used in manifests and listings
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the source tree, immutable once emitted
///
/// Ordering of these records is the source of truth for archive member order
/// and manifest order alike.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Normalized path relative to the source root
    pub relpath: String,

    /// Entry classification
    pub kind: EntryKind,

    /// Size in bytes (0 for directories and symlinks)
    pub size: u64,

    /// Permission bits
    pub mode: u32,

    /// Numeric owner
    pub uid: u32,

    /// Numeric group
    pub gid: u32,

    /// Modification time, UTC, second precision
    pub mtime: DateTime<Utc>,

    /// Symlink target, verbatim
    pub link_target: Option<String>,
}

impl SourceEntry {
    /// Permission bits as a zero-padded octal string ("0644")
    pub fn mode_octal(&self) -> String {
        format!("{:04o}", self.mode & 0o7777)
    }

    /// Whether any execute bit is set
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }

    /// Lowercase file extension, empty for non-files and extensionless names
    pub fn extension(&self) -> String {
        if self.kind != EntryKind::File {
            return String::new();
        }
        Path::new(&self.relpath)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Modification time rendered as `YYYY-MM-DDTHH:MM:SSZ`
    pub fn mtime_utc(&self) -> String {
        fmt_utc_seconds(&self.mtime)
    }
}

/// Normalize a path relative to the source root: POSIX separators, NFC,
/// no leading `./`. Non-UTF-8 components are carried through lossily.
pub fn normalize_relpath(rel: &Path) -> String {
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|c| c != ".")
        .collect::<Vec<_>>()
        .join("/");
    joined.nfc().collect()
}

/// Render a UTC timestamp at second precision, no fractional digits
pub fn fmt_utc_seconds(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Convert a filesystem timestamp to UTC at second precision
pub fn mtime_from_metadata(meta: &Metadata) -> DateTime<Utc> {
    let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
    let secs = match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        // Pre-epoch mtimes clamp to zero
        Err(_) => 0,
    };
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

/// Permission bits from metadata
#[cfg(unix)]
pub fn mode_from_metadata(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
pub fn mode_from_metadata(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Numeric uid/gid from metadata
#[cfg(unix)]
pub fn owner_from_metadata(meta: &Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
pub fn owner_from_metadata(_meta: &Metadata) -> (u32, u32) {
    (0, 0)
}
