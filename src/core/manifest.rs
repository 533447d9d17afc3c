//! Archive manifest: provenance, contents, and dual rendering
//!
//! One in-memory structure, two equivalent renderings: machine JSON written
//! as a sidecar next to the archive, and human YAML embedded inside the
//! archive's metadata directory. For large trees the per-file table moves to
//! a compressed tabular listing and the manifest keeps only that table's
//! digest plus a reference.
//!
//! The archive's own digest cannot appear in bytes the digest covers, so the
//! embedded rendering carries `archive.sha256`/`size_bytes` as null; the
//! sidecar, written after the stream is flushed, holds the final values.

use crate::core::entry::{EntryKind, SourceEntry};
use crate::core::hasher;
use crate::error::{PermafrostError, Result};
use crate::meta::{EnvironmentMetadata, EventMetadata, GitMetadata, SourceMetadata};
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Manifest schema version
pub const MANIFEST_VERSION: &str = "1.0";

/// Embedded manifest file name (inside the metadata directory)
pub const MANIFEST_YAML: &str = "MANIFEST.yaml";

/// Embedded human summary file name
pub const SUMMARY_MD: &str = "SUMMARY.md";

/// Embedded tabular listing file name
pub const FILELIST_NAME: &str = "FILELIST.csv.gz";

/// Tabular listing column order
pub const FILELIST_COLUMNS: &[&str] = &[
    "relpath",
    "type",
    "size_bytes",
    "mode_octal",
    "uid",
    "gid",
    "mtime_utc",
    "sha256",
    "link_target",
    "is_executable",
    "ext",
];

/// Archive member counts by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCounts {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    #[serde(default)]
    pub other: u64,
}

/// Facts about the archive stream itself
///
/// `size_bytes` and `sha256` stay null until the last byte is written; the
/// embedded manifest copy is rendered before that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Archive file name
    pub path: String,

    /// Size on disk, known only after the stream is flushed
    pub size_bytes: Option<u64>,

    /// SHA-256 of the bytes on disk, known only after the stream is flushed
    pub sha256: Option<String>,

    /// Gzip compression level used
    pub compression_level: u32,

    /// Member counts by kind
    pub member_counts: MemberCounts,
}

/// One entry record in the manifest's file table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path from the source root
    pub path: String,

    /// Entry kind
    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// Size in bytes (absent for non-files)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Permission bits, zero-padded octal string
    pub mode: String,

    /// Numeric owner
    pub uid: u32,

    /// Numeric group
    pub gid: u32,

    /// Modification time, UTC, second precision
    pub mtime_utc: String,

    /// Content digest (files only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Symlink target (symlinks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl FileEntry {
    /// Join a scanned entry with its content digest
    pub fn from_source(entry: &SourceEntry, sha256: Option<String>) -> Self {
        FileEntry {
            path: entry.relpath.clone(),
            kind: entry.kind,
            size: (entry.kind == EntryKind::File).then_some(entry.size),
            mode: entry.mode_octal(),
            uid: entry.uid,
            gid: entry.gid,
            mtime_utc: entry.mtime_utc(),
            sha256,
            link_target: entry.link_target.clone(),
        }
    }

    /// Whether any execute bit is set
    pub fn is_executable(&self) -> bool {
        u32::from_str_radix(&self.mode, 8)
            .map(|m| m & 0o111 != 0)
            .unwrap_or(false)
    }

    /// Lowercase extension (files only)
    pub fn extension(&self) -> String {
        if self.kind != EntryKind::File {
            return String::new();
        }
        std::path::Path::new(&self.path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Reference to the external tabular listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilelistReference {
    /// Path of the listing inside the archive
    pub path: String,

    /// SHA-256 of the compressed listing bytes
    pub sha256: String,

    /// Number of data rows
    pub rows: u64,
}

/// The manifest's file table: inline records or an external reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSection {
    /// Number of regular files
    pub total_count: u64,

    /// Sum of regular file sizes in bytes
    pub total_size_bytes: u64,

    /// Inline entry records, archive order (small trees)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<FileEntry>>,

    /// External listing reference (large trees)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<FilelistReference>,
}

impl FileSection {
    /// Per-file digest lookup from the inline records
    pub fn digest_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(entries) = &self.entries {
            for entry in entries {
                if let Some(sha) = &entry.sha256 {
                    map.insert(entry.path.clone(), sha.clone());
                }
            }
        }
        map
    }
}

/// Complete archive manifest
///
/// Assembled once, after the archive builder has consumed the entry
/// sequence; the digest fields are completed when the stream is flushed and
/// the structure is not touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest schema version
    pub manifest_version: String,

    /// Creation timestamp (UTC, second precision), supplied by the caller
    pub created_utc: String,

    /// Source tree identity and normalization rules
    pub source: SourceMetadata,

    /// Event context
    pub event: EventMetadata,

    /// Version-control state, when the caller supplied one
    pub git: Option<GitMetadata>,

    /// Host and tool context
    pub environment: EnvironmentMetadata,

    /// Archive stream facts
    pub archive: ArchiveRecord,

    /// Per-file table
    pub files: FileSection,
}

impl Manifest {
    /// Complete the archive record once the stream has been flushed
    pub fn with_archive_digest(mut self, sha256: String, size_bytes: u64) -> Self {
        self.archive.sha256 = Some(sha256);
        self.archive.size_bytes = Some(size_bytes);
        self
    }

    /// Machine rendering: pretty JSON, trailing newline
    pub fn to_json(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    /// Human rendering: YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse the machine rendering
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse the human rendering
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Structural validation
    ///
    /// Checks the fields a verifier depends on: version, digest formats,
    /// exactly one file-table form, and count consistency.
    pub fn validate(&self) -> Result<()> {
        if self.manifest_version != MANIFEST_VERSION {
            return Err(PermafrostError::ManifestInvalid(format!(
                "unsupported manifest version: {}",
                self.manifest_version
            )));
        }

        if let Some(sha) = &self.archive.sha256 {
            validate_sha256(sha, "archive.sha256")?;
        }

        match (&self.files.entries, &self.files.external_reference) {
            (Some(_), Some(_)) => {
                return Err(PermafrostError::ManifestInvalid(
                    "files table has both inline entries and an external reference".to_string(),
                ));
            }
            (None, None) => {
                return Err(PermafrostError::ManifestInvalid(
                    "files table has neither inline entries nor an external reference".to_string(),
                ));
            }
            (Some(entries), None) => {
                let mut file_count = 0u64;
                let mut file_bytes = 0u64;
                for entry in entries {
                    if entry.kind == EntryKind::File {
                        file_count += 1;
                        file_bytes += entry.size.unwrap_or(0);
                        match &entry.sha256 {
                            Some(sha) => validate_sha256(sha, &entry.path)?,
                            None => {
                                return Err(PermafrostError::ManifestInvalid(format!(
                                    "file entry without digest: {}",
                                    entry.path
                                )));
                            }
                        }
                    } else if entry.sha256.is_some() {
                        return Err(PermafrostError::ManifestInvalid(format!(
                            "non-file entry with digest: {}",
                            entry.path
                        )));
                    }
                }
                if file_count != self.files.total_count {
                    return Err(PermafrostError::ManifestInvalid(format!(
                        "total_count is {} but the table lists {} files",
                        self.files.total_count, file_count
                    )));
                }
                if file_bytes != self.files.total_size_bytes {
                    return Err(PermafrostError::ManifestInvalid(format!(
                        "total_size_bytes is {} but the table sums to {}",
                        self.files.total_size_bytes, file_bytes
                    )));
                }
                if self.archive.member_counts.files != file_count {
                    return Err(PermafrostError::ManifestInvalid(format!(
                        "member_counts.files is {} but the table lists {}",
                        self.archive.member_counts.files, file_count
                    )));
                }
                for pair in entries.windows(2) {
                    if pair[0].path >= pair[1].path {
                        return Err(PermafrostError::ManifestInvalid(format!(
                            "file table out of order at {}",
                            pair[1].path
                        )));
                    }
                }
            }
            (None, Some(reference)) => {
                validate_sha256(&reference.sha256, "files.external_reference.sha256")?;
            }
        }

        Ok(())
    }
}

fn validate_sha256(value: &str, field: &str) -> Result<()> {
    let ok = value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit());
    if !ok {
        return Err(PermafrostError::ManifestInvalid(format!(
            "{field}: not a SHA-256 hex digest"
        )));
    }
    Ok(())
}

/// Render the tabular listing as CSV bytes
///
/// Header row first, then one row per entry in archive order. Line endings
/// are `\n` regardless of host platform; booleans are `0`/`1`; absent values
/// are empty strings.
pub fn render_filelist(entries: &[FileEntry]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&FILELIST_COLUMNS.join(","));
    out.push('\n');
    for entry in entries {
        let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
        let row = [
            csv_field(&entry.path),
            csv_field(entry.kind.as_str()),
            size,
            entry.mode.clone(),
            entry.uid.to_string(),
            entry.gid.to_string(),
            entry.mtime_utc.clone(),
            entry.sha256.clone().unwrap_or_default(),
            csv_field(entry.link_target.as_deref().unwrap_or_default()),
            if entry.is_executable() { "1" } else { "0" }.to_string(),
            entry.extension(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

/// Gzip the CSV listing with a pinned header so the bytes are reproducible
pub fn compress_filelist(csv: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(Vec::new(), Compression::new(level));
    encoder.write_all(csv)?;
    Ok(encoder.finish()?)
}

/// Parse the compressed tabular listing back into rows
pub fn parse_filelist(compressed: &[u8]) -> Result<Vec<FilelistRow>> {
    let mut csv = String::new();
    flate2::read::GzDecoder::new(compressed).read_to_string(&mut csv)?;

    let mut rows = Vec::new();
    let mut lines = csv.lines();
    let header = lines.next().unwrap_or_default();
    if header != FILELIST_COLUMNS.join(",") {
        return Err(PermafrostError::ManifestInvalid(
            "file listing has an unexpected header row".to_string(),
        ));
    }
    for (i, line) in lines.enumerate() {
        let fields = parse_csv_line(line);
        if fields.len() != FILELIST_COLUMNS.len() {
            return Err(PermafrostError::ManifestInvalid(format!(
                "file listing row {} has {} fields",
                i + 1,
                fields.len()
            )));
        }
        rows.push(FilelistRow {
            relpath: fields[0].clone(),
            kind: fields[1].clone(),
            size_bytes: fields[2].parse().ok(),
            sha256: fields[7].clone(),
            link_target: fields[8].clone(),
        });
    }
    Ok(rows)
}

/// One parsed listing row (the columns verification needs)
#[derive(Debug, Clone)]
pub struct FilelistRow {
    pub relpath: String,
    pub kind: String,
    pub size_bytes: Option<u64>,
    pub sha256: String,
    pub link_target: String,
}

/// Quote a CSV field only when it needs it
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split one CSV line honoring quoted fields
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if current.is_empty() => quoted = true,
            ',' if !quoted => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Render the embedded human summary
pub fn render_summary(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", manifest.archive.path));
    out.push_str(&format!("- Created: {}\n", manifest.created_utc));
    out.push_str(&format!(
        "- Source: {} ({})\n",
        manifest.source.root, manifest.source.name
    ));
    out.push_str(&format!(
        "- Compression: gzip level {}\n",
        manifest.archive.compression_level
    ));

    let event = &manifest.event;
    if event.milestone.is_some() || !event.notes.is_empty() || !event.contacts.is_empty() {
        out.push_str("\n## Event\n\n");
        if let Some(milestone) = &event.milestone {
            out.push_str(&format!("- Milestone: {milestone}\n"));
        }
        if let Some(ts) = &event.timestamp {
            out.push_str(&format!("- Timestamp: {ts}\n"));
        }
        for note in &event.notes {
            out.push_str(&format!("- Note: {note}\n"));
        }
        for contact in &event.contacts {
            out.push_str(&format!("- Contact: {contact}\n"));
        }
    }

    let counts = &manifest.archive.member_counts;
    out.push_str("\n## Contents\n\n");
    out.push_str(&format!(
        "- {} files, {} directories, {} symlinks",
        counts.files, counts.dirs, counts.symlinks
    ));
    if counts.other > 0 {
        out.push_str(&format!(", {} other", counts.other));
    }
    out.push('\n');
    out.push_str(&format!(
        "- Total file size: {}\n",
        format_size(manifest.files.total_size_bytes)
    ));

    out.push_str("\n## Environment\n\n");
    let env = &manifest.environment;
    out.push_str(&format!(
        "- {}@{} ({})\n- Tool version: {}\n",
        env.username, env.hostname, env.platform, env.tool_version
    ));

    if let Some(git) = &manifest.git {
        out.push_str("\n## Git\n\n");
        if let Some(branch) = &git.branch {
            out.push_str(&format!("- Branch: {branch}\n"));
        }
        if let Some(commit) = &git.commit {
            out.push_str(&format!("- Commit: {commit}\n"));
        }
        if let Some(remote) = &git.remote {
            out.push_str(&format!("- Remote: {remote}\n"));
        }
        out.push_str(&format!("- Dirty: {}\n", git.is_dirty));
    }

    out
}

/// Human-readable size ("1.5 GB", "42.3 MB")
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Digest of the compressed listing bytes, for the manifest reference
pub fn filelist_reference(compressed: &[u8], rows: u64) -> FilelistReference {
    FilelistReference {
        path: format!("{}/{}", crate::core::builder::METADATA_DIR, FILELIST_NAME),
        sha256: hasher::hash_bytes(compressed),
        rows,
    }
}
