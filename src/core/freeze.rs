//! The freeze pipeline
//!
//! Scanner, hasher, and archive builder run in lock-step per entry, so
//! archive member order and manifest order are identical by construction.
//! Input validation happens before any output is created; a failure after
//! the stream opens removes the partial bundle so nothing half-written is
//! left claiming success.

use crate::config::FreezeConfig;
use crate::core::builder::ArchiveBuilder;
use crate::core::entry::fmt_utc_seconds;
use crate::core::manifest::{
    compress_filelist, filelist_reference, render_filelist, render_summary, ArchiveRecord,
    FileEntry, FileSection, Manifest, FILELIST_NAME, MANIFEST_VERSION, MANIFEST_YAML, SUMMARY_MD,
};
use crate::core::scanner::{ScanError, Scanner};
use crate::error::{PermafrostError, Result};
use crate::meta::{
    EnvironmentMetadata, EventMetadata, GitMetadata, NormalizationInfo, SourceMetadata,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything one freeze needs besides the configuration
///
/// The event, git, and environment blocks are opaque inputs here; the
/// pipeline records them without inspecting them.
#[derive(Debug, Clone)]
pub struct FreezeRequest {
    /// Directory to snapshot
    pub source: PathBuf,

    /// Directory receiving the bundle
    pub destination: PathBuf,

    /// Archive base name; defaults to `<source>_<date>` when absent
    pub archive_name: Option<String>,

    /// Event context
    pub event: EventMetadata,

    /// Version-control state, if the caller collected one
    pub git: Option<GitMetadata>,

    /// Host and tool context
    pub environment: EnvironmentMetadata,

    /// Creation timestamp recorded in the manifest. Supplied by the caller
    /// so identical inputs can produce identical bytes.
    pub created_utc: DateTime<Utc>,
}

/// Paths and manifest of a completed freeze
#[derive(Debug)]
pub struct FreezeOutcome {
    pub archive_path: PathBuf,
    pub sha256_path: PathBuf,
    pub manifest_path: PathBuf,
    /// The completed manifest, digests included
    pub manifest: Manifest,
    /// Per-entry scan failures (empty in strict mode)
    pub scan_errors: Vec<ScanError>,
}

/// Produce one immutable archive bundle from a source tree
pub fn freeze(request: &FreezeRequest, config: &FreezeConfig) -> Result<FreezeOutcome> {
    config.validate()?;

    let scanner = Scanner::new(&request.source, config)?;
    let source_root = scanner.root().to_path_buf();
    let source_name = source_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());

    let destination = prepare_destination(&request.destination)?;

    let base = match &request.archive_name {
        Some(name) => name.strip_suffix(".tar.gz").unwrap_or(name).to_string(),
        None => format!("{}_{}", source_name, request.created_utc.format("%Y-%m-%d")),
    };
    let archive_filename = format!("{base}.tar.gz");
    let archive_path = destination.join(&archive_filename);
    let sha256_path = destination.join(format!("{base}.sha256"));
    let manifest_path = destination.join(format!("{base}.MANIFEST.json"));

    if archive_path.exists() {
        return Err(PermafrostError::ArchiveExists(archive_path));
    }

    info!(source = %source_root.display(), archive = %archive_path.display(), "freeze starting");

    let scan = scanner.scan()?;
    if config.strict && !scan.errors.is_empty() {
        return Err(PermafrostError::ScanIncomplete(scan.errors.len()));
    }
    for error in &scan.errors {
        warn!("skipped during scan: {error}");
    }

    let result = build_bundle(
        request,
        config,
        &source_root,
        &source_name,
        &archive_filename,
        &archive_path,
        &sha256_path,
        &manifest_path,
        &scan.entries,
    );

    match result {
        Ok(manifest) => {
            info!(
                files = manifest.archive.member_counts.files,
                bytes = manifest.archive.size_bytes.unwrap_or(0),
                "freeze complete"
            );
            Ok(FreezeOutcome {
                archive_path,
                sha256_path,
                manifest_path,
                manifest,
                scan_errors: scan.errors,
            })
        }
        Err(e) => {
            // A half-written bundle must not look like a finished one
            for path in [&archive_path, &sha256_path, &manifest_path] {
                if path.exists() {
                    let _ = fs::remove_file(path);
                }
            }
            Err(e)
        }
    }
}

/// Validate or create the destination directory
fn prepare_destination(destination: &Path) -> Result<PathBuf> {
    if destination.exists() {
        if !destination.is_dir() {
            return Err(PermafrostError::DestinationInvalid {
                path: destination.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
    } else {
        fs::create_dir_all(destination).map_err(|e| PermafrostError::DestinationInvalid {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    destination
        .canonicalize()
        .map_err(|e| PermafrostError::DestinationInvalid {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        })
}

#[allow(clippy::too_many_arguments)]
fn build_bundle(
    request: &FreezeRequest,
    config: &FreezeConfig,
    source_root: &Path,
    source_name: &str,
    archive_filename: &str,
    archive_path: &Path,
    sha256_path: &Path,
    manifest_path: &Path,
    entries: &[crate::core::entry::SourceEntry],
) -> Result<Manifest> {
    let mut builder = ArchiveBuilder::create(archive_path, source_name, config)?;

    let mut records = Vec::with_capacity(entries.len());
    let mut file_count = 0u64;
    let mut file_bytes = 0u64;
    for entry in entries {
        let digest = builder.append_entry(source_root, entry)?;
        if digest.is_some() {
            file_count += 1;
            file_bytes += entry.size;
        }
        records.push(FileEntry::from_source(entry, digest));
    }

    let use_external = records.len() > config.filelist_threshold;
    let mut filelist_bytes = None;
    let files = if use_external {
        let csv = render_filelist(&records);
        let compressed = compress_filelist(&csv, config.compression_level)?;
        let reference = filelist_reference(&compressed, records.len() as u64);
        filelist_bytes = Some(compressed);
        FileSection {
            total_count: file_count,
            total_size_bytes: file_bytes,
            entries: None,
            external_reference: Some(reference),
        }
    } else {
        FileSection {
            total_count: file_count,
            total_size_bytes: file_bytes,
            entries: Some(records),
            external_reference: None,
        }
    };

    let manifest = Manifest {
        manifest_version: MANIFEST_VERSION.to_string(),
        created_utc: fmt_utc_seconds(&request.created_utc),
        source: SourceMetadata {
            root: source_root.to_string_lossy().into_owned(),
            name: source_name.to_string(),
            normalization: NormalizationInfo::current(config.exclude_vcs),
        },
        event: request.event.clone(),
        git: request.git.clone(),
        environment: request.environment.clone(),
        archive: ArchiveRecord {
            path: archive_filename.to_string(),
            size_bytes: None,
            sha256: None,
            compression_level: config.compression_level,
            member_counts: builder.counts(),
        },
        files,
    };

    builder.append_metadata(MANIFEST_YAML, manifest.to_yaml()?.as_bytes())?;
    builder.append_metadata(SUMMARY_MD, render_summary(&manifest).as_bytes())?;
    if let Some(bytes) = &filelist_bytes {
        builder.append_metadata(FILELIST_NAME, bytes)?;
    }

    let stats = builder.finish()?;
    let manifest = manifest.with_archive_digest(stats.sha256.clone(), stats.size_bytes);

    fs::write(manifest_path, manifest.to_json()?)?;
    fs::write(
        sha256_path,
        format!("{}  {}\n", stats.sha256, archive_filename),
    )?;

    Ok(manifest)
}
