//! Error types for freeze and verification operations

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, PermafrostError>;

/// Errors raised by the freeze pipeline and the verifier
#[derive(Error, Debug)]
pub enum PermafrostError {
    /// Source directory does not exist
    #[error("Source path does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source path exists but is not a directory
    #[error("Source path is not a directory: {}", .0.display())]
    SourceNotADirectory(PathBuf),

    /// Destination cannot be used for output
    #[error("Invalid destination {}: {}", .path.display(), .reason)]
    DestinationInvalid { path: PathBuf, reason: String },

    /// Refusing to overwrite an existing archive
    #[error("Archive already exists: {}", .0.display())]
    ArchiveExists(PathBuf),

    /// Archive file missing at verification time
    #[error("Archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// Sidecar manifest missing at verification time
    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// Manifest failed structural validation
    #[error("Manifest validation failed: {0}")]
    ManifestInvalid(String),

    /// Gzip level outside the supported range
    #[error("Compression level must be 1-9, got {0}")]
    InvalidCompressionLevel(u32),

    /// Exclusion pattern did not compile
    #[error("Invalid exclude pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Strict mode: the scan reported per-entry failures
    #[error("Scan failed for {0} entries (strict mode)")]
    ScanIncomplete(usize),

    /// Reading a source file failed after its archive member was started
    #[error("Cannot archive {path}: {reason}")]
    EntryUnreadable { path: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding or decoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
