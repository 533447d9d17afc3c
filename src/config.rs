//! Freeze configuration
//!
//! One immutable record constructed up front and passed by reference into the
//! scanner and the archive builder. Nothing in the pipeline reads settings
//! from anywhere else.

use crate::error::{PermafrostError, Result};
use serde::{Deserialize, Serialize};

/// Default gzip compression level (1-9, where 9 is best compression)
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Entry count above which the per-file table moves out of the manifest
/// into a compressed tabular listing inside the archive
pub const DEFAULT_FILELIST_THRESHOLD: usize = 10_000;

/// Version-control directories excluded by default
pub const DEFAULT_VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".bzr", "CVS"];

/// Freeze pipeline configuration
///
/// Covers exclusion rules, compression, ownership handling, and the
/// inline-versus-external switch for the per-file listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeConfig {
    /// Gzip compression level (1-9)
    pub compression_level: u32,

    /// Glob patterns excluded from the scan; matched against the full
    /// relative path and against the bare file name
    pub exclude: Vec<String>,

    /// Exclude version-control directories (`.git`, `.hg`, ...)
    pub exclude_vcs: bool,

    /// Read exclusion patterns from the root `.gitignore`.
    /// Off by default: everything is included unless excluded explicitly.
    pub respect_ignore: bool,

    /// Preserve numeric uid/gid in archive member headers verbatim.
    /// When false, ownership is normalized to zero. Never a mix.
    pub preserve_owner: bool,

    /// Entry count above which the per-file table is written as
    /// `FILELIST.csv.gz` instead of inline manifest records
    pub filelist_threshold: usize,

    /// Abort the freeze when any entry cannot be scanned
    pub strict: bool,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        FreezeConfig {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            exclude: Vec::new(),
            exclude_vcs: true,
            respect_ignore: false,
            preserve_owner: true,
            filelist_threshold: DEFAULT_FILELIST_THRESHOLD,
            strict: false,
        }
    }
}

impl FreezeConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(PermafrostError::InvalidCompressionLevel(
                self.compression_level,
            ));
        }
        Ok(())
    }

    /// Set the compression level
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Add exclusion patterns
    pub fn with_excludes(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.exclude.extend(patterns);
        self
    }

    /// Normalize archive member ownership to uid/gid 0
    pub fn with_zeroed_owner(mut self) -> Self {
        self.preserve_owner = false;
        self
    }

    /// Set the inline-listing threshold
    pub fn with_filelist_threshold(mut self, threshold: usize) -> Self {
        self.filelist_threshold = threshold;
        self
    }

    /// Enable strict scanning
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FreezeConfig::default();
        assert_eq!(config.compression_level, 6);
        assert!(config.exclude_vcs);
        assert!(!config.respect_ignore);
        assert!(config.preserve_owner);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_compression_level() {
        let config = FreezeConfig::default().with_compression_level(0);
        assert!(config.validate().is_err());

        let config = FreezeConfig::default().with_compression_level(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_style() {
        let config = FreezeConfig::default()
            .with_compression_level(9)
            .with_excludes(["*.log".to_string()])
            .with_zeroed_owner()
            .strict();

        assert_eq!(config.compression_level, 9);
        assert_eq!(config.exclude, vec!["*.log"]);
        assert!(!config.preserve_owner);
        assert!(config.strict);
    }
}
