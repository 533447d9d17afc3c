//! # Permafrost - Immutable Snapshot Archives with Provenance
//!
//! `permafrost` freezes a directory tree into a single deterministic
//! `tar.gz` archive annotated with structured provenance metadata, and
//! verifies the result at three independent levels without extracting it.
//!
//! ## Features
//!
//! - **Deterministic archives**: identical inputs and configuration produce
//!   byte-identical output (pinned gzip header, fixed member order)
//! - **SHA-256 everywhere**: per-file content digests, a whole-archive
//!   digest, and a digest of the tabular listing for very large trees
//! - **Dual-encoded manifest**: machine JSON sidecar plus a human YAML copy
//!   embedded in the archive, rendered from one structure
//! - **Exclusion rules**: glob patterns, version-control directory defaults,
//!   optional root `.gitignore` patterns
//! - **Three-level verification**: archive digest, manifest structure,
//!   and optional per-file deep checking - streaming, no extraction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use permafrost::{
//!     freeze, EnvironmentMetadata, EventMetadata, FreezeConfig, FreezeRequest, Verifier,
//! };
//!
//! # fn main() -> permafrost::Result<()> {
//! let request = FreezeRequest {
//!     source: "/data/project".into(),
//!     destination: "/archives".into(),
//!     archive_name: Some("project-v1".into()),
//!     event: EventMetadata {
//!         milestone: Some("v1.0 release".into()),
//!         ..Default::default()
//!     },
//!     git: None,
//!     environment: EnvironmentMetadata {
//!         hostname: "host".into(),
//!         username: "user".into(),
//!         platform: "linux-x86_64".into(),
//!         tool_version: permafrost::VERSION.into(),
//!     },
//!     created_utc: Utc::now(),
//! };
//!
//! let outcome = freeze(&request, &FreezeConfig::default())?;
//! println!("archive: {}", outcome.archive_path.display());
//!
//! let verifier = Verifier::new(&outcome.archive_path, None)?;
//! let report = verifier.verify(true)?;
//! assert!(report.overall);
//! # Ok(())
//! # }
//! ```
//!
//! ## Bundle Layout
//!
//! ```text
//! {name}.tar.gz            primary archive
//! {name}.sha256            archive digest, one line
//! {name}.MANIFEST.json     machine manifest (authoritative digests)
//!
//! inside the archive:
//!   .permafrost/MANIFEST.yaml    human manifest copy
//!   .permafrost/SUMMARY.md       generated summary
//!   .permafrost/FILELIST.csv.gz  tabular listing (large trees only)
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod meta;

// Re-export the types one freeze or verify needs
pub use crate::config::{FreezeConfig, DEFAULT_COMPRESSION_LEVEL, DEFAULT_FILELIST_THRESHOLD};
pub use crate::core::builder::{ArchiveBuilder, ArchiveStats, METADATA_DIR};
pub use crate::core::entry::{EntryKind, SourceEntry};
pub use crate::core::freeze::{freeze, FreezeOutcome, FreezeRequest};
pub use crate::core::hasher::{hash_bytes, hash_file, hash_reader};
pub use crate::core::manifest::{
    format_size, ArchiveRecord, FileEntry, FileSection, Manifest, MemberCounts,
};
pub use crate::core::scanner::{Scan, ScanError, ScanSummary, Scanner};
pub use crate::core::verifier::{
    PerFileReport, VerificationReport, Verifier, VerifyFinding, VerifyLevel,
};
pub use crate::error::{PermafrostError, Result};
pub use crate::meta::{EnvironmentMetadata, EventMetadata, GitMetadata, SourceMetadata};

/// Tool version recorded in manifests
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
