//! Multi-level archive verification
//!
//! Three independent checks: the archive's own digest, the manifest's
//! structural validity (including the tabular-listing digest when one is
//! referenced), and optionally every per-file content digest. Each level is
//! reported separately; any single failure fails the whole verification.
//! Everything streams through the archive's own structure; nothing is
//! extracted to disk.

use crate::core::builder::METADATA_DIR;
use crate::core::hasher;
use crate::core::manifest::{parse_filelist, Manifest, MANIFEST_YAML};
use crate::error::{PermafrostError, Result};
use flate2::read::GzDecoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which check produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyLevel {
    /// Whole-archive digest comparison
    Archive,
    /// Manifest structural validity
    Manifest,
    /// Per-file content digests
    File,
}

impl std::fmt::Display for VerifyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyLevel::Archive => f.write_str("archive"),
            VerifyLevel::Manifest => f.write_str("manifest"),
            VerifyLevel::File => f.write_str("file"),
        }
    }
}

/// One verification failure, tagged with its level
#[derive(Debug, Clone, Serialize)]
pub struct VerifyFinding {
    pub level: VerifyLevel,
    pub message: String,
}

impl std::fmt::Display for VerifyFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Deep-mode per-file results
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerFileReport {
    /// Entries whose digests were recomputed
    pub checked: u64,
    /// Exact relpaths that failed comparison
    pub mismatched: Vec<String>,
}

/// Outcome of one verification run
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub archive_ok: bool,
    pub manifest_ok: bool,
    /// Present only in deep mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_file: Option<PerFileReport>,
    pub overall: bool,
    pub findings: Vec<VerifyFinding>,
}

impl VerificationReport {
    fn finish(mut self) -> Self {
        let files_ok = self
            .per_file
            .as_ref()
            .map(|p| p.mismatched.is_empty())
            .unwrap_or(true)
            && !self.findings.iter().any(|f| f.level == VerifyLevel::File);
        self.overall = self.archive_ok && self.manifest_ok && files_ok;
        self
    }

    fn add(&mut self, level: VerifyLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            VerifyLevel::Archive => self.archive_ok = false,
            VerifyLevel::Manifest => self.manifest_ok = false,
            VerifyLevel::File => {}
        }
        self.findings.push(VerifyFinding { level, message });
    }
}

/// Archive + manifest verifier
pub struct Verifier {
    archive_path: PathBuf,
    manifest_path: PathBuf,
    sha256_path: PathBuf,
}

impl Verifier {
    /// Locate the archive and its sidecars
    ///
    /// Sidecar paths share the archive's stem: `{base}.tar.gz` sits next to
    /// `{base}.MANIFEST.json` and `{base}.sha256`. An explicit manifest path
    /// overrides the default.
    pub fn new(archive_path: &Path, manifest_path: Option<PathBuf>) -> Result<Self> {
        if !archive_path.is_file() {
            return Err(PermafrostError::ArchiveNotFound(archive_path.to_path_buf()));
        }
        let file_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = file_name
            .strip_suffix(".tar.gz")
            .unwrap_or(&file_name)
            .to_string();
        let parent = archive_path.parent().unwrap_or(Path::new("."));

        Ok(Verifier {
            archive_path: archive_path.to_path_buf(),
            manifest_path: manifest_path
                .unwrap_or_else(|| parent.join(format!("{base}.MANIFEST.json"))),
            sha256_path: parent.join(format!("{base}.sha256")),
        })
    }

    /// Sidecar manifest path in use
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Run the checks; `deep` adds the per-file level
    pub fn verify(&self, deep: bool) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            archive_ok: true,
            manifest_ok: true,
            per_file: None,
            overall: false,
            findings: Vec::new(),
        };

        if !self.manifest_path.is_file() {
            return Err(PermafrostError::ManifestNotFound(self.manifest_path.clone()));
        }
        let manifest_text = std::fs::read_to_string(&self.manifest_path)?;
        let manifest = match Manifest::from_json(&manifest_text) {
            Ok(m) => m,
            Err(e) => {
                report.add(VerifyLevel::Manifest, format!("manifest does not parse: {e}"));
                report.add(
                    VerifyLevel::Archive,
                    "no recorded digest available for comparison",
                );
                return Ok(report.finish());
            }
        };

        self.check_archive_digest(&manifest, &mut report)?;
        let listing = self.check_manifest(&manifest, &mut report)?;

        if deep {
            let per_file = self.check_files(&manifest, listing, &mut report)?;
            report.per_file = Some(per_file);
        }

        let report = report.finish();
        info!(
            archive_ok = report.archive_ok,
            manifest_ok = report.manifest_ok,
            overall = report.overall,
            "verification finished"
        );
        Ok(report)
    }

    /// Level 1: recompute the digest of the raw archive bytes
    fn check_archive_digest(
        &self,
        manifest: &Manifest,
        report: &mut VerificationReport,
    ) -> Result<()> {
        let actual = hasher::hash_file(&self.archive_path)?;
        debug!(digest = %actual, "archive digest recomputed");

        match &manifest.archive.sha256 {
            Some(expected) if *expected != actual => {
                report.add(
                    VerifyLevel::Archive,
                    format!("archive digest mismatch: recorded {expected}, computed {actual}"),
                );
            }
            Some(_) => {}
            None => {
                report.add(
                    VerifyLevel::Archive,
                    "manifest records no archive digest to compare against",
                );
            }
        }

        if let Some(size) = manifest.archive.size_bytes {
            let disk = std::fs::metadata(&self.archive_path)?.len();
            if disk != size {
                report.add(
                    VerifyLevel::Archive,
                    format!("archive size mismatch: recorded {size} bytes, found {disk}"),
                );
            }
        }

        if self.sha256_path.is_file() {
            let line = std::fs::read_to_string(&self.sha256_path)?;
            match line.split_whitespace().next() {
                Some(recorded) if recorded != actual => {
                    report.add(
                        VerifyLevel::Archive,
                        format!(
                            "{} disagrees with the archive bytes",
                            self.sha256_path.display()
                        ),
                    );
                }
                Some(_) => {}
                None => {
                    report.add(
                        VerifyLevel::Archive,
                        format!("{} is empty", self.sha256_path.display()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Level 2: structural validity, embedded copy, and listing digest
    ///
    /// Returns the parsed external listing rows when one is referenced, so
    /// the deep check does not read it twice.
    fn check_manifest(
        &self,
        manifest: &Manifest,
        report: &mut VerificationReport,
    ) -> Result<Option<Vec<crate::core::manifest::FilelistRow>>> {
        if let Err(e) = manifest.validate() {
            report.add(VerifyLevel::Manifest, e.to_string());
        }

        let yaml_member = format!("{METADATA_DIR}/{MANIFEST_YAML}");
        match self.read_member(&yaml_member) {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                match Manifest::from_yaml(&text) {
                    Ok(embedded) => {
                        if embedded.files.total_count != manifest.files.total_count {
                            report.add(
                                VerifyLevel::Manifest,
                                format!(
                                    "embedded manifest lists {} files, sidecar lists {}",
                                    embedded.files.total_count, manifest.files.total_count
                                ),
                            );
                        }
                    }
                    Err(e) => {
                        report.add(
                            VerifyLevel::Manifest,
                            format!("embedded manifest does not parse: {e}"),
                        );
                    }
                }
            }
            Ok(None) => {
                report.add(
                    VerifyLevel::Manifest,
                    format!("archive has no {yaml_member} member"),
                );
            }
            Err(e) => {
                report.add(
                    VerifyLevel::Manifest,
                    format!("cannot read the archive stream: {e}"),
                );
            }
        }

        let Some(reference) = &manifest.files.external_reference else {
            return Ok(None);
        };

        let bytes = match self.read_member(&reference.path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                report.add(
                    VerifyLevel::Manifest,
                    format!("referenced listing {} is not in the archive", reference.path),
                );
                return Ok(None);
            }
            Err(e) => {
                report.add(
                    VerifyLevel::Manifest,
                    format!("cannot read the archive stream: {e}"),
                );
                return Ok(None);
            }
        };

        let actual = hasher::hash_bytes(&bytes);
        if actual != reference.sha256 {
            report.add(
                VerifyLevel::Manifest,
                format!(
                    "listing digest mismatch for {}: recorded {}, computed {}",
                    reference.path, reference.sha256, actual
                ),
            );
            return Ok(None);
        }

        match parse_filelist(&bytes) {
            Ok(rows) => {
                if rows.len() as u64 != reference.rows {
                    report.add(
                        VerifyLevel::Manifest,
                        format!(
                            "listing row count mismatch: recorded {}, found {}",
                            reference.rows,
                            rows.len()
                        ),
                    );
                }
                let file_rows = rows.iter().filter(|r| r.kind == "file").count() as u64;
                if file_rows != manifest.files.total_count {
                    report.add(
                        VerifyLevel::Manifest,
                        format!(
                            "listing has {} file rows but total_count is {}",
                            file_rows, manifest.files.total_count
                        ),
                    );
                }
                Ok(Some(rows))
            }
            Err(e) => {
                report.add(VerifyLevel::Manifest, e.to_string());
                Ok(None)
            }
        }
    }

    /// Level 3: recompute every per-file content digest from archive bytes
    fn check_files(
        &self,
        manifest: &Manifest,
        listing: Option<Vec<crate::core::manifest::FilelistRow>>,
        report: &mut VerificationReport,
    ) -> Result<PerFileReport> {
        let mut expected: BTreeMap<String, String> = match listing {
            Some(rows) => rows
                .into_iter()
                .filter(|r| r.kind == "file")
                .map(|r| (r.relpath, r.sha256))
                .collect(),
            None => manifest.files.digest_map(),
        };

        let mut per_file = PerFileReport::default();
        let prefix = format!("{}/", manifest.source.name);

        let file = File::open(&self.archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let members = match archive.entries() {
            Ok(m) => m,
            Err(e) => {
                report.add(VerifyLevel::File, format!("unreadable archive stream: {e}"));
                return Ok(per_file);
            }
        };
        for member in members {
            let mut member = match member {
                Ok(m) => m,
                Err(e) => {
                    report.add(VerifyLevel::File, format!("unreadable archive member: {e}"));
                    break;
                }
            };
            if member.header().entry_type() != tar::EntryType::Regular {
                continue;
            }
            let path = match member.path() {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => {
                    report.add(VerifyLevel::File, format!("unreadable member path: {e}"));
                    break;
                }
            };
            let Some(rel) = path.strip_prefix(&prefix) else {
                continue;
            };
            let rel = rel.to_string();

            per_file.checked += 1;
            let actual = match hasher::hash_reader(&mut member) {
                Ok(d) => d,
                Err(e) => {
                    report.add(
                        VerifyLevel::File,
                        format!("cannot read {rel} from the archive: {e}"),
                    );
                    per_file.mismatched.push(rel);
                    break;
                }
            };
            match expected.remove(&rel) {
                Some(recorded) if recorded == actual => {}
                Some(recorded) => {
                    report.add(
                        VerifyLevel::File,
                        format!("content digest mismatch for {rel}: recorded {recorded}, computed {actual}"),
                    );
                    per_file.mismatched.push(rel);
                }
                None => {
                    report.add(
                        VerifyLevel::File,
                        format!("archive member {rel} is not in the manifest"),
                    );
                    per_file.mismatched.push(rel);
                }
            }
        }

        for (rel, _) in expected {
            report.add(
                VerifyLevel::File,
                format!("manifest entry {rel} is missing from the archive"),
            );
            per_file.mismatched.push(rel);
        }

        Ok(per_file)
    }

    /// Pull one named member's bytes out of the archive stream
    fn read_member(&self, member_path: &str) -> Result<Option<Vec<u8>>> {
        let file = File::open(&self.archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for member in archive.entries()? {
            let mut member = member?;
            let path = member.path()?.to_string_lossy().into_owned();
            if path == member_path {
                let mut bytes = Vec::new();
                member.read_to_end(&mut bytes)?;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}
