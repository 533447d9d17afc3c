//! End-to-end freeze and verification behavior
//!
//! Covers the properties the pipeline guarantees: deterministic output,
//! round-trip verification at all three levels, tamper detection, exclusion
//! correctness, and the ordering invariant.

use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use permafrost::{
    freeze, EntryKind, EnvironmentMetadata, EventMetadata, FreezeConfig, FreezeOutcome,
    FreezeRequest, Verifier,
};
use std::fs;
use std::io::Write;
use std::path::Path;

fn environment() -> EnvironmentMetadata {
    EnvironmentMetadata {
        hostname: "testhost".to_string(),
        username: "tester".to_string(),
        platform: "linux-x86_64".to_string(),
        tool_version: permafrost::VERSION.to_string(),
    }
}

fn request(source: &Path, dest: &Path, name: &str) -> FreezeRequest {
    FreezeRequest {
        source: source.to_path_buf(),
        destination: dest.to_path_buf(),
        archive_name: Some(name.to_string()),
        event: EventMetadata {
            milestone: Some("integration run".to_string()),
            notes: vec!["fixture tree".to_string()],
            contacts: vec![],
            timestamp: Some("2025-06-15T12:00:00Z".to_string()),
        },
        git: None,
        environment: environment(),
        created_utc: Utc.timestamp_opt(1_750_000_000, 0).single().unwrap(),
    }
}

/// a.txt (5 bytes), sub/b.log, sub/c.bin (1 MiB)
fn sample_tree(root: &Path) {
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), b"12345").unwrap();
    fs::write(root.join("sub/b.log"), b"log line").unwrap();
    let pattern: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
    fs::write(root.join("sub/c.bin"), pattern).unwrap();
}

fn freeze_sample(dir: &Path, dest_name: &str, config: &FreezeConfig) -> FreezeOutcome {
    let source = dir.join("proj");
    if !source.exists() {
        sample_tree(&source);
    }
    freeze(&request(&source, &dir.join(dest_name), "snap"), config).unwrap()
}

fn archive_member_names(archive: &Path) -> Vec<String> {
    let file = fs::File::open(archive).unwrap();
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn roundtrip_verifies_at_all_levels() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = freeze_sample(dir.path(), "out", &FreezeConfig::default());

    let verifier = Verifier::new(&outcome.archive_path, None).unwrap();
    let report = verifier.verify(true).unwrap();

    assert!(report.archive_ok);
    assert!(report.manifest_ok);
    let per_file = report.per_file.as_ref().unwrap();
    assert_eq!(per_file.checked, 3);
    assert!(per_file.mismatched.is_empty());
    assert!(report.overall);
}

#[test]
fn successive_freezes_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let first = freeze_sample(dir.path(), "one", &FreezeConfig::default());
    let second = freeze_sample(dir.path(), "two", &FreezeConfig::default());

    assert_eq!(
        fs::read(&first.archive_path).unwrap(),
        fs::read(&second.archive_path).unwrap()
    );
    assert_eq!(
        first.manifest.archive.sha256,
        second.manifest.archive.sha256
    );
    assert_eq!(
        fs::read(&first.manifest_path).unwrap(),
        fs::read(&second.manifest_path).unwrap()
    );
}

#[test]
fn exclusion_pattern_keeps_entry_out_of_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let config = FreezeConfig::default().with_excludes(["*.log".to_string()]);
    let outcome = freeze_sample(dir.path(), "out", &config);

    let files = &outcome.manifest.files;
    assert_eq!(files.total_count, 2);
    assert_eq!(files.total_size_bytes, 5 + 1_048_576);

    let entries = files.entries.as_ref().unwrap();
    assert!(entries.iter().all(|e| !e.path.ends_with("b.log")));
    assert_eq!(outcome.manifest.archive.member_counts.files, 2);

    let members = archive_member_names(&outcome.archive_path);
    assert!(members.iter().all(|m| !m.contains("b.log")));

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(true)
        .unwrap();
    assert!(report.overall);
}

#[test]
fn empty_source_freezes_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("empty");
    fs::create_dir_all(&source).unwrap();

    let outcome = freeze(
        &request(&source, &dir.path().join("out"), "snap"),
        &FreezeConfig::default(),
    )
    .unwrap();

    assert_eq!(outcome.manifest.files.total_count, 0);
    assert_eq!(outcome.manifest.archive.member_counts.files, 0);

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(true)
        .unwrap();
    assert!(report.overall);
    assert_eq!(report.per_file.unwrap().checked, 0);
}

#[cfg(unix)]
#[test]
fn symlink_recorded_with_verbatim_target_and_no_digest() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("proj");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("data.txt"), b"x").unwrap();
    std::os::unix::fs::symlink("../target", source.join("link")).unwrap();

    let outcome = freeze(
        &request(&source, &dir.path().join("out"), "snap"),
        &FreezeConfig::default(),
    )
    .unwrap();

    let entries = outcome.manifest.files.entries.as_ref().unwrap();
    let link = entries.iter().find(|e| e.path == "link").unwrap();
    assert_eq!(link.kind, EntryKind::Symlink);
    assert!(link.sha256.is_none());
    assert_eq!(link.link_target.as_deref(), Some("../target"));
    assert_eq!(outcome.manifest.archive.member_counts.symlinks, 1);

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(true)
        .unwrap();
    assert!(report.overall);
}

#[test]
fn flipped_archive_byte_fails_archive_level() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = freeze_sample(dir.path(), "out", &FreezeConfig::default());

    let mut bytes = fs::read(&outcome.archive_path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::OpenOptions::new()
        .write(true)
        .open(&outcome.archive_path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(false)
        .unwrap();

    assert!(!report.archive_ok);
    assert!(!report.overall);
    assert!(report
        .findings
        .iter()
        .any(|f| f.message.contains("archive digest mismatch")));
}

#[test]
fn edited_manifest_digest_fails_deep_for_exactly_that_path() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = freeze_sample(dir.path(), "out", &FreezeConfig::default());

    let text = fs::read_to_string(&outcome.manifest_path).unwrap();
    let entries = outcome.manifest.files.entries.as_ref().unwrap();
    let original = entries
        .iter()
        .find(|e| e.path == "a.txt")
        .unwrap()
        .sha256
        .clone()
        .unwrap();
    let forged = "0".repeat(64);
    fs::write(&outcome.manifest_path, text.replace(&original, &forged)).unwrap();

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(true)
        .unwrap();

    assert!(report.archive_ok);
    let per_file = report.per_file.unwrap();
    assert_eq!(per_file.mismatched, vec!["a.txt".to_string()]);
    assert!(!report.overall);
}

#[test]
fn manifest_order_is_lexicographic_and_matches_archive_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("proj");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::write(source.join("a.txt"), b"a").unwrap();
    fs::write(source.join("sub-x"), b"x").unwrap();
    fs::write(source.join("sub/b.txt"), b"b").unwrap();
    fs::write(source.join("zz"), b"z").unwrap();

    let outcome = freeze(
        &request(&source, &dir.path().join("out"), "snap"),
        &FreezeConfig::default(),
    )
    .unwrap();

    let manifest_paths: Vec<String> = outcome
        .manifest
        .files
        .entries
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| e.path.clone())
        .collect();

    for pair in manifest_paths.windows(2) {
        assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
    }

    let archive_paths: Vec<String> = archive_member_names(&outcome.archive_path)
        .into_iter()
        .filter_map(|m| {
            m.strip_prefix("proj/")
                .map(|r| r.trim_end_matches('/').to_string())
        })
        .collect();

    assert_eq!(manifest_paths, archive_paths);
}

#[test]
fn tampered_sha256_sidecar_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = freeze_sample(dir.path(), "out", &FreezeConfig::default());

    fs::write(
        &outcome.sha256_path,
        format!("{}  snap.tar.gz\n", "f".repeat(64)),
    )
    .unwrap();

    let report = Verifier::new(&outcome.archive_path, None)
        .unwrap()
        .verify(false)
        .unwrap();

    assert!(!report.archive_ok);
}

#[test]
fn embedded_yaml_manifest_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = freeze_sample(dir.path(), "out", &FreezeConfig::default());

    let file = fs::File::open(&outcome.archive_path).unwrap();
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut yaml = None;
    for member in tar.entries().unwrap() {
        let mut member = member.unwrap();
        if member.path().unwrap().to_string_lossy() == ".permafrost/MANIFEST.yaml" {
            let mut s = String::new();
            std::io::Read::read_to_string(&mut member, &mut s).unwrap();
            yaml = Some(s);
        }
    }

    let embedded = permafrost::Manifest::from_yaml(&yaml.unwrap()).unwrap();
    assert_eq!(embedded.files.total_count, outcome.manifest.files.total_count);
    // The embedded copy predates the final byte: no archive digest yet
    assert!(embedded.archive.sha256.is_none());
    assert_eq!(
        embedded.files.digest_map(),
        outcome.manifest.files.digest_map()
    );
}
