//! Single-pass deterministic tar.gz construction
//!
//! Members are written in exactly the order the entry sequence supplies;
//! nothing is re-sorted here. The gzip header timestamp is pinned to zero and
//! the OS byte fixed, so identical inputs with identical configuration
//! produce byte-identical output. The archive digest is folded over the
//! compressed byte stream as it is written and becomes valid only once the
//! stream is closed.

use crate::config::FreezeConfig;
use crate::core::entry::{EntryKind, SourceEntry};
use crate::core::hasher::{HashingReader, HashingWriter};
use crate::core::manifest::MemberCounts;
use crate::error::{PermafrostError, Result};
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{EntryType, Header};
use tracing::debug;

/// In-archive metadata directory
pub const METADATA_DIR: &str = ".permafrost";

/// Final facts about a flushed archive stream
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    /// SHA-256 of the bytes on disk
    pub sha256: String,
    /// Bytes written to the destination
    pub size_bytes: u64,
}

/// Streaming tar.gz builder
///
/// Owns the output stream and the running digest accumulator exclusively;
/// no other component writes to them. Memory stays bounded by one chunk
/// buffer regardless of tree size.
pub struct ArchiveBuilder {
    tar: tar::Builder<GzEncoder<HashingWriter<File>>>,
    arc_root: String,
    preserve_owner: bool,
    counts: MemberCounts,
}

impl ArchiveBuilder {
    /// Open the destination and set up the compressed, digested stream
    pub fn create(dest: &Path, arc_root: &str, config: &FreezeConfig) -> Result<Self> {
        config.validate()?;
        let file = File::create(dest)?;
        let hashing = HashingWriter::new(file);
        // Pinned gzip header fields keep the stream reproducible
        let encoder = GzBuilder::new()
            .mtime(0)
            .operating_system(255)
            .write(hashing, Compression::new(config.compression_level));
        let tar = tar::Builder::new(encoder);

        Ok(ArchiveBuilder {
            tar,
            arc_root: arc_root.to_string(),
            preserve_owner: config.preserve_owner,
            counts: MemberCounts::default(),
        })
    }

    /// Member counts written so far
    pub fn counts(&self) -> MemberCounts {
        self.counts.clone()
    }

    /// Write one entry's container record (and content, for files)
    ///
    /// Returns the content digest for regular files, computed from the same
    /// bytes the archive consumed; the file is read exactly once.
    pub fn append_entry(
        &mut self,
        source_root: &Path,
        entry: &SourceEntry,
    ) -> Result<Option<String>> {
        let arcpath = format!("{}/{}", self.arc_root, entry.relpath);
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode & 0o7777);
        let (uid, gid) = if self.preserve_owner {
            (entry.uid, entry.gid)
        } else {
            (0, 0)
        };
        header.set_uid(uid as u64);
        header.set_gid(gid as u64);
        header.set_mtime(entry.mtime.timestamp().max(0) as u64);

        debug!(path = %entry.relpath, kind = %entry.kind, "archiving");

        match entry.kind {
            EntryKind::File => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(entry.size);

                let abs = source_root.join(&entry.relpath);
                let file = File::open(&abs).map_err(|e| PermafrostError::EntryUnreadable {
                    path: entry.relpath.clone(),
                    reason: e.to_string(),
                })?;
                let mut reader = HashingReader::new(file.take(entry.size));
                self.tar.append_data(&mut header, &arcpath, &mut reader)?;

                let (digest, bytes_read) = reader.finalize();
                if bytes_read != entry.size {
                    return Err(PermafrostError::EntryUnreadable {
                        path: entry.relpath.clone(),
                        reason: format!(
                            "size changed during read: expected {} bytes, read {}",
                            entry.size, bytes_read
                        ),
                    });
                }
                self.counts.files += 1;
                Ok(Some(digest))
            }
            EntryKind::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                self.tar
                    .append_data(&mut header, format!("{arcpath}/"), std::io::empty())?;
                self.counts.dirs += 1;
                Ok(None)
            }
            EntryKind::Symlink => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                let target = entry.link_target.as_deref().unwrap_or_default();
                self.tar.append_link(&mut header, &arcpath, target)?;
                self.counts.symlinks += 1;
                Ok(None)
            }
            EntryKind::Other => {
                header.set_entry_type(EntryType::Fifo);
                header.set_size(0);
                self.tar
                    .append_data(&mut header, &arcpath, std::io::empty())?;
                self.counts.other += 1;
                Ok(None)
            }
        }
    }

    /// Append a generated metadata member under `.permafrost/`
    ///
    /// Header fields are fixed (mode 0644, ownership zero, mtime zero) so the
    /// archive tail is as reproducible as its body.
    pub fn append_metadata(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_size(data.len() as u64);
        self.tar
            .append_data(&mut header, format!("{METADATA_DIR}/{name}"), data)?;
        Ok(())
    }

    /// Flush and close the stream; the digest is valid from here on
    pub fn finish(self) -> Result<ArchiveStats> {
        let encoder = self.tar.into_inner()?;
        let hashing = encoder.finish()?;
        let (sha256, size_bytes, file) = hashing.finalize();
        file.sync_all()?;
        Ok(ArchiveStats { sha256, size_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entry::EntryKind;
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use std::io::Write;

    fn entry(relpath: &str, kind: EntryKind, size: u64, mode: u32) -> SourceEntry {
        SourceEntry {
            relpath: relpath.to_string(),
            kind,
            size,
            mode,
            uid: 1000,
            gid: 1000,
            mtime: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            link_target: None,
        }
    }

    fn build_sample(dir: &Path, dest: &Path, config: &FreezeConfig) -> ArchiveStats {
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::File::create(dir.join("a.txt"))
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        let mut builder = ArchiveBuilder::create(dest, "proj", config).unwrap();
        builder
            .append_entry(dir, &entry("a.txt", EntryKind::File, 5, 0o644))
            .unwrap();
        builder
            .append_entry(dir, &entry("sub", EntryKind::Dir, 0, 0o755))
            .unwrap();
        builder.append_metadata("NOTE.txt", b"generated").unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_member_order_and_types() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tar.gz");
        build_sample(dir.path(), &dest, &FreezeConfig::default());

        let file = std::fs::File::open(&dest).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["proj/a.txt", "proj/sub/", ".permafrost/NOTE.txt"]);
    }

    #[test]
    fn test_stats_match_disk_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tar.gz");
        let stats = build_sample(dir.path(), &dest, &FreezeConfig::default());

        let disk = std::fs::read(&dest).unwrap();
        assert_eq!(stats.size_bytes, disk.len() as u64);
        assert_eq!(stats.sha256, crate::core::hasher::hash_bytes(&disk));
    }

    #[test]
    fn test_repeated_builds_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let dest1 = dir.path().join("one.tar.gz");
        let dest2 = dir.path().join("two.tar.gz");
        let config = FreezeConfig::default();
        let s1 = build_sample(dir.path(), &dest1, &config);
        let s2 = build_sample(dir.path(), &dest2, &config);

        assert_eq!(
            std::fs::read(&dest1).unwrap(),
            std::fs::read(&dest2).unwrap()
        );
        assert_eq!(s1.sha256, s2.sha256);
    }

    #[test]
    fn test_compression_level_changes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest1 = dir.path().join("fast.tar.gz");
        let dest2 = dir.path().join("best.tar.gz");
        let s1 = build_sample(
            dir.path(),
            &dest1,
            &FreezeConfig::default().with_compression_level(1),
        );
        let s2 = build_sample(
            dir.path(),
            &dest2,
            &FreezeConfig::default().with_compression_level(9),
        );

        assert_ne!(s1.sha256, s2.sha256);
    }

    #[test]
    fn test_ownership_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("zeroed.tar.gz");
        let config = FreezeConfig::default().with_zeroed_owner();
        build_sample(dir.path(), &dest, &config);

        let file = std::fs::File::open(&dest).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for member in archive.entries().unwrap() {
            let member = member.unwrap();
            assert_eq!(member.header().uid().unwrap(), 0);
            assert_eq!(member.header().gid().unwrap(), 0);
        }
    }

    #[test]
    fn test_file_digest_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tar.gz");
        std::fs::File::create(dir.path().join("data.bin"))
            .unwrap()
            .write_all(b"digest me")
            .unwrap();

        let mut builder =
            ArchiveBuilder::create(&dest, "proj", &FreezeConfig::default()).unwrap();
        let digest = builder
            .append_entry(dir.path(), &entry("data.bin", EntryKind::File, 9, 0o644))
            .unwrap();
        builder.finish().unwrap();

        assert_eq!(
            digest.as_deref(),
            Some(crate::core::hasher::hash_bytes(b"digest me").as_str())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_member() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tar.gz");

        let mut link = entry("link", EntryKind::Symlink, 0, 0o777);
        link.link_target = Some("../target".to_string());

        let mut builder =
            ArchiveBuilder::create(&dest, "proj", &FreezeConfig::default()).unwrap();
        builder.append_entry(dir.path(), &link).unwrap();
        builder.finish().unwrap();

        let file = std::fs::File::open(&dest).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let member = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(member.header().entry_type(), EntryType::Symlink);
        assert_eq!(
            member.link_name().unwrap().unwrap().to_string_lossy(),
            "../target"
        );
    }
}
