//! Streaming SHA-256 content digests
//!
//! All hashing is chunked so peak memory stays bounded regardless of file or
//! archive size. The reader adapter digests bytes as the archive builder
//! consumes them, so each source file is read exactly once; the writer
//! adapter digests the compressed output stream as it is written.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Chunk size for streaming reads
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Compute the SHA-256 digest of a file, reading in fixed-size chunks
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Compute the SHA-256 digest of everything a reader yields
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 digest of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reader adapter that digests bytes as they are consumed
pub struct HashingReader<R: Read> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        HashingReader {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Digest of everything read so far
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.bytes_read)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Writer adapter that digests bytes as they are written
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Digest and byte count of everything written, and the inner writer
    pub fn finalize(self) -> (String, u64, W) {
        (
            hex::encode(self.hasher.finalize()),
            self.bytes_written,
            self.inner,
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
