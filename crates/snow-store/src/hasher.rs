//! Streaming file hashing.
//!
//! Files are read through a 4 MiB buffer and fed to SHA-256. For files up to
//! [`BLOCK_HASH_LIMIT`] a table of per-window block hashes is produced
//! alongside the whole-file fingerprint; the status computation uses the
//! first block as a cheap modification screen before concluding that a file
//! with a changed mtime actually changed content.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::hash::Hash;

/// Read-buffer and block-window size: 4 MiB.
pub const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

const BLOCK_SIZE_BYTES: usize = BLOCK_SIZE as usize;

/// Files larger than this (20 MiB) get no block-hash table; partial-hash
/// modification detection falls back to size/mtime comparison for them.
pub const BLOCK_HASH_LIMIT: u64 = 20 * 1024 * 1024;

// ---------------------------------------------------------------------------
// HashBlock
// ---------------------------------------------------------------------------

/// One fixed-size window of a file and its fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashBlock {
    /// Byte offset of the first byte of the window.
    pub start: u64,
    /// Byte offset one past the last byte of the window.
    pub end: u64,
    /// SHA-256 of the window's bytes.
    pub hash: Hash,
}

/// Result of hashing a file: the whole-file fingerprint plus the optional
/// block table.
#[derive(Clone, Debug)]
pub struct FileHash {
    /// SHA-256 over the entire file content.
    pub filehash: Hash,
    /// Per-window hashes; `None` for files larger than [`BLOCK_HASH_LIMIT`].
    pub blocks: Option<Vec<HashBlock>>,
}

// ---------------------------------------------------------------------------
// Hashing entry points
// ---------------------------------------------------------------------------

/// Hash a file, producing the whole-file fingerprint and, for files up to
/// [`BLOCK_HASH_LIMIT`], the block table.
///
/// # Errors
/// Returns [`StoreError::Io`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<FileHash, StoreError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let want_blocks = size <= BLOCK_HASH_LIMIT;

    let mut reader = BufReader::with_capacity(BLOCK_SIZE_BYTES, file);
    let mut whole = Sha256::new();
    let mut blocks = Vec::new();

    let mut buf = vec![0u8; BLOCK_SIZE_BYTES];
    let mut offset: u64 = 0;
    loop {
        let n = read_full(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        whole.update(chunk);
        if want_blocks {
            let mut block = Sha256::new();
            block.update(chunk);
            blocks.push(HashBlock {
                start: offset,
                end: offset + n as u64,
                hash: Hash::from_bytes(block.finalize().into()),
            });
        }
        offset += n as u64;
        if n < BLOCK_SIZE_BYTES {
            break;
        }
    }

    Ok(FileHash {
        filehash: Hash::from_bytes(whole.finalize().into()),
        blocks: want_blocks.then_some(blocks),
    })
}

/// Hash only the first block of a file.
///
/// Used as a fast modification screen: when a file's size is unchanged but
/// its mtime differs, comparing the first-block hash against the stored
/// block table decides whether the content actually changed.
///
/// # Errors
/// Returns [`StoreError::Io`] if the file cannot be opened or read.
pub fn part_hash(path: &Path) -> Result<Hash, StoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BLOCK_SIZE_BYTES, file);
    let mut buf = vec![0u8; BLOCK_SIZE_BYTES];
    let n = read_full(&mut reader, &mut buf)?;
    let mut digest = Sha256::new();
    digest.update(&buf[..n]);
    Ok(Hash::from_bytes(digest.finalize().into()))
}

/// Hash an in-memory byte slice. Used for directory fingerprints (hash of
/// concatenated child fingerprints) and commit identities.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut digest = Sha256::new();
    digest.update(bytes);
    Hash::from_bytes(digest.finalize().into())
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
