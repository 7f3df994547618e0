//! Content-addressed blob store.
//!
//! Blobs live under `objects/XX/YY/<hash><ext>` where `XX`/`YY` are the first
//! two fan-out levels of the hex fingerprint and `ext` preserves the source
//! file's extension, so stored objects remain openable by the tools that
//! produced them (Photoshop, Blender, ...).
//!
//! # Write protocol
//!
//! [`BlobStore::write_blob`] copies the source into `objects/tmp/<random>`
//! first, hashes the *temp* copy, and only then renames it into place. Hashing
//! the temp rather than the original closes the window where the user edits
//! the file between hash and copy — whatever bytes were captured are exactly
//! the bytes that get addressed. Concurrent writers racing on the same
//! content are harmless: the rename target is content-addressed, so
//! "destination already exists" means another writer won with identical
//! bytes.
//!
//! # Sidecars
//!
//! For blobs up to [`BLOCK_HASH_LIMIT`](crate::hasher::BLOCK_HASH_LIMIT) a
//! `<object>.hblock` sidecar stores the per-window block hashes as
//! `start;end;hash;` lines. Status computation reads the first line to decide
//! whether a same-size, different-mtime file really changed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::Rng as _;

use crate::error::StoreError;
use crate::hash::Hash;
use crate::hasher::{self, HashBlock};

/// A file-copy primitive injected by the caller.
///
/// The store itself has no knowledge of mount tables or clone syscalls; the
/// I/O context of the calling crate decides whether a copy is an APFS clone,
/// a ReFS block clone, or a plain byte copy.
pub type CopyFn<'a> = &'a dyn Fn(&Path, &Path) -> std::io::Result<()>;

/// Result of writing a blob into the store.
#[derive(Clone, Debug)]
pub struct WrittenBlob {
    /// Whole-content fingerprint — the blob's address.
    pub hash: Hash,
    /// Size of the stored content in bytes.
    pub size: u64,
    /// Block table, when one was computed.
    pub blocks: Option<Vec<HashBlock>>,
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Handle to an `objects/` directory.
#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Absolute path of the `objects/` directory.
    root: PathBuf,
}

impl BlobStore {
    /// Open (and create if necessary) the store rooted at `objects_dir`.
    ///
    /// # Errors
    /// Fails if the directory or its `tmp/` scratch area cannot be created.
    pub fn open(objects_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(objects_dir.join("tmp"))?;
        Ok(Self {
            root: objects_dir.to_path_buf(),
        })
    }

    /// The `objects/` directory this store is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path a blob with this fingerprint and extension lives at.
    #[must_use]
    pub fn object_path(&self, hash: &Hash, ext: &str) -> PathBuf {
        self.root
            .join(hash.fanout_hi())
            .join(hash.fanout_lo())
            .join(format!("{hash}{ext}"))
    }

    /// Return `true` if a blob with this fingerprint and extension is stored.
    #[must_use]
    pub fn contains(&self, hash: &Hash, ext: &str) -> bool {
        self.object_path(hash, ext).is_file()
    }

    /// Return `true` if any stored object carries this fingerprint,
    /// regardless of extension.
    #[must_use]
    pub fn contains_hash(&self, hash: &Hash) -> bool {
        let dir = self.root.join(hash.fanout_hi()).join(hash.fanout_lo());
        let prefix = hash.to_hex();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries.flatten().any(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix) && !name.ends_with(".hblock"))
        })
    }

    /// Copy `src` into the store and return its fingerprint.
    ///
    /// See the module docs for the write protocol. `ext` is the extension to
    /// preserve on the stored object (including the leading dot, or empty).
    ///
    /// # Errors
    /// Fails on I/O errors other than the tolerated rename races.
    pub fn write_blob(
        &self,
        src: &Path,
        ext: &str,
        copy: CopyFn<'_>,
    ) -> Result<WrittenBlob, StoreError> {
        let tmp = self.tmp_path();
        copy(src, &tmp).map_err(|source| StoreError::Copy {
            path: src.to_path_buf(),
            source,
        })?;

        // Hash the temp copy, not the original: the user may still be editing
        // the original while we run.
        let hashed = hasher::hash_file(&tmp)?;
        let size = std::fs::metadata(&tmp)?.len();
        let dest = self.object_path(&hashed.filehash, ext);

        if dest.is_file() {
            // Another writer (or an earlier commit) already stored this
            // content. The temp copy is redundant.
            let _ = std::fs::remove_file(&tmp);
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            match std::fs::rename(&tmp, &dest) {
                Ok(()) => {}
                // A concurrent writer raced us and won; both copies carried
                // the same bytes, so losing the race is not an error.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let _ = std::fs::remove_file(&tmp);
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied && dest.is_file() => {
                    let _ = std::fs::remove_file(&tmp);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(blocks) = &hashed.blocks {
            // Sidecar write failures are tolerated: the sidecar only speeds
            // up modification detection.
            let _ = self.write_sidecar(&dest, blocks);
        }

        tracing::debug!(hash = %hashed.filehash, size, "stored blob");
        Ok(WrittenBlob {
            hash: hashed.filehash,
            size,
            blocks: hashed.blocks,
        })
    }

    /// Copy a stored blob out to `dst` and restore its modification time.
    ///
    /// The destination's parent directories are created as needed. Restoring
    /// the mtime keeps the next status computation from flagging the file as
    /// modified.
    ///
    /// # Errors
    /// [`StoreError::ObjectMissing`] if the fingerprint is not stored;
    /// otherwise I/O errors from the copy.
    pub fn read_blob(
        &self,
        hash: &Hash,
        ext: &str,
        dst: &Path,
        mtime_ms: i64,
        copy: CopyFn<'_>,
    ) -> Result<(), StoreError> {
        let src = self.object_path(hash, ext);
        if !src.is_file() {
            return Err(StoreError::ObjectMissing {
                hash: hash.to_hex(),
            });
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copy(&src, dst).map_err(|source| StoreError::Copy {
            path: src.clone(),
            source,
        })?;

        let mtime = filetime::FileTime::from_unix_time(
            mtime_ms.div_euclid(1000),
            u32::try_from(mtime_ms.rem_euclid(1000)).unwrap_or(0) * 1_000_000,
        );
        filetime::set_file_mtime(dst, mtime)?;
        Ok(())
    }

    /// Read the block table for a stored object, if a sidecar exists.
    ///
    /// # Errors
    /// [`StoreError::MalformedSidecar`] if the sidecar exists but cannot be
    /// parsed.
    pub fn read_blocks(&self, hash: &Hash, ext: &str) -> Result<Option<Vec<HashBlock>>, StoreError> {
        let path = sidecar_path(&self.object_path(hash, ext));
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut blocks = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split(';');
            let (start, end, hex) = (parts.next(), parts.next(), parts.next());
            let (Some(start), Some(end), Some(hex)) = (start, end, hex) else {
                return Err(StoreError::MalformedSidecar {
                    path,
                    reason: format!("expected 'start;end;hash;' got {line:?}"),
                });
            };
            let parse = |s: &str| {
                s.parse::<u64>().map_err(|e| StoreError::MalformedSidecar {
                    path: path.clone(),
                    reason: format!("bad offset {s:?}: {e}"),
                })
            };
            let block_hash: Hash = hex.parse().map_err(|e| StoreError::MalformedSidecar {
                path: path.clone(),
                reason: format!("{e}"),
            })?;
            blocks.push(HashBlock {
                start: parse(start)?,
                end: parse(end)?,
                hash: block_hash,
            });
        }
        Ok(Some(blocks))
    }

    fn write_sidecar(&self, object: &Path, blocks: &[HashBlock]) -> std::io::Result<()> {
        let mut out = String::new();
        for b in blocks {
            out.push_str(&format!("{};{};{};\n", b.start, b.end, b.hash));
        }
        std::fs::write(sidecar_path(object), out)
    }

    fn tmp_path(&self) -> PathBuf {
        let token: u64 = rand::rng().random();
        self.root.join("tmp").join(format!("{token:016x}"))
    }
}

fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".hblock");
    PathBuf::from(name)
}
