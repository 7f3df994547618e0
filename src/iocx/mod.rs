//! The I/O context: per-operation handle bundling the mount table, copy
//! primitive selection, access checking, trash dispatch, and the bounded
//! task pools.
//!
//! A context is acquired at the start of every bulk operation (commit,
//! checkout) and invalidated at the end on every exit path. Invalidations
//! poison the handle: further use is an error, which catches accidental
//! reuse of a stale mount snapshot.
//!
//! # Copy primitive selection
//!
//! 1. Source and destination on the same mount with a clone-capable
//!    filesystem (APFS, ReFS) → strict clone (`reflink`): the kernel shares
//!    blocks and the copy completes in constant time regardless of file
//!    size. Files under 1 MiB skip the strict attempt — the clone setup
//!    costs more than it saves.
//! 2. Everything else → reflink-hinted copy (`reflink_or_copy`): the kernel
//!    clones when it can and silently falls back to a byte copy.

pub mod access;
pub mod mounts;
pub mod pool;
pub mod trash;

use std::path::{Path, PathBuf};

pub use access::{AccessMode, LockedPath, perform_file_access_check};
pub use mounts::{FsFamily, MountPoint, MountTable};
pub use pool::{HASH_POOL_SIZE, RESTORE_POOL_SIZE, run_all};
pub use trash::TrashBin;

/// Below this size the strict clone attempt is skipped.
const SMALL_FILE_LIMIT: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// IoContext
// ---------------------------------------------------------------------------

/// Per-operation I/O handle. See the module docs.
#[derive(Debug)]
pub struct IoContext {
    mounts: MountTable,
    trash: TrashBin,
    invalidated: bool,
}

impl IoContext {
    /// Build a context: enumerate mounts and pick the platform trash helper.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mounts: MountTable::enumerate(),
            trash: TrashBin::platform_default(),
            invalidated: false,
        }
    }

    /// Build a context with an explicit trash dispatcher (embedders, tests).
    #[must_use]
    pub fn with_trash(trash: TrashBin) -> Self {
        Self {
            mounts: MountTable::enumerate(),
            trash,
            invalidated: false,
        }
    }

    /// Replace the mount table (test seam).
    #[must_use]
    pub fn with_mounts(mut self, mounts: MountTable) -> Self {
        self.mounts = mounts;
        self
    }

    /// Copy a single file using the fastest primitive for the path pair.
    ///
    /// An existing destination is replaced.
    ///
    /// # Errors
    /// I/O errors from the copy, or a poisoned-context error after
    /// [`invalidate`](Self::invalidate).
    pub fn copy_file(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        self.ensure_valid()?;

        // Clone primitives refuse existing destinations.
        match std::fs::remove_file(dst) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let family = self.mounts.family_of(src);
        if family.supports_clone() && self.mounts.same_mount(src, dst) {
            let size = std::fs::metadata(src)?.len();
            if size >= SMALL_FILE_LIMIT && reflink_copy::reflink(src, dst).is_ok() {
                tracing::trace!(?src, ?dst, ?family, "cloned");
                return Ok(());
            }
        }
        reflink_copy::reflink_or_copy(src, dst).map(|_| ())
    }

    /// A copy closure suitable for handing to the blob store.
    #[must_use]
    pub fn copier(&self) -> impl Fn(&Path, &Path) -> std::io::Result<()> {
        move |src: &Path, dst: &Path| self.copy_file(src, dst)
    }

    /// Verify access to `rel_paths` under `dir`; offenders are aggregated.
    #[must_use]
    pub fn perform_file_access_check(
        &self,
        dir: &Path,
        rel_paths: &[String],
        mode: AccessMode,
    ) -> Vec<LockedPath> {
        if self.invalidated {
            return Vec::new();
        }
        access::perform_file_access_check(dir, rel_paths, mode)
    }

    /// Move paths to the host trash.
    ///
    /// # Errors
    /// See [`TrashBin::put`].
    pub fn put_to_trash(&self, paths: &[PathBuf]) -> std::io::Result<()> {
        self.ensure_valid()?;
        self.trash.put(paths)
    }

    /// Release the context. Every later call through it fails.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Whether the context has been released.
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn ensure_valid(&self) -> std::io::Result<()> {
        if self.invalidated {
            return Err(std::io::Error::other(
                "I/O context used after invalidation",
            ));
        }
        Ok(())
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}
