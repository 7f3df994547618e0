//! The staging area.
//!
//! An index collects pending additions and deletions between CLI
//! invocations. `write_files` snapshots the add-set (minus the delete-set),
//! hashes every file into the object store through the bounded hash pool,
//! and records the results in the processed map — at which point the index
//! is committable. `invalidate` clears the persisted state and poisons the
//! handle.
//!
//! The main index has the empty id; ephemeral side indexes get a six-hex
//! suffix and persist as `INDEX-<id>`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowError};
use crate::fsutil;
use crate::iocx::{self, IoContext};
use crate::model::tree::ProcessedFile;
use crate::odb::Odb;

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// The staging area. See the module docs.
#[derive(Debug)]
pub struct Index {
    id: String,
    add_set: BTreeSet<String>,
    delete_set: BTreeSet<String>,
    processed: BTreeMap<String, ProcessedFile>,
    written: bool,
    invalidated: bool,
}

/// Persisted shape (`commondir/INDEX[-<id>]`).
#[derive(Serialize, Deserialize)]
struct IndexWire {
    id: String,
    adds: BTreeSet<String>,
    deletes: BTreeSet<String>,
    processed: BTreeMap<String, ProcessedFile>,
    written: bool,
}

impl Index {
    /// The main index (empty id).
    #[must_use]
    pub fn main() -> Self {
        Self::with_id(String::new())
    }

    /// An ephemeral index with a random six-hex id.
    #[must_use]
    pub fn ephemeral() -> Self {
        let token: u32 = rand::rng().random_range(0..0x0100_0000);
        Self::with_id(format!("{token:06x}"))
    }

    fn with_id(id: String) -> Self {
        Self {
            id,
            add_set: BTreeSet::new(),
            delete_set: BTreeSet::new(),
            processed: BTreeMap::new(),
            written: false,
            invalidated: false,
        }
    }

    /// The index id (empty for the main index).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Paths pending addition.
    #[must_use]
    pub const fn adds(&self) -> &BTreeSet<String> {
        &self.add_set
    }

    /// Paths pending deletion.
    #[must_use]
    pub const fn deletes(&self) -> &BTreeSet<String> {
        &self.delete_set
    }

    /// The processed-added map built by [`write_files`](Self::write_files).
    #[must_use]
    pub const fn processed(&self) -> &BTreeMap<String, ProcessedFile> {
        &self.processed
    }

    /// Whether both staging sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add_set.is_empty() && self.delete_set.is_empty()
    }

    /// Whether [`write_files`](Self::write_files) has completed.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        self.written
    }

    /// Stage paths for addition. Absolute paths are relativized against the
    /// worktree; anything outside it is refused. A directory stages every
    /// non-ignored file beneath it.
    ///
    /// # Errors
    /// [`SnowError::WorktreeOutsideRepo`] for escaping paths.
    pub fn add_files<I, P>(&mut self, workdir: &Path, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.ensure_usable()?;
        let matcher = crate::ignore::IgnoreMatcher::for_worktree(workdir);
        for path in paths {
            let rel = self.relativize(workdir, path.as_ref())?;
            let abs = fsutil::rel_to_abs(workdir, &rel);
            if abs.is_dir() {
                let flags = fsutil::WalkFlags {
                    hidden: true,
                    ..fsutil::WalkFlags::FILES
                };
                for entry in fsutil::os_walk(&abs, flags)? {
                    let child = format!("{rel}/{}", entry.rel);
                    if !matcher.ignored(&child) {
                        self.add_set.insert(child);
                    }
                }
            } else {
                self.add_set.insert(rel);
            }
        }
        Ok(())
    }

    /// Stage paths for deletion.
    ///
    /// # Errors
    /// [`SnowError::WorktreeOutsideRepo`] for escaping paths.
    pub fn delete_files<I, P>(&mut self, workdir: &Path, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.ensure_usable()?;
        for path in paths {
            let rel = self.relativize(workdir, path.as_ref())?;
            self.delete_set.insert(rel);
        }
        Ok(())
    }

    fn relativize(&self, workdir: &Path, path: &Path) -> Result<String> {
        let rel = if path.is_absolute() {
            fsutil::relativize(workdir, path).ok_or_else(|| SnowError::WorktreeOutsideRepo {
                path: path.to_path_buf(),
            })?
        } else {
            fsutil::normalize(&path.to_string_lossy())
        };
        if rel.is_empty() || rel == ".." || rel.starts_with("../") {
            return Err(SnowError::WorktreeOutsideRepo {
                path: path.to_path_buf(),
            });
        }
        if let Err(c) = fsutil::validate_path_chars(&rel) {
            return Err(SnowError::Io(std::io::Error::other(format!(
                "path {rel:?} contains character {c:?} illegal on this filesystem"
            ))));
        }
        Ok(rel)
    }

    /// Hash the effective add-set into the object store and build the
    /// processed map. Paths that were also staged for deletion are skipped.
    ///
    /// Runs on the bounded hash pool; the first failure aborts the rest.
    /// May only run once per index lifetime.
    ///
    /// # Errors
    /// A second call, or any hash/store failure.
    pub fn write_files(&mut self, workdir: &Path, odb: &Odb, iocx: &IoContext) -> Result<()> {
        self.ensure_usable()?;
        if self.written {
            return Err(SnowError::Io(std::io::Error::other(
                "index already written: invalidate it before reuse",
            )));
        }

        let targets: Vec<String> = self
            .add_set
            .difference(&self.delete_set)
            .cloned()
            .collect();

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|rel| {
                let abs = fsutil::rel_to_abs(workdir, &rel);
                move || -> Result<(String, ProcessedFile)> {
                    let (blob, stats) = odb.write_object(&abs, iocx)?;
                    Ok((rel, crate::odb::processed_from_blob(&blob, stats)))
                }
            })
            .collect();

        let results = iocx::run_all(iocx::HASH_POOL_SIZE, tasks)?;
        self.processed = results.into_iter().collect();
        self.written = true;
        self.persist(odb)
    }

    /// Delete the persisted file and poison the handle.
    ///
    /// # Errors
    /// I/O errors removing the persisted file.
    pub fn invalidate(&mut self, odb: &Odb) -> Result<()> {
        let path = odb.index_path(&self.id);
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        self.add_set.clear();
        self.delete_set.clear();
        self.processed.clear();
        self.written = false;
        self.invalidated = true;
        Ok(())
    }

    /// Persist the staging state so it survives between CLI invocations.
    ///
    /// # Errors
    /// Serialization and I/O errors.
    pub fn persist(&self, odb: &Odb) -> Result<()> {
        let wire = IndexWire {
            id: self.id.clone(),
            adds: self.add_set.clone(),
            deletes: self.delete_set.clone(),
            processed: self.processed.clone(),
            written: self.written,
        };
        let json = serde_json::to_string_pretty(&wire)?;
        fsutil::write_safe_file(&odb.index_path(&self.id), json.as_bytes())?;
        Ok(())
    }

    /// Rehydrate every persisted index in the commondir.
    ///
    /// # Errors
    /// I/O and parse errors.
    pub fn load_all(odb: &Odb) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(odb.commondir())?.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name != "INDEX" && !name.starts_with("INDEX-") {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path())?;
            let wire: IndexWire = serde_json::from_str(&raw)?;
            out.push(Self {
                id: wire.id,
                add_set: wire.adds,
                delete_set: wire.deletes,
                processed: wire.processed,
                written: wire.written,
                invalidated: false,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.invalidated {
            return Err(SnowError::Io(std::io::Error::other(
                "index used after invalidation",
            )));
        }
        Ok(())
    }
}
