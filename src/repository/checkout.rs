//! Checkout: make the worktree match a target commit.
//!
//! The worktree's status against the target is classified into tasks —
//! restore missing files, recreate missing directories, delete or trash
//! extraneous items — which then run through the bounded restore pool.
//!
//! Two ordering rules keep failures recoverable:
//!
//! - HEAD is written to disk *before* the first worktree mutation, so an
//!   interrupted checkout leaves a repository whose state is visible and
//!   fixable, never a silently inconsistent one.
//! - File access is checked up-front; files locked by other applications
//!   fail the whole operation before anything is touched.
//!
//! Deletion routes through the trash whenever the dying content's
//! fingerprint is not present in the object store — an in-place
//! `checkout HEAD` can never destroy unsaved work. When switching to a
//! different commit the delete is unconditional.

use std::collections::BTreeSet;
use std::ops::BitOr;
use std::path::PathBuf;

use snow_store::hasher;

use crate::error::{Result, SnowError};
use crate::fsutil;
use crate::index::Index;
use crate::iocx::{self, AccessMode, IoContext};
use crate::model::tree::{FlattenOpts, TreeEntry, TreeFile};
use crate::model::{Head, Reference};

use super::Repository;
use super::status::{StatusFilter, WtStatus};

// ---------------------------------------------------------------------------
// Reset flags
// ---------------------------------------------------------------------------

/// What a checkout is allowed to do to the worktree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetFlags(u32);

impl ResetFlags {
    /// Restore files the worktree is missing.
    pub const RESTORE_DELETED_ITEMS: Self = Self(1);
    /// Remove files the target does not track.
    pub const DELETE_NEW_ITEMS: Self = Self(1 << 1);
    /// Overwrite files whose content differs.
    pub const RESTORE_MODIFIED_ITEMS: Self = Self(1 << 2);

    /// Restore without destroying untracked work.
    pub const DEFAULT: Self =
        Self(Self::RESTORE_DELETED_ITEMS.0 | Self::RESTORE_MODIFIED_ITEMS.0);

    /// A full reset to the target's content.
    pub const ALL: Self = Self(
        Self::RESTORE_DELETED_ITEMS.0
            | Self::DELETE_NEW_ITEMS.0
            | Self::RESTORE_MODIFIED_ITEMS.0,
    );

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ResetFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Options for [`Repository::checkout`].
#[derive(Clone, Copy, Debug)]
pub struct CheckoutOptions {
    /// What to do to the worktree.
    pub reset: ResetFlags,
    /// Detach HEAD even when a branch names the target.
    pub detach: bool,
}

impl Default for CheckoutOptions {
    fn default() -> Self {
        Self {
            reset: ResetFlags::DEFAULT,
            detach: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

impl Repository {
    /// Check out `target` (commit hash, reference name, or commit-ish like
    /// `HEAD~1`).
    ///
    /// # Errors
    /// [`SnowError::InvalidCommitRef`] for unresolvable or ambiguous
    /// targets, [`SnowError::FilesLockedByOtherProcess`] when the pre-flight
    /// check finds locks, plus store and I/O errors.
    pub fn checkout(&mut self, target: &str, opts: CheckoutOptions) -> Result<()> {
        let mut iocx = IoContext::new();
        let outcome = self.checkout_inner(target, opts, &iocx);
        iocx.invalidate();
        outcome
    }

    /// Checkout with an embedder-supplied I/O context (test seam for trash).
    ///
    /// # Errors
    /// See [`checkout`](Self::checkout).
    pub fn checkout_with(&mut self, target: &str, opts: CheckoutOptions, iocx: &IoContext) -> Result<()> {
        self.checkout_inner(target, opts, iocx)
    }

    fn checkout_inner(
        &mut self,
        target: &str,
        opts: CheckoutOptions,
        iocx: &IoContext,
    ) -> Result<()> {
        let (target_hash, target_ref) = self.resolve_checkout_target(target, opts.detach)?;
        let target_commit = self.commit_by_hash(&target_hash)?.clone();
        let switching = self.head().is_none_or(|h| h.target != target_hash);

        let report = self.get_status(
            StatusFilter::NEW
                | StatusFilter::MODIFIED
                | StatusFilter::DELETED
                | StatusFilter::IGNORED
                | StatusFilter::DIRECTORIES
                | StatusFilter::SIZE_AND_HASH_SMALL_FILES,
            Some(&target_commit),
        )?;

        let target_files = target_commit.root.get_all_tree_files(FlattenOpts {
            entire_hierarchy: true,
            include_dirs: false,
        });

        // -- classify --------------------------------------------------------
        let mut restores: Vec<TreeFile> = Vec::new();
        let mut ensure_dirs: Vec<String> = Vec::new();
        let mut overwrite: Vec<TreeFile> = Vec::new();
        let mut delete_candidates: Vec<(String, bool)> = Vec::new();
        let mut delete_revoke_dirs: BTreeSet<String> = BTreeSet::new();

        for entry in &report {
            match entry.status {
                WtStatus::Deleted if entry.is_dir => {
                    ensure_dirs.push(entry.rel.clone());
                    for ancestor in fsutil::ancestors_rel(&entry.rel) {
                        delete_revoke_dirs.insert(ancestor);
                    }
                }
                WtStatus::Deleted => {
                    if opts.reset.contains(ResetFlags::RESTORE_DELETED_ITEMS)
                        && let Some(TreeEntry::File(f)) = target_files.get(&entry.rel)
                    {
                        restores.push((*f).clone());
                    }
                }
                WtStatus::New => {
                    if opts.reset.contains(ResetFlags::DELETE_NEW_ITEMS) {
                        delete_candidates.push((entry.rel.clone(), entry.is_dir));
                    }
                }
                WtStatus::Modified if !entry.is_dir => {
                    if opts.reset.contains(ResetFlags::RESTORE_MODIFIED_ITEMS)
                        && let Some(TreeEntry::File(f)) = target_files.get(&entry.rel)
                    {
                        overwrite.push((*f).clone());
                    }
                }
                WtStatus::Ignored => {
                    for ancestor in fsutil::ancestors_rel(&entry.rel) {
                        delete_revoke_dirs.insert(ancestor);
                    }
                }
                _ => {}
            }
        }

        // -- plan deletions: revoked dirs skip, scheduled dirs subsume ------
        delete_candidates.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deletions: Vec<(String, bool)> = Vec::new();
        let mut scheduled_dirs: Vec<String> = Vec::new();
        for (rel, is_dir) in delete_candidates {
            if scheduled_dirs
                .iter()
                .any(|d| rel.starts_with(&format!("{d}/")))
            {
                continue; // the recursive delete above subsumes this one
            }
            if is_dir && delete_revoke_dirs.contains(&rel) {
                continue;
            }
            if is_dir {
                scheduled_dirs.push(rel.clone());
            }
            deletions.push((rel, is_dir));
        }

        // -- pre-flight access check ----------------------------------------
        let mut touched: Vec<String> = overwrite.iter().map(|f| f.path.clone()).collect();
        touched.extend(deletions.iter().map(|(rel, _)| rel.clone()));
        let locked = iocx.perform_file_access_check(&self.workdir, &touched, AccessMode::Write);
        if !locked.is_empty() {
            return Err(SnowError::FilesLockedByOtherProcess { paths: locked });
        }

        // -- point HEAD at the target before touching the worktree ----------
        let new_head = match (&target_ref, opts.detach) {
            (Some(r), false) => Head::named(&r.name, target_hash),
            _ => Head::detached(target_hash),
        };
        self.set_head(new_head)?;

        // -- execute ---------------------------------------------------------
        for rel in &ensure_dirs {
            fsutil::ensure_dir(&fsutil::rel_to_abs(&self.workdir, rel))?;
        }

        let odb = self.odb().clone();
        let workdir = self.workdir.clone();
        let mut trash_batch: Vec<PathBuf> = Vec::new();

        // Deletions: unconditional when switching commits; otherwise only
        // content the store already knows may die, the rest goes to trash.
        let mut delete_now: Vec<(PathBuf, bool)> = Vec::new();
        for (rel, is_dir) in &deletions {
            let abs = fsutil::rel_to_abs(&workdir, rel);
            if switching || self.content_known(&abs, *is_dir) {
                delete_now.push((abs, *is_dir));
            } else {
                trash_batch.push(abs);
            }
        }
        let delete_tasks: Vec<_> = delete_now
            .into_iter()
            .map(|(abs, is_dir)| {
                move || -> Result<()> {
                    if is_dir {
                        fsutil::rmdir_recursive(&abs)?;
                    } else {
                        match std::fs::remove_file(&abs) {
                            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                                return Err(e.into());
                            }
                            _ => {}
                        }
                    }
                    Ok(())
                }
            })
            .collect();
        iocx::run_all(iocx::RESTORE_POOL_SIZE, delete_tasks)?;

        // Overwrites: trash unsaved content, then restore from the store.
        let overwrite_tasks: Vec<_> = overwrite
            .into_iter()
            .map(|file| {
                let odb = odb.clone();
                let abs = fsutil::rel_to_abs(&workdir, &file.path);
                move || -> Result<()> {
                    if !switching {
                        let current = hasher::hash_file(&abs)?.filehash;
                        if !odb.contains_object(&current) {
                            iocx.put_to_trash(std::slice::from_ref(&abs))?;
                        }
                    }
                    odb.read_object(&file, &abs, iocx)
                }
            })
            .collect();
        iocx::run_all(iocx::RESTORE_POOL_SIZE, overwrite_tasks)?;

        // Restores of deleted files.
        let restore_tasks: Vec<_> = restores
            .into_iter()
            .map(|file| {
                let odb = odb.clone();
                let abs = fsutil::rel_to_abs(&workdir, &file.path);
                move || -> Result<()> { odb.read_object(&file, &abs, iocx) }
            })
            .collect();
        iocx::run_all(iocx::RESTORE_POOL_SIZE, restore_tasks)?;

        // Batch-trash the non-overwrite deletions.
        if !trash_batch.is_empty() {
            iocx.put_to_trash(&trash_batch)?;
        }

        // A checkout spends whatever staging state existed.
        let odb = self.odb().clone();
        self.index_mut().invalidate(&odb)?;
        self.replace_index(Index::main());

        if switching {
            self.finalize_marked_deletions(target_hash)?;
        }

        self.odb()
            .append_log(&format!("checkout {target} -> {target_hash}"));
        tracing::info!(requested = target, %target_hash, switching, "checkout complete");
        Ok(())
    }

    /// Resolve a checkout target to a commit plus, when unambiguous, the
    /// reference to attach HEAD to.
    fn resolve_checkout_target(
        &self,
        target: &str,
        detach: bool,
    ) -> Result<(snow_store::Hash, Option<Reference>)> {
        // A plain reference name attaches to that branch.
        if let Some(reference) = self.reference_by_name(target) {
            return Ok((reference.target, Some(reference.clone())));
        }

        // `checkout HEAD` keeps the current attachment.
        if target == crate::model::HEAD_NAME
            && let Some(head) = self.head()
        {
            let current = if head.is_detached() {
                None
            } else {
                self.reference_by_name(&head.name).cloned()
            };
            return Ok((head.target, if detach { None } else { current }));
        }

        let hash = self.resolve(target)?;
        if detach {
            return Ok((hash, None));
        }

        let pointing: Vec<&Reference> =
            self.refs.iter().filter(|r| r.target == hash).collect();
        match pointing.len() {
            0 => Ok((hash, None)),
            1 => Ok((hash, Some(pointing[0].clone()))),
            // Several branches share this commit: attaching would be a guess.
            _ => Err(SnowError::InvalidCommitRef {
                target: target.to_owned(),
            }),
        }
    }

    /// Whether every file at/under `abs` has its content in the store.
    fn content_known(&self, abs: &std::path::Path, is_dir: bool) -> bool {
        let check_file = |path: &std::path::Path| -> bool {
            hasher::hash_file(path)
                .map(|fh| self.odb().contains_object(&fh.filehash))
                .unwrap_or(false)
        };
        if !is_dir {
            return check_file(abs);
        }
        let Ok(entries) = fsutil::os_walk(
            abs,
            fsutil::WalkFlags {
                files: true,
                dirs: false,
                hidden: true,
                recursive: true,
                vcs_dirs: false,
            },
        ) else {
            return false;
        };
        entries.iter().all(|e| check_file(&e.abs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iocx::TrashBin;
    use crate::repository::commit_op::CommitOptions;
    use std::sync::{Arc, Mutex};

    fn repo_with_history() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut repo = Repository::init(dir.path(), None).unwrap();
        repo.create_commit("Created project", CommitOptions::allow_empty())
            .unwrap();
        std::fs::write(dir.path().join("texture.psd"), b"original pixels").unwrap();
        repo.index_mut()
            .add_files(dir.path(), ["texture.psd"])
            .unwrap();
        repo.create_commit("add texture.psd", CommitOptions::default())
            .unwrap();
        (dir, repo)
    }

    #[test]
    fn checkout_head_is_a_noop() {
        let (dir, mut repo) = repo_with_history();
        let head_before = repo.head().unwrap().clone();
        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();
        assert_eq!(repo.head(), Some(&head_before));
        assert_eq!(
            std::fs::read(dir.path().join("texture.psd")).unwrap(),
            b"original pixels"
        );
    }

    #[test]
    fn restore_deleted_file() {
        let (dir, mut repo) = repo_with_history();
        std::fs::remove_file(dir.path().join("texture.psd")).unwrap();
        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("texture.psd")).unwrap(),
            b"original pixels"
        );
    }

    #[test]
    fn restore_previous_commit_brings_file_back() {
        let (dir, mut repo) = repo_with_history();
        // Remove the texture in a third commit.
        std::fs::remove_file(dir.path().join("texture.psd")).unwrap();
        repo.index_mut()
            .delete_files(dir.path(), ["texture.psd"])
            .unwrap();
        repo.create_commit("Remove texture", CommitOptions::default())
            .unwrap();
        assert!(!dir.path().join("texture.psd").exists());

        repo.checkout("HEAD~1", CheckoutOptions::default()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("texture.psd")).unwrap(),
            b"original pixels"
        );
        assert!(repo.head().unwrap().is_detached() || repo.head().unwrap().target != repo.reference_by_name("Main").unwrap().target);
    }

    #[test]
    fn modified_file_restores_with_flag() {
        let (dir, mut repo) = repo_with_history();
        std::fs::write(dir.path().join("texture.psd"), b"scribbled over!").unwrap();
        let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(|_| Ok(()))));
        repo.checkout_with("HEAD", CheckoutOptions::default(), &iocx)
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("texture.psd")).unwrap(),
            b"original pixels"
        );
    }

    #[test]
    fn unsaved_modified_content_goes_to_trash_in_place() {
        let (dir, mut repo) = repo_with_history();
        std::fs::write(dir.path().join("texture.psd"), b"precious unsaved work").unwrap();

        let trashed = Arc::new(Mutex::new(Vec::new()));
        let sink = trashed.clone();
        let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(move |paths| {
            sink.lock().unwrap().extend_from_slice(paths);
            Ok(())
        })));

        repo.checkout_with("HEAD", CheckoutOptions::default(), &iocx)
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("texture.psd")).unwrap(),
            b"original pixels"
        );
        let trashed = trashed.lock().unwrap();
        assert_eq!(trashed.len(), 1, "{trashed:?}");
        assert!(trashed[0].ends_with("texture.psd"));
    }

    #[test]
    fn new_items_survive_default_checkout() {
        let (dir, mut repo) = repo_with_history();
        std::fs::write(dir.path().join("wip.blend"), b"wip").unwrap();
        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();
        assert!(dir.path().join("wip.blend").is_file());
    }

    #[test]
    fn new_items_removed_with_delete_flag() {
        let (dir, mut repo) = repo_with_history();
        std::fs::write(dir.path().join("wip.blend"), b"wip").unwrap();

        let trashed = Arc::new(Mutex::new(Vec::new()));
        let sink = trashed.clone();
        let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(move |paths| {
            sink.lock().unwrap().extend_from_slice(paths);
            Ok(())
        })));

        repo.checkout_with(
            "HEAD",
            CheckoutOptions {
                reset: ResetFlags::ALL,
                detach: false,
            },
            &iocx,
        )
        .unwrap();
        assert!(!dir.path().join("wip.blend").exists());
        // In-place checkout of unknown content routes through the trash.
        assert_eq!(trashed.lock().unwrap().len(), 1);
    }

    #[test]
    fn switching_commits_deletes_new_items_directly() {
        let (dir, mut repo) = repo_with_history();
        std::fs::write(dir.path().join("wip.blend"), b"wip").unwrap();

        let trashed = Arc::new(Mutex::new(Vec::new()));
        let sink = trashed.clone();
        let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(move |paths| {
            sink.lock().unwrap().extend_from_slice(paths);
            Ok(())
        })));

        repo.checkout_with(
            "HEAD~1",
            CheckoutOptions {
                reset: ResetFlags::ALL,
                detach: false,
            },
            &iocx,
        )
        .unwrap();
        assert!(!dir.path().join("wip.blend").exists());
        assert!(trashed.lock().unwrap().is_empty(), "switching deletes, not trashes");
    }

    #[test]
    fn ignored_items_protect_their_parents() {
        let (dir, mut repo) = repo_with_history();
        // A new directory containing an ignored file: the dir must survive
        // as a whole-dir delete (which would take the ignored file with it).
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(dir.path().join("cache/data.tmp"), b"ignored").unwrap();
        std::fs::write(dir.path().join("cache/new.blend"), b"new").unwrap();

        let iocx = IoContext::with_trash(TrashBin::Callback(Box::new(|_| Ok(()))));
        repo.checkout_with(
            "HEAD",
            CheckoutOptions {
                reset: ResetFlags::ALL,
                detach: false,
            },
            &iocx,
        )
        .unwrap();

        assert!(dir.path().join("cache/data.tmp").is_file(), "ignored file survives");
        assert!(!dir.path().join("cache/new.blend").exists(), "new file still removed");
    }

    #[test]
    fn branch_checkout_attaches_head() {
        let (dir, mut repo) = repo_with_history();
        repo.create_reference("texturing", Some("HEAD~1")).unwrap();
        repo.checkout("texturing", CheckoutOptions::default()).unwrap();
        let head = repo.head().unwrap();
        assert!(!head.is_detached());
        assert_eq!(head.name, "texturing");
        // worktree rolled back: texture.psd not in the root commit... it was
        // added in the second commit, so a full reset would remove it; with
        // DEFAULT flags the new-ish file stays.
        assert!(dir.path().join("texture.psd").exists());
    }

    #[test]
    fn detach_flag_detaches() {
        let (_dir, mut repo) = repo_with_history();
        repo.checkout(
            "Main",
            CheckoutOptions {
                reset: ResetFlags::DEFAULT,
                detach: true,
            },
        )
        .unwrap();
        assert!(repo.head().unwrap().is_detached());
    }

    #[test]
    fn ambiguous_hash_checkout_fails() {
        let (_dir, mut repo) = repo_with_history();
        let head = repo.head().unwrap().target;
        repo.create_reference("also-here", None).unwrap();
        // Main and also-here both target HEAD's commit.
        let err = repo
            .checkout(&head.to_hex(), CheckoutOptions::default())
            .unwrap_err();
        assert!(matches!(err, SnowError::InvalidCommitRef { .. }), "{err}");
    }

    #[test]
    fn checkout_recreates_missing_directories() {
        let (dir, mut repo) = repo_with_history();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models/hero.blend"), b"hero").unwrap();
        repo.index_mut()
            .add_files(dir.path(), ["models/hero.blend"])
            .unwrap();
        repo.create_commit("add hero", CommitOptions::default())
            .unwrap();

        std::fs::remove_dir_all(dir.path().join("models")).unwrap();
        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("models/hero.blend")).unwrap(),
            b"hero"
        );
    }

    #[test]
    fn restored_file_carries_recorded_mtime() {
        let (dir, mut repo) = repo_with_history();
        let recorded = repo
            .head_commit()
            .unwrap()
            .root
            .find("texture.psd")
            .unwrap()
            .clone();
        std::fs::remove_file(dir.path().join("texture.psd")).unwrap();
        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();

        let meta = std::fs::metadata(dir.path().join("texture.psd")).unwrap();
        let stats = crate::fsutil::FileStats::from_metadata(&meta);
        if let crate::model::TreeEntry::File(f) = recorded {
            assert_eq!(stats.mtime, f.stats.mtime);
        } else {
            panic!("expected file entry");
        }
    }
}
