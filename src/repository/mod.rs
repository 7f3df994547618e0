//! The repository coordinator.
//!
//! [`Repository`] owns the in-memory view of one on-disk repository: the
//! commit map, the reference list, HEAD, and the main index. The bulk
//! operations live in sibling modules, one file per operation, and are
//! exposed as methods:
//!
//! - [`status`](crate::repository::status) — worktree classification
//! - [`commit_op`](crate::repository::commit_op) — commit creation
//! - [`checkout`](crate::repository::checkout) — worktree restore
//! - [`delete`](crate::repository::delete) — history rewrite
//! - [`merge`](crate::repository::merge) — repository union

pub mod checkout;
pub mod commit_op;
pub mod delete;
pub mod merge;
pub mod status;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use snow_store::Hash;

use crate::error::{Result, SnowError};
use crate::index::Index;
use crate::model::reference::HEAD_NAME;
use crate::model::{Commit, Head, Reference};
use crate::odb::{self, Odb};

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// An open repository: worktree plus database plus in-memory caches.
#[derive(Debug)]
pub struct Repository {
    workdir: PathBuf,
    odb: Odb,
    commits: BTreeMap<Hash, Commit>,
    refs: Vec<Reference>,
    head: Option<Head>,
    index: Index,
}

impl Repository {
    /// Initialize a fresh repository at `workdir`.
    ///
    /// Creates the database only; the root commit is produced by the first
    /// [`create_commit`](Self::create_commit) (the CLI's `init` issues one
    /// with `allow_empty`).
    ///
    /// # Errors
    /// See [`Odb::init`].
    pub fn init(workdir: &Path, commondir: Option<&Path>) -> Result<Self> {
        let odb = Odb::init(workdir, commondir)?;
        Ok(Self {
            workdir: workdir.to_path_buf(),
            odb,
            commits: BTreeMap::new(),
            refs: Vec::new(),
            head: None,
            index: Index::main(),
        })
    }

    /// Open the repository containing `start`.
    ///
    /// # Errors
    /// [`SnowError::NotARepository`] when discovery fails; version-gate and
    /// I/O errors.
    pub fn open(start: &Path) -> Result<Self> {
        let (workdir, commondir) = odb::discover(start)?;
        let odb = Odb::open(&commondir)?;
        let commits = odb.read_commits()?;
        let refs = odb.read_references()?;
        let head = odb.read_head(&refs)?;
        let index = Index::load_all(&odb)?
            .into_iter()
            .find(|i| i.id().is_empty())
            .unwrap_or_else(Index::main);
        Ok(Self {
            workdir,
            odb,
            commits,
            refs,
            head,
            index,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The worktree root.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The underlying database.
    #[must_use]
    pub const fn odb(&self) -> &Odb {
        &self.odb
    }

    /// All commits, keyed by fingerprint.
    #[must_use]
    pub const fn commits(&self) -> &BTreeMap<Hash, Commit> {
        &self.commits
    }

    /// All references.
    #[must_use]
    pub fn refs(&self) -> &[Reference] {
        &self.refs
    }

    /// The current HEAD; `None` until the first commit.
    #[must_use]
    pub const fn head(&self) -> Option<&Head> {
        self.head.as_ref()
    }

    /// The main index.
    #[must_use]
    pub const fn index(&self) -> &Index {
        &self.index
    }

    /// Mutable access to the main index (staging).
    pub const fn index_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    /// The commit HEAD points at, if any.
    #[must_use]
    pub fn head_commit(&self) -> Option<&Commit> {
        self.head.as_ref().and_then(|h| self.commits.get(&h.target))
    }

    /// Look up a commit by fingerprint.
    ///
    /// # Errors
    /// [`SnowError::InvalidCommitRef`] when absent.
    pub fn commit_by_hash(&self, hash: &Hash) -> Result<&Commit> {
        self.commits.get(hash).ok_or_else(|| SnowError::InvalidCommitRef {
            target: hash.to_hex(),
        })
    }

    /// Look up a reference by name.
    #[must_use]
    pub fn reference_by_name(&self, name: &str) -> Option<&Reference> {
        self.refs.iter().find(|r| r.name == name)
    }

    // -----------------------------------------------------------------------
    // Commit-ish resolution
    // -----------------------------------------------------------------------

    /// Resolve a commit-ish string to a commit fingerprint.
    ///
    /// Accepted forms: `HEAD`, a reference name, a full 64-hex hash, and
    /// any of those with a `~n` first-parent suffix.
    ///
    /// # Errors
    /// [`SnowError::InvalidCommitRef`] for anything unresolvable.
    pub fn resolve(&self, target: &str) -> Result<Hash> {
        let invalid = || SnowError::InvalidCommitRef {
            target: target.to_owned(),
        };

        let (base, distance) = match target.split_once('~') {
            Some((base, n)) => (base, n.parse::<usize>().map_err(|_| invalid())?),
            None => (target, 0),
        };

        let mut hash = if base == HEAD_NAME {
            self.head.as_ref().ok_or_else(invalid)?.target
        } else if let Some(reference) = self.reference_by_name(base) {
            reference.target
        } else if snow_store::hash::is_hex_hash(base) {
            base.parse().map_err(|_| invalid())?
        } else {
            return Err(invalid());
        };

        for _ in 0..distance {
            let commit = self.commits.get(&hash).ok_or_else(invalid)?;
            hash = *commit.parents.first().ok_or_else(invalid)?;
        }

        if !self.commits.contains_key(&hash) {
            return Err(invalid());
        }
        Ok(hash)
    }

    // -----------------------------------------------------------------------
    // Reference management
    // -----------------------------------------------------------------------

    /// Create a branch at `start` (default: the current HEAD commit).
    ///
    /// # Errors
    /// [`SnowError::BranchExists`] for duplicate names,
    /// [`SnowError::InvalidCommitRef`] when the start point is unknown.
    pub fn create_reference(&mut self, name: &str, start: Option<&str>) -> Result<Reference> {
        if name == HEAD_NAME || self.reference_by_name(name).is_some() {
            return Err(SnowError::BranchExists {
                name: name.to_owned(),
            });
        }
        let target = match start {
            Some(s) => self.resolve(s)?,
            None => {
                self.head
                    .as_ref()
                    .ok_or_else(|| SnowError::InvalidCommitRef {
                        target: HEAD_NAME.to_owned(),
                    })?
                    .target
            }
        };
        self.commit_by_hash(&target)?;

        let reference = Reference::branch(name, target, Some(target));
        self.odb.write_reference(&reference)?;
        self.refs.push(reference.clone());
        self.odb.append_log(&format!("branch {name} created at {target}"));
        Ok(reference)
    }

    /// Delete a branch.
    ///
    /// # Errors
    /// [`SnowError::BranchCheckedOut`] when HEAD names it,
    /// [`SnowError::NoSuchReference`] when absent.
    pub fn delete_reference(&mut self, name: &str) -> Result<()> {
        if self.reference_by_name(name).is_none() {
            return Err(SnowError::NoSuchReference {
                name: name.to_owned(),
            });
        }
        if let Some(head) = &self.head
            && !head.is_detached()
            && head.name == name
        {
            return Err(SnowError::BranchCheckedOut {
                name: name.to_owned(),
            });
        }
        self.odb.delete_reference_file(name)?;
        self.refs.retain(|r| r.name != name);
        self.odb.append_log(&format!("branch {name} deleted"));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commit message edit
    // -----------------------------------------------------------------------

    /// Rewrite a commit's message — the only mutable-by-value commit field.
    ///
    /// # Errors
    /// [`SnowError::InvalidCommitRef`] when the commit is unknown.
    pub fn update_commit_message(&mut self, hash: &Hash, message: &str) -> Result<()> {
        let commit = self
            .commits
            .get_mut(hash)
            .ok_or_else(|| SnowError::InvalidCommitRef {
                target: hash.to_hex(),
            })?;
        commit.message = crate::model::sanitize_message(message);
        commit.last_modified = Some(Utc::now());
        let snapshot = commit.clone();
        self.odb.write_commit(&snapshot)?;
        self.odb
            .append_log(&format!("commit {hash} message edited"));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers shared by the operation modules
    // -----------------------------------------------------------------------

    pub(crate) fn set_head(&mut self, head: Head) -> Result<()> {
        self.odb.write_head(&head)?;
        self.head = Some(head);
        Ok(())
    }

    pub(crate) fn retarget_reference(&mut self, name: &str, target: Hash) -> Result<()> {
        let Some(reference) = self.refs.iter_mut().find(|r| r.name == name) else {
            return Err(SnowError::NoSuchReference {
                name: name.to_owned(),
            });
        };
        reference.target = target;
        reference.last_modified = Some(Utc::now());
        let snapshot = reference.clone();
        self.odb.write_reference(&snapshot)?;
        Ok(())
    }

    pub(crate) fn insert_commit(&mut self, commit: Commit) -> Result<()> {
        self.odb.write_commit(&commit)?;
        self.commits.insert(commit.hash, commit);
        Ok(())
    }

    pub(crate) fn replace_index(&mut self, index: Index) {
        self.index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::commit_op::CommitOptions;

    fn init_with_root() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut repo = Repository::init(dir.path(), None).unwrap();
        repo.create_commit("Created project", CommitOptions::allow_empty())
            .unwrap();
        (dir, repo)
    }

    #[test]
    fn open_on_uninitialized_dir_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Repository::open(dir.path()).unwrap_err();
        assert!(matches!(err, SnowError::NotARepository { .. }), "{err}");
    }

    #[test]
    fn resolve_head_and_tilde() {
        let (dir, mut repo) = init_with_root();
        std::fs::write(dir.path().join("a.psd"), b"a").unwrap();
        repo.index_mut().add_files(dir.path(), ["a.psd"]).unwrap();
        let second = repo
            .create_commit("add a", CommitOptions::default())
            .unwrap();

        assert_eq!(repo.resolve("HEAD").unwrap(), second);
        let root = repo.resolve("HEAD~1").unwrap();
        assert_eq!(repo.resolve("Main~1").unwrap(), root);
        assert_eq!(repo.resolve(&second.to_hex()).unwrap(), second);
    }

    #[test]
    fn resolve_rejects_unknowns() {
        let (_dir, repo) = init_with_root();
        for bad in ["Nope", "HEAD~9", "HEAD~x", &"ab".repeat(32)] {
            let err = repo.resolve(bad).unwrap_err();
            assert!(matches!(err, SnowError::InvalidCommitRef { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn branch_create_duplicate_delete() {
        let (_dir, mut repo) = init_with_root();
        repo.create_reference("texturing", None).unwrap();
        assert!(repo.reference_by_name("texturing").is_some());

        let err = repo.create_reference("texturing", None).unwrap_err();
        assert!(matches!(err, SnowError::BranchExists { .. }), "{err}");

        repo.delete_reference("texturing").unwrap();
        assert!(repo.reference_by_name("texturing").is_none());
        let err = repo.delete_reference("texturing").unwrap_err();
        assert!(matches!(err, SnowError::NoSuchReference { .. }), "{err}");
    }

    #[test]
    fn checked_out_branch_is_not_deletable() {
        let (_dir, mut repo) = init_with_root();
        let err = repo.delete_reference("Main").unwrap_err();
        assert!(matches!(err, SnowError::BranchCheckedOut { .. }), "{err}");
    }

    #[test]
    fn message_edit_persists_and_stamps() {
        let (dir, mut repo) = init_with_root();
        let hash = repo.head().unwrap().target;
        repo.update_commit_message(&hash, "better wording").unwrap();

        let reopened = Repository::open(dir.path()).unwrap();
        let commit = reopened.commit_by_hash(&hash).unwrap();
        assert_eq!(commit.message, "better wording");
        assert!(commit.last_modified.is_some());
        // identity is date+message at creation; editing must not move the hash
        assert_eq!(commit.hash, hash);
    }

    #[test]
    fn reopen_restores_full_state() {
        let (dir, mut repo) = init_with_root();
        std::fs::write(dir.path().join("a.psd"), b"a").unwrap();
        repo.index_mut().add_files(dir.path(), ["a.psd"]).unwrap();
        repo.index().persist(repo.odb()).unwrap();
        let head = repo.head().unwrap().clone();

        let reopened = Repository::open(dir.path()).unwrap();
        assert_eq!(reopened.head(), Some(&head));
        assert_eq!(reopened.commits().len(), 1);
        assert_eq!(reopened.refs().len(), 1);
        assert!(reopened.index().adds().contains("a.psd"));
    }
}
