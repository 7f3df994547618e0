//! Commit creation.
//!
//! A commit snapshots the staged subset of the worktree on top of the
//! previous commit's tree:
//!
//! 1. The worktree is scanned into a tree whose staged files carry the
//!    fingerprints recorded by the index.
//! 2. That tree is pruned to the "added closure" — staged paths plus their
//!    ancestors.
//! 3. The HEAD commit's tree is cloned and pruned of staged deletions.
//! 4. The two merge (worktree side wins), empty directories fall out, every
//!    node is validated, and the result becomes the new commit's root.
//!
//! Objects are already in the store by this point (the index wrote them),
//! so a commit never references a missing blob.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use snow_store::Hash;

use crate::error::{Result, SnowError};
use crate::fsutil;
use crate::index::Index;
use crate::iocx::IoContext;
use crate::model::reference::DEFAULT_BRANCH;
use crate::model::tree::{TreeDir, construct_tree};
use crate::model::{Commit, Head, Reference};

use super::Repository;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for [`Repository::create_commit`].
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    /// Permit a commit with nothing staged (the root commit, checkpoints).
    pub allow_empty: bool,
    /// Tags to attach.
    pub tags: Vec<String>,
    /// User data to attach.
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl CommitOptions {
    /// Shorthand for `allow_empty: true`.
    #[must_use]
    pub fn allow_empty() -> Self {
        Self {
            allow_empty: true,
            ..Self::default()
        }
    }
}

impl Repository {
    /// Create a commit from the main index.
    ///
    /// Hashes any not-yet-written staged files first, then builds the new
    /// root tree as described in the module docs. On success the index is
    /// invalidated and replaced, the branch HEAD names is advanced (the
    /// default branch is created on the first commit), and the commit hash
    /// is returned.
    ///
    /// # Errors
    /// [`SnowError::CommitEmpty`] with nothing staged and `allow_empty`
    /// unset; store, validation, and I/O errors.
    pub fn create_commit(&mut self, message: &str, opts: CommitOptions) -> Result<Hash> {
        if !opts.allow_empty && self.index().is_empty() {
            return Err(SnowError::CommitEmpty);
        }

        let mut iocx = IoContext::new();
        let outcome = self.create_commit_inner(message, opts, &iocx);
        iocx.invalidate();
        outcome
    }

    fn create_commit_inner(
        &mut self,
        message: &str,
        opts: CommitOptions,
        iocx: &IoContext,
    ) -> Result<Hash> {
        // Hash staged files into the store if the caller hasn't already.
        if !self.index().is_written() && !self.index().is_empty() {
            let workdir = self.workdir().to_path_buf();
            let odb = self.odb().clone();
            self.index_mut().write_files(&workdir, &odb, iocx)?;
        }

        let new_root = self.build_commit_tree()?;

        // The staging round is spent, whatever happens next.
        let odb = self.odb().clone();
        self.index_mut().invalidate(&odb)?;
        self.replace_index(Index::main());

        let parents: Vec<Hash> = self.head().map(|h| vec![h.target]).unwrap_or_default();
        let mut commit = Commit::new(
            self.odb().repo_id(),
            message,
            Utc::now(),
            parents,
            new_root,
        );
        commit.tags = opts.tags.into_iter().collect();
        commit.user_data = opts.user_data;
        let hash = commit.hash;

        // Object writes already happened; now commit, then refs, then HEAD.
        self.insert_commit(commit)?;

        match self.head().cloned() {
            Some(head) if !head.is_detached() => {
                self.retarget_reference(&head.name, hash)?;
                self.set_head(Head::named(&head.name, hash))?;
            }
            Some(_) => {
                self.set_head(Head::detached(hash))?;
            }
            None => {
                let branch = Reference::branch(DEFAULT_BRANCH, hash, Some(hash));
                self.odb().write_reference(&branch)?;
                self.refs.push(branch);
                self.set_head(Head::named(DEFAULT_BRANCH, hash))?;
            }
        }

        self.odb()
            .append_log(&format!("commit {hash}: {message}"));
        tracing::info!(%hash, message, "created commit");
        Ok(hash)
    }

    /// Build the new root tree from worktree + index + prior commit.
    fn build_commit_tree(&self) -> Result<TreeDir> {
        let index = self.index();

        // Added closure: staged-and-processed paths plus every ancestor.
        let mut closure: BTreeSet<String> = BTreeSet::new();
        for rel in index.adds() {
            if index.processed().contains_key(rel) {
                closure.insert(rel.clone());
                for ancestor in fsutil::ancestors_rel(rel) {
                    closure.insert(ancestor);
                }
            }
        }

        // Worktree side: only staged content, fingerprints from the index.
        let mut worktree_tree = if closure.is_empty() {
            TreeDir::root()
        } else {
            let mut tree = construct_tree(self.workdir(), index.processed())?;
            tree.remove(&|entry| !closure.contains(entry.path()));
            tree
        };

        // Prior side: HEAD's tree minus staged deletions.
        let mut prior_tree = self
            .head_commit()
            .map_or_else(TreeDir::root, |c| c.root.clone());
        let deletes = index.deletes().clone();
        if !deletes.is_empty() {
            prior_tree.remove(&|entry| deletes.contains(entry.path()));
        }

        worktree_tree.prune_empty_dirs();
        let mut new_root = TreeDir::merge(&prior_tree, &worktree_tree);
        new_root.prune_empty_dirs();
        new_root.compute_hashes();
        new_root
            .validate()
            .map_err(|detail| SnowError::Io(std::io::Error::other(detail)))?;
        Ok(new_root)
    }
}
