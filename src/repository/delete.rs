//! Commit deletion (history rewrite).
//!
//! Deleting a commit splices it out of the graph: children inherit its
//! parents, branches pointing at it are retargeted or dropped, and the
//! `versions/` file disappears. The root commit is undeletable, and the
//! currently checked-out commit is only *marked* — the real removal happens
//! on the next checkout that moves HEAD off it.

use std::collections::BTreeSet;

use snow_store::Hash;

use crate::error::{Result, SnowError};
use crate::model::{Commit, Head};

use super::Repository;

impl Repository {
    /// Delete a commit, rewiring children and references.
    ///
    /// # Errors
    /// [`SnowError::InvalidCommitRef`] for unknown commits; the root commit
    /// is refused.
    pub fn delete_commit(&mut self, hash: &Hash) -> Result<()> {
        let commit = self.commit_by_hash(hash)?.clone();
        if commit.is_root() {
            return Err(SnowError::Io(std::io::Error::other(
                "the root commit cannot be deleted",
            )));
        }

        // Deleting what's checked out is deferred to the next checkout.
        if self.head().is_some_and(|h| h.target == *hash) {
            if let Some(c) = self.commits.get_mut(hash) {
                c.runtime.mark_for_deletion = true;
                let snapshot = c.clone();
                self.odb.write_commit(&snapshot)?;
            }
            self.odb
                .append_log(&format!("commit {hash} marked for deletion"));
            return Ok(());
        }

        self.remove_commit_now(&commit)
    }

    /// Finalize deferred deletions after HEAD moved to `keep`.
    pub(crate) fn finalize_marked_deletions(&mut self, keep: Hash) -> Result<()> {
        let marked: Vec<Commit> = self
            .commits
            .values()
            .filter(|c| c.runtime.mark_for_deletion && c.hash != keep && !c.is_root())
            .cloned()
            .collect();
        for commit in marked {
            self.remove_commit_now(&commit)?;
        }
        Ok(())
    }

    /// The actual splice. `commit` must not be the root.
    fn remove_commit_now(&mut self, commit: &Commit) -> Result<()> {
        let hash = commit.hash;

        // Children inherit the deleted commit's parents (order preserved,
        // duplicates collapsed).
        let child_hashes: Vec<Hash> = self
            .commits
            .values()
            .filter(|c| c.parents.contains(&hash))
            .map(|c| c.hash)
            .collect();
        for child_hash in child_hashes {
            if let Some(child) = self.commits.get_mut(&child_hash) {
                let mut rewired: Vec<Hash> = Vec::new();
                for parent in &child.parents {
                    if *parent == hash {
                        rewired.extend(commit.parents.iter().copied());
                    } else {
                        rewired.push(*parent);
                    }
                }
                let mut seen = BTreeSet::new();
                rewired.retain(|p| seen.insert(*p));
                child.parents = rewired;
                let snapshot = child.clone();
                self.odb.write_commit(&snapshot)?;
            }
        }

        // Branches pointing at the deleted commit.
        let pointing: Vec<String> = self
            .refs
            .iter()
            .filter(|r| r.target == hash)
            .map(|r| r.name.clone())
            .collect();
        if !pointing.is_empty() {
            // Are all of the deleted commit's parents still referenced by
            // other commits? Then these branches carry no unique history.
            let referenced_elsewhere: BTreeSet<Hash> = self
                .commits
                .values()
                .filter(|c| c.hash != hash)
                .flat_map(|c| c.parents.iter().copied())
                .collect();
            let still_covered = commit
                .parents
                .iter()
                .filter(|p| referenced_elsewhere.contains(p))
                .count();
            let drop_branches =
                still_covered == commit.parents.len() && self.refs.len() > 1;

            if drop_branches {
                for name in &pointing {
                    self.odb.delete_reference_file(name)?;
                }
                self.refs.retain(|r| r.target != hash);
            } else {
                let new_target = commit.parents[0];
                for name in &pointing {
                    self.retarget_reference(name, new_target)?;
                }
                // A HEAD detached at the dying commit reattaches to the
                // first retargeted branch.
                if self.head().is_some_and(|h| h.is_detached() && h.target == hash)
                    && let Some(first) = pointing.first()
                {
                    self.set_head(Head::named(first, new_target))?;
                }
                // A HEAD naming a retargeted branch follows it.
                if let Some(head) = self.head().cloned()
                    && !head.is_detached()
                    && pointing.contains(&head.name)
                {
                    self.set_head(Head::named(&head.name, new_target))?;
                }
            }
        }

        self.odb.delete_commit_file(&hash)?;
        self.commits.remove(&hash);
        self.odb.append_log(&format!("commit {hash} deleted"));
        tracing::info!(%hash, "deleted commit");
        Ok(())
    }
}
