//! Merging two repositories' histories.
//!
//! A pure history union: commits from both sides are combined and
//! de-duplicated, references are reconciled, and each surviving leaf keeps
//! (or is assigned) a branch name. No blob transfer happens here — callers
//! stage object files separately.
//!
//! Ordering is fixed: commits ascend by modification time (falling back to
//! creation time), references ascend by modification time with nulls last.
//! Applying the same ordering in both merge directions is what makes the
//! operation symmetric.

use std::collections::{BTreeMap, BTreeSet};

use snow_store::Hash;

use crate::error::{Result, SnowError};
use crate::model::{Commit, Reference};

use super::Repository;

/// Branch names handed out when a merge needs to rename a collision.
pub const REF_NAME_POOL: &[&str] = &[
    "Blue Track",
    "Green Track",
    "Purple Track",
    "Orange Track",
    "Cyan Track",
    "Magenta Track",
];

/// Fallback name when the pool runs dry.
const FALLBACK_REF_NAME: &str = "Unnamed Track";

/// Result of a repository merge.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// The union of both commit sets, ascending by modification time.
    pub commits: Vec<Commit>,
    /// Reconciled references, one per referenced leaf.
    pub refs: Vec<Reference>,
}

impl Repository {
    /// Merge the histories of `local` and `remote`.
    ///
    /// Requires both repositories to share the same root commit.
    ///
    /// # Errors
    /// [`SnowError::UnrelatedHistories`] when the roots differ.
    pub fn merge_repositories(
        local: &Self,
        remote: &Self,
        name_pool: &[&str],
    ) -> Result<MergeOutcome> {
        let local_root = root_of(local);
        let remote_root = root_of(remote);
        match (local_root, remote_root) {
            (Some(a), Some(b)) if a == b => {}
            _ => return Err(SnowError::UnrelatedHistories),
        }

        // Commits: concat, sort ascending, de-duplicate by hash with the
        // later (by sort order) writer winning.
        let mut all_commits: Vec<Commit> = local
            .commits()
            .values()
            .chain(remote.commits().values())
            .cloned()
            .collect();
        all_commits.sort_by_key(Commit::sort_date);
        let mut commit_order: Vec<Hash> = Vec::new();
        let mut commit_map: BTreeMap<Hash, Commit> = BTreeMap::new();
        for commit in all_commits {
            if !commit_map.contains_key(&commit.hash) {
                commit_order.push(commit.hash);
            }
            commit_map.insert(commit.hash, commit);
        }

        // References: concat, sort ascending with nulls last, de-duplicate
        // the same logical branch (same name, same start) later-wins.
        let mut all_refs: Vec<Reference> = local
            .refs()
            .iter()
            .chain(remote.refs().iter())
            .cloned()
            .collect();
        all_refs.sort_by(|a, b| match (a.last_modified, b.last_modified) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let mut merged_refs: Vec<Reference> = Vec::new();
        for reference in all_refs {
            if let Some(existing) = merged_refs
                .iter_mut()
                .find(|r| r.name == reference.name && r.start == reference.start)
            {
                *existing = reference;
            } else {
                merged_refs.push(reference);
            }
        }

        // Leaves: commits no other commit names as a parent.
        let referenced: BTreeSet<Hash> = commit_map
            .values()
            .flat_map(|c| c.parents.iter().copied())
            .collect();
        let leaves: Vec<Hash> = commit_order
            .iter()
            .copied()
            .filter(|h| !referenced.contains(h))
            .collect();

        // One reference per referenced leaf; collisions rename from the pool.
        let mut out_refs: Vec<Reference> = Vec::new();
        let mut taken: BTreeSet<String> = BTreeSet::new();
        for leaf in &leaves {
            // The latest-modified reference targeting this leaf wins.
            let Some(reference) = merged_refs.iter().rev().find(|r| r.target == *leaf) else {
                continue;
            };
            let mut reference = reference.clone();
            if taken.contains(&reference.name) {
                let fresh = name_pool
                    .iter()
                    .find(|n| !taken.contains(**n))
                    .copied()
                    .unwrap_or(FALLBACK_REF_NAME);
                tracing::debug!(
                    old = reference.name,
                    new = fresh,
                    "renaming colliding reference"
                );
                reference.name = fresh.to_owned();
            }
            taken.insert(reference.name.clone());
            out_refs.push(reference);
        }

        Ok(MergeOutcome {
            commits: commit_order
                .into_iter()
                .filter_map(|h| commit_map.remove(&h))
                .collect(),
            refs: out_refs,
        })
    }

    /// Merge `other` into this repository and persist the outcome.
    ///
    /// # Errors
    /// See [`merge_repositories`](Self::merge_repositories).
    pub fn merge_from(&mut self, other: &Self, name_pool: &[&str]) -> Result<()> {
        let outcome = Self::merge_repositories(self, other, name_pool)?;

        // Names that vanish (renamed or superseded) are cleaned up first.
        let keep: BTreeSet<&str> = outcome.refs.iter().map(|r| r.name.as_str()).collect();
        let stale: Vec<String> = self
            .refs
            .iter()
            .filter(|r| !keep.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect();
        for name in stale {
            self.odb.delete_reference_file(&name)?;
        }

        for commit in &outcome.commits {
            self.odb.write_commit(commit)?;
        }
        for reference in &outcome.refs {
            self.odb.write_reference(reference)?;
        }

        self.commits = outcome.commits.into_iter().map(|c| (c.hash, c)).collect();
        self.refs = outcome.refs;

        // HEAD tracks its branch: follow a retargeted one, detach from a
        // vanished one.
        if let Some(head) = self.head().cloned()
            && !head.is_detached()
        {
            match self.reference_by_name(&head.name) {
                Some(branch) if branch.target != head.target => {
                    let target = branch.target;
                    let name = head.name.clone();
                    self.set_head(crate::model::Head::named(&name, target))?;
                }
                Some(_) => {}
                None => self.set_head(crate::model::Head::detached(head.target))?,
            }
        }

        self.odb.append_log("merged remote repository");
        Ok(())
    }
}

fn root_of(repo: &Repository) -> Option<Hash> {
    repo.commits()
        .values()
        .find(|c| c.is_root())
        .map(|c| c.hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::commit_op::CommitOptions;

    /// Clone a repository by copying its worktree + commondir wholesale.
    /// Both copies then share the root commit and repo id, which is what
    /// makes them mergeable.
    fn clone_repo(src: &tempfile::TempDir) -> (tempfile::TempDir, Repository) {
        let dst = tempfile::TempDir::new().unwrap();
        copy_dir(src.path(), dst.path());
        let repo = Repository::open(dst.path()).unwrap();
        (dst, repo)
    }

    fn copy_dir(src: &std::path::Path, dst: &std::path::Path) {
        std::fs::create_dir_all(dst).unwrap();
        for entry in std::fs::read_dir(src).unwrap().flatten() {
            let from = entry.path();
            let to = dst.join(entry.file_name());
            if from.is_dir() {
                copy_dir(&from, &to);
            } else {
                std::fs::copy(&from, &to).unwrap();
            }
        }
    }

    fn commit_file(
        dir: &tempfile::TempDir,
        repo: &mut Repository,
        rel: &str,
        content: &[u8],
        msg: &str,
    ) -> Hash {
        std::fs::write(dir.path().join(rel), content).unwrap();
        repo.index_mut().add_files(dir.path(), [rel]).unwrap();
        repo.create_commit(msg, CommitOptions::default()).unwrap()
    }

    fn base_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut repo = Repository::init(dir.path(), None).unwrap();
        repo.create_commit("Created project", CommitOptions::allow_empty())
            .unwrap();
        (dir, repo)
    }

    #[test]
    fn unrelated_roots_are_refused() {
        let (_dir_a, repo_a) = base_repo();
        let (_dir_b, repo_b) = base_repo();
        let err = Repository::merge_repositories(&repo_a, &repo_b, REF_NAME_POOL).unwrap_err();
        assert!(matches!(err, SnowError::UnrelatedHistories), "{err}");
    }

    #[test]
    fn same_branch_merges_to_single_reference() {
        let (dir_a, mut repo_a) = base_repo();
        let (dir_b, mut repo_b) = clone_repo(&dir_a);

        // Each side adds one commit on the shared default branch.
        commit_file(&dir_a, &mut repo_a, "a.psd", b"a", "A's work");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b_head = commit_file(&dir_b, &mut repo_b, "b.psd", b"b", "B's work");

        let outcome =
            Repository::merge_repositories(&repo_a, &repo_b, REF_NAME_POOL).unwrap();
        assert_eq!(outcome.commits.len(), 3, "{:?}", outcome.commits);
        assert_eq!(outcome.refs.len(), 1, "{:?}", outcome.refs);
        assert_eq!(outcome.refs[0].name, "Main");
        // The later-modified leaf keeps the branch.
        assert_eq!(outcome.refs[0].target, b_head);

        // Reverse order yields the identical sets.
        let reverse =
            Repository::merge_repositories(&repo_b, &repo_a, REF_NAME_POOL).unwrap();
        let hashes = |o: &MergeOutcome| {
            o.commits.iter().map(|c| c.hash).collect::<std::collections::BTreeSet<_>>()
        };
        assert_eq!(hashes(&outcome), hashes(&reverse));
        assert_eq!(outcome.refs[0].target, reverse.refs[0].target);
    }

    #[test]
    fn name_collision_renames_from_pool() {
        let (dir_a, mut repo_a) = base_repo();
        let (dir_b, mut repo_b) = clone_repo(&dir_a);

        // Divergent work first, then each side creates its own
        // "Yellow Track" rooted at a different commit.
        let a_c = commit_file(&dir_a, &mut repo_a, "a.psd", b"a", "A's work");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b_c = commit_file(&dir_b, &mut repo_b, "b.psd", b"b", "B's work");
        repo_a
            .create_reference("Yellow Track", Some(&a_c.to_hex()))
            .unwrap();
        repo_b
            .create_reference("Yellow Track", Some(&b_c.to_hex()))
            .unwrap();
        // Drop the Mains so the Yellow Tracks are the only leaves' refs.
        repo_a.checkout(
            "Yellow Track",
            crate::repository::checkout::CheckoutOptions::default(),
        )
        .unwrap();
        repo_a.delete_reference("Main").unwrap();
        repo_b
            .checkout(
                "Yellow Track",
                crate::repository::checkout::CheckoutOptions::default(),
            )
            .unwrap();
        repo_b.delete_reference("Main").unwrap();

        let outcome =
            Repository::merge_repositories(&repo_a, &repo_b, REF_NAME_POOL).unwrap();
        let names: Vec<&str> = outcome.refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(outcome.refs.len(), 2, "{:?}", outcome.refs);
        assert!(names.contains(&"Yellow Track"), "{names:?}");
        assert!(names.contains(&"Blue Track"), "{names:?}");
    }

    #[test]
    fn merge_from_applies_and_persists() {
        let (dir_a, mut repo_a) = base_repo();
        let (dir_b, mut repo_b) = clone_repo(&dir_a);
        commit_file(&dir_a, &mut repo_a, "a.psd", b"a", "A's work");
        std::thread::sleep(std::time::Duration::from_millis(5));
        commit_file(&dir_b, &mut repo_b, "b.psd", b"b", "B's work");

        repo_a.merge_from(&repo_b, REF_NAME_POOL).unwrap();
        assert_eq!(repo_a.commits().len(), 3);

        let reopened = Repository::open(dir_a.path()).unwrap();
        assert_eq!(reopened.commits().len(), 3);
        assert_eq!(reopened.refs().len(), 1);
    }
}
