//! Presence/fingerprint diff between two commits.
//!
//! Content diffing is out of scope — a file is "modified" exactly when both
//! commits carry it and the fingerprints differ.

use std::collections::BTreeSet;

use super::commit::Commit;
use super::tree::FlattenOpts;

/// File-level difference of commit `a` relative to commit `b`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitDiff {
    /// Paths present in `a` but not in `b`.
    pub added: BTreeSet<String>,
    /// Paths present in both with differing fingerprints.
    pub modified: BTreeSet<String>,
    /// Paths present in `b` but not in `a`.
    pub deleted: BTreeSet<String>,
}

impl CommitDiff {
    /// Whether the two commits have identical file sets and fingerprints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diff commit `a` against baseline `b`: what did `a` add, modify, delete.
#[must_use]
pub fn diff(a: &Commit, b: &Commit) -> CommitDiff {
    let opts = FlattenOpts {
        entire_hierarchy: true,
        include_dirs: false,
    };
    let files_a = a.root.get_all_tree_files(opts);
    let files_b = b.root.get_all_tree_files(opts);

    let mut out = CommitDiff::default();
    for (path, entry) in &files_a {
        match files_b.get(path) {
            None => {
                out.added.insert(path.clone());
            }
            Some(base) if base.hash() != entry.hash() => {
                out.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }
    for path in files_b.keys() {
        if !files_a.contains_key(path) {
            out.deleted.insert(path.clone());
        }
    }
    out
}
