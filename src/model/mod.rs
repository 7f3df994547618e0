//! snow data model — trees, commits, references, and commit diffs.

pub mod commit;
pub mod diff;
pub mod reference;
pub mod tree;

pub use commit::{Commit, RuntimeData, sanitize_message};
pub use diff::{CommitDiff, diff};
pub use reference::{DEFAULT_BRANCH, HEAD_NAME, Head, RefType, Reference};
pub use tree::{
    FlattenOpts, ProcessedFile, TreeDir, TreeEntry, TreeFile, construct_tree,
};
