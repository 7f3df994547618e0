//! Unified error type for repository operations.
//!
//! A closed set of error kinds: callers match on variants instead of
//! inspecting strings, and the CLI maps every variant to a `fatal:` line.
//! Messages include what went wrong and, where it helps, what to do next.

use std::fmt;
use std::path::PathBuf;

use crate::iocx::LockedPath;

/// Convenience alias for repository results.
pub type Result<T> = std::result::Result<T, SnowError>;

// ---------------------------------------------------------------------------
// SnowError
// ---------------------------------------------------------------------------

/// Unified error type for all repository operations.
#[derive(Debug)]
pub enum SnowError {
    /// No ancestor directory of the given path contains a `.snow`.
    NotARepository {
        /// Where the search started.
        path: PathBuf,
    },

    /// `init` on an already-initialized worktree or an occupied commondir.
    RepositoryExists {
        /// The existing repository location.
        path: PathBuf,
    },

    /// The repository's config version is unknown to this build.
    UnsupportedRepositoryVersion {
        /// The version found on disk.
        version: u64,
    },

    /// A checkout/lookup target could not be resolved.
    InvalidCommitRef {
        /// The target string as given.
        target: String,
    },

    /// An added path lies outside the worktree.
    WorktreeOutsideRepo {
        /// The offending path.
        path: PathBuf,
    },

    /// `create_commit` with nothing staged and `allow_empty` unset.
    CommitEmpty,

    /// A branch with this name already exists.
    BranchExists {
        /// The duplicate name.
        name: String,
    },

    /// The branch is currently checked out and cannot be deleted.
    BranchCheckedOut {
        /// The branch name.
        name: String,
    },

    /// No reference with this name exists.
    NoSuchReference {
        /// The requested name.
        name: String,
    },

    /// Refusing to operate in an OS-critical location.
    ProtectedLocation {
        /// The refused path.
        path: PathBuf,
    },

    /// Files that a checkout would touch are held open by other processes.
    FilesLockedByOtherProcess {
        /// All offending paths, aggregated.
        paths: Vec<LockedPath>,
    },

    /// Two repositories with different root commits cannot be merged.
    UnrelatedHistories,

    /// A fingerprint referenced by a commit is absent from `objects/`.
    ObjectMissing {
        /// The missing fingerprint, hex.
        hash: String,
    },

    /// A lower-level I/O failure.
    Io(std::io::Error),
}

impl fmt::Display for SnowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotARepository { path } => {
                write!(
                    f,
                    "not a snow repository (or any parent of {}): run `snow init` first",
                    path.display()
                )
            }
            Self::RepositoryExists { path } => {
                write!(f, "repository already exists at {}", path.display())
            }
            Self::UnsupportedRepositoryVersion { version } => {
                write!(
                    f,
                    "unsupported repository version {version}: this build understands version 2 only"
                )
            }
            Self::InvalidCommitRef { target } => {
                write!(f, "cannot resolve '{target}' to a commit")
            }
            Self::WorktreeOutsideRepo { path } => {
                write!(f, "path {} lies outside the worktree", path.display())
            }
            Self::CommitEmpty => {
                write!(f, "nothing to commit: no files added or deleted")
            }
            Self::BranchExists { name } => {
                write!(f, "a branch named '{name}' already exists")
            }
            Self::BranchCheckedOut { name } => {
                write!(f, "branch '{name}' is checked out and cannot be deleted")
            }
            Self::NoSuchReference { name } => {
                write!(f, "no reference named '{name}'")
            }
            Self::ProtectedLocation { path } => {
                write!(
                    f,
                    "refusing to operate in protected location {}",
                    path.display()
                )
            }
            Self::FilesLockedByOtherProcess { paths } => {
                write!(f, "{} file(s) are in use by other processes:", paths.len())?;
                for p in paths {
                    write!(f, "\n  - {}: {}", p.rel, p.reason)?;
                }
                write!(f, "\nclose the holding applications and retry")
            }
            Self::UnrelatedHistories => {
                write!(f, "refusing to merge unrelated histories")
            }
            Self::ObjectMissing { hash } => {
                write!(f, "object {hash} is missing from the object store")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for SnowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SnowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for SnowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}

impl From<snow_store::StoreError> for SnowError {
    fn from(e: snow_store::StoreError) -> Self {
        match e {
            snow_store::StoreError::ObjectMissing { hash } => Self::ObjectMissing { hash },
            snow_store::StoreError::Io(io) => Self::Io(io),
            other => Self::Io(std::io::Error::other(other)),
        }
    }
}
