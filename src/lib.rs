//! snow library crate — the repository engine behind the `snow` binary.
//!
//! Version control for very large binary assets: worktree snapshots are
//! recorded as commits whose file contents live in a content-addressed
//! object store, with filesystem block-cloning making multi-gigabyte
//! add/restore cycles effectively instant.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod ignore;
pub mod index;
pub mod iocx;
pub mod model;
pub mod odb;
pub mod repository;
pub mod telemetry;

pub use error::{Result, SnowError};
pub use repository::Repository;
pub use repository::checkout::{CheckoutOptions, ResetFlags};
pub use repository::commit_op::CommitOptions;
pub use repository::merge::REF_NAME_POOL;
pub use repository::status::{StatusEntry, StatusFilter, WtStatus};
