//! Shared helpers for snow integration tests.
//!
//! All tests run against temp directories — no side effects outside them.
//! Each test gets its own repository via `setup_repo()`.

use std::path::Path;

use snow::Repository;
use snow::repository::commit_op::CommitOptions;
use snow_store::Hash;
use tempfile::TempDir;

/// Create a fresh repository with its root commit, like `snow init`.
pub fn setup_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut repo = Repository::init(dir.path(), None).expect("init failed");
    repo.create_commit("Created project", CommitOptions::allow_empty())
        .expect("root commit failed");
    (dir, repo)
}

/// Write a file (creating parents) and commit it.
pub fn commit_file(
    dir: &TempDir,
    repo: &mut Repository,
    rel: &str,
    content: &[u8],
    message: &str,
) -> Hash {
    write_file(dir.path(), rel, content);
    repo.index_mut()
        .add_files(dir.path(), [rel])
        .expect("add failed");
    repo.create_commit(message, CommitOptions::default())
        .expect("commit failed")
}

/// Stage a deletion (removing the file from disk too) and commit it.
pub fn commit_removal(dir: &TempDir, repo: &mut Repository, rel: &str, message: &str) -> Hash {
    let abs = dir.path().join(rel);
    if abs.exists() {
        std::fs::remove_file(&abs).expect("remove failed");
    }
    repo.index_mut()
        .delete_files(dir.path(), [rel])
        .expect("rm failed");
    repo.create_commit(message, CommitOptions::default())
        .expect("commit failed")
}

/// Write a file, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let abs = root.join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).expect("mkdir failed");
    }
    std::fs::write(&abs, content).expect("write failed");
}

/// Recursively copy a directory tree (worktree + commondir cloning).
pub fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).expect("mkdir failed");
    for entry in std::fs::read_dir(src).expect("read_dir failed").flatten() {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to);
        } else {
            std::fs::copy(&from, &to).expect("copy failed");
        }
    }
}
