//! Path handling and platform-neutral filesystem operations.
//!
//! All repository-relative paths use POSIX separators internally regardless
//! of host. Conversion to host paths happens only at the filesystem boundary.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Name of the repository metadata directory (or redirection file).
pub const DOT_SNOW: &str = ".snow";

/// Foreign VCS metadata the walker always skips alongside [`DOT_SNOW`].
pub const DOT_GIT: &str = ".git";

// ---------------------------------------------------------------------------
// Path normalization
// ---------------------------------------------------------------------------

/// Normalize a path string: host separators become `/`, duplicate separators
/// collapse, `.` segments drop, and `..` segments unwind their parent.
///
/// Leading `..` segments that would escape the root are preserved.
#[must_use]
pub fn normalize(p: &str) -> String {
    let unified = p.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(&"..")) || out.is_empty() {
                    if !absolute {
                        out.push("..");
                    }
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Relativize `path` against `base`, normalized to POSIX separators.
///
/// Returns `None` if `path` does not live under `base`.
#[must_use]
pub fn relativize(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    Some(normalize(&rel.to_string_lossy()))
}

/// The parent of a repository-relative path, or `None` at the root.
#[must_use]
pub fn parent_rel(rel: &str) -> Option<&str> {
    rel.rfind('/').map(|idx| &rel[..idx])
}

/// Every ancestor of a repository-relative path, nearest first.
///
/// `"a/b/c.psd"` yields `["a/b", "a"]`. The empty root is not included.
#[must_use]
pub fn ancestors_rel(rel: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = rel;
    while let Some(parent) = parent_rel(cur) {
        out.push(parent.to_owned());
        cur = parent;
    }
    out
}

/// Extension of a path including the leading dot, or empty for none.
#[must_use]
pub fn ext_of(rel: &str) -> String {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    match name.rfind('.') {
        // A name like ".DS_Store" is extensionless, not all-extension.
        Some(idx) if idx > 0 => name[idx..].to_owned(),
        _ => String::new(),
    }
}

/// Join a repository-relative POSIX path onto a host directory.
#[must_use]
pub fn rel_to_abs(base: &Path, rel: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for seg in rel.split('/').filter(|s| !s.is_empty()) {
        out.push(seg);
    }
    out
}

/// Characters a repository-relative path may never contain, regardless of
/// host. Windows additionally forbids its reserved set.
const ILLEGAL_ALWAYS: &[char] = &['\0'];
#[cfg(windows)]
const ILLEGAL_WINDOWS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Validate that a relative path is storable on the host filesystem.
///
/// # Errors
/// Returns the offending character on failure.
pub fn validate_path_chars(rel: &str) -> Result<(), char> {
    if let Some(c) = rel.chars().find(|c| ILLEGAL_ALWAYS.contains(c)) {
        return Err(c);
    }
    #[cfg(windows)]
    if let Some(c) = rel.chars().find(|c| ILLEGAL_WINDOWS.contains(c)) {
        return Err(c);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FileStats
// ---------------------------------------------------------------------------

/// The stat subset snow records per file.
///
/// All timestamps are unix milliseconds, matching the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    /// File size in bytes.
    pub size: u64,
    /// Last content modification.
    pub mtime: i64,
    /// Last inode change.
    pub ctime: i64,
    /// Creation time; falls back to mtime where the filesystem keeps none.
    pub birthtime: i64,
}

impl FileStats {
    /// Extract the stat subset from host metadata.
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime = meta.modified().map_or(0, system_time_ms);
        let ctime = ctime_ms(meta).unwrap_or(mtime);
        let birthtime = meta.created().map_or(mtime, system_time_ms);
        Self {
            size: meta.len(),
            mtime,
            ctime,
            birthtime,
        }
    }
}

fn system_time_ms(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

#[cfg(unix)]
fn ctime_ms(meta: &Metadata) -> Option<i64> {
    use std::os::unix::fs::MetadataExt as _;
    Some(meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000)
}

#[cfg(not(unix))]
fn ctime_ms(_meta: &Metadata) -> Option<i64> {
    None
}

// ---------------------------------------------------------------------------
// Directory walking
// ---------------------------------------------------------------------------

/// What [`os_walk`] should enumerate.
#[derive(Clone, Copy, Debug)]
pub struct WalkFlags {
    /// Include regular files.
    pub files: bool,
    /// Include directories.
    pub dirs: bool,
    /// Include dotfiles (other than `.snow`/`.git`, which need `vcs_dirs`).
    pub hidden: bool,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Include `.snow` and `.git` trees. Almost never what you want.
    pub vcs_dirs: bool,
}

impl WalkFlags {
    /// Files only, recursive, no hidden entries.
    pub const FILES: Self = Self {
        files: true,
        dirs: false,
        hidden: false,
        recursive: true,
        vcs_dirs: false,
    };

    /// Files and directories, recursive, hidden entries included.
    pub const ALL: Self = Self {
        files: true,
        dirs: true,
        hidden: true,
        recursive: true,
        vcs_dirs: false,
    };
}

/// One entry produced by [`os_walk`].
#[derive(Clone, Debug)]
pub struct WalkEntry {
    /// Absolute host path.
    pub abs: PathBuf,
    /// Path relative to the walk root, POSIX separators.
    pub rel: String,
    /// The entry's stat subset.
    pub stats: FileStats,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// For directories: `true` if the directory held no enumerable children.
    pub is_empty: bool,
}

/// Enumerate the descendants of `root`.
///
/// Subdirectories that disappear mid-walk are skipped silently; only an
/// unreadable root is an error. `.snow` and `.git` are skipped unless
/// `flags.vcs_dirs` is set.
///
/// # Errors
/// Fails if the root itself cannot be read.
pub fn os_walk(root: &Path, flags: WalkFlags) -> std::io::Result<Vec<WalkEntry>> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(root)?;
    walk_level(root, entries, flags, &mut out)?;
    Ok(out)
}

fn walk_level(
    root: &Path,
    entries: std::fs::ReadDir,
    flags: WalkFlags,
    out: &mut Vec<WalkEntry>,
) -> std::io::Result<()> {
    for entry in entries.flatten() {
        let abs = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !flags.vcs_dirs && (name == DOT_SNOW || name == DOT_GIT) {
            continue;
        }
        if !flags.hidden && name.starts_with('.') {
            continue;
        }
        // The entry may vanish between readdir and stat.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Some(rel) = relativize(root, &abs) else {
            continue;
        };
        let stats = FileStats::from_metadata(&meta);

        if meta.is_dir() {
            let mut child_count = 0usize;
            if flags.recursive {
                let before = out.len();
                if let Ok(children) = std::fs::read_dir(&abs) {
                    walk_level(root, children, flags, out)?;
                }
                child_count = out.len() - before;
            } else if let Ok(children) = std::fs::read_dir(&abs) {
                child_count = children.flatten().count();
            }
            if flags.dirs {
                out.push(WalkEntry {
                    abs,
                    rel,
                    stats,
                    is_dir: true,
                    is_empty: child_count == 0,
                });
            }
        } else if meta.is_file() && flags.files {
            out.push(WalkEntry {
                abs,
                rel,
                stats,
                is_dir: false,
                is_empty: false,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Basic operations
// ---------------------------------------------------------------------------

/// Create a directory and all missing parents.
///
/// # Errors
/// Propagates the underlying I/O error.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Return `true` if the path exists (file, directory, or symlink target).
#[must_use]
pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

/// Remove a directory tree. Missing targets are not an error.
///
/// # Errors
/// Propagates I/O errors other than `NotFound`.
pub fn rmdir_recursive(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Set a file's modification time (unix milliseconds).
///
/// # Errors
/// Propagates the underlying I/O error.
pub fn utimes(path: &Path, mtime_ms: i64) -> std::io::Result<()> {
    let mtime = filetime::FileTime::from_unix_time(
        mtime_ms.div_euclid(1000),
        u32::try_from(mtime_ms.rem_euclid(1000)).unwrap_or(0) * 1_000_000,
    );
    filetime::set_file_mtime(path, mtime)
}

/// Write a file atomically: write to a sibling temp file, then rename over
/// the destination. Readers never observe a half-written file.
///
/// # Errors
/// Propagates I/O errors from the write or the rename.
pub fn write_safe_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Hide a filesystem item. Best-effort: on Unix, dotfiles are already hidden
/// and this is a no-op; elsewhere failures are swallowed.
pub fn hide_item(path: &Path) {
    #[cfg(windows)]
    {
        // +h via attrib; ignore failures — hiding is cosmetic.
        let _ = std::process::Command::new("attrib")
            .arg("+h")
            .arg(path)
            .status();
    }
    #[cfg(not(windows))]
    {
        let _ = path;
    }
}

/// Return `true` for OS-critical locations that snow must never initialize
/// in or delete from.
#[must_use]
pub fn protected_location(path: &Path) -> bool {
    let Ok(canon) = path.canonicalize() else {
        return false;
    };
    // Filesystem roots ("/", "C:\") have no parent.
    if canon.parent().is_none() {
        return true;
    }
    let s = canon.to_string_lossy().to_lowercase();
    if cfg!(target_os = "macos") && (s == "/system" || s.starts_with("/system/")) {
        return true;
    }
    if cfg!(windows) {
        if let Ok(windir) = std::env::var("WINDIR") {
            let windir = windir.to_lowercase();
            if s == windir || s.starts_with(&format!("{windir}\\")) {
                return true;
            }
        }
    }
    false
}
