//! Mount-table enumeration and filesystem-family classification.
//!
//! Built once per bulk operation. The copy-primitive selection in
//! [`IoContext`](super::IoContext) needs two answers per path pair: do they
//! share a mount, and does that mount's filesystem support block cloning.

use std::path::{Path, PathBuf};
#[cfg(target_os = "macos")]
use std::process::Command;

// ---------------------------------------------------------------------------
// FsFamily
// ---------------------------------------------------------------------------

/// Filesystem families snow distinguishes for copy-primitive selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsFamily {
    /// Apple APFS — supports clonefile.
    Apfs,
    /// Apple HFS+ — no cloning.
    HfsPlus,
    /// Microsoft ReFS — supports block cloning.
    Refs,
    /// Microsoft NTFS — no cloning.
    Ntfs,
    /// FAT32.
    Fat32,
    /// FAT16.
    Fat16,
    /// Anything else (ext4, Btrfs, XFS, network mounts, ...).
    Other,
}

impl FsFamily {
    /// Classify a filesystem type string as reported by the host.
    #[must_use]
    pub fn from_fs_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "apfs" => Self::Apfs,
            "hfs" | "hfs+" | "hfsplus" => Self::HfsPlus,
            "refs" => Self::Refs,
            "ntfs" | "ntfs3" => Self::Ntfs,
            "fat32" | "vfat" | "msdos" => Self::Fat32,
            "fat16" | "fat" => Self::Fat16,
            _ => Self::Other,
        }
    }

    /// Whether same-mount copies on this family can use a clone primitive.
    #[must_use]
    pub const fn supports_clone(self) -> bool {
        matches!(self, Self::Apfs | Self::Refs)
    }
}

// ---------------------------------------------------------------------------
// MountTable
// ---------------------------------------------------------------------------

/// One mounted filesystem.
#[derive(Clone, Debug)]
pub struct MountPoint {
    /// Mount-point path.
    pub path: PathBuf,
    /// Classified family.
    pub family: FsFamily,
}

/// Snapshot of the host's mount table, longest mount-point first so that
/// lookup returns the most specific mount containing a path.
#[derive(Clone, Debug, Default)]
pub struct MountTable {
    mounts: Vec<MountPoint>,
}

impl MountTable {
    /// Enumerate the host's mounted filesystems.
    ///
    /// Failures degrade to an empty table: every path then classifies as
    /// [`FsFamily::Other`] on a shared unknown mount, which selects the
    /// portable copy path.
    #[must_use]
    pub fn enumerate() -> Self {
        let mounts = read_host_mounts().unwrap_or_default();
        Self::from_mounts(mounts)
    }

    /// Build a table from explicit mounts (test seam).
    #[must_use]
    pub fn from_mounts(mut mounts: Vec<MountPoint>) -> Self {
        mounts.sort_by_key(|m| std::cmp::Reverse(m.path.as_os_str().len()));
        Self { mounts }
    }

    /// The most specific mount containing `path`, if any.
    #[must_use]
    pub fn mount_of(&self, path: &Path) -> Option<&MountPoint> {
        self.mounts.iter().find(|m| path.starts_with(&m.path))
    }

    /// Filesystem family of the mount containing `path`.
    #[must_use]
    pub fn family_of(&self, path: &Path) -> FsFamily {
        self.mount_of(path).map_or(FsFamily::Other, |m| m.family)
    }

    /// Whether two paths resolve to the same mount.
    ///
    /// With an empty table (enumeration failed) this is `true`: both paths
    /// fall through to the same "unknown" mount.
    #[must_use]
    pub fn same_mount(&self, a: &Path, b: &Path) -> bool {
        match (self.mount_of(a), self.mount_of(b)) {
            (Some(ma), Some(mb)) => ma.path == mb.path,
            (None, None) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Host parsing
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn read_host_mounts() -> Option<Vec<MountPoint>> {
    let raw = std::fs::read_to_string("/proc/mounts").ok()?;
    Some(parse_proc_mounts(&raw))
}

#[cfg(target_os = "macos")]
fn read_host_mounts() -> Option<Vec<MountPoint>> {
    let output = Command::new("mount").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(parse_bsd_mount(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_host_mounts() -> Option<Vec<MountPoint>> {
    // Windows: classify each drive root via `fsutil fsinfo volumeinfo`-style
    // queries would need elevation; fall back to an empty table and the
    // portable copy path.
    None
}

/// Parse `/proc/mounts` lines: `device mountpoint fstype options 0 0`.
/// Mount points escape spaces as `\040`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount = fields.next()?;
            let fstype = fields.next()?;
            Some(MountPoint {
                path: PathBuf::from(unescape_octal(mount)),
                family: FsFamily::from_fs_name(fstype),
            })
        })
        .collect()
}

/// Parse BSD `mount` output: `/dev/disk3s1 on / (apfs, local, journaled)`.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_bsd_mount(raw: &str) -> Vec<MountPoint> {
    raw.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(" on ")?;
            let (mount, opts) = rest.rsplit_once(" (")?;
            let fstype = opts.split([',', ')']).next()?.trim();
            Some(MountPoint {
                path: PathBuf::from(mount),
                family: FsFamily::from_fs_name(fstype),
            })
        })
        .collect()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_octal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3
                && let Ok(code) = u8::from_str_radix(&digits, 8)
            {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}
