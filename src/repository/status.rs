//! Worktree status: classify every path as new, modified, deleted,
//! unmodified, or ignored relative to a target commit.

use std::collections::BTreeMap;
use std::ops::BitOr;

use snow_store::hasher;

use crate::error::Result;
use crate::fsutil::{self, WalkFlags};
use crate::ignore::IgnoreMatcher;
use crate::model::tree::{FlattenOpts, TreeEntry, TreeFile};
use crate::model::Commit;

use super::Repository;

// ---------------------------------------------------------------------------
// Filter flags
// ---------------------------------------------------------------------------

/// Bitmask selecting what [`Repository::get_status`] reports and how
/// modification is detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusFilter(u32);

impl StatusFilter {
    /// Report files absent from the target.
    pub const NEW: Self = Self(1);
    /// Report files whose content changed.
    pub const MODIFIED: Self = Self(1 << 1);
    /// Report files present in the target but absent on disk.
    pub const DELETED: Self = Self(1 << 2);
    /// Report unchanged files too.
    pub const UNMODIFIED: Self = Self(1 << 3);
    /// Tag ignored entries instead of dropping them.
    pub const IGNORED: Self = Self(1 << 4);
    /// Include directory entries.
    pub const DIRECTORIES: Self = Self(1 << 5);
    /// Sort case-sensitively. Mutually exclusive with the next flag; when
    /// both are set, case-sensitive wins.
    pub const SORT_CASE_SENSITIVELY: Self = Self(1 << 6);
    /// Sort case-insensitively.
    pub const SORT_CASE_INSENSITIVELY: Self = Self(1 << 7);
    /// Modification = size or mtime difference; no hashing.
    pub const ONLY_SIZE_AND_MKTIME: Self = Self(1 << 8);
    /// Hash-screen files under the block limit when only mtime changed.
    pub const SIZE_AND_HASH_SMALL_FILES: Self = Self(1 << 9);
    /// Hash-compare mismatched-mtime files up to the block limit; larger
    /// files count as modified only on a size mismatch, with the deciding
    /// hash deferred to the commit path.
    pub const SIZE_AND_HASH_ALL_FILES: Self = Self(1 << 10);

    /// What `snow status` shows.
    pub const DEFAULT: Self = Self(
        Self::NEW.0 | Self::MODIFIED.0 | Self::DELETED.0 | Self::SIZE_AND_HASH_SMALL_FILES.0,
    );

    /// Everything, for checkout planning.
    pub const ALL: Self = Self(
        Self::NEW.0
            | Self::MODIFIED.0
            | Self::DELETED.0
            | Self::UNMODIFIED.0
            | Self::IGNORED.0
            | Self::DIRECTORIES.0
            | Self::SIZE_AND_HASH_SMALL_FILES.0,
    );

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StatusFilter {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Status entries
// ---------------------------------------------------------------------------

/// Classification of one worktree path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WtStatus {
    /// Present on disk, absent in the target.
    New,
    /// Present in both with differing content (or, for a directory, with a
    /// changed descendant).
    Modified,
    /// Present in the target, absent on disk.
    Deleted,
    /// Present in both, unchanged.
    Unmodified,
    /// Matched an ignore pattern.
    Ignored,
}

/// One entry of a status report.
#[derive(Clone, Debug)]
pub struct StatusEntry {
    /// Repository-relative path.
    pub rel: String,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// The classification.
    pub status: WtStatus,
}

impl Repository {
    /// Compute the worktree's status relative to `target` (default: the
    /// HEAD commit; with no commits at all, everything is new).
    ///
    /// Entries are sorted parents-before-children; case sensitivity follows
    /// the filter.
    ///
    /// # Errors
    /// Walk and hash I/O errors.
    pub fn get_status(
        &self,
        filter: StatusFilter,
        target: Option<&Commit>,
    ) -> Result<Vec<StatusEntry>> {
        let matcher = IgnoreMatcher::for_worktree(&self.workdir);
        let flags = WalkFlags {
            files: true,
            dirs: filter.contains(StatusFilter::DIRECTORIES),
            hidden: true,
            recursive: true,
            vcs_dirs: false,
        };
        let walk = fsutil::os_walk(&self.workdir, flags)?;

        let target_commit = target.or_else(|| self.head_commit());
        let target_files: BTreeMap<String, &TreeEntry> = target_commit
            .map(|c| {
                c.root.get_all_tree_files(FlattenOpts {
                    entire_hierarchy: true,
                    include_dirs: true,
                })
            })
            .unwrap_or_default();

        let mut entries: BTreeMap<String, StatusEntry> = BTreeMap::new();

        // Pass 1: classify what exists on disk.
        for item in &walk {
            if matcher.ignored(&item.rel) {
                if filter.contains(StatusFilter::IGNORED) {
                    entries.insert(
                        item.rel.clone(),
                        StatusEntry {
                            rel: item.rel.clone(),
                            is_dir: item.is_dir,
                            status: WtStatus::Ignored,
                        },
                    );
                }
                continue;
            }
            let status = match target_files.get(&item.rel) {
                None => WtStatus::New,
                Some(TreeEntry::File(tracked)) if !item.is_dir => {
                    if self.is_modified(filter, tracked, item)? {
                        WtStatus::Modified
                    } else {
                        WtStatus::Unmodified
                    }
                }
                Some(_) => WtStatus::Unmodified,
            };
            entries.insert(
                item.rel.clone(),
                StatusEntry {
                    rel: item.rel.clone(),
                    is_dir: item.is_dir,
                    status,
                },
            );
        }

        // Pass 2: whatever the target tracks that the walk did not see.
        for (rel, tracked) in &target_files {
            if entries.contains_key(rel) || matcher.ignored(rel) {
                continue;
            }
            if tracked.is_dir() && !filter.contains(StatusFilter::DIRECTORIES) {
                continue;
            }
            entries.insert(
                rel.clone(),
                StatusEntry {
                    rel: rel.clone(),
                    is_dir: tracked.is_dir(),
                    status: WtStatus::Deleted,
                },
            );
        }

        // Pass 3: surface containing directories as modified.
        if filter.contains(StatusFilter::DIRECTORIES) {
            let changed: Vec<String> = entries
                .values()
                .filter(|e| {
                    !e.is_dir
                        && matches!(
                            e.status,
                            WtStatus::New | WtStatus::Modified | WtStatus::Deleted
                        )
                })
                .map(|e| e.rel.clone())
                .collect();
            for rel in changed {
                for ancestor in fsutil::ancestors_rel(&rel) {
                    if let Some(dir) = entries.get_mut(&ancestor)
                        && dir.is_dir
                        && dir.status == WtStatus::Unmodified
                    {
                        dir.status = WtStatus::Modified;
                    }
                }
            }
        }

        // Filter to what was asked for.
        let mut out: Vec<StatusEntry> = entries
            .into_values()
            .filter(|e| match e.status {
                WtStatus::New => filter.contains(StatusFilter::NEW),
                WtStatus::Modified => {
                    filter.contains(StatusFilter::MODIFIED)
                        || (e.is_dir && filter.contains(StatusFilter::DIRECTORIES))
                }
                WtStatus::Deleted => filter.contains(StatusFilter::DELETED),
                WtStatus::Unmodified => {
                    filter.contains(StatusFilter::UNMODIFIED)
                        || (e.is_dir && filter.contains(StatusFilter::DIRECTORIES))
                }
                WtStatus::Ignored => filter.contains(StatusFilter::IGNORED),
            })
            .collect();

        // Parents before children; ties by path, case per filter. When both
        // sort flags are set the case-sensitive one wins.
        let case_insensitive = filter.contains(StatusFilter::SORT_CASE_INSENSITIVELY)
            && !filter.contains(StatusFilter::SORT_CASE_SENSITIVELY);
        out.sort_by(|a, b| {
            if case_insensitive {
                a.rel.to_lowercase().cmp(&b.rel.to_lowercase())
            } else {
                a.rel.cmp(&b.rel)
            }
        });
        Ok(out)
    }

    /// Decide whether a tracked file changed on disk.
    fn is_modified(
        &self,
        filter: StatusFilter,
        tracked: &TreeFile,
        on_disk: &fsutil::WalkEntry,
    ) -> Result<bool> {
        if tracked.stats.size != on_disk.stats.size {
            return Ok(true);
        }
        if tracked.stats.mtime == on_disk.stats.mtime {
            return Ok(false);
        }

        // Same size, different mtime: the interesting case.
        let mode = effective_mode(filter, &tracked.ext);
        match mode {
            DetectionMode::SizeAndMtime => Ok(true),
            DetectionMode::HashSmallFiles => {
                if on_disk.stats.size > hasher::BLOCK_HASH_LIMIT {
                    return Ok(true);
                }
                self.hash_screen(tracked, on_disk)
            }
            DetectionMode::HashAllFiles => {
                if on_disk.stats.size > hasher::BLOCK_HASH_LIMIT {
                    // Past the block limit only a size mismatch proves
                    // modification; the content hash runs when the file is
                    // next committed.
                    return Ok(false);
                }
                self.hash_screen(tracked, on_disk)
            }
        }
    }

    /// First-block hash screen for files within the block limit.
    fn hash_screen(&self, tracked: &TreeFile, on_disk: &fsutil::WalkEntry) -> Result<bool> {
        let Some(stored_hash) = tracked.hash else {
            return Ok(true);
        };
        if let Some(blocks) = self.odb().store().read_blocks(&stored_hash, &tracked.ext)? {
            if let Some(first) = blocks.first() {
                let current = hasher::part_hash(&on_disk.abs)?;
                return Ok(current != first.hash);
            }
            // Zero-length block table: empty file; same size means equal.
            return Ok(false);
        }
        // No sidecar survives: fall back to a whole-file compare.
        let current = hasher::hash_file(&on_disk.abs)?.filehash;
        Ok(current != stored_hash)
    }
}

// ---------------------------------------------------------------------------
// Detection mode
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DetectionMode {
    SizeAndMtime,
    HashSmallFiles,
    HashAllFiles,
}

/// Text-typed extensions default to full content hashing — text files are
/// routinely resaved by tools without content changes.
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".json", ".xml", ".csv", ".ini", ".yaml", ".yml"];

fn effective_mode(filter: StatusFilter, ext: &str) -> DetectionMode {
    if filter.contains(StatusFilter::ONLY_SIZE_AND_MKTIME) {
        return DetectionMode::SizeAndMtime;
    }
    if filter.contains(StatusFilter::SIZE_AND_HASH_ALL_FILES) {
        return DetectionMode::HashAllFiles;
    }
    if filter.contains(StatusFilter::SIZE_AND_HASH_SMALL_FILES) {
        return DetectionMode::HashSmallFiles;
    }
    let lower = ext.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&lower.as_str()) {
        DetectionMode::HashAllFiles
    } else {
        DetectionMode::HashSmallFiles
    }
}
