//! In-memory snapshot of a directory hierarchy.
//!
//! A tree is an owning structure: directories own their children, and no
//! node points back at its parent. Ancestry is derived from the
//! repository-relative path every node carries, which keeps ownership
//! strictly top-down and lets trees be cloned, pruned, and merged as plain
//! values.
//!
//! Fingerprints propagate bottom-up: a file's fingerprint is the hash of its
//! content (filled in from the index's processed map), a directory's is the
//! hash of its children's concatenated fingerprints in insertion order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snow_store::{Hash, hasher};

use crate::fsutil::{self, FileStats, WalkFlags};

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// A file node. Never owns children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeFile {
    /// Content fingerprint; `None` until hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
    /// Extension including the dot (`".psd"`), empty for none.
    pub ext: String,
    /// Repository-relative path, POSIX separators, never empty.
    pub path: String,
    /// Recorded stat subset.
    pub stats: FileStats,
}

/// A directory node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDir {
    /// Directory fingerprint; `None` until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
    /// Repository-relative path; empty exactly at the root.
    pub path: String,
    /// Ordered children; paths are unique within a directory.
    pub children: Vec<TreeEntry>,
    /// Sum of descendant file sizes. Recomputed, not serialized.
    #[serde(skip)]
    pub size: u64,
}

/// A node of the tree: file or directory.
///
/// Decoded straight from JSON — the variant is recognized structurally
/// (directories carry `children`, files carry `ext` and `stats`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeEntry {
    /// A subdirectory.
    Dir(TreeDir),
    /// A file.
    File(TreeFile),
}

impl TreeEntry {
    /// The node's repository-relative path.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Dir(d) => &d.path,
            Self::File(f) => &f.path,
        }
    }

    /// The node's fingerprint, if computed.
    #[must_use]
    pub const fn hash(&self) -> Option<Hash> {
        match self {
            Self::Dir(d) => d.hash,
            Self::File(f) => f.hash,
        }
    }

    /// Whether this is a directory node.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir(_))
    }

    /// Size in bytes: file size, or sum of a directory's descendants.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Dir(d) => d.size,
            Self::File(f) => f.stats.size,
        }
    }
}

// ---------------------------------------------------------------------------
// TreeDir operations
// ---------------------------------------------------------------------------

/// Options for [`TreeDir::get_all_tree_files`].
#[derive(Clone, Copy, Debug)]
pub struct FlattenOpts {
    /// Descend the whole subtree instead of one level.
    pub entire_hierarchy: bool,
    /// Include directory nodes in the result.
    pub include_dirs: bool,
}

impl TreeDir {
    /// A fresh root directory.
    #[must_use]
    pub fn root() -> Self {
        Self {
            hash: None,
            path: String::new(),
            children: Vec::new(),
            size: 0,
        }
    }

    /// Whether this node is the tree root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Flatten to a map keyed by relative path.
    #[must_use]
    pub fn get_all_tree_files(&self, opts: FlattenOpts) -> BTreeMap<String, &TreeEntry> {
        let mut out = BTreeMap::new();
        for child in &self.children {
            match child {
                TreeEntry::File(f) => {
                    out.insert(f.path.clone(), child);
                }
                TreeEntry::Dir(d) => {
                    if opts.include_dirs {
                        out.insert(d.path.clone(), child);
                    }
                    if opts.entire_hierarchy {
                        out.extend(d.get_all_tree_files(opts));
                    }
                }
            }
        }
        out
    }

    /// Pre-order visit of every entry below this directory.
    pub fn walk<'a>(&'a self, cb: &mut dyn FnMut(&'a TreeEntry)) {
        for child in &self.children {
            cb(child);
            if let TreeEntry::Dir(d) = child {
                d.walk(cb);
            }
        }
    }

    /// Post-order prune: drop every entry for which `predicate` returns
    /// `true`. Pruning a directory drops its whole subtree.
    pub fn remove(&mut self, predicate: &dyn Fn(&TreeEntry) -> bool) {
        for child in &mut self.children {
            if let TreeEntry::Dir(d) = child {
                d.remove(predicate);
            }
        }
        self.children.retain(|child| !predicate(child));
    }

    /// Drop directories that (transitively) contain no files.
    pub fn prune_empty_dirs(&mut self) {
        for child in &mut self.children {
            if let TreeEntry::Dir(d) = child {
                d.prune_empty_dirs();
            }
        }
        self.children
            .retain(|child| !matches!(child, TreeEntry::Dir(d) if d.children.is_empty()));
    }

    /// Look up a direct child by path.
    #[must_use]
    pub fn child(&self, path: &str) -> Option<&TreeEntry> {
        self.children.iter().find(|c| c.path() == path)
    }

    /// Look up an entry anywhere in the subtree by path.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&TreeEntry> {
        for child in &self.children {
            if child.path() == path {
                return Some(child);
            }
            if let TreeEntry::Dir(d) = child
                && path.starts_with(&format!("{}/", d.path))
            {
                return d.find(path);
            }
        }
        None
    }

    /// Recursive structural merge. When both sides contain a child with the
    /// same path, `high` wins; same-path directories merge recursively.
    #[must_use]
    pub fn merge(low: &Self, high: &Self) -> Self {
        let mut merged = Self {
            hash: None,
            path: high.path.clone(),
            children: Vec::new(),
            size: 0,
        };
        // Low side first, preserving its order; high overrides in place.
        for lo in &low.children {
            match (lo, high.child(lo.path())) {
                (TreeEntry::Dir(lo_dir), Some(TreeEntry::Dir(hi_dir))) => {
                    merged
                        .children
                        .push(TreeEntry::Dir(Self::merge(lo_dir, hi_dir)));
                }
                (_, Some(hi)) => merged.children.push(hi.clone()),
                (_, None) => merged.children.push(lo.clone()),
            }
        }
        // High-only children append in their own order.
        for hi in &high.children {
            if low.child(hi.path()).is_none() {
                merged.children.push(hi.clone());
            }
        }
        merged
    }

    /// Recompute directory sizes and fingerprints bottom-up.
    ///
    /// A directory's fingerprint is the hash of its children's concatenated
    /// hex fingerprints in insertion order. Files keep whatever fingerprint
    /// they carry.
    pub fn compute_hashes(&mut self) {
        let mut concat = String::new();
        let mut size = 0u64;
        for child in &mut self.children {
            if let TreeEntry::Dir(d) = child {
                d.compute_hashes();
            }
            if let Some(h) = child.hash() {
                concat.push_str(&h.to_hex());
            }
            size += child.size();
        }
        self.size = size;
        self.hash = Some(hasher::hash_bytes(concat.as_bytes()));
    }

    /// Recompute sizes after deserialization (sizes are not on the wire).
    pub fn rehydrate_sizes(&mut self) {
        let mut size = 0u64;
        for child in &mut self.children {
            if let TreeEntry::Dir(d) = child {
                d.rehydrate_sizes();
            }
            size += child.size();
        }
        self.size = size;
    }

    /// Validate every node: sensible dates, present 64-hex fingerprints,
    /// non-empty paths below the root.
    ///
    /// # Errors
    /// A description of the first offending node.
    pub fn validate(&self) -> Result<(), String> {
        let mut problem = None;
        self.walk(&mut |entry| {
            if problem.is_some() {
                return;
            }
            if entry.path().is_empty() {
                problem = Some("non-root node with empty path".to_owned());
                return;
            }
            if entry.hash().is_none() {
                problem = Some(format!("node {:?} has no fingerprint", entry.path()));
                return;
            }
            if let TreeEntry::File(f) = entry
                && (f.stats.mtime == 0 || f.stats.ctime == 0 || f.stats.birthtime == 0)
            {
                problem = Some(format!("node {:?} has unset timestamps", f.path));
            }
        });
        match problem {
            Some(p) => Err(p),
            None => Ok(()),
        }
    }

    /// Insert a file at its path, creating intermediate directories.
    ///
    /// An existing entry at the same path is replaced.
    pub fn insert_file(&mut self, file: TreeFile) {
        let rel = file.path.clone();
        let dir = self.ensure_dir_chain(&rel);
        if let Some(pos) = dir.children.iter().position(|c| c.path() == rel) {
            dir.children[pos] = TreeEntry::File(file);
        } else {
            dir.children.push(TreeEntry::File(file));
        }
    }

    /// Insert an (empty) directory chain for `rel` and return the deepest
    /// directory that should own an entry at `rel`.
    fn ensure_dir_chain(&mut self, rel: &str) -> &mut Self {
        let Some(parent) = fsutil::parent_rel(rel) else {
            return self;
        };
        let mut segments: Vec<&str> = parent.split('/').collect();
        segments.reverse();
        self.descend(&mut segments)
    }

    fn descend(&mut self, segments: &mut Vec<&str>) -> &mut Self {
        let Some(seg) = segments.pop() else {
            return self;
        };
        let child_path = if self.path.is_empty() {
            seg.to_owned()
        } else {
            format!("{}/{seg}", self.path)
        };
        let pos = self
            .children
            .iter()
            .position(|c| c.is_dir() && c.path() == child_path);
        let pos = match pos {
            Some(p) => p,
            None => {
                self.children.push(TreeEntry::Dir(Self {
                    hash: None,
                    path: child_path,
                    children: Vec::new(),
                    size: 0,
                }));
                self.children.len() - 1
            }
        };
        match &mut self.children[pos] {
            TreeEntry::Dir(d) => d.descend(segments),
            TreeEntry::File(_) => unreachable!("position filtered to dirs"),
        }
    }
}

// ---------------------------------------------------------------------------
// Worktree construction
// ---------------------------------------------------------------------------

/// A file the index has hashed: fingerprint plus the stats captured at
/// hashing time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    /// Content fingerprint.
    pub hash: Hash,
    /// Stats at hashing time.
    pub stats: FileStats,
}

/// Build a tree from the worktree on disk.
///
/// Walks everything except `.snow`/`.git` (hidden files included), stats
/// every entry, and fills leaf fingerprints from `processed` where present —
/// entries absent from the map keep `hash: None` for later filling.
///
/// # Errors
/// Fails only if the worktree root is unreadable.
pub fn construct_tree(
    worktree_root: &std::path::Path,
    processed: &BTreeMap<String, ProcessedFile>,
) -> std::io::Result<TreeDir> {
    let flags = WalkFlags {
        files: true,
        dirs: true,
        hidden: true,
        recursive: true,
        vcs_dirs: false,
    };
    let mut root = TreeDir::root();
    for entry in fsutil::os_walk(worktree_root, flags)? {
        if entry.is_dir {
            // Registers the directory itself; empty dirs stay visible until
            // prune_empty_dirs decides their fate.
            root.ensure_dir_chain(&format!("{}/x", entry.rel));
            continue;
        }
        let (hash, stats) = match processed.get(&entry.rel) {
            Some(p) => (Some(p.hash), p.stats),
            None => (None, entry.stats),
        };
        root.insert_file(TreeFile {
            hash,
            ext: fsutil::ext_of(&entry.rel),
            path: entry.rel,
            stats,
        });
    }
    root.rehydrate_sizes();
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(size: u64) -> FileStats {
        FileStats {
            size,
            mtime: 1_700_000_000_000,
            ctime: 1_700_000_000_000,
            birthtime: 1_700_000_000_000,
        }
    }

    fn file(path: &str, size: u64) -> TreeFile {
        TreeFile {
            hash: Some(hasher::hash_bytes(path.as_bytes())),
            ext: fsutil::ext_of(path),
            path: path.to_owned(),
            stats: stats(size),
        }
    }

    fn sample_tree() -> TreeDir {
        let mut root = TreeDir::root();
        root.insert_file(file("texture.psd", 10));
        root.insert_file(file("models/hero/hero.blend", 20));
        root.insert_file(file("models/hero/hero.ztl", 30));
        root.insert_file(file("models/villain.blend", 40));
        root.compute_hashes();
        root
    }

    // -- structure --

    #[test]
    fn insert_creates_dir_chain() {
        let root = sample_tree();
        let models = root.child("models").unwrap();
        assert!(models.is_dir());
        let hero = root.find("models/hero").unwrap();
        assert!(hero.is_dir());
        assert!(root.find("models/hero/hero.blend").is_some());
    }

    #[test]
    fn sizes_roll_up() {
        let root = sample_tree();
        assert_eq!(root.size, 100);
        assert_eq!(root.find("models").unwrap().size(), 90);
        assert_eq!(root.find("models/hero").unwrap().size(), 50);
    }

    #[test]
    fn flatten_one_level_vs_hierarchy() {
        let root = sample_tree();
        let shallow = root.get_all_tree_files(FlattenOpts {
            entire_hierarchy: false,
            include_dirs: true,
        });
        assert!(shallow.contains_key("texture.psd"));
        assert!(shallow.contains_key("models"));
        assert!(!shallow.contains_key("models/hero/hero.blend"));

        let deep = root.get_all_tree_files(FlattenOpts {
            entire_hierarchy: true,
            include_dirs: false,
        });
        assert_eq!(deep.len(), 4);
        assert!(deep.contains_key("models/hero/hero.ztl"));
        assert!(!deep.contains_key("models"));
    }

    #[test]
    fn walk_is_preorder() {
        let root = sample_tree();
        let mut seen = Vec::new();
        root.walk(&mut |e| seen.push(e.path().to_owned()));
        let models_idx = seen.iter().position(|p| p == "models").unwrap();
        let blend_idx = seen
            .iter()
            .position(|p| p == "models/hero/hero.blend")
            .unwrap();
        assert!(models_idx < blend_idx, "parent must precede child: {seen:?}");
    }

    // -- fingerprints --

    #[test]
    fn dir_hash_is_hash_of_child_hashes() {
        let root = sample_tree();
        let TreeEntry::Dir(hero) = root.find("models/hero").unwrap() else {
            panic!("expected dir");
        };
        let mut concat = String::new();
        for child in &hero.children {
            concat.push_str(&child.hash().unwrap().to_hex());
        }
        assert_eq!(hero.hash, Some(hasher::hash_bytes(concat.as_bytes())));
    }

    #[test]
    fn child_order_affects_dir_hash() {
        let mut a = TreeDir::root();
        a.insert_file(file("x.psd", 1));
        a.insert_file(file("y.psd", 1));
        a.compute_hashes();

        let mut b = TreeDir::root();
        b.insert_file(file("y.psd", 1));
        b.insert_file(file("x.psd", 1));
        b.compute_hashes();

        assert_ne!(a.hash, b.hash);
    }

    // -- prune / remove / merge --

    #[test]
    fn remove_prunes_matching_subtrees() {
        let mut root = sample_tree();
        root.remove(&|e| e.path() == "models/hero");
        assert!(root.find("models/hero").is_none());
        assert!(root.find("models/hero/hero.blend").is_none());
        assert!(root.find("models/villain.blend").is_some());
    }

    #[test]
    fn prune_empty_dirs_cascades() {
        let mut root = sample_tree();
        root.remove(&|e| !e.is_dir());
        root.prune_empty_dirs();
        assert!(root.children.is_empty(), "{root:?}");
    }

    #[test]
    fn merge_high_wins_on_collision() {
        let mut low = TreeDir::root();
        low.insert_file(file("a.psd", 1));
        let mut shared_old = file("shared.psd", 2);
        shared_old.hash = Some(hasher::hash_bytes(b"old"));
        low.insert_file(shared_old);

        let mut high = TreeDir::root();
        let mut shared_new = file("shared.psd", 3);
        shared_new.hash = Some(hasher::hash_bytes(b"new"));
        high.insert_file(shared_new);
        high.insert_file(file("b.psd", 4));

        let merged = TreeDir::merge(&low, &high);
        assert!(merged.child("a.psd").is_some());
        assert!(merged.child("b.psd").is_some());
        let shared = merged.child("shared.psd").unwrap();
        assert_eq!(shared.hash(), Some(hasher::hash_bytes(b"new")));
        assert_eq!(shared.size(), 3);
    }

    #[test]
    fn merge_recurses_into_same_path_dirs() {
        let mut low = TreeDir::root();
        low.insert_file(file("models/a.blend", 1));
        let mut high = TreeDir::root();
        high.insert_file(file("models/b.blend", 2));

        let merged = TreeDir::merge(&low, &high);
        assert!(merged.find("models/a.blend").is_some());
        assert!(merged.find("models/b.blend").is_some());
        // "models" must not be duplicated
        let dirs = merged
            .children
            .iter()
            .filter(|c| c.path() == "models")
            .count();
        assert_eq!(dirs, 1);
    }

    // -- serialization --

    #[test]
    fn json_roundtrip_preserves_structure_and_hashes() {
        let root = sample_tree();
        let json = serde_json::to_string(&root).unwrap();
        let mut back: TreeDir = serde_json::from_str(&json).unwrap();
        back.rehydrate_sizes();
        assert_eq!(back, {
            let mut r = root.clone();
            r.rehydrate_sizes();
            r
        });
        assert_eq!(back.hash, root.hash);
        assert_eq!(back.size, root.size);
    }

    #[test]
    fn file_json_shape_matches_wire_format() {
        let f = file("texture.psd", 10);
        let v = serde_json::to_value(TreeEntry::File(f)).unwrap();
        assert!(v.get("ext").is_some());
        assert!(v.get("stats").and_then(|s| s.get("mtime")).is_some());
        assert!(v.get("children").is_none());
    }

    #[test]
    fn validate_flags_missing_fingerprint() {
        let mut root = TreeDir::root();
        root.insert_file(TreeFile {
            hash: None,
            ext: ".psd".to_owned(),
            path: "a.psd".to_owned(),
            stats: stats(1),
        });
        root.compute_hashes();
        let err = root.validate().unwrap_err();
        assert!(err.contains("no fingerprint"), "{err}");
    }

    #[test]
    fn validate_accepts_complete_tree() {
        sample_tree().validate().unwrap();
    }

    // -- worktree construction --

    #[test]
    fn construct_tree_fills_from_processed_map() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("texture.psd"), b"px").unwrap();
        std::fs::write(dir.path().join("models/hero.blend"), b"bl").unwrap();

        let mut processed = BTreeMap::new();
        processed.insert(
            "texture.psd".to_owned(),
            ProcessedFile {
                hash: hasher::hash_bytes(b"px"),
                stats: stats(2),
            },
        );

        let tree = construct_tree(dir.path(), &processed).unwrap();
        let TreeEntry::File(tex) = tree.find("texture.psd").unwrap() else {
            panic!("expected file");
        };
        assert_eq!(tex.hash, Some(hasher::hash_bytes(b"px")));
        let TreeEntry::File(hero) = tree.find("models/hero.blend").unwrap() else {
            panic!("expected file");
        };
        assert!(hero.hash.is_none(), "unprocessed file keeps hash unset");
    }

    #[test]
    fn construct_tree_keeps_empty_dirs_until_pruned() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let tree = construct_tree(dir.path(), &BTreeMap::new()).unwrap();
        assert!(tree.find("empty").is_some());
        let mut pruned = tree;
        pruned.prune_empty_dirs();
        assert!(pruned.find("empty").is_none());
    }

    proptest::proptest! {
        // Merging a tree with itself is the identity on structure.
        #[test]
        fn merge_self_identity(paths in proptest::collection::btree_set("[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.psd", 1..8)) {
            let mut tree = TreeDir::root();
            for p in &paths {
                tree.insert_file(file(p, 1));
            }
            tree.compute_hashes();
            let mut merged = TreeDir::merge(&tree, &tree);
            merged.compute_hashes();
            proptest::prop_assert_eq!(merged.hash, tree.hash);
        }
    }
}
