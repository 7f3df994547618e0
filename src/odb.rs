//! On-disk repository database.
//!
//! Layout under the commondir (named `.snow` unless redirected):
//!
//! ```text
//! commondir/
//!   config                  JSON, version-gated
//!   HEAD                    branch name, or 64-hex hash when detached
//!   state                   opaque dirty marker, rewritten on every mutation
//!   IMPORTANT.txt           human warning
//!   refs/<name>             reference JSON
//!   versions/<commitHash>   commit JSON
//!   objects/XX/YY/<hash><ext>   content-addressed blobs (snow-store)
//!   objects/tmp/<random>    scratch during object writes
//!   logs/mainlog            append-only human-readable log
//! ```
//!
//! When the commondir lives outside the worktree, `<workdir>/.snow` is a
//! plain file holding the commondir's absolute path.
//!
//! All metadata writes go through write-temp-then-rename; `state` is
//! refreshed after every mutation so external readers can cheap-check for
//! staleness. Failures writing `state` or the log never fail an operation.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng as _;
use snow_store::{BlobStore, Hash, WrittenBlob};

use crate::config::RepoConfig;
use crate::error::{Result, SnowError};
use crate::fsutil::{self, DOT_SNOW, FileStats};
use crate::iocx::IoContext;
use crate::model::reference::HEAD_NAME;
use crate::model::tree::{ProcessedFile, TreeFile};
use crate::model::{Commit, Head, Reference};

const IMPORTANT_TXT: &str = "\
This directory is managed by snow. It holds every version of every file in
the project. Do not edit, move, or delete anything in here by hand — doing
so can destroy committed work that exists nowhere else.
";

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Locate the worktree and commondir for `start`, searching ancestors for a
/// `.snow` directory or redirection file.
///
/// # Errors
/// [`SnowError::NotARepository`] when no ancestor carries a `.snow`.
pub fn discover(start: &Path) -> Result<(PathBuf, PathBuf)> {
    let start_abs = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };
    let mut cursor = Some(start_abs.as_path());
    while let Some(dir) = cursor {
        let marker = dir.join(DOT_SNOW);
        if marker.is_dir() {
            return Ok((dir.to_path_buf(), marker));
        }
        if marker.is_file() {
            let target = std::fs::read_to_string(&marker)?;
            let commondir = PathBuf::from(target.trim());
            if commondir.is_dir() {
                return Ok((dir.to_path_buf(), commondir));
            }
        }
        cursor = dir.parent();
    }
    Err(SnowError::NotARepository {
        path: start.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Odb
// ---------------------------------------------------------------------------

/// Handle to an on-disk repository database.
#[derive(Clone, Debug)]
pub struct Odb {
    commondir: PathBuf,
    config: RepoConfig,
    store: BlobStore,
}

impl Odb {
    /// Initialize a fresh database.
    ///
    /// `commondir` defaults to `<workdir>/.snow`; an explicit location
    /// outside the worktree gets a redirection file at `<workdir>/.snow`.
    ///
    /// # Errors
    /// [`SnowError::ProtectedLocation`] for OS-critical paths,
    /// [`SnowError::RepositoryExists`] when either location is taken.
    pub fn init(workdir: &Path, commondir: Option<&Path>) -> Result<Self> {
        if fsutil::protected_location(workdir) {
            return Err(SnowError::ProtectedLocation {
                path: workdir.to_path_buf(),
            });
        }
        let marker = workdir.join(DOT_SNOW);
        if marker.exists() {
            return Err(SnowError::RepositoryExists { path: marker });
        }

        let commondir = match commondir {
            Some(dir) => dir.to_path_buf(),
            None => marker.clone(),
        };
        if commondir != marker && commondir.exists() {
            return Err(SnowError::RepositoryExists { path: commondir });
        }

        fsutil::ensure_dir(&commondir)?;
        fsutil::ensure_dir(&commondir.join("versions"))?;
        fsutil::ensure_dir(&commondir.join("refs"))?;
        fsutil::ensure_dir(&commondir.join("logs"))?;
        let store = BlobStore::open(&commondir.join("objects"))?;

        let config = RepoConfig::fresh();
        fsutil::write_safe_file(&commondir.join("config"), config.to_json()?.as_bytes())?;
        fsutil::write_safe_file(&commondir.join("IMPORTANT.txt"), IMPORTANT_TXT.as_bytes())?;
        fsutil::write_safe_file(&commondir.join(HEAD_NAME), b"")?;

        if commondir == marker {
            fsutil::hide_item(&commondir);
        } else {
            fsutil::write_safe_file(&marker, commondir.to_string_lossy().as_bytes())?;
        }

        let odb = Self {
            commondir,
            config,
            store,
        };
        odb.update_state();
        tracing::info!(commondir = %odb.commondir.display(), "initialized repository");
        Ok(odb)
    }

    /// Open an existing database at `commondir`.
    ///
    /// # Errors
    /// Version-gate and I/O errors.
    pub fn open(commondir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(commondir.join("config")).map_err(|_| {
            SnowError::NotARepository {
                path: commondir.to_path_buf(),
            }
        })?;
        let config = RepoConfig::parse(&raw)?;
        let store = BlobStore::open(&commondir.join("objects"))?;
        Ok(Self {
            commondir: commondir.to_path_buf(),
            config,
            store,
        })
    }

    /// The commondir path.
    #[must_use]
    pub fn commondir(&self) -> &Path {
        &self.commondir
    }

    /// The parsed repository config.
    #[must_use]
    pub const fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// The commit-hash salt.
    #[must_use]
    pub fn repo_id(&self) -> &str {
        self.config.repo_id()
    }

    /// The underlying blob store.
    #[must_use]
    pub const fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Path a persisted index lives at (`INDEX` or `INDEX-<id>`).
    #[must_use]
    pub fn index_path(&self, id: &str) -> PathBuf {
        if id.is_empty() {
            self.commondir.join("INDEX")
        } else {
            self.commondir.join(format!("INDEX-{id}"))
        }
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Copy a worktree file into the object store.
    ///
    /// Stats the source first so the processed entry records the state the
    /// user saw, then lets the store copy-hash-rename.
    ///
    /// # Errors
    /// Store and I/O errors.
    pub fn write_object(&self, src_abs: &Path, iocx: &IoContext) -> Result<(WrittenBlob, FileStats)> {
        let meta = std::fs::metadata(src_abs)?;
        let stats = FileStats::from_metadata(&meta);
        let ext = fsutil::ext_of(&src_abs.to_string_lossy());
        let copier = iocx.copier();
        let blob = self.store.write_blob(src_abs, &ext, &copier)?;
        Ok((blob, stats))
    }

    /// Restore a committed file to `dst_abs`, setting its mtime to the
    /// recorded value so the next status pass sees it unmodified.
    ///
    /// # Errors
    /// [`SnowError::ObjectMissing`] when the blob is absent.
    pub fn read_object(&self, file: &TreeFile, dst_abs: &Path, iocx: &IoContext) -> Result<()> {
        let hash = file.hash.ok_or_else(|| SnowError::ObjectMissing {
            hash: "<unset>".to_owned(),
        })?;
        let copier = iocx.copier();
        self.store
            .read_blob(&hash, &file.ext, dst_abs, file.stats.mtime, &copier)?;
        Ok(())
    }

    /// Whether the store holds a blob with this fingerprint (any extension).
    #[must_use]
    pub fn contains_object(&self, hash: &Hash) -> bool {
        self.store.contains_hash(hash)
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    /// Read every commit under `versions/`.
    ///
    /// # Errors
    /// I/O and parse errors.
    pub fn read_commits(&self) -> Result<BTreeMap<Hash, Commit>> {
        let mut out = BTreeMap::new();
        let dir = self.commondir.join("versions");
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let raw = std::fs::read_to_string(entry.path())?;
            let commit = Commit::from_json(&raw)?;
            out.insert(commit.hash, commit);
        }
        Ok(out)
    }

    /// Persist a commit to `versions/<hash>` and refresh `state`.
    ///
    /// # Errors
    /// Serialization and I/O errors.
    pub fn write_commit(&self, commit: &Commit) -> Result<()> {
        let path = self.commondir.join("versions").join(commit.hash.to_hex());
        fsutil::write_safe_file(&path, commit.to_json()?.as_bytes())?;
        self.update_state();
        Ok(())
    }

    /// Remove `versions/<hash>` and refresh `state`.
    ///
    /// # Errors
    /// I/O errors other than the file already being gone.
    pub fn delete_commit_file(&self, hash: &Hash) -> Result<()> {
        let path = self.commondir.join("versions").join(hash.to_hex());
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        self.update_state();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // References and HEAD
    // -----------------------------------------------------------------------

    /// Read every reference under `refs/`.
    ///
    /// # Errors
    /// I/O and parse errors.
    pub fn read_references(&self) -> Result<Vec<Reference>> {
        let mut out = Vec::new();
        let dir = self.commondir.join("refs");
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let raw = std::fs::read_to_string(entry.path())?;
            out.push(Reference::from_json(&name, &raw)?);
        }
        Ok(out)
    }

    /// Persist a reference to `refs/<name>` and refresh `state`.
    ///
    /// # Errors
    /// Refuses the reserved name `HEAD`; serialization and I/O errors.
    pub fn write_reference(&self, reference: &Reference) -> Result<()> {
        if reference.name == HEAD_NAME {
            return Err(SnowError::BranchExists {
                name: HEAD_NAME.to_owned(),
            });
        }
        let path = self.commondir.join("refs").join(&reference.name);
        fsutil::write_safe_file(&path, reference.to_json()?.as_bytes())?;
        self.update_state();
        Ok(())
    }

    /// Remove `refs/<name>` and refresh `state`.
    ///
    /// # Errors
    /// [`SnowError::NoSuchReference`] if absent.
    pub fn delete_reference_file(&self, name: &str) -> Result<()> {
        let path = self.commondir.join("refs").join(name);
        match std::fs::remove_file(path) {
            Ok(()) => {
                self.update_state();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SnowError::NoSuchReference {
                name: name.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the HEAD pointer.
    ///
    /// Returns `None` for a repository with no commits yet. A branch name
    /// resolves through `refs`; a 64-hex content is a detached head.
    ///
    /// # Errors
    /// I/O errors reading the HEAD file.
    pub fn read_head(&self, refs: &[Reference]) -> Result<Option<Head>> {
        let raw = std::fs::read_to_string(self.commondir.join(HEAD_NAME))?;
        let content = raw.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if snow_store::hash::is_hex_hash(content) {
            let target: Hash = content
                .parse()
                .map_err(|e| SnowError::Io(std::io::Error::other(e)))?;
            return Ok(Some(Head::detached(target)));
        }
        let Some(branch) = refs.iter().find(|r| r.name == content) else {
            return Err(SnowError::NoSuchReference {
                name: content.to_owned(),
            });
        };
        Ok(Some(Head::named(&branch.name, branch.target)))
    }

    /// Persist the HEAD pointer and refresh `state`.
    ///
    /// # Errors
    /// I/O errors.
    pub fn write_head(&self, head: &Head) -> Result<()> {
        let content = if head.is_detached() {
            head.target.to_hex()
        } else {
            head.name.clone()
        };
        fsutil::write_safe_file(&self.commondir.join(HEAD_NAME), content.as_bytes())?;
        self.update_state();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State marker and log
    // -----------------------------------------------------------------------

    /// Rewrite the `state` dirty marker. Failures are swallowed — the marker
    /// is a cache-invalidation hint, not data.
    pub fn update_state(&self) {
        let token: u64 = rand::rng().random();
        let _ = fsutil::write_safe_file(
            &self.commondir.join("state"),
            format!("{token:016x}").as_bytes(),
        );
    }

    /// Append a line to `logs/mainlog`. Failures are swallowed.
    pub fn append_log(&self, line: &str) {
        let path = self.commondir.join("logs").join("mainlog");
        let stamp = Utc::now().to_rfc3339();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{stamp}  {line}"));
        if let Err(e) = result {
            tracing::debug!("mainlog append failed: {e}");
        }
    }
}

/// Bridge a store write into an index processed entry.
#[must_use]
pub fn processed_from_blob(blob: &WrittenBlob, stats: FileStats) -> ProcessedFile {
    ProcessedFile {
        hash: blob.hash,
        stats,
    }
}
