//! The commit value type and its wire format.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone as _, Utc};
use serde::{Deserialize, Serialize};
use snow_store::{Hash, hasher};

use super::tree::TreeDir;

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Runtime flags that survive restarts but are not part of the commit's
/// identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeData {
    /// Deletion of this commit was requested while it was checked out;
    /// finalized on the next checkout that moves HEAD away.
    #[serde(default, rename = "markForDeletion")]
    pub mark_for_deletion: bool,
    /// Fingerprints known to be absent from the object store (detected
    /// during restore attempts).
    #[serde(default, rename = "missingObjects", skip_serializing_if = "BTreeSet::is_empty")]
    pub missing_objects: BTreeSet<Hash>,
}

impl RuntimeData {
    fn is_default(&self) -> bool {
        !self.mark_for_deletion && self.missing_objects.is_empty()
    }
}

/// An immutable labeled snapshot of a tree.
///
/// Identity is `hash`, computed over `<repoId><rfc3339-date><message>` so
/// that identical messages at different instants — or in different
/// repositories — produce different commits.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    /// Commit fingerprint.
    pub hash: Hash,
    /// Commit message, sanitized to be JSON-safe.
    pub message: String,
    /// Creation instant.
    pub date: DateTime<Utc>,
    /// Last mutation (message edit); `None` if never mutated.
    pub last_modified: Option<DateTime<Utc>>,
    /// Parent fingerprints, oldest first. Empty exactly for the root commit.
    pub parents: Vec<Hash>,
    /// Snapshot root.
    pub root: TreeDir,
    /// Free-form labels.
    pub tags: BTreeSet<String>,
    /// Caller-attached data, persisted verbatim.
    pub user_data: BTreeMap<String, serde_json::Value>,
    /// Non-identity flags.
    pub runtime: RuntimeData,
}

impl Commit {
    /// Create a commit, computing its fingerprint.
    #[must_use]
    pub fn new(
        repo_id: &str,
        message: &str,
        date: DateTime<Utc>,
        parents: Vec<Hash>,
        root: TreeDir,
    ) -> Self {
        let message = sanitize_message(message);
        let identity = format!("{repo_id}{}{message}", date.to_rfc3339());
        Self {
            hash: hasher::hash_bytes(identity.as_bytes()),
            message,
            date,
            last_modified: None,
            parents,
            root,
            tags: BTreeSet::new(),
            user_data: BTreeMap::new(),
            runtime: RuntimeData::default(),
        }
    }

    /// Whether this is the repository's root commit.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// The instant used for ordering in merges: last modification if any,
    /// else creation.
    #[must_use]
    pub fn sort_date(&self) -> DateTime<Utc> {
        self.last_modified.unwrap_or(self.date)
    }
}

/// Strip characters that have no place in a commit message: C0 controls
/// other than newline and tab.
#[must_use]
pub fn sanitize_message(msg: &str) -> String {
    msg.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// On-disk JSON shape of a commit (`versions/<hash>`).
#[derive(Serialize, Deserialize)]
struct CommitWire {
    hash: Hash,
    message: String,
    date: i64,
    parent: Option<Vec<Hash>>,
    root: TreeDir,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(
        default,
        rename = "userData",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    user_data: BTreeMap<String, serde_json::Value>,
    #[serde(
        default,
        rename = "lastModifiedDate",
        skip_serializing_if = "Option::is_none"
    )]
    last_modified_date: Option<i64>,
    #[serde(
        default,
        rename = "runtimeData",
        skip_serializing_if = "Option::is_none"
    )]
    runtime_data: Option<RuntimeData>,
}

impl Commit {
    /// Serialize to the `versions/<hash>` JSON document.
    ///
    /// # Errors
    /// Serialization errors from serde.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let wire = CommitWire {
            hash: self.hash,
            message: self.message.clone(),
            date: self.date.timestamp_millis(),
            parent: if self.parents.is_empty() {
                None
            } else {
                Some(self.parents.clone())
            },
            root: self.root.clone(),
            tags: self.tags.clone(),
            user_data: self.user_data.clone(),
            last_modified_date: self.last_modified.map(|d| d.timestamp_millis()),
            runtime_data: (!self.runtime.is_default()).then(|| self.runtime.clone()),
        };
        serde_json::to_string_pretty(&wire)
    }

    /// Rehydrate from the `versions/<hash>` JSON document.
    ///
    /// # Errors
    /// Parse errors, including out-of-range dates.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let wire: CommitWire = serde_json::from_str(raw)?;
        let mut root = wire.root;
        root.rehydrate_sizes();
        Ok(Self {
            hash: wire.hash,
            message: wire.message,
            date: ms_to_date(wire.date),
            last_modified: wire.last_modified_date.map(ms_to_date),
            parents: wire.parent.unwrap_or_default(),
            root,
            tags: wire.tags,
            user_data: wire.user_data,
            runtime: wire.runtime_data.unwrap_or_default(),
        })
    }
}

pub(crate) fn ms_to_date(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap_or_default())
}
