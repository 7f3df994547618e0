//! References (branches) and the HEAD pointer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snow_store::Hash;

use super::commit::ms_to_date;

/// The reserved name of the floating current pointer.
pub const HEAD_NAME: &str = "HEAD";

/// Default branch created on a repository's first real commit.
pub const DEFAULT_BRANCH: &str = "Main";

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

/// The kind of a reference. Only branches exist today; the numeric value is
/// the wire encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RefType {
    /// A movable branch head.
    #[default]
    Branch,
}

impl From<RefType> for u8 {
    fn from(_: RefType) -> Self {
        0
    }
}

impl TryFrom<u8> for RefType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Branch),
            other => Err(format!("unknown reference type {other}")),
        }
    }
}

/// A mutable named pointer to a commit.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    /// Reference name; `HEAD` is reserved.
    pub name: String,
    /// Kind of reference.
    pub ref_type: RefType,
    /// The commit this reference points at.
    pub target: Hash,
    /// The commit the branch was created at.
    pub start: Option<Hash>,
    /// Last mutation instant.
    pub last_modified: Option<DateTime<Utc>>,
    /// Caller-attached data.
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl Reference {
    /// Create a branch reference.
    #[must_use]
    pub fn branch(name: &str, target: Hash, start: Option<Hash>) -> Self {
        Self {
            name: name.to_owned(),
            ref_type: RefType::Branch,
            target,
            start,
            last_modified: Some(Utc::now()),
            user_data: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format (refs/<name>; the name is the filename)
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct ReferenceWire {
    hash: Hash,
    #[serde(rename = "type")]
    ref_type: RefType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<Hash>,
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
}

impl Reference {
    /// Serialize to the `refs/<name>` JSON document.
    ///
    /// # Errors
    /// Serialization errors from serde.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReferenceWire {
            hash: self.target,
            ref_type: self.ref_type,
            start: self.start,
            user_data: self.user_data.clone(),
            last_modified_date: self.last_modified.map(|d| d.timestamp_millis()),
        })
    }

    /// Rehydrate from a `refs/<name>` JSON document; the name comes from the
    /// filename.
    ///
    /// # Errors
    /// Parse errors from serde.
    pub fn from_json(name: &str, raw: &str) -> serde_json::Result<Self> {
        let wire: ReferenceWire = serde_json::from_str(raw)?;
        Ok(Self {
            name: name.to_owned(),
            ref_type: wire.ref_type,
            target: wire.hash,
            start: wire.start,
            last_modified: wire.last_modified_date.map(ms_to_date),
            user_data: wire.user_data,
        })
    }
}

// ---------------------------------------------------------------------------
// Head
// ---------------------------------------------------------------------------

/// The floating current pointer.
///
/// Named — tracks a branch; or detached — `name` is the literal `HEAD` and
/// `target` is a raw commit hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Head {
    /// Branch name, or [`HEAD_NAME`] when detached.
    pub name: String,
    /// The commit currently checked out.
    pub target: Hash,
}

impl Head {
    /// A HEAD tracking `branch`.
    #[must_use]
    pub fn named(branch: &str, target: Hash) -> Self {
        Self {
            name: branch.to_owned(),
            target,
        }
    }

    /// A detached HEAD at `target`.
    #[must_use]
    pub fn detached(target: Hash) -> Self {
        Self {
            name: HEAD_NAME.to_owned(),
            target,
        }
    }

    /// Whether HEAD points at a raw commit rather than a branch.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.name == HEAD_NAME
    }
}
