//! Repository configuration (`commondir/config`).
//!
//! The config is a small JSON document with a hard version gate. Everything
//! beyond the three fixed fields lives under `additionalConfig`, which is
//! where the repository id and forward-looking hooks (compression) sit.

use std::collections::BTreeMap;

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnowError};

/// The config version this build reads and writes.
pub const CONFIG_VERSION: u64 = 2;

/// Key under `additionalConfig` holding the repository id.
const REPO_ID_KEY: &str = "repoId";

/// Key under `additionalConfig` holding the compression hook.
const COMPRESS_KEY: &str = "compress";

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Parsed `commondir/config`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Format version; anything but [`CONFIG_VERSION`] is refused.
    pub version: u64,
    /// Whether executable bits are tracked. Off: binary assets carry none.
    pub filemode: bool,
    /// Whether symlinks are preserved.
    pub symlinks: bool,
    /// Open-ended extras: repository id, compression hook, embedder data.
    #[serde(
        default,
        rename = "additionalConfig",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub additional_config: BTreeMap<String, serde_json::Value>,
}

impl RepoConfig {
    /// A fresh config with a newly generated repository id.
    #[must_use]
    pub fn fresh() -> Self {
        let mut additional_config = BTreeMap::new();
        additional_config.insert(
            REPO_ID_KEY.to_owned(),
            serde_json::Value::String(generate_repo_id()),
        );
        Self {
            version: CONFIG_VERSION,
            filemode: false,
            symlinks: true,
            additional_config,
        }
    }

    /// Parse and version-gate a raw config document.
    ///
    /// # Errors
    /// [`SnowError::UnsupportedRepositoryVersion`] for any version other
    /// than [`CONFIG_VERSION`]; parse errors as I/O.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        if config.version != CONFIG_VERSION {
            return Err(SnowError::UnsupportedRepositoryVersion {
                version: config.version,
            });
        }
        Ok(config)
    }

    /// Serialize for writing to `commondir/config`.
    ///
    /// # Errors
    /// Serialization errors from serde.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The repository id used as the commit-hash salt.
    ///
    /// Repositories created before the id existed hash with an empty salt.
    #[must_use]
    pub fn repo_id(&self) -> &str {
        self.additional_config
            .get(REPO_ID_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// Whether the compression hook is switched on.
    ///
    /// Config surface only — object compression is not implemented.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.additional_config
            .get(COMPRESS_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

fn generate_repo_id() -> String {
    let mut rng = rand::rng();
    (0..4)
        .map(|_| format!("{:016x}", rng.random::<u64>()))
        .collect()
}
