// SPDX-License-Identifier: Apache-2.0

//! Persistence schema for the checkpoint table.
//!
//! The whole table lives under a single key as JSON:
//!
//! ```json
//! { "version": 1, "files": [ { "fingerprint": "...", "offset": 42, "path": "/var/log/a.log" } ], "retired": [] }
//! ```
//!
//! Fingerprints are base64 encoded. `path` is informational only; identity is
//! always the fingerprint.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::input::Fingerprint;

/// Key used to store known files state in the persister
pub const KNOWN_FILES_KEY: &str = "knownFiles";

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Persisted state for all known files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// Files tracked when the checkpoint was written
    pub files: Vec<PersistedFileEntry>,
    /// Recently evicted files, newest first
    #[serde(default)]
    pub retired: Vec<PersistedFileEntry>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            files: Vec::new(),
            retired: Vec::new(),
        }
    }
}

/// Checkpoint record for a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFileEntry {
    pub fingerprint: Fingerprint,
    /// Persisted offset (byte position in file)
    pub offset: u64,
    /// Last known path to the file
    #[serde(default)]
    pub path: String,
}

impl PersistedState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.retired.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored table. A version this build does not understand is
    /// rejected instead of being guessed at.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let state: PersistedState = serde_json::from_slice(bytes)?;
        if state.version != PERSISTED_STATE_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported checkpoint version {} (expected {})",
                state.version, PERSISTED_STATE_VERSION
            )));
        }
        Ok(state)
    }
}
