// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::input::Fingerprint;

/// Attribute key for the file name
pub const ATTR_LOG_FILE_NAME: &str = "log.file.name";
/// Attribute key for the file path
pub const ATTR_LOG_FILE_PATH: &str = "log.file.path";

/// Entry is one discovered record handed to the output boundary.
///
/// The body is the raw record bytes with the boundary stripped. `fingerprint`
/// identifies the logical source file and stays the same across renames, so
/// consumers correlate on it rather than on the path.
#[derive(Debug, Clone)]
pub struct Entry {
    /// When the record was read
    pub observed: DateTime<Utc>,

    /// Raw record content
    pub body: Bytes,

    /// Identity of the file the record came from
    pub fingerprint: Fingerprint,

    /// Byte position where the record begins in its file
    pub offset: u64,

    /// Set when the record was cut at the per-read byte cap instead of a boundary
    pub truncated: bool,

    /// File metadata attributes
    pub attributes: HashMap<String, Value>,
}

impl Entry {
    /// Create a new entry observed now
    pub fn new(body: impl Into<Bytes>, fingerprint: Fingerprint, offset: u64) -> Self {
        Self {
            observed: Utc::now(),
            body: body.into(),
            fingerprint,
            offset,
            truncated: false,
            attributes: HashMap::new(),
        }
    }

    /// Add a string attribute to the entry
    pub fn add_attribute_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), Value::String(value.into()));
    }

    /// Get a string attribute
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Body as UTF-8 text, replacing invalid sequences
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Byte position just past the record body
    pub fn end_offset(&self) -> u64 {
        self.offset + self.body.len() as u64
    }
}
