// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// A fingerprint identifies a file by the first N bytes of its content.
/// This allows tracking files even if they are renamed or moved.
///
/// The bytes are reference counted so every entry emitted from a file can
/// carry its fingerprint without copying it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    first_bytes: Bytes,
}

/// Prefix equality: two fingerprints identify the same file iff one is a
/// byte-for-byte prefix of the other. Empty fingerprints never match anything,
/// including each other.
pub fn prefix_match(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

impl Fingerprint {
    /// Create a new fingerprint from a file.
    ///
    /// Seeks the given handle to the start, so callers must pass a handle that
    /// no reader is using.
    pub fn from_file(file: &mut File, size: usize) -> io::Result<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut buf = Vec::with_capacity(size);
        // `take` + `read_to_end` retries short reads, which a single `read`
        // does not on network filesystems
        file.take(size as u64).read_to_end(&mut buf)?;

        Ok(Self {
            first_bytes: Bytes::from(buf),
        })
    }

    /// Fingerprint a path through its own, independent file handle.
    pub fn from_path(path: impl AsRef<Path>, size: usize) -> io::Result<Self> {
        let mut file = File::open(path)?;
        Self::from_file(&mut file, size)
    }

    /// Create a fingerprint from raw bytes (for deserialization)
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            first_bytes: bytes.into(),
        }
    }

    /// Get the fingerprint bytes
    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    /// Get the length of the fingerprint
    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    /// Check if the fingerprint is empty
    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// A fingerprint shorter than the configured size came from a file that
    /// has not yet grown past the threshold. It is likely to collide with other
    /// young files, so it is never used to merge two distinct candidates.
    pub fn is_provisional(&self, size: usize) -> bool {
        self.first_bytes.len() < size
    }

    /// Whether this fingerprint and `other` identify the same logical file.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        prefix_match(&self.first_bytes, &other.first_bytes)
    }

    /// Check if this fingerprint starts with another fingerprint.
    /// A fingerprint that starts with an older one is the same file after it
    /// has grown.
    pub fn starts_with(&self, other: &Fingerprint) -> bool {
        other.len() <= self.len() && prefix_match(&self.first_bytes, &other.first_bytes)
    }

    /// Base64 form used in checkpoints and logs
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.first_bytes)
    }

    /// Parse the base64 form written by [`Fingerprint::to_base64`]
    pub fn from_base64(s: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(s).map(Self::from_bytes)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.first_bytes[..self.first_bytes.len().min(16)];
        f.debug_struct("Fingerprint")
            .field("len", &self.first_bytes.len())
            .field("head", &String::from_utf8_lossy(head))
            .finish()
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
