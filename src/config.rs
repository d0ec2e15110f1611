// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file tailing engine.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Configuration for the file input
#[derive(Debug, Clone, Deserialize)]
pub struct FileInputConfig {
    /// Persister scope for this input's checkpoints
    #[serde(default = "default_id")]
    pub id: String,

    /// Glob patterns for files to include
    pub include: Vec<String>,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// How often to poll for file changes (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to start reading new files from
    #[serde(default)]
    pub start_at: StartAt,

    /// Size of fingerprint to use for file identification (in bytes)
    #[serde(default = "default_fingerprint_size")]
    pub fingerprint_size: usize,

    /// Maximum number of bytes read from a single file per cycle
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,

    /// Maximum number of files open for reading at once
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Consecutive cycles a tracked file may be missing before eviction
    #[serde(default = "default_max_missed_cycles")]
    pub max_missed_cycles: u32,

    /// How many evicted checkpoints to remember for resumption
    #[serde(default = "default_max_retired_checkpoints")]
    pub max_retired_checkpoints: usize,

    /// Whether to include the file name as an attribute
    #[serde(default = "default_true")]
    pub include_file_name: bool,

    /// Whether to include the file path as an attribute
    #[serde(default)]
    pub include_file_path: bool,
}

fn default_id() -> String {
    "file_input".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_fingerprint_size() -> usize {
    1000
}

fn default_max_log_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_concurrent_files() -> usize {
    512
}

fn default_max_missed_cycles() -> u32 {
    3
}

fn default_max_retired_checkpoints() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

/// Smallest fingerprint that still distinguishes files in practice
pub const MIN_FINGERPRINT_SIZE: usize = 16;

impl Default for FileInputConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            include: vec![],
            exclude: vec![],
            poll_interval_ms: default_poll_interval_ms(),
            start_at: StartAt::default(),
            fingerprint_size: default_fingerprint_size(),
            max_log_size: default_max_log_size(),
            max_concurrent_files: default_max_concurrent_files(),
            max_missed_cycles: default_max_missed_cycles(),
            max_retired_checkpoints: default_max_retired_checkpoints(),
            include_file_name: true,
            include_file_path: false,
        }
    }
}

impl FileInputConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration. Glob syntax is checked here as well so that
    /// a malformed pattern is reported once, before the engine starts.
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config(
                "include patterns cannot be empty".to_string(),
            ));
        }

        if self.fingerprint_size < MIN_FINGERPRINT_SIZE {
            return Err(Error::Config(format!(
                "fingerprint_size must be at least {} bytes",
                MIN_FINGERPRINT_SIZE
            )));
        }

        if self.max_log_size == 0 {
            return Err(Error::Config("max_log_size must be positive".to_string()));
        }

        if self.max_concurrent_files == 0 {
            return Err(Error::Config(
                "max_concurrent_files must be at least 1".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        for pattern in self.include.iter().chain(self.exclude.iter()) {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }

        Ok(())
    }
}
