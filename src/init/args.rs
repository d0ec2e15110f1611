// SPDX-License-Identifier: Apache-2.0

use clap::{ArgAction, Args, ValueEnum};
use std::path::PathBuf;

use crate::config::{FileInputConfig, StartAt};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

/// Where to start reading files
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub file_input: FileInputArgs,

    /// Path to store file offsets for persistence across restarts
    #[arg(
        long,
        env = "FILETAIL_OFFSETS_PATH",
        default_value = "/var/lib/filetail/offsets.json"
    )]
    pub offsets_path: PathBuf,

    /// Entries buffered between the readers and stdout
    #[arg(long, env = "FILETAIL_OUTPUT_QUEUE_SIZE", default_value = "1000")]
    pub output_queue_size: usize,
}

#[derive(Debug, Args, Clone)]
pub struct FileInputArgs {
    /// Persister scope for this input's checkpoints
    #[arg(long, env = "FILETAIL_ID", default_value = "file_input")]
    pub id: String,

    /// Comma-separated glob patterns for files to include (e.g., "/var/log/*.log,/tmp/*.log")
    #[arg(long, env = "FILETAIL_INCLUDE", value_delimiter = ',', required = true)]
    pub include: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "FILETAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Poll interval in milliseconds
    #[arg(long, env = "FILETAIL_POLL_INTERVAL_MS", default_value = "200")]
    pub poll_interval_ms: u64,

    /// Where to start reading files found at startup: beginning or end
    #[arg(value_enum, long, env = "FILETAIL_START_AT", default_value = "end")]
    pub start_at: StartAtArg,

    /// Bytes from the head of a file used to identify it
    #[arg(long, env = "FILETAIL_FINGERPRINT_SIZE", default_value = "1000")]
    pub fingerprint_size: usize,

    /// Maximum bytes read from one file per cycle; also the longest record
    #[arg(long, env = "FILETAIL_MAX_LOG_SIZE", default_value = "1048576")]
    pub max_log_size: usize,

    /// Maximum number of files open for reading at once
    #[arg(long, env = "FILETAIL_MAX_CONCURRENT_FILES", default_value = "512")]
    pub max_concurrent_files: usize,

    /// Cycles a tracked file may be missing from the listing before it is dropped
    #[arg(long, env = "FILETAIL_MAX_MISSED_CYCLES", default_value = "3")]
    pub max_missed_cycles: u32,

    /// Checkpoints of dropped files remembered for resumption
    #[arg(long, env = "FILETAIL_MAX_RETIRED_CHECKPOINTS", default_value = "1024")]
    pub max_retired_checkpoints: usize,

    /// Include file name as a log attribute
    #[arg(
        long,
        env = "FILETAIL_INCLUDE_FILE_NAME",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub include_file_name: bool,

    /// Include full file path as a log attribute
    #[arg(
        long,
        env = "FILETAIL_INCLUDE_FILE_PATH",
        default_value = "false",
        action = ArgAction::Set
    )]
    pub include_file_path: bool,
}

impl FileInputArgs {
    pub fn build_config(&self) -> FileInputConfig {
        FileInputConfig {
            id: self.id.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            poll_interval_ms: self.poll_interval_ms,
            start_at: self.start_at.into(),
            fingerprint_size: self.fingerprint_size,
            max_log_size: self.max_log_size,
            max_concurrent_files: self.max_concurrent_files,
            max_missed_cycles: self.max_missed_cycles,
            max_retired_checkpoints: self.max_retired_checkpoints,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
        }
    }
}
