// SPDX-License-Identifier: Apache-2.0

//! Poll-based file tailing engine.
//!
//! Each polling cycle lists the files matching the configured globs,
//! identifies them by a fingerprint of their leading bytes, reconciles that
//! against what is already tracked, and reads new records from every file
//! with bounded concurrency. Read positions are checkpointed through a
//! [`persistence::Persister`] so a restart resumes without re-emitting.

pub mod bounded_channel;
pub mod config;
pub mod entry;
pub mod error;
pub mod init;
pub mod input;
pub mod output;
pub mod persistence;
pub mod poller;
pub mod registry;
pub mod telemetry;

pub use config::{FileInputConfig, StartAt};
pub use entry::Entry;
pub use error::{Error, Result};
pub use output::{EntrySink, MemorySink};
pub use poller::{CycleReport, Poller, PollerState};
