// SPDX-License-Identifier: Apache-2.0

//! Persistence for storing file offsets and state.
//!
//! The engine only sees the [`Persister`] key-value contract. A JSON file
//! database with atomic writes and an in-memory persister are provided.

mod json_file;
mod schema;
mod store;

pub use json_file::{JsonFileDatabase, JsonFilePersister};
pub use schema::{KNOWN_FILES_KEY, PERSISTED_STATE_VERSION, PersistedFileEntry, PersistedState};
pub use store::{MemoryPersister, Persister, PersisterExt};
