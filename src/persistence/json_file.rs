// SPDX-License-Identifier: Apache-2.0

//! JSON file-based persistence with atomic writes.
//!
//! One database file holds any number of scopes, each a key -> value map.
//! Values that are JSON objects or arrays are stored as-is so the checkpoint
//! table stays human readable; any other bytes are stored base64 encoded.
//! Writes are atomic using a write-to-temp-then-rename strategy.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::Persister;
use crate::error::{Error, Result};

/// State stored in the JSON file
#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: HashMap<String, HashMap<String, Value>>,
}

/// A shared JSON file database handle
#[derive(Clone)]
pub struct JsonFileDatabase {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
}

impl JsonFileDatabase {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| Error::Persistence(format!("failed to open database: {}", e)))?;
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| Error::Persistence(format!("failed to parse database: {}", e)))?
        } else {
            DatabaseState::default()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(DatabaseState::default())),
        }
    }

    /// Create a persister scoped to one engine instance
    pub fn persister(&self, scope: impl Into<String>) -> JsonFilePersister {
        JsonFilePersister {
            db: self.clone(),
            scope: scope.into(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Write the whole database to disk
    pub fn flush(&self) -> Result<()> {
        if self.is_memory() {
            return Ok(());
        }

        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        atomic_write(&self.path, &state)
    }
}

/// A persister backed by a JSON file, scoped to a particular engine.
///
/// `set` only stages values; `sync` publishes them to the shared database and
/// rewrites the file.
pub struct JsonFilePersister {
    db: JsonFileDatabase,
    scope: String,
    staged: Mutex<HashMap<String, Value>>,
}

impl Persister for JsonFilePersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self
            .db
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        match state.scopes.get(&self.scope).and_then(|s| s.get(key)) {
            None => Ok(None),
            Some(value) => decode_value(value).map(Some),
        }
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.staged
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?
            .insert(key.to_string(), encode_value(value));
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        {
            let staged = self
                .staged
                .lock()
                .map_err(|e| Error::Persistence(e.to_string()))?;
            let mut state = self
                .db
                .state
                .write()
                .map_err(|e| Error::Persistence(e.to_string()))?;

            let scope_data = state.scopes.entry(self.scope.clone()).or_default();
            for (key, value) in staged.iter() {
                scope_data.insert(key.clone(), value.clone());
            }
        }

        self.db.flush()
    }
}

fn encode_value(bytes: Vec<u8>) -> Value {
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(STANDARD.encode(bytes)),
    }
}

fn decode_value(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => STANDARD
            .decode(s)
            .map_err(|e| Error::Persistence(format!("invalid base64 value: {}", e))),
        other => Ok(serde_json::to_vec(other)?),
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &DatabaseState) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process id plus a counter keeps concurrent writers off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_temp(&temp_path, state).and_then(|()| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename database file: {}", e)))
    });
    if result.is_err() {
        // Nothing left behind for the next attempt
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, state: &DatabaseState) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write database: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush database: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync database: {}", e)))?;
    Ok(())
}
