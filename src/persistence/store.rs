// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Durable key -> bytes store the engine checkpoints into.
///
/// Implementations use interior mutability so one handle can be shared between
/// the poller and whoever owns the backend.
pub trait Persister: Send + Sync {
    /// Value stored under `key`, or `None` if it was never set
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stage a value. It is not guaranteed durable until [`Persister::sync`].
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Make every staged value durable
    fn sync(&self) -> Result<()>;
}

/// JSON helpers over the raw byte contract
pub trait PersisterExt: Persister {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_vec(value)?)
    }
}

impl<P: Persister + ?Sized> PersisterExt for P {}

#[derive(Debug, Default)]
struct MemoryInner {
    staged: Mutex<HashMap<String, Vec<u8>>>,
    durable: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    syncs: AtomicUsize,
}

/// In-memory persister with switchable failures.
///
/// Clones share the same storage, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersister {
    inner: Arc<MemoryInner>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get` fail until switched off
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set` and `sync` fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Value that survived the last successful sync
    pub fn durable(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .durable
            .lock()
            .ok()
            .and_then(|d| d.get(key).cloned())
    }

    /// Number of successful syncs
    pub fn sync_count(&self) -> usize {
        self.inner.syncs.load(Ordering::SeqCst)
    }

    fn check_writes(&self) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("write failure injected".to_string()));
        }
        Ok(())
    }
}

impl Persister for MemoryPersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Persistence("read failure injected".to_string()));
        }
        Ok(self.durable(key))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writes()?;
        self.inner
            .staged
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_writes()?;
        let staged = self
            .inner
            .staged
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let mut durable = self
            .inner
            .durable
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        for (key, value) in staged.iter() {
            durable.insert(key.clone(), value.clone());
        }
        self.inner.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
