// SPDX-License-Identifier: Apache-2.0

//! The hand-off boundary between the engine and whatever consumes records.

use std::sync::Mutex;

use crate::bounded_channel::BoundedSender;
use crate::entry::Entry;
use crate::error::{Error, Result};

/// Push-style consumer of discovered records.
///
/// `emit` is called from blocking worker threads and may block to apply
/// backpressure; a blocked emit slows that file's read, never the others'.
pub trait EntrySink: Send + Sync {
    fn emit(&self, entry: Entry) -> Result<()>;
}

impl EntrySink for BoundedSender<Entry> {
    fn emit(&self, entry: Entry) -> Result<()> {
        self.send_blocking(entry).map_err(|_| Error::ChannelSend)
    }
}

/// Sink that keeps every entry in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Entry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<Entry> {
        self.entries
            .lock()
            .map(|mut entries| std::mem::take(&mut *entries))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntrySink for MemorySink {
    fn emit(&self, entry: Entry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| Error::Sink(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::input::Fingerprint;

    fn entry(body: &'static [u8]) -> Entry {
        Entry::new(body, Fingerprint::from_bytes(&b"fingerprint"[..]), 0)
    }

    #[test]
    fn test_memory_sink_preserves_order() {
        let sink = MemorySink::new();
        sink.emit(entry(b"one")).unwrap();
        sink.emit(entry(b"two")).unwrap();
        assert_eq!(sink.len(), 2);

        let bodies: Vec<_> = sink.take().into_iter().map(|e| e.body).collect();
        assert_eq!(bodies, vec![&b"one"[..], &b"two"[..]]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_channel_sink_reports_closed_consumer() {
        let (tx, rx) = bounded::<Entry>(2);
        tx.emit(entry(b"kept")).unwrap();
        assert_eq!(rx.try_recv().map(|e| e.body), Some(bytes::Bytes::from_static(b"kept")));

        drop(rx);
        assert!(matches!(tx.emit(entry(b"lost")), Err(Error::ChannelSend)));
    }
}
