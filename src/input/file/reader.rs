// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use portable_atomic::{AtomicUsize, Ordering};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::buffer_pool::PooledBuffer;
use super::fingerprint::Fingerprint;
use super::split::{LineSplitter, Records, Splitter};
use crate::entry::{ATTR_LOG_FILE_NAME, ATTR_LOG_FILE_PATH, Entry};
use crate::error::{Error, Result};
use crate::output::EntrySink;

/// Immutable snapshot of one tracked file, handed to a worker for one read.
#[derive(Debug, Clone)]
pub struct ReadTask {
    /// Registry id of the tracked file
    pub id: u64,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Where to resume reading
    pub offset: u64,
    /// File size observed when the cycle started; reads never go past it
    pub size: u64,
}

/// What a worker reports back for one [`ReadTask`]
#[derive(Debug)]
pub struct ReadOutcome {
    pub id: u64,
    pub path: PathBuf,
    /// Offset the read started from
    pub start_offset: u64,
    /// End of the last record fully consumed. Equal to `start_offset` when
    /// nothing was consumed.
    pub new_offset: u64,
    pub emitted: u64,
    /// Set when the read stopped early on the cycle's cancellation signal
    pub cancelled: bool,
    pub error: Option<Error>,
}

impl ReadOutcome {
    fn new(task: &ReadTask) -> Self {
        Self {
            id: task.id,
            path: task.path.clone(),
            start_offset: task.offset,
            new_offset: task.offset,
            emitted: 0,
            cancelled: false,
            error: None,
        }
    }

    /// Bytes the read advanced past
    pub fn consumed(&self) -> u64 {
        self.new_offset - self.start_offset
    }
}

/// Counts files currently open for reading and remembers the high-water mark.
#[derive(Debug, Default)]
pub struct OpenFiles {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl OpenFiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an open handle for as long as the returned guard lives
    pub fn track(self: &Arc<Self>) -> OpenFileGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        OpenFileGuard {
            counter: self.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Start a new high-water mark from the current count
    pub fn reset_peak(&self) {
        self.peak.store(self.current(), Ordering::SeqCst);
    }
}

pub struct OpenFileGuard {
    counter: Arc<OpenFiles>,
}

impl Drop for OpenFileGuard {
    fn drop(&mut self) {
        self.counter.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// FileReader turns the newly appended bytes of a file into entries.
///
/// The reader holds no per-file state. Each call opens its own handle, reads
/// at most `max_log_size` bytes from the task's offset, and closes the handle
/// before returning, so a handle is only ever owned by the worker running
/// that task.
pub struct FileReader {
    splitter: Arc<dyn Splitter>,
    max_log_size: usize,
    include_file_name: bool,
    include_file_path: bool,
    open_files: Arc<OpenFiles>,
}

impl FileReader {
    pub fn new(max_log_size: usize, open_files: Arc<OpenFiles>) -> Self {
        Self {
            splitter: Arc::new(LineSplitter),
            max_log_size,
            include_file_name: true,
            include_file_path: false,
            open_files,
        }
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn Splitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_file_attributes(mut self, name: bool, path: bool) -> Self {
        self.include_file_name = name;
        self.include_file_path = path;
        self
    }

    /// Read newly available records for `task` and emit them to `sink`.
    ///
    /// Errors never escape: they are reported in the outcome together with
    /// whatever progress was made before the failure.
    pub fn read(
        &self,
        task: &ReadTask,
        buf: &mut PooledBuffer,
        sink: &dyn EntrySink,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let mut outcome = ReadOutcome::new(task);
        if let Err(e) = self.read_records(task, buf, sink, cancel, &mut outcome) {
            outcome.error = Some(e);
        }
        outcome
    }

    fn read_records(
        &self,
        task: &ReadTask,
        buf: &mut PooledBuffer,
        sink: &dyn EntrySink,
        cancel: &CancellationToken,
        outcome: &mut ReadOutcome,
    ) -> Result<()> {
        if task.size <= task.offset {
            return Ok(());
        }

        let mut file = File::open(&task.path)?;
        let _open = self.open_files.track();

        // The path may have been replaced since it was fingerprinted
        let head = Fingerprint::from_file(&mut file, task.fingerprint.len())?;
        if !head.matches(&task.fingerprint) {
            return Err(Error::IdentityChanged(task.path.clone()));
        }

        let window = (task.size - task.offset).min(self.max_log_size as u64);
        file.seek(SeekFrom::Start(task.offset))?;
        buf.clear();
        (&mut file).take(window).read_to_end(buf)?;

        let file_name = self
            .include_file_name
            .then(|| task.path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .flatten();
        let file_path = self
            .include_file_path
            .then(|| task.path.to_string_lossy().into_owned());
        let make_entry = |body: &[u8], start: usize| {
            let mut entry = Entry::new(
                Bytes::copy_from_slice(body),
                task.fingerprint.clone(),
                task.offset + start as u64,
            );
            if let Some(name) = &file_name {
                entry.add_attribute_string(ATTR_LOG_FILE_NAME, name.as_str());
            }
            if let Some(path) = &file_path {
                entry.add_attribute_string(ATTR_LOG_FILE_PATH, path.as_str());
            }
            entry
        };

        let mut records = Records::new(self.splitter.as_ref(), &buf[..]);
        while let Some((start, body)) = records.next() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                debug!(path = ?task.path, offset = outcome.new_offset, "Read cancelled");
                return Ok(());
            }
            // Blank records are consumed but not emitted
            if !body.is_empty() {
                sink.emit(make_entry(body, start))?;
                outcome.emitted += 1;
            }
            outcome.new_offset = task.offset + records.consumed() as u64;
        }

        // A full window with no boundary would never make progress
        if records.consumed() == 0 && buf.len() == self.max_log_size {
            let mut entry = make_entry(&buf[..], 0);
            entry.truncated = true;
            sink.emit(entry)?;
            outcome.emitted += 1;
            outcome.new_offset = task.offset + buf.len() as u64;
            debug!(path = ?task.path, size = buf.len(), "Flushed oversized record");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::file::buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE};
    use crate::input::file::split::DelimiterSplitter;
    use crate::output::MemorySink;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        pool: BufferPool,
        sink: MemorySink,
        open_files: Arc<OpenFiles>,
    }

    impl Fixture {
        fn new(content: &[u8]) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("app.log");
            fs::write(&path, content).unwrap();
            Self {
                _dir: dir,
                path,
                pool: BufferPool::new(2, DEFAULT_BUFFER_SIZE),
                sink: MemorySink::new(),
                open_files: OpenFiles::new(),
            }
        }

        fn append(&self, content: &[u8]) {
            let mut f = fs::OpenOptions::new().append(true).open(&self.path).unwrap();
            f.write_all(content).unwrap();
        }

        fn task(&self, offset: u64) -> ReadTask {
            let size = fs::metadata(&self.path).unwrap().len();
            ReadTask {
                id: 1,
                path: self.path.clone(),
                fingerprint: Fingerprint::from_path(&self.path, 16).unwrap(),
                offset,
                size,
            }
        }

        fn reader(&self, max_log_size: usize) -> FileReader {
            FileReader::new(max_log_size, self.open_files.clone())
        }

        fn read(&self, reader: &FileReader, task: &ReadTask) -> ReadOutcome {
            let mut buf = self.pool.get();
            reader.read(task, &mut buf, &self.sink, &CancellationToken::new())
        }

        fn bodies(&self) -> Vec<String> {
            self.sink
                .take()
                .into_iter()
                .map(|e| e.body_lossy().into_owned())
                .collect()
        }
    }

    #[test]
    fn test_read_complete_lines() {
        let fx = Fixture::new(b"first line\nsecond line\nthird line\n");
        let reader = fx.reader(1024);

        let outcome = fx.read(&reader, &fx.task(0));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.emitted, 3);
        assert_eq!(outcome.new_offset, 34);
        assert_eq!(fx.bodies(), vec!["first line", "second line", "third line"]);
    }

    #[test]
    fn test_partial_record_is_held_back() {
        let fx = Fixture::new(b"complete line\npartial");
        let reader = fx.reader(1024);

        let outcome = fx.read(&reader, &fx.task(0));
        assert_eq!(outcome.new_offset, 14);
        assert_eq!(fx.bodies(), vec!["complete line"]);

        // The rest of the record shows up later and is read from the old offset
        fx.append(b" now done\n");
        let outcome = fx.read(&reader, &fx.task(14));
        assert_eq!(outcome.emitted, 1);
        assert_eq!(fx.bodies(), vec!["partial now done"]);
    }

    #[test]
    fn test_read_resumes_at_offset() {
        let fx = Fixture::new(b"line1\nline2\n");
        let reader = fx.reader(1024);

        let outcome = fx.read(&reader, &fx.task(6));
        assert_eq!(outcome.start_offset, 6);
        assert_eq!(outcome.consumed(), 6);
        assert_eq!(fx.bodies(), vec!["line2"]);
    }

    #[test]
    fn test_read_never_passes_observed_size() {
        let fx = Fixture::new(b"line1\n");
        let reader = fx.reader(1024);
        let task = fx.task(0);

        // Bytes written after the cycle observed the size wait for the next cycle
        fx.append(b"line2\n");
        let outcome = fx.read(&reader, &task);
        assert_eq!(outcome.new_offset, 6);
        assert_eq!(fx.bodies(), vec!["line1"]);
    }

    #[test]
    fn test_read_nothing_new() {
        let fx = Fixture::new(b"line1\n");
        let reader = fx.reader(1024);
        let outcome = fx.read(&reader, &fx.task(6));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.emitted, 0);
        assert_eq!(fx.open_files.peak(), 0);
    }

    #[test]
    fn test_read_caps_bytes_per_call() {
        let fx = Fixture::new(b"aaaa\nbbbb\ncccc\n");
        let reader = fx.reader(12);

        let outcome = fx.read(&reader, &fx.task(0));
        assert_eq!(outcome.new_offset, 10);
        assert_eq!(fx.bodies(), vec!["aaaa", "bbbb"]);

        let outcome = fx.read(&reader, &fx.task(10));
        assert_eq!(outcome.new_offset, 15);
        assert_eq!(fx.bodies(), vec!["cccc"]);
    }

    #[test]
    fn test_oversized_record_is_flushed() {
        let fx = Fixture::new(b"0123456789abcdef\nnext\n");
        let reader = fx.reader(8);

        let outcome = fx.read(&reader, &fx.task(0));
        assert_eq!(outcome.new_offset, 8);
        let entries = fx.sink.take();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].truncated);
        assert_eq!(entries[0].body_lossy(), "01234567");
    }

    #[test]
    fn test_blank_lines_consumed_not_emitted() {
        let fx = Fixture::new(b"one\n\n\ntwo\n");
        let reader = fx.reader(1024);
        let outcome = fx.read(&reader, &fx.task(0));
        assert_eq!(outcome.emitted, 2);
        assert_eq!(outcome.new_offset, 10);
        assert_eq!(fx.bodies(), vec!["one", "two"]);
    }

    #[test]
    fn test_entries_carry_identity_and_offsets() {
        let fx = Fixture::new(b"alpha\nbeta\n");
        let reader = fx.reader(1024).with_file_attributes(true, true);
        let task = fx.task(0);
        fx.read(&reader, &task);

        let entries = fx.sink.take();
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 6);
        assert!(entries.iter().all(|e| e.fingerprint == task.fingerprint));
        assert_eq!(entries[0].attribute_str(ATTR_LOG_FILE_NAME), Some("app.log"));
        assert_eq!(
            entries[0].attribute_str(ATTR_LOG_FILE_PATH),
            Some(fx.path.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn test_custom_splitter() {
        let fx = Fixture::new(b"a;b;c");
        let splitter = Arc::new(DelimiterSplitter::new(";").unwrap());
        let reader = fx.reader(1024).with_splitter(splitter);
        let outcome = fx.read(&reader, &fx.task(0));
        assert_eq!(outcome.new_offset, 4);
        assert_eq!(fx.bodies(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let fx = Fixture::new(b"line\n");
        let reader = fx.reader(1024);
        let task = fx.task(0);
        fs::remove_file(&fx.path).unwrap();

        let outcome = fx.read(&reader, &task);
        assert!(matches!(outcome.error, Some(Error::Io(_))));
        assert_eq!(outcome.new_offset, 0);
        assert_eq!(fx.pool.idle(), 1);
    }

    #[test]
    fn test_replaced_file_is_identity_error() {
        let fx = Fixture::new(b"original content here\n");
        let reader = fx.reader(1024);
        let task = fx.task(0);
        fs::write(&fx.path, b"completely different content\n").unwrap();

        let outcome = fx.read(&reader, &task);
        assert!(matches!(outcome.error, Some(Error::IdentityChanged(_))));
        assert!(fx.sink.is_empty());
    }

    #[test]
    fn test_cancelled_read_keeps_offset() {
        let fx = Fixture::new(b"one\ntwo\n");
        let reader = fx.reader(1024);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut buf = fx.pool.get();
        let outcome = reader.read(&fx.task(0), &mut buf, &fx.sink, &cancel);
        assert!(outcome.cancelled);
        assert_eq!(outcome.new_offset, 0);
        assert!(fx.sink.is_empty());
    }

    #[test]
    fn test_sink_failure_keeps_progress() {
        struct FailAfter(std::sync::Mutex<usize>);
        impl EntrySink for FailAfter {
            fn emit(&self, _entry: Entry) -> Result<()> {
                let mut left = self.0.lock().unwrap();
                if *left == 0 {
                    return Err(Error::ChannelSend);
                }
                *left -= 1;
                Ok(())
            }
        }

        let fx = Fixture::new(b"one\ntwo\nthree\n");
        let reader = fx.reader(1024);
        let sink = FailAfter(std::sync::Mutex::new(1));
        let mut buf = fx.pool.get();
        let outcome = reader.read(&fx.task(0), &mut buf, &sink, &CancellationToken::new());

        assert!(matches!(outcome.error, Some(Error::ChannelSend)));
        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.new_offset, 4);
    }

    #[test]
    fn test_open_files_gauge() {
        let gauge = OpenFiles::new();
        let a = gauge.track();
        let b = gauge.track();
        assert_eq!(gauge.current(), 2);
        drop(a);
        drop(b);
        assert_eq!(gauge.current(), 0);
        assert_eq!(gauge.peak(), 2);
        gauge.reset_peak();
        assert_eq!(gauge.peak(), 0);
    }
}
