// SPDX-License-Identifier: Apache-2.0

//! The polling control loop.
//!
//! Every tick runs one cycle: list → fingerprint → reconcile → read →
//! checkpoint. Listing and fingerprinting run on the blocking pool with at
//! most `max_concurrent_files` files open at once. Reads go through a bounded
//! task queue drained by the same number of blocking workers; the checkpoint
//! is written only once every dispatched read has returned.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::config::FileInputConfig;
use crate::error::{Error, Result};
use crate::input::file::{
    BufferPool, DEFAULT_BUFFER_SIZE, FileFinder, FileReader, Fingerprint, GlobFileFinder,
    OpenFiles, ReadOutcome, ReadTask, Splitter,
};
use crate::output::EntrySink;
use crate::persistence::{KNOWN_FILES_KEY, PersistedState, Persister};
use crate::registry::{Candidate, Classification, Registry, RegistryConfig, StartPolicy};
use crate::telemetry::EngineMetrics;

/// Idle read buffers kept between cycles
const MAX_IDLE_BUFFERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    /// Terminal; reached only through shutdown
    Stopped,
}

/// Summary of one polling cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    /// Files listed and fingerprinted
    pub candidates: usize,
    pub new: usize,
    pub continuing: usize,
    pub rotated_or_truncated: usize,
    pub evicted: usize,
    pub duplicates: usize,
    /// New files that resumed from a retired checkpoint
    pub resumed: usize,
    pub entries_emitted: u64,
    pub read_errors: usize,
    /// Reads left for the next cycle because the deadline was reached
    pub rolled_over: usize,
    /// Most files open at the same time during the cycle
    pub peak_open_files: usize,
    /// The checkpoint table was written this cycle
    pub checkpoint_written: bool,
    /// The last checkpoint write failed and will be retried
    pub checkpoint_pending: bool,
    pub duration: Duration,
}

pub struct Poller<F: FileFinder + 'static> {
    config: FileInputConfig,
    finder: Arc<F>,
    persister: Arc<dyn Persister>,
    sink: Arc<dyn EntrySink>,
    reader: Arc<FileReader>,
    buffers: BufferPool,
    open_files: Arc<OpenFiles>,
    registry_config: RegistryConfig,
    registry: Registry,
    cycle: u64,
    /// Files the last deadline cut off, in the order they go first next cycle
    rolled_over: Vec<u64>,
    last_persisted: Option<PersistedState>,
    checkpoint_pending: bool,
    metrics: EngineMetrics,
    state: watch::Sender<PollerState>,
}

impl Poller<GlobFileFinder> {
    /// Build a poller that discovers files with the configured glob patterns
    pub fn from_config(
        config: FileInputConfig,
        persister: Arc<dyn Persister>,
        sink: Arc<dyn EntrySink>,
    ) -> Result<Self> {
        let finder = GlobFileFinder::new(config.include.clone(), config.exclude.clone())?;
        Self::new(config, finder, persister, sink)
    }
}

impl<F: FileFinder + 'static> Poller<F> {
    /// Validate the configuration and seed the registry from the persister.
    ///
    /// Configuration problems are the only errors returned. An unreadable or
    /// corrupt checkpoint is logged and the engine cold starts.
    pub fn new(
        config: FileInputConfig,
        finder: F,
        persister: Arc<dyn Persister>,
        sink: Arc<dyn EntrySink>,
    ) -> Result<Self> {
        if let Err(e) = config.validate() {
            error!(error = %e, "Invalid file input configuration");
            return Err(e);
        }

        let open_files = OpenFiles::new();
        let reader = build_reader(&config, &open_files);
        let buffers = BufferPool::new(
            config.max_concurrent_files.min(MAX_IDLE_BUFFERS),
            config.max_log_size.min(DEFAULT_BUFFER_SIZE * 64),
        );
        let registry_config = RegistryConfig::from(&config);
        let registry = load_checkpoints(persister.as_ref(), &registry_config);
        let metrics = EngineMetrics::new(&config.id);
        let (state, _) = watch::channel(PollerState::Idle);

        Ok(Self {
            config,
            finder: Arc::new(finder),
            persister,
            sink,
            reader: Arc::new(reader),
            buffers,
            open_files,
            registry_config,
            registry,
            cycle: 0,
            rolled_over: Vec::new(),
            last_persisted: None,
            checkpoint_pending: false,
            metrics,
            state,
        })
    }

    /// Split records with `splitter` instead of on newlines
    pub fn with_splitter(mut self, splitter: Arc<dyn Splitter>) -> Self {
        let reader = build_reader(&self.config, &self.open_files).with_splitter(splitter);
        self.reader = Arc::new(reader);
        self
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task
    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn finder(&self) -> &F {
        &self.finder
    }

    pub fn checkpoint_pending(&self) -> bool {
        self.checkpoint_pending
    }

    fn set_state(&self, state: PollerState) {
        self.state.send_replace(state);
    }

    /// Run one full cycle.
    pub async fn poll_once(&mut self) -> CycleReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.poll_interval();
        self.cycle += 1;
        self.set_state(PollerState::Polling);
        self.open_files.reset_peak();

        let mut report = CycleReport {
            cycle: self.cycle,
            ..Default::default()
        };

        let paths = self.find_files().await;
        let candidates = self.fingerprint_all(paths).await;
        report.candidates = candidates.len();

        // The configured start position only covers files present at startup.
        // Anything discovered later was created after we started watching.
        let policy = if self.cycle == 1 {
            StartPolicy::from(self.config.start_at)
        } else {
            StartPolicy::Beginning
        };

        let registry = std::mem::replace(
            &mut self.registry,
            Registry::new(self.registry_config.clone()),
        );
        let reconciliation = registry.reconcile(candidates, self.cycle, policy);
        report.new = reconciliation.count(Classification::New);
        report.continuing = reconciliation.count(Classification::Continuing);
        report.rotated_or_truncated = reconciliation.count(Classification::RotatedOrTruncated);
        report.evicted = reconciliation.evicted.len();
        report.duplicates = reconciliation.duplicates.len();
        report.resumed = reconciliation.resumed;
        self.registry = reconciliation.registry;

        let mut tasks = self.registry.read_tasks(self.cycle);
        // Whatever the last deadline cut off goes first, so no file is
        // starved by the ones ahead of it
        let priority: HashMap<u64, usize> = self
            .rolled_over
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        tasks.sort_by_key(|t| priority.get(&t.id).copied().unwrap_or(usize::MAX));

        let (outcomes, rolled_over) = self.dispatch(tasks, deadline).await;
        report.rolled_over = rolled_over.len();
        self.rolled_over = rolled_over;

        for outcome in &outcomes {
            report.entries_emitted += outcome.emitted;
            self.metrics.record_accepted(outcome.emitted);
            if let Some(e) = &outcome.error {
                report.read_errors += 1;
                self.metrics.record_read_error();
                if matches!(e, Error::ChannelSend | Error::Sink(_)) {
                    self.metrics.record_refused(1);
                }
                warn!(
                    path = ?outcome.path,
                    offset = outcome.new_offset,
                    error = %e,
                    "Failed to read file, will retry next cycle"
                );
            }
            self.registry.apply_outcome(outcome);
        }

        report.checkpoint_written = match self.flush_checkpoints().await {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "Failed to persist checkpoints, will retry next cycle");
                false
            }
        };
        report.checkpoint_pending = self.checkpoint_pending;
        report.peak_open_files = self.open_files.peak();
        report.duration = started.elapsed();

        self.metrics.record_cycle();
        self.set_state(PollerState::Idle);

        debug!(
            cycle = report.cycle,
            candidates = report.candidates,
            new = report.new,
            continuing = report.continuing,
            truncated = report.rotated_or_truncated,
            evicted = report.evicted,
            entries = report.entries_emitted,
            errors = report.read_errors,
            rolled_over = report.rolled_over,
            peak_open_files = report.peak_open_files,
            duration = ?report.duration,
            "Poll cycle complete"
        );

        report
    }

    /// Poll on every tick until `cancel` fires. A cycle already running when
    /// the signal arrives finishes, including its checkpoint write.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            include = ?self.config.include,
            poll_interval = ?self.config.poll_interval(),
            max_concurrent_files = self.config.max_concurrent_files,
            "Starting file input"
        );

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Cancellation received, stopping poll loop");
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.poll_once().await;
        }

        // Last chance for a checkpoint that failed to write
        let result = if self.checkpoint_pending {
            self.flush_checkpoints().await.map(|_| ())
        } else {
            Ok(())
        };

        self.set_state(PollerState::Stopped);
        info!(cycles = self.cycle, "File input stopped");
        result
    }

    async fn find_files(&self) -> Vec<PathBuf> {
        let finder = self.finder.clone();
        let paths = match tokio::task::spawn_blocking(move || finder.find_files()).await {
            Ok(Ok(paths)) => paths,
            Ok(Err(e)) => {
                // Treated as an empty listing; tracked files ride it out on
                // their missed-cycle allowance
                warn!(error = %e, "File discovery failed");
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "File discovery task failed");
                Vec::new()
            }
        };

        if self.cycle == 1 && paths.is_empty() {
            warn!(
                "No files match the configured include patterns: {:?}",
                self.config.include
            );
        }
        paths
    }

    async fn fingerprint_all(&self, paths: Vec<PathBuf>) -> Vec<Candidate> {
        let size = self.config.fingerprint_size;
        let open_files = self.open_files.clone();

        let results: Vec<_> = stream::iter(paths)
            .map(|path| {
                let open_files = open_files.clone();
                tokio::task::spawn_blocking(move || {
                    let result = fingerprint_candidate(&path, size, &open_files);
                    (path, result)
                })
            })
            .buffer_unordered(self.config.max_concurrent_files)
            .collect()
            .await;

        let mut candidates = Vec::with_capacity(results.len());
        for joined in results {
            match joined {
                Ok((_, Ok(candidate))) => candidates.push(candidate),
                Ok((path, Err(e))) => {
                    // Usually the file vanished between listing and open
                    debug!(path = ?path, error = %e, "Failed to fingerprint file");
                }
                Err(e) => error!(error = %e, "Fingerprint task failed"),
            }
        }
        candidates
    }

    /// Feed `tasks` through a bounded queue to a fixed set of blocking workers.
    /// Returns the outcomes and the ids of reads left for the next cycle:
    /// those never started first, then those cancelled part way.
    async fn dispatch(
        &self,
        tasks: Vec<ReadTask>,
        deadline: tokio::time::Instant,
    ) -> (Vec<ReadOutcome>, Vec<u64>) {
        if tasks.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let worker_count = self.config.max_concurrent_files.min(tasks.len());
        let (task_tx, task_rx) = bounded::<ReadTask>(worker_count);
        let cycle_cancel = CancellationToken::new();

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let rx = task_rx.clone();
            let reader = self.reader.clone();
            let sink = self.sink.clone();
            let buffers = self.buffers.clone();
            let cancel = cycle_cancel.clone();
            workers.spawn_blocking(move || {
                let mut outcomes = Vec::new();
                while !cancel.is_cancelled() {
                    let Some(task) = rx.recv_blocking() else {
                        break;
                    };
                    let mut buf = buffers.get();
                    outcomes.push(reader.read(&task, &mut buf, sink.as_ref(), &cancel));
                }
                outcomes
            });
        }

        let expired = sleep_until(deadline);
        tokio::pin!(expired);

        let mut unsent = Vec::new();
        let mut pending = tasks.into_iter();
        while let Some(task) = pending.next() {
            let id = task.id;
            select! {
                biased;
                _ = &mut expired => {
                    cycle_cancel.cancel();
                    unsent.push(id);
                    unsent.extend(pending.by_ref().map(|t| t.id));
                    break;
                }
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        // Workers exit once the queue is drained and closed
        drop(task_tx);

        let mut outcomes = Vec::new();
        loop {
            select! {
                biased;
                _ = &mut expired, if !cycle_cancel.is_cancelled() => {
                    debug!("Cycle deadline reached, cancelling in-flight reads");
                    cycle_cancel.cancel();
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(mut done)) => outcomes.append(&mut done),
                    Some(Err(e)) => error!(error = %e, "Read worker failed"),
                    None => break,
                }
            }
        }

        // Queued tasks were sent before the unsent ones
        let mut rolled_over: Vec<u64> = task_rx.drain().into_iter().map(|t| t.id).collect();
        rolled_over.append(&mut unsent);
        rolled_over.extend(outcomes.iter().filter(|o| o.cancelled).map(|o| o.id));
        if !rolled_over.is_empty() {
            debug!(
                rolled_over = rolled_over.len(),
                "Cycle deadline reached, files roll over to the next cycle"
            );
        }

        (outcomes, rolled_over)
    }

    /// Write the checkpoint table if it changed or a previous write failed.
    /// Returns whether a write happened.
    async fn flush_checkpoints(&mut self) -> Result<bool> {
        let state = self.registry.checkpoint_state();
        if !self.checkpoint_pending && self.last_persisted.as_ref() == Some(&state) {
            return Ok(false);
        }

        let bytes = state.encode()?;
        let persister = self.persister.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            persister.set(KNOWN_FILES_KEY, bytes)?;
            persister.sync()
        })
        .await
        .unwrap_or_else(|e| Err(Error::Persistence(e.to_string())));

        match result {
            Ok(()) => {
                if self.checkpoint_pending {
                    info!("Checkpoint write succeeded after earlier failure");
                }
                self.checkpoint_pending = false;
                self.last_persisted = Some(state);
                Ok(true)
            }
            Err(e) => {
                self.checkpoint_pending = true;
                Err(e)
            }
        }
    }
}

fn build_reader(config: &FileInputConfig, open_files: &Arc<OpenFiles>) -> FileReader {
    FileReader::new(config.max_log_size, open_files.clone())
        .with_file_attributes(config.include_file_name, config.include_file_path)
}

/// Load the checkpoint table, falling back to an empty registry on any error.
fn load_checkpoints(persister: &dyn Persister, config: &RegistryConfig) -> Registry {
    let loaded = persister
        .get(KNOWN_FILES_KEY)
        .and_then(|bytes| bytes.map(|b| PersistedState::decode(&b)).transpose());

    match loaded {
        Ok(Some(state)) => {
            debug!(
                files = state.files.len(),
                retired = state.retired.len(),
                "Loaded known files from persister"
            );
            Registry::from_checkpoints(state, config)
        }
        Ok(None) => {
            debug!("No persisted state found, starting fresh");
            Registry::new(config.clone())
        }
        Err(e) => {
            warn!(error = %e, "Failed to load persisted state, starting fresh");
            Registry::new(config.clone())
        }
    }
}

fn fingerprint_candidate(
    path: &Path,
    size: usize,
    open_files: &Arc<OpenFiles>,
) -> io::Result<Candidate> {
    let mut file = File::open(path)?;
    let _open = open_files.track();
    let fingerprint = Fingerprint::from_file(&mut file, size)?;
    let len = file.metadata()?.len().max(fingerprint.len() as u64);
    Ok(Candidate {
        path: path.to_path_buf(),
        fingerprint,
        size: len,
    })
}
