// SPDX-License-Identifier: Apache-2.0

//! Tracked-file registry and per-cycle reconciliation.
//!
//! The registry is a plain value owned by the poller. Each cycle it is
//! consumed by [`Registry::reconcile`] together with the freshly fingerprinted
//! candidates and handed back inside the [`Reconciliation`]; workers never
//! touch it.
//!
//! Matching is by fingerprint, in two passes:
//!
//! 1. a candidate still at a tracked file's path whose fingerprint matches is
//!    that file;
//! 2. remaining candidates are matched against unclaimed entries by prefix
//!    equality, longest tracked fingerprint first. When several candidates
//!    match one entry the larger file wins, then the smaller path. The losers
//!    are duplicates (hard links, copies in progress) and are skipped, unless
//!    their fingerprint is still provisional, in which case they are new.
//!
//! Files that were tracked apart while their fingerprints were provisional
//! are merged the same way once both fingerprints are full.
//!
//! Candidates left over are new. Before starting them at the configured
//! position they are checked against the retired list, so a file that was
//! evicted and comes back unchanged resumes where it stopped.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::debug;

use crate::config::{FileInputConfig, StartAt};
use crate::input::{Fingerprint, ReadOutcome, ReadTask};
use crate::persistence::{PersistedFileEntry, PersistedState};

/// Knobs the registry needs from the input configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub fingerprint_size: usize,
    pub max_missed_cycles: u32,
    pub max_retired: usize,
}

impl From<&FileInputConfig> for RegistryConfig {
    fn from(config: &FileInputConfig) -> Self {
        Self {
            fingerprint_size: config.fingerprint_size,
            max_missed_cycles: config.max_missed_cycles,
            max_retired: config.max_retired_checkpoints,
        }
    }
}

/// Where a genuinely new file starts being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    Beginning,
    End,
}

impl From<StartAt> for StartPolicy {
    fn from(start_at: StartAt) -> Self {
        match start_at {
            StartAt::Beginning => StartPolicy::Beginning,
            StartAt::End => StartPolicy::End,
        }
    }
}

/// A path found this cycle, with its current head and size
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub size: u64,
}

/// One logical file known to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFile {
    /// Stable for the lifetime of the entry; lets read outcomes find their way
    /// back even if the path or fingerprint changed meanwhile
    pub id: u64,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    /// End of the last record handed to the sink
    pub offset: u64,
    /// Size observed at the last reconciliation
    pub size: u64,
    pub last_seen_cycle: u64,
    /// Consecutive cycles the file was absent from the listing
    pub missed_cycles: u32,
}

impl TrackedFile {
    fn checkpoint(&self) -> PersistedFileEntry {
        PersistedFileEntry {
            fingerprint: self.fingerprint.clone(),
            offset: self.offset,
            path: self.path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Unseen fingerprint, started per the start policy (or resumed from a
    /// retired checkpoint)
    New,
    /// Known fingerprint, offset kept
    Continuing,
    /// Known fingerprint but the file shrank below the stored offset
    RotatedOrTruncated,
}

/// Result of one reconciliation
#[derive(Debug)]
pub struct Reconciliation {
    pub registry: Registry,
    /// Tracked-file id and how it was classified, for every file seen this cycle
    pub classified: Vec<(u64, Classification)>,
    /// Entries dropped after too many missed cycles
    pub evicted: Vec<TrackedFile>,
    /// Candidates skipped because another path won the same identity
    pub duplicates: Vec<PathBuf>,
    /// New files that picked up a retired checkpoint
    pub resumed: usize,
}

impl Reconciliation {
    pub fn count(&self, class: Classification) -> usize {
        self.classified.iter().filter(|(_, c)| *c == class).count()
    }

    pub fn classification(&self, id: u64) -> Option<Classification> {
        self.classified
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, c)| *c)
    }
}

#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    files: Vec<TrackedFile>,
    /// Evicted checkpoints, newest first
    retired: VecDeque<PersistedFileEntry>,
    next_id: u64,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            retired: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Seed the registry from a loaded checkpoint table.
    pub fn from_checkpoints(state: PersistedState, config: &RegistryConfig) -> Self {
        let mut registry = Self::new(config.clone());

        for entry in state.files {
            if entry.fingerprint.is_empty() {
                continue;
            }
            if registry
                .files
                .iter()
                .any(|f| f.fingerprint == entry.fingerprint)
            {
                debug!(path = %entry.path, "Skipping duplicate checkpoint");
                continue;
            }
            let id = registry.allocate_id();
            registry.files.push(TrackedFile {
                id,
                fingerprint: entry.fingerprint,
                path: PathBuf::from(entry.path),
                offset: entry.offset,
                size: entry.offset,
                last_seen_cycle: 0,
                missed_cycles: 0,
            });
        }

        registry.retired = state
            .retired
            .into_iter()
            .filter(|e| !e.fingerprint.is_empty())
            .take(config.max_retired)
            .collect();

        registry
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[TrackedFile] {
        &self.files
    }

    pub fn get(&self, id: u64) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn retired(&self) -> impl Iterator<Item = &PersistedFileEntry> {
        self.retired.iter()
    }

    /// Reconcile this cycle's candidates against the tracked set.
    pub fn reconcile(
        mut self,
        mut candidates: Vec<Candidate>,
        cycle: u64,
        policy: StartPolicy,
    ) -> Reconciliation {
        // Empty files have no identity yet
        candidates.retain(|c| !c.fingerprint.is_empty());
        candidates.sort_by(|a, b| a.path.cmp(&b.path));

        let mut claimed: Vec<Option<usize>> = vec![None; self.files.len()];
        let mut assigned = vec![false; candidates.len()];

        // Pass 1: same path, same identity
        for (ci, candidate) in candidates.iter().enumerate() {
            let hit = self.files.iter().enumerate().position(|(ti, tracked)| {
                claimed[ti].is_none()
                    && tracked.path == candidate.path
                    && tracked.fingerprint.matches(&candidate.fingerprint)
            });
            if let Some(ti) = hit {
                claimed[ti] = Some(ci);
                assigned[ci] = true;
            }
        }

        // Pass 2: moved files, longest known fingerprint first
        let mut order: Vec<usize> = (0..self.files.len())
            .filter(|&ti| claimed[ti].is_none())
            .collect();
        order.sort_by(|&a, &b| {
            self.files[b]
                .fingerprint
                .len()
                .cmp(&self.files[a].fingerprint.len())
                .then(self.files[a].id.cmp(&self.files[b].id))
        });
        for ti in order {
            let tracked = &self.files[ti];
            let winner = candidates
                .iter()
                .enumerate()
                .filter(|(ci, c)| !assigned[*ci] && tracked.fingerprint.matches(&c.fingerprint))
                .min_by(|(_, a), (_, b)| b.size.cmp(&a.size).then(a.path.cmp(&b.path)))
                .map(|(ci, _)| ci);
            if let Some(ci) = winner {
                claimed[ti] = Some(ci);
                assigned[ci] = true;
            }
        }

        // Anything still matching a claimed entry lost a tie-break. Provisional
        // fingerprints are too short to call two paths the same file.
        let mut duplicates = Vec::new();
        for (ci, candidate) in candidates.iter().enumerate() {
            if assigned[ci]
                || candidate
                    .fingerprint
                    .is_provisional(self.config.fingerprint_size)
            {
                continue;
            }
            let dup = self.files.iter().enumerate().any(|(ti, tracked)| {
                claimed[ti].is_some() && tracked.fingerprint.matches(&candidate.fingerprint)
            });
            if dup {
                debug!(path = ?candidate.path, "Skipping duplicate of a tracked file");
                assigned[ci] = true;
                duplicates.push(candidate.path.clone());
            }
        }

        let mut classified = Vec::new();

        // Update matched entries and age the rest
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.files.len());
        for (ti, mut tracked) in std::mem::take(&mut self.files).into_iter().enumerate() {
            match claimed[ti] {
                Some(ci) => {
                    let candidate = &candidates[ci];
                    let class = if candidate.size < tracked.offset {
                        debug!(
                            path = ?candidate.path,
                            offset = tracked.offset,
                            size = candidate.size,
                            "File truncated, reading from the start"
                        );
                        tracked.offset = 0;
                        Classification::RotatedOrTruncated
                    } else {
                        Classification::Continuing
                    };
                    if tracked.path != candidate.path {
                        debug!(from = ?tracked.path, to = ?candidate.path, "File moved");
                        tracked.path = candidate.path.clone();
                    }
                    tracked.fingerprint = candidate.fingerprint.clone();
                    tracked.size = candidate.size;
                    tracked.last_seen_cycle = cycle;
                    tracked.missed_cycles = 0;
                    classified.push((tracked.id, class));
                    kept.push(tracked);
                }
                None => {
                    tracked.missed_cycles += 1;
                    if tracked.missed_cycles > self.config.max_missed_cycles {
                        debug!(path = ?tracked.path, offset = tracked.offset, "Evicting file");
                        evicted.push(tracked);
                    } else {
                        kept.push(tracked);
                    }
                }
            }
        }
        self.files = kept;
        self.merge_grown_twins(cycle, &mut classified, &mut duplicates);

        // Whatever is left is new. Full fingerprints that match each other are
        // one file seen twice; provisional ones are too young to merge.
        let mut fresh: Vec<&Candidate> = Vec::new();
        for (ci, candidate) in candidates.iter().enumerate() {
            if assigned[ci] {
                continue;
            }
            let full = !candidate
                .fingerprint
                .is_provisional(self.config.fingerprint_size);
            let twin = fresh.iter().position(|other| {
                full && !other.fingerprint.is_provisional(self.config.fingerprint_size)
                    && other.fingerprint.matches(&candidate.fingerprint)
            });
            match twin {
                Some(i) => {
                    let other = fresh[i];
                    let (winner, loser) = if candidate.size > other.size {
                        (candidate, other)
                    } else {
                        (other, candidate)
                    };
                    debug!(path = ?loser.path, "Skipping duplicate of a new file");
                    duplicates.push(loser.path.clone());
                    fresh[i] = winner;
                }
                None => fresh.push(candidate),
            }
        }

        let mut resumed = 0;
        for candidate in fresh {
            let offset = match self.take_retired(&candidate.fingerprint) {
                Some(retired) => {
                    resumed += 1;
                    debug!(
                        path = ?candidate.path,
                        offset = retired.offset,
                        "Resuming retired checkpoint"
                    );
                    if candidate.size < retired.offset {
                        0
                    } else {
                        retired.offset
                    }
                }
                None => match policy {
                    StartPolicy::Beginning => 0,
                    StartPolicy::End => candidate.size,
                },
            };

            let id = self.allocate_id();
            classified.push((id, Classification::New));
            self.files.push(TrackedFile {
                id,
                fingerprint: candidate.fingerprint.clone(),
                path: candidate.path.clone(),
                offset,
                size: candidate.size,
                last_seen_cycle: cycle,
                missed_cycles: 0,
            });
        }

        for tracked in &evicted {
            self.retire(tracked.checkpoint());
        }

        Reconciliation {
            registry: self,
            classified,
            evicted,
            duplicates,
            resumed,
        }
    }

    /// Files tracked apart while their heads were provisional become one
    /// identity once both fingerprints are full. The one seen this cycle wins,
    /// then the larger file, then the smaller path.
    fn merge_grown_twins(
        &mut self,
        cycle: u64,
        classified: &mut Vec<(u64, Classification)>,
        duplicates: &mut Vec<PathBuf>,
    ) {
        let size = self.config.fingerprint_size;
        let rank = |f: &TrackedFile| {
            (
                f.last_seen_cycle == cycle,
                f.size,
                Reverse(f.path.clone()),
            )
        };

        let mut i = 0;
        while i < self.files.len() {
            let mut j = i + 1;
            while j < self.files.len() {
                let (a, b) = (&self.files[i], &self.files[j]);
                let twins = !a.fingerprint.is_provisional(size)
                    && !b.fingerprint.is_provisional(size)
                    && a.fingerprint.matches(&b.fingerprint);
                if !twins {
                    j += 1;
                    continue;
                }
                if rank(b) > rank(a) {
                    self.files.swap(i, j);
                }
                let loser = self.files.remove(j);
                debug!(
                    path = ?loser.path,
                    kept = ?self.files[i].path,
                    "Dropping duplicate of a tracked file"
                );
                classified.retain(|(id, _)| *id != loser.id);
                duplicates.push(loser.path);
            }
            i += 1;
        }
    }

    /// A retired checkpoint is only trusted when both heads are full; a short
    /// head says nothing about identity.
    fn take_retired(&mut self, fingerprint: &Fingerprint) -> Option<PersistedFileEntry> {
        let size = self.config.fingerprint_size;
        if fingerprint.is_provisional(size) {
            return None;
        }
        let idx = self
            .retired
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                !r.fingerprint.is_provisional(size) && r.fingerprint.matches(fingerprint)
            })
            .max_by_key(|(_, r)| r.fingerprint.len())
            .map(|(i, _)| i)?;
        self.retired.remove(idx)
    }

    fn retire(&mut self, entry: PersistedFileEntry) {
        if self.config.max_retired == 0 {
            return;
        }
        self.retired
            .retain(|r| !r.fingerprint.matches(&entry.fingerprint));
        self.retired.push_front(entry);
        self.retired.truncate(self.config.max_retired);
    }

    /// Read tasks for every file seen in `cycle` that has unread bytes
    pub fn read_tasks(&self, cycle: u64) -> Vec<ReadTask> {
        self.files
            .iter()
            .filter(|f| f.last_seen_cycle == cycle && f.size > f.offset)
            .map(|f| ReadTask {
                id: f.id,
                path: f.path.clone(),
                fingerprint: f.fingerprint.clone(),
                offset: f.offset,
                size: f.size,
            })
            .collect()
    }

    /// Record a worker's progress. Offsets only move forward; a reset only
    /// ever happens during reconciliation.
    pub fn apply_outcome(&mut self, outcome: &ReadOutcome) {
        let Some(tracked) = self.files.iter_mut().find(|f| f.id == outcome.id) else {
            return;
        };
        if outcome.start_offset != tracked.offset {
            debug!(path = ?tracked.path, "Ignoring outcome for a stale offset");
            return;
        }
        if outcome.new_offset > tracked.offset {
            tracked.offset = outcome.new_offset;
        }
    }

    /// Snapshot of the checkpoint table
    pub fn checkpoint_state(&self) -> PersistedState {
        PersistedState {
            files: self.files.iter().map(TrackedFile::checkpoint).collect(),
            retired: self.retired.iter().cloned().collect(),
            ..Default::default()
        }
    }
}
