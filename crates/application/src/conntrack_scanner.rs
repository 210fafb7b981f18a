use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use domain::conntrack::codec::{KeyBytes, decode_key, decode_value, encode_key};
use domain::conntrack::entity::{Key, Value};
use domain::conntrack::error::ConntrackError;
use ports::secondary::conntrack_map_port::ConntrackMapPort;

/// Verdict of one scanner on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Ok,
    Delete,
}

/// Read-only access to other entries of the table during a sweep.
pub trait EntryLookup {
    /// `Ok(None)` when the key is absent, including when it vanished
    /// concurrently.
    fn lookup(&self, key: &Key) -> Result<Option<Value>, ConntrackError>;
}

/// A policy that votes on every entry visited by a sweep.
pub trait EntryScanner: Send {
    fn check(
        &mut self,
        key: &Key,
        value: &Value,
        lookup: &dyn EntryLookup,
    ) -> Result<ScanVerdict, ConntrackError>;
}

/// A scanner that needs to know where a sweep begins and ends.
pub trait SyncedEntryScanner: EntryScanner {
    fn iteration_start(&mut self);
    fn iteration_end(&mut self);
}

/// Registered scanner, tagged with whether it takes sweep hooks.
pub enum Scanner {
    Stateless(Box<dyn EntryScanner>),
    Synced(Box<dyn SyncedEntryScanner>),
}

impl Scanner {
    fn check(
        &mut self,
        key: &Key,
        value: &Value,
        lookup: &dyn EntryLookup,
    ) -> Result<ScanVerdict, ConntrackError> {
        match self {
            Self::Stateless(s) => s.check(key, value, lookup),
            Self::Synced(s) => s.check(key, value, lookup),
        }
    }
}

/// Cumulative counters of one engine, readable while it runs elsewhere.
#[derive(Debug, Default)]
pub struct ScanStats {
    examined: AtomicU64,
    deleted: AtomicU64,
    sweeps: AtomicU64,
}

impl ScanStats {
    pub fn examined(&self) -> u64 {
        self.examined.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub examined: u64,
    pub deleted: u64,
    pub delete_failures: u64,
    /// The walk stopped early on an iteration error.
    pub aborted: bool,
    pub duration: Duration,
}

struct MapLookup<'a> {
    map: &'a dyn ConntrackMapPort,
}

impl EntryLookup for MapLookup<'_> {
    fn lookup(&self, key: &Key) -> Result<Option<Value>, ConntrackError> {
        match self.map.get(&encode_key(key))? {
            Some(raw) => Ok(Some(decode_value(&raw)?)),
            None => Ok(None),
        }
    }
}

fn decode_entry(raw_key: &[u8], raw_value: &[u8]) -> Result<(Key, Value), ConntrackError> {
    Ok((decode_key(raw_key)?, decode_value(raw_value)?))
}

/// Walks the conntrack table and lets registered scanners vote on each entry.
///
/// An entry voted `Delete` is removed only after the cursor has moved past
/// it, so the table's `get_next_key` walk never loses its position.
pub struct ScanEngine {
    map: Arc<dyn ConntrackMapPort>,
    scanners: Vec<Scanner>,
    stats: Arc<ScanStats>,
}

impl ScanEngine {
    pub fn new(map: Arc<dyn ConntrackMapPort>) -> Self {
        Self {
            map,
            scanners: Vec::new(),
            stats: Arc::new(ScanStats::default()),
        }
    }

    /// Register a scanner to run after those already registered.
    pub fn add_scanner(&mut self, scanner: Scanner) {
        self.scanners.push(scanner);
    }

    /// Register a scanner to run before those already registered.
    pub fn add_scanner_first(&mut self, scanner: Scanner) {
        self.scanners.insert(0, scanner);
    }

    pub fn scanner_count(&self) -> usize {
        self.scanners.len()
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    /// One full pass over the table.
    ///
    /// Iteration errors end the pass early (`aborted`) but are not returned.
    /// Layout errors are returned; synced scanners see `iteration_end` in
    /// every case.
    pub fn sweep(&mut self) -> Result<SweepOutcome, ConntrackError> {
        let started = Instant::now();
        let mut outcome = SweepOutcome::default();

        for scanner in &mut self.scanners {
            if let Scanner::Synced(s) = scanner {
                s.iteration_start();
            }
        }

        let mut pending = None;
        let result = self.walk(&mut outcome, &mut pending);
        if let Some(raw) = pending {
            self.delete_entry(&raw, &mut outcome);
        }

        for scanner in &mut self.scanners {
            if let Scanner::Synced(s) = scanner {
                s.iteration_end();
            }
        }

        outcome.duration = started.elapsed();
        self.stats
            .examined
            .fetch_add(outcome.examined, Ordering::Relaxed);
        self.stats
            .deleted
            .fetch_add(outcome.deleted, Ordering::Relaxed);
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => {
                tracing::debug!(
                    examined = outcome.examined,
                    deleted = outcome.deleted,
                    delete_failures = outcome.delete_failures,
                    aborted = outcome.aborted,
                    duration_ms = outcome.duration.as_millis(),
                    "conntrack sweep complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    examined = outcome.examined,
                    "conntrack table layout mismatch, sweep aborted"
                );
                Err(e)
            }
        }
    }

    fn walk(
        &mut self,
        outcome: &mut SweepOutcome,
        pending: &mut Option<KeyBytes>,
    ) -> Result<(), ConntrackError> {
        let map = Arc::clone(&self.map);
        let lookup = MapLookup { map: map.as_ref() };

        for item in map.entries() {
            let (raw_key, raw_value) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        examined = outcome.examined,
                        "conntrack iteration failed, aborting sweep"
                    );
                    outcome.aborted = true;
                    break;
                }
            };

            // The cursor has advanced past the previous entry.
            if let Some(prev) = pending.take() {
                self.delete_entry(&prev, outcome);
            }

            outcome.examined += 1;
            let (key, value) = match decode_entry(&raw_key, &raw_value) {
                Ok(entry) => entry,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable conntrack entry, keeping it");
                    continue;
                }
            };

            if self.vote(&key, &value, &lookup)? == ScanVerdict::Delete {
                *pending = Some(raw_key);
            }
        }
        Ok(())
    }

    /// Run scanners in order, stopping at the first `Delete`.
    fn vote(
        &mut self,
        key: &Key,
        value: &Value,
        lookup: &dyn EntryLookup,
    ) -> Result<ScanVerdict, ConntrackError> {
        for scanner in &mut self.scanners {
            match scanner.check(key, value, lookup) {
                Ok(ScanVerdict::Delete) => return Ok(ScanVerdict::Delete),
                Ok(ScanVerdict::Ok) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "conntrack scanner failed, keeping entry");
                }
            }
        }
        Ok(ScanVerdict::Ok)
    }

    fn delete_entry(&self, raw: &KeyBytes, outcome: &mut SweepOutcome) {
        match self.map.delete(raw) {
            Ok(true) => outcome.deleted += 1,
            Ok(false) => {}
            Err(e) => {
                outcome.delete_failures += 1;
                match decode_key(raw) {
                    Ok(key) => {
                        tracing::warn!(key = %key, error = %e, "failed to delete conntrack entry");
                    }
                    Err(_) => tracing::warn!(error = %e, "failed to delete conntrack entry"),
                }
            }
        }
    }
}
