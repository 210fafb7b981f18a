use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use domain::common::error::DomainError;
use domain::conntrack::codec::{KeyBytes, ValueBytes, encode_key, encode_value};
use domain::conntrack::entity::{Key, Value};

use crate::secondary::clock_port::KernelClock;
use crate::secondary::conntrack_map_port::{ConntrackMapPort, RawEntry};
use crate::secondary::metrics_port::ConntrackMetrics;
use crate::secondary::nat_backend_port::NatBackendSelection;

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the sub-traits.
pub struct NoopMetrics;

impl ConntrackMetrics for NoopMetrics {}

// ── In-memory conntrack table ──────────────────────────────────────

/// Insertion-ordered in-memory conntrack table.
///
/// The cursor behaves like `bpf_map_get_next_key`: if the previously
/// yielded key has disappeared, the walk restarts from the first key.
#[derive(Default)]
pub struct InMemoryConntrackMap {
    entries: Mutex<Vec<RawEntry>>,
    fail_iteration_after: Mutex<Option<usize>>,
    fail_deletes: Mutex<HashSet<KeyBytes>>,
    fail_gets: AtomicBool,
    delete_calls: AtomicUsize,
}

impl InMemoryConntrackMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: &[(Key, Value)]) -> Self {
        let map = Self::new();
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }

    pub fn insert(&self, key: &Key, value: &Value) {
        self.insert_raw(encode_key(key), encode_value(value));
    }

    pub fn insert_raw(&self, key: KeyBytes, value: ValueBytes) {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let raw = encode_key(key);
        self.entries.lock().unwrap().iter().any(|(k, _)| *k == raw)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `delete` calls received, including misses and failures.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Make every cursor fail once it has yielded `n` entries.
    pub fn fail_iteration_after(&self, n: usize) {
        *self.fail_iteration_after.lock().unwrap() = Some(n);
    }

    /// Make `delete` fail for this key.
    pub fn fail_delete(&self, key: &Key) {
        self.fail_deletes.lock().unwrap().insert(encode_key(key));
    }

    /// Make every `get` fail.
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::Relaxed);
    }
}

impl ConntrackMapPort for InMemoryConntrackMap {
    fn get(&self, key: &KeyBytes) -> Result<Option<ValueBytes>, DomainError> {
        if self.fail_gets.load(Ordering::Relaxed) {
            return Err(DomainError::EngineError("injected lookup failure".to_string()));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v))
    }

    fn update(&self, key: &KeyBytes, value: &ValueBytes) -> Result<(), DomainError> {
        self.insert_raw(*key, *value);
        Ok(())
    }

    fn delete(&self, key: &KeyBytes) -> Result<bool, DomainError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_deletes.lock().unwrap().contains(key) {
            return Err(DomainError::EngineError("injected delete failure".to_string()));
        }
        let mut entries = self.entries.lock().unwrap();
        match entries.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                entries.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, DomainError>> + '_> {
        Box::new(Cursor {
            map: self,
            prev: None,
            yielded: 0,
            done: false,
        })
    }
}

struct Cursor<'a> {
    map: &'a InMemoryConntrackMap,
    prev: Option<KeyBytes>,
    yielded: usize,
    done: bool,
}

impl Iterator for Cursor<'_> {
    type Item = Result<RawEntry, DomainError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if *self.map.fail_iteration_after.lock().unwrap() == Some(self.yielded) {
            self.done = true;
            return Some(Err(DomainError::EngineError(
                "injected iteration failure".to_string(),
            )));
        }

        let entries = self.map.entries.lock().unwrap();
        let idx = match self.prev {
            None => 0,
            Some(prev) => entries
                .iter()
                .position(|(k, _)| *k == prev)
                .map_or(0, |pos| pos + 1),
        };
        match entries.get(idx) {
            Some(entry) => {
                self.prev = Some(entry.0);
                self.yielded += 1;
                Some(Ok(*entry))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

// ── Clock ──────────────────────────────────────────────────────────

/// Manually driven kernel clock that counts its reads.
pub struct FakeClock {
    now_ns: AtomicI64,
    reads: AtomicUsize,
}

impl FakeClock {
    pub fn new(now_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(now_ns),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn advance(&self, by: Duration) {
        let nanos = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.now_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl KernelClock for FakeClock {
    fn now_ns(&self) -> i64 {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.now_ns.load(Ordering::Relaxed)
    }
}

// ── Metrics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedSweep {
    pub examined: u64,
    pub deleted: u64,
    pub duration_seconds: f64,
}

/// Metrics sink that keeps everything it is told.
#[derive(Default)]
pub struct RecordingMetrics {
    sweeps: Mutex<Vec<RecordedSweep>>,
    expiries: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    entries: Mutex<Option<u64>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweeps(&self) -> Vec<RecordedSweep> {
        self.sweeps.lock().unwrap().clone()
    }

    pub fn expiries(&self) -> Vec<String> {
        self.expiries.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Option<u64> {
        *self.entries.lock().unwrap()
    }
}

impl ConntrackMetrics for RecordingMetrics {
    fn record_conntrack_sweep(&self, examined: u64, deleted: u64, duration_seconds: f64) {
        self.sweeps.lock().unwrap().push(RecordedSweep {
            examined,
            deleted,
            duration_seconds,
        });
    }

    fn record_conntrack_expiry(&self, reason: &str) {
        self.expiries.lock().unwrap().push(reason.to_string());
    }

    fn record_conntrack_sweep_error(&self, kind: &str) {
        self.errors.lock().unwrap().push(kind.to_string());
    }

    fn set_conntrack_entries(&self, count: u64) {
        *self.entries.lock().unwrap() = Some(count);
    }
}

// ── NAT backend selection ──────────────────────────────────────────

/// Backend selection with a fixed answer that records every question.
pub struct RecordingNatSelection {
    answer: bool,
    calls: Mutex<Vec<(SocketAddrV4, SocketAddrV4, u8)>>,
}

impl RecordingNatSelection {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(SocketAddrV4, SocketAddrV4, u8)> {
        self.calls.lock().unwrap().clone()
    }
}

impl NatBackendSelection for RecordingNatSelection {
    fn still_selected(&self, frontend: SocketAddrV4, backend: SocketAddrV4, proto: u8) -> bool {
        self.calls.lock().unwrap().push((frontend, backend, proto));
        self.answer
    }
}
