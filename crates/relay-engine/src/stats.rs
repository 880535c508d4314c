use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the completion engine and the session coordinator.
#[derive(Debug, Default)]
pub struct EngineStats {
    backend_calls: AtomicU64,
    cache_hits: AtomicU64,
    cache_writes: AtomicU64,
    still_working: AtomicU64,
    failures: AtomicU64,
    workers_started: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub backend_calls: u64,
    pub cache_hits: u64,
    pub cache_writes: u64,
    pub still_working: u64,
    pub failures: u64,
    pub workers_started: u64,
}

impl EngineStats {
    pub(crate) fn record_backend_call(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_write(&self) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_still_working(&self) {
        self.still_working.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_started(&self) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            still_working: self.still_working.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
        }
    }
}
