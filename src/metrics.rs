use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::transport::FetchPurpose;

// Atomic counter for lock-free metric updates
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge that also remembers its high-water mark
#[derive(Debug, Default)]
pub struct PeakGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl PeakGauge {
    pub fn inc(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn dec(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Fetch counters shared by the scheduler and reported in the run summary
#[derive(Debug, Default)]
pub struct FetchMetrics {
    pub index_fetches: Counter,
    pub detail_fetches: Counter,
    pub sub_resource_fetches: Counter,
    pub failures: Counter,
    pub cache_hits: Counter,
    pub in_flight: PeakGauge,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self, purpose: FetchPurpose) {
        match purpose {
            FetchPurpose::Index => self.index_fetches.inc(),
            FetchPurpose::Detail => self.detail_fetches.inc(),
            FetchPurpose::SubResource => self.sub_resource_fetches.inc(),
        }
    }

    pub fn snapshot(&self) -> FetchStats {
        FetchStats {
            index_fetches: self.index_fetches.get(),
            detail_fetches: self.detail_fetches.get(),
            sub_resource_fetches: self.sub_resource_fetches.get(),
            failures: self.failures.get(),
            cache_hits: self.cache_hits.get(),
            in_flight: self.in_flight.current(),
            peak_in_flight: self.in_flight.peak(),
        }
    }
}

/// Point-in-time copy of `FetchMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub index_fetches: u64,
    pub detail_fetches: u64,
    pub sub_resource_fetches: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl std::fmt::Display for FetchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fetches: {} index, {} detail, {} sub-resource, {} failed, {} cached, {} in flight",
            self.index_fetches,
            self.detail_fetches,
            self.sub_resource_fetches,
            self.failures,
            self.cache_hits,
            self.in_flight
        )
    }
}
