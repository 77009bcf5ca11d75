//! Cheap in-process counters, updated from the worker's hot path and read
//! from a periodic log line or an operator query. Relaxed ordering is
//! sufficient: these are observability counters, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    allocs_seen: AtomicU64,
    frees_seen: AtomicU64,
    synthetic_frees: AtomicU64,
    allocs_dropped_stopword: AtomicU64,
    mark_passes: AtomicU64,
    objects_swept: AtomicU64,
    references_queries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_allocs_seen(&self) {
        self.allocs_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_frees_seen(&self) {
        self.frees_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_synthetic_frees(&self) {
        self.synthetic_frees.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_allocs_dropped_stopword(&self) {
        self.allocs_dropped_stopword.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_mark_passes(&self) {
        self.mark_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_objects_swept(&self, n: u64) {
        self.objects_swept.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_references_queries(&self) {
        self.references_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn allocs_seen(&self) -> u64 {
        self.allocs_seen.load(Ordering::Relaxed)
    }

    pub fn frees_seen(&self) -> u64 {
        self.frees_seen.load(Ordering::Relaxed)
    }

    pub fn synthetic_frees(&self) -> u64 {
        self.synthetic_frees.load(Ordering::Relaxed)
    }

    pub fn allocs_dropped_stopword(&self) -> u64 {
        self.allocs_dropped_stopword.load(Ordering::Relaxed)
    }

    pub fn mark_passes(&self) -> u64 {
        self.mark_passes.load(Ordering::Relaxed)
    }

    pub fn objects_swept(&self) -> u64 {
        self.objects_swept.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        assert_eq!(m.allocs_seen(), 0);
        m.inc_allocs_seen();
        m.inc_allocs_seen();
        m.add_objects_swept(3);
        assert_eq!(m.allocs_seen(), 2);
        assert_eq!(m.objects_swept(), 3);
    }
}
