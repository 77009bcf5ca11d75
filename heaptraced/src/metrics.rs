//! Client-side counters, mirroring the shape of the server's `Metrics`
//! struct so operators reading logs from either process see the same
//! kind of line.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    events_ingested: AtomicU64,
    frames_flushed: AtomicU64,
    store_errors: AtomicU64,
    transport_queue_depth: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_ingested(&self, n: u64) {
        self.events_ingested.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_frames_flushed(&self) {
        self.frames_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_errors(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_transport_queue_depth(&self, depth: usize) {
        self.transport_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn events_ingested(&self) -> u64 {
        self.events_ingested.load(Ordering::Relaxed)
    }

    pub fn frames_flushed(&self) -> u64 {
        self.frames_flushed.load(Ordering::Relaxed)
    }

    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    pub fn transport_queue_depth(&self) -> u64 {
        self.transport_queue_depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_gauges_overwrite() {
        let m = Metrics::new();
        m.inc_events_ingested(3);
        m.inc_events_ingested(2);
        assert_eq!(m.events_ingested(), 5);
        m.set_transport_queue_depth(7);
        m.set_transport_queue_depth(2);
        assert_eq!(m.transport_queue_depth(), 2);
    }
}
