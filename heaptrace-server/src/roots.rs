//! The set of GC root ranges, guarded independently from the live-object
//! table so root (un)registration never contends with mark/sweep.

use crate::adapter::RootSource;

#[derive(Debug, Clone, Copy)]
pub struct RootRange {
    pub start: u64,
    pub len: u32,
    pub source: RootSource,
}

#[derive(Default)]
pub struct RootSet {
    ranges: Vec<RootRange>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignores ranges from [`RootSource::Stack`] and
    /// [`RootSource::FinalizerQueue`] — the runtime documents both as
    /// unstable and not safely walkable.
    pub fn register(&mut self, start: u64, len: u32, source: RootSource) {
        if source.is_ignored() {
            log::debug!("ignoring root at {start:#x} from unstable source {source:?}");
            return;
        }
        self.ranges.push(RootRange { start, len, source });
    }

    pub fn unregister(&mut self, start: u64) {
        self.ranges.retain(|r| r.start != start);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RootRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_and_finalizer_queue_roots_are_dropped() {
        let mut roots = RootSet::new();
        roots.register(0x10, 8, RootSource::Stack);
        roots.register(0x20, 8, RootSource::FinalizerQueue);
        assert!(roots.is_empty());
    }

    #[test]
    fn other_sources_are_kept_and_unregister_removes_by_start() {
        let mut roots = RootSet::new();
        roots.register(0x10, 8, RootSource::Static);
        roots.register(0x20, 16, RootSource::External);
        assert_eq!(roots.len(), 2);
        roots.unregister(0x10);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots.iter().next().unwrap().start, 0x20);
    }
}
