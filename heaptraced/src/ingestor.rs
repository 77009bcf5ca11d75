//! Single-consumer event ingestor: groups incoming ALLOC/FREE events by
//! frame and commits each frame's batch atomically, so query-side gap
//! filling can rely on FrameStats rows never being partially written.

use std::sync::Arc;

use crate::metrics::Metrics;
use crate::store::{EventRow, FrameStatsRow, Store, EVENT_KIND_ALLOC, EVENT_KIND_FREE};

#[derive(Debug)]
pub enum IngestError {
    FrameOrderViolation { frame: u64, prev_frame: u64 },
    Store(sqlx::Error),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::FrameOrderViolation { frame, prev_frame } => {
                write!(f, "frame {frame} arrived after {prev_frame}: stream is corrupt")
            }
            IngestError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Store(e)
    }
}

const FLUSH_THRESHOLD: usize = 10_000;

enum PendingEvent {
    Alloc { addr: u64, size: u32, type_name: String, call_stack: String },
    Free { addr: u64, size: u32 },
}

pub struct Ingestor {
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    prev_frame: Option<u64>,
    pending: Vec<PendingEvent>,
    frame_allocs: u64,
    frame_frees: u64,
    size_running_total: i64,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            prev_frame: None,
            pending: Vec::with_capacity(1024),
            frame_allocs: 0,
            frame_frees: 0,
            size_running_total: 0,
        }
    }

    pub async fn on_alloc(&mut self, frame: u64, addr: u64, size: u32, type_name: String, call_stack: String) -> Result<(), IngestError> {
        self.cross_frame_boundary(frame).await?;
        self.frame_allocs += 1;
        self.size_running_total += i64::from(size);
        self.pending.push(PendingEvent::Alloc { addr, size, type_name, call_stack });
        self.flush_if_over_threshold().await
    }

    pub async fn on_free(&mut self, frame: u64, addr: u64, size: u32) -> Result<(), IngestError> {
        self.cross_frame_boundary(frame).await?;
        self.frame_frees += 1;
        self.size_running_total -= i64::from(size);
        self.pending.push(PendingEvent::Free { addr, size });
        self.flush_if_over_threshold().await
    }

    /// Called once the transport has drained (disconnect or clean
    /// shutdown): flushes whatever is pending for the last-seen frame.
    pub async fn finish(&mut self) -> Result<(), IngestError> {
        if let Some(frame) = self.prev_frame {
            self.flush_pending(frame).await?;
        }
        Ok(())
    }

    async fn cross_frame_boundary(&mut self, frame: u64) -> Result<(), IngestError> {
        match self.prev_frame {
            Some(prev) if frame < prev => {
                log::error!("ingestor: frame {frame} arrived after {prev}, aborting capture");
                return Err(IngestError::FrameOrderViolation { frame, prev_frame: prev });
            }
            Some(prev) if frame != prev => {
                self.flush_pending(prev).await?;
                self.frame_allocs = 0;
                self.frame_frees = 0;
            }
            _ => {}
        }
        self.prev_frame = Some(frame);
        Ok(())
    }

    async fn flush_if_over_threshold(&mut self) -> Result<(), IngestError> {
        if self.pending.len() > FLUSH_THRESHOLD {
            if let Some(frame) = self.prev_frame {
                self.flush_pending(frame).await?;
            }
        }
        Ok(())
    }

    /// Commits everything buffered so far and upserts `FrameStats(frame)`
    /// from the running counters. Does not reset the counters — only a
    /// real frame-boundary crossing does that, so a threshold-triggered
    /// mid-frame flush does not under-count the frame it belongs to.
    async fn flush_pending(&mut self, frame: u64) -> Result<(), IngestError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let events = std::mem::take(&mut self.pending);
        let n = events.len() as u64;

        let result: Result<(), sqlx::Error> = async {
            let mut tx = self.store.begin().await?;
            for event in events {
                match event {
                    PendingEvent::Alloc { addr, size, type_name, call_stack } => {
                        let type_id = self.store.intern_type(&mut tx, &type_name).await?;
                        let stack_id = self.store.intern_callstack(&mut tx, &call_stack).await?;
                        self.store
                            .insert_event(
                                &mut tx,
                                &EventRow {
                                    kind: EVENT_KIND_ALLOC,
                                    type_id: Some(type_id),
                                    address: addr as i64,
                                    size: Some(i64::from(size)),
                                    frame: frame as i64,
                                    callstack_id: Some(stack_id),
                                },
                            )
                            .await?;
                    }
                    PendingEvent::Free { addr, size } => {
                        self.store
                            .insert_event(
                                &mut tx,
                                &EventRow {
                                    kind: EVENT_KIND_FREE,
                                    type_id: None,
                                    address: addr as i64,
                                    size: Some(i64::from(size)),
                                    frame: frame as i64,
                                    callstack_id: None,
                                },
                            )
                            .await?;
                    }
                }
            }
            self.store
                .upsert_frame_stats(
                    &mut tx,
                    &FrameStatsRow {
                        frame: frame as i64,
                        allocs: self.frame_allocs as i64,
                        frees: self.frame_frees as i64,
                        size: self.size_running_total,
                    },
                )
                .await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => {
                self.metrics.inc_frames_flushed();
                self.metrics.inc_events_ingested(n);
                Ok(())
            }
            Err(e) => {
                self.metrics.inc_store_errors();
                log::error!("ingestor: batch for frame {frame} rolled back: {e}");
                Err(IngestError::Store(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_ingestor() -> (Ingestor, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let metrics = Arc::new(Metrics::new());
        (Ingestor::new(store.clone(), metrics), store)
    }

    /// Scenario 1 from the spec.
    #[tokio::test]
    async fn frame_grouped_allocs_produce_expected_frame_stats() {
        let (mut ing, store) = new_ingestor().await;
        ing.on_alloc(1, 0x10, 16, "A.B".into(), "m1".into()).await.unwrap();
        ing.on_alloc(1, 0x20, 32, "A.B".into(), "m1".into()).await.unwrap();
        ing.on_alloc(2, 0x30, 8, "A.C".into(), "m2".into()).await.unwrap();
        ing.finish().await.unwrap();

        assert_eq!(store.frame_boundaries().await.unwrap(), Some((1, 2)));
        let rows = store.frame_stats_range(1, 2).await.unwrap();
        assert_eq!(rows[0], crate::store::FrameStatsRow { frame: 1, allocs: 2, frees: 0, size: 48 });
        assert_eq!(rows[1], crate::store::FrameStatsRow { frame: 2, allocs: 1, frees: 0, size: 56 });
    }

    /// Scenario 4's persistence half: the server is responsible for
    /// deciding a FREE is synthetic (see `heaptrace_server::tracker`); the
    /// ingestor just needs the running total to reflect whatever FREE it
    /// is handed, in arrival order, same as any other FREE.
    #[tokio::test]
    async fn free_after_alloc_decrements_the_running_total() {
        let (mut ing, store) = new_ingestor().await;
        ing.on_alloc(1, 0x10, 16, "A".into(), "m".into()).await.unwrap();
        ing.on_free(2, 0x10, 16).await.unwrap();
        ing.on_alloc(2, 0x10, 24, "A".into(), "m".into()).await.unwrap();
        ing.finish().await.unwrap();

        let rows = store.frame_stats_range(1, 2).await.unwrap();
        assert_eq!(rows[0].size, 16);
        assert_eq!(rows[1].size, 24);
    }

    #[tokio::test]
    async fn frame_order_violation_is_rejected() {
        let (mut ing, _store) = new_ingestor().await;
        ing.on_alloc(5, 0x10, 16, "A".into(), "m".into()).await.unwrap();
        let err = ing.on_alloc(3, 0x20, 8, "A".into(), "m".into()).await.unwrap_err();
        assert!(matches!(err, IngestError::FrameOrderViolation { frame: 3, prev_frame: 5 }));
    }

    #[tokio::test]
    async fn threshold_flush_mid_frame_does_not_lose_counts() {
        let (mut ing, store) = new_ingestor().await;
        for i in 0..3 {
            ing.on_alloc(1, 0x100 + i, 1, "A".into(), "m".into()).await.unwrap();
        }
        ing.finish().await.unwrap();
        let rows = store.frame_stats_range(1, 1).await.unwrap();
        assert_eq!(rows[0].allocs, 3);
    }
}
