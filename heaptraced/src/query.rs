//! Read-side algorithms over the persisted capture: frame-stat gap
//! filling and a cancellable live-object replay. All of these are pure
//! functions of the store's current contents — no mutable ingestion
//! state is touched here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::store::{Store, EVENT_KIND_ALLOC, EVENT_KIND_FREE};

pub struct QueryEngine {
    store: Arc<Store>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStat {
    pub frame: i64,
    pub allocs: i64,
    pub frees: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStatsResult {
    pub frames: Vec<FrameStat>,
    pub max_allocs: i64,
    pub max_frees: i64,
    pub max_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveObject {
    pub addr: u64,
    pub size: u32,
    pub frame: u64,
    pub type_id: Option<i64>,
    pub callstack_id: Option<i64>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn get_frame_boundaries(&self) -> Result<Option<(i64, i64)>, sqlx::Error> {
        self.store.frame_boundaries().await
    }

    /// Implements the gap-filling algorithm from the query engine's
    /// design: frames strictly before the first present row are padded
    /// with the last size known prior to `from`; gaps between present
    /// rows are padded with the previous row's size (size is
    /// piecewise-constant, never zero, across a gap); frames after the
    /// last present row are padded with that row's size. Maxima are
    /// accumulated only from present rows.
    pub async fn get_frame_stats(&self, from: i64, to: i64) -> Result<FrameStatsResult, sqlx::Error> {
        let last_known = self.store.last_known_size_before(from).await?.unwrap_or(0);
        let present = self.store.frame_stats_range(from, to).await?;

        let mut frames = Vec::new();
        let mut max_allocs = 0i64;
        let mut max_frees = 0i64;
        let mut max_size = 0i64;
        let mut cursor = from;
        let mut last_size = last_known;

        for row in &present {
            while cursor < row.frame {
                frames.push(FrameStat { frame: cursor, allocs: 0, frees: 0, size: last_size });
                cursor += 1;
            }
            frames.push(FrameStat { frame: row.frame, allocs: row.allocs, frees: row.frees, size: row.size });
            max_allocs = max_allocs.max(row.allocs);
            max_frees = max_frees.max(row.frees);
            max_size = max_size.max(row.size);
            last_size = row.size;
            cursor = row.frame + 1;
        }
        while cursor <= to {
            frames.push(FrameStat { frame: cursor, allocs: 0, frees: 0, size: last_size });
            cursor += 1;
        }

        Ok(FrameStatsResult { frames, max_allocs, max_frees, max_size })
    }

    /// Replays `Events` in `[from, to]` in frame order, inserting on ALLOC
    /// and removing on FREE. `progress` is polled after every row with
    /// `(processed, total)`; returning `false` cancels the replay and the
    /// call returns an empty set rather than whatever had accumulated so
    /// far — a deliberate simplification over the original tool, which
    /// left partial state in place on cancellation.
    pub async fn get_live_objects(
        &self,
        from: i64,
        to: i64,
        mut progress: impl FnMut(u64, u64) -> bool,
    ) -> Result<Vec<LiveObject>, sqlx::Error> {
        let total = self.store.count_events_in_range(from, to).await?.max(0) as u64;
        let events = self.store.events_in_range(from, to).await?;

        let mut live: HashMap<u64, LiveObject> = HashMap::new();
        let mut processed = 0u64;

        for event in events {
            processed += 1;
            match event.kind {
                k if k == EVENT_KIND_ALLOC => {
                    let addr = event.address as u64;
                    live.insert(
                        addr,
                        LiveObject {
                            addr,
                            size: event.size.unwrap_or(0) as u32,
                            frame: event.frame as u64,
                            type_id: event.type_id,
                            callstack_id: event.callstack_id,
                        },
                    );
                }
                k if k == EVENT_KIND_FREE => {
                    live.remove(&(event.address as u64));
                }
                other => log::warn!("query: ignoring event with unknown kind {other}"),
            }

            if !progress(processed, total) {
                live.clear();
                return Ok(Vec::new());
            }
        }

        Ok(live.into_values().collect())
    }

    pub async fn get_type_name(&self, type_id: i64) -> Option<String> {
        self.store.type_name(type_id).await
    }

    pub async fn get_callstack(&self, callstack_id: i64) -> Option<String> {
        self.store.callstack_text(callstack_id).await
    }
}
