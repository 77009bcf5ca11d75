//! The single task that owns the live-object table. Everything that
//! mutates tracker state — allocations, frees, mark/sweep, reference
//! queries — flows through one `mpsc` channel and is processed strictly
//! in the order it arrives, which is what gives the spec's "a GC waits
//! for every already-queued allocation/free to land first" property for
//! free: a `Gc` item can never jump ahead of older `Alloc`/`Free` items
//! sharing the same queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use heaptrace_protocol::{FrameWriter, ReferenceEntry, ServerMessage};

use crate::adapter::{ClassId, RuntimeAdapter};
use crate::metrics::Metrics;
use crate::reachability::{do_gc, find_references, ReachabilityConfig};
use crate::roots::RootSet;
use crate::tracker::{Allocation, Tracker};

use std::sync::Mutex;

pub enum WorkItem {
    Alloc { addr: u64, class: ClassId, size: u32, frame: u64 },
    Free { addr: u64, frame: u64 },
    Gc { frame: u64 },
    References { request_id: u64, addrs: Vec<u64>, frame: u64, reply: oneshot::Sender<ServerMessage> },
}

async fn emit(writer: &FrameWriter, msg: ServerMessage) {
    if writer.send(msg.kind(), msg.encode_payload()).await.is_err() {
        log::debug!("worker: client transport closed, dropping outgoing message");
    }
}

fn build_call_stack(frames: &[String], stopwords: &[String]) -> Option<String> {
    if frames.iter().any(|line| stopwords.iter().any(|sw| !sw.is_empty() && line.contains(sw.as_str()))) {
        return None;
    }
    if frames.is_empty() {
        return Some("<no stack>".to_string());
    }
    let mut text = String::new();
    for frame in frames {
        text.push_str(frame);
        text.push('\n');
    }
    Some(text)
}

pub struct WorkerHandle {
    tx: mpsc::Sender<WorkItem>,
}

impl WorkerHandle {
    pub fn new(tx: mpsc::Sender<WorkItem>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, item: WorkItem) {
        if self.tx.send(item).await.is_err() {
            log::warn!("worker: ingestion channel closed, dropping event");
        }
    }
}

pub fn spawn(
    roots: Arc<Mutex<RootSet>>,
    adapter: Arc<dyn RuntimeAdapter>,
    writer: FrameWriter,
    config: ReachabilityConfig,
    stopwords: Vec<String>,
    metrics: Arc<Metrics>,
    capacity: usize,
) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(run(rx, roots, adapter, writer, config, stopwords, metrics));
    WorkerHandle::new(tx)
}

async fn run(
    mut rx: mpsc::Receiver<WorkItem>,
    roots: Arc<Mutex<RootSet>>,
    adapter: Arc<dyn RuntimeAdapter>,
    writer: FrameWriter,
    config: ReachabilityConfig,
    stopwords: Vec<String>,
    metrics: Arc<Metrics>,
) {
    let mut tracker = Tracker::new();
    let mut last_gc_frame: u64 = 0;

    while let Some(item) = rx.recv().await {
        match item {
            WorkItem::Alloc { addr, class, size, frame } => {
                metrics.inc_allocs_seen();
                let raw_stack = adapter.walk_stack();
                let Some(call_stack) = build_call_stack(&raw_stack, &stopwords) else {
                    metrics.inc_allocs_dropped_stopword();
                    continue;
                };
                let type_name = adapter.class_name(class);
                let alloc = Allocation::new(addr, size, class, type_name.clone(), frame, call_stack.clone());

                if let Some(previous) = tracker.alloc(alloc) {
                    metrics.inc_synthetic_frees();
                    emit(&writer, ServerMessage::Free { frame, addr, size: previous.size }).await;
                }
                emit(&writer, ServerMessage::Alloc { frame, addr, size, type_name, call_stack }).await;
            }
            WorkItem::Free { addr, frame } => {
                if let Some(entry) = tracker.remove(addr) {
                    metrics.inc_frees_seen();
                    emit(&writer, ServerMessage::Free { frame, addr, size: entry.size }).await;
                }
            }
            WorkItem::Gc { frame } => {
                let freed = {
                    let roots = roots.lock().unwrap();
                    do_gc(&mut tracker, &roots, adapter.as_ref(), config, false)
                };
                last_gc_frame = frame;
                metrics.inc_mark_passes();
                metrics.add_objects_swept(freed.len() as u64);
                for entry in freed {
                    emit(&writer, ServerMessage::Free { frame, addr: entry.addr, size: entry.size }).await;
                }
            }
            WorkItem::References { request_id, addrs, frame, reply } => {
                if frame > last_gc_frame {
                    let roots = roots.lock().unwrap();
                    do_gc(&mut tracker, &roots, adapter.as_ref(), config, true);
                    last_gc_frame = frame;
                }
                metrics.inc_references_queries();
                let entries: Vec<ReferenceEntry> = find_references(&mut tracker, &addrs);
                if reply.send(ServerMessage::References { request_id, entries }).is_err() {
                    log::debug!("worker: references requester went away before the reply was ready");
                }
            }
        }
    }

    log::info!("worker: ingestion channel closed, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopword_matching_call_stacks_are_dropped() {
        let frames = vec!["System.GC.Collect".to_string(), "App.Main".to_string()];
        let stopwords = vec!["System.GC".to_string()];
        assert!(build_call_stack(&frames, &stopwords).is_none());
    }

    #[test]
    fn empty_stack_becomes_the_no_stack_literal() {
        assert_eq!(build_call_stack(&[], &[]).unwrap(), "<no stack>");
    }

    #[test]
    fn frames_are_joined_caller_first_one_per_line() {
        let frames = vec!["App.Main".to_string(), "App.Run".to_string()];
        assert_eq!(build_call_stack(&frames, &[]).unwrap(), "App.Main\nApp.Run\n");
    }
}
