//! Public entry point for the injected side: the handle a real embedding's
//! callback trampolines (or, here, the synthetic workload) call into.
//! Wraps the worker channel, the independently-guarded root set, and the
//! reader/writer pause gate described by the concurrency model.

use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};

use heaptrace_protocol::ServerMessage;

use crate::adapter::{ClassId, RootSource, RuntimeAdapter};
use crate::metrics::Metrics;
use crate::reachability::ReachabilityConfig;
use crate::roots::RootSet;
use crate::worker::{self, WorkItem, WorkerHandle};

pub struct ServerProfiler {
    worker: WorkerHandle,
    roots: Arc<Mutex<RootSet>>,
    pause_gate: Arc<RwLock<()>>,
    pause_guard: Mutex<Option<OwnedRwLockWriteGuard<()>>>,
    metrics: Arc<Metrics>,
}

impl ServerProfiler {
    pub fn spawn(
        adapter: Arc<dyn RuntimeAdapter>,
        writer: heaptrace_protocol::FrameWriter,
        config: ReachabilityConfig,
        stopwords: Vec<String>,
    ) -> Arc<Self> {
        let roots = Arc::new(Mutex::new(RootSet::new()));
        let metrics = Arc::new(Metrics::new());
        let worker = worker::spawn(
            roots.clone(),
            adapter,
            writer,
            config,
            stopwords,
            metrics.clone(),
            heaptrace_protocol::transport::DEFAULT_QUEUE_CAPACITY,
        );
        Arc::new(Self {
            worker,
            roots,
            pause_gate: Arc::new(RwLock::new(())),
            pause_guard: Mutex::new(None),
            metrics,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Called from the mutator's allocation callback. Takes a brief reader
    /// lock on the pause gate so a concurrent `pause()` call can block new
    /// allocations from being queued without having to drain the worker
    /// first.
    pub async fn on_alloc(&self, addr: u64, class: ClassId, size: u32, frame: u64) {
        let _guard = self.pause_gate.read().await;
        self.worker.send(WorkItem::Alloc { addr, class, size, frame }).await;
    }

    pub async fn on_free(&self, addr: u64, frame: u64) {
        let _guard = self.pause_gate.read().await;
        self.worker.send(WorkItem::Free { addr, frame }).await;
    }

    pub async fn on_gc(&self, frame: u64) {
        self.worker.send(WorkItem::Gc { frame }).await;
    }

    pub fn register_root(&self, start: u64, len: u32, source: RootSource) {
        self.roots.lock().unwrap().register(start, len, source);
    }

    pub fn unregister_root(&self, start: u64) {
        self.roots.lock().unwrap().unregister(start);
    }

    pub async fn references(&self, request_id: u64, addrs: Vec<u64>, frame: u64) -> ServerMessage {
        let (reply, rx) = oneshot::channel();
        self.worker.send(WorkItem::References { request_id, addrs, frame, reply }).await;
        rx.await.unwrap_or(ServerMessage::References { request_id, entries: Vec::new() })
    }

    /// Blocks new allocations/frees from being queued until `resume` is
    /// called. Idempotent: a second `pause` while already paused returns
    /// `error_code = 1` instead of deadlocking on the gate's own writer.
    pub async fn pause(&self, request_id: u64) -> ServerMessage {
        if self.pause_guard.lock().unwrap().is_some() {
            return ServerMessage::Pause { request_id, error_code: 1 };
        }
        let guard = self.pause_gate.clone().write_owned().await;
        *self.pause_guard.lock().unwrap() = Some(guard);
        ServerMessage::Pause { request_id, error_code: 0 }
    }

    pub async fn resume(&self, request_id: u64) -> ServerMessage {
        let had_guard = self.pause_guard.lock().unwrap().take().is_some();
        ServerMessage::Resume { request_id, error_code: if had_guard { 0 } else { 1 } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use heaptrace_protocol::transport;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_writer() -> (heaptrace_protocol::FrameWriter, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (_reader, writer, _task) = transport::split(server_stream);
        (writer, client)
    }

    #[tokio::test]
    async fn pause_blocks_a_second_pause_and_resume_releases_it() {
        let (writer, _client) = loopback_writer().await;
        let adapter = Arc::new(MockAdapter::new());
        let profiler = ServerProfiler::spawn(adapter, writer, ReachabilityConfig::default(), Vec::new());

        let first = profiler.pause(1).await;
        assert_eq!(first, ServerMessage::Pause { request_id: 1, error_code: 0 });

        let second = profiler.pause(2).await;
        assert_eq!(second, ServerMessage::Pause { request_id: 2, error_code: 1 });

        let resumed = profiler.resume(3).await;
        assert_eq!(resumed, ServerMessage::Resume { request_id: 3, error_code: 0 });
    }

    #[tokio::test]
    async fn references_request_round_trips_through_the_worker() {
        let (writer, _client) = loopback_writer().await;
        let adapter = Arc::new(MockAdapter::new());
        let profiler = ServerProfiler::spawn(adapter, writer, ReachabilityConfig::default(), Vec::new());

        profiler.on_alloc(0x10, 1, 16, 1).await;
        profiler.register_root(0x900, 8, RootSource::Static);

        let reply = profiler.references(42, vec![0x10], 2).await;
        match reply {
            ServerMessage::References { request_id, .. } => assert_eq!(request_id, 42),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
