//! A synthetic runtime adapter: it drives [`RuntimeAdapter`] from an
//! in-process simulated heap instead of a real embedded scripting
//! runtime. It exists so the tracker and reachability engine can be
//! exercised end-to-end without the (out-of-scope) real embedding shim —
//! the profiled "application" in this build is the workload it
//! generates.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::adapter::{ClassId, RuntimeAdapter};

#[derive(Default)]
pub struct MockAdapter {
    memory: Mutex<HashMap<u64, Vec<u8>>>,
    classes: Mutex<HashMap<ClassId, (String, u32)>>,
    stack: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&self, class: ClassId, name: impl Into<String>, size: u32) {
        self.classes.lock().unwrap().insert(class, (name.into(), size));
    }

    /// Sets (or clears, with an empty vec) the simulated bytes at `addr`,
    /// read back by `read_memory`. The reachability engine scans these
    /// bytes for pointer-sized words that match other live addresses.
    pub fn set_memory(&self, addr: u64, bytes: Vec<u8>) {
        self.memory.lock().unwrap().insert(addr, bytes);
    }

    pub fn forget_memory(&self, addr: u64) {
        self.memory.lock().unwrap().remove(&addr);
    }

    pub fn set_stack(&self, frames: Vec<String>) {
        *self.stack.lock().unwrap() = frames;
    }
}

impl RuntimeAdapter for MockAdapter {
    fn class_name(&self, class: ClassId) -> String {
        self.classes
            .lock()
            .unwrap()
            .get(&class)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| "<global>.Unknown".to_string())
    }

    fn object_size(&self, class: ClassId) -> u32 {
        self.classes.lock().unwrap().get(&class).map(|(_, size)| *size).unwrap_or(0)
    }

    fn walk_stack(&self) -> Vec<String> {
        self.stack.lock().unwrap().clone()
    }

    fn read_memory(&self, addr: u64, len: usize) -> Vec<u8> {
        let mem = self.memory.lock().unwrap();
        match mem.get(&addr) {
            Some(bytes) => {
                let mut out = bytes.clone();
                out.resize(len, 0);
                out
            }
            None => vec![0u8; len],
        }
    }
}

#[cfg(feature = "demo-workload")]
pub mod workload {
    use std::sync::Arc;
    use std::time::Duration;

    use rand::Rng;
    use tokio::time::sleep;

    use super::MockAdapter;
    use crate::adapter::RootSource;
    use crate::profiler::ServerProfiler;

    #[derive(Debug, Clone, Copy)]
    pub struct WorkloadConfig {
        pub alloc_interval: Duration,
        pub gc_interval: Duration,
        pub max_live_objects: u64,
    }

    impl Default for WorkloadConfig {
        fn default() -> Self {
            Self {
                alloc_interval: Duration::from_millis(50),
                gc_interval: Duration::from_secs(2),
                max_live_objects: 200,
            }
        }
    }

    const CLASSES: &[(u64, &str, u32)] = &[
        (1, "Demo.Widget", 32),
        (2, "Demo.Node", 24),
        (3, "Demo.Buffer", 128),
    ];

    /// Runs until the owning task is cancelled: allocates objects from a
    /// small simulated object graph, periodically frees the oldest ones
    /// (as the real runtime would through reuse) and periodically asks
    /// the profiler to run a mark/sweep pass, exactly mirroring a real
    /// embedding's GC boundary notification.
    pub async fn run(adapter: Arc<MockAdapter>, profiler: Arc<ServerProfiler>, config: WorkloadConfig) {
        for (id, name, size) in CLASSES {
            adapter.register_class(*id, *name, *size);
        }

        let root_addr = 0xA000_0000_0000u64;
        profiler.register_root(root_addr, 8, RootSource::Static);

        let mut rng = rand::thread_rng();
        let mut frame: u64 = 0;
        let mut next_addr: u64 = 0x1000;
        let mut live: Vec<u64> = Vec::new();
        let mut gc_tick = tokio::time::interval(config.gc_interval);

        log::info!("synthetic workload: starting demo allocation traffic");

        loop {
            frame += 1;
            let (class, _name, size) = CLASSES[rng.gen_range(0..CLASSES.len())];
            let addr = next_addr;
            next_addr += 4096;

            let body = vec![0u8; size as usize];
            adapter.set_memory(addr, body);
            adapter.set_stack(vec!["Demo.Simulator.Tick".to_string(), "Demo.Simulator.Allocate".to_string()]);

            profiler.on_alloc(addr, class, size, frame).await;
            live.push(addr);

            if live.len() as u64 > config.max_live_objects {
                let dropped = live.remove(0);
                adapter.forget_memory(dropped);
                profiler.on_free(dropped, frame).await;
            }

            // Keep the root range pointing at the most recent allocation so
            // mark/sweep has something reachable to find.
            if let Some(&last) = live.last() {
                adapter.set_memory(root_addr, last.to_le_bytes().to_vec());
            }

            tokio::select! {
                _ = sleep(config.alloc_interval) => {}
                _ = gc_tick.tick() => {
                    log::debug!("synthetic workload: running mark/sweep at frame {frame}");
                    profiler.on_gc(frame).await;
                }
            }
        }
    }
}
