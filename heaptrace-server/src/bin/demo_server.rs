//! Stand-in for a real embedding: listens for a single client connection
//! and drives the profiler from a synthetic workload instead of a real
//! scripting runtime's allocation callbacks. Useful for exercising the
//! wire protocol and the client daemon end to end without anything to
//! inject into.

use std::sync::Arc;

use tokio::net::TcpListener;

use heaptrace_protocol::{transport, ClientMessage};
use heaptrace_server::mock::{workload, MockAdapter};
use heaptrace_server::{Config, ServerProfiler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load();
    // A quick override for ad hoc demo runs, so a full config file isn't
    // required just to try a different port.
    let addr = std::env::var("HEAPTRACE_DEMO_ADDR").unwrap_or_else(|_| config.transport.listen_addr.clone());
    let listener = TcpListener::bind(&addr).await?;
    log::info!("demo server: listening on {addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("demo server: client connected from {peer}");

        let (mut reader, writer, _writer_task) = transport::split(stream);
        let control_writer = writer.clone();
        let adapter = Arc::new(MockAdapter::new());
        let profiler = ServerProfiler::spawn(adapter.clone(), writer, config.reachability, config.stopwords.substrings.clone());

        let control_profiler = profiler.clone();
        let control_task = tokio::spawn(async move {
            while let Some(frame) = reader.recv().await {
                let msg = match ClientMessage::decode(frame.kind, &frame.payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("demo server: dropping malformed client frame: {e}");
                        continue;
                    }
                };
                let reply = match msg {
                    ClientMessage::References { request_id, addrs } => {
                        control_profiler.references(request_id, addrs, u64::MAX).await
                    }
                    ClientMessage::Pause { request_id } => control_profiler.pause(request_id).await,
                    ClientMessage::Resume { request_id } => control_profiler.resume(request_id).await,
                };
                let _ = control_writer.send(reply.kind(), reply.encode_payload()).await;
            }
            log::info!("demo server: client disconnected");
        });

        let workload_task = tokio::spawn(workload::run(adapter, profiler, workload::WorkloadConfig::default()));

        tokio::select! {
            _ = control_task => {}
            _ = workload_task => {}
        }
    }
}
