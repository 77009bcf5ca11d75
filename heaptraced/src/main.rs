//! Client daemon entry point: connects to an injected server, ingests its
//! event stream into the store, and answers operator queries against it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use heaptraced::config::Config;
use heaptraced::control::Control;
use heaptraced::ingestor::Ingestor;
use heaptraced::metrics::Metrics;
use heaptraced::query::QueryEngine;
use heaptraced::store::Store;
use heaptraced::transport;

#[derive(Parser, Debug)]
#[command(name = "heaptraced")]
#[command(about = "Ingests, persists, and serves queries over a heaptrace capture")]
struct Args {
    /// Path to config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the server and ingest its event stream until it disconnects.
    Serve,
    /// Print per-frame allocation stats for a frame range, as JSON.
    Stats {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Print the set of objects live at the end of a frame range, as JSON.
    LiveObjects {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Apply any pending schema migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let store = Arc::new(Store::open(&config.store.db_path, config.store.cache_size_kib).await?);

    match args.command {
        Command::Migrate => {
            log::info!("heaptraced: schema is up to date at {}", config.store.db_path);
        }
        Command::Stats { from, to } => {
            let engine = QueryEngine::new(store);
            let result = engine.get_frame_stats(from, to).await?;
            println!("{}", serde_json::to_string_pretty(&frame_stats_json(&result))?);
        }
        Command::LiveObjects { from, to } => {
            let engine = QueryEngine::new(store);
            let objects = engine.get_live_objects(from, to, |processed, total| {
                if total > 0 && processed % 10_000 == 0 {
                    log::debug!("live-objects: {processed}/{total} events replayed");
                }
                true
            }).await?;
            println!("{}", serde_json::to_string_pretty(&live_objects_json(&objects))?);
        }
        Command::Serve => {
            let metrics = Arc::new(Metrics::new());
            let client = transport::connect(&config.transport.server_addr).await?;
            let mut ingestor = Ingestor::new(store, metrics.clone());
            let control: Arc<Control> = client.control;
            transport::run_pump(client.reader, control, &mut ingestor, &metrics).await?;
            log::info!(
                "heaptraced: serve loop ended, ingested {} events over {} flushed frames",
                metrics.events_ingested(),
                metrics.frames_flushed()
            );
        }
    }

    Ok(())
}

fn frame_stats_json(result: &heaptraced::query::FrameStatsResult) -> serde_json::Value {
    serde_json::json!({
        "frames": result.frames.iter().map(|f| serde_json::json!({
            "frame": f.frame,
            "allocs": f.allocs,
            "frees": f.frees,
            "size": f.size,
        })).collect::<Vec<_>>(),
        "max_allocs": result.max_allocs,
        "max_frees": result.max_frees,
        "max_size": result.max_size,
    })
}

fn live_objects_json(objects: &[heaptraced::query::LiveObject]) -> serde_json::Value {
    serde_json::json!(objects
        .iter()
        .map(|o| serde_json::json!({
            "addr": o.addr,
            "size": o.size,
            "frame": o.frame,
            "type_id": o.type_id,
            "callstack_id": o.callstack_id,
        }))
        .collect::<Vec<_>>())
}
