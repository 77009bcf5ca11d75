pub mod config;
pub mod control;
pub mod ingestor;
pub mod metrics;
pub mod query;
pub mod store;
pub mod transport;

pub use config::Config;
pub use control::Control;
pub use ingestor::{IngestError, Ingestor};
pub use metrics::Metrics;
pub use query::{FrameStat, FrameStatsResult, LiveObject, QueryEngine};
pub use store::Store;
