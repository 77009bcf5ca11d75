//! The in-process half of the profiler: a conservative mark/sweep
//! reachability engine and allocation tracker meant to be driven by a
//! host runtime's allocation, garbage-collection and root-enumeration
//! callbacks through [`adapter::RuntimeAdapter`].

pub mod adapter;
pub mod config;
pub mod metrics;
pub mod mock;
pub mod profiler;
pub mod reachability;
pub mod roots;
pub mod tracker;
pub mod worker;

pub use adapter::{ClassId, RootSource, RuntimeAdapter};
pub use config::Config;
pub use metrics::Metrics;
pub use profiler::ServerProfiler;
pub use reachability::ReachabilityConfig;
pub use roots::RootSet;
pub use tracker::{Allocation, Tracker};
