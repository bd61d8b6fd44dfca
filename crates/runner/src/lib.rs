//! Batch runner: wires the spec parser, the scheduler and the result store
//! into a single run.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod summary;

pub use aggregator::{AggregateCounts, Aggregator};
pub use config::{ConfigError, RunConfig};
pub use error::RunError;
pub use summary::RunSummary;
