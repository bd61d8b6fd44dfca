//! Batch job scheduling over external engine processes.
//!
//! ## Design
//!
//! - One coordinating thread drives every job; the work itself runs in
//!   separate OS processes
//! - At most `max_concurrency` jobs run at once
//! - Jobs declaring a common resource key never run at the same time
//! - Jobs whose result artifact already exists are skipped unless
//!   reanalysis is requested
//! - Non-zero exits are collected, never fatal
//!
//! ## Components
//!
//! - `AnalysisEngine` / `EngineProcess`: capability seam over process spawning
//! - `ProcessEngine`: the production engine (`std::process`)
//! - `JobHandle`: per-job lifecycle state
//! - `Scheduler`: the dispatch / retire loop

pub mod cleanup;
pub mod engine;
pub mod executor;
pub mod types;

pub use engine::{AnalysisEngine, EngineError, EngineProcess, ProcessEngine, ProcessExit};
pub use executor::{BatchReport, Scheduler, SchedulerError, SchedulerStats};
pub use types::{JobFailure, JobHandle, JobOutcome, JobState, SchedulerConfig};
