//! `ccsbatch-core`: domain building blocks for the batch pipeline.
//!
//! This crate contains **pure domain** types (no process, filesystem or storage concerns):
//! job descriptors produced by the spec parser and the result records the
//! analysis engine writes back.

pub mod error;
pub mod id;
pub mod job;
pub mod result;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, RunId};
pub use job::{CommandArguments, JobDescriptor, ResourceKey};
pub use result::{
    AnalysisStatus, ArrivalSnapshot, HypothesisSummary, Isomer, ResultArtifact, ResultRecord,
    ScoreTriple, Target,
};
