//! `ccsbatch-spec`: job spec file parsing.
//!
//! A spec file is line oriented:
//!
//! ```text
//! # comment
//! --global --arguments for every job
//! Sample_01   Caffeine, Glucose   [M+H]+ [M+Na]+
//! Sample_02   Caffeine            [M+H]+
//! ```
//!
//! The first significant line is the global argument string; every later
//! significant line becomes one [`ccsbatch_core::JobDescriptor`].

pub mod error;
pub mod grammar;
pub mod parser;
pub mod resolve;

pub use error::{LineError, LineErrorKind, SpecError};
pub use grammar::{JobLine, parse_job_line};
pub use parser::{ParseOptions, ParsedSpec, SpecParser};
pub use resolve::DatasetResolver;
