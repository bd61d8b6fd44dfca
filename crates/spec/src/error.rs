//! Spec parsing errors.

use thiserror::Error;

/// Why a single spec line was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineErrorKind {
    #[error("expected at least a dataset and a target, found {found} token(s)")]
    TooFewTokens { found: usize },

    #[error("dataset field holds more than one name ('{first}', '{second}')")]
    MultipleDatasets { first: String, second: String },

    #[error("no targets given")]
    MissingTargets,

    #[error("dataset '{dataset}' not found under {base}")]
    DatasetNotFound { dataset: String, base: String },

    #[error("duplicate dataset '{dataset}': {path} is also used on line {other_line}")]
    DuplicateDataset {
        dataset: String,
        path: String,
        other_line: usize,
    },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("i/o error: {0}")]
    Io(String),
}

/// A rejected line, tagged with its 1-based line number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct LineError {
    pub line: usize,
    pub kind: LineErrorKind,
}

impl LineError {
    pub fn new(line: usize, kind: LineErrorKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read spec file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more lines were rejected and `force` was not set.
    #[error("spec rejected, {count} bad line(s) at {lines}", count = .errors.len(), lines = line_list(.errors))]
    Rejected { errors: Vec<LineError> },
}

fn line_list(errors: &[LineError]) -> String {
    errors
        .iter()
        .map(|e| e.line.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
