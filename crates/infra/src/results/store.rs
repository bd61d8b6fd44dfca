//! The result store abstraction.

use async_trait::async_trait;
use serde::Serialize;

use ccsbatch_core::{ResultRecord, RunId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open result store: {0}")]
    Open(#[source] sqlx::Error),
    #[error("failed to create schema: {0}")]
    Schema(#[source] sqlx::Error),
    #[error("{operation} failed: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Query { operation, source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub chemicals: i64,
    pub datasets: i64,
    pub targets: i64,
    pub analyses: i64,
    pub identifications: i64,
    pub peaks: i64,
}

impl std::fmt::Display for TableCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chemicals={} datasets={} targets={} analyses={} identifications={} peaks={}",
            self.chemicals,
            self.datasets,
            self.targets,
            self.analyses,
            self.identifications,
            self.peaks
        )
    }
}

/// Normalized persistence of result records.
///
/// Implementations serialize writers: one `insert` is applied completely
/// (or not at all) before the next one starts.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist one record and its isomers and peaks; returns the analysis row id.
    async fn insert(&self, run_id: RunId, record: &ResultRecord) -> StoreResult<i64>;

    async fn table_counts(&self) -> StoreResult<TableCounts>;
}
