//! Errors that end a run before a summary can be produced.

use ccsbatch_infra::jobs::SchedulerError;
use ccsbatch_infra::results::StoreError;
use ccsbatch_spec::SpecError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("scheduler thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
