//! One batch run: parse the spec, run every job, store what they produced.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use ccsbatch_core::{JobDescriptor, RunId};
use ccsbatch_infra::jobs::{AnalysisEngine, JobHandle, Scheduler, SchedulerConfig};
use ccsbatch_infra::results::{ResultStore, load_artifact};
use ccsbatch_spec::SpecParser;

use crate::error::RunError;
use crate::summary::RunSummary;

/// Outcome of feeding finished jobs into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounts {
    pub records_stored: usize,
    pub artifacts_missing: usize,
    pub artifacts_corrupt: usize,
    /// Artifacts holding fewer records than their job asked for.
    pub artifacts_incomplete: usize,
    pub store_failures: usize,
}

/// Drives runs against one result store. Every run gets a fresh [`RunId`].
#[derive(Debug)]
pub struct Aggregator<S> {
    store: S,
}

impl<S: ResultStore> Aggregator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Parse `spec_path`, schedule every job to completion and aggregate the
    /// artifacts of the ones that succeeded.
    ///
    /// Parsing and scheduling block, so both run on the blocking pool.
    pub async fn run<E>(
        &self,
        parser: &SpecParser,
        spec_path: &Path,
        engine: E,
        config: SchedulerConfig,
    ) -> Result<RunSummary, RunError>
    where
        E: AnalysisEngine + 'static,
    {
        let run_id = RunId::new();
        info!(run_id = %run_id, spec = %spec_path.display(), "run started");

        let parser = parser.clone();
        let path = PathBuf::from(spec_path);
        let parsed = tokio::task::spawn_blocking(move || parser.parse_file(&path)).await??;

        let jobs = parsed.jobs;
        let total_jobs = jobs.len();
        let report =
            tokio::task::spawn_blocking(move || Scheduler::new(engine, config).run(jobs)).await??;

        let counts = self.aggregate(run_id, &report.handles).await;
        let table_counts = self.store.table_counts().await?;

        let summary = RunSummary {
            run_id,
            total_jobs,
            dispatched: report.stats.dispatched,
            succeeded: report.stats.succeeded,
            skipped: report.stats.skipped,
            failed: report.failures,
            records_stored: counts.records_stored,
            artifacts_missing: counts.artifacts_missing,
            artifacts_corrupt: counts.artifacts_corrupt,
            artifacts_incomplete: counts.artifacts_incomplete,
            store_failures: counts.store_failures,
            skipped_spec_lines: parsed.skipped_lines,
            table_counts,
        };

        info!(
            run_id = %run_id,
            total_jobs,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            records_stored = summary.records_stored,
            artifacts_missing = summary.artifacts_missing,
            artifacts_corrupt = summary.artifacts_corrupt,
            artifacts_incomplete = summary.artifacts_incomplete,
            store_failures = summary.store_failures,
            "run finished"
        );
        Ok(summary)
    }

    /// Store the records of every successful job, in the order given.
    ///
    /// Unusable artifacts and failed inserts are logged and counted; neither
    /// stops the remaining jobs.
    pub async fn aggregate(&self, run_id: RunId, handles: &[JobHandle]) -> AggregateCounts {
        let mut counts = AggregateCounts::default();

        for handle in handles.iter().filter(|h| h.succeeded()) {
            let job = handle.descriptor();
            let artifact = match load_artifact(job).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!(
                        job_id = %job.id(),
                        dataset = job.dataset_name(),
                        line = job.line_number(),
                        error = %e,
                        "skipping job in aggregation"
                    );
                    if e.is_missing() {
                        counts.artifacts_missing += 1;
                    } else {
                        counts.artifacts_corrupt += 1;
                    }
                    continue;
                }
            };

            let expected = expected_records(job);
            if artifact.records.len() < expected {
                warn!(
                    job_id = %job.id(),
                    dataset = job.dataset_name(),
                    line = job.line_number(),
                    expected,
                    found = artifact.records.len(),
                    "artifact is missing records"
                );
                counts.artifacts_incomplete += 1;
            }

            for record in &artifact.records {
                match self.store.insert(run_id, record).await {
                    Ok(_) => counts.records_stored += 1,
                    Err(e) => {
                        error!(
                            job_id = %job.id(),
                            dataset = job.dataset_name(),
                            target = %record.target.descriptor(),
                            error = %e,
                            "failed to store record"
                        );
                        counts.store_failures += 1;
                    }
                }
            }
        }

        counts
    }
}

/// One record per target and ionization; no ionizations means the engine
/// default, which still yields one record per target.
fn expected_records(job: &JobDescriptor) -> usize {
    let args = job.command_arguments();
    args.targets.len() * args.ionizations.len().max(1)
}
