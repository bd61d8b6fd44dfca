//! The batch scheduler: dispatch, poll, retire.

use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use ccsbatch_core::{JobDescriptor, JobId};

use super::cleanup::prepare_output_dir;
use super::engine::{AnalysisEngine, EngineError};
use super::types::{JobFailure, JobHandle, JobOutcome, JobState, SchedulerConfig};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no jobs to run")]
    EmptyBatch,
    #[error("cannot launch job {job_id} ({dataset}): {source}")]
    Spawn {
        job_id: JobId,
        dataset: String,
        #[source]
        source: EngineError,
    },
    #[error("{pending} job(s) could not be dispatched")]
    Stalled { pending: usize },
}

/// Batch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub dispatched: usize,
    pub launched: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub peak_running: usize,
}

/// Everything the scheduler hands back once the batch is drained.
#[derive(Debug)]
pub struct BatchReport {
    /// Every job, `Done`, in retirement order.
    pub handles: Vec<JobHandle>,
    /// Jobs that did not succeed, in retirement order.
    pub failures: Vec<JobFailure>,
    pub stats: SchedulerStats,
}

enum Dispatch {
    Launched,
    Finished,
}

/// Runs a list of jobs to completion on the calling thread.
///
/// Jobs are started in list order as far as the concurrency bound and
/// resource exclusion allow; a blocked job is passed over and picked up on a
/// later scan once its conflicting job has retired.
pub struct Scheduler<E: AnalysisEngine> {
    engine: E,
    config: SchedulerConfig,
}

impl<E: AnalysisEngine> Scheduler<E> {
    pub fn new(engine: E, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run every job to a terminal state.
    ///
    /// Individual job failures are reported in the returned [`BatchReport`].
    /// Only an engine that cannot be spawned (or an empty list with
    /// `fail_on_empty`) is an error; in that case running jobs are killed first.
    pub fn run(&mut self, jobs: Vec<JobDescriptor>) -> Result<BatchReport, SchedulerError> {
        if jobs.is_empty() && self.config.fail_on_empty {
            return Err(SchedulerError::EmptyBatch);
        }

        let max = self.config.max_concurrency.max(1);
        let total = jobs.len();
        info!(
            scheduler = %self.config.name,
            jobs = total,
            max_concurrency = max,
            reanalyze = self.config.reanalyze,
            "batch started"
        );

        let mut batch = Batch {
            slots: jobs.into_iter().map(|j| Some(JobHandle::new(j))).collect(),
            running: Vec::new(),
            retired: Vec::new(),
            failures: Vec::new(),
            stats: SchedulerStats {
                total,
                ..SchedulerStats::default()
            },
        };

        let mut cursor = 0;
        while batch.stats.dispatched < total {
            if batch.running.len() < max {
                if let Some(idx) = batch.next_runnable(cursor) {
                    cursor = (idx + 1) % total;
                    batch.stats.dispatched += 1;
                    match self.dispatch(&mut batch, idx) {
                        Ok(Dispatch::Launched) => {
                            batch.running.push(idx);
                            batch.stats.peak_running =
                                batch.stats.peak_running.max(batch.running.len());
                        }
                        Ok(Dispatch::Finished) => batch.retire(idx),
                        Err(e) => {
                            batch.abort();
                            return Err(e);
                        }
                    }
                    continue;
                }
            }

            if batch.running.is_empty() {
                return Err(SchedulerError::Stalled {
                    pending: total - batch.stats.dispatched,
                });
            }
            self.wait_for_retirement(&mut batch);
        }

        while !batch.running.is_empty() {
            self.wait_for_retirement(&mut batch);
        }

        let stats = batch.stats;
        info!(
            scheduler = %self.config.name,
            total = stats.total,
            launched = stats.launched,
            skipped = stats.skipped,
            succeeded = stats.succeeded,
            failed = stats.failed,
            timed_out = stats.timed_out,
            "batch finished"
        );
        for failure in &batch.failures {
            warn!(scheduler = %self.config.name, "failed job: {failure}");
        }

        Ok(BatchReport {
            handles: batch.retired,
            failures: batch.failures,
            stats,
        })
    }

    /// Launch or skip the job in slot `idx`.
    fn dispatch(&mut self, batch: &mut Batch, idx: usize) -> Result<Dispatch, SchedulerError> {
        let Some(handle) = batch.slots[idx].as_mut() else {
            return Ok(Dispatch::Finished);
        };
        let job = handle.descriptor().clone();

        if !self.config.reanalyze && job.result_artifact_path().exists() {
            info!(job_id = %job.id(), dataset = job.dataset_name(), "result present, skipping");
            handle.mark_skipped();
            batch.stats.skipped += 1;
            return Ok(Dispatch::Finished);
        }

        if let Err(e) = prepare_output_dir(job.output_directory(), job.result_artifact_path()) {
            error!(
                job_id = %job.id(),
                dataset = job.dataset_name(),
                dir = %job.output_directory().display(),
                error = %e,
                "cannot prepare output directory"
            );
            handle.mark_failed();
            return Ok(Dispatch::Finished);
        }

        let process = self
            .engine
            .launch(&job)
            .map_err(|source| SchedulerError::Spawn {
                job_id: job.id(),
                dataset: job.dataset_name().to_string(),
                source,
            })?;

        info!(
            job_id = %job.id(),
            dataset = job.dataset_name(),
            line = job.line_number(),
            pid = ?process.pid(),
            "job launched"
        );
        handle.mark_running(process);
        batch.stats.launched += 1;
        Ok(Dispatch::Launched)
    }

    /// Block until at least one running job has retired.
    fn wait_for_retirement(&mut self, batch: &mut Batch) {
        loop {
            let mut retired_any = false;
            let mut i = 0;
            while i < batch.running.len() {
                let idx = batch.running[i];
                if self.poll(batch, idx) {
                    batch.running.remove(i);
                    batch.retire(idx);
                    retired_any = true;
                } else {
                    i += 1;
                }
            }
            if retired_any {
                return;
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Check one running job; returns true once it is `Done`.
    fn poll(&mut self, batch: &mut Batch, idx: usize) -> bool {
        let Some(handle) = batch.slots[idx].as_mut() else {
            return true;
        };
        let timeout = self.config.job_timeout;
        let over_time = timeout.is_some_and(|t| handle.elapsed().is_some_and(|e| e > t));
        let job_id = handle.id();

        let Some(process) = handle.process_mut() else {
            handle.mark_failed();
            return true;
        };

        match process.try_wait() {
            Ok(Some(exit)) => {
                handle.mark_exited(exit);
                true
            }
            Ok(None) if over_time => match process.kill() {
                Ok(()) => {
                    warn!(job_id = %job_id, timeout = ?timeout, "job timed out");
                    handle.mark_timed_out();
                    true
                }
                // Still alive: keep holding its resources and retry next poll.
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to kill timed out job");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "lost track of engine process");
                if let Err(e) = process.kill() {
                    error!(job_id = %job_id, error = %e, "failed to kill untracked job");
                }
                handle.mark_failed();
                true
            }
        }
    }
}

/// Mutable batch state, touched only by the coordinating thread.
struct Batch {
    slots: Vec<Option<JobHandle>>,
    running: Vec<usize>,
    retired: Vec<JobHandle>,
    failures: Vec<JobFailure>,
    stats: SchedulerStats,
}

impl Batch {
    /// First not-started job at or after `cursor` (wrapping) whose resources
    /// are free of every running job.
    fn next_runnable(&self, cursor: usize) -> Option<usize> {
        let n = self.slots.len();
        (0..n).map(|k| (cursor + k) % n).find(|&idx| {
            let Some(candidate) = self.slots[idx].as_ref() else {
                return false;
            };
            candidate.state() == JobState::NotStarted
                && self.running.iter().all(|&r| {
                    self.slots[r]
                        .as_ref()
                        .is_none_or(|running| !running.descriptor().conflicts_with(candidate.descriptor()))
                })
        })
    }

    fn retire(&mut self, idx: usize) {
        let Some(handle) = self.slots[idx].take() else {
            return;
        };

        match handle.outcome() {
            Some(JobOutcome::Completed) => {
                self.stats.succeeded += 1;
                info!(
                    job_id = %handle.id(),
                    dataset = handle.descriptor().dataset_name(),
                    elapsed = ?handle.elapsed(),
                    "job completed"
                );
            }
            Some(JobOutcome::Skipped) => self.stats.succeeded += 1,
            Some(outcome) => {
                self.stats.failed += 1;
                if outcome == JobOutcome::TimedOut {
                    self.stats.timed_out += 1;
                }
                let failure = JobFailure::from_handle(&handle);
                warn!(
                    job_id = %handle.id(),
                    dataset = %failure.dataset,
                    line = failure.line,
                    exit_code = ?failure.exit_code,
                    "job failed"
                );
                self.failures.push(failure);
            }
            None => debug!(job_id = %handle.id(), "retired job without outcome"),
        }

        self.retired.push(handle);
    }

    /// Kill everything still running after a fatal error.
    fn abort(&mut self) {
        for idx in std::mem::take(&mut self.running) {
            if let Some(handle) = self.slots[idx].as_mut() {
                if let Some(process) = handle.process_mut() {
                    if let Err(e) = process.kill() {
                        error!(job_id = %handle.id(), error = %e, "failed to kill job during abort");
                    }
                }
                handle.mark_failed();
            }
        }
    }
}
