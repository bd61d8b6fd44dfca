//! Job lifecycle types and scheduler configuration.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use ccsbatch_core::{JobDescriptor, JobId};

use super::engine::{EngineProcess, ProcessExit};

/// Default interval between completion polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrently running jobs (values below 1 are treated as 1)
    pub max_concurrency: usize,
    /// Re-run jobs whose result artifact already exists
    pub reanalyze: bool,
    /// How long to sleep between completion polls
    pub poll_interval: Duration,
    /// Kill jobs running longer than this
    pub job_timeout: Option<Duration>,
    /// Treat an empty job list as an error
    pub fail_on_empty: bool,
    /// Name for logging
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism().map_or(1, |n| n.get()),
            reanalyze: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: None,
            fail_on_empty: false,
            name: "scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_reanalyze(mut self, reanalyze: bool) -> Self {
        self.reanalyze = reanalyze;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_fail_on_empty(mut self, fail: bool) -> Self {
        self.fail_on_empty = fail;
        self
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Done,
}

/// How a `Done` job got there.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// The engine exited with status 0.
    Completed,
    /// The engine exited non-zero, was killed by a signal, or the output
    /// directory could not be prepared.
    Failed,
    /// A previous result artifact exists and reanalysis was off.
    Skipped,
    /// The engine exceeded the job timeout and was killed.
    TimedOut,
}

impl JobOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, JobOutcome::Completed | JobOutcome::Skipped)
    }
}

/// One job as driven by the scheduler.
///
/// Created from a [`JobDescriptor`] at dispatch time and owned by the
/// scheduler until the batch finishes. Once `Done` it never changes again.
pub struct JobHandle {
    descriptor: JobDescriptor,
    state: JobState,
    outcome: Option<JobOutcome>,
    exit: Option<ProcessExit>,
    process: Option<Box<dyn EngineProcess>>,
    launched: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.descriptor.id())
            .field("dataset", &self.descriptor.dataset_name())
            .field("state", &self.state)
            .field("outcome", &self.outcome)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl JobHandle {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            state: JobState::NotStarted,
            outcome: None,
            exit: None,
            process: None,
            launched: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> JobId {
        self.descriptor.id()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome
    }

    /// Only meaningful once `Done`.
    pub fn succeeded(&self) -> bool {
        self.is_done() && self.outcome.is_some_and(JobOutcome::is_success)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(ProcessExit::code)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall time since launch (or total run time once done).
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => self.launched.map(|t| t.elapsed()),
        }
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut Box<dyn EngineProcess>> {
        self.process.as_mut()
    }

    pub(crate) fn mark_running(&mut self, process: Box<dyn EngineProcess>) {
        debug_assert_eq!(self.state, JobState::NotStarted);
        self.state = JobState::Running;
        self.process = Some(process);
        self.launched = Some(Instant::now());
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.finish(JobOutcome::Skipped, None);
    }

    pub(crate) fn mark_exited(&mut self, exit: ProcessExit) {
        let outcome = if exit.success() {
            JobOutcome::Completed
        } else {
            JobOutcome::Failed
        };
        self.finish(outcome, Some(exit));
    }

    pub(crate) fn mark_timed_out(&mut self) {
        self.finish(JobOutcome::TimedOut, None);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.finish(JobOutcome::Failed, None);
    }

    fn finish(&mut self, outcome: JobOutcome, exit: Option<ProcessExit>) {
        debug_assert_ne!(self.state, JobState::Done);
        self.state = JobState::Done;
        self.outcome = Some(outcome);
        self.exit = exit;
        self.process = None;
        self.finished_at = Some(Utc::now());
    }
}

/// A job that ended without success, for the end-of-batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub job_id: JobId,
    pub dataset: String,
    pub line: usize,
    pub outcome: JobOutcome,
    pub exit_code: Option<i32>,
}

impl JobFailure {
    pub(crate) fn from_handle(handle: &JobHandle) -> Self {
        Self {
            job_id: handle.id(),
            dataset: handle.descriptor().dataset_name().to_string(),
            line: handle.descriptor().line_number(),
            outcome: handle.outcome().unwrap_or(JobOutcome::Failed),
            exit_code: handle.exit_code(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {} ({}): ", self.line, self.dataset)?;
        match (self.outcome, self.exit_code) {
            (JobOutcome::TimedOut, _) => write!(f, "timed out"),
            (_, Some(code)) => write!(f, "exit code {code}"),
            (_, None) => write!(f, "terminated without exit code"),
        }
    }
}
