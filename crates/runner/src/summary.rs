//! End-of-run summary.

use std::fmt;

use serde::Serialize;

use ccsbatch_core::RunId;
use ccsbatch_infra::jobs::JobFailure;
use ccsbatch_infra::results::TableCounts;
use ccsbatch_spec::LineError;

/// What a run did, for logs and for the user fixing the spec.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub total_jobs: usize,
    pub dispatched: usize,
    /// Jobs that ended successfully, skipped ones included.
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<JobFailure>,
    pub records_stored: usize,
    pub artifacts_missing: usize,
    pub artifacts_corrupt: usize,
    pub artifacts_incomplete: usize,
    pub store_failures: usize,
    #[serde(serialize_with = "serialize_line_errors")]
    pub skipped_spec_lines: Vec<LineError>,
    pub table_counts: TableCounts,
}

impl RunSummary {
    /// True when every job, artifact and record made it into the store.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.artifacts_missing == 0
            && self.artifacts_corrupt == 0
            && self.artifacts_incomplete == 0
            && self.store_failures == 0
            && self.skipped_spec_lines.is_empty()
    }
}

fn serialize_line_errors<S>(errors: &[LineError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        writeln!(
            f,
            "jobs: {} total, {} dispatched, {} succeeded ({} skipped), {} failed",
            self.total_jobs,
            self.dispatched,
            self.succeeded,
            self.skipped,
            self.failed.len()
        )?;
        writeln!(
            f,
            "records stored: {} (missing artifacts: {}, corrupt artifacts: {}, incomplete artifacts: {}, store failures: {})",
            self.records_stored,
            self.artifacts_missing,
            self.artifacts_corrupt,
            self.artifacts_incomplete,
            self.store_failures
        )?;
        write!(f, "tables: {}", self.table_counts)?;

        if !self.skipped_spec_lines.is_empty() {
            write!(f, "\nskipped spec lines:")?;
            for line in &self.skipped_spec_lines {
                write!(f, "\n  {line}")?;
            }
        }
        if !self.failed.is_empty() {
            write!(f, "\nfailed jobs:")?;
            for failure in &self.failed {
                write!(f, "\n  {failure}")?;
            }
        }
        Ok(())
    }
}
