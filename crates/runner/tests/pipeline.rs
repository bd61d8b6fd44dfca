//! End-to-end runs: spec file on disk, fake engine, in-memory store.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccsbatch_core::{
    AnalysisStatus, ArrivalSnapshot, Isomer, JobDescriptor, ResultArtifact, ResultRecord,
    ScoreTriple, Target,
};
use ccsbatch_infra::jobs::{
    AnalysisEngine, EngineError, EngineProcess, JobOutcome, ProcessExit, SchedulerConfig,
};
use ccsbatch_infra::results::SqliteResultStore;
use ccsbatch_runner::{Aggregator, RunError};
use ccsbatch_spec::{ParseOptions, SpecError, SpecParser};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Write a valid artifact and exit 0.
    Analyse,
    /// Write garbage and exit 0.
    Corrupt,
    /// Exit 0 without writing anything.
    Silent,
    /// Write a valid artifact with only the first record.
    Truncated,
    /// Exit with this code.
    Fail(i32),
}

#[derive(Clone, Default)]
struct FakeEngine {
    behavior: HashMap<String, Behavior>,
    launched: Arc<Mutex<Vec<String>>>,
    unavailable: bool,
}

impl FakeEngine {
    fn with(mut self, dataset: &str, behavior: Behavior) -> Self {
        self.behavior.insert(dataset.to_string(), behavior);
        self
    }

    fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

struct Finished(ProcessExit);

impl EngineProcess for Finished {
    fn try_wait(&mut self) -> Result<Option<ProcessExit>, EngineError> {
        Ok(Some(self.0))
    }

    fn kill(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

fn records_for(job: &JobDescriptor) -> Vec<ResultRecord> {
    let args = job.command_arguments();
    let ionizations = if args.ionizations.is_empty() {
        vec![String::new()]
    } else {
        args.ionizations.clone()
    };

    let mut records = Vec::new();
    for chemical in &args.targets {
        for ionization in &ionizations {
            records.push(ResultRecord {
                dataset: job.dataset_name().to_string(),
                target: Target {
                    chemical_name: chemical.clone(),
                    ionization: ionization.clone(),
                    monoisotopic_mass: 180.0634,
                    charge: 1,
                },
                status: AnalysisStatus::Positive,
                isomers: vec![Isomer {
                    scores: ScoreTriple::new(0.9, 0.8, 0.95),
                    mobility: Some(1.05),
                    ccs: Some(141.2),
                    arrival_time: Some(22.1),
                    snapshots: vec![ArrivalSnapshot {
                        arrival_time: 22.1,
                        intensity: 5400.0,
                        fwhm: Some(0.4),
                    }],
                }],
                hypothesis: None,
                scores: None,
            });
        }
    }
    records
}

impl AnalysisEngine for FakeEngine {
    fn launch(&mut self, job: &JobDescriptor) -> Result<Box<dyn EngineProcess>, EngineError> {
        if self.unavailable {
            return Err(EngineError::Spawn {
                program: "ccs-engine".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }

        let dataset = job.dataset_name();
        self.launched.lock().unwrap().push(dataset.to_string());

        let behavior = self
            .behavior
            .get(dataset)
            .copied()
            .unwrap_or(Behavior::Analyse);
        let exit = match behavior {
            Behavior::Analyse | Behavior::Truncated => {
                let mut records = records_for(job);
                if matches!(behavior, Behavior::Truncated) {
                    records.truncate(1);
                }
                let artifact = ResultArtifact {
                    dataset: dataset.to_string(),
                    records,
                };
                fs::write(
                    job.result_artifact_path(),
                    serde_json::to_vec(&artifact).unwrap(),
                )
                .unwrap();
                ProcessExit::Code(0)
            }
            Behavior::Corrupt => {
                fs::write(job.result_artifact_path(), b"\x00\x01 not json").unwrap();
                ProcessExit::Code(0)
            }
            Behavior::Silent => ProcessExit::Code(0),
            Behavior::Fail(code) => ProcessExit::Code(code),
        };
        Ok(Box::new(Finished(exit)))
    }
}

struct Batch {
    data: TempDir,
    out: TempDir,
}

impl Batch {
    fn new(datasets: &[&str], spec: &str) -> Self {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for name in datasets {
            fs::write(data.path().join(format!("{name}.mzML")), b"raw").unwrap();
        }
        fs::write(data.path().join("batch.spec"), spec).unwrap();
        Self { data, out }
    }

    fn spec_path(&self) -> std::path::PathBuf {
        self.data.path().join("batch.spec")
    }

    fn parser(&self, force: bool) -> SpecParser {
        SpecParser::new(
            ParseOptions::new(self.data.path())
                .with_output(self.out.path())
                .with_force(force),
        )
    }

    fn artifact(&self, dataset: &str) -> std::path::PathBuf {
        self.out
            .path()
            .join(dataset)
            .join(format!("{dataset}.result.json"))
    }
}

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_max_concurrency(2)
        .with_poll_interval(Duration::from_millis(1))
}

async fn store() -> SqliteResultStore {
    SqliteResultStore::in_memory().await.unwrap()
}

const SPEC: &str = "\
# nightly batch
--ppm 20

D1 Caffeine, Glucose [M+H]+
D2 Caffeine [M+H]+ [M+Na]+
D3 Glucose [M+H]+
D4 Caffeine [M+H]+
D5 Caffeine [M+H]+
";

#[tokio::test]
async fn full_run_separates_failures_missing_and_corrupt_artifacts() {
    let batch = Batch::new(&["D1", "D2", "D3", "D4", "D5"], SPEC);
    let engine = FakeEngine::default()
        .with("D3", Behavior::Corrupt)
        .with("D4", Behavior::Fail(1))
        .with("D5", Behavior::Silent);

    let summary = Aggregator::new(store().await)
        .run(&batch.parser(false), &batch.spec_path(), engine.clone(), config())
        .await
        .unwrap();

    assert_eq!(engine.launched().len(), 5);
    assert_eq!(summary.total_jobs, 5);
    assert_eq!(summary.dispatched, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.skipped, 0);

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].dataset, "D4");
    assert_eq!(summary.failed[0].line, 7);
    assert_eq!(summary.failed[0].exit_code, Some(1));

    // D1: 2 targets x 1 ionization, D2: 1 target x 2 ionizations
    assert_eq!(summary.records_stored, 4);
    assert_eq!(summary.artifacts_missing, 1);
    assert_eq!(summary.artifacts_corrupt, 1);
    assert_eq!(summary.artifacts_incomplete, 0);
    assert_eq!(summary.store_failures, 0);
    assert!(!summary.is_clean());

    let tables = summary.table_counts;
    assert_eq!(tables.chemicals, 2);
    assert_eq!(tables.datasets, 2);
    assert_eq!(tables.targets, 3);
    assert_eq!(tables.analyses, 4);
    assert_eq!(tables.identifications, 4);
    assert_eq!(tables.peaks, 4);

    assert!(batch.artifact("D1").exists());
}

#[tokio::test]
async fn rerun_skips_finished_jobs_and_retries_failed_ones() {
    let spec = "--ppm 20\nD1 Caffeine [M+H]+\nD2 Caffeine [M+H]+\n";
    let batch = Batch::new(&["D1", "D2"], spec);
    let aggregator = Aggregator::new(store().await);

    let first = FakeEngine::default().with("D2", Behavior::Fail(3));
    let summary = aggregator
        .run(&batch.parser(false), &batch.spec_path(), first, config())
        .await
        .unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.records_stored, 1);
    let first_run = summary.run_id;

    let second = FakeEngine::default();
    let summary = aggregator
        .run(&batch.parser(false), &batch.spec_path(), second.clone(), config())
        .await
        .unwrap();

    assert_eq!(second.launched(), vec!["D2".to_string()]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failed.is_empty());
    // Skipped jobs are aggregated again: facts append, dimensions do not.
    assert_eq!(summary.records_stored, 2);
    assert_ne!(summary.run_id, first_run);
    assert_eq!(summary.table_counts.analyses, 3);
    assert_eq!(summary.table_counts.datasets, 2);
}

#[tokio::test]
async fn short_artifact_is_stored_but_flagged() {
    let spec = "--ppm 20\nD1 Caffeine, Glucose [M+H]+ [M+Na]+\nD2 Caffeine [M+H]+\n";
    let batch = Batch::new(&["D1", "D2"], spec);
    let engine = FakeEngine::default().with("D1", Behavior::Truncated);

    let summary = Aggregator::new(store().await)
        .run(&batch.parser(false), &batch.spec_path(), engine, config())
        .await
        .unwrap();

    assert!(summary.failed.is_empty());
    assert_eq!(summary.records_stored, 2);
    assert_eq!(summary.artifacts_incomplete, 1);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn rejected_spec_runs_nothing() {
    let spec = "--ppm 20\nD1 Caffeine\nmissing Caffeine\nD1 Glucose\n";
    let batch = Batch::new(&["D1"], spec);
    let engine = FakeEngine::default();

    let err = Aggregator::new(store().await)
        .run(&batch.parser(false), &batch.spec_path(), engine.clone(), config())
        .await
        .unwrap_err();

    let RunError::Spec(SpecError::Rejected { errors }) = err else {
        panic!("expected a rejected spec, got {err:?}");
    };
    let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![2, 3, 4]);
    assert!(engine.launched().is_empty());
}

#[tokio::test]
async fn forced_spec_reports_skipped_lines() {
    let spec = "--ppm 20\nD1 Caffeine\nmissing Caffeine\n";
    let batch = Batch::new(&["D1"], spec);

    let summary = Aggregator::new(store().await)
        .run(&batch.parser(true), &batch.spec_path(), FakeEngine::default(), config())
        .await
        .unwrap();

    assert_eq!(summary.total_jobs, 1);
    assert_eq!(summary.skipped_spec_lines.len(), 1);
    assert_eq!(summary.skipped_spec_lines[0].line, 3);
    assert_eq!(summary.records_stored, 1);
}

#[tokio::test]
async fn engine_that_cannot_start_aborts_the_run() {
    let batch = Batch::new(&["D1"], "--ppm 20\nD1 Caffeine\n");
    let engine = FakeEngine {
        unavailable: true,
        ..FakeEngine::default()
    };

    let err = Aggregator::new(store().await)
        .run(&batch.parser(false), &batch.spec_path(), engine, config())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Scheduler(_)));
}

#[tokio::test]
async fn aggregation_skips_jobs_that_did_not_succeed() {
    let batch = Batch::new(&["D1"], "--ppm 20\nD1 Caffeine\n");
    let artifact = batch.artifact("D1");
    fs::create_dir_all(artifact.parent().unwrap()).unwrap();

    let summary = Aggregator::new(store().await)
        .run(
            &batch.parser(false),
            &batch.spec_path(),
            FakeEngine::default().with("D1", Behavior::Fail(9)),
            config(),
        )
        .await
        .unwrap();

    assert_eq!(summary.failed[0].outcome, JobOutcome::Failed);
    assert_eq!(summary.records_stored, 0);
    assert_eq!(summary.artifacts_missing, 0);
    assert!(!artifact.exists());
}
