//! SQLite-backed result store.
//!
//! ## Schema
//!
//! | Table | Kind | Natural key |
//! |-------|------|-------------|
//! | `chemicals` | dimension | `name` |
//! | `datasets` | dimension | `name` |
//! | `targets` | dimension (FK chemical) | `(chemical_id, ionization)` |
//! | `analyses` | fact (FK dataset, target) | - |
//! | `identifications` | fact (FK analysis) | - |
//! | `peaks` | fact (FK identification) | - |
//!
//! Dimension rows are looked up by natural key and inserted only when absent.
//! Fact rows are append-only.
//!
//! ## Concurrency
//!
//! A single connection sits behind a `tokio::sync::Mutex`. Every insert holds
//! the lock for its whole transaction; a failed insert drops the uncommitted
//! transaction (rolling it back) and the guard on the way out.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::query::{Query, QueryScalar};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use ccsbatch_core::{ResultRecord, RunId};

use super::store::{ResultStore, StoreError, StoreResult, TableCounts};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS chemicals (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE CHECK (length(name) > 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS datasets (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE CHECK (length(name) > 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS targets (
        id                INTEGER PRIMARY KEY,
        descriptor        TEXT NOT NULL,
        chemical_id       INTEGER NOT NULL REFERENCES chemicals (id),
        ionization        TEXT NOT NULL,
        monoisotopic_mass REAL NOT NULL,
        charge            INTEGER NOT NULL CHECK (charge <> 0),
        UNIQUE (chemical_id, ionization)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analyses (
        id                    INTEGER PRIMARY KEY,
        run_id                TEXT NOT NULL,
        dataset_id            INTEGER NOT NULL REFERENCES datasets (id),
        target_id             INTEGER NOT NULL REFERENCES targets (id),
        status                TEXT NOT NULL,
        intensity_score       REAL NULL,
        peak_shape_score      REAL NULL,
        isotopic_score        REAL NULL,
        data_likelihood       REAL NULL,
        posterior_probability REAL NULL,
        created_at            TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS identifications (
        id               INTEGER PRIMARY KEY,
        analysis_id      INTEGER NOT NULL REFERENCES analyses (id),
        intensity_score  REAL NOT NULL,
        peak_shape_score REAL NOT NULL,
        isotopic_score   REAL NOT NULL,
        mobility         REAL NULL,
        ccs              REAL NULL,
        arrival_time     REAL NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS peaks (
        id                INTEGER PRIMARY KEY,
        identification_id INTEGER NOT NULL REFERENCES identifications (id),
        arrival_time      REAL NOT NULL,
        intensity         REAL NOT NULL,
        fwhm              REAL NULL
    )
    "#,
];

const TABLES: [&str; 6] = [
    "chemicals",
    "datasets",
    "targets",
    "analyses",
    "identifications",
    "peaks",
];

/// The deduplicated tables.
#[derive(Debug, Clone, Copy)]
enum Dimension {
    Chemical,
    Dataset,
    Target,
}

impl Dimension {
    fn operation(self) -> &'static str {
        match self {
            Dimension::Chemical => "upsert chemical",
            Dimension::Dataset => "upsert dataset",
            Dimension::Target => "upsert target",
        }
    }
}

/// Return the id of the `dimension` row that `lookup` selects by natural key,
/// running `insert` only when no such row exists yet.
async fn lookup_or_insert<'q>(
    conn: &mut SqliteConnection,
    dimension: Dimension,
    lookup: QueryScalar<'q, Sqlite, i64, SqliteArguments<'q>>,
    insert: Query<'q, Sqlite, SqliteArguments<'q>>,
) -> StoreResult<i64> {
    let existing = lookup
        .fetch_optional(&mut *conn)
        .await
        .map_err(StoreError::query(dimension.operation()))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = insert
        .execute(&mut *conn)
        .await
        .map_err(StoreError::query(dimension.operation()))?
        .last_insert_rowid();
    debug!(?dimension, id, "inserted dimension row");
    Ok(id)
}

/// SQLite result store over a single, lock-guarded connection.
#[derive(Clone)]
pub struct SqliteResultStore {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl std::fmt::Debug for SqliteResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteResultStore").finish_non_exhaustive()
    }
}

impl SqliteResultStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    ///
    /// Accepts `sqlite://path/to/file.db` and `sqlite::memory:`.
    pub async fn open(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Open)?
            .create_if_missing(true)
            .foreign_keys(true);
        let mut conn = options.connect().await.map_err(StoreError::Open)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut conn)
                .await
                .map_err(StoreError::Schema)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::open("sqlite::memory:").await
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    #[instrument(
        skip(self, run_id, record),
        fields(
            run_id = %run_id,
            dataset = %record.dataset,
            target = %record.target.descriptor(),
            status = %record.status
        ),
        err
    )]
    async fn insert(&self, run_id: RunId, record: &ResultRecord) -> StoreResult<i64> {
        if record.dataset.is_empty() {
            return Err(StoreError::InvalidRecord("empty dataset name".to_string()));
        }
        if record.target.chemical_name.is_empty() {
            return Err(StoreError::InvalidRecord("empty chemical name".to_string()));
        }

        let target = &record.target;
        let descriptor = target.descriptor();
        let scores = record.aggregate_scores();
        let run_id = run_id.to_string();
        let created_at = Utc::now().to_rfc3339();

        let mut guard = self.conn.lock().await;
        let mut tx = guard
            .begin()
            .await
            .map_err(StoreError::query("begin transaction"))?;

        let chemical_id = lookup_or_insert(
            &mut tx,
            Dimension::Chemical,
            sqlx::query_scalar("SELECT id FROM chemicals WHERE name = ?")
                .bind(target.chemical_name.as_str()),
            sqlx::query("INSERT INTO chemicals (name) VALUES (?)").bind(target.chemical_name.as_str()),
        )
        .await?;

        let dataset_id = lookup_or_insert(
            &mut tx,
            Dimension::Dataset,
            sqlx::query_scalar("SELECT id FROM datasets WHERE name = ?")
                .bind(record.dataset.as_str()),
            sqlx::query("INSERT INTO datasets (name) VALUES (?)").bind(record.dataset.as_str()),
        )
        .await?;

        let target_id = lookup_or_insert(
            &mut tx,
            Dimension::Target,
            sqlx::query_scalar("SELECT id FROM targets WHERE chemical_id = ? AND ionization = ?")
                .bind(chemical_id)
                .bind(target.ionization.as_str()),
            sqlx::query(
                r#"
                INSERT INTO targets (descriptor, chemical_id, ionization, monoisotopic_mass, charge)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(descriptor.as_str())
            .bind(chemical_id)
            .bind(target.ionization.as_str())
            .bind(target.monoisotopic_mass)
            .bind(target.charge),
        )
        .await?;

        let analysis_id = sqlx::query(
            r#"
            INSERT INTO analyses (
                run_id, dataset_id, target_id, status,
                intensity_score, peak_shape_score, isotopic_score,
                data_likelihood, posterior_probability, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.as_str())
        .bind(dataset_id)
        .bind(target_id)
        .bind(record.status.as_str())
        .bind(scores.map(|s| s.intensity))
        .bind(scores.map(|s| s.peak_shape))
        .bind(scores.map(|s| s.isotopic))
        .bind(record.hypothesis.map(|h| h.data_likelihood))
        .bind(record.hypothesis.map(|h| h.posterior_probability))
        .bind(created_at.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::query("insert analysis"))?
        .last_insert_rowid();

        for isomer in &record.isomers {
            let identification_id = sqlx::query(
                r#"
                INSERT INTO identifications (
                    analysis_id, intensity_score, peak_shape_score, isotopic_score,
                    mobility, ccs, arrival_time
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(analysis_id)
            .bind(isomer.scores.intensity)
            .bind(isomer.scores.peak_shape)
            .bind(isomer.scores.isotopic)
            .bind(isomer.mobility)
            .bind(isomer.ccs)
            .bind(isomer.arrival_time)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::query("insert identification"))?
            .last_insert_rowid();

            for snapshot in &isomer.snapshots {
                sqlx::query(
                    r#"
                    INSERT INTO peaks (identification_id, arrival_time, intensity, fwhm)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(identification_id)
                .bind(snapshot.arrival_time)
                .bind(snapshot.intensity)
                .bind(snapshot.fwhm)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query("insert peak"))?;
            }
        }

        tx.commit()
            .await
            .map_err(StoreError::query("commit transaction"))?;
        Ok(analysis_id)
    }

    async fn table_counts(&self) -> StoreResult<TableCounts> {
        let mut guard = self.conn.lock().await;
        let mut counts = [0i64; 6];
        for (count, table) in counts.iter_mut().zip(TABLES) {
            *count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&mut *guard)
                .await
                .map_err(StoreError::query("count rows"))?;
        }
        let [chemicals, datasets, targets, analyses, identifications, peaks] = counts;
        Ok(TableCounts {
            chemicals,
            datasets,
            targets,
            analyses,
            identifications,
            peaks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsbatch_core::{
        AnalysisStatus, ArrivalSnapshot, HypothesisSummary, Isomer, ScoreTriple, Target,
    };
    use sqlx::Row;

    fn record(dataset: &str, chemical: &str, ionization: &str) -> ResultRecord {
        ResultRecord {
            dataset: dataset.to_string(),
            target: Target {
                chemical_name: chemical.to_string(),
                ionization: ionization.to_string(),
                monoisotopic_mass: 194.0804,
                charge: 1,
            },
            status: AnalysisStatus::Positive,
            isomers: vec![],
            hypothesis: None,
            scores: None,
        }
    }

    fn isomer(score: f64, peaks: usize) -> Isomer {
        Isomer {
            scores: ScoreTriple::new(score, score, score),
            mobility: Some(1.1),
            ccs: Some(140.0),
            arrival_time: Some(20.5),
            snapshots: (0..peaks)
                .map(|i| ArrivalSnapshot {
                    arrival_time: 20.0 + i as f64,
                    intensity: 1000.0,
                    fwhm: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn dimensions_are_deduplicated() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let run = RunId::new();

        store.insert(run, &record("D1", "Caffeine", "[M+H]+")).await.unwrap();
        store.insert(run, &record("D1", "Caffeine", "[M+Na]+")).await.unwrap();
        store.insert(run, &record("D2", "Caffeine", "[M+H]+")).await.unwrap();

        let counts = store.table_counts().await.unwrap();
        assert_eq!(counts.chemicals, 1);
        assert_eq!(counts.datasets, 2);
        assert_eq!(counts.targets, 2);
        assert_eq!(counts.analyses, 3);
    }

    #[tokio::test]
    async fn targets_with_the_same_descriptor_stay_distinct() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let run = RunId::new();
        let plain = record("D1", "Vitamin C", "");
        let ionized = record("D1", "Vitamin", "C");
        assert_eq!(plain.target.descriptor(), ionized.target.descriptor());

        store.insert(run, &plain).await.unwrap();
        store.insert(run, &ionized).await.unwrap();

        let counts = store.table_counts().await.unwrap();
        assert_eq!(counts.chemicals, 2);
        assert_eq!(counts.targets, 2);

        let mut guard = store.conn.lock().await;
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.name FROM analyses a
            JOIN targets t ON t.id = a.target_id
            JOIN chemicals c ON c.id = t.chemical_id
            ORDER BY a.id
            "#,
        )
        .fetch_all(&mut *guard)
        .await
        .unwrap();
        assert_eq!(names, vec!["Vitamin C".to_string(), "Vitamin".to_string()]);
    }

    #[tokio::test]
    async fn facts_follow_isomers_and_snapshots() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let mut rec = record("D1", "Caffeine", "[M+H]+");
        rec.isomers = vec![isomer(0.4, 2), isomer(0.9, 3)];
        rec.hypothesis = Some(HypothesisSummary {
            data_likelihood: -12.5,
            posterior_probability: 0.97,
        });

        let analysis_id = store.insert(RunId::new(), &rec).await.unwrap();

        let counts = store.table_counts().await.unwrap();
        assert_eq!(counts.identifications, 2);
        assert_eq!(counts.peaks, 5);

        let mut guard = store.conn.lock().await;
        let row = sqlx::query(
            "SELECT status, intensity_score, posterior_probability FROM analyses WHERE id = ?",
        )
        .bind(analysis_id)
        .fetch_one(&mut *guard)
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("status"), "positive");
        assert_eq!(row.get::<f64, _>("intensity_score"), 0.9);
        assert_eq!(row.get::<f64, _>("posterior_probability"), 0.97);
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_and_releases_the_lock() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let mut bad = record("D1", "Caffeine", "[M+H]+");
        bad.target.charge = 0;

        let err = store.insert(RunId::new(), &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Query { operation: "upsert target", .. }));
        assert_eq!(store.table_counts().await.unwrap(), TableCounts::default());

        store
            .insert(RunId::new(), &record("D1", "Caffeine", "[M+H]+"))
            .await
            .unwrap();
        let counts = store.table_counts().await.unwrap();
        assert_eq!((counts.chemicals, counts.analyses), (1, 1));
    }

    #[tokio::test]
    async fn empty_names_are_rejected_before_touching_the_database() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let err = store
            .insert(RunId::new(), &record("", "Caffeine", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let run = RunId::new();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let rec = record(&format!("D{}", i % 2), "Caffeine", "[M+H]+");
                store.insert(run, &rec).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let counts = store.table_counts().await.unwrap();
        assert_eq!(counts.chemicals, 1);
        assert_eq!(counts.datasets, 2);
        assert_eq!(counts.targets, 1);
        assert_eq!(counts.analyses, 8);
    }

    #[tokio::test]
    async fn reopening_a_file_database_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("results.db").display());

        let store = SqliteResultStore::open(&url).await.unwrap();
        store
            .insert(RunId::new(), &record("D1", "Caffeine", "[M+H]+"))
            .await
            .unwrap();
        drop(store);

        let store = SqliteResultStore::open(&url).await.unwrap();
        store
            .insert(RunId::new(), &record("D1", "Caffeine", "[M+H]+"))
            .await
            .unwrap();
        let counts = store.table_counts().await.unwrap();
        assert_eq!((counts.datasets, counts.analyses), (1, 2));
    }
}
