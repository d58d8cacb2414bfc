//! SQLite-based run history

use crate::core::state::RunStatus;
use crate::persistence::{JobRecord, PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        matrix TEXT NOT NULL,
        status TEXT NOT NULL,
        exit_code INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        total_jobs INTEGER NOT NULL DEFAULT 0,
        succeeded_jobs INTEGER NOT NULL DEFAULT 0,
        failed_jobs INTEGER NOT NULL DEFAULT 0,
        canceled_jobs INTEGER NOT NULL DEFAULT 0,
        jobs TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_matrix ON runs(matrix)",
    "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
];

const COLUMNS: &str = "id, matrix, status, exit_code, started_at, completed_at, \
                       total_jobs, succeeded_jobs, failed_jobs, canceled_jobs, jobs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.as_ref().display()))?
                .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildmatrix")
            .join("runs.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let jobs: Vec<JobRecord> = serde_json::from_str(&row.get::<String, _>("jobs"))
            .context("Corrupt job records in run history")?;

        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            matrix: row.get("matrix"),
            status: RunStatus::parse(&row.get::<String, _>("status")),
            exit_code: row.get::<i64, _>("exit_code") as i32,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            total_jobs: row.get::<i64, _>("total_jobs") as usize,
            succeeded_jobs: row.get::<i64, _>("succeeded_jobs") as usize,
            failed_jobs: row.get::<i64, _>("failed_jobs") as usize,
            canceled_jobs: row.get::<i64, _>("canceled_jobs") as usize,
            jobs,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let jobs = serde_json::to_string(&run.jobs)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, matrix, status, exit_code, started_at, completed_at,
             total_jobs, succeeded_jobs, failed_jobs, canceled_jobs, jobs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.matrix)
        .bind(run.status.as_str())
        .bind(run.exit_code as i64)
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_jobs as i64)
        .bind(run.succeeded_jobs as i64)
        .bind(run.failed_jobs as i64)
        .bind(run.canceled_jobs as i64)
        .bind(jobs)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, matrix: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE (?1 IS NULL OR matrix = ?1) \
             ORDER BY started_at DESC LIMIT ?2",
            COLUMNS
        ))
        .bind(matrix)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_matrices(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT matrix FROM runs ORDER BY matrix ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list matrices")?;

        Ok(rows.iter().map(|row| row.get("matrix")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(matrix: &str, started_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            matrix: matrix.to_string(),
            status: RunStatus::Failed,
            exit_code: 1,
            started_at,
            completed_at: Some(started_at),
            total_jobs: 2,
            succeeded_jobs: 1,
            failed_jobs: 1,
            canceled_jobs: 0,
            jobs: vec![JobRecord {
                configuration: "os=linux".to_string(),
                environment: "ubuntu:22.04".to_string(),
                status: "failed".to_string(),
                detail: Some("timed out".to_string()),
                allow_failure: false,
                upload: Some("not_attempted".to_string()),
                duration_secs: Some(1.5),
            }],
        }
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::new(dir.path().join("runs.db")).await.unwrap();

        let run = summary("numpy", Utc::now());
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.matrix, "numpy");
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.exit_code, 1);
        assert_eq!(loaded.jobs, run.jobs);

        assert!(store.load_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::new(dir.path().join("runs.db")).await.unwrap();

        let now = Utc::now();
        let older = summary("numpy", now - chrono::Duration::minutes(10));
        let newer = summary("numpy", now);
        store.save_run(&older).await.unwrap();
        store.save_run(&newer).await.unwrap();
        store.save_run(&summary("scipy", now)).await.unwrap();

        let runs = store.list_runs(Some("numpy"), 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, newer.run_id);

        assert_eq!(store.list_runs(None, 2).await.unwrap().len(), 2);
        assert_eq!(store.list_matrices().await.unwrap(), vec!["numpy", "scipy"]);
    }
}
