//! Persistence layer for matrix run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{job::Job, state::RunStatus};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One job's result as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Configuration id
    pub configuration: String,
    pub environment: String,
    /// Status label (`succeeded`, `failed`, ...)
    pub status: String,
    /// Failure reason, if any
    pub detail: Option<String>,
    pub allow_failure: bool,
    pub upload: Option<String>,
    pub duration_secs: Option<f64>,
}

impl JobRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            configuration: job.id(),
            environment: job.environment.to_string(),
            status: job.status.label().to_string(),
            detail: job.status.failure_reason().map(ToString::to_string),
            allow_failure: job.allow_failure,
            upload: job.upload_outcome.as_ref().map(|o| o.label().to_string()),
            duration_secs: job.duration().map(|d| d.as_secs_f64()),
        }
    }
}

/// Summary of a matrix run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Matrix name
    pub matrix: String,

    pub status: RunStatus,

    pub exit_code: i32,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub canceled_jobs: usize,

    pub jobs: Vec<JobRecord>,
}

impl RunSummary {
    /// Create a summary from a finished run
    pub fn from_report(report: &RunReport) -> Self {
        let state = &report.state;
        Self {
            run_id: state.run_id,
            matrix: report.matrix.clone(),
            status: state.status,
            exit_code: report.exit_code(),
            started_at: state.started_at.unwrap_or_else(Utc::now),
            completed_at: state.completed_at,
            total_jobs: state.total_jobs,
            succeeded_jobs: state.succeeded_jobs,
            failed_jobs: state.failed_jobs,
            canceled_jobs: state.canceled_jobs,
            jobs: report.jobs.iter().map(JobRecord::from_job).collect(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a finished run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one matrix only
    async fn list_runs(&self, matrix: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// List all matrix names with recorded runs
    async fn list_matrices(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<Vec<RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.retain(|r| r.run_id != run.run_id);
        runs.push(run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn list_runs(&self, matrix: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .iter()
            .filter(|r| matrix.map_or(true, |m| r.matrix == m))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_matrices(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.iter().map(|r| r.matrix.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
