//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process exit codes for a finished run
pub mod exit_code {
    /// Every job succeeded, or failed while allowed to
    pub const SUCCESS: i32 = 0;
    /// At least one blocking job failure (or a fatal upload failure)
    pub const JOBS_FAILED: i32 = 1;
    /// Invalid configuration or other error before any job started
    pub const CONFIGURATION: i32 = 2;
    /// The whole run was cancelled by the fast-finish check
    pub const FAST_FINISHED: i32 = 3;
    /// The run was interrupted by the user
    pub const INTERRUPTED: i32 = 130;
}

/// Why a job ended up failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    /// A build step exited non-zero
    StepFailed { step: String, exit_code: i32 },
    /// The job exceeded its wall-clock limit
    TimedOut,
    /// No execution environment could be provisioned
    EnvironmentUnavailable { message: String },
    /// All steps passed but the declared artifact was not produced
    ArtifactMissing { message: String },
    /// The job task itself crashed
    Internal { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepFailed { step, exit_code } => {
                write!(f, "step '{}' exited with code {}", step, exit_code)
            }
            FailureReason::TimedOut => write!(f, "timed out"),
            FailureReason::EnvironmentUnavailable { message } => {
                write!(f, "environment unavailable: {}", message)
            }
            FailureReason::ArtifactMissing { message } => {
                write!(f, "artifact missing: {}", message)
            }
            FailureReason::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed { cause: FailureReason },
    Canceled,
}

impl JobStatus {
    pub fn failed(cause: FailureReason) -> Self {
        JobStatus::Failed { cause }
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed { .. } | JobStatus::Canceled
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            JobStatus::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Canceled) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Failed { cause } => write!(f, "failed ({})", cause),
            other => f.write_str(other.label()),
        }
    }
}

/// What the upload gate did with a job's artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UploadOutcome {
    /// Job did not succeed, so nothing was attempted
    NotAttempted,
    /// Policy or configuration said not to upload
    Skipped { reason: String },
    /// An identical artifact was already at the destination
    AlreadyPresent { key: String },
    /// Artifact was pushed
    Uploaded { key: String },
    /// Upload kept failing after retries
    Failed { message: String },
}

impl UploadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UploadOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::NotAttempted => "not_attempted",
            UploadOutcome::Skipped { .. } => "skipped",
            UploadOutcome::AlreadyPresent { .. } => "already_present",
            UploadOutcome::Uploaded { .. } => "uploaded",
            UploadOutcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::NotAttempted => f.write_str("not attempted"),
            UploadOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            UploadOutcome::AlreadyPresent { key } => write!(f, "already present at {}", key),
            UploadOutcome::Uploaded { key } => write!(f, "uploaded to {}", key),
            UploadOutcome::Failed { message } => write!(f, "upload failed: {}", message),
        }
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is currently executing jobs
    Running,
    /// All jobs succeeded (allowed failures excepted)
    Succeeded,
    /// At least one job failed
    Failed,
    /// Run was cancelled before or during execution
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Canceled => "Canceled",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Running" => RunStatus::Running,
            "Succeeded" => RunStatus::Succeeded,
            "Failed" => RunStatus::Failed,
            "Canceled" => RunStatus::Canceled,
            _ => RunStatus::Pending,
        }
    }
}

/// Counters for a run in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current run status
    pub status: RunStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub canceled_jobs: usize,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            canceled_jobs: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Mark run as finished with the given status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Record one job's terminal status
    pub fn record(&mut self, status: &JobStatus) {
        match status {
            JobStatus::Succeeded => self.succeeded_jobs += 1,
            JobStatus::Failed { .. } => self.failed_jobs += 1,
            JobStatus::Canceled => self.canceled_jobs += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.canceled_jobs) as f64
            / self.total_jobs as f64
    }
}
