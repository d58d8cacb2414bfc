//! Job domain model

use crate::core::{
    configuration::Configuration,
    context::TriggerEvent,
    state::{FailureReason, JobStatus, UploadOutcome},
    step::{Step, StepOutcome},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: String,
        from: String,
        to: String,
    },
}

/// Reference to the execution environment a job runs in (image, VM template, tool version)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentRef(String);

impl EnvironmentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a job's artifact should be published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
    Upload,
    Skip,
    /// Upload only for non-PR builds of one of these branches
    OnBranch(Vec<String>),
}

impl UploadPolicy {
    /// Collapse `OnBranch` into `Upload` or `Skip` for the given trigger
    pub fn resolve(&self, trigger: &TriggerEvent) -> UploadPolicy {
        match self {
            UploadPolicy::OnBranch(branches) => {
                let on_listed_branch = trigger
                    .branch
                    .as_ref()
                    .is_some_and(|branch| branches.iter().any(|b| b == branch));
                if on_listed_branch && !trigger.is_pull_request() {
                    UploadPolicy::Upload
                } else {
                    UploadPolicy::Skip
                }
            }
            other => other.clone(),
        }
    }

    pub fn permits_upload(&self) -> bool {
        matches!(self, UploadPolicy::Upload)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadPolicy::Upload => "yes",
            UploadPolicy::Skip => "no",
            UploadPolicy::OnBranch(_) => "on branch",
        }
    }
}

/// Artifact produced by a successful job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// File name of the artifact
    pub name: String,

    /// Hex-encoded SHA-256 of the content
    pub sha256: String,

    pub size: u64,

    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            name: name.into(),
            sha256,
            size: bytes.len() as u64,
            bytes,
        }
    }
}

/// The execution of one configuration's steps in an isolated environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Position in the planned matrix
    pub index: usize,

    pub configuration: Configuration,

    pub environment: EnvironmentRef,

    /// Environment variables exported to every step
    pub env: BTreeMap<String, String>,

    /// Steps in execution order
    pub steps: Vec<Step>,

    pub upload: UploadPolicy,

    /// Failure of this job does not fail the run
    pub allow_failure: bool,

    /// Wall-clock limit for the step sequence
    pub timeout: Duration,

    /// Path of the artifact inside the job workspace
    pub artifact_path: Option<String>,

    pub status: JobStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Collected artifact, set once all steps succeeded
    pub artifact: Option<Artifact>,

    pub upload_outcome: Option<UploadOutcome>,
}

impl Job {
    pub fn new(
        index: usize,
        configuration: Configuration,
        environment: EnvironmentRef,
        steps: Vec<Step>,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            configuration,
            environment,
            env: BTreeMap::new(),
            steps,
            upload: UploadPolicy::Upload,
            allow_failure: false,
            timeout,
            artifact_path: None,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            artifact: None,
            upload_outcome: None,
        }
    }

    /// Stable job identifier (the configuration id)
    pub fn id(&self) -> String {
        self.configuration.id()
    }

    /// Move to a new status, refusing illegal moves and any move out of a terminal status
    pub fn transition(&mut self, next: JobStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(&next) {
            return Err(StateError::InvalidTransition {
                job: self.id(),
                from: self.status.label().to_string(),
                to: next.label().to_string(),
            });
        }

        let now = Utc::now();
        if matches!(next, JobStatus::Running) {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Fail a job, entering `Running` first if it never started
    pub fn fail(&mut self, cause: FailureReason) -> Result<(), StateError> {
        if matches!(self.status, JobStatus::Pending) {
            self.transition(JobStatus::Running)?;
        }
        self.transition(JobStatus::failed(cause))
    }

    /// Mark any in-flight step as interrupted
    pub fn interrupt_running_step(&mut self, reason: &str) {
        for step in &mut self.steps {
            if let StepOutcome::Running { started_at } = step.outcome {
                step.outcome = StepOutcome::Interrupted {
                    reason: reason.to_string(),
                    started_at,
                };
            }
        }
    }

    /// Mark every step that never started as skipped
    pub fn skip_remaining_steps(&mut self) {
        for step in &mut self.steps {
            if matches!(step.outcome, StepOutcome::NotRun) {
                step.outcome = StepOutcome::Skipped;
            }
        }
    }

    /// The first step that failed or was interrupted
    pub fn first_failed_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.outcome.is_failure())
    }

    /// Failed and not covered by an allowed-failure rule
    pub fn is_blocking_failure(&self) -> bool {
        self.status.is_failed() && !self.allow_failure
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }
}
