//! Job executor - runs one job's steps inside a provisioned environment

use crate::{
    core::{
        context::RunContext,
        job::{Artifact, Job},
        retry::RetryPolicy,
        state::{FailureReason, JobStatus},
        step::StepOutcome,
    },
    execution::{
        cancel::CancelSignal,
        engine::{EventBus, ExecutionEvent},
    },
    provider::{EnvironmentHandle, EnvironmentProvider, ProviderError, StepCommand},
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How the step sequence of a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepsResult {
    /// Every step exited zero
    Completed,
    /// A step exited non-zero or could not be started
    StepFailed { step: String, exit_code: i32 },
    /// The job timeout expired mid-sequence
    TimedOut,
    /// The run was cancelled mid-sequence
    Canceled,
}

/// Executes a single job from `Pending` to a terminal status
pub struct JobExecutor<P> {
    provider: Arc<P>,
    context: Arc<RunContext>,
    acquire_retry: RetryPolicy,
    events: EventBus,
}

impl<P: EnvironmentProvider> JobExecutor<P> {
    pub fn new(provider: Arc<P>, context: Arc<RunContext>) -> Self {
        Self {
            provider,
            context,
            acquire_retry: RetryPolicy::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_acquire_retry(mut self, policy: RetryPolicy) -> Self {
        self.acquire_retry = policy;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Execute a job and return it in a terminal status
    ///
    /// An acquired environment is released exactly once, whatever the outcome.
    pub async fn execute(&self, mut job: Job, cancel: &CancelSignal) -> Job {
        let job_id = job.id();

        if cancel.is_cancelled() {
            job.skip_remaining_steps();
            settle(&mut job, JobStatus::Canceled);
            return job;
        }

        if let Err(e) = job.transition(JobStatus::Running) {
            error!("{}", e);
            return job;
        }

        info!("Starting job {} in {}", job_id, job.environment);
        self.events
            .emit(ExecutionEvent::JobStarted {
                job_id: job_id.clone(),
                environment: job.environment.to_string(),
            })
            .await;

        // Never dropped mid-call: a provider may have created the environment
        // before its future completes, and only a returned handle gets released.
        let handle = match self.acquire(&job, cancel).await {
            Ok(handle) if cancel.is_cancelled() => {
                info!("Job {} canceled while provisioning", job_id);
                if let Err(e) = self.provider.release(handle).await {
                    warn!("Failed to release environment of job {}: {}", job_id, e);
                }
                job.skip_remaining_steps();
                settle(&mut job, JobStatus::Canceled);
                return self.finish(job).await;
            }
            Ok(handle) => handle,
            Err(_) if cancel.is_cancelled() => {
                info!("Job {} canceled while provisioning", job_id);
                job.skip_remaining_steps();
                settle(&mut job, JobStatus::Canceled);
                return self.finish(job).await;
            }
            Err(e) => {
                error!("Job {} could not get an environment: {}", job_id, e);
                job.skip_remaining_steps();
                settle(
                    &mut job,
                    JobStatus::failed(FailureReason::EnvironmentUnavailable {
                        message: e.to_string(),
                    }),
                );
                return self.finish(job).await;
            }
        };

        let limit = job.timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => StepsResult::Canceled,
            result = timeout(limit, self.run_steps(&mut job, &handle)) => {
                result.unwrap_or(StepsResult::TimedOut)
            }
        };

        match result {
            StepsResult::Completed => match job.artifact_path.clone() {
                Some(path) => match self.provider.collect(&handle, &path).await {
                    Ok(bytes) => {
                        let artifact = Artifact::from_bytes(artifact_name(&path), bytes);
                        debug!(
                            "Collected artifact {} ({} bytes, sha256 {})",
                            artifact.name, artifact.size, artifact.sha256
                        );
                        job.artifact = Some(artifact);
                        settle(&mut job, JobStatus::Succeeded);
                    }
                    Err(e) => {
                        warn!("Job {} produced no artifact: {}", job_id, e);
                        settle(
                            &mut job,
                            JobStatus::failed(FailureReason::ArtifactMissing {
                                message: e.to_string(),
                            }),
                        );
                    }
                },
                None => settle(&mut job, JobStatus::Succeeded),
            },
            StepsResult::StepFailed { step, exit_code } => {
                job.skip_remaining_steps();
                settle(
                    &mut job,
                    JobStatus::failed(FailureReason::StepFailed { step, exit_code }),
                );
            }
            StepsResult::TimedOut => {
                warn!("Job {} timed out after {:?}", job_id, limit);
                job.interrupt_running_step(&format!("timed out after {:?}", limit));
                job.skip_remaining_steps();
                settle(&mut job, JobStatus::failed(FailureReason::TimedOut));
            }
            StepsResult::Canceled => {
                info!("Job {} canceled", job_id);
                job.interrupt_running_step("run canceled");
                job.skip_remaining_steps();
                settle(&mut job, JobStatus::Canceled);
            }
        }

        if let Err(e) = self.provider.release(handle).await {
            warn!("Failed to release environment of job {}: {}", job_id, e);
        }

        self.finish(job).await
    }

    /// Provision with retries; permanent errors and cancellation stop further attempts
    async fn acquire(
        &self,
        job: &Job,
        cancel: &CancelSignal,
    ) -> Result<EnvironmentHandle, ProviderError> {
        let label = format!("Provisioning {} for {}", job.environment, job.id());
        self.acquire_retry
            .retry_if(
                &label,
                |attempt| {
                    let events = self.events.clone();
                    let job_id = job.id();
                    async move {
                        if attempt > 1 {
                            events
                                .emit(ExecutionEvent::EnvironmentRetry { job_id, attempt })
                                .await;
                        }
                        self.provider.acquire(&job.environment).await
                    }
                },
                |e: &ProviderError| e.is_retryable() && !cancel.is_cancelled(),
            )
            .await
    }

    /// Run steps in order, stopping at the first failure
    async fn run_steps(&self, job: &mut Job, handle: &EnvironmentHandle) -> StepsResult {
        let job_id = job.id();
        let env = job.env.clone();

        for index in 0..job.steps.len() {
            let name = job.steps[index].name.clone();
            let script = job.steps[index].command.clone();
            let started_at = Utc::now();
            job.steps[index].outcome = StepOutcome::Running { started_at };

            self.events
                .emit(ExecutionEvent::StepStarted {
                    job_id: job_id.clone(),
                    step: name.clone(),
                })
                .await;

            let command = StepCommand {
                name: &name,
                script: &script,
                env: &env,
                secrets: &self.context.secrets,
            };
            let (exit_code, output) = match self.provider.run(handle, &command).await {
                Ok(run) => (run.exit_code, run.output),
                Err(e) => {
                    error!("Step '{}' of job {} did not start: {}", name, job_id, e);
                    (-1, e.to_string())
                }
            };
            let finished_at = Utc::now();

            self.events
                .emit(ExecutionEvent::StepFinished {
                    job_id: job_id.clone(),
                    step: name.clone(),
                    exit_code,
                })
                .await;

            if exit_code == 0 {
                job.steps[index].outcome = StepOutcome::Succeeded {
                    output,
                    started_at,
                    finished_at,
                };
            } else {
                debug!("Step '{}' of job {} failed with {}", name, job_id, exit_code);
                job.steps[index].outcome = StepOutcome::Failed {
                    exit_code,
                    output,
                    started_at,
                    finished_at,
                };
                return StepsResult::StepFailed {
                    step: name,
                    exit_code,
                };
            }
        }

        StepsResult::Completed
    }

    async fn finish(&self, job: Job) -> Job {
        self.events
            .emit(ExecutionEvent::JobFinished {
                job_id: job.id(),
                status: job.status.clone(),
                allow_failure: job.allow_failure,
            })
            .await;
        job
    }
}

fn settle(job: &mut Job, status: JobStatus) {
    if let Err(e) = job.transition(status) {
        error!("{}", e);
    }
}

fn artifact_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Default backoff between provisioning attempts
pub fn default_acquire_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(2))
}
