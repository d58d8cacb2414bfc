//! Main execution engine - orchestrates the whole matrix run

use crate::{
    core::{
        context::RunContext,
        job::Job,
        retry::RetryPolicy,
        state::{exit_code, FailureReason, JobStatus, RunState, RunStatus, UploadOutcome},
    },
    execution::{
        cancel::RunCanceller,
        executor::{default_acquire_retry, JobExecutor},
        fast_finish::FastFinishController,
        scheduler::{EnvironmentPool, SchedulingStrategy},
    },
    provider::EnvironmentProvider,
    upload::UploadGate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a matrix run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        matrix: String,
        jobs: usize,
    },
    RunCanceled {
        reason: String,
    },
    JobStarted {
        job_id: String,
        environment: String,
    },
    EnvironmentRetry {
        job_id: String,
        attempt: usize,
    },
    StepStarted {
        job_id: String,
        step: String,
    },
    StepFinished {
        job_id: String,
        step: String,
        exit_code: i32,
    },
    JobFinished {
        job_id: String,
        status: JobStatus,
        allow_failure: bool,
    },
    UploadFinished {
        job_id: String,
        outcome: UploadOutcome,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of execution events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.write().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub async fn emit(&self, event: ExecutionEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventBus")
    }
}

/// Why a run ended early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum CancelReason {
    /// The trigger was superseded before any job started
    FastFinish(String),
    /// Ctrl-C or another external cancel
    Interrupted,
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub matrix: String,
    pub state: RunState,
    /// Jobs in plan order
    pub jobs: Vec<Job>,
    pub cancel: Option<CancelReason>,
    /// Upload failures count as run failures
    pub upload_failures_fatal: bool,
}

impl RunReport {
    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    /// Jobs whose failure fails the run
    pub fn blocking_failures(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| job.is_blocking_failure())
    }

    pub fn upload_failures(&self) -> impl Iterator<Item = &Job> {
        self.jobs
            .iter()
            .filter(|job| job.upload_outcome.as_ref().is_some_and(UploadOutcome::is_failure))
    }

    fn is_failure(&self) -> bool {
        self.blocking_failures().next().is_some()
            || (self.upload_failures_fatal && self.upload_failures().next().is_some())
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        match &self.cancel {
            Some(CancelReason::FastFinish(_)) => exit_code::FAST_FINISHED,
            Some(CancelReason::Interrupted) => exit_code::INTERRUPTED,
            None if self.is_failure() => exit_code::JOBS_FAILED,
            None => exit_code::SUCCESS,
        }
    }
}

/// Main matrix execution engine
pub struct ExecutionEngine<P> {
    provider: Arc<P>,
    context: Arc<RunContext>,
    strategy: SchedulingStrategy,
    acquire_retry: RetryPolicy,
    upload_gate: Arc<UploadGate>,
    fast_finish: FastFinishController,
    canceller: RunCanceller,
    events: EventBus,
}

impl<P: EnvironmentProvider + 'static> ExecutionEngine<P> {
    pub fn new(provider: P, context: Arc<RunContext>, strategy: SchedulingStrategy) -> Self {
        Self {
            provider: Arc::new(provider),
            context,
            strategy,
            acquire_retry: default_acquire_retry(),
            upload_gate: Arc::new(UploadGate::disabled()),
            fast_finish: FastFinishController::disabled(),
            canceller: RunCanceller::new(),
            events: EventBus::new(),
        }
    }

    pub fn with_upload_gate(mut self, gate: UploadGate) -> Self {
        self.upload_gate = Arc::new(gate);
        self
    }

    pub fn with_fast_finish(mut self, controller: FastFinishController) -> Self {
        self.fast_finish = controller;
        self
    }

    pub fn with_acquire_retry(mut self, policy: RetryPolicy) -> Self {
        self.acquire_retry = policy;
        self
    }

    /// Handle used to cancel the run from outside (e.g. Ctrl-C)
    pub fn canceller(&self) -> RunCanceller {
        self.canceller.clone()
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler).await;
    }

    /// Execute every planned job and report the result
    pub async fn execute(&self, matrix: &str, mut jobs: Vec<Job>) -> RunReport {
        let run_id = self.context.run_id;
        let mut state = RunState::new(run_id);
        state.start(jobs.len());

        info!("Starting matrix run: {} ({}, {} jobs)", matrix, run_id, jobs.len());
        self.events
            .emit(ExecutionEvent::RunStarted {
                run_id,
                matrix: matrix.to_string(),
                jobs: jobs.len(),
            })
            .await;

        let mut cancel = None;
        if let Some(reason) = self.fast_finish.check(&self.context).await {
            let cancelled = self.fast_finish.apply(&mut jobs);
            for job in &mut jobs {
                job.upload_outcome = Some(UploadOutcome::NotAttempted);
            }
            info!("Fast-finish canceled {} jobs: {}", cancelled, reason);
            self.events
                .emit(ExecutionEvent::RunCanceled {
                    reason: reason.clone(),
                })
                .await;
            cancel = Some(CancelReason::FastFinish(reason));
        } else {
            jobs = self.run_jobs(jobs).await;
            if self.canceller.is_cancelled() {
                cancel = Some(CancelReason::Interrupted);
            }
        }

        for job in &jobs {
            state.record(&job.status);
        }

        let mut report = RunReport {
            matrix: matrix.to_string(),
            state,
            jobs,
            cancel,
            upload_failures_fatal: self.upload_gate.fail_run_on_error(),
        };
        let status = if report.cancel.is_some() {
            RunStatus::Canceled
        } else if report.is_failure() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        report.state.finish(status);

        info!("Matrix run finished: {} - {:?}", matrix, status);
        self.events
            .emit(ExecutionEvent::RunCompleted { run_id, status })
            .await;

        report
    }

    /// Fan jobs out over the environment pool, returning them in plan order
    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<Job> {
        let pool = EnvironmentPool::new(self.strategy.max_concurrency(jobs.len()));
        let executor = Arc::new(
            JobExecutor::new(self.provider.clone(), self.context.clone())
                .with_acquire_retry(self.acquire_retry)
                .with_events(self.events.clone()),
        );

        let originals = jobs.clone();
        let mut set = JoinSet::new();

        for (position, job) in jobs.into_iter().enumerate() {
            let executor = executor.clone();
            let pool = pool.clone();
            let cancel = self.canceller.signal();
            let gate = self.upload_gate.clone();
            let events = self.events.clone();

            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = pool.acquire() => permit.ok(),
                };

                let mut job = match permit {
                    Some(permit) => {
                        let job = executor.execute(job, &cancel).await;
                        drop(permit);
                        job
                    }
                    None => {
                        let mut job = job;
                        job.skip_remaining_steps();
                        if let Err(e) = job.transition(JobStatus::Canceled) {
                            error!("{}", e);
                        }
                        job
                    }
                };

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => match job.status {
                        JobStatus::Succeeded => UploadOutcome::Skipped {
                            reason: "run canceled".to_string(),
                        },
                        _ => UploadOutcome::NotAttempted,
                    },
                    outcome = gate.process(&job) => outcome,
                };
                events
                    .emit(ExecutionEvent::UploadFinished {
                        job_id: job.id(),
                        outcome: outcome.clone(),
                    })
                    .await;
                job.upload_outcome = Some(outcome);

                (position, job)
            });
        }

        let mut finished: Vec<Option<Job>> = vec![None; originals.len()];
        while let Some(result) = set.join_next().await {
            match result {
                Ok((position, job)) => finished[position] = Some(job),
                Err(e) => error!("Job task failed: {}", e),
            }
        }

        finished
            .into_iter()
            .zip(originals)
            .map(|(done, original)| match done {
                Some(job) => job,
                None => {
                    let mut job = original;
                    warn!("Job {} crashed; marking it failed", job.id());
                    if let Err(e) = job.fail(FailureReason::Internal {
                        message: "job task panicked".to_string(),
                    }) {
                        error!("{}", e);
                    }
                    job.upload_outcome = Some(UploadOutcome::NotAttempted);
                    job
                }
            })
            .collect()
    }
}
