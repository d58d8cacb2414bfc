//! Shared mocks and helpers for the scenario suite

#![allow(dead_code)]

use async_trait::async_trait;
use buildmatrix::core::config::MatrixConfig;
use buildmatrix::core::{EnvironmentRef, Job, JobStatus, RetryPolicy, RunContext, Secrets, TriggerEvent};
use buildmatrix::execution::{ExecutionEngine, RunReport, SchedulingStrategy};
use buildmatrix::matrix::{JobPlanner, MatrixExpander};
use buildmatrix::provider::{
    EnvironmentHandle, EnvironmentProvider, ProviderError, StepCommand, StepRun,
};
use buildmatrix::trigger::{LookupError, Staleness, TriggerLookup};
use buildmatrix::upload::{ArtifactIdentity, ArtifactStore, UploadError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a configuration's steps do in the mock provider
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Every step exits with this code
    Fail(i32),
    /// Steps never return on their own
    Hang,
}

/// Counters shared between a [`MockProvider`] and the test observing it
#[derive(Debug, Default)]
pub struct ProviderStats {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    /// `(MATRIX_ID, step)` in the order steps started
    pub ran: Mutex<Vec<(String, String)>>,
}

impl ProviderStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn steps_run_by(&self, matrix_id: &str) -> Vec<String> {
        self.ran
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == matrix_id)
            .map(|(_, step)| step.clone())
            .collect()
    }
}

/// Provider whose steps succeed unless told otherwise per configuration id
#[derive(Clone, Default)]
pub struct MockProvider {
    behaviors: HashMap<String, Behavior>,
    unavailable: HashSet<String>,
    step_delay: Duration,
    stats: Arc<ProviderStats>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, configuration: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(configuration.to_string(), behavior);
        self
    }

    /// Environments that can never be provisioned
    pub fn with_unavailable(mut self, environment: &str) -> Self {
        self.unavailable.insert(environment.to_string());
        self
    }

    /// How long each step takes
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<ProviderStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl EnvironmentProvider for MockProvider {
    async fn acquire(&self, environment: &EnvironmentRef) -> Result<EnvironmentHandle, ProviderError> {
        if self.unavailable.contains(environment.as_str()) {
            return Err(ProviderError::AcquisitionFailed(format!(
                "{} is not available",
                environment
            )));
        }

        let n = self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);

        Ok(EnvironmentHandle {
            id: format!("mock-{}", n),
            environment: environment.clone(),
            workspace: format!("/mock/{}", n).into(),
        })
    }

    async fn run(
        &self,
        _handle: &EnvironmentHandle,
        command: &StepCommand<'_>,
    ) -> Result<StepRun, ProviderError> {
        let id = command.env.get("MATRIX_ID").cloned().unwrap_or_default();
        self.stats
            .ran
            .lock()
            .unwrap()
            .push((id.clone(), command.name.to_string()));

        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }

        match self.behaviors.get(&id) {
            Some(Behavior::Fail(code)) => Ok(StepRun::new(
                *code,
                format!("{}: {} failed", id, command.script),
            )),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(StepRun::new(0, "woke up"))
            }
            None => Ok(StepRun::new(0, format!("ran {}", command.script))),
        }
    }

    async fn collect(&self, handle: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(format!("{}:{}", handle.environment, path).into_bytes())
    }

    async fn release(&self, _handle: EnvironmentHandle) -> Result<(), ProviderError> {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory artifact store counting real uploads
#[derive(Clone, Default)]
pub struct MockStore {
    keys: Arc<Mutex<HashSet<String>>>,
    uploads: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` upload calls
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().unwrap().iter().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MockStore {
    async fn exists(&self, identity: &ArtifactIdentity) -> Result<bool, UploadError> {
        Ok(self.keys.lock().unwrap().contains(&identity.key()))
    }

    async fn upload(&self, identity: &ArtifactIdentity, _bytes: &[u8]) -> Result<String, UploadError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(UploadError::Command("503 Service Unavailable".to_string()));
        }

        self.uploads.fetch_add(1, Ordering::SeqCst);
        let key = identity.key();
        self.keys.lock().unwrap().insert(key.clone());
        Ok(key)
    }
}

/// Lookup with a fixed answer
pub struct MockLookup(pub Staleness);

#[async_trait]
impl TriggerLookup for MockLookup {
    async fn is_stale(&self, _context: &RunContext) -> Result<Staleness, LookupError> {
        Ok(self.0.clone())
    }
}

/// Lookup that always errors
pub struct BrokenLookup;

#[async_trait]
impl TriggerLookup for BrokenLookup {
    async fn is_stale(&self, _context: &RunContext) -> Result<Staleness, LookupError> {
        Err(LookupError::Command("network unreachable".to_string()))
    }
}

pub fn context() -> Arc<RunContext> {
    Arc::new(RunContext::new(TriggerEvent::local(), Secrets::new()))
}

/// Parse, expand and plan a matrix definition
pub fn plan(yaml: &str) -> (MatrixConfig, Vec<Job>) {
    let config = MatrixConfig::from_yaml(yaml).unwrap();
    let axes = config.get_axes().unwrap();
    let configurations = MatrixExpander::new()
        .expand(&axes, &config.exclusions().unwrap())
        .unwrap();
    let jobs = JobPlanner::from_config(&config)
        .unwrap()
        .plan(&configurations, &context())
        .unwrap();
    (config, jobs)
}

/// Engine with quick acquisition retries
pub fn engine<P: EnvironmentProvider + 'static>(
    provider: P,
    strategy: SchedulingStrategy,
) -> ExecutionEngine<P> {
    ExecutionEngine::new(provider, context(), strategy)
        .with_acquire_retry(RetryPolicy::new(2, Duration::from_millis(10)))
}

pub fn job<'a>(report: &'a RunReport, id: &str) -> &'a Job {
    report
        .jobs
        .iter()
        .find(|job| job.id() == id)
        .unwrap_or_else(|| panic!("no job {}", id))
}

pub fn ids(report: &RunReport) -> Vec<String> {
    report.jobs.iter().map(|job| job.id()).collect()
}

pub fn assert_status(report: &RunReport, id: &str, expected: &JobStatus) {
    assert_eq!(&job(report, id).status, expected, "status of {}", id);
}

/// The canonical two-axis matrix
pub const OS_RUNTIME: &str = r#"
name: os-runtime
axes:
  os: [linux, osx]
  runtime: ["3.6", "3.7"]
environments:
  default: "image:{{ os }}"
steps:
  - name: build
    run: "build --runtime {{ runtime }}"
  - name: test
    run: "test --os {{ os }}"
"#;
