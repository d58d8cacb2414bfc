//! Test: Uploads - published at most once, retried, and never fatal by default

use crate::helpers::*;
use buildmatrix::core::{
    exit_code, CiVendor, JobStatus, RetryPolicy, RunContext, Secrets, TriggerEvent, UploadOutcome,
    UploadPolicy,
};
use buildmatrix::execution::SchedulingStrategy;
use buildmatrix::matrix::{JobPlanner, MatrixExpander};
use buildmatrix::upload::UploadGate;
use buildmatrix::MatrixConfig;
use std::time::Duration;

const PUBLISHED: &str = r#"
name: published
axes:
  os: [linux, osx]
  runtime: ["3.6", "3.7"]
environments:
  default: "image:{{ os }}"
steps:
  - name: build
    run: "build {{ runtime }}"
artifact: "dist/{{ os }}-{{ runtime }}.tar.bz2"
upload:
  branches: [main]
  overrides:
    - { match: { os: osx, runtime: "3.6" }, policy: skip }
"#;

fn gate(store: &MockStore) -> UploadGate {
    UploadGate::new(Box::new(store.clone()))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
}

fn trigger(branch: &str, pull_request: Option<u64>) -> TriggerEvent {
    TriggerEvent {
        vendor: CiVendor::Generic,
        branch: Some(branch.to_string()),
        pull_request,
        commit: Some("0f3c2a1".to_string()),
        is_fork: false,
    }
}

fn plan_for(trigger: TriggerEvent) -> (MatrixConfig, Vec<buildmatrix::Job>) {
    let config = MatrixConfig::from_yaml(PUBLISHED).unwrap();
    let configurations = MatrixExpander::new()
        .expand(&config.get_axes().unwrap(), &config.exclusions().unwrap())
        .unwrap();
    let context = RunContext::new(trigger, Secrets::new());
    let jobs = JobPlanner::from_config(&config)
        .unwrap()
        .plan(&configurations, &context)
        .unwrap();
    (config, jobs)
}

#[tokio::test]
async fn test_rerun_does_not_upload_twice() {
    let store = MockStore::new();

    let (config, jobs) = plan_for(trigger("main", None));
    let first = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .with_upload_gate(gate(&store))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(store.uploads(), 3);
    assert!(matches!(
        job(&first, "os=linux,runtime=3.6").upload_outcome,
        Some(UploadOutcome::Uploaded { .. })
    ));
    assert!(matches!(
        job(&first, "os=osx,runtime=3.6").upload_outcome,
        Some(UploadOutcome::Skipped { .. })
    ));

    let (config, jobs) = plan_for(trigger("main", None));
    let second = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .with_upload_gate(gate(&store))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(store.uploads(), 3);
    assert_eq!(store.keys().len(), 3);
    for id in ["os=linux,runtime=3.6", "os=linux,runtime=3.7", "os=osx,runtime=3.7"] {
        assert!(matches!(
            job(&second, id).upload_outcome,
            Some(UploadOutcome::AlreadyPresent { .. })
        ));
    }
}

#[tokio::test]
async fn test_pull_requests_and_other_branches_do_not_upload() {
    for trigger in [trigger("main", Some(7)), trigger("feature/x", None)] {
        let store = MockStore::new();
        let (config, jobs) = plan_for(trigger);
        assert!(jobs.iter().all(|job| job.upload == UploadPolicy::Skip));

        let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
            .with_upload_gate(gate(&store))
            .execute(&config.name, jobs)
            .await;

        assert_eq!(report.exit_code(), exit_code::SUCCESS);
        assert_eq!(store.uploads(), 0);
    }
}

#[tokio::test]
async fn test_transient_upload_failures_are_retried() {
    let store = MockStore::new().failing(2);
    let (config, jobs) = plan_for(trigger("main", None));

    let report = engine(MockProvider::new(), SchedulingStrategy::Sequential)
        .with_upload_gate(gate(&store))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.exit_code(), exit_code::SUCCESS);
    assert_eq!(store.uploads(), 3);
    assert_eq!(report.upload_failures().count(), 0);
}

#[tokio::test]
async fn test_exhausted_upload_keeps_job_succeeded() {
    let store = MockStore::new().failing(100);
    let (config, jobs) = plan_for(trigger("main", None));

    let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .with_upload_gate(gate(&store))
        .execute(&config.name, jobs)
        .await;

    let linux = job(&report, "os=linux,runtime=3.6");
    assert_eq!(linux.status, JobStatus::Succeeded);
    assert!(matches!(linux.upload_outcome, Some(UploadOutcome::Failed { .. })));
    assert_eq!(report.upload_failures().count(), 3);
    assert_eq!(report.exit_code(), exit_code::SUCCESS);
}

#[tokio::test]
async fn test_upload_failure_can_fail_the_run() {
    let store = MockStore::new().failing(100);
    let (config, jobs) = plan_for(trigger("main", None));

    let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .with_upload_gate(gate(&store).with_fail_run_on_error(true))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.exit_code(), exit_code::JOBS_FAILED);
    assert_eq!(report.state.succeeded_jobs, 4);
}

#[tokio::test]
async fn test_failed_job_is_never_uploaded() {
    let store = MockStore::new();
    let (config, jobs) = plan_for(trigger("main", None));
    let provider = MockProvider::new().with_behavior("os=linux,runtime=3.7", Behavior::Fail(1));

    let report = engine(provider, SchedulingStrategy::Parallel)
        .with_upload_gate(gate(&store))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(
        job(&report, "os=linux,runtime=3.7").upload_outcome,
        Some(UploadOutcome::NotAttempted)
    );
    assert_eq!(store.uploads(), 2);
}
