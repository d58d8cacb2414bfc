//! Test: Local provider end to end - real shells, real files

use crate::helpers::*;
use buildmatrix::core::{
    exit_code, FailureReason, JobStatus, RetryPolicy, RunContext, Secret, Secrets, TriggerEvent,
    UploadOutcome,
};
use buildmatrix::execution::{ExecutionEngine, SchedulingStrategy};
use buildmatrix::matrix::{JobPlanner, MatrixExpander};
use buildmatrix::provider::{Provider, ProviderConfig, ProviderKind};
use buildmatrix::upload::{DirectoryStore, UploadGate};
use buildmatrix::MatrixConfig;
use std::sync::Arc;
use std::time::Duration;

const LOCAL: &str = r#"
name: local
axes:
  os: [linux, osx]
  runtime: ["3.6", "3.7"]
exclude:
  - { os: osx, runtime: "3.6" }
environments:
  default: host
env:
  GREETING: hello
secrets: [UPLOAD_TOKEN]
steps:
  - name: build
    run: |
      mkdir -p dist
      echo "$GREETING {{ os }} $MATRIX_RUNTIME" > dist/{{ os }}-{{ runtime }}.txt
  - name: check-token
    run: test "$UPLOAD_TOKEN" = s3cret
  - name: test
    run: test "$MATRIX_OS" != osx || { echo "osx is broken" >&2; exit 4; }
artifact: "dist/{{ os }}-{{ runtime }}.txt"
"#;

#[tokio::test]
async fn test_local_run_builds_and_stores_artifacts() {
    let workspaces = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();

    let config = MatrixConfig::from_yaml(LOCAL).unwrap();
    let configurations = MatrixExpander::new()
        .expand(&config.get_axes().unwrap(), &config.exclusions().unwrap())
        .unwrap();

    let mut secrets = Secrets::new();
    secrets.insert("UPLOAD_TOKEN", Secret::new("s3cret"));
    let context = Arc::new(RunContext::new(TriggerEvent::local(), secrets));

    let jobs = JobPlanner::from_config(&config)
        .unwrap()
        .plan(&configurations, &context)
        .unwrap();
    assert_eq!(jobs.len(), 3);

    let provider = Provider::new(
        ProviderKind::Local,
        ProviderConfig::default().with_workspace_root(workspaces.path()),
    );
    let engine = ExecutionEngine::new(provider, context, SchedulingStrategy::LimitedParallel(2))
        .with_acquire_retry(RetryPolicy::none())
        .with_upload_gate(
            UploadGate::new(Box::new(DirectoryStore::new(artifacts.path())))
                .with_retry(RetryPolicy::new(2, Duration::from_millis(1))),
        );

    let report = engine.execute(&config.name, jobs).await;

    assert_status(&report, "os=linux,runtime=3.6", &JobStatus::Succeeded);
    assert_status(&report, "os=linux,runtime=3.7", &JobStatus::Succeeded);
    assert_status(
        &report,
        "os=osx,runtime=3.7",
        &JobStatus::failed(FailureReason::StepFailed {
            step: "test".to_string(),
            exit_code: 4,
        }),
    );
    assert_eq!(report.exit_code(), exit_code::JOBS_FAILED);

    let osx = job(&report, "os=osx,runtime=3.7");
    let output = osx.first_failed_step().and_then(|s| s.outcome.output()).unwrap();
    assert!(output.contains("osx is broken"));
    assert_eq!(osx.upload_outcome, Some(UploadOutcome::NotAttempted));

    let linux = job(&report, "os=linux,runtime=3.6");
    let artifact = linux.artifact.as_ref().unwrap();
    assert_eq!(artifact.name, "linux-3.6.txt");
    let key = match &linux.upload_outcome {
        Some(UploadOutcome::Uploaded { key }) => key.clone(),
        other => panic!("expected an upload, got {:?}", other),
    };
    let stored = std::fs::read_to_string(artifacts.path().join(key)).unwrap();
    assert_eq!(stored, "hello linux 3.6\n");

    // Every workspace was removed again
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_timed_out_step_leaves_no_processes_behind() {
    let workspaces = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("leaked");

    let yaml = format!(
        r#"
name: hung
timeout_secs: 1
axes:
  os: [linux]
environments:
  default: host
env:
  MARKER: "{}"
steps:
  - name: build
    run: (sleep 2; echo still-running > "$MARKER"); true
"#,
        marker.display()
    );
    let (config, jobs) = plan(&yaml);

    let provider = Provider::new(
        ProviderKind::Local,
        ProviderConfig::default().with_workspace_root(workspaces.path()),
    );
    let report = ExecutionEngine::new(provider, context(), SchedulingStrategy::Sequential)
        .with_acquire_retry(RetryPolicy::none())
        .execute(&config.name, jobs)
        .await;

    assert_status(&report, "os=linux", &JobStatus::failed(FailureReason::TimedOut));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!marker.exists(), "a step process outlived its job");
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}
