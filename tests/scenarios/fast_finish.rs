//! Test: Fast-finish - a superseded trigger cancels the whole run

use crate::helpers::*;
use buildmatrix::core::{exit_code, JobStatus, RetryPolicy, RunStatus, StepOutcome, UploadOutcome};
use buildmatrix::execution::{CancelReason, FastFinishController, SchedulingStrategy};
use buildmatrix::trigger::Staleness;
use buildmatrix::upload::UploadGate;
use std::time::Duration;

const WITH_ARTIFACT: &str = r#"
name: fast-finish
axes:
  os: [linux, osx]
  runtime: ["3.6", "3.7"]
environments:
  default: ubuntu
steps:
  - name: build
    run: make
artifact: "dist/{{ os }}-{{ runtime }}.tar.bz2"
"#;

#[tokio::test]
async fn test_stale_trigger_cancels_every_job() {
    let (config, jobs) = plan(WITH_ARTIFACT);
    let provider = MockProvider::new();
    let stats = provider.stats();
    let store = MockStore::new();

    let report = engine(provider, SchedulingStrategy::Parallel)
        .with_upload_gate(UploadGate::new(Box::new(store.clone())))
        .with_fast_finish(FastFinishController::new(
            MockLookup(Staleness::Stale("branch main moved to 0f3c2a1".to_string())),
            Duration::from_secs(5),
        ))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.status(), RunStatus::Canceled);
    assert_eq!(report.exit_code(), exit_code::FAST_FINISHED);
    assert!(matches!(report.cancel, Some(CancelReason::FastFinish(_))));
    assert_eq!(report.state.canceled_jobs, 4);

    for job in &report.jobs {
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.steps.iter().all(|s| s.outcome == StepOutcome::Skipped));
        assert_eq!(job.upload_outcome, Some(UploadOutcome::NotAttempted));
    }
    assert_eq!(stats.acquired(), 0);
    assert_eq!(store.uploads(), 0);
}

#[tokio::test]
async fn test_fresh_trigger_runs_normally() {
    let (config, jobs) = plan(WITH_ARTIFACT);

    let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .with_fast_finish(FastFinishController::new(
            MockLookup(Staleness::Fresh),
            Duration::from_secs(5),
        ))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert!(report.cancel.is_none());
}

#[tokio::test]
async fn test_lookup_failure_fails_open() {
    for lookup_is_broken in [true, false] {
        let (config, jobs) = plan(WITH_ARTIFACT);
        let controller = if lookup_is_broken {
            FastFinishController::new(BrokenLookup, Duration::from_secs(5))
        } else {
            FastFinishController::new(
                MockLookup(Staleness::Unknown("no commit recorded".to_string())),
                Duration::from_secs(5),
            )
        };

        let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
            .with_fast_finish(controller)
            .with_acquire_retry(RetryPolicy::none())
            .execute(&config.name, jobs)
            .await;

        assert_eq!(report.exit_code(), exit_code::SUCCESS);
        assert_eq!(report.state.succeeded_jobs, 4);
    }
}

#[tokio::test]
async fn test_user_interrupt_cancels_waiting_jobs() {
    let (config, jobs) = plan(WITH_ARTIFACT);
    let engine = engine(MockProvider::new(), SchedulingStrategy::Sequential);
    engine.canceller().cancel();

    let report = engine.execute(&config.name, jobs).await;

    assert_eq!(report.exit_code(), exit_code::INTERRUPTED);
    assert!(matches!(report.cancel, Some(CancelReason::Interrupted)));
    assert!(report.jobs.iter().all(|job| job.status == JobStatus::Canceled));
}
