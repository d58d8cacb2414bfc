//! Test: Failure isolation - one job failing never stops its siblings

use crate::helpers::*;
use buildmatrix::core::{exit_code, FailureReason, JobStatus, RunStatus, StepOutcome};
use buildmatrix::execution::SchedulingStrategy;

#[tokio::test]
async fn test_failed_configuration_does_not_stop_siblings() {
    let (config, jobs) = plan(OS_RUNTIME);
    let provider = MockProvider::new().with_behavior("os=osx,runtime=3.6", Behavior::Fail(2));
    let stats = provider.stats();

    let report = engine(provider, SchedulingStrategy::LimitedParallel(2))
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.status(), RunStatus::Failed);
    assert_eq!(report.exit_code(), exit_code::JOBS_FAILED);
    assert_eq!(report.state.succeeded_jobs, 3);
    assert_eq!(report.state.failed_jobs, 1);
    assert_status(
        &report,
        "os=osx,runtime=3.6",
        &JobStatus::failed(FailureReason::StepFailed {
            step: "build".to_string(),
            exit_code: 2,
        }),
    );
    assert_eq!(stats.released(), 4);
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_steps_after_a_failure_are_skipped() {
    let (config, jobs) = plan(OS_RUNTIME);
    let provider = MockProvider::new().with_behavior("os=linux,runtime=3.7", Behavior::Fail(1));
    let stats = provider.stats();

    let report = engine(provider, SchedulingStrategy::Sequential)
        .execute(&config.name, jobs)
        .await;

    let failed = job(&report, "os=linux,runtime=3.7");
    assert!(matches!(failed.steps[0].outcome, StepOutcome::Failed { exit_code: 1, .. }));
    assert_eq!(failed.steps[1].outcome, StepOutcome::Skipped);
    assert_eq!(stats.steps_run_by("os=linux,runtime=3.7"), vec!["build"]);
    assert_eq!(stats.steps_run_by("os=osx,runtime=3.7"), vec!["build", "test"]);

    let output = failed.first_failed_step().and_then(|s| s.outcome.output());
    assert_eq!(
        output,
        Some("os=linux,runtime=3.7: build --runtime 3.7 failed")
    );
}

#[tokio::test]
async fn test_allowed_failure_keeps_run_green() {
    let yaml = format!("{}allow_failures:\n  - {{ os: osx }}\n", OS_RUNTIME);
    let (config, jobs) = plan(&yaml);
    let provider = MockProvider::new()
        .with_behavior("os=osx,runtime=3.6", Behavior::Fail(1))
        .with_behavior("os=osx,runtime=3.7", Behavior::Fail(1));

    let report = engine(provider, SchedulingStrategy::Parallel)
        .execute(&config.name, jobs)
        .await;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(report.exit_code(), exit_code::SUCCESS);
    assert_eq!(report.state.failed_jobs, 2);
    assert_eq!(report.blocking_failures().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_environment_fails_only_its_jobs() {
    let (config, jobs) = plan(OS_RUNTIME);
    let provider = MockProvider::new().with_unavailable("image:osx");
    let stats = provider.stats();

    let report = engine(provider, SchedulingStrategy::Parallel)
        .execute(&config.name, jobs)
        .await;

    for id in ["os=osx,runtime=3.6", "os=osx,runtime=3.7"] {
        let failed = job(&report, id);
        assert!(matches!(
            failed.status.failure_reason(),
            Some(FailureReason::EnvironmentUnavailable { .. })
        ));
        assert!(failed.steps.iter().all(|s| s.outcome == StepOutcome::Skipped));
    }
    assert_status(&report, "os=linux,runtime=3.6", &JobStatus::Succeeded);
    assert_status(&report, "os=linux,runtime=3.7", &JobStatus::Succeeded);
    assert_eq!(stats.acquired(), 2);
    assert_eq!(report.exit_code(), exit_code::JOBS_FAILED);
}

#[tokio::test]
async fn test_results_come_back_in_plan_order() {
    let (config, jobs) = plan(OS_RUNTIME);
    let expected: Vec<String> = jobs.iter().map(|job| job.id()).collect();

    let report = engine(MockProvider::new(), SchedulingStrategy::Parallel)
        .execute(&config.name, jobs)
        .await;

    assert_eq!(ids(&report), expected);
    assert!(report.jobs.iter().all(|job| job.status.is_terminal()));
}
