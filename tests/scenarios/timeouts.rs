//! Test: Timeouts - a hung job fails and gives its slot back

use crate::helpers::*;
use buildmatrix::core::{FailureReason, JobStatus, StepOutcome};
use buildmatrix::execution::SchedulingStrategy;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_hung_step_times_out_and_releases_slot() {
    let yaml = format!("{}timeout_secs: 1\n", OS_RUNTIME);
    let (config, jobs) = plan(&yaml);
    let provider = MockProvider::new().with_behavior("os=linux,runtime=3.6", Behavior::Hang);
    let stats = provider.stats();

    let started = tokio::time::Instant::now();
    let report = engine(provider, SchedulingStrategy::LimitedParallel(1))
        .execute(&config.name, jobs)
        .await;

    let hung = job(&report, "os=linux,runtime=3.6");
    assert_eq!(hung.status, JobStatus::failed(FailureReason::TimedOut));
    assert!(matches!(hung.steps[0].outcome, StepOutcome::Interrupted { .. }));
    assert_eq!(hung.steps[1].outcome, StepOutcome::Skipped);

    // The single slot went on to serve the remaining jobs
    for id in ["os=linux,runtime=3.7", "os=osx,runtime=3.6", "os=osx,runtime=3.7"] {
        assert_status(&report, id, &JobStatus::Succeeded);
    }
    assert_eq!(stats.acquired(), 4);
    assert_eq!(stats.released(), 4);
    assert_eq!(stats.active(), 0);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_not_retried() {
    let yaml = format!("{}timeout_secs: 5\n", OS_RUNTIME);
    let (config, jobs) = plan(&yaml);
    let provider = MockProvider::new().with_behavior("os=osx,runtime=3.7", Behavior::Hang);
    let stats = provider.stats();

    let report = engine(provider, SchedulingStrategy::Parallel)
        .execute(&config.name, jobs)
        .await;

    assert_status(
        &report,
        "os=osx,runtime=3.7",
        &JobStatus::failed(FailureReason::TimedOut),
    );
    assert_eq!(stats.steps_run_by("os=osx,runtime=3.7"), vec!["build"]);
}
