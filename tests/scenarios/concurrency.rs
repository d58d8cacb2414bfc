//! Test: Concurrency - the environment pool bounds simultaneous jobs

use crate::helpers::*;
use buildmatrix::core::RunStatus;
use buildmatrix::execution::SchedulingStrategy;
use std::time::Duration;

const WIDE: &str = r#"
name: wide
axes:
  os: [linux, osx]
  runtime: ["3.6", "3.7", "3.8", "3.9"]
environments:
  default: ubuntu
steps:
  - name: build
    run: make
"#;

async fn peak_for(strategy: SchedulingStrategy) -> usize {
    let (config, jobs) = plan(WIDE);
    let provider = MockProvider::new().with_step_delay(Duration::from_millis(50));
    let stats = provider.stats();

    let report = engine(provider, strategy).execute(&config.name, jobs).await;

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(stats.acquired(), 8);
    assert_eq!(stats.active(), 0);
    stats.peak()
}

#[tokio::test(start_paused = true)]
async fn test_limited_parallelism_is_respected() {
    assert_eq!(peak_for(SchedulingStrategy::LimitedParallel(3)).await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_runs_one_at_a_time() {
    assert_eq!(peak_for(SchedulingStrategy::Sequential).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_runs_everything_at_once() {
    assert_eq!(peak_for(SchedulingStrategy::Parallel).await, 8);
}
