//! Execution scheduling - how many jobs may hold an environment at once

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One job at a time, in plan order
    #[default]
    Sequential,

    /// Every job at once
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Number of environment slots for a run of `jobs` jobs (at least 1)
    pub fn max_concurrency(&self, jobs: usize) -> usize {
        let slots = match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => jobs,
            SchedulingStrategy::LimitedParallel(max) => (*max).min(jobs),
        };
        slots.max(1)
    }
}

/// Bounded pool of environment slots
///
/// A job holds one permit from before provisioning until its task finishes
/// with the environment; dropping the permit returns the slot.
#[derive(Debug, Clone)]
pub struct EnvironmentPool {
    semaphore: Arc<Semaphore>,
}

impl EnvironmentPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }
}
