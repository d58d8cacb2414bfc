//! Fast-finish: drop a whole run whose trigger has been superseded

use crate::core::{context::RunContext, job::Job, state::JobStatus};
use crate::trigger::{NeverStale, Staleness, TriggerLookup};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs the staleness check once, before any job starts
///
/// Every inconclusive answer (lookup error, `Unknown`, timeout) lets the
/// run proceed.
#[derive(Clone)]
pub struct FastFinishController {
    lookup: Arc<dyn TriggerLookup>,
    timeout: Duration,
}

impl FastFinishController {
    pub fn new(lookup: impl TriggerLookup + 'static, timeout: Duration) -> Self {
        Self {
            lookup: Arc::new(lookup),
            timeout,
        }
    }

    /// Controller that never cancels
    pub fn disabled() -> Self {
        Self::new(NeverStale, Duration::from_secs(1))
    }

    /// `Some(reason)` when the run should be cancelled
    pub async fn check(&self, context: &RunContext) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.lookup.is_stale(context)).await {
            Ok(Ok(Staleness::Fresh)) => None,
            Ok(Ok(Staleness::Stale(reason))) => {
                info!("Trigger superseded: {}", reason);
                Some(reason)
            }
            Ok(Ok(Staleness::Unknown(reason))) => {
                warn!("Could not tell whether the trigger is stale ({}); continuing", reason);
                None
            }
            Ok(Err(e)) => {
                warn!("Staleness lookup failed ({}); continuing", e);
                None
            }
            Err(_) => {
                warn!(
                    "Staleness lookup did not answer within {:?}; continuing",
                    self.timeout
                );
                None
            }
        }
    }

    /// Cancel every pending job, returning how many were cancelled
    pub fn apply(&self, jobs: &mut [Job]) -> usize {
        let mut cancelled = 0;
        for job in jobs.iter_mut() {
            if matches!(job.status, JobStatus::Pending) && job.transition(JobStatus::Canceled).is_ok() {
                job.skip_remaining_steps();
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl std::fmt::Debug for FastFinishController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastFinishController")
            .field("timeout", &self.timeout)
            .finish()
    }
}
