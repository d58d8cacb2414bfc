//! Upload gate - decides per job whether and how to publish its artifact

use crate::core::{
    job::Job,
    retry::RetryPolicy,
    state::{JobStatus, UploadOutcome},
};
use crate::upload::store::{ArtifactIdentity, ArtifactStore, UploadError};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Publishes artifacts of succeeded jobs, at most once per identity
pub struct UploadGate {
    store: Option<Mutex<Box<dyn ArtifactStore>>>,
    retry: RetryPolicy,
    fail_run_on_error: bool,
}

impl UploadGate {
    pub fn new(store: Box<dyn ArtifactStore>) -> Self {
        Self {
            store: Some(Mutex::new(store)),
            retry: RetryPolicy::default(),
            fail_run_on_error: false,
        }
    }

    /// Gate without a store: every eligible job is reported as skipped
    pub fn disabled() -> Self {
        Self {
            store: None,
            retry: RetryPolicy::none(),
            fail_run_on_error: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fail_run_on_error(mut self, fail: bool) -> Self {
        self.fail_run_on_error = fail;
        self
    }

    /// Upload failures turn the run into a failure
    pub fn fail_run_on_error(&self) -> bool {
        self.fail_run_on_error
    }

    /// Decide and perform the upload for one finished job
    ///
    /// Never changes the job's status.
    pub async fn process(&self, job: &Job) -> UploadOutcome {
        if !matches!(job.status, JobStatus::Succeeded) {
            return UploadOutcome::NotAttempted;
        }
        if !job.upload.permits_upload() {
            return UploadOutcome::Skipped {
                reason: "upload policy is skip for this build".to_string(),
            };
        }
        let Some(artifact) = &job.artifact else {
            return UploadOutcome::Skipped {
                reason: "job declares no artifact".to_string(),
            };
        };
        let Some(store) = &self.store else {
            return UploadOutcome::Skipped {
                reason: "no artifact store configured".to_string(),
            };
        };

        let identity = ArtifactIdentity::new(job, artifact);
        let label = format!("Upload of {}", identity.key());
        let result = self
            .retry
            .retry(&label, |_| attempt_upload(store, &identity, &artifact.bytes))
            .await;

        match result {
            Ok(outcome) => {
                match &outcome {
                    UploadOutcome::AlreadyPresent { key } => info!("{} already uploaded", key),
                    UploadOutcome::Uploaded { key } => info!("Uploaded {}", key),
                    _ => {}
                }
                outcome
            }
            Err(e) => {
                warn!("Giving up on upload of {}: {}", identity.key(), e);
                UploadOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

/// One attempt; the existence check is repeated since a failed attempt may still have landed
async fn attempt_upload(
    store: &Mutex<Box<dyn ArtifactStore>>,
    identity: &ArtifactIdentity,
    bytes: &[u8],
) -> Result<UploadOutcome, UploadError> {
    if store.lock().await.exists(identity).await? {
        return Ok(UploadOutcome::AlreadyPresent {
            key: identity.key(),
        });
    }
    let key = store.lock().await.upload(identity, bytes).await?;
    Ok(UploadOutcome::Uploaded { key })
}

impl std::fmt::Debug for UploadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadGate")
            .field("has_store", &self.store.is_some())
            .field("retry", &self.retry)
            .field("fail_run_on_error", &self.fail_run_on_error)
            .finish()
    }
}
