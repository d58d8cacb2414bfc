//! Provider result and error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for provider operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient: the environment could not be provisioned
    #[error("failed to acquire environment: {0}")]
    AcquisitionFailed(String),

    #[error("failed to start step process: {0}")]
    Spawn(String),

    #[error("artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("failed to release environment: {0}")]
    Release(String),
}

impl ProviderError {
    /// Worth another attempt after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::AcquisitionFailed(_))
    }
}

/// Result of running one step to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRun {
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,

    /// Captured stdout followed by stderr
    pub output: String,
}

impl StepRun {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Join captured stdout and stderr into one log
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);
    }
    output
}
