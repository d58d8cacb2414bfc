//! Execution environment provisioning

pub mod client;
pub mod docker;
pub mod local;
pub(crate) mod process;
pub mod response;

use crate::core::{context::Secrets, job::EnvironmentRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

pub use client::ProviderConfig;
pub use docker::DockerProvider;
pub use local::LocalProvider;
pub use response::{ProviderError, StepRun};

/// A provisioned, isolated environment owned by exactly one job
///
/// Not `Clone`; [`EnvironmentProvider::release`] consumes it.
#[derive(Debug)]
pub struct EnvironmentHandle {
    /// Provider-specific identifier (workspace name, container id)
    pub id: String,

    pub environment: EnvironmentRef,

    /// Working directory steps run in
    pub workspace: PathBuf,
}

/// One step invocation inside an environment
#[derive(Debug, Clone, Copy)]
pub struct StepCommand<'a> {
    pub name: &'a str,
    pub script: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub secrets: &'a Secrets,
}

/// Trait for environment provisioning - allows for different backends
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Provision a fresh environment
    async fn acquire(&self, environment: &EnvironmentRef) -> Result<EnvironmentHandle, ProviderError>;

    /// Run one step; a non-zero exit is a normal `StepRun`, not an error
    async fn run(
        &self,
        handle: &EnvironmentHandle,
        command: &StepCommand<'_>,
    ) -> Result<StepRun, ProviderError>;

    /// Read a file produced inside the environment (path relative to the workspace)
    async fn collect(&self, handle: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, ProviderError>;

    /// Tear the environment down
    async fn release(&self, handle: EnvironmentHandle) -> Result<(), ProviderError>;
}

/// Which backend provisions environments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Fresh directory on the host, steps run with `sh -c`
    #[default]
    Local,
    /// One container per job
    Docker,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => f.write_str("local"),
            ProviderKind::Docker => f.write_str("docker"),
        }
    }
}

/// Provider selected at startup
#[derive(Debug, Clone)]
pub enum Provider {
    Local(LocalProvider),
    Docker(DockerProvider),
}

impl Provider {
    pub fn new(kind: ProviderKind, config: ProviderConfig) -> Self {
        match kind {
            ProviderKind::Local => Provider::Local(LocalProvider::new(config)),
            ProviderKind::Docker => Provider::Docker(DockerProvider::new(config)),
        }
    }
}

#[async_trait]
impl EnvironmentProvider for Provider {
    async fn acquire(&self, environment: &EnvironmentRef) -> Result<EnvironmentHandle, ProviderError> {
        match self {
            Provider::Local(p) => p.acquire(environment).await,
            Provider::Docker(p) => p.acquire(environment).await,
        }
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        command: &StepCommand<'_>,
    ) -> Result<StepRun, ProviderError> {
        match self {
            Provider::Local(p) => p.run(handle, command).await,
            Provider::Docker(p) => p.run(handle, command).await,
        }
    }

    async fn collect(&self, handle: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, ProviderError> {
        match self {
            Provider::Local(p) => p.collect(handle, path).await,
            Provider::Docker(p) => p.collect(handle, path).await,
        }
    }

    async fn release(&self, handle: EnvironmentHandle) -> Result<(), ProviderError> {
        match self {
            Provider::Local(p) => p.release(handle).await,
            Provider::Docker(p) => p.release(handle).await,
        }
    }
}

/// Reject artifact paths that could escape the workspace
pub(crate) fn check_relative_path(path: &str) -> Result<&Path, ProviderError> {
    let candidate = Path::new(path);
    let escapes = path.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ProviderError::ArtifactUnavailable(format!(
            "'{}' is not a path inside the workspace",
            path
        )));
    }
    Ok(candidate)
}
