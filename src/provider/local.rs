//! Local provider - one scratch directory per job, steps run through `sh -c`

use crate::core::job::EnvironmentRef;
use crate::provider::{
    check_relative_path,
    process::output_in_own_group,
    response::combine_output,
    EnvironmentHandle, EnvironmentProvider, ProviderConfig, ProviderError, StepCommand, StepRun,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs jobs directly on the host
///
/// The environment reference is informational only: every job gets an
/// empty workspace under `root`, removed again on release.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
    shell: String,
}

impl LocalProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            root: config.workspace_root,
            shell: config.shell,
        }
    }
}

#[async_trait]
impl EnvironmentProvider for LocalProvider {
    async fn acquire(&self, environment: &EnvironmentRef) -> Result<EnvironmentHandle, ProviderError> {
        let id = Uuid::new_v4().to_string();
        let workspace = self.root.join(&id);

        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            ProviderError::AcquisitionFailed(format!(
                "cannot create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        debug!("Created workspace {} for {}", workspace.display(), environment);

        Ok(EnvironmentHandle {
            id,
            environment: environment.clone(),
            workspace,
        })
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        command: &StepCommand<'_>,
    ) -> Result<StepRun, ProviderError> {
        debug!("Running step '{}' in {}", command.name, handle.workspace.display());

        let mut shell = Command::new(&self.shell);
        shell
            .arg("-c")
            .arg(command.script)
            .current_dir(&handle.workspace)
            .envs(command.env)
            .envs(command.secrets.env_pairs());
        let output = output_in_own_group(&mut shell)
            .await
            .map_err(|e| ProviderError::Spawn(format!("{}: {}", self.shell, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("Step '{}' exited with code {}", command.name, exit_code);

        Ok(StepRun {
            exit_code,
            output: combine_output(&output.stdout, &output.stderr),
        })
    }

    async fn collect(&self, handle: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, ProviderError> {
        let relative = check_relative_path(path)?;
        let full = handle.workspace.join(relative);
        tokio::fs::read(&full)
            .await
            .map_err(|e| ProviderError::ArtifactUnavailable(format!("{}: {}", path, e)))
    }

    async fn release(&self, handle: EnvironmentHandle) -> Result<(), ProviderError> {
        match tokio::fs::remove_dir_all(&handle.workspace).await {
            Ok(()) => {
                debug!("Removed workspace {}", handle.workspace.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Workspace {} was already gone", handle.workspace.display());
                Ok(())
            }
            Err(e) => Err(ProviderError::Release(format!(
                "{}: {}",
                handle.workspace.display(),
                e
            ))),
        }
    }
}
