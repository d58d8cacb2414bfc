//! Docker provider - one long-lived container per job

use crate::core::job::EnvironmentRef;
use crate::provider::{
    check_relative_path,
    response::combine_output,
    EnvironmentHandle, EnvironmentProvider, ProviderConfig, ProviderError, StepCommand, StepRun,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs each job in a container started from the job's environment image
///
/// The container idles on `sleep infinity`; steps are `docker exec`ed into
/// it and `docker rm -f` tears it down.
#[derive(Debug, Clone)]
pub struct DockerProvider {
    binary: String,
    shell: String,
    workdir: String,
}

impl DockerProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            binary: config.docker_binary,
            shell: config.shell,
            workdir: config.container_workdir,
        }
    }

    fn run_args(&self, image: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "-w".to_string(),
            self.workdir.clone(),
            image.to_string(),
            "sleep".to_string(),
            "infinity".to_string(),
        ]
    }

    /// Secret values stay out of the argument list: `-e NAME` makes docker
    /// read them from its own environment.
    fn exec_args(&self, container: &str, command: &StepCommand<'_>) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-w".to_string(),
            self.workdir.clone(),
        ];
        for (key, value) in command.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for name in command.secrets.names() {
            args.push("-e".to_string());
            args.push(name.clone());
        }
        args.push(container.to_string());
        args.push(self.shell.clone());
        args.push("-c".to_string());
        args.push(command.script.to_string());
        args
    }

    fn docker(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl EnvironmentProvider for DockerProvider {
    async fn acquire(&self, environment: &EnvironmentRef) -> Result<EnvironmentHandle, ProviderError> {
        let output = self
            .docker()
            .args(self.run_args(environment.as_str()))
            .output()
            .await
            .map_err(|e| ProviderError::AcquisitionFailed(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(ProviderError::AcquisitionFailed(format!(
                "docker run {} exited with code {}: {}",
                environment,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(ProviderError::AcquisitionFailed(format!(
                "docker run {} printed no container id",
                environment
            )));
        }

        debug!("Started container {} from {}", id, environment);

        Ok(EnvironmentHandle {
            id,
            environment: environment.clone(),
            workspace: PathBuf::from(&self.workdir),
        })
    }

    async fn run(
        &self,
        handle: &EnvironmentHandle,
        command: &StepCommand<'_>,
    ) -> Result<StepRun, ProviderError> {
        debug!("Running step '{}' in container {}", command.name, handle.id);

        let output = self
            .docker()
            .args(self.exec_args(&handle.id, command))
            .envs(command.secrets.env_pairs())
            .output()
            .await
            .map_err(|e| ProviderError::Spawn(format!("{}: {}", self.binary, e)))?;

        Ok(StepRun {
            exit_code: output.status.code().unwrap_or(-1),
            output: combine_output(&output.stdout, &output.stderr),
        })
    }

    async fn collect(&self, handle: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, ProviderError> {
        let relative = check_relative_path(path)?;

        let output = self
            .docker()
            .args(["exec", "-w", self.workdir.as_str(), handle.id.as_str(), "cat"])
            .arg(relative)
            .output()
            .await
            .map_err(|e| ProviderError::ArtifactUnavailable(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(ProviderError::ArtifactUnavailable(format!(
                "{}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn release(&self, handle: EnvironmentHandle) -> Result<(), ProviderError> {
        let output = self
            .docker()
            .args(["rm", "-f", handle.id.as_str()])
            .output()
            .await
            .map_err(|e| ProviderError::Release(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(ProviderError::Release(format!(
                "docker rm {}: {}",
                handle.id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("Removed container {}", handle.id);
        Ok(())
    }
}
