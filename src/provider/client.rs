//! Provider configuration

use std::path::PathBuf;

/// Configuration shared by the environment providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Directory under which local job workspaces are created
    pub workspace_root: PathBuf,

    /// Shell used to run step scripts
    pub shell: String,

    /// Path to the docker CLI
    pub docker_binary: String,

    /// Working directory inside containers
    pub container_workdir: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            shell: "sh".to_string(),
            docker_binary: "docker".to_string(),
            container_workdir: "/workspace".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_docker_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }
}

/// `~/.cache/buildmatrix/workspaces`, or the temp dir when there is no cache dir
fn default_workspace_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("buildmatrix")
        .join("workspaces")
}
