//! Artifact stores

use crate::core::{
    config::StoreConfig,
    context::Secrets,
    job::{Artifact, Job},
    step::render_template,
};
use crate::provider::process::output_in_own_group;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Error types for store operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store command failed: {0}")]
    Command(String),
}

/// What an uploaded artifact is keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    /// Configuration id of the job that built it
    pub configuration: String,
    pub name: String,
    pub sha256: String,
}

impl ArtifactIdentity {
    pub fn new(job: &Job, artifact: &Artifact) -> Self {
        Self {
            configuration: job.id(),
            name: artifact.name.clone(),
            sha256: artifact.sha256.clone(),
        }
    }

    /// `<configuration>/<sha256>/<name>`; equal keys mean identical content
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.configuration, self.sha256, self.name)
    }
}

/// Trait for artifact destinations
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, identity: &ArtifactIdentity) -> Result<bool, UploadError>;

    /// Store the content, returning its key
    async fn upload(&self, identity: &ArtifactIdentity, bytes: &[u8]) -> Result<String, UploadError>;
}

/// Build the store described by the upload configuration
pub fn store_from_config(config: &StoreConfig, secrets: &Secrets) -> Box<dyn ArtifactStore> {
    match config {
        StoreConfig::Directory { path } => Box::new(DirectoryStore::new(path.clone())),
        StoreConfig::Command { upload, exists } => {
            let mut store = CommandStore::new(upload.clone()).with_secrets(secrets.clone());
            if let Some(exists) = exists {
                store = store.with_exists(exists.clone());
            }
            Box::new(store)
        }
    }
}

/// Content-addressed directory tree
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, identity: &ArtifactIdentity) -> PathBuf {
        self.root
            .join(&identity.configuration)
            .join(&identity.sha256)
            .join(&identity.name)
    }
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    async fn exists(&self, identity: &ArtifactIdentity) -> Result<bool, UploadError> {
        tokio::fs::try_exists(self.path_for(identity))
            .await
            .map_err(|e| UploadError::Io(e.to_string()))
    }

    async fn upload(&self, identity: &ArtifactIdentity, bytes: &[u8]) -> Result<String, UploadError> {
        let target = self.path_for(identity);
        let parent = target.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| UploadError::Io(format!("{}: {}", parent.display(), e)))?;

        // Readers never see a partial file
        let staging = parent.join(format!(".{}.{}.partial", identity.name, Uuid::new_v4()));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| UploadError::Io(format!("{}: {}", staging.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(UploadError::Io(format!("{}: {}", target.display(), e)));
        }

        debug!("Stored {} at {}", identity.key(), target.display());
        Ok(identity.key())
    }
}

/// Shell commands, e.g. `anaconda upload {{ file }}`
///
/// Templates may use `{{ file }}`, `{{ name }}`, `{{ sha256 }}`,
/// `{{ configuration }}` and `{{ key }}`. The `exists` command answers
/// with its exit code: 0 present, 1 absent, anything else is an error.
#[derive(Debug, Clone)]
pub struct CommandStore {
    upload: String,
    exists: Option<String>,
    secrets: Secrets,
    shell: String,
}

impl CommandStore {
    pub fn new(upload: impl Into<String>) -> Self {
        Self {
            upload: upload.into(),
            exists: None,
            secrets: Secrets::new(),
            shell: "sh".to_string(),
        }
    }

    pub fn with_exists(mut self, exists: impl Into<String>) -> Self {
        self.exists = Some(exists.into());
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    fn variables(identity: &ArtifactIdentity, file: Option<&Path>) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), identity.name.clone());
        vars.insert("sha256".to_string(), identity.sha256.clone());
        vars.insert("configuration".to_string(), identity.configuration.clone());
        vars.insert("key".to_string(), identity.key());
        if let Some(file) = file {
            vars.insert("file".to_string(), file.display().to_string());
        }
        vars
    }

    async fn run(&self, script: &str) -> Result<(i32, String), UploadError> {
        let mut shell = Command::new(&self.shell);
        shell.arg("-c").arg(script).envs(self.secrets.env_pairs());
        let output = output_in_own_group(&mut shell)
            .await
            .map_err(|e| UploadError::Command(format!("{}: {}", self.shell, e)))?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.code().unwrap_or(-1), stderr))
    }
}

#[async_trait]
impl ArtifactStore for CommandStore {
    async fn exists(&self, identity: &ArtifactIdentity) -> Result<bool, UploadError> {
        let Some(template) = &self.exists else {
            return Ok(false);
        };
        let script = render_template(template, &Self::variables(identity, None));
        match self.run(&script).await? {
            (0, _) => Ok(true),
            (1, _) => Ok(false),
            (code, stderr) => Err(UploadError::Command(format!(
                "exists check exited with code {}: {}",
                code, stderr
            ))),
        }
    }

    async fn upload(&self, identity: &ArtifactIdentity, bytes: &[u8]) -> Result<String, UploadError> {
        let dir = std::env::temp_dir().join(format!("buildmatrix-upload-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        let file = dir.join(&identity.name);

        let result = async {
            tokio::fs::write(&file, bytes)
                .await
                .map_err(|e| UploadError::Io(e.to_string()))?;
            let script = render_template(&self.upload, &Self::variables(identity, Some(&file)));
            match self.run(&script).await? {
                (0, _) => Ok(identity.key()),
                (code, stderr) => Err(UploadError::Command(format!(
                    "upload exited with code {}: {}",
                    code, stderr
                ))),
            }
        }
        .await;

        let _ = tokio::fs::remove_dir_all(&dir).await;
        result
    }
}
