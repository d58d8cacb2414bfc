//! Staleness lookup through `git ls-remote`

use crate::core::context::{RunContext, TriggerEvent};
use crate::trigger::{LookupError, Staleness, TriggerLookup};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Compares the remote head of the triggering ref with the commit under test
#[derive(Debug, Clone)]
pub struct GitRemoteLookup {
    remote: String,
    git_binary: String,
}

impl GitRemoteLookup {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            git_binary: "git".to_string(),
        }
    }

    pub fn with_git_binary(mut self, binary: impl Into<String>) -> Self {
        self.git_binary = binary.into();
        self
    }

    /// Remote ref to inspect: the PR head for pull requests, the branch otherwise
    pub fn remote_ref(trigger: &TriggerEvent) -> Option<String> {
        match (&trigger.pull_request, &trigger.branch) {
            (Some(number), _) => Some(format!("refs/pull/{}/head", number)),
            (None, Some(branch)) => Some(format!("refs/heads/{}", branch)),
            (None, None) => None,
        }
    }

    async fn ls_remote(&self, reference: &str) -> Result<String, LookupError> {
        let mut command = Command::new(&self.git_binary);
        command
            .args(["ls-remote", self.remote.as_str(), reference])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| LookupError::Command(format!("{}: {}", self.git_binary, e)))?;

        if !output.status.success() {
            return Err(LookupError::Command(format!(
                "git ls-remote exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| LookupError::Parse(e.to_string()))
    }
}

/// Shortest abbreviated commit trusted to identify a head
pub const MIN_COMMIT_PREFIX: usize = 7;

/// Decide staleness from `git ls-remote` output for a single ref
pub fn compare_heads(ls_remote_output: &str, reference: &str, commit: &str) -> Result<Staleness, LookupError> {
    if commit.len() < MIN_COMMIT_PREFIX || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(Staleness::Unknown(format!(
            "'{}' is not a commit id of at least {} hex digits",
            commit, MIN_COMMIT_PREFIX
        )));
    }

    let line = match ls_remote_output.lines().find(|l| !l.trim().is_empty()) {
        Some(line) => line,
        None => {
            return Ok(Staleness::Stale(format!(
                "{} no longer exists on the remote",
                reference
            )))
        }
    };

    let head = line
        .split_whitespace()
        .next()
        .filter(|sha| sha.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| LookupError::Parse(line.to_string()))?;

    let commit = commit.to_ascii_lowercase();
    let head = head.to_ascii_lowercase();
    if head.starts_with(&commit) || commit.starts_with(&head) {
        Ok(Staleness::Fresh)
    } else {
        Ok(Staleness::Stale(format!(
            "{} moved to {}, this run is for {}",
            reference,
            short(&head),
            short(&commit)
        )))
    }
}

fn short(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

#[async_trait]
impl TriggerLookup for GitRemoteLookup {
    async fn is_stale(&self, context: &RunContext) -> Result<Staleness, LookupError> {
        let trigger = &context.trigger;
        let Some(commit) = trigger.commit.as_deref() else {
            return Ok(Staleness::Unknown("triggering commit is not known".to_string()));
        };
        let Some(reference) = Self::remote_ref(trigger) else {
            return Ok(Staleness::Unknown("no branch or pull request to check".to_string()));
        };

        debug!("Checking {} on {} against {}", reference, self.remote, commit);
        let output = self.ls_remote(&reference).await?;
        compare_heads(&output, &reference, commit)
    }
}
