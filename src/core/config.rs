//! Matrix configuration from YAML

use crate::core::{axis::{AxisPattern, AxisSet}, job::UploadPolicy};
use crate::matrix::MatrixExpander;
use crate::provider::ProviderKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// File names looked up when no `--file` is given
pub const DEFAULT_CONFIG_FILES: &[&str] = &["buildmatrix.yml", "buildmatrix.yaml", ".buildmatrix.yml"];

const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Raw `axis: value` mapping as written in YAML (values may be numbers or booleans)
pub type RawPattern = BTreeMap<String, Value>;

/// Top-level matrix configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Matrix name, used in logs and run history
    pub name: String,

    /// Execution environment backend
    #[serde(default)]
    pub provider: ProviderKind,

    /// Maximum number of jobs running at once
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Wall-clock limit per job (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Axis name to list of values
    axes: BTreeMap<String, Vec<Value>>,

    /// Combinations to drop
    #[serde(default)]
    exclude: Vec<RawPattern>,

    /// Combinations whose failure does not fail the run
    #[serde(default)]
    allow_failures: Vec<RawPattern>,

    /// Execution environment lookup
    #[serde(default)]
    pub environments: EnvironmentsConfig,

    /// Variables exported to every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Build steps, run in order inside every job
    pub steps: Vec<StepConfig>,

    /// Artifact path inside the job workspace (may use `{{ axis }}` placeholders)
    #[serde(default)]
    pub artifact: Option<String>,

    /// Names of environment variables treated as secrets
    #[serde(default)]
    pub secrets: Vec<String>,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub fast_finish: FastFinishConfig,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within the matrix
    pub name: String,

    /// Optional step description
    #[serde(default)]
    pub description: Option<String>,

    /// Shell command
    pub run: String,
}

/// Environment resolution table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    /// Used when no rule matches
    #[serde(default)]
    pub default: Option<String>,

    /// First matching rule wins
    #[serde(default)]
    pub rules: Vec<EnvironmentRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRule {
    #[serde(rename = "match")]
    pub matches: RawPattern,
    pub image: String,
}

/// Artifact destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Content-addressed directory tree
    Directory { path: PathBuf },
    /// External commands, e.g. `anaconda upload {{ file }}`
    Command {
        upload: String,
        #[serde(default)]
        exists: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOverride {
    #[serde(rename = "match")]
    pub matches: RawPattern,
    pub policy: UploadPolicy,
}

/// Upload gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Global switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only upload from non-PR builds of these branches (empty = any build)
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default)]
    pub store: Option<StoreConfig>,

    #[serde(default = "default_upload_attempts")]
    pub max_attempts: usize,

    /// Treat upload failures as run failures
    #[serde(default)]
    pub fail_run_on_error: bool,

    /// Per-configuration policy, first match wins
    #[serde(default)]
    pub overrides: Vec<UploadOverride>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branches: Vec::new(),
            store: None,
            max_attempts: default_upload_attempts(),
            fail_run_on_error: false,
            overrides: Vec::new(),
        }
    }
}

/// Stale-trigger check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastFinishConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Git remote queried for the current heads
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Give up (and proceed) after this many seconds
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
}

impl Default for FastFinishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: default_remote(),
            lookup_timeout_secs: default_lookup_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_upload_attempts() -> usize {
    3
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_lookup_timeout() -> u64 {
    30
}

/// Render a YAML scalar as a string axis value
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn pattern_from_raw(raw: &RawPattern, what: &str) -> Result<AxisPattern> {
    raw.iter()
        .map(|(axis, value)| {
            scalar_to_string(value)
                .map(|v| (axis.clone(), v))
                .with_context(|| format!("{} value for axis '{}' must be a scalar", what, axis))
        })
        .collect()
}

impl MatrixConfig {
    /// Load matrix configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Find a config file in `dir` using the default names
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Parse matrix configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: MatrixConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the matrix configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Matrix name must not be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Matrix '{}' defines no steps", self.name);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            if step.run.trim().is_empty() {
                anyhow::bail!("Step '{}' has an empty command", step.name);
            }
        }

        if self.max_parallel == Some(0) {
            anyhow::bail!("max_parallel must be at least 1");
        }

        if self.timeout_secs == Some(0) {
            anyhow::bail!("timeout_secs must be at least 1");
        }

        if self.upload.max_attempts == 0 {
            anyhow::bail!("upload.max_attempts must be at least 1");
        }

        let axes = self.get_axes()?;
        let exclusions = self.exclusions()?;
        MatrixExpander::new().expand(&axes, &exclusions)?;

        // Patterns that can never match are almost always typos
        let mut patterns = self.allow_failure_patterns()?;
        patterns.extend(self.environment_rules()?.into_iter().map(|(p, _)| p));
        patterns.extend(self.upload_overrides()?.into_iter().map(|(p, _)| p));
        for pattern in &patterns {
            for (axis, _) in pattern.iter() {
                if !axes.contains(axis) {
                    anyhow::bail!("Pattern {} references unknown axis '{}'", pattern, axis);
                }
            }
        }

        if self.environments.default.is_none() && self.environments.rules.is_empty() {
            anyhow::bail!("environments: a default or at least one rule is required");
        }

        if self.upload.enabled && self.upload.store.is_none() && self.artifact.is_some() {
            warn!("An artifact is declared but no upload store is configured; uploads will be skipped");
        }

        Ok(())
    }

    /// Axes with values rendered as strings
    pub fn get_axes(&self) -> Result<AxisSet> {
        let mut axes = AxisSet::new();
        for (name, values) in &self.axes {
            let values = values
                .iter()
                .map(|v| {
                    scalar_to_string(v)
                        .with_context(|| format!("Axis '{}' has a non-scalar value", name))
                })
                .collect::<Result<Vec<_>>>()?;
            axes.insert(name.clone(), values);
        }
        Ok(axes)
    }

    pub fn exclusions(&self) -> Result<Vec<AxisPattern>> {
        self.exclude
            .iter()
            .map(|raw| pattern_from_raw(raw, "Exclusion"))
            .collect()
    }

    pub fn allow_failure_patterns(&self) -> Result<Vec<AxisPattern>> {
        self.allow_failures
            .iter()
            .map(|raw| pattern_from_raw(raw, "allow_failures"))
            .collect()
    }

    pub fn environment_rules(&self) -> Result<Vec<(AxisPattern, String)>> {
        self.environments
            .rules
            .iter()
            .map(|rule| Ok((pattern_from_raw(&rule.matches, "Environment rule")?, rule.image.clone())))
            .collect()
    }

    pub fn upload_overrides(&self) -> Result<Vec<(AxisPattern, UploadPolicy)>> {
        self.upload
            .overrides
            .iter()
            .map(|o| Ok((pattern_from_raw(&o.matches, "Upload override")?, o.policy.clone())))
            .collect()
    }

    /// Per-job wall-clock limit
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}
