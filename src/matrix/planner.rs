//! Job planning: turn configurations into runnable jobs

use crate::core::{
    axis::AxisPattern,
    config::{MatrixConfig, StepConfig},
    configuration::Configuration,
    context::{RunContext, TriggerEvent},
    job::{EnvironmentRef, Job, UploadPolicy},
    step::{render_template, Step},
};
use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no environment matches configuration '{0}' and no default is set")]
    NoEnvironment(String),
}

/// Maps a configuration to the environment its job runs in
pub trait EnvironmentResolver: Send + Sync {
    fn resolve(&self, configuration: &Configuration) -> Option<EnvironmentRef>;
}

/// First matching rule wins, then the default; `{{ axis }}` placeholders are filled in
#[derive(Debug, Clone, Default)]
pub struct RuleResolver {
    rules: Vec<(AxisPattern, EnvironmentRef)>,
    default: Option<EnvironmentRef>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, pattern: AxisPattern, environment: impl Into<String>) -> Self {
        self.rules.push((pattern, EnvironmentRef::new(environment)));
        self
    }

    pub fn with_default(mut self, environment: impl Into<String>) -> Self {
        self.default = Some(EnvironmentRef::new(environment));
        self
    }

    pub fn from_config(config: &MatrixConfig) -> Result<Self> {
        let mut resolver = Self::new();
        for (pattern, image) in config.environment_rules()? {
            resolver = resolver.with_rule(pattern, image);
        }
        if let Some(default) = &config.environments.default {
            resolver = resolver.with_default(default.clone());
        }
        Ok(resolver)
    }
}

impl EnvironmentResolver for RuleResolver {
    fn resolve(&self, configuration: &Configuration) -> Option<EnvironmentRef> {
        self.rules
            .iter()
            .find(|(pattern, _)| configuration.matches(pattern))
            .map(|(_, environment)| environment)
            .or(self.default.as_ref())
            .map(|environment| {
                EnvironmentRef::new(render_template(environment.as_str(), configuration.values()))
            })
    }
}

/// Everything the planner needs besides the environment resolver
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepConfig>,
    pub artifact: Option<String>,
    pub allow_failures: Vec<AxisPattern>,
    pub upload_overrides: Vec<(AxisPattern, UploadPolicy)>,
    /// Global upload switch (config `upload.enabled` and CLI `--no-upload`)
    pub upload_enabled: bool,
    pub upload_branches: Vec<String>,
    pub timeout: Duration,
}

impl PlannerSettings {
    pub fn from_config(config: &MatrixConfig) -> Result<Self> {
        Ok(Self {
            env: config.env.clone(),
            steps: config.steps.clone(),
            artifact: config.artifact.clone(),
            allow_failures: config.allow_failure_patterns()?,
            upload_overrides: config.upload_overrides()?,
            upload_enabled: config.upload.enabled,
            upload_branches: config.upload.branches.clone(),
            timeout: config.timeout(),
        })
    }
}

/// Environment variable carrying an axis value, e.g. `MATRIX_PYTHON_VERSION`
pub fn axis_env_name(axis: &str) -> String {
    format!("MATRIX_{}", axis.to_uppercase().replace('-', "_"))
}

pub struct JobPlanner {
    resolver: Box<dyn EnvironmentResolver>,
    settings: PlannerSettings,
}

impl JobPlanner {
    pub fn new(resolver: impl EnvironmentResolver + 'static, settings: PlannerSettings) -> Self {
        Self {
            resolver: Box::new(resolver),
            settings,
        }
    }

    pub fn from_config(config: &MatrixConfig) -> Result<Self> {
        Ok(Self::new(
            RuleResolver::from_config(config)?,
            PlannerSettings::from_config(config)?,
        ))
    }

    /// Override the global upload switch from the file
    pub fn with_upload_enabled(mut self, enabled: bool) -> Self {
        self.settings.upload_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Effective upload policy for one configuration under the given trigger
    pub fn upload_policy(&self, configuration: &Configuration, trigger: &TriggerEvent) -> UploadPolicy {
        let policy = if let Some((_, policy)) = self
            .settings
            .upload_overrides
            .iter()
            .find(|(pattern, _)| configuration.matches(pattern))
        {
            policy.clone()
        } else if !self.settings.upload_enabled || trigger.is_fork {
            UploadPolicy::Skip
        } else if !self.settings.upload_branches.is_empty() {
            UploadPolicy::OnBranch(self.settings.upload_branches.clone())
        } else {
            UploadPolicy::Upload
        };

        policy.resolve(trigger)
    }

    /// Plan one job per configuration, all in `Pending`
    pub fn plan(
        &self,
        configurations: &[Configuration],
        context: &RunContext,
    ) -> Result<Vec<Job>, PlanError> {
        configurations
            .iter()
            .enumerate()
            .map(|(index, configuration)| self.plan_job(index, configuration, context))
            .collect()
    }

    fn plan_job(
        &self,
        index: usize,
        configuration: &Configuration,
        context: &RunContext,
    ) -> Result<Job, PlanError> {
        let environment = self
            .resolver
            .resolve(configuration)
            .ok_or_else(|| PlanError::NoEnvironment(configuration.id()))?;

        let variables = configuration.values();
        let steps = self
            .settings
            .steps
            .iter()
            .map(|step| Step::from_config(step, variables))
            .collect();

        let mut job = Job::new(index, configuration.clone(), environment, steps, self.settings.timeout);

        job.env = self.settings.env.clone();
        for (axis, value) in variables {
            job.env.insert(axis_env_name(axis), value.clone());
        }
        job.env.insert("MATRIX_ID".to_string(), configuration.id());

        job.artifact_path = self
            .settings
            .artifact
            .as_ref()
            .map(|path| render_template(path, variables));
        job.upload = self.upload_policy(configuration, &context.trigger);
        job.allow_failure = self
            .settings
            .allow_failures
            .iter()
            .any(|pattern| configuration.matches(pattern));

        debug!(
            "Planned job {} in {} (upload: {:?}, allow_failure: {})",
            job.id(),
            job.environment,
            job.upload,
            job.allow_failure
        );

        Ok(job)
    }
}
