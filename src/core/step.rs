//! Step domain model

use crate::core::config::StepConfig;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StepOutcome {
    /// Step has not been started
    NotRun,
    /// Step is currently running
    Running { started_at: DateTime<Utc> },
    /// Step exited zero
    Succeeded {
        output: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// Step exited non-zero (or could not be spawned)
    Failed {
        exit_code: i32,
        output: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// Step was aborted mid-flight (timeout or cancellation)
    Interrupted {
        reason: String,
        started_at: DateTime<Utc>,
    },
    /// Step never ran because an earlier step failed
    Skipped,
}

impl StepOutcome {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::NotRun | StepOutcome::Running { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepOutcome::Failed { .. } | StepOutcome::Interrupted { .. }
        )
    }

    /// Captured output, if the step got far enough to produce any
    pub fn output(&self) -> Option<&str> {
        match self {
            StepOutcome::Succeeded { output, .. } | StepOutcome::Failed { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

/// A single build step inside a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name, unique within a job
    pub name: String,

    /// Shell command with matrix variables already substituted
    pub command: String,

    /// Runtime outcome
    pub outcome: StepOutcome,
}

impl Step {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            outcome: StepOutcome::NotRun,
        }
    }

    /// Create a step from a step config, rendering `{{ var }}` placeholders
    pub fn from_config(config: &StepConfig, variables: &BTreeMap<String, String>) -> Self {
        Self::new(config.name.clone(), render_template(&config.run, variables))
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replace `{{ name }}` placeholders with values from `variables`
///
/// Unknown placeholders are left untouched so a typo shows up verbatim in
/// the command output instead of silently becoming an empty string.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
