//! Run context - triggering event and secrets for one invocation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// CI service the run was triggered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiVendor {
    Travis,
    Azure,
    Circle,
    /// `BUILDMATRIX_*` variables set by hand or by an unknown CI
    Generic,
    /// Nothing detected, e.g. a developer machine
    Local,
}

/// The change that triggered this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub vendor: CiVendor,

    /// Branch being built (the target branch for pull requests)
    pub branch: Option<String>,

    pub pull_request: Option<u64>,

    /// Commit under test (the PR head for pull requests)
    pub commit: Option<String>,

    /// Pull request coming from a fork of the base repository
    pub is_fork: bool,
}

impl TriggerEvent {
    /// A trigger with nothing known about it
    pub fn local() -> Self {
        Self {
            vendor: CiVendor::Local,
            branch: None,
            pull_request: None,
            commit: None,
            is_fork: false,
        }
    }

    /// Detect the trigger from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Detect the trigger from an arbitrary variable lookup
    pub fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.is_empty());
        let is_true = |key: &str| {
            get(key).is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
        };

        if is_true("TRAVIS") {
            let pull_request = get("TRAVIS_PULL_REQUEST").and_then(|v| v.parse().ok());
            let commit = if pull_request.is_some() {
                get("TRAVIS_PULL_REQUEST_SHA").or_else(|| get("TRAVIS_COMMIT"))
            } else {
                get("TRAVIS_COMMIT")
            };
            let is_fork = match (get("TRAVIS_PULL_REQUEST_SLUG"), get("TRAVIS_REPO_SLUG")) {
                (Some(head), Some(base)) => head != base,
                _ => false,
            };
            return Self {
                vendor: CiVendor::Travis,
                branch: get("TRAVIS_BRANCH"),
                pull_request,
                commit,
                is_fork,
            };
        }

        if is_true("TF_BUILD") {
            let pull_request = get("SYSTEM_PULLREQUEST_PULLREQUESTNUMBER")
                .and_then(|v| v.parse().ok());
            let branch = if pull_request.is_some() {
                get("SYSTEM_PULLREQUEST_TARGETBRANCH")
            } else {
                get("BUILD_SOURCEBRANCHNAME")
            };
            let commit = if pull_request.is_some() {
                get("SYSTEM_PULLREQUEST_SOURCECOMMITID").or_else(|| get("BUILD_SOURCEVERSION"))
            } else {
                get("BUILD_SOURCEVERSION")
            };
            return Self {
                vendor: CiVendor::Azure,
                branch,
                pull_request,
                commit,
                is_fork: is_true("SYSTEM_PULLREQUEST_ISFORK"),
            };
        }

        if is_true("CIRCLECI") {
            let pull_request = get("CIRCLE_PR_NUMBER")
                .or_else(|| {
                    get("CIRCLE_PULL_REQUEST")
                        .and_then(|url| url.rsplit('/').next().map(str::to_string))
                })
                .and_then(|v| v.parse().ok());
            return Self {
                vendor: CiVendor::Circle,
                branch: get("CIRCLE_BRANCH"),
                pull_request,
                commit: get("CIRCLE_SHA1"),
                is_fork: get("CIRCLE_PR_USERNAME").is_some(),
            };
        }

        let branch = get("BUILDMATRIX_BRANCH");
        let pull_request = get("BUILDMATRIX_PR").and_then(|v| v.parse().ok());
        let commit = get("BUILDMATRIX_COMMIT");
        if branch.is_some() || pull_request.is_some() || commit.is_some() {
            return Self {
                vendor: CiVendor::Generic,
                branch,
                pull_request,
                commit,
                is_fork: is_true("BUILDMATRIX_FORK"),
            };
        }

        Self::local()
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Opaque credential; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, only for handing to a child process environment
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Named secrets injected at process start
#[derive(Clone, Default)]
pub struct Secrets {
    values: BTreeMap<String, Secret>,
}

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the named variables from the process environment, skipping unset ones
    pub fn from_env<S: AsRef<str>>(names: &[S]) -> Self {
        let mut secrets = Self::new();
        for name in names {
            let name = name.as_ref();
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => secrets.insert(name, Secret::new(value)),
                _ => debug!("Secret {} is not set", name),
            }
        }
        secrets
    }

    pub fn insert(&mut self, name: impl Into<String>, secret: Secret) {
        self.values.insert(name.into(), secret);
    }

    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// `(name, value)` pairs for a child process environment
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, secret)| (name.as_str(), secret.expose()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Process-wide, read-only state for one invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trigger: TriggerEvent,
    pub secrets: Secrets,
    pub created_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(trigger: TriggerEvent, secrets: Secrets) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            secrets,
            created_at: Utc::now(),
        }
    }
}
