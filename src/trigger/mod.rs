//! Lookups answering "has the trigger of this run been superseded?"

pub mod git;

use crate::core::context::RunContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use git::GitRemoteLookup;

/// Answer of a staleness lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "staleness", content = "reason")]
pub enum Staleness {
    /// The triggering commit is still the head
    Fresh,
    /// A newer commit or a closed PR superseded this run
    Stale(String),
    /// The lookup could not tell
    Unknown(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup command failed: {0}")]
    Command(String),

    #[error("unexpected lookup output: {0}")]
    Parse(String),
}

/// Trait for querying the version-control host about the triggering change
#[async_trait]
pub trait TriggerLookup: Send + Sync {
    async fn is_stale(&self, context: &RunContext) -> Result<Staleness, LookupError>;
}

/// Lookup used when fast-finish is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStale;

#[async_trait]
impl TriggerLookup for NeverStale {
    async fn is_stale(&self, _context: &RunContext) -> Result<Staleness, LookupError> {
        Ok(Staleness::Fresh)
    }
}
