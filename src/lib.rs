//! buildmatrix - expand a build matrix and run every configuration

pub mod cli;
pub mod core;
pub mod execution;
pub mod matrix;
pub mod persistence;
pub mod provider;
pub mod trigger;
pub mod upload;

// Re-export commonly used types
pub use crate::core::config::MatrixConfig;
pub use crate::core::{Configuration, Job, JobStatus, RunContext};
pub use execution::{ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
pub use matrix::{JobPlanner, MatrixExpander};
pub use provider::{EnvironmentProvider, Provider};
pub use upload::UploadGate;
