//! Core domain models for buildmatrix
//!
//! This module defines the fundamental data structures that represent
//! axes, configurations, jobs, and their configuration.

pub mod axis;
pub mod config;
pub mod configuration;
pub mod context;
pub mod job;
pub mod retry;
pub mod state;
pub mod step;

pub use axis::*;
pub use configuration::*;
pub use context::*;
pub use job::*;
pub use retry::RetryPolicy;
pub use state::*;
pub use step::*;
