//! Matrix expansion and job planning

pub mod expander;
pub mod planner;

pub use expander::{MatrixError, MatrixExpander};
pub use planner::{EnvironmentResolver, JobPlanner, PlanError, PlannerSettings, RuleResolver};
