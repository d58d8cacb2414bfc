//! Scenario-based tests for buildmatrix

mod concurrency;
mod failure_isolation;
mod fast_finish;
mod local_run;
mod matrix_expansion;
mod timeouts;
mod uploads;
