//! CLI output formatting

use crate::{
    core::{
        job::Job,
        state::{JobStatus, RunStatus},
    },
    execution::{CancelReason, ExecutionEvent, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Lines of failing step output shown in the summary
pub const FAILURE_OUTPUT_LINES: usize = 20;

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// A horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    "─".repeat(width.min(120))
}

/// Format a job status for display
pub fn format_job_status(status: &JobStatus) -> String {
    match status {
        JobStatus::Pending => style("PENDING").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        JobStatus::Failed { .. } => style("FAILED").red().to_string(),
        JobStatus::Canceled => style("CANCELED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Canceled => style("CANCELED").yellow().to_string(),
    }
}

/// One line per execution event; `None` for events not worth a line
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            matrix,
            jobs,
        } => format!(
            "{} Starting matrix {} ({} jobs, run {})",
            ROCKET,
            style(matrix).bold(),
            style(jobs).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::RunCanceled { reason } => {
            format!("{} Run canceled: {}", WARN, style(reason).yellow())
        }
        ExecutionEvent::JobStarted {
            job_id,
            environment,
        } => format!(
            "{} {} on {}",
            SPINNER,
            style(job_id).cyan(),
            style(environment).dim()
        ),
        ExecutionEvent::EnvironmentRetry { job_id, attempt } => format!(
            "{} {}: environment unavailable, retry {}",
            WARN,
            style(job_id).yellow(),
            attempt
        ),
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepFinished {
            job_id,
            step,
            exit_code,
        } if *exit_code != 0 => format!(
            "{} {} / {} exited with {}",
            CROSS,
            style(job_id).red(),
            step,
            exit_code
        ),
        ExecutionEvent::StepFinished { .. } => return None,
        ExecutionEvent::JobFinished {
            job_id,
            status,
            allow_failure,
        } => {
            let icon = match status {
                JobStatus::Succeeded => CHECK,
                JobStatus::Canceled => SKIP,
                _ => CROSS,
            };
            let allowed = if *allow_failure && status.is_failed() {
                style(" (allowed to fail)").dim().to_string()
            } else {
                String::new()
            };
            format!(
                "{} {} {}{}",
                icon,
                style(job_id).bold(),
                format_job_status(status),
                allowed
            )
        }
        ExecutionEvent::UploadFinished { job_id, outcome } if outcome.is_failure() => {
            format!("{} {}: {}", WARN, style(job_id).yellow(), outcome)
        }
        ExecutionEvent::UploadFinished { .. } => return None,
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_run_status(*status)
        ),
    };
    Some(line)
}

/// Table of planned jobs
pub fn format_plan(matrix: &str, jobs: &[Job]) -> String {
    let mut lines = vec![format!(
        "{} Matrix {}: {} jobs",
        INFO,
        style(matrix).bold(),
        style(jobs.len()).cyan()
    )];

    for job in jobs {
        let mut flags = vec![format!("upload: {}", job.upload.label())];
        if job.allow_failure {
            flags.push("allowed to fail".to_string());
        }
        lines.push(format!(
            "  {:>3}. {}  {}  {}",
            job.index + 1,
            style(job.id()).bold(),
            style(&job.environment).cyan(),
            style(flags.join(", ")).dim()
        ));
    }
    lines.join("\n")
}

/// Final per-configuration summary of a run
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines = vec![separator()];

    for job in &report.jobs {
        let duration = job
            .duration()
            .map(|d| format!(" in {}", format_duration(d)))
            .unwrap_or_default();
        let upload = job
            .upload_outcome
            .as_ref()
            .filter(|o| o.is_failure() || matches!(job.status, JobStatus::Succeeded))
            .map(|o| format!(" [{}]", o))
            .unwrap_or_default();
        lines.push(format!(
            "{} {}{}{}",
            format_job_status(&job.status),
            style(job.id()).bold(),
            style(duration).dim(),
            style(upload).dim()
        ));

        if let Some(reason) = job.status.failure_reason() {
            let allowed = if job.allow_failure { " (allowed)" } else { "" };
            lines.push(format!("    {}{}", style(reason).red(), allowed));
            if let Some(output) = job.first_failed_step().and_then(|s| s.outcome.output()) {
                for line in format_output(output, FAILURE_OUTPUT_LINES).lines() {
                    lines.push(format!("    | {}", line));
                }
            }
        }
    }

    lines.push(separator());
    let state = &report.state;
    lines.push(format!(
        "{} succeeded, {} failed, {} canceled of {}",
        style(state.succeeded_jobs).green(),
        style(state.failed_jobs).red(),
        style(state.canceled_jobs).yellow(),
        state.total_jobs
    ));
    if let Some(CancelReason::FastFinish(reason)) = &report.cancel {
        lines.push(format!("{} Superseded: {}", WARN, reason));
    }
    lines.join("\n")
}

/// One-line history entry
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{} succeeded) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.matrix).bold(),
        format_run_status(summary.status),
        summary.succeeded_jobs,
        summary.total_jobs,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Keep the last `max_lines` lines of step output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        format!(
            "{} ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
