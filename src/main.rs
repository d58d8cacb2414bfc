use anyhow::{Context, Result};
use buildmatrix::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use buildmatrix::cli::output::*;
use buildmatrix::cli::{Cli, Command};
use buildmatrix::core::config::{MatrixConfig, DEFAULT_CONFIG_FILES};
use buildmatrix::core::{exit_code, Job, RetryPolicy, RunContext, Secrets, TriggerEvent};
use buildmatrix::execution::{ExecutionEngine, ExecutionEvent, FastFinishController, RunReport};
use buildmatrix::matrix::{JobPlanner, MatrixExpander};
use buildmatrix::persistence::{PersistenceBackend, RunSummary};
use buildmatrix::provider::{Provider, ProviderConfig};
use buildmatrix::trigger::GitRemoteLookup;
use buildmatrix::upload::{store_from_config, UploadGate};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initial backoff between upload attempts
const UPLOAD_BACKOFF: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::from_args();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{} {:#}", WARN, e);
    }

    let result = match &cli.command {
        Command::Plan(cmd) => plan_matrix(cmd),
        Command::Run(cmd) => run_matrix(cmd).await,
        Command::Validate(cmd) => validate_matrix(cmd),
        Command::History(cmd) => show_history(cmd).await,
    };

    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{} {}", CROSS, style(format!("{:#}", e)).red());
            ExitCode::from(exit_code::CONFIGURATION as u8)
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")
}

/// The file given on the command line, or the first default name in the current directory
fn config_path(file: Option<&Path>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    MatrixConfig::discover(&cwd).with_context(|| {
        format!(
            "No matrix file given and none of {} found in {}",
            DEFAULT_CONFIG_FILES.join(", "),
            cwd.display()
        )
    })
}

fn load_config(file: Option<&Path>) -> Result<MatrixConfig> {
    let path = config_path(file)?;
    MatrixConfig::from_file(&path)
        .with_context(|| format!("Failed to load matrix config {}", path.display()))
}

/// Expand the matrix and plan one job per configuration
fn plan_jobs(
    config: &MatrixConfig,
    context: &RunContext,
    upload: Option<bool>,
    timeout: Option<Duration>,
) -> Result<Vec<Job>> {
    let axes = config.get_axes()?;
    let configurations = MatrixExpander::new().expand(&axes, &config.exclusions()?)?;

    let mut planner = JobPlanner::from_config(config)?;
    if let Some(enabled) = upload {
        planner = planner.with_upload_enabled(enabled);
    }
    if let Some(timeout) = timeout {
        planner = planner.with_timeout(timeout);
    }
    Ok(planner.plan(&configurations, context)?)
}

fn plan_matrix(cmd: &PlanCommand) -> Result<i32> {
    let config = load_config(cmd.file.as_deref())?;
    let context = RunContext::new(TriggerEvent::from_env(), Secrets::new());
    let jobs = plan_jobs(&config, &context, None, None)?;

    if cmd.json {
        let jobs: Vec<_> = jobs
            .iter()
            .map(|job| {
                serde_json::json!({
                    "index": job.index,
                    "id": job.id(),
                    "configuration": job.configuration.values(),
                    "environment": job.environment,
                    "upload": job.upload,
                    "allow_failure": job.allow_failure,
                    "timeout_secs": job.timeout.as_secs(),
                    "steps": job.steps.iter().map(|s| serde_json::json!({
                        "name": s.name,
                        "run": s.command,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        let data = serde_json::json!({ "matrix": config.name, "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{}", format_plan(&config.name, &jobs));
    }

    Ok(exit_code::SUCCESS)
}

fn build_upload_gate(config: &MatrixConfig, secrets: &Secrets) -> UploadGate {
    match &config.upload.store {
        Some(store) => UploadGate::new(store_from_config(store, secrets))
            .with_retry(RetryPolicy::new(config.upload.max_attempts, UPLOAD_BACKOFF))
            .with_fail_run_on_error(config.upload.fail_run_on_error),
        None => UploadGate::disabled(),
    }
}

async fn run_matrix(cmd: &RunCommand) -> Result<i32> {
    let config = load_config(cmd.file.as_deref())?;

    println!("{} Loaded matrix: {}", INFO, style(&config.name).bold());

    let mut trigger = TriggerEvent::from_env();
    if let Some(branch) = &cmd.branch {
        trigger.branch = Some(branch.clone());
    }
    if let Some(pr) = cmd.pr {
        trigger.pull_request = Some(pr);
    }
    if let Some(commit) = &cmd.commit {
        trigger.commit = Some(commit.clone());
    }
    let secrets = Secrets::from_env(config.secrets.as_slice());
    let context = Arc::new(RunContext::new(trigger, secrets));

    let jobs = plan_jobs(&config, &context, cmd.upload_override(), cmd.timeout)?;

    let kind = cmd.provider.map(Into::into).unwrap_or(config.provider);
    let provider = Provider::new(kind, ProviderConfig::default());

    let fast_finish = if config.fast_finish.enabled && !cmd.no_fast_finish {
        FastFinishController::new(
            GitRemoteLookup::new(config.fast_finish.remote.clone()),
            Duration::from_secs(config.fast_finish.lookup_timeout_secs),
        )
    } else {
        FastFinishController::disabled()
    };

    let engine = ExecutionEngine::new(provider, context.clone(), cmd.scheduling(config.max_parallel))
        .with_upload_gate(build_upload_gate(&config, &context.secrets))
        .with_fast_finish(fast_finish);

    let progress = create_progress_bar(jobs.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            if matches!(event, ExecutionEvent::JobFinished { .. }) {
                bar.inc(1);
            }
            if let Some(line) = format_execution_event(&event) {
                bar.println(line);
            }
        })
        .await;

    let canceller = engine.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; canceling remaining jobs");
            canceller.cancel();
        }
    });

    let report = engine.execute(&config.name, jobs).await;
    progress.finish_and_clear();

    println!("{}", format_run_report(&report));

    if !cmd.no_history {
        save_history(&report).await;
    }

    let code = report.exit_code();
    if code == exit_code::SUCCESS {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&config.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&config.name).bold(),
            format_run_status(report.status())
        );
    }

    Ok(code)
}

/// History is best effort; a broken database never fails the run
async fn save_history(report: &RunReport) {
    let summary = RunSummary::from_report(report);
    let saved = match open_history().await {
        Ok(store) => store.save_run(&summary).await,
        Err(e) => Err(e),
    };
    match saved {
        Ok(()) => println!(
            "{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        ),
        Err(e) => warn!("Failed to save run history: {:#}", e),
    }
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Box<dyn PersistenceBackend>> {
    let store = buildmatrix::persistence::SqliteRunStore::with_default_path().await?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Box<dyn PersistenceBackend>> {
    anyhow::bail!("run history needs the `sqlite` feature")
}

fn validate_matrix(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating matrix...", INFO);

    let config = match load_config(cmd.file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(exit_code::CONFIGURATION);
        }
    };

    let axes = config.get_axes()?;
    let configurations = MatrixExpander::new().expand(&axes, &config.exclusions()?)?;

    println!("{} Matrix configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Axes: {}", style(axes.names().cloned().collect::<Vec<_>>().join(", ")).cyan());
    println!(
        "  Configurations: {} of {}",
        style(configurations.len()).cyan(),
        MatrixExpander::new().count(&axes)
    );
    println!("  Steps: {}", style(config.steps.len()).cyan());

    if cmd.json {
        let json = serde_json::to_string_pretty(&config)?;
        println!("\n{}", json);
    }

    Ok(exit_code::SUCCESS)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(exit_code::SUCCESS);
    }

    let runs = store.list_runs(cmd.matrix.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(exit_code::SUCCESS);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(exit_code::SUCCESS);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(exit_code::SUCCESS)
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Matrix: {}", style(&summary.matrix).bold());
    println!("  Status: {} (exit {})", format_run_status(summary.status), summary.exit_code);
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }

    for job in &summary.jobs {
        let detail = job
            .detail
            .as_ref()
            .map(|d| format!(": {}", d))
            .unwrap_or_default();
        println!(
            "    {} {} on {}{}",
            style(&job.status).bold(),
            job.configuration,
            style(&job.environment).dim(),
            detail
        );
    }

    Ok(())
}
