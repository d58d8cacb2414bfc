//! CLI command definitions

use crate::execution::SchedulingStrategy;
use crate::provider::ProviderKind;
use clap::Args;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Print the expanded and planned matrix
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to matrix YAML file (defaults to buildmatrix.yml in the current directory)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run every job of a matrix
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to matrix YAML file (defaults to buildmatrix.yml in the current directory)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Maximum number of jobs running at once (overrides the file)
    #[arg(long, value_parser = parse_parallelism)]
    pub max_parallel: Option<usize>,

    /// Scheduling strategy, used when no parallelism limit is set
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Force uploads on, whatever the file says
    #[arg(long, conflicts_with = "no_upload")]
    pub upload: bool,

    /// Never upload artifacts (per-configuration overrides still apply)
    #[arg(long)]
    pub no_upload: bool,

    /// Per-job time limit, e.g. 90s, 30m, 2h
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Execution environment backend (overrides the file)
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKindArg>,

    /// Skip the superseded-trigger check
    #[arg(long)]
    pub no_fast_finish: bool,

    /// Branch that triggered the run
    #[arg(long)]
    pub branch: Option<String>,

    /// Pull request number that triggered the run
    #[arg(long)]
    pub pr: Option<u64>,

    /// Commit the run builds
    #[arg(long)]
    pub commit: Option<String>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// `Some(enabled)` when the command line overrides the file's upload switch
    pub fn upload_override(&self) -> Option<bool> {
        match (self.upload, self.no_upload) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    /// Scheduling for this run; an explicit limit wins over the strategy
    pub fn scheduling(&self, configured_max: Option<usize>) -> SchedulingStrategy {
        if let Some(max) = self.max_parallel {
            return SchedulingStrategy::LimitedParallel(max);
        }
        match (self.strategy, configured_max) {
            (Some(strategy), _) => strategy.into(),
            (None, Some(max)) => SchedulingStrategy::LimitedParallel(max),
            (None, None) => SchedulingStrategy::Sequential,
        }
    }
}

/// Validate a matrix configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to matrix YAML file (defaults to buildmatrix.yml in the current directory)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Matrix name to filter by
    #[arg(short, long)]
    pub matrix: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run in detail
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Provider argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKindArg {
    Local,
    Docker,
}

impl From<ProviderKindArg> for ProviderKind {
    fn from(arg: ProviderKindArg) -> Self {
        match arg {
            ProviderKindArg::Local => ProviderKind::Local,
            ProviderKindArg::Docker => ProviderKind::Docker,
        }
    }
}

/// Parse `<n>[s|m|h]`; a bare number is seconds
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*([smh]?)\s*$").expect("duration pattern is valid")
    });

    let captures = pattern
        .captures(s)
        .ok_or_else(|| format!("Invalid duration '{}': expected e.g. 90s, 30m or 2h", s))?;
    let value: u64 = captures[1]
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", s, e))?;
    if value == 0 {
        return Err(format!("Invalid duration '{}': must be positive", s));
    }

    let seconds = match &captures[2] {
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        _ => Some(value),
    }
    .ok_or_else(|| format!("Invalid duration '{}': too large", s))?;

    Ok(Duration::from_secs(seconds))
}

/// Parse a job limit; zero is rejected like `max_parallel: 0` in the file
pub fn parse_parallelism(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("max parallel jobs must be at least 1".to_string()),
        Ok(max) => Ok(max),
        Err(e) => Err(format!("Invalid job limit '{}': {}", s, e)),
    }
}
