//! CLI command definitions for agent-bench.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use crate::fixture::{FileFixtureLoader, FixtureLoader};
use crate::runner::{
    AgentParams, ProgressMonitor, RunConfig, RunContext, RunReport, Runner, SystemInvoker,
};
use crate::runner::config::{
    DEFAULT_CONCURRENCY, DEFAULT_GRACE_PERIOD, DEFAULT_ITERATIONS, DEFAULT_TIMEOUT,
};

/// Benchmark harness for command-line and HTTP agents.
#[derive(Parser)]
#[command(name = "agent-bench")]
#[command(about = "Run a fixture of prompts against an agent and score the results")]
#[command(version)]
#[command(
    long_about = "agent-bench runs every prompt of a fixture against an agent for a number of iterations, scores each transcript against the prompt's criteria and reports per-prompt averages.\n\nExample usage:\n  agent-bench run --fixture ./fixtures/smoke.yaml -n 3 -c 2 --output report.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a benchmark and write a JSON report.
    Run(RunArgs),

    /// Load a fixture and list its prompts without running anything.
    Validate(ValidateArgs),
}

/// Arguments for `agent-bench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Fixture file (YAML, or JSON with a .json extension).
    #[arg(short = 'f', long, env = "BENCH_FIXTURE")]
    pub fixture: PathBuf,

    /// Iterations per prompt.
    #[arg(short = 'n', long, env = "BENCH_ITERATIONS", default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u32,

    /// Maximum concurrent agent invocations.
    #[arg(short = 'c', long, env = "BENCH_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Timeout in seconds for a single agent invocation.
    #[arg(long, env = "BENCH_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Seconds in-flight invocations may keep running after an interrupt.
    #[arg(long, env = "BENCH_GRACE_SECS", default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub grace_secs: u64,

    /// Points at or above which an iteration counts as SUCCESS.
    #[arg(long, env = "BENCH_SUCCESS_THRESHOLD", default_value_t = 1.0)]
    pub success_threshold: f64,

    /// Model passed to the agent.
    #[arg(long, env = "BENCH_MODEL")]
    pub model: Option<String>,

    /// API key passed to the agent.
    #[arg(long, env = "BENCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Extra environment variable for command agents (KEY=VALUE, repeatable).
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env_vars: Vec<(String, String)>,

    /// Extra argument appended to command agents (repeatable).
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub agent_args: Vec<String>,

    /// Output file for the JSON report (stdout when omitted).
    #[arg(short = 'o', long, env = "BENCH_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Seconds between progress logs (0 disables them).
    #[arg(long, env = "BENCH_PROGRESS_SECS", default_value_t = 30)]
    pub progress_secs: u64,
}

impl RunArgs {
    /// Builds the run configuration. Validation happens in the runner.
    pub fn to_config(&self) -> RunConfig {
        let mut agent = AgentParams::default();
        for (key, value) in &self.env_vars {
            agent = agent.with_env(key, value);
        }
        for arg in &self.agent_args {
            agent = agent.with_arg(arg);
        }
        if let Some(ref model) = self.model {
            agent = agent.with_model(model);
        }
        if let Some(ref api_key) = self.api_key {
            agent = agent.with_api_key(api_key);
        }

        RunConfig::new(self.fixture.clone())
            .with_iterations(self.iterations)
            .with_concurrency(self.concurrency)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_grace_period(Duration::from_secs(self.grace_secs))
            .with_success_threshold(self.success_threshold)
            .with_agent_params(agent)
    }
}

/// Arguments for `agent-bench validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Fixture file to check.
    #[arg(short = 'f', long, env = "BENCH_FIXTURE")]
    pub fixture: PathBuf,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_bench_command(args).await,
        Commands::Validate(args) => run_validate_command(args).await,
    }
}

async fn run_bench_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.to_config();
    let ctx = RunContext::new();
    let runner = Runner::new(Arc::new(SystemInvoker::new()), Arc::new(FileFixtureLoader::new()));

    let interrupt = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                ctx.cancel();
            }
        })
    };

    let monitor = (args.progress_secs > 0).then(|| {
        ProgressMonitor::start(ctx.progress().clone(), Duration::from_secs(args.progress_secs))
    });

    let started_at = Utc::now();
    let outcome = runner.run(&config, &ctx).await;
    let completed_at = Utc::now();

    interrupt.abort();
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }

    let result = outcome?;
    let report = RunReport {
        run_id: ctx.run_id().to_string(),
        fixture: config.fixture.display().to_string(),
        started_at,
        completed_at,
        iterations: config.iterations,
        concurrency: config.concurrency,
        cancelled: ctx.is_cancelled(),
        iteration_results: result.iteration_results,
        aggregated_results: result.aggregated_results,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            tokio::fs::write(path, &json)
                .await
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    print_summary(&report);
    Ok(())
}

/// Prints a per-prompt summary to stderr so stdout stays valid JSON.
fn print_summary(report: &RunReport) {
    eprintln!();
    eprintln!("Run {} ({})", report.run_id, report.fixture);
    if report.cancelled {
        eprintln!("  run was cancelled; cancelled iterations are excluded below");
    }
    eprintln!("  {:<32} {:>10} {:>10}", "prompt", "iterations", "avg points");
    for aggregate in &report.aggregated_results {
        eprintln!(
            "  {:<32} {:>10} {:>10.3}",
            aggregate.prompt_id, aggregate.iterations, aggregate.average_points
        );
    }
}

async fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let fixture = FileFixtureLoader::new().load(&args.fixture).await?;

    println!("Fixture '{}' is valid", fixture.name);
    println!("  agent: {}", fixture.agent);
    println!("  prompts: {}", fixture.len());
    for prompt in &fixture.prompts {
        println!("    - {} [{}]", prompt.id(), prompt.strategy.kind());
    }
    Ok(())
}
