use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadence_cache::FsCache;
use cadence_config::{PipelineDef, parse_duration};
use cadence_scheduler::{ChannelNotifier, ExecutorConfig, Scheduler, ShellExecutor};
use cadence_workflow::Pipeline;

mod render;

/// Exit code when any job failed or was skipped.
const EXIT_FAILED: u8 = 1;
/// Exit code when the pipeline file could not be loaded or validated.
const EXIT_CONFIG: u8 = 2;

/// Cadence - a job-graph CI pipeline runner
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Run every job of a pipeline
  Run(RunArgs),

  /// Check a pipeline file and its job graph without running anything
  Validate {
    /// Path to the pipeline file (YAML, or JSON with a .json extension)
    config: PathBuf,
  },

  /// Print the jobs in dispatch order with their requirements
  Graph {
    /// Path to the pipeline file (YAML, or JSON with a .json extension)
    config: PathBuf,
  },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
  /// Path to the pipeline file (YAML, or JSON with a .json extension)
  config: PathBuf,

  /// Maximum number of jobs running at once (default: pipeline value, else CPU count)
  #[arg(long, short = 'j')]
  concurrency: Option<usize>,

  /// Directory job working directories are resolved against (default: current directory)
  #[arg(long)]
  workdir: Option<PathBuf>,

  /// Cache directory (default: <user cache dir>/cadence)
  #[arg(long)]
  cache_dir: Option<PathBuf>,

  /// Default no-output timeout for run steps, e.g. 90s or 10m
  #[arg(long, value_parser = parse_timeout)]
  no_output_timeout: Option<Duration>,

  /// Print the final report as JSON on stdout; job output goes to stderr
  #[arg(long)]
  json: bool,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
  match parse_duration(value) {
    Ok(duration) if duration.is_zero() => Err("timeout must be greater than zero".to_string()),
    Ok(duration) => Ok(duration),
    Err(e) => Err(e.to_string()),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Run(args) => run(args),
    Commands::Validate { config } => validate(&config),
    Commands::Graph { config } => graph(&config),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      eprintln!("error: {e:#}");
      ExitCode::from(EXIT_CONFIG)
    }
  }
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
  let def = PipelineDef::load(path)
    .with_context(|| format!("failed to load pipeline file: {}", path.display()))?;
  let pipeline = Pipeline::build(&def)
    .with_context(|| format!("invalid pipeline: {}", path.display()))?;
  Ok(pipeline)
}

fn validate(path: &Path) -> Result<ExitCode> {
  let pipeline = load_pipeline(path)?;
  println!(
    "{}: ok ({} jobs, {} entry points)",
    path.display(),
    pipeline.len(),
    pipeline.graph().entry_points().len()
  );
  Ok(ExitCode::SUCCESS)
}

fn graph(path: &Path) -> Result<ExitCode> {
  let pipeline = load_pipeline(path)?;
  print!("{}", render::graph(&pipeline));
  Ok(ExitCode::SUCCESS)
}

fn run(args: RunArgs) -> Result<ExitCode> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_async(args).await })
}

async fn run_async(args: RunArgs) -> Result<ExitCode> {
  let pipeline = load_pipeline(&args.config)?;

  let workdir = match args.workdir {
    Some(dir) => dir,
    None => std::env::current_dir().context("failed to determine current directory")?,
  };
  let cache_dir = args
    .cache_dir
    .or_else(|| dirs::cache_dir().map(|dir| dir.join("cadence")))
    .unwrap_or_else(|| workdir.join(".cadence-cache"));
  let concurrency = args
    .concurrency
    .or(pipeline.concurrency())
    .unwrap_or_else(|| {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    });

  let mut config = ExecutorConfig::new(&workdir);
  if let Some(timeout) = args.no_output_timeout {
    config.no_output_timeout = timeout;
  }

  info!(
    config = %args.config.display(),
    workdir = %workdir.display(),
    cache_dir = %cache_dir.display(),
    concurrency,
    "starting_pipeline"
  );

  let executor = Arc::new(ShellExecutor::new(config, Arc::new(FsCache::new(cache_dir))));

  let (tx, rx) = mpsc::unbounded_channel();
  let printer = tokio::spawn(render::print_events(rx, args.json));
  let scheduler =
    Scheduler::with_notifier(executor, concurrency, Arc::new(ChannelNotifier::new(tx)));

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt_received");
      interrupt.cancel();
    }
  });

  let report = scheduler.run(&pipeline, cancel).await;

  // Dropping the scheduler closes the event channel so the printer drains
  drop(scheduler);
  if let Err(e) = printer.await {
    warn!(error = %e, "event_printer_failed");
  }

  if args.json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print!("{}", render::summary(&report));
  }

  if report.success {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::from(EXIT_FAILED))
  }
}
