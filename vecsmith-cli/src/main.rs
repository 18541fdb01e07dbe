//! vecsmith CLI: runs LLM-driven vectorization experiments over TSVC loops.

mod commands;
mod console;
mod multi;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// vecsmith: LLM-driven SIMD vectorization with compiler-verified repair
#[derive(Parser, Debug)]
#[command(name = "vecsmith", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.vecsmith/config.toml`; relative paths resolve against it)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a vectorization experiment
    Run(RunArgs),
    /// List benchmark functions and their categories
    List {
        /// Only show the curated default set
        #[arg(long)]
        curated: bool,
    },
    /// Show what the generator would be asked to transform for one function
    Extract {
        /// Benchmark function name (e.g. s112)
        name: String,
    },
    /// Check the compiler and benchmark support files
    Check,
    /// Run several seeded experiments, each in its own process
    Multi(MultiArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RunArgs {
    /// Comma-separated functions to process (default: the configured or curated set)
    #[arg(short, long, value_delimiter = ',')]
    functions: Vec<String>,

    /// Process every benchmark function in the source
    #[arg(long, conflicts_with = "functions")]
    all: bool,

    /// Repair iterations per function
    #[arg(long)]
    max_iterations: Option<u32>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Provider: anthropic or openai
    #[arg(long)]
    provider: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Sampling seed, forwarded to providers that accept one
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reference benchmark source (tsvc.c)
    #[arg(long)]
    source: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
struct MultiArgs {
    /// Comma-separated seeds; one run per seed
    #[arg(long, value_delimiter = ',', required = true)]
    seeds: Vec<u64>,

    /// Runs executed at the same time
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Base directory; each run writes to `<base>/seed_<seed>`
    #[arg(long, default_value = "vecsmith_runs")]
    base: PathBuf,

    /// Options forwarded to every run (`--seed` and `--output` are set per run)
    #[command(flatten)]
    run: RunArgs,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default config file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "vecsmith", "vecsmith")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "vecsmith.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let context = commands::CliContext {
        workspace,
        config_file: cli.config,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &context).await
}
