//! uvlens CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uvlens::{Config, Fit};

#[derive(Parser)]
#[command(name = "uvlens")]
#[command(about = "Fit lensed source models to interferometric visibilities")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the posterior and write the checkpoint
    Run {
        /// Fit configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured number of iterations
        #[arg(long)]
        iterations: Option<u64>,

        /// Override the checkpoint path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate the configuration and data, then print the parameter layout
    Check {
        /// Fit configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load(path: &Path) -> Result<Config> {
    Config::from_path(path).with_context(|| format!("Failed to read configuration {:?}", path))
}

fn cmd_run(path: &Path, iterations: Option<u64>, output: Option<PathBuf>) -> Result<()> {
    let mut config = load(path)?;
    if let Some(n) = iterations {
        config.sampler.iterations = n;
    }
    if let Some(output) = output {
        config.output.path = output;
    }
    let summary = uvlens::run(config)?;
    tracing::info!(
        iterations = summary.iterations,
        rows = summary.rows,
        acceptance = summary.mean_acceptance,
        resumed = summary.resumed,
        output = %summary.output.display(),
        "run complete"
    );
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let fit = Fit::prepare(load(path)?)?;
    let registry = fit.likelihood.registry();
    for entry in registry.entries() {
        match entry.fixed_to {
            Some(j) => println!("{}, offset from {}", entry, registry.entries()[j].name),
            None => println!("{}", entry),
        }
    }
    for name in registry.derived_names() {
        println!("{} (derived)", name);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run {
            config,
            iterations,
            output,
        } => cmd_run(&config, iterations, output),
        Commands::Check { config } => cmd_check(&config),
    }
}
