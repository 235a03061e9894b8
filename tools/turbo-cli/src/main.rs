//! Turbo CLI - Command line tool for the TurboCommerce storefront data layer.
//!
//! Commands:
//! - `turbo keys` - Print canonical cache keys
//! - `turbo predict` - Rank likely next routes from an analytics ledger
//! - `turbo warm` - Warm routes against the configured API
//! - `turbo config` - Manage configuration

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{ConfigArgs, KeysArgs, PredictArgs, WarmArgs};

/// Turbo CLI - Inspect and warm the storefront cache
#[derive(Parser)]
#[command(name = "turbo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical cache key for a query
    Keys(KeysArgs),

    /// Rank likely next routes from recorded analytics
    Predict(PredictArgs),

    /// Fetch route data into the cache
    Warm(WarmArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Setup output formatting
    let output = output::Output::new(cli.verbose, cli.json);

    // Config is read lazily so `config init` works without one
    let ctx = context::Context::load(cli.config.as_deref(), output)?;

    let result = match cli.command {
        Commands::Keys(args) => commands::keys::run(args, &ctx).await,
        Commands::Predict(args) => commands::predict::run(args, &ctx).await,
        Commands::Warm(args) => commands::warm::run(args, &ctx).await,
        Commands::Config(args) => commands::config::run(args, &ctx).await,
    };

    if let Err(e) = result {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
