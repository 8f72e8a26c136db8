//! fc-fixture - Operator console for the flight-controller production fixture
//!
//! Runs full unit tests and the stand-alone maintenance operations against
//! the unit attached to the fixture.

mod commands;
mod config;
mod operator;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixture_session::{Fixture, FixtureConfig, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::operator::ConsoleOperator;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "fc-fixture")]
#[command(author, version, about = "Flight-controller production test fixture")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FIXTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full production test on a unit
    Run {
        /// Unit code; prompted for (QR scan) when omitted
        unit: Option<String>,

        /// Keep prompting for the next unit after each session
        #[arg(long)]
        repeat: bool,
    },

    /// Check the power-sense cable only
    Psense,

    /// Load the test firmware image
    FlashTest,

    /// Load the release firmware image and re-check its serial line
    FlashRelease,

    /// Show the running firmware version and vehicle type
    Version,

    /// Reboot the flight controller
    Reboot,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(cli.output.map(OutputFormat::as_str), cli.no_color);
    let ctx = OutputContext::new(
        OutputFormat::from_name(&merged.output),
        merged.no_color,
        cli.quiet,
    );

    let fixture_config = config.resolved_fixture();
    let console = Arc::new(ConsoleOperator::new());

    // Execute command
    match &cli.command {
        Commands::Run { unit, repeat } => {
            let mut orchestrator = setup(&fixture_config, &console)?;
            commands::run(&mut orchestrator, &console, unit.as_deref(), *repeat, &ctx).await?;
        }

        Commands::Psense => {
            let orchestrator = setup(&fixture_config, &console)?;
            commands::psense(&orchestrator, &ctx).await?;
        }

        Commands::FlashTest => {
            let orchestrator = setup(&fixture_config, &console)?;
            commands::flash_test(&orchestrator, &ctx).await?;
        }

        Commands::FlashRelease => {
            let orchestrator = setup(&fixture_config, &console)?;
            commands::flash_release(&orchestrator, &ctx).await?;
        }

        Commands::Version => {
            let orchestrator = setup(&fixture_config, &console)?;
            commands::version(&orchestrator, &ctx).await?;
        }

        Commands::Reboot => {
            let orchestrator = setup(&fixture_config, &console)?;
            commands::reboot(&orchestrator, &ctx).await?;
        }

        Commands::Config => {
            commands::show_config(&fixture_config, &ctx)?;
        }
    }

    Ok(())
}

/// Wire the fixture to the attached hardware
fn setup(config: &FixtureConfig, console: &Arc<ConsoleOperator>) -> Result<Orchestrator> {
    let fixture =
        Fixture::hardware(config.clone(), console.clone()).context("Failed to set up fixture")?;
    Ok(Orchestrator::new(fixture))
}
