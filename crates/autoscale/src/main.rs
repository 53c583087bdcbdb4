//! Autoscaling lab CLI.
//!
//! Provisions a minikube cluster, deploys the ML prediction API with
//! Prometheus and Grafana, and switches it between HPA and VPA.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await (may need await in future)
#![allow(clippy::unused_async)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use autoscale_cli::commands::check::CheckCommand;
use autoscale_cli::commands::down::DownCommand;
use autoscale_cli::commands::forward::ForwardCommand;
use autoscale_cli::commands::status::StatusCommand;
use autoscale_cli::commands::switch_mode::SwitchModeCommand;
use autoscale_cli::commands::traffic::TrafficCommand;
use autoscale_cli::commands::up::UpCommand;
use autoscale_cli::DeployConfig;

/// Autoscale - local HPA/VPA lab for the ML prediction API.
#[derive(Parser)]
#[command(
    name = "autoscale",
    version,
    about = "Local HPA/VPA lab for the ML prediction API",
    long_about = "Bring up a minikube cluster running the ML prediction API with\n\
                  Prometheus and Grafana, then switch it between horizontal and\n\
                  vertical pod autoscaling.\n\n\
                  Every command is idempotent - re-running it converges on the\n\
                  same end state."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (YAML). Built-in defaults are used when unset.
    #[arg(short, long, global = true, env = "AUTOSCALE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the cluster and deploy everything.
    ///
    /// Checks prerequisites, starts minikube, builds the API image, deploys
    /// monitoring and the API, then forwards ports until Ctrl+C.
    Up(UpCommand),

    /// Tear down the cluster, releases, image and local state.
    #[command(alias = "cleanup")]
    Down(DownCommand),

    /// Switch the API between HPA and VPA.
    SwitchMode(SwitchModeCommand),

    /// Show cluster, release and autoscaler status.
    Status(StatusCommand),

    /// Check prerequisites only.
    Check(CheckCommand),

    /// (Re)start port-forwards and hold them until Ctrl+C.
    Forward(ForwardCommand),

    /// Generate prediction traffic against the forwarded API.
    Traffic(TrafficCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,autoscale_cli=debug")
    } else {
        EnvFilter::new("warn,autoscale_cli=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = DeployConfig::load_or_default(cli.config.as_deref()).with_context(|| {
        cli.config.as_ref().map_or_else(
            || "invalid default configuration".to_string(),
            |p| format!("failed to load config from {}", p.display()),
        )
    })?;

    match cli.command {
        Commands::Up(cmd) => cmd.run(&config).await,
        Commands::Down(cmd) => cmd.run(&config).await,
        Commands::SwitchMode(cmd) => cmd.run(&config).await,
        Commands::Status(cmd) => cmd.run(&config).await,
        Commands::Check(cmd) => cmd.run(&config).await,
        Commands::Forward(cmd) => cmd.run(&config).await,
        Commands::Traffic(cmd) => cmd.run().await,
    }
}
