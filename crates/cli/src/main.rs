/// Entry point for the DexCloak CLI, a feature-driven Android bytecode
/// patcher.
///
/// This module parses command-line arguments and dispatches to subcommands
/// for patching packages or inspecting the directives a feature file would
/// produce. It initializes logging and handles the main execution flow.
use clap::Parser;
use dexcloak_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for DexCloak.
///
/// DexCloak rewrites decompiled Android bytecode to shift feature-selected
/// static signals (API call patterns, embedded strings, manifest
/// declarations) without changing runtime behavior, then rebuilds, signs and
/// aligns the result.
#[derive(Parser)]
#[command(name = "dexcloak")]
#[command(about = "DexCloak: feature-driven Android bytecode patcher")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the DexCloak CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    cli.command.execute().await
}
