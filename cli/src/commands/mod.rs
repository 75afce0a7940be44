//! CLI command definitions and dispatch.

mod detect;
mod fetch;
mod version;

use clap::{Parser, Subcommand};

/// imgsrc - resolve and fetch container images from any source.
#[derive(Parser)]
#[command(name = "imgsrc", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Show which source an image string resolves to
    Detect(detect::DetectArgs),
    /// Fetch an image to local disk and show its metadata
    Fetch(fetch::FetchArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Detect(args) => detect::execute(args).await,
        Command::Fetch(args) => fetch::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
