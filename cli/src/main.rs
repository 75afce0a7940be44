//! imgsrc CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use imgsrc_cli::commands::{dispatch, Cli};
use imgsrc_core::FetchConfig;

#[tokio::main]
async fn main() {
    // Initialize tracing; RUST_LOG wins over IMGSRC_LOG_LEVEL
    let default_level = FetchConfig::from_env().log_level;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
