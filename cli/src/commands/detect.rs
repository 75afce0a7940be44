//! `imgsrc detect` command.

use std::sync::Arc;

use clap::Args;
use imgsrc_core::FetchConfig;
use imgsrc_runtime::{DaemonClient, EngineClient, SourceDetector};

use crate::output;

#[derive(Args)]
pub struct DetectArgs {
    /// Image string (e.g., "alpine:3.19", "docker-archive:./image.tar", "./layout")
    pub image: String,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = FetchConfig::from_env();
    let daemon = match EngineClient::from_config(&config) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn DaemonClient>),
        Err(e) => {
            tracing::warn!(error = %e, "Not consulting the docker daemon");
            None
        }
    };
    let detector = SourceDetector::new(daemon, config.ping_timeout());

    let (source, location) = detector.detect(&args.image).await?;

    if args.json {
        let value = serde_json::json!({
            "input": args.image,
            "source": source,
            "location": location,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let mut table = output::new_table(&["INPUT", "SOURCE", "LOCATION"]);
    table.add_row(vec![args.image.as_str(), source.name(), location.as_str()]);
    println!("{table}");
    Ok(())
}
