//! `imgsrc fetch` command.

use clap::Args;
use imgsrc_core::{EventEmitter, FetchConfig};
use imgsrc_runtime::{expand_home, ImageFetcher, Source};

use crate::output;
use crate::progress::ProgressRenderer;

#[derive(Args)]
pub struct FetchArgs {
    /// Image string (e.g., "alpine:3.19", "docker:nginx", "oci-dir:./layout")
    pub image: String,

    /// Skip detection and fetch from this source
    /// (docker, docker-archive, oci-dir, oci-archive, registry)
    #[arg(long)]
    pub from: Option<Source>,

    /// Suppress progress output and print only the image id
    #[arg(short, long)]
    pub quiet: bool,

    /// Print image metadata as JSON
    #[arg(long)]
    pub json: bool,

    /// Keep the fetched content on disk instead of cleaning it up
    #[arg(long)]
    pub keep: bool,
}

pub async fn execute(args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = FetchConfig::from_env();
    let events = EventEmitter::new(64);
    let fetcher = ImageFetcher::new(config, events.clone())?;

    let renderer = (!args.quiet).then(|| ProgressRenderer::spawn(events.subscribe()));

    let result = match args.from {
        Some(source) => {
            let location = if source.is_path_based() {
                expand_home(&args.image)?
            } else {
                args.image.clone()
            };
            fetcher.get_image_from_source(&location, source).await
        }
        None => fetcher.get_image(&args.image).await,
    };

    if let Some(renderer) = renderer {
        renderer.finish().await;
    }

    let fetched = match result {
        Ok(fetched) => fetched,
        Err(e) => {
            if let Err(cleanup) = fetcher.cleanup() {
                tracing::warn!(error = %cleanup, "Failed to clean up temp dirs");
            }
            return Err(e.into());
        }
    };
    let image = fetched.image();

    if args.json {
        println!("{}", serde_json::to_string_pretty(image)?);
    } else if args.quiet {
        println!("{}", image.metadata.id);
    } else {
        let mut table = output::new_table(&["SOURCE", "ID", "TAGS", "LAYERS", "SIZE", "PATH"]);
        table.add_row(vec![
            image.source.name().to_string(),
            output::short_id(&image.metadata.id).to_string(),
            image.metadata.tags.join(","),
            image.metadata.layers.len().to_string(),
            output::format_bytes(image.metadata.size),
            image.content_path.display().to_string(),
        ]);
        println!("{table}");
    }

    if args.keep {
        eprintln!("Content kept at {}", image.content_path.display());
    } else {
        fetcher.cleanup()?;
    }
    Ok(())
}
