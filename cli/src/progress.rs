//! Terminal rendering of acquisition events.
//!
//! Pull and save events carry live handles; the renderer polls them on a
//! fixed tick and mirrors them into indicatif bars until told to stop.

use std::time::Duration;

use imgsrc_core::event::{EventPayload, ImageEvent};
use imgsrc_core::progress::StagedProgress;
use imgsrc_core::pull_status::PullStatusReader;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(100);

/// Bar length used for fractional progress.
const FRACTION_SCALE: u64 = 1000;

/// Background task drawing progress bars.
pub struct ProgressRenderer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressRenderer {
    pub fn spawn(events: broadcast::Receiver<ImageEvent>) -> Self {
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(run(events, stopped));
        Self { stop, handle }
    }

    /// Draw the final state of every bar and stop.
    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            tracing::debug!(error = %e, "Progress renderer ended abnormally");
        }
    }
}

enum Tracked {
    Save(ProgressBar, StagedProgress),
    Pull(ProgressBar, PullStatusReader),
}

impl Tracked {
    fn update(&self) {
        match self {
            Tracked::Save(bar, progress) => {
                bar.set_position((progress.fraction() * FRACTION_SCALE as f64) as u64);
                bar.set_message(progress.stage());
                if progress.is_completed() && !bar.is_finished() {
                    bar.finish_with_message("saved");
                }
            }
            Tracked::Pull(bar, status) => {
                let snapshot = status.snapshot();
                bar.set_length(snapshot.layers.len() as u64);
                bar.set_position(snapshot.layers_done() as u64);
                if snapshot.complete && !bar.is_finished() {
                    bar.finish_with_message("pulled");
                }
            }
        }
    }

    fn abandon(&self) {
        let bar = match self {
            Tracked::Save(bar, _) | Tracked::Pull(bar, _) => bar,
        };
        if !bar.is_finished() {
            bar.abandon();
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

fn track(multi: &MultiProgress, event: ImageEvent) -> Option<Tracked> {
    match event.payload {
        EventPayload::Progress(progress) => {
            let bar = multi.add(ProgressBar::new(FRACTION_SCALE));
            bar.set_style(style("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}"));
            bar.set_prefix(format!("Fetching {}", event.source));
            Some(Tracked::Save(bar, progress))
        }
        EventPayload::PullStatus(status) => {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(style("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} layers {msg}"));
            bar.set_prefix(format!("Pulling {}", event.source));
            Some(Tracked::Pull(bar, status))
        }
        EventPayload::Empty | EventPayload::String(_) => None,
    }
}

async fn run(mut events: broadcast::Receiver<ImageEvent>, mut stopped: oneshot::Receiver<()>) {
    let multi = MultiProgress::new();
    let mut tracked: Vec<Tracked> = Vec::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => tracked.extend(track(&multi, event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress renderer lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tick.tick() => tracked.iter().for_each(Tracked::update),
            _ = &mut stopped => break,
        }
    }

    for item in &tracked {
        item.update();
        // whatever did not complete failed
        item.abandon();
    }
}
