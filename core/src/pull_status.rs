//! Progress record for an in-flight docker pull.
//!
//! The record has exactly one writer (the stream decoder) and any number of
//! readers (event subscribers). It is shared through a `tokio::sync::watch`
//! channel so readers always observe the most recent write.

use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::progress::Progress;

/// Per-layer phase as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerPhase {
    Waiting,
    PullingFsLayer,
    Downloading,
    VerifyingChecksum,
    DownloadComplete,
    Extracting,
    PullComplete,
    AlreadyExists,
}

impl LayerPhase {
    /// Map a daemon status line onto a phase.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "Waiting" => Some(Self::Waiting),
            "Pulling fs layer" => Some(Self::PullingFsLayer),
            "Downloading" => Some(Self::Downloading),
            "Verifying Checksum" => Some(Self::VerifyingChecksum),
            "Download complete" => Some(Self::DownloadComplete),
            "Extracting" => Some(Self::Extracting),
            "Pull complete" => Some(Self::PullComplete),
            "Already exists" => Some(Self::AlreadyExists),
            _ => None,
        }
    }

    /// Whether the layer needs no further work.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::PullComplete | Self::AlreadyExists)
    }
}

impl std::fmt::Display for LayerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::PullingFsLayer => "pulling fs layer",
            Self::Downloading => "downloading",
            Self::VerifyingChecksum => "verifying checksum",
            Self::DownloadComplete => "download complete",
            Self::Extracting => "extracting",
            Self::PullComplete => "pull complete",
            Self::AlreadyExists => "already exists",
        };
        write!(f, "{}", s)
    }
}

/// Byte counters attached to a pull event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

/// One decoded line of the daemon's pull stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "progressDetail")]
    pub progress_detail: ProgressDetail,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl PullEvent {
    /// Terminal summary lines (`Digest: ...`, `Status: ...`) carry no layer progress.
    pub fn is_summary(&self) -> bool {
        self.status.starts_with("Digest:") || self.status.starts_with("Status:")
    }
}

/// Snapshot of a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullStatus {
    /// Layer ids in the order the daemon first mentioned them.
    pub layers: Vec<String>,
    pub phases: HashMap<String, LayerPhase>,
    pub progress: HashMap<String, Progress>,
    pub complete: bool,
}

impl PullStatus {
    fn apply(&mut self, event: &PullEvent) {
        let Some(phase) = LayerPhase::from_status(&event.status) else {
            return;
        };
        if event.id.is_empty() {
            return;
        }
        if !self.phases.contains_key(&event.id) {
            self.layers.push(event.id.clone());
        }
        self.phases.insert(event.id.clone(), phase);

        match phase {
            LayerPhase::Downloading | LayerPhase::Extracting => {
                self.progress.insert(
                    event.id.clone(),
                    Progress {
                        current: event.progress_detail.current,
                        size: event.progress_detail.total,
                        completed: false,
                    },
                );
            }
            LayerPhase::PullComplete | LayerPhase::AlreadyExists => {
                let entry = self.progress.entry(event.id.clone()).or_default();
                entry.current = entry.size;
                entry.completed = true;
            }
            _ => {}
        }
    }

    /// Number of layers that need no further work.
    pub fn layers_done(&self) -> usize {
        self.phases.values().filter(|p| p.is_done()).count()
    }
}

/// Create a connected writer/reader pair.
pub fn channel() -> (PullStatusWriter, PullStatusReader) {
    let (tx, rx) = watch::channel(PullStatus::default());
    (PullStatusWriter { tx }, PullStatusReader { rx })
}

/// Sole writer of a pull status. Marks the status complete when dropped.
#[derive(Debug)]
pub struct PullStatusWriter {
    tx: watch::Sender<PullStatus>,
}

impl PullStatusWriter {
    pub fn on_event(&self, event: &PullEvent) {
        self.tx.send_modify(|status| status.apply(event));
    }

    pub fn reader(&self) -> PullStatusReader {
        PullStatusReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Drop for PullStatusWriter {
    fn drop(&mut self) {
        self.tx.send_modify(|status| status.complete = true);
    }
}

/// Read-only view of a pull status.
#[derive(Debug, Clone)]
pub struct PullStatusReader {
    rx: watch::Receiver<PullStatus>,
}

impl PullStatusReader {
    pub fn snapshot(&self) -> PullStatus {
        self.rx.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().complete
    }

    /// Wait for the next write. Returns false once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
