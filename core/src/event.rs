use std::sync::Arc;
use tokio::sync::broadcast;

use crate::progress::StagedProgress;
use crate::pull_status::PullStatusReader;

/// Event key type
pub type EventKey = &'static str;

/// Event payload. Progress payloads are live handles that keep updating
/// after the event has been delivered.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Empty,
    String(String),
    PullStatus(PullStatusReader),
    Progress(StagedProgress),
}

/// Image acquisition event
#[derive(Debug, Clone)]
pub struct ImageEvent {
    /// Event key (e.g., "fetch.image", "pull.docker.image")
    pub key: EventKey,

    /// Image reference or path the event is about
    pub source: String,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ImageEvent {
    /// Create a new event
    pub fn new(key: EventKey, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key,
            source: source.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: EventKey, source: impl Into<String>) -> Self {
        Self::new(key, source, EventPayload::Empty)
    }
}

/// Event emitter. A disabled emitter drops every event.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Option<Arc<broadcast::Sender<ImageEvent>>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Some(Arc::new(sender)),
        }
    }

    /// Emitter that publishes nowhere
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Emit an event. Never fails, even without subscribers.
    pub fn emit(&self, event: ImageEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events. A disabled emitter yields a closed receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        match &self.sender {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Event catalog - predefined event keys
pub mod events {
    /// A docker pull started; payload is a `PullStatus` reader.
    pub const PULL_DOCKER_IMAGE: &str = "pull.docker.image";
    /// An image save/copy started; payload is a `Progress` handle.
    pub const FETCH_IMAGE: &str = "fetch.image";
    /// An image was materialized and handed to its provider.
    pub const IMAGE_READY: &str = "image.ready";
}
