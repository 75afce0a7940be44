//! imgsrc Core - Foundational Types and Abstractions
//!
//! This crate provides the error taxonomy, configuration, event emitter and
//! progress primitives shared by the image acquisition runtime and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod progress;
pub mod pull_status;

// Re-export commonly used types
pub use config::{FetchConfig, LogLevel, RegistryCredentials, RegistryOptions};
pub use error::{ImageError, Result};
pub use event::{EventEmitter, EventPayload, ImageEvent};
pub use progress::{Aggregator, ByteCounter, Progress, Progressable, Stage, StagedProgress, TimedProgress};
pub use pull_status::{LayerPhase, PullEvent, PullStatus, PullStatusReader, PullStatusWriter};

/// imgsrc version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
