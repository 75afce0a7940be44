//! imgsrc CLI - detect and fetch container images from any source.

pub mod commands;
pub mod output;
pub mod progress;
