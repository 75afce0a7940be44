//! Provider - Trait for image acquisition strategies.

use async_trait::async_trait;
use imgsrc_core::error::Result;

use crate::image::Image;

/// One way of materializing an image on local disk.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Acquire the image this provider was created for.
    async fn provide(&self) -> Result<Image>;
}
