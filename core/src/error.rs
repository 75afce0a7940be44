use thiserror::Error;

/// imgsrc error types
#[derive(Error, Debug)]
pub enum ImageError {
    /// Home directory shorthand could not be expanded
    #[error("unable to expand potential home dir expression '{path}': {message}")]
    Expansion { path: String, message: String },

    /// Reference failed even weak validation
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// Archive could not be opened, seeked or read
    #[error("archive error: {path} - {message}")]
    Archive { path: String, message: String },

    /// Daemon has no matching image
    #[error("image not found: {0}")]
    NotFound(String),

    /// Daemon could not be reached
    #[error("docker daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// Daemon API call failed
    #[error("docker {operation} failed for '{reference}': {message}")]
    Daemon {
        operation: String,
        reference: String,
        message: String,
    },

    /// Image pull failed
    #[error("pull failed for '{reference}': {message}")]
    Pull { reference: String, message: String },

    /// Pull status stream could not be decoded
    #[error("failed to decode pull status: {0}")]
    Decode(String),

    /// Save stream produced no bytes
    #[error("cannot provide an empty image: {0}")]
    EmptyImage(String),

    /// Temp directory allocation failed
    #[error("temp dir error: {path} - {message}")]
    TempDir { path: String, message: String },

    /// Container registry error
    #[error("registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// OCI layout error
    #[error("OCI layout error: {0}")]
    OciLayout(String),

    /// No provider exists for the resolved source
    #[error("unable to determine image source: {0}")]
    UnknownSource(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ImageError {
    /// Whether the daemon reported that the image does not exist locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ImageError::NotFound(_))
    }
}

impl From<serde_json::Error> for ImageError {
    fn from(err: serde_json::Error) -> Self {
        ImageError::Serialization(err.to_string())
    }
}

/// Result type alias for imgsrc operations
pub type Result<T> = std::result::Result<T, ImageError>;
