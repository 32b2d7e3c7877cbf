//! Error types for the capture and gallery subsystems.

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No front-facing camera on this device
    #[error("no front-facing camera available")]
    NoFrontCamera,

    /// Camera device could not be opened (or disconnected while opening)
    #[error("camera open failed: {0}")]
    DeviceOpen(String),

    /// Capture session / image stream configuration failed
    #[error("capture session configuration failed: {0}")]
    SessionConfig(String),

    /// The gateway reported the still capture as failed
    #[error("still capture failed: {0}")]
    CaptureFailed(String),

    /// The capture request completed but no image was delivered in time
    #[error("no image delivered within {0:?}")]
    CaptureTimedOut(Duration),

    /// Reserve/write/finalize against the photo store failed
    #[error("save failed: {0}")]
    Save(String),

    /// Photo store error (missing entry, lock failure, ...)
    #[error("store error: {0}")]
    Store(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Image decode/probe error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
