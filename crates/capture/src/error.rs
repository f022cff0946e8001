//! Capture error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No displays found")]
    NoDisplays,

    #[error("Display query failed: {0}")]
    Display(String),

    #[error("Low-level pixel grab unavailable: {0}")]
    GrabUnavailable(String),

    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("Failed to spawn encoder process '{program}': {source}")]
    EncoderSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder stream ended")]
    StreamEnded,

    #[error("Loopback channel error: {0}")]
    Channel(#[from] loopback_channel::ChannelError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Capture session disposed")]
    Disposed,

    #[error("Grabber thread error: {0}")]
    Thread(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
