//! Loopback channel error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Bind error: {0}")]
    Bind(std::io::Error),

    #[error("Failed to spawn reader thread: {0}")]
    Spawn(std::io::Error),

    #[error("Reader already started")]
    AlreadyStarted,

    #[error("Reader disposed")]
    Disposed,

    #[error("Reader thread exited before signalling readiness")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
