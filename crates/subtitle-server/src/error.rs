//! Error types for the subtitle server.

use thiserror::Error;

/// Subtitle server error type.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No session with this id
    #[error("Session {0} not found")]
    NotFound(u32),

    /// The session has no running service to close
    #[error("Session {0} is already closed")]
    AlreadyClosed(u32),

    /// The session has no running service
    #[error("Session {0} is not open")]
    NotOpen(u32),

    /// FMQ open requested before a writing queue was prepared
    #[error("Session {0} has no prepared writing queue")]
    QueueNotPrepared(u32),

    /// File source requested without a file
    #[error("Session {0} needs a file for the file data source")]
    MissingFile(u32),

    /// Socket or FMQ transport error
    #[error("Transport error: {0}")]
    Transport(#[from] subtitle_transport::TransportError),

    /// Dispatch queue error
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] subtitle_dispatch::DispatchError),

    /// Shared memory error
    #[error("Stream error: {0}")]
    Stream(#[from] subtitle_stream::StreamError),

    /// IO error (file source, helper threads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for subtitle server operations.
pub type ServerResult<T> = Result<T, ServerError>;
