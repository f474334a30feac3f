//! Transport error types.

use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error (socket, thread spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer or framing setup error
    #[error("Stream error: {0}")]
    Stream(#[from] subtitle_stream::StreamError),

    /// Could not bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Transport already shut down
    #[error("Transport has been shut down")]
    Shutdown,
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
