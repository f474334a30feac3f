//! Error types for subtitle-stream.

use thiserror::Error;

/// Errors that can occur while buffering, framing or sharing payload bytes.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Ring buffer created with a capacity it cannot hold
    #[error("invalid ring buffer capacity: {0}")]
    InvalidCapacity(usize),

    /// Failed to create or open shared memory
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Failed to map shared memory into address space
    #[error("memory mapping error: {0}")]
    Mmap(String),

    /// Invalid shared memory header (wrong magic or version)
    #[error("invalid queue header: {0}")]
    InvalidHeader(String),

    /// Too few bytes to decode a frame header
    #[error("truncated frame header: {got} bytes, need {need}")]
    TruncatedHeader { got: usize, need: usize },

    /// Payload too large for the destination buffer
    #[error("payload too large: {size} bytes, max {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Queue has been shut down by its owner
    #[error("queue has been shut down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform-specific error
    #[error("platform error: {0}")]
    Platform(String),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
