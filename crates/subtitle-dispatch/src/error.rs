//! Dispatch error types.

use thiserror::Error;

/// Errors raised while queueing records.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Shared memory for a display payload could not be allocated
    #[error("Display buffer allocation failed: {0}")]
    Stream(#[from] subtitle_stream::StreamError),

    /// Dispatch thread could not be started
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue already shut down
    #[error("Dispatch queue has been shut down")]
    Shutdown,
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Outcome of a failed call into a remote client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// The client process is gone; its slot should be released
    #[error("Remote client is dead")]
    Dead,

    /// The call failed but the client may still be alive
    #[error("Remote call failed: {0}")]
    Failed(String),
}
