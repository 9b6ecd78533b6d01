use thiserror::Error;

/// Failures of the remote tier. Absorbed by `CacheFacade`, never returned to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote cache unavailable")]
    Unavailable,
    #[error("remote cache timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("remote cache command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for RemoteError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            RemoteError::Unavailable
        } else {
            RemoteError::Command(err.to_string())
        }
    }
}
