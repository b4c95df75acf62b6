use thiserror::Error;

/// Rejections raised by the host platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform refused the call, e.g. a user-gesture requirement.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// The call made no sense in the current state, e.g. exiting when
    /// nothing is in picture-in-picture or the element is detached.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("malformed location: {0}")]
    MalformedLocation(String),

    #[error("transport disconnected: {0}")]
    Disconnected(String),
}

impl From<PlatformError> for pipsync_core::Error {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::MalformedLocation(msg) => pipsync_core::Error::Navigation(msg),
            PlatformError::Disconnected(msg) => pipsync_core::Error::Transport(msg),
            other => pipsync_core::Error::Platform(other.to_string()),
        }
    }
}
