use thiserror::Error;

/// Terminal outcome of one logical request, after retries.
///
/// Cloneable because de-duplicated callers share a single result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<HttpError> for pipsync_core::Error {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout { after_ms } => {
                pipsync_core::Error::Timeout(format!("http request after {}ms", after_ms))
            }
            other => pipsync_core::Error::Transport(other.to_string()),
        }
    }
}
