use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `start()` reached a module whose `init()` never completed.
    #[error("Module '{module}' started before init completed")]
    NotInitialized { module: String },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Platform rejected request: {0}")]
    Platform(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Programming-invariant violations, as opposed to environmental failures.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::NotInitialized { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
