pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod state;
pub mod types;

pub use config::{CachePolicy, Config, HttpPolicy, PipConfig, RetryPolicy, UrlWatchConfig};
pub use error::{Error, Result};
pub use events::{AppEvent, EventKey, EventPayload};
pub use state::{AppStateStore, AppStateWriters, SliceReader, SliceWriter};
pub use types::{
    ElementRole, ElementsSnapshot, ElementsState, InfoState, NodeRef, PageState, PipReason,
    PipState, PlaybackStatus, StatusState, TimeState,
};
