//! Interfaces to the host page: document, presentation platform, stream
//! pipeline, cross-context messaging and site probes.

pub mod document;
pub mod error;
pub mod media;
pub mod memory;
pub mod transport;

pub use document::{
    Document, DomEvent, EventTarget, HistoryHook, HistoryMethod, Listener, ListenerId,
    MutationCallback, MutationOptions, MutationRecord, ObserveTarget, ObserverId,
};
pub use error::PlatformError;
pub use media::{MediaPlatform, StreamPipeline};
pub use transport::{MessageKind, MessageTransport, PageProbe};
