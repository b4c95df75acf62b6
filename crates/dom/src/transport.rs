use async_trait::async_trait;
use pipsync_core::{InfoState, NodeRef, PlaybackStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::PlatformError;

/// Request kinds understood by the cross-context message transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    AdSkipAvailable,
    InvokeAdSkip,
}

impl MessageKind {
    pub fn message_type(&self) -> &'static str {
        match self {
            MessageKind::AdSkipAvailable => "pipsync:ad-skip:available",
            MessageKind::InvokeAdSkip => "pipsync:ad-skip:invoke",
        }
    }
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// `Ok(None)` means nobody answered; callers treat that as "not
    /// applicable".
    async fn request(&self, kind: MessageKind) -> Result<Option<Value>, PlatformError>;
}

/// Site-specific content reading.
pub trait PageProbe: Send + Sync {
    fn classify_status(&self, doc: &dyn Document, video: Option<&NodeRef>) -> PlaybackStatus;

    fn video_info(&self, doc: &dyn Document) -> Option<InfoState>;

    /// Endpoint returning `{ "thumbnail": "<url>" }` for the given page.
    fn thumbnail_lookup_url(&self, page_url: &str) -> Option<String>;
}
