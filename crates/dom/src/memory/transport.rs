use async_trait::async_trait;
use pipsync_core::{InfoState, NodeRef, PlaybackStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::document::Document;
use crate::error::PlatformError;
use crate::transport::{MessageKind, MessageTransport, PageProbe};

/// Canned responses per message kind. Kinds without an entry behave like a
/// context with no responder.
#[derive(Default)]
pub struct MemoryTransport {
    responses: Mutex<HashMap<MessageKind, Result<Value, PlatformError>>>,
    log: Mutex<Vec<MessageKind>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, kind: MessageKind, value: Value) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Ok(value));
    }

    pub fn fail(&self, kind: MessageKind, error: PlatformError) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Err(error));
    }

    pub fn sent(&self) -> Vec<MessageKind> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn request(&self, kind: MessageKind) -> Result<Option<Value>, PlatformError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(kind);
        let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match responses.get(&kind) {
            Some(Ok(v)) => Ok(Some(v.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }
}

/// Reads status from the video's `data-status` attribute and page info from
/// a settable value.
#[derive(Default)]
pub struct MemoryProbe {
    info: Mutex<Option<InfoState>>,
    thumbnail_endpoint: Mutex<Option<String>>,
}

impl MemoryProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_info(&self, info: Option<InfoState>) {
        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = info;
    }

    /// Base URL for thumbnail lookups; the page URL is appended as `?page=`.
    pub fn set_thumbnail_endpoint(&self, endpoint: Option<String>) {
        *self
            .thumbnail_endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = endpoint;
    }
}

pub fn parse_status(raw: &str) -> PlaybackStatus {
    match raw {
        "loading" => PlaybackStatus::Loading,
        "playing" => PlaybackStatus::Playing,
        "paused" => PlaybackStatus::Paused,
        "ad" | "advertisement" => PlaybackStatus::Advertisement,
        "ended" => PlaybackStatus::Ended,
        "error" => PlaybackStatus::Error,
        _ => PlaybackStatus::Idle,
    }
}

impl PageProbe for MemoryProbe {
    fn classify_status(&self, doc: &dyn Document, video: Option<&NodeRef>) -> PlaybackStatus {
        video
            .and_then(|v| doc.attribute(v, "data-status"))
            .map(|s| parse_status(&s))
            .unwrap_or_default()
    }

    fn video_info(&self, _doc: &dyn Document) -> Option<InfoState> {
        self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn thumbnail_lookup_url(&self, page_url: &str) -> Option<String> {
        self.thumbnail_endpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|base| format!("{}?page={}", base, page_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDocument, Region};

    #[tokio::test]
    async fn test_no_responder_is_none() {
        let transport = MemoryTransport::new();
        let reply = transport.request(MessageKind::AdSkipAvailable).await.unwrap();
        assert!(reply.is_none());
        transport.respond(MessageKind::AdSkipAvailable, Value::Bool(true));
        let reply = transport.request(MessageKind::AdSkipAvailable).await.unwrap();
        assert_eq!(reply, Some(Value::Bool(true)));
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn test_probe_reads_status_attribute() {
        let doc = MemoryDocument::new("https://example.com/");
        let video = doc.insert("video", &[], Region::Body);
        let probe = MemoryProbe::new();
        assert_eq!(
            probe.classify_status(doc.as_ref(), Some(&video)),
            PlaybackStatus::Idle
        );
        doc.set_attribute(&video, "data-status", "ad");
        assert_eq!(
            probe.classify_status(doc.as_ref(), Some(&video)),
            PlaybackStatus::Advertisement
        );
    }
}
