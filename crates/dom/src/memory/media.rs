use async_trait::async_trait;
use pipsync_core::NodeRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::document::{MemoryDocument, Region};
use crate::document::{Document, DomEvent, EventTarget};
use crate::error::PlatformError;
use crate::media::{
    MediaPlatform, StreamPipeline, ENTER_PIP_EVENT, FULLSCREEN_CHANGE_EVENT, LEAVE_PIP_EVENT,
};

#[derive(Default)]
struct MediaState {
    pip: Option<NodeRef>,
    fullscreen: Option<NodeRef>,
    requests: Vec<NodeRef>,
    exits: usize,
    fullscreen_exits: usize,
    reject_requests: Option<PlatformError>,
    metadata: HashMap<u64, bool>,
    times: HashMap<u64, (f64, f64)>,
}

/// Presentation platform over a [`MemoryDocument`]. Transitions dispatch the
/// same document events a browser would.
pub struct MemoryMedia {
    doc: Arc<MemoryDocument>,
    surface: NodeRef,
    state: Mutex<MediaState>,
}

impl MemoryMedia {
    pub fn new(doc: Arc<MemoryDocument>) -> Arc<Self> {
        let surface = doc.insert("video", &["#pipsync-surface"], Region::Body);
        Arc::new(Self {
            doc,
            surface,
            state: Mutex::new(MediaState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MediaState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Nodes passed to `request_picture_in_picture`, in order.
    pub fn requests(&self) -> Vec<NodeRef> {
        self.lock().requests.clone()
    }

    pub fn exit_calls(&self) -> usize {
        self.lock().exits
    }

    pub fn fullscreen_exit_calls(&self) -> usize {
        self.lock().fullscreen_exits
    }

    /// Make every following request fail with `error` (`None` to accept again).
    pub fn reject_requests(&self, error: Option<PlatformError>) {
        self.lock().reject_requests = error;
    }

    pub fn set_metadata_loaded(&self, video: &NodeRef, loaded: bool) {
        self.lock().metadata.insert(video.id, loaded);
        if loaded {
            self.doc
                .dispatch_event(DomEvent::new("loadedmetadata", EventTarget::Node(video.clone())));
        }
    }

    /// Advance playback and fire `timeupdate` on the video.
    pub fn set_time(&self, video: &NodeRef, current: f64, duration: f64) {
        self.lock().times.insert(video.id, (current, duration));
        self.doc
            .dispatch_event(DomEvent::new("timeupdate", EventTarget::Node(video.clone())));
    }

    /// The host page putting one of its own elements into picture-in-picture.
    pub fn host_enter_pip(&self, node: &NodeRef) {
        self.switch_pip(node.clone());
    }

    pub fn enter_fullscreen(&self, node: &NodeRef) {
        self.lock().fullscreen = Some(node.clone());
        self.doc.dispatch_event(
            DomEvent::new(FULLSCREEN_CHANGE_EVENT, EventTarget::Document)
                .with_related(Some(node.clone())),
        );
    }

    fn switch_pip(&self, node: NodeRef) {
        let previous = self.lock().pip.replace(node.clone());
        if let Some(prev) = previous.as_ref().filter(|p| **p != node) {
            self.doc.dispatch_event(
                DomEvent::new(LEAVE_PIP_EVENT, EventTarget::Document)
                    .with_related(Some(prev.clone())),
            );
        }
        if previous.as_ref() != Some(&node) {
            self.doc.dispatch_event(
                DomEvent::new(ENTER_PIP_EVENT, EventTarget::Document).with_related(Some(node)),
            );
        }
    }
}

#[async_trait]
impl MediaPlatform for MemoryMedia {
    fn managed_surface(&self) -> NodeRef {
        self.surface.clone()
    }

    fn picture_in_picture_element(&self) -> Option<NodeRef> {
        self.lock().pip.clone()
    }

    fn fullscreen_element(&self) -> Option<NodeRef> {
        self.lock().fullscreen.clone()
    }

    fn has_metadata(&self, video: &NodeRef) -> bool {
        self.lock().metadata.get(&video.id).copied().unwrap_or(false)
    }

    fn playback_time(&self, video: &NodeRef) -> (f64, f64) {
        self.lock().times.get(&video.id).copied().unwrap_or((0.0, 0.0))
    }

    async fn request_picture_in_picture(&self, node: &NodeRef) -> Result<(), PlatformError> {
        {
            let mut state = self.lock();
            state.requests.push(node.clone());
            if let Some(err) = state.reject_requests.clone() {
                return Err(err);
            }
        }
        if !self.doc.is_connected(node) {
            return Err(PlatformError::InvalidState(format!(
                "node {} is not attached",
                node.id
            )));
        }
        self.switch_pip(node.clone());
        Ok(())
    }

    async fn exit_picture_in_picture(&self) -> Result<(), PlatformError> {
        let previous = {
            let mut state = self.lock();
            state.exits += 1;
            state.pip.take()
        };
        match previous {
            Some(prev) => {
                self.doc.dispatch_event(
                    DomEvent::new(LEAVE_PIP_EVENT, EventTarget::Document).with_related(Some(prev)),
                );
                Ok(())
            }
            None => Err(PlatformError::InvalidState(
                "no element is in picture-in-picture".into(),
            )),
        }
    }

    async fn exit_fullscreen(&self) -> Result<(), PlatformError> {
        let previous = {
            let mut state = self.lock();
            state.fullscreen_exits += 1;
            state.fullscreen.take()
        };
        match previous {
            Some(_) => {
                self.doc.dispatch_event(DomEvent::new(
                    FULLSCREEN_CHANGE_EVENT,
                    EventTarget::Document,
                ));
                Ok(())
            }
            None => Err(PlatformError::InvalidState("not in fullscreen".into())),
        }
    }
}

/// Counts pipeline transitions.
#[derive(Default)]
pub struct MemoryPipeline {
    running: AtomicBool,
    resumes: AtomicUsize,
    pauses: AtomicUsize,
    restarts: AtomicUsize,
    source: Mutex<(Option<NodeRef>, Option<NodeRef>)>,
}

impl MemoryPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> (Option<NodeRef>, Option<NodeRef>) {
        self.source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StreamPipeline for MemoryPipeline {
    fn attach_source(&self, video: Option<&NodeRef>, comments: Option<&NodeRef>) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) =
            (video.cloned(), comments.cloned());
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
