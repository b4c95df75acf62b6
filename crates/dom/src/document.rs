//! Host document abstraction.
//!
//! Everything the runtime needs from the page it lives in: selector queries,
//! listener and mutation-observer bookkeeping, the current location, and the
//! interception points for the two history-mutation entry points.

use pipsync_core::NodeRef;
use serde_json::Value;
use std::sync::Arc;

use crate::error::PlatformError;

pub type ListenerId = u64;
pub type ObserverId = u64;

/// Where a listener is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    Document,
    Node(NodeRef),
}

/// One dispatched host event.
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub name: String,
    pub target: EventTarget,
    /// Custom-event detail. `Null` for native events.
    pub detail: Value,
    /// Element the event is about, e.g. the picture-in-picture element for
    /// `enterpictureinpicture` or the fullscreen element for
    /// `fullscreenchange`.
    pub related: Option<NodeRef>,
}

impl DomEvent {
    pub fn new(name: impl Into<String>, target: EventTarget) -> Self {
        Self {
            name: name.into(),
            target,
            detail: Value::Null,
            related: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_related(mut self, related: Option<NodeRef>) -> Self {
        self.related = related;
        self
    }
}

pub type Listener = Arc<dyn Fn(&DomEvent) + Send + Sync>;

/// Subtree a mutation observer watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObserveTarget {
    Head,
    Body,
    Node(NodeRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attributes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: ObserveTarget,
    pub added: Vec<NodeRef>,
    pub removed: Vec<NodeRef>,
    pub attribute: Option<String>,
}

/// Receives one batch of mutation records per notification.
pub type MutationCallback = Arc<dyn Fn(&[MutationRecord]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryMethod {
    PushState,
    ReplaceState,
}

impl HistoryMethod {
    pub const ALL: [HistoryMethod; 2] = [HistoryMethod::PushState, HistoryMethod::ReplaceState];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryMethod::PushState => "pushState",
            HistoryMethod::ReplaceState => "replaceState",
        }
    }
}

/// Interceptor called after the host applied a history mutation. Receives
/// the URL argument passed to the history call.
pub type HistoryHook = Arc<dyn Fn(&str) + Send + Sync>;

pub trait Document: Send + Sync {
    /// First connected node matching `selector`, in document order.
    fn query_selector(&self, selector: &str) -> Option<NodeRef>;

    /// Whether the node is still attached to the document.
    fn is_connected(&self, node: &NodeRef) -> bool;

    fn attribute(&self, node: &NodeRef, name: &str) -> Option<String>;

    /// Current location href.
    fn location(&self) -> Result<String, PlatformError>;

    fn add_event_listener(&self, target: EventTarget, event: &str, listener: Listener)
        -> ListenerId;

    /// Returns `false` when the id was unknown.
    fn remove_event_listener(&self, id: ListenerId) -> bool;

    /// Synchronously deliver `event` to every listener registered for its
    /// target and name.
    fn dispatch_event(&self, event: DomEvent);

    fn observe(
        &self,
        target: ObserveTarget,
        options: MutationOptions,
        callback: MutationCallback,
    ) -> ObserverId;

    fn disconnect_observer(&self, id: ObserverId) -> bool;

    /// Install (or with `None`, remove) the interceptor for one history entry
    /// point. Returns the previously installed interceptor so callers can
    /// chain to it and put it back later.
    fn replace_history_hook(
        &self,
        method: HistoryMethod,
        hook: Option<HistoryHook>,
    ) -> Option<HistoryHook>;

    /// Insert a clickable control as the last child of `parent`. `None` when
    /// the parent is gone.
    fn mount_control(&self, parent: &NodeRef, label: &str, on_click: Listener) -> Option<NodeRef>;

    /// Remove a node previously mounted by [`Document::mount_control`], along
    /// with any listeners targeting it.
    fn unmount(&self, node: &NodeRef) -> bool;

    /// Live listener registrations, for leak diagnostics.
    fn listener_count(&self) -> usize;

    /// Live mutation observers, for leak diagnostics.
    fn observer_count(&self) -> usize;
}
