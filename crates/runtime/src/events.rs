//! Document-level event bus for the internal event catalogue.
//!
//! Events are dispatched as custom events on the host document under
//! `"{prefix}:{key}"`, where the prefix is unique per runtime instance so two
//! instances on one page never hear each other. Every subscription lives under
//! a logical key and re-subscribing under the same key replaces the old one.

use pipsync_core::{AppEvent, EventKey, EventPayload};
use pipsync_dom::{Document, DomEvent, EventTarget, Listener};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::{KeyedRegistry, Subscription};

#[derive(Clone)]
pub struct EventRegistry {
    doc: Arc<dyn Document>,
    prefix: Arc<str>,
    slots: Arc<KeyedRegistry>,
}

impl EventRegistry {
    pub fn new(doc: Arc<dyn Document>) -> Self {
        let prefix = format!("pipsync-{}", Uuid::new_v4().simple());
        Self::with_prefix(doc, &prefix)
    }

    pub fn with_prefix(doc: Arc<dyn Document>, prefix: &str) -> Self {
        Self {
            doc,
            prefix: Arc::from(prefix),
            slots: KeyedRegistry::new("events"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name the event is dispatched under on the host document.
    pub fn event_name(&self, key: EventKey) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Subscribe to one event type under a logical registration key.
    pub fn on<P: EventPayload>(
        &self,
        key: &str,
        handler: impl Fn(&P) + Send + Sync + 'static,
    ) -> Subscription {
        let name = self.event_name(P::KEY);
        let listener_name = name.clone();
        let listener: Listener = Arc::new(move |event: &DomEvent| {
            match serde_json::from_value::<P>(event.detail.clone()) {
                Ok(payload) => handler(&payload),
                Err(e) => {
                    warn!(event = %listener_name, error = %e, "Dropping event with malformed detail")
                }
            }
        });
        self.listen(key, EventTarget::Document, &name, listener)
    }

    /// Subscribe to every event in the catalogue with one handler.
    pub fn on_any(
        &self,
        key: &str,
        handler: impl Fn(AppEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let handler = Arc::new(handler);
        let doc = self.doc.clone();
        let names: Vec<(EventKey, String)> = EventKey::ALL
            .iter()
            .map(|k| (*k, self.event_name(*k)))
            .collect();
        self.slots.install(key, move || {
            let ids: Vec<_> = names
                .into_iter()
                .map(|(event_key, name)| {
                    let handler = handler.clone();
                    let listener: Listener = Arc::new(move |event: &DomEvent| {
                        match AppEvent::from_detail(event_key, event.detail.clone()) {
                            Ok(app_event) => handler(app_event),
                            Err(e) => {
                                warn!(event = %event_key, error = %e, "Dropping event with malformed detail")
                            }
                        }
                    });
                    doc.add_event_listener(EventTarget::Document, &name, listener)
                })
                .collect();
            Box::new(move || {
                for id in ids {
                    doc.remove_event_listener(id);
                }
            })
        })
    }

    /// Keyed registration for a native host event such as `play` on a video
    /// node or `enterpictureinpicture` on the document.
    pub fn listen(
        &self,
        key: &str,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> Subscription {
        let doc = self.doc.clone();
        let event = event.to_string();
        self.slots.install(key, move || {
            let id = doc.add_event_listener(target, &event, listener);
            Box::new(move || {
                doc.remove_event_listener(id);
            })
        })
    }

    /// Synchronously deliver an event to every current subscriber.
    pub fn emit(&self, event: impl Into<AppEvent>) {
        let event = event.into();
        let key = event.key();
        let detail = match event.detail() {
            Ok(detail) => detail,
            Err(e) => {
                warn!(event = %key, error = %e, "Failed to encode event detail");
                return;
            }
        };
        debug!(event = %key, "Emitting event");
        self.doc
            .dispatch_event(DomEvent::new(self.event_name(key), EventTarget::Document).with_detail(detail));
    }

    /// Remove the registration under `key`. `false` when there was none.
    pub fn off(&self, key: &str) -> bool {
        self.slots.remove(key)
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains(key)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("prefix", &self.prefix)
            .field("size", &self.size())
            .finish()
    }
}
