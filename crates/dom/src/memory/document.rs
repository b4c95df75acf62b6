//! Deterministic in-process document.
//!
//! Nodes carry the list of selectors they match instead of a real CSS engine.
//! Listener and observer callbacks always run after the internal lock is
//! released, so they may call back into the document.

use pipsync_core::NodeRef;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::document::{
    Document, DomEvent, EventTarget, HistoryHook, HistoryMethod, Listener, ListenerId,
    MutationCallback, MutationOptions, MutationRecord, ObserveTarget, ObserverId,
};
use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Head,
    Body,
}

struct MemNode {
    tag: String,
    selectors: Vec<String>,
    attrs: HashMap<String, String>,
    region: Region,
    parent: Option<u64>,
    connected: bool,
}

struct Inner {
    next_node: u64,
    next_listener: ListenerId,
    next_observer: ObserverId,
    nodes: BTreeMap<u64, MemNode>,
    location: Result<String, String>,
    listeners: BTreeMap<ListenerId, (EventTarget, String, Listener)>,
    observers: BTreeMap<ObserverId, (ObserveTarget, MutationOptions, MutationCallback)>,
    hooks: HashMap<HistoryMethod, HistoryHook>,
    queries: Vec<String>,
}

pub struct MemoryDocument {
    inner: Mutex<Inner>,
}

impl MemoryDocument {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                next_node: 1,
                next_listener: 1,
                next_observer: 1,
                nodes: BTreeMap::new(),
                location: Ok(url.to_string()),
                listeners: BTreeMap::new(),
                observers: BTreeMap::new(),
                hooks: HashMap::new(),
                queries: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a node to the head or body.
    pub fn insert(&self, tag: &str, selectors: &[&str], region: Region) -> NodeRef {
        let (node, callbacks, record) = {
            let mut inner = self.lock();
            let node = inner.create(tag, selectors, region, None);
            let record = MutationRecord {
                target: region_target(region),
                added: vec![node.clone()],
                removed: Vec::new(),
                attribute: None,
            };
            let callbacks = inner.matching_observers(region, None);
            (node, callbacks, record)
        };
        notify(callbacks, vec![record]);
        node
    }

    /// Append a node under an existing parent.
    pub fn insert_child(&self, parent: &NodeRef, tag: &str, selectors: &[&str]) -> Option<NodeRef> {
        let (node, callbacks, record) = {
            let mut inner = self.lock();
            let region = inner.nodes.get(&parent.id).filter(|n| n.connected)?.region;
            let node = inner.create(tag, selectors, region, Some(parent.id));
            let record = MutationRecord {
                target: ObserveTarget::Node(parent.clone()),
                added: vec![node.clone()],
                removed: Vec::new(),
                attribute: None,
            };
            let callbacks = inner.matching_observers(region, Some(parent.id));
            (node, callbacks, record)
        };
        notify(callbacks, vec![record]);
        Some(node)
    }

    /// Detach a node and its descendants.
    pub fn remove(&self, node: &NodeRef) -> bool {
        let (callbacks, record) = {
            let mut inner = self.lock();
            let Some((region, parent)) = inner.detach(node.id) else {
                return false;
            };
            let record = MutationRecord {
                target: region_target(region),
                added: Vec::new(),
                removed: vec![node.clone()],
                attribute: None,
            };
            (inner.matching_observers(region, parent), record)
        };
        notify(callbacks, vec![record]);
        true
    }

    /// Swap a node for a fresh one in a single mutation batch, the way a
    /// site's player re-renders itself.
    pub fn replace(&self, old: &NodeRef, tag: &str, selectors: &[&str]) -> Option<NodeRef> {
        let (node, callbacks, record) = {
            let mut inner = self.lock();
            let (region, parent) = inner.detach(old.id)?;
            let node = inner.create(tag, selectors, region, parent);
            let record = MutationRecord {
                target: region_target(region),
                added: vec![node.clone()],
                removed: vec![old.clone()],
                attribute: None,
            };
            (node, inner.matching_observers(region, parent), record)
        };
        notify(callbacks, vec![record]);
        Some(node)
    }

    pub fn set_attribute(&self, node: &NodeRef, name: &str, value: &str) {
        let mut inner = self.lock();
        if let Some(n) = inner.nodes.get_mut(&node.id) {
            n.attrs.insert(name.to_string(), value.to_string());
        }
    }

    /// `history.pushState` as the site would call it.
    pub fn push_state(&self, url: &str) {
        self.history_call(HistoryMethod::PushState, url);
    }

    /// `history.replaceState` as the site would call it.
    pub fn replace_state(&self, url: &str) {
        self.history_call(HistoryMethod::ReplaceState, url);
    }

    fn history_call(&self, method: HistoryMethod, url: &str) {
        let hook = {
            let mut inner = self.lock();
            inner.location = Ok(url.to_string());
            inner.hooks.get(&method).cloned()
        };
        if let Some(hook) = hook {
            hook(url);
        }
    }

    /// Back/forward navigation: location changes, then `popstate` fires.
    pub fn pop_state(&self, url: &str) {
        self.set_location(url);
        self.dispatch_event(DomEvent::new("popstate", EventTarget::Window));
    }

    /// Change the location without firing anything, like a router that
    /// neither uses the history API nor emits events.
    pub fn set_location(&self, url: &str) {
        self.lock().location = Ok(url.to_string());
    }

    /// Make subsequent `location()` calls fail.
    pub fn break_location(&self, reason: &str) {
        self.lock().location = Err(reason.to_string());
    }

    pub fn history_hook_installed(&self, method: HistoryMethod) -> bool {
        self.lock().hooks.contains_key(&method)
    }

    /// First connected node whose attribute `name` equals `value`.
    pub fn find_by_attribute(&self, name: &str, value: &str) -> Option<NodeRef> {
        self.lock()
            .nodes
            .iter()
            .find(|(_, n)| n.connected && n.attrs.get(name).map(String::as_str) == Some(value))
            .map(|(id, n)| NodeRef::new(*id, n.tag.clone()))
    }

    /// Every selector evaluated so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    pub fn clear_queries(&self) {
        self.lock().queries.clear();
    }
}

impl Inner {
    fn create(&mut self, tag: &str, selectors: &[&str], region: Region, parent: Option<u64>) -> NodeRef {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            MemNode {
                tag: tag.to_ascii_lowercase(),
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
                attrs: HashMap::new(),
                region,
                parent,
                connected: true,
            },
        );
        NodeRef::new(id, tag)
    }

    fn detach(&mut self, id: u64) -> Option<(Region, Option<u64>)> {
        let node = self.nodes.get_mut(&id).filter(|n| n.connected)?;
        node.connected = false;
        let result = (node.region, node.parent);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for (child_id, child) in self.nodes.iter_mut() {
                if child.parent == Some(current) && child.connected {
                    child.connected = false;
                    stack.push(*child_id);
                }
            }
        }
        Some(result)
    }

    fn ancestors(&self, start: Option<u64>) -> Vec<u64> {
        let mut chain = Vec::new();
        let mut current = start;
        while let Some(id) = current {
            chain.push(id);
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        chain
    }

    fn matching_observers(&self, region: Region, parent: Option<u64>) -> Vec<MutationCallback> {
        let chain = self.ancestors(parent);
        self.observers
            .values()
            .filter(|(target, options, _)| match target {
                ObserveTarget::Head => region == Region::Head,
                ObserveTarget::Body => region == Region::Body,
                ObserveTarget::Node(n) => {
                    if options.subtree {
                        chain.contains(&n.id)
                    } else {
                        parent == Some(n.id)
                    }
                }
            })
            .map(|(_, _, cb)| cb.clone())
            .collect()
    }
}

fn region_target(region: Region) -> ObserveTarget {
    match region {
        Region::Head => ObserveTarget::Head,
        Region::Body => ObserveTarget::Body,
    }
}

fn notify(callbacks: Vec<MutationCallback>, records: Vec<MutationRecord>) {
    for cb in callbacks {
        cb(&records);
    }
}

impl Document for MemoryDocument {
    fn query_selector(&self, selector: &str) -> Option<NodeRef> {
        let mut inner = self.lock();
        inner.queries.push(selector.to_string());
        inner
            .nodes
            .iter()
            .find(|(_, n)| n.connected && n.selectors.iter().any(|s| s == selector))
            .map(|(id, n)| NodeRef::new(*id, n.tag.clone()))
    }

    fn is_connected(&self, node: &NodeRef) -> bool {
        self.lock()
            .nodes
            .get(&node.id)
            .map(|n| n.connected)
            .unwrap_or(false)
    }

    fn attribute(&self, node: &NodeRef, name: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(&node.id)
            .and_then(|n| n.attrs.get(name).cloned())
    }

    fn location(&self) -> Result<String, PlatformError> {
        self.lock()
            .location
            .clone()
            .map_err(PlatformError::MalformedLocation)
    }

    fn add_event_listener(
        &self,
        target: EventTarget,
        event: &str,
        listener: Listener,
    ) -> ListenerId {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner
            .listeners
            .insert(id, (target, event.to_string(), listener));
        id
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.lock().listeners.remove(&id).is_some()
    }

    fn dispatch_event(&self, event: DomEvent) {
        let listeners: Vec<Listener> = {
            let inner = self.lock();
            inner
                .listeners
                .values()
                .filter(|(target, name, _)| *target == event.target && *name == event.name)
                .map(|(_, _, l)| l.clone())
                .collect()
        };
        debug!(event = %event.name, listeners = listeners.len(), "Dispatching event");
        for listener in listeners {
            listener(&event);
        }
    }

    fn observe(
        &self,
        target: ObserveTarget,
        options: MutationOptions,
        callback: MutationCallback,
    ) -> ObserverId {
        let mut inner = self.lock();
        let id = inner.next_observer;
        inner.next_observer += 1;
        inner.observers.insert(id, (target, options, callback));
        id
    }

    fn disconnect_observer(&self, id: ObserverId) -> bool {
        self.lock().observers.remove(&id).is_some()
    }

    fn replace_history_hook(
        &self,
        method: HistoryMethod,
        hook: Option<HistoryHook>,
    ) -> Option<HistoryHook> {
        let mut inner = self.lock();
        match hook {
            Some(h) => inner.hooks.insert(method, h),
            None => inner.hooks.remove(&method),
        }
    }

    fn mount_control(&self, parent: &NodeRef, label: &str, on_click: Listener) -> Option<NodeRef> {
        let node = self.insert_child(parent, "button", &[])?;
        self.set_attribute(&node, "aria-label", label);
        self.add_event_listener(EventTarget::Node(node.clone()), "click", on_click);
        Some(node)
    }

    fn unmount(&self, node: &NodeRef) -> bool {
        {
            let mut inner = self.lock();
            let target = EventTarget::Node(node.clone());
            inner.listeners.retain(|_, (t, _, _)| *t != target);
        }
        self.remove(node)
    }

    fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}
