//! Keyed mutation observers.
//!
//! Same replacement rule as the event bus: observing under a used key
//! disconnects the previous observer first.

use pipsync_dom::{Document, MutationCallback, MutationOptions, MutationRecord, ObserveTarget};
use std::sync::Arc;

use crate::registry::{KeyedRegistry, Subscription};

#[derive(Clone)]
pub struct ObserverRegistry {
    doc: Arc<dyn Document>,
    slots: Arc<KeyedRegistry>,
}

impl ObserverRegistry {
    pub fn new(doc: Arc<dyn Document>) -> Self {
        Self {
            doc,
            slots: KeyedRegistry::new("observers"),
        }
    }

    pub fn observe(
        &self,
        key: &str,
        target: ObserveTarget,
        options: MutationOptions,
        callback: impl Fn(&[MutationRecord]) + Send + Sync + 'static,
    ) -> Subscription {
        let doc = self.doc.clone();
        let callback: MutationCallback = Arc::new(callback);
        self.slots.install(key, move || {
            let id = doc.observe(target, options, callback);
            Box::new(move || {
                doc.disconnect_observer(id);
            })
        })
    }

    pub fn disconnect(&self, key: &str) -> bool {
        self.slots.remove(key)
    }

    pub fn disconnect_all(&self) {
        self.slots.clear();
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipsync_dom::memory::{MemoryDocument, Region};
    use std::sync::Mutex;

    #[test]
    fn test_reobserve_disconnects_previous() {
        let doc = MemoryDocument::new("https://example.com/");
        let observers = ObserverRegistry::new(doc.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        observers.observe("body", ObserveTarget::Body, MutationOptions::default(), move |_| {
            s.lock().unwrap().push(1)
        });
        let s = seen.clone();
        observers.observe("body", ObserveTarget::Body, MutationOptions::default(), move |_| {
            s.lock().unwrap().push(2)
        });

        doc.insert("div", &[], Region::Body);
        assert_eq!(seen.lock().unwrap().as_slice(), &[2]);
        assert_eq!(doc.observer_count(), 1);
    }

    #[test]
    fn test_disconnect_all_leaves_no_observers() {
        let doc = MemoryDocument::new("https://example.com/");
        let observers = ObserverRegistry::new(doc.clone());
        observers.observe("a", ObserveTarget::Body, MutationOptions::default(), |_| {});
        observers.observe("b", ObserveTarget::Head, MutationOptions::default(), |_| {});
        assert_eq!(observers.size(), 2);

        assert!(observers.disconnect("a"));
        observers.disconnect_all();
        assert_eq!(observers.size(), 0);
        assert_eq!(doc.observer_count(), 0);
    }
}
