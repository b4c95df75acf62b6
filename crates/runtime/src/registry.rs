//! Keyed registration store shared by the event and observer registries.
//!
//! A logical key owns at most one live registration. Registering under a used
//! key tears the old registration down before the new one is installed, so
//! re-entrant initialization never ends up with two handlers for one key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

struct Slot {
    token: u64,
    teardown: Teardown,
}

pub(crate) struct KeyedRegistry {
    label: &'static str,
    slots: Mutex<HashMap<String, Slot>>,
    next_token: AtomicU64,
}

impl KeyedRegistry {
    pub(crate) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace whatever `key` holds with the registration made by `install`.
    pub(crate) fn install(
        self: &Arc<Self>,
        key: &str,
        install: impl FnOnce() -> Teardown,
    ) -> Subscription {
        let previous = self.slots().remove(key);
        if let Some(previous) = previous {
            debug!(registry = self.label, key, "Replacing existing registration");
            (previous.teardown)();
        }

        let teardown = install();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let displaced = self
            .slots()
            .insert(key.to_string(), Slot { token, teardown });
        // `install` itself registered under the same key; last one wins.
        if let Some(displaced) = displaced {
            (displaced.teardown)();
        }

        Subscription {
            registry: Arc::downgrade(self),
            key: key.to_string(),
            token,
        }
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        let slot = self.slots().remove(key);
        match slot {
            Some(slot) => {
                (slot.teardown)();
                true
            }
            None => false,
        }
    }

    fn remove_token(&self, key: &str, token: u64) -> bool {
        let slot = {
            let mut slots = self.slots();
            match slots.get(key) {
                Some(slot) if slot.token == token => slots.remove(key),
                _ => None,
            }
        };
        match slot {
            Some(slot) => {
                (slot.teardown)();
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<(String, Slot)> = self.slots().drain().collect();
        if !drained.is_empty() {
            debug!(registry = self.label, count = drained.len(), "Clearing registrations");
        }
        for (_, slot) in drained {
            (slot.teardown)();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.slots().contains_key(key)
    }
}

/// Handle returned by a registration. Dropping it keeps the registration
/// alive; call [`Subscription::unsubscribe`] to tear it down early.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<KeyedRegistry>,
    key: String,
    token: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tear down this registration. A no-op returning `false` when the key has
    /// since been re-registered or cleared.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove_token(&self.key, self.token),
            None => false,
        }
    }
}

impl std::fmt::Debug for KeyedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRegistry")
            .field("label", &self.label)
            .field("len", &self.len())
            .finish()
    }
}
