//! Single-page-app navigation detection.
//!
//! Several triggers (initial check, `popstate`, the two history entry points,
//! head mutations) all funnel into [`UrlChangeDetector::check`], which
//! compares the live location with `PageState.url`. That comparison is the
//! only de-duplication: however many triggers fire for one navigation, the
//! generation moves once.

use pipsync_core::events::PageUrlChanged;
use pipsync_core::{Error, PageState, Result, SliceReader, SliceWriter, UrlWatchConfig};
use pipsync_dom::{
    Document, DomEvent, EventTarget, HistoryHook, HistoryMethod, Listener, ListenerId,
    MutationOptions, ObserveTarget, ObserverId,
};
use regex::Regex;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use crate::events::EventRegistry;

/// Registrations made by one `start()`, undone by the matching `stop()`.
#[derive(Default)]
struct Owned {
    running: bool,
    listeners: Vec<ListenerId>,
    observers: Vec<ObserverId>,
    /// Interceptor that was installed before ours, per history method.
    saved_hooks: Vec<(HistoryMethod, Option<HistoryHook>)>,
}

struct DetectorInner {
    doc: Arc<dyn Document>,
    events: EventRegistry,
    page: SliceWriter<PageState>,
    options: UrlWatchConfig,
    pattern: Regex,
    owned: Mutex<Owned>,
}

#[derive(Clone)]
pub struct UrlChangeDetector {
    inner: Arc<DetectorInner>,
}

impl UrlChangeDetector {
    pub fn new(
        doc: Arc<dyn Document>,
        events: EventRegistry,
        page: SliceWriter<PageState>,
        options: UrlWatchConfig,
    ) -> Result<Self> {
        let pattern = Regex::new(&options.watch_url_pattern)
            .map_err(|e| Error::Config(format!("invalid watch URL pattern: {}", e)))?;
        Ok(Self {
            inner: Arc::new(DetectorInner {
                doc,
                events,
                page,
                options,
                pattern,
                owned: Mutex::new(Owned::default()),
            }),
        })
    }

    pub fn page(&self) -> SliceReader<PageState> {
        self.inner.page.reader()
    }

    pub fn is_running(&self) -> bool {
        self.inner.owned().running
    }

    pub fn start(&self) {
        let inner = &self.inner;
        {
            let mut owned = inner.owned();
            if owned.running {
                debug!("URL detector already running");
                return;
            }
            owned.running = true;
        }

        let weak = Arc::downgrade(inner);
        let mut listeners = Vec::new();
        let mut observers = Vec::new();
        let mut saved_hooks = Vec::new();

        if inner.options.popstate {
            let w = weak.clone();
            let listener: Listener = Arc::new(move |_: &DomEvent| trigger(&w, "popstate"));
            listeners.push(inner.doc.add_event_listener(EventTarget::Window, "popstate", listener));
        }

        if inner.options.history {
            for method in HistoryMethod::ALL {
                let previous = inner.doc.replace_history_hook(method, None);
                let chained = previous.clone();
                let w = weak.clone();
                let hook: HistoryHook = Arc::new(move |url: &str| {
                    if let Some(prev) = &chained {
                        prev(url);
                    }
                    trigger(&w, method.as_str());
                });
                inner.doc.replace_history_hook(method, Some(hook));
                saved_hooks.push((method, previous));
            }
        }

        if inner.options.head_mutation {
            let w = weak.clone();
            let callback = Arc::new(move |_: &[pipsync_dom::MutationRecord]| trigger(&w, "head-mutation"));
            observers.push(inner.doc.observe(ObserveTarget::Head, MutationOptions::default(), callback));
        }

        {
            let mut owned = inner.owned();
            owned.listeners = listeners;
            owned.observers = observers;
            owned.saved_hooks = saved_hooks;
        }
        info!(
            popstate = inner.options.popstate,
            history = inner.options.history,
            head_mutation = inner.options.head_mutation,
            "URL detector started"
        );

        if inner.options.initial_check {
            inner.check();
        }
    }

    /// Undo exactly what `start()` installed. Safe to call when stopped.
    pub fn stop(&self) {
        let owned = {
            let mut owned = self.inner.owned();
            if !owned.running {
                return;
            }
            std::mem::take(&mut *owned)
        };
        let doc = &self.inner.doc;
        for id in &owned.listeners {
            doc.remove_event_listener(*id);
        }
        for id in &owned.observers {
            doc.disconnect_observer(*id);
        }
        for (method, previous) in owned.saved_hooks {
            doc.replace_history_hook(method, previous);
        }
        info!(
            listeners = owned.listeners.len(),
            observers = owned.observers.len(),
            "URL detector stopped"
        );
    }

    /// Re-read the location and publish a change if there is one.
    pub fn check(&self) -> Option<PageUrlChanged> {
        self.inner.check()
    }
}

fn trigger(detector: &Weak<DetectorInner>, source: &'static str) {
    if let Some(inner) = detector.upgrade() {
        debug!(source, "URL check triggered");
        inner.check();
    }
}

impl DetectorInner {
    fn owned(&self) -> MutexGuard<'_, Owned> {
        self.owned.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn location(&self) -> Result<String> {
        self.doc.location().map_err(Error::from)
    }

    fn check(&self) -> Option<PageUrlChanged> {
        let url = match self.location() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Could not read location, skipping check");
                return None;
            }
        };

        let is_watch_page = self.pattern.is_match(&url);
        let mut changed = false;
        let next = self.page.update(|page| {
            if page.url != url {
                page.url = url.clone();
                page.is_watch_page = is_watch_page;
                page.generation += 1;
                changed = true;
            }
        });
        if !changed {
            return None;
        }

        info!(url = %next.url, generation = next.generation, is_watch_page, "Page URL changed");
        let payload = PageUrlChanged {
            url: next.url,
            generation: next.generation,
            is_watch_page: next.is_watch_page,
        };
        self.events.emit(payload.clone());
        Some(payload)
    }
}

impl std::fmt::Debug for UrlChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlChangeDetector")
            .field("running", &self.is_running())
            .field("pattern", &self.inner.pattern.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipsync_core::AppStateStore;
    use pipsync_dom::memory::{MemoryDocument, Region};

    const HOME: &str = "https://www.nicovideo.jp/";
    const WATCH: &str = "https://www.nicovideo.jp/watch/sm9";

    struct Fixture {
        doc: Arc<MemoryDocument>,
        detector: UrlChangeDetector,
        seen: Arc<Mutex<Vec<PageUrlChanged>>>,
    }

    fn fixture(options: UrlWatchConfig) -> Fixture {
        let doc = MemoryDocument::new(HOME);
        let events = EventRegistry::new(doc.clone());
        let (_, mut writers) = AppStateStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        events.on::<PageUrlChanged>("test", move |p| s.lock().unwrap().push(p.clone()));
        let detector =
            UrlChangeDetector::new(doc.clone(), events, writers.take_page().unwrap(), options)
                .unwrap();
        Fixture { doc, detector, seen }
    }

    #[test]
    fn test_initial_check_publishes_first_url() {
        let f = fixture(UrlWatchConfig::default());
        f.detector.start();
        let seen = f.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].generation, 1);
        assert!(!seen[0].is_watch_page);
    }

    #[test]
    fn test_one_navigation_many_triggers_one_event() {
        let f = fixture(UrlWatchConfig::default());
        f.detector.start();

        f.doc.push_state(WATCH);
        f.doc.pop_state(WATCH);
        f.doc.insert("title", &[], Region::Head);

        let seen = f.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].url, WATCH);
        assert_eq!(seen[1].generation, 2);
        assert!(seen[1].is_watch_page);
        assert_eq!(f.detector.page().get().generation, 2);
    }

    #[test]
    fn test_head_mutation_catches_silent_router() {
        let f = fixture(UrlWatchConfig::default());
        f.detector.start();
        f.doc.set_location(WATCH);
        assert_eq!(f.seen.lock().unwrap().len(), 1);

        f.doc.insert("meta", &[], Region::Head);
        assert_eq!(f.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_disabled_trigger_is_not_installed() {
        let f = fixture(UrlWatchConfig {
            history: false,
            ..UrlWatchConfig::default()
        });
        f.detector.start();
        assert!(!f.doc.history_hook_installed(HistoryMethod::PushState));
        f.doc.push_state(WATCH);
        assert_eq!(f.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_restores_everything_and_restart_is_fresh() {
        let f = fixture(UrlWatchConfig::default());
        let listeners_before = f.doc.listener_count();
        let outer_calls = Arc::new(Mutex::new(Vec::new()));
        let o = outer_calls.clone();
        f.doc.replace_history_hook(
            HistoryMethod::PushState,
            Some(Arc::new(move |url: &str| o.lock().unwrap().push(url.to_string()))),
        );

        f.detector.start();
        f.detector.start();
        f.detector.stop();

        assert!(!f.detector.is_running());
        assert_eq!(f.doc.listener_count(), listeners_before);
        assert_eq!(f.doc.observer_count(), 0);
        assert!(!f.doc.history_hook_installed(HistoryMethod::ReplaceState));

        // The pre-existing interceptor is back and ours is gone.
        f.doc.push_state(WATCH);
        assert_eq!(outer_calls.lock().unwrap().as_slice(), &[WATCH.to_string()]);
        assert_eq!(f.seen.lock().unwrap().len(), 1);

        f.detector.start();
        assert_eq!(f.seen.lock().unwrap().len(), 2);
        f.doc.push_state("https://www.nicovideo.jp/watch/sm10");
        assert_eq!(f.seen.lock().unwrap().len(), 3);
        assert_eq!(outer_calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_location_is_skipped() {
        let f = fixture(UrlWatchConfig::default());
        f.doc.break_location("bad href");
        assert!(matches!(f.detector.inner.location(), Err(Error::Navigation(_))));
        f.detector.start();
        assert!(f.seen.lock().unwrap().is_empty());
        assert!(f.detector.is_running());

        f.doc.pop_state(WATCH);
        assert_eq!(f.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let doc = MemoryDocument::new(HOME);
        let events = EventRegistry::new(doc.clone());
        let (_, mut writers) = AppStateStore::new();
        let result = UrlChangeDetector::new(
            doc,
            events,
            writers.take_page().unwrap(),
            UrlWatchConfig {
                watch_url_pattern: "(".into(),
                ..UrlWatchConfig::default()
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
