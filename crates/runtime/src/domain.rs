//! Domain module contract and the shared context handed to every module.

use async_trait::async_trait;
use pipsync_core::{AppStateStore, AppStateWriters, Config, Error, Result};
use pipsync_dom::{Document, MediaPlatform, MessageTransport, PageProbe, StreamPipeline};
use pipsync_http::HttpClient;
use std::sync::Arc;

use crate::events::EventRegistry;
use crate::observers::ObserverRegistry;
use crate::resolver::ElementResolver;
use crate::selectors::SelectorCatalog;

/// Ordering class of a module. Modules run in this order on start and in
/// reverse on stop; order within one phase is unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    CoreDetection,
    Control,
    Presentation,
    UrlWatch,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CoreDetection => "core_detection",
            Phase::Control => "control",
            Phase::Presentation => "presentation",
            Phase::UrlWatch => "url_watch",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the runtime talks to on the host side.
#[derive(Clone)]
pub struct HostBindings {
    pub document: Arc<dyn Document>,
    pub media: Arc<dyn MediaPlatform>,
    pub pipeline: Arc<dyn StreamPipeline>,
    pub transport: Arc<dyn MessageTransport>,
    pub probe: Arc<dyn PageProbe>,
}

/// Shared services, cloned into each module on `init`.
#[derive(Clone)]
pub struct DomainContext {
    pub config: Arc<Config>,
    pub host: HostBindings,
    pub store: AppStateStore,
    pub events: EventRegistry,
    pub observers: ObserverRegistry,
    pub resolver: Arc<ElementResolver>,
    pub http: HttpClient,
}

impl DomainContext {
    /// Build the shared services and the one-time slice writers.
    pub fn new(
        config: Config,
        host: HostBindings,
        catalog: SelectorCatalog,
    ) -> (Self, AppStateWriters) {
        let http = HttpClient::new(config.http.clone());
        Self::with_http(config, host, catalog, http)
    }

    pub fn with_http(
        config: Config,
        host: HostBindings,
        catalog: SelectorCatalog,
        http: HttpClient,
    ) -> (Self, AppStateWriters) {
        let (store, writers) = AppStateStore::new();
        let events = EventRegistry::new(host.document.clone());
        let observers = ObserverRegistry::new(host.document.clone());
        let resolver = Arc::new(ElementResolver::for_page(
            host.document.clone(),
            catalog,
            store.page.clone(),
        ));
        let ctx = Self {
            config: Arc::new(config),
            host,
            store,
            events,
            observers,
            resolver,
            http,
        };
        (ctx, writers)
    }
}

#[async_trait]
pub trait DomainModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn phase(&self) -> Phase;

    /// Claim slice writers and set up private state. Must not start any
    /// background work.
    async fn init(&mut self, ctx: &DomainContext, writers: &mut AppStateWriters) -> Result<()>;

    /// Fails with [`Error::NotInitialized`] when `init` never completed.
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}

pub(crate) fn not_initialized(module: &str) -> Error {
    Error::NotInitialized {
        module: module.to_string(),
    }
}

pub(crate) fn writer_taken(module: &str, slice: &str) -> Error {
    Error::Lifecycle(format!("{}: {} writer already claimed", module, slice))
}
