//! Picture-in-picture sync runtime: registries, element resolution,
//! navigation detection, reconciliation and the domain orchestrator.

pub mod bootstrap;
pub mod domain;
pub mod domains;
pub mod events;
pub mod observers;
pub mod pip;
mod registry;
pub mod resolver;
pub mod selectors;
pub mod url_watch;
pub mod wait;

pub use bootstrap::{run_fail_soft, Bootstrap, LifecycleFailure, RunningApp, Stage};
pub use domain::{DomainContext, DomainModule, HostBindings, Phase};
pub use events::EventRegistry;
pub use observers::ObserverRegistry;
pub use pip::{PipMode, PipReconciler, PipSignal};
pub use registry::Subscription;
pub use resolver::ElementResolver;
pub use selectors::{SelectorCatalog, SelectorDefinition, TypedElement};
pub use url_watch::UrlChangeDetector;
pub use wait::{ElementWait, Probe, WaitPolicy, WaitState};
