//! Generation-stamped element resolution.
//!
//! A cached node is returned only while the page generation it was resolved
//! under is still current, the node is still attached and its role's rules
//! still accept it. Anything else is dropped and resolved again through the
//! selector chain.

use chrono::{DateTime, Utc};
use pipsync_core::{ElementRole, ElementsSnapshot, NodeRef, PageState, SliceReader};
use pipsync_dom::Document;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::selectors::{RoleRules, SelectorCatalog, TypedElement};

pub type GenerationSource = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone)]
struct CacheEntry {
    node: NodeRef,
    generation: u64,
    resolved_at: DateTime<Utc>,
}

pub struct ElementResolver {
    doc: Arc<dyn Document>,
    catalog: SelectorCatalog,
    generation: GenerationSource,
    cache: Mutex<HashMap<ElementRole, CacheEntry>>,
}

impl ElementResolver {
    pub fn new(doc: Arc<dyn Document>, catalog: SelectorCatalog, generation: GenerationSource) -> Self {
        Self {
            doc,
            catalog,
            generation,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver keyed to the page slice's navigation generation.
    pub fn for_page(doc: Arc<dyn Document>, catalog: SelectorCatalog, page: SliceReader<PageState>) -> Self {
        Self::new(doc, catalog, Arc::new(move || page.with(|p| p.generation)))
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<ElementRole, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn generation(&self) -> u64 {
        (self.generation)()
    }

    pub fn catalog(&self) -> &SelectorCatalog {
        &self.catalog
    }

    pub fn resolve(&self, role: ElementRole) -> Option<NodeRef> {
        let current = self.generation();

        let Some(rules) = self.catalog.rules(role) else {
            debug!(role = %role, "No selector definition for role");
            return None;
        };

        let cached = self.cache().get(&role).cloned();
        if let Some(entry) = cached {
            let reason = if entry.generation != current {
                Some("generation")
            } else if !self.doc.is_connected(&entry.node) {
                Some("detached")
            } else {
                self.check(rules, &entry.node).err()
            };
            match reason {
                None => return Some(entry.node),
                Some(reason) => {
                    debug!(
                        role = %role,
                        reason,
                        cached_generation = entry.generation,
                        current_generation = current,
                        "Dropping element cache entry"
                    );
                    self.cache().remove(&role);
                }
            }
        }

        for selector in rules.selectors() {
            let Some(candidate) = self.doc.query_selector(selector) else {
                continue;
            };
            match self.check(rules, &candidate) {
                Ok(()) => {}
                Err("guard") => {
                    warn!(
                        kind = "selector_drift",
                        role = %role,
                        selector = %selector,
                        tag = %candidate.tag,
                        "Selector matched a node of the wrong shape"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(
                        kind = "validate_rejected",
                        role = %role,
                        selector = %selector,
                        "Candidate rejected by validator"
                    );
                    continue;
                }
            }
            self.cache().insert(
                role,
                CacheEntry {
                    node: candidate.clone(),
                    generation: current,
                    resolved_at: Utc::now(),
                },
            );
            return Some(candidate);
        }
        None
    }

    fn check(&self, rules: &RoleRules, node: &NodeRef) -> Result<(), &'static str> {
        if !(rules.guard)(node) {
            return Err("guard");
        }
        match &rules.validate {
            Some(validate) if !validate(node, self.doc.as_ref()) => Err("validate"),
            _ => Ok(()),
        }
    }

    pub fn resolve_typed<T: TypedElement>(&self) -> Option<T> {
        self.resolve(T::ROLE).and_then(|node| T::from_node(&node))
    }

    /// Cached node for `role` without touching the document.
    pub fn peek(&self, role: ElementRole) -> Option<NodeRef> {
        self.cache().get(&role).map(|e| e.node.clone())
    }

    /// When the cached entry for `role` was resolved.
    pub fn resolved_at(&self, role: ElementRole) -> Option<DateTime<Utc>> {
        self.cache().get(&role).map(|e| e.resolved_at)
    }

    /// Drop the cached entry for `role`. `false` when nothing was cached.
    pub fn invalidate(&self, role: ElementRole) -> bool {
        self.cache().remove(&role).is_some()
    }

    pub fn invalidate_all(&self) {
        self.cache().clear();
    }

    /// Resolve every catalogued role.
    pub fn resolve_all(&self) -> ElementsSnapshot {
        self.catalog
            .roles()
            .filter_map(|role| self.resolve(role).map(|node| (role, node)))
            .collect()
    }
}

impl std::fmt::Debug for ElementResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementResolver")
            .field("catalog", &self.catalog)
            .field("cached", &self.cache().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::{SelectorDefinition, VideoElement};
    use pipsync_dom::memory::{MemoryDocument, Region};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn setup(catalog: SelectorCatalog) -> (Arc<MemoryDocument>, Arc<AtomicU64>, ElementResolver) {
        let doc = MemoryDocument::new("https://example.com/");
        let generation = Arc::new(AtomicU64::new(1));
        let g = generation.clone();
        let resolver = ElementResolver::new(
            doc.clone(),
            catalog,
            Arc::new(move || g.load(Ordering::SeqCst)),
        );
        (doc, generation, resolver)
    }

    fn video_catalog() -> SelectorCatalog {
        SelectorCatalog::new().with(
            SelectorDefinition::<VideoElement>::new("#primary")
                .fallback("#secondary")
                .fallback("#tertiary"),
        )
    }

    #[test]
    fn test_cache_served_within_generation() {
        let (doc, _, resolver) = setup(video_catalog());
        let video = doc.insert("video", &["#primary"], Region::Body);

        assert_eq!(resolver.resolve(ElementRole::Video), Some(video.clone()));
        doc.clear_queries();
        assert_eq!(resolver.resolve(ElementRole::Video), Some(video));
        assert!(doc.queries().is_empty());
    }

    #[test]
    fn test_generation_bump_forces_fresh_lookup() {
        let (doc, generation, resolver) = setup(video_catalog());
        let video = doc.insert("video", &["#primary"], Region::Body);
        assert_eq!(resolver.resolve(ElementRole::Video), Some(video.clone()));

        // Same node still attached, but the page moved on.
        generation.store(2, Ordering::SeqCst);
        doc.clear_queries();
        assert_eq!(resolver.resolve(ElementRole::Video), Some(video));
        assert_eq!(doc.queries(), vec!["#primary"]);
    }

    #[test]
    fn test_detached_node_never_returned() {
        let (doc, _, resolver) = setup(video_catalog());
        let old = doc.insert("video", &["#primary"], Region::Body);
        resolver.resolve(ElementRole::Video);
        let replacement = doc.replace(&old, "video", &["#primary"]).unwrap();

        assert_eq!(resolver.resolve(ElementRole::Video), Some(replacement));
    }

    #[test]
    fn test_fallbacks_tried_in_order() {
        let (doc, _, resolver) = setup(video_catalog());
        let video = doc.insert("video", &["#tertiary"], Region::Body);

        assert_eq!(resolver.resolve(ElementRole::Video), Some(video));
        assert_eq!(doc.queries(), vec!["#primary", "#secondary", "#tertiary"]);
    }

    #[test]
    fn test_lookup_stops_at_first_accepted_match() {
        let (doc, _, resolver) = setup(video_catalog());
        let video = doc.insert("video", &["#secondary"], Region::Body);
        doc.insert("video", &["#tertiary"], Region::Body);

        assert_eq!(resolver.resolve(ElementRole::Video), Some(video));
        assert_eq!(doc.queries(), vec!["#primary", "#secondary"]);
    }

    #[test]
    fn test_wrong_shape_skipped() {
        let (doc, _, resolver) = setup(video_catalog());
        doc.insert("div", &["#primary"], Region::Body);
        let video = doc.insert("video", &["#secondary"], Region::Body);

        assert_eq!(resolver.resolve(ElementRole::Video), Some(video));
    }

    #[test]
    fn test_validator_rejection_falls_through() {
        let catalog = SelectorCatalog::new().with(
            SelectorDefinition::<VideoElement>::new("#primary")
                .fallback("#secondary")
                .validate(|v, doc| doc.attribute(v.node(), "data-ready").is_some()),
        );
        let (doc, _, resolver) = setup(catalog);
        doc.insert("video", &["#primary"], Region::Body);
        let ready = doc.insert("video", &["#secondary"], Region::Body);
        doc.set_attribute(&ready, "data-ready", "1");

        assert_eq!(resolver.resolve(ElementRole::Video), Some(ready));
    }

    #[test]
    fn test_missing_everywhere_is_none() {
        let (_, _, resolver) = setup(video_catalog());
        assert_eq!(resolver.resolve(ElementRole::Video), None);
        assert_eq!(resolver.resolve(ElementRole::CommentCanvas), None);
        assert!(resolver.resolve_all().is_empty());
    }

    #[test]
    fn test_typed_and_invalidate() {
        let (doc, _, resolver) = setup(video_catalog());
        let video = doc.insert("video", &["#primary"], Region::Body);
        let typed = resolver.resolve_typed::<VideoElement>().unwrap();
        assert_eq!(typed.node(), &video);
        assert_eq!(resolver.peek(ElementRole::Video), Some(video));
        assert!(resolver.resolved_at(ElementRole::Video).is_some());

        assert!(resolver.invalidate(ElementRole::Video));
        assert!(!resolver.invalidate(ElementRole::Video));
        assert_eq!(resolver.peek(ElementRole::Video), None);
    }
}
