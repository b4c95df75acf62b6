//! Typed selector definitions.
//!
//! Each element role is bound to one wrapper type through [`TypedElement`].
//! A definition lists a primary selector and ordered fallbacks; a candidate
//! must pass the type's guard and then the optional validator before the
//! resolver accepts it.

use pipsync_core::{ElementRole, NodeRef};
use pipsync_dom::Document;
use std::collections::HashMap;
use std::sync::Arc;

/// A host node known to have the shape its role needs.
pub trait TypedElement: Clone + Send + Sync + 'static {
    const ROLE: ElementRole;

    /// Guard: `None` when the node does not have this element's shape.
    fn from_node(node: &NodeRef) -> Option<Self>;

    fn node(&self) -> &NodeRef;
}

macro_rules! typed_element {
    ($(#[$doc:meta])* $name:ident, $role:ident, [$($tag:literal),+]) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(NodeRef);

        impl TypedElement for $name {
            const ROLE: ElementRole = ElementRole::$role;

            fn from_node(node: &NodeRef) -> Option<Self> {
                if [$($tag),+].iter().any(|t| node.is_tag(t)) {
                    Some(Self(node.clone()))
                } else {
                    None
                }
            }

            fn node(&self) -> &NodeRef {
                &self.0
            }
        }
    };
}

typed_element!(
    /// The site's main playback element.
    VideoElement, Video, ["video"]
);
typed_element!(
    /// Canvas the site draws scrolling comments onto.
    CommentCanvas, CommentCanvas, ["canvas"]
);
typed_element!(ControllerBar, ControllerBar, ["div", "section", "nav"]);
typed_element!(MenuContainer, MenuContainer, ["div", "ul", "menu"]);
typed_element!(TooltipTrigger, TooltipTrigger, ["button", "div", "span"]);

pub type Validator<T> = Arc<dyn Fn(&T, &dyn Document) -> bool + Send + Sync>;

pub struct SelectorDefinition<T: TypedElement> {
    pub primary: String,
    pub fallbacks: Vec<String>,
    pub validate: Option<Validator<T>>,
}

impl<T: TypedElement> SelectorDefinition<T> {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
            validate: None,
        }
    }

    pub fn fallback(mut self, selector: impl Into<String>) -> Self {
        self.fallbacks.push(selector.into());
        self
    }

    pub fn validate(mut self, f: impl Fn(&T, &dyn Document) -> bool + Send + Sync + 'static) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }
}

type NodeGuard = Arc<dyn Fn(&NodeRef) -> bool + Send + Sync>;
type NodeValidator = Arc<dyn Fn(&NodeRef, &dyn Document) -> bool + Send + Sync>;

/// Role-erased form of a [`SelectorDefinition`], as the resolver walks it.
#[derive(Clone)]
pub struct RoleRules {
    pub(crate) selectors: Vec<String>,
    pub(crate) guard: NodeGuard,
    pub(crate) validate: Option<NodeValidator>,
}

impl RoleRules {
    /// Primary first, then fallbacks in declaration order.
    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }
}

impl<T: TypedElement> From<SelectorDefinition<T>> for RoleRules {
    fn from(def: SelectorDefinition<T>) -> Self {
        let mut selectors = Vec::with_capacity(def.fallbacks.len() + 1);
        selectors.push(def.primary);
        selectors.extend(def.fallbacks);

        let validate = def.validate.map(|v| -> NodeValidator {
            Arc::new(move |node: &NodeRef, doc: &dyn Document| {
                T::from_node(node).map(|typed| v(&typed, doc)).unwrap_or(false)
            })
        });
        Self {
            selectors,
            guard: Arc::new(|node: &NodeRef| T::from_node(node).is_some()),
            validate,
        }
    }
}

#[derive(Clone, Default)]
pub struct SelectorCatalog {
    rules: HashMap<ElementRole, RoleRules>,
}

impl SelectorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the definition for `T::ROLE`.
    pub fn with<T: TypedElement>(mut self, definition: SelectorDefinition<T>) -> Self {
        self.rules.insert(T::ROLE, definition.into());
        self
    }

    pub fn rules(&self, role: ElementRole) -> Option<&RoleRules> {
        self.rules.get(&role)
    }

    pub fn roles(&self) -> impl Iterator<Item = ElementRole> + '_ {
        ElementRole::ALL.into_iter().filter(|r| self.rules.contains_key(r))
    }

    /// Selectors for the watch page player.
    pub fn watch_page() -> Self {
        Self::new()
            .with(
                SelectorDefinition::<VideoElement>::new("#MainVideoPlayer video")
                    .fallback("div[data-name=\"player\"] video")
                    .fallback("video[data-name=\"video-content\"]"),
            )
            .with(
                SelectorDefinition::<CommentCanvas>::new("#MainVideoPlayer canvas")
                    .fallback("div[data-name=\"comment\"] canvas"),
            )
            .with(
                SelectorDefinition::<ControllerBar>::new("div[data-name=\"controller\"]")
                    .fallback(".ControllerContainer"),
            )
            .with(
                SelectorDefinition::<MenuContainer>::new("div[data-name=\"menu\"]")
                    .fallback(".PlayerMenuContainer"),
            )
            .with(
                SelectorDefinition::<TooltipTrigger>::new("button[aria-label=\"settings\"]")
                    .fallback(".PlayerOptionButton"),
            )
    }
}

impl std::fmt::Debug for SelectorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roles: Vec<_> = self.roles().collect();
        f.debug_struct("SelectorCatalog").field("roles", &roles).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_checks_tag() {
        let video = NodeRef::new(1, "VIDEO");
        let div = NodeRef::new(2, "div");
        assert!(VideoElement::from_node(&video).is_some());
        assert!(VideoElement::from_node(&div).is_none());
        assert_eq!(VideoElement::ROLE, ElementRole::Video);
    }

    #[test]
    fn test_rules_keep_declaration_order() {
        let catalog = SelectorCatalog::new().with(
            SelectorDefinition::<VideoElement>::new("a")
                .fallback("b")
                .fallback("c"),
        );
        let rules = catalog.rules(ElementRole::Video).unwrap();
        assert_eq!(rules.selectors(), &["a", "b", "c"]);
        assert!(catalog.rules(ElementRole::CommentCanvas).is_none());
    }

    #[test]
    fn test_watch_page_covers_every_role() {
        let catalog = SelectorCatalog::watch_page();
        assert_eq!(catalog.roles().count(), ElementRole::ALL.len());
    }
}
