use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::warn;

use crate::host::{Document, NodeId};

/// Identity reported for a registration call on an empty selection.
pub const EMPTY_COLLECTION: &str = "[empty collection]";

/// Stable key for "which element" a listener belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ElementIdentity(String);

impl ElementIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ElementIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ElementIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for ElementIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type IdentityFn = Rc<dyn Fn(&Document, NodeId) -> String>;

/// How identities are derived for elements that have none cached yet.
#[derive(Clone, Default)]
pub enum IdentityPolicy {
    /// `tag#id.class1.class2`
    #[default]
    Default,
    Custom(IdentityFn),
}

impl IdentityPolicy {
    pub fn custom(f: impl Fn(&Document, NodeId) -> String + 'static) -> Self {
        Self::Custom(Rc::new(f))
    }
}

impl fmt::Debug for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// `lowercase(tag)` + `#id` + `.classes`, e.g. `a#nav.btn.btn-primary`.
pub fn default_identity(document: &Document, node: NodeId) -> String {
    let mut identity = match document.tag_name(node) {
        Some(tag) if !tag.is_empty() => tag.to_lowercase(),
        _ => String::from("undefined"),
    };
    if let Some(id) = document.element_id(node) {
        identity.push('#');
        identity.push_str(&id);
    }
    let classes = document.class_list(node);
    if !classes.is_empty() {
        identity.push('.');
        identity.push_str(&classes.join("."));
    }
    identity
}

/// Resolves and caches element identities for one monitor instance.
///
/// The cache lives in the element's annotation store under a key unique to
/// the owning monitor; [`IdentityResolver::forget`] clears it again.
pub struct IdentityResolver {
    policy: IdentityPolicy,
    annotation_key: String,
    annotated: Vec<NodeId>,
}

impl IdentityResolver {
    pub fn new(policy: IdentityPolicy, monitor_id: u64) -> Self {
        Self {
            policy,
            annotation_key: format!("listener-monitor-identity-{monitor_id}"),
            annotated: Vec::new(),
        }
    }

    /// Identity of the first element of `nodes`.
    pub fn resolve(&mut self, document: &Document, nodes: &[NodeId]) -> ElementIdentity {
        let Some(&node) = nodes.first() else {
            return ElementIdentity::from(EMPTY_COLLECTION);
        };

        if let Some(cached) = document.annotation(node, &self.annotation_key) {
            return ElementIdentity(cached);
        }

        let identity = match &self.policy {
            IdentityPolicy::Default => default_identity(document, node),
            IdentityPolicy::Custom(f) => {
                let custom = f(document, node);
                if custom.is_empty() {
                    warn!(
                        target: "listener_monitor",
                        node,
                        "custom identity resolver returned an empty string; using the default"
                    );
                    default_identity(document, node)
                } else {
                    custom
                }
            }
        };

        match document.set_annotation(node, &self.annotation_key, &identity) {
            Ok(()) => self.annotated.push(node),
            Err(err) => warn!(target: "listener_monitor", error = %err, "identity not cached"),
        }
        ElementIdentity(identity)
    }

    /// Drops every cached identity this resolver wrote.
    pub fn forget(&mut self, document: &Document) {
        for node in self.annotated.drain(..) {
            document.remove_annotation(node, &self.annotation_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn default_identity_combines_tag_id_and_classes() {
        let document = Document::new();
        let link = document.create_element("A");
        document.set_element_id(link, "nav").unwrap();
        document.set_class_name(link, "btn  btn-primary").unwrap();
        assert_eq!(default_identity(&document, link), "a#nav.btn.btn-primary");

        let plain = document.create_element("span");
        assert_eq!(default_identity(&document, plain), "span");
    }

    #[test]
    fn empty_selection_uses_sentinel() {
        let document = Document::new();
        let mut resolver = IdentityResolver::new(IdentityPolicy::Default, 1);
        assert_eq!(resolver.resolve(&document, &[]).as_str(), EMPTY_COLLECTION);
    }

    #[test]
    fn resolution_is_cached_and_stable() {
        let document = Document::new();
        let div = document.create_element("div");
        let mut resolver = IdentityResolver::new(IdentityPolicy::Default, 1);

        let first = resolver.resolve(&document, &[div]);
        document.set_element_id(div, "changed").unwrap();
        let second = resolver.resolve(&document, &[div]);
        assert_eq!(first, second);
        assert_eq!(second.as_str(), "div");
    }

    #[test]
    fn custom_policy_runs_once_per_element() {
        let document = Document::new();
        let div = document.create_element("div");
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let policy = IdentityPolicy::custom(move |_, node| {
            seen.set(seen.get() + 1);
            format!("node-{node}")
        });
        let mut resolver = IdentityResolver::new(policy, 7);

        assert_eq!(resolver.resolve(&document, &[div]).as_str(), format!("node-{div}"));
        resolver.resolve(&document, &[div]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn empty_custom_identity_falls_back_to_default() {
        let document = Document::new();
        let div = document.create_element("div");
        let mut resolver = IdentityResolver::new(IdentityPolicy::custom(|_, _| String::new()), 1);
        assert_eq!(resolver.resolve(&document, &[div]).as_str(), "div");
    }

    #[test]
    fn forget_clears_annotations_and_is_scoped_per_monitor() {
        let document = Document::new();
        let div = document.create_element("div");
        let mut first = IdentityResolver::new(IdentityPolicy::Default, 1);
        let mut second = IdentityResolver::new(IdentityPolicy::custom(|_, _| "other".into()), 2);

        assert_eq!(first.resolve(&document, &[div]).as_str(), "div");
        assert_eq!(second.resolve(&document, &[div]).as_str(), "other");

        first.forget(&document);
        assert_eq!(document.annotation(div, "listener-monitor-identity-1"), None);
        assert_eq!(
            document.annotation(div, "listener-monitor-identity-2").as_deref(),
            Some("other")
        );
    }
}
