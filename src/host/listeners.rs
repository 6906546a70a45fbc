use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::dom::{Document, NodeId};

type Handler = dyn Fn(&Document, &mut Event);

/// A listener callback. Clones share the underlying allocation, so a clone is
/// "the same function" for bind/unbind matching.
#[derive(Clone)]
pub struct Callback(Rc<Handler>);

impl Callback {
    pub fn new(handler: impl Fn(&Document, &mut Event) + 'static) -> Self {
        Self(Rc::new(handler))
    }

    pub fn call(&self, document: &Document, event: &mut Event) {
        (self.0)(document, event)
    }

    /// Address of the shared allocation; stable for as long as any strong or
    /// weak reference to it exists.
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn same_as(&self, other: &Callback) -> bool {
        self.address() == other.address()
    }

    pub fn downgrade(&self) -> WeakCallback {
        WeakCallback(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:#x})", self.address())
    }
}

/// Weak counterpart of [`Callback`].
#[derive(Clone)]
pub struct WeakCallback(Weak<Handler>);

impl WeakCallback {
    pub fn upgrade(&self) -> Option<Callback> {
        self.0.upgrade().map(Callback)
    }
}

impl fmt::Debug for WeakCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakCallback")
    }
}

/// Event object handed to listeners during dispatch.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub target: NodeId,
    pub current_target: NodeId,
    pub default_prevented: bool,
    pub propagation_stopped: bool,
}

impl Event {
    pub fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

/// Per-node, per-type listener lists in registration order. Duplicate
/// registrations of the same callback are kept, as jQuery-style frameworks do.
#[derive(Debug, Default)]
pub(crate) struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Callback>>>,
}

impl ListenerStore {
    pub(crate) fn add(&mut self, node_id: NodeId, event: &str, callback: Callback) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(callback);
    }

    /// Removes every listener for `event` matching `callback`, or all of them
    /// when no callback is given. Returns how many were removed.
    pub(crate) fn remove(
        &mut self,
        node_id: NodeId,
        event: &str,
        callback: Option<&Callback>,
    ) -> usize {
        let Some(events) = self.map.get_mut(&node_id) else {
            return 0;
        };
        let Some(listeners) = events.get_mut(event) else {
            return 0;
        };

        let before = listeners.len();
        match callback {
            Some(callback) => listeners.retain(|existing| !existing.same_as(callback)),
            None => listeners.clear(),
        }
        let removed = before - listeners.len();

        if listeners.is_empty() {
            events.remove(event);
        }
        if events.is_empty() {
            self.map.remove(&node_id);
        }
        removed
    }

    pub(crate) fn get(&self, node_id: NodeId, event: &str) -> Vec<Callback> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, node_id: NodeId, event: &str) -> usize {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .map_or(0, Vec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.map
            .values()
            .flat_map(|events| events.values())
            .map(Vec::len)
            .sum()
    }

    pub(crate) fn forget_node(&mut self, node_id: NodeId) {
        self.map.remove(&node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Callback::new(|_, _| {})
    }

    #[test]
    fn clones_share_identity() {
        let a = noop();
        let b = a.clone();
        let c = noop();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn weak_callback_upgrades_only_while_alive() {
        let a = noop();
        let weak = a.downgrade();
        assert!(weak.upgrade().is_some_and(|b| b.same_as(&a)));
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn remove_specific_callback_removes_all_duplicates() {
        let mut store = ListenerStore::default();
        let a = noop();
        let b = noop();
        store.add(1, "click", a.clone());
        store.add(1, "click", a.clone());
        store.add(1, "click", b.clone());

        assert_eq!(store.remove(1, "click", Some(&a)), 2);
        assert_eq!(store.count(1, "click"), 1);
        assert_eq!(store.remove(1, "click", Some(&a)), 0);
    }

    #[test]
    fn remove_without_callback_clears_type() {
        let mut store = ListenerStore::default();
        store.add(1, "click", noop());
        store.add(1, "click", noop());
        store.add(1, "focus", noop());

        assert_eq!(store.remove(1, "click", None), 2);
        assert_eq!(store.count(1, "click"), 0);
        assert_eq!(store.count(1, "focus"), 1);
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn remove_on_unknown_node_is_zero() {
        let mut store = ListenerStore::default();
        assert_eq!(store.remove(42, "click", None), 0);
    }
}
