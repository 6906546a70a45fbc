use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::dom::{Document, HostError, NodeId};
use super::listeners::Callback;

/// Arguments of a registration call: the event string (possibly several
/// whitespace-separated types) and the optional handler.
#[derive(Debug, Clone)]
pub struct ListenerCall {
    pub events: String,
    pub callback: Option<Callback>,
}

impl ListenerCall {
    pub fn new(events: &str, callback: Option<&Callback>) -> Self {
        Self {
            events: events.to_string(),
            callback: callback.cloned(),
        }
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.events.split_whitespace()
    }
}

/// A named registration function exposed by the host framework.
pub type EntryPoint = Rc<dyn Fn(&Document, &[NodeId], &ListenerCall)>;

struct Slot {
    current: EntryPoint,
    intercepted: bool,
}

/// The framework's extension mechanism: registration functions addressed by
/// name, which instrumentation may replace and later restore.
#[derive(Default)]
pub struct EntryPointTable {
    slots: RefCell<BTreeMap<String, Slot>>,
}

impl EntryPointTable {
    pub fn register(&self, name: &str, entry_point: EntryPoint) {
        self.slots.borrow_mut().insert(
            name.to_string(),
            Slot {
                current: entry_point,
                intercepted: false,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<EntryPoint> {
        self.slots
            .borrow()
            .get(name)
            .map(|slot| Rc::clone(&slot.current))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.borrow().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.borrow().keys().cloned().collect()
    }

    pub fn is_intercepted(&self, name: &str) -> bool {
        self.slots
            .borrow()
            .get(name)
            .is_some_and(|slot| slot.intercepted)
    }

    /// Replaces `name` with the entry point built by `wrap` from the current
    /// implementation, and hands that original back to the caller. Only one
    /// interception per name may be active.
    pub fn intercept(
        &self,
        name: &str,
        wrap: impl FnOnce(EntryPoint) -> EntryPoint,
    ) -> Result<EntryPoint, HostError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| HostError::UnknownEntryPoint(name.to_string()))?;
        if slot.intercepted {
            return Err(HostError::AlreadyIntercepted(name.to_string()));
        }

        let original = Rc::clone(&slot.current);
        slot.current = wrap(Rc::clone(&original));
        slot.intercepted = true;
        Ok(original)
    }

    /// Puts `original` back in place of an intercepted entry point.
    pub fn restore(&self, name: &str, original: EntryPoint) -> Result<(), HostError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| HostError::UnknownEntryPoint(name.to_string()))?;
        if !slot.intercepted {
            return Err(HostError::NotIntercepted(name.to_string()));
        }

        slot.current = original;
        slot.intercepted = false;
        Ok(())
    }
}

impl fmt::Debug for EntryPointTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.borrow();
        f.debug_map()
            .entries(slots.iter().map(|(name, slot)| (name, slot.intercepted)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EntryPoint {
        Rc::new(|_: &Document, _: &[NodeId], _: &ListenerCall| {})
    }

    #[test]
    fn intercept_then_restore_puts_original_back() {
        let table = EntryPointTable::default();
        let original = noop();
        table.register("on", Rc::clone(&original));

        let captured = table
            .intercept("on", |inner| {
                let wrapped: EntryPoint =
                    Rc::new(move |d: &Document, n: &[NodeId], c: &ListenerCall| inner(d, n, c));
                wrapped
            })
            .expect("intercept");
        assert!(Rc::ptr_eq(&captured, &original));
        assert!(table.is_intercepted("on"));
        assert!(!Rc::ptr_eq(&table.get("on").unwrap(), &original));

        table.restore("on", captured).expect("restore");
        assert!(!table.is_intercepted("on"));
        assert!(Rc::ptr_eq(&table.get("on").unwrap(), &original));
    }

    #[test]
    fn second_interception_is_refused() {
        let table = EntryPointTable::default();
        table.register("on", noop());
        table.intercept("on", |inner| inner).expect("first");

        let err = table
            .intercept("on", |inner| inner)
            .err()
            .expect("second interception refused");
        assert_eq!(err, HostError::AlreadyIntercepted("on".into()));
    }

    #[test]
    fn unknown_names_are_errors() {
        let table = EntryPointTable::default();
        assert!(matches!(
            table.intercept("nope", |inner| inner),
            Err(HostError::UnknownEntryPoint(_))
        ));
        assert!(matches!(
            table.restore("nope", noop()),
            Err(HostError::UnknownEntryPoint(_))
        ));
    }

    #[test]
    fn splits_event_types_on_any_whitespace() {
        let call = ListenerCall::new(" click  focus\tblur ", None);
        let types: Vec<_> = call.event_types().collect();
        assert_eq!(types, ["click", "focus", "blur"]);
    }
}
