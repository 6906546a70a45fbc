use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, error};

use super::identity::ElementIdentity;
use crate::host::{Callback, WeakCallback};

/// Synthetic ID standing in for a callback's reference identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallbackId(u64);

/// Side table from callback allocation to [`CallbackId`], filled on first
/// sight. Callbacks themselves are never touched.
///
/// Entries whose callback has been dropped everywhere are pruned whenever the
/// table doubles in size; a dropped callback can never be presented again, and
/// pruning releases its address for a fresh ID.
#[derive(Debug, Default)]
struct CallbackIds {
    next: u64,
    // The weak reference keeps the allocation, and so its address, reserved.
    seen: HashMap<usize, (WeakCallback, CallbackId)>,
    prune_at: usize,
}

const MIN_PRUNE_AT: usize = 64;

impl CallbackIds {
    fn assign(&mut self, callback: &Callback) -> CallbackId {
        if let Some((_, id)) = self.seen.get(&callback.address()) {
            return *id;
        }
        if self.seen.len() >= self.prune_at.max(MIN_PRUNE_AT) {
            self.prune();
        }
        self.next += 1;
        let id = CallbackId(self.next);
        self.seen
            .insert(callback.address(), (callback.downgrade(), id));
        debug!(target: "listener_monitor", ?callback, id = id.0, "assigned callback id");
        id
    }

    fn prune(&mut self) {
        let before = self.seen.len();
        self.seen.retain(|_, (weak, _)| weak.upgrade().is_some());
        self.prune_at = self.seen.len() * 2;
        debug!(
            target: "listener_monitor",
            pruned = before - self.seen.len(),
            live = self.seen.len(),
            "pruned dropped callbacks"
        );
    }

    fn lookup(&self, callback: &Callback) -> Option<CallbackId> {
        self.seen.get(&callback.address()).map(|(_, id)| *id)
    }
}

#[derive(Debug, Default, Clone)]
struct LedgerEntry {
    count: usize,
    callbacks: Vec<CallbackId>,
}

/// Result of one event type within a bind/unbind call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Type is on the ignore list; nothing was counted.
    Ignored,
    Bound { was: usize, now: usize },
    Unbound { was: usize, now: usize },
    /// Count was already zero.
    NothingToUnbind,
    /// The given callback is not among those bound for this type.
    CallbackNotBound { count: usize },
}

impl Outcome {
    /// Number of listeners this outcome took off the books.
    pub fn removed(&self) -> usize {
        match *self {
            Outcome::Unbound { was, now } => was - now,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub identity: ElementIdentity,
    pub event: String,
    pub outcome: Outcome,
    /// Ledger total right after this observation.
    pub total: usize,
}

impl Observation {
    /// Human readable trace line; ignored types produce none.
    pub fn log_line(&self) -> Option<String> {
        let Self {
            identity, event, ..
        } = self;
        let line = match self.outcome {
            Outcome::Ignored => return None,
            Outcome::Bound { was, now } => {
                format!("{identity} >> {event} (was: {was}, now: {now}) BOUND")
            }
            Outcome::Unbound { was, now } => {
                format!("{identity} >> {event} (was: {was}, now: {now}) UNBOUND")
            }
            Outcome::NothingToUnbind => {
                format!("{identity} >> {event} (was: 0, now: 0) UNBIND [nothing to unbind]")
            }
            Outcome::CallbackNotBound { count } => format!(
                "{identity} >> {event} (was: {count}, now: {count}) UNBOUND however provided callback NOT PREVIOUSLY BOUND; no effect"
            ),
        };
        Some(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub identity: ElementIdentity,
    pub event: String,
    pub count: usize,
    pub callbacks: Vec<CallbackId>,
}

/// Point-in-time copy of the ledger, ordered by identity then event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub total: usize,
    pub entries: Vec<SnapshotEntry>,
}

impl LedgerSnapshot {
    pub fn count(&self, identity: &str, event: &str) -> usize {
        self.entries
            .iter()
            .find(|entry| entry.identity.as_str() == identity && entry.event == event)
            .map_or(0, |entry| entry.count)
    }
}

/// Bound-listener counts per (identity, event type) and their running total.
///
/// Invariant: `total` equals the sum of all entry counts after every call.
/// Entries are created lazily and never removed.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<ElementIdentity, BTreeMap<String, LedgerEntry>>,
    total: usize,
    ignore_events: HashSet<String>,
    callback_ids: CallbackIds,
}

impl Ledger {
    pub fn new(ignore_events: impl IntoIterator<Item = String>) -> Self {
        Self {
            ignore_events: ignore_events.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, identity: &str, event: &str) -> usize {
        self.entries
            .get(identity)
            .and_then(|events| events.get(event))
            .map_or(0, |entry| entry.count)
    }

    pub fn is_ignored(&self, event: &str) -> bool {
        self.ignore_events.contains(event)
    }

    pub fn record_bind(
        &mut self,
        identity: &ElementIdentity,
        events: &str,
        callback: Option<&Callback>,
    ) -> Vec<Observation> {
        let mut observations = Vec::new();
        for event in events.split_whitespace() {
            let outcome = if self.is_ignored(event) {
                Outcome::Ignored
            } else {
                let callback_id = callback.map(|cb| self.callback_ids.assign(cb));
                let entry = self.entry(identity, event);
                let was = entry.count;
                entry.count += 1;
                entry.callbacks.extend(callback_id);
                let now = entry.count;
                self.total += 1;
                Outcome::Bound { was, now }
            };
            observations.push(self.observe(identity, event, outcome));
        }
        self.verify();
        observations
    }

    pub fn record_unbind(
        &mut self,
        identity: &ElementIdentity,
        events: &str,
        callback: Option<&Callback>,
    ) -> Vec<Observation> {
        let mut observations = Vec::new();
        for event in events.split_whitespace() {
            let outcome = if self.is_ignored(event) {
                Outcome::Ignored
            } else {
                self.unbind_one(identity, event, callback)
            };
            observations.push(self.observe(identity, event, outcome));
        }
        self.verify();
        observations
    }

    fn unbind_one(
        &mut self,
        identity: &ElementIdentity,
        event: &str,
        callback: Option<&Callback>,
    ) -> Outcome {
        let callback_id = callback.map(|cb| self.callback_ids.lookup(cb));
        let entry = self.entry(identity, event);
        let was = entry.count;
        if was == 0 {
            return Outcome::NothingToUnbind;
        }

        let removed = match callback_id {
            None => {
                entry.callbacks.clear();
                was
            }
            Some(id) => {
                let before = entry.callbacks.len();
                if let Some(id) = id {
                    entry.callbacks.retain(|bound| *bound != id);
                }
                let removed = before - entry.callbacks.len();
                if removed == 0 {
                    return Outcome::CallbackNotBound { count: was };
                }
                removed.min(was)
            }
        };

        entry.count = was - removed;
        let now = entry.count;
        self.total = self.total.saturating_sub(removed);
        Outcome::Unbound { was, now }
    }

    fn entry(&mut self, identity: &ElementIdentity, event: &str) -> &mut LedgerEntry {
        self.entries
            .entry(identity.clone())
            .or_default()
            .entry(event.to_string())
            .or_default()
    }

    fn observe(&self, identity: &ElementIdentity, event: &str, outcome: Outcome) -> Observation {
        Observation {
            identity: identity.clone(),
            event: event.to_string(),
            outcome,
            total: self.total,
        }
    }

    fn verify(&mut self) {
        let sum: usize = self
            .entries
            .values()
            .flat_map(|events| events.values())
            .map(|entry| entry.count)
            .sum();
        if sum != self.total {
            error!(
                target: "listener_monitor",
                total = self.total,
                sum,
                "ledger total out of sync with entries; repairing"
            );
            self.total = sum;
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            total: self.total,
            entries: self.entries(),
        }
    }

    /// Every entry, zero counts included, ordered by identity then event type.
    pub fn entries(&self) -> Vec<SnapshotEntry> {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .flat_map(|(identity, events)| {
                events.iter().map(move |(event, entry)| SnapshotEntry {
                    identity: identity.clone(),
                    event: event.clone(),
                    count: entry.count,
                    callbacks: entry.callbacks.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| (&a.identity, &a.event).cmp(&(&b.identity, &b.event)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback() -> Callback {
        Callback::new(|_, _| {})
    }

    fn id(value: &str) -> ElementIdentity {
        ElementIdentity::from(value)
    }

    fn sum_of_entries(ledger: &Ledger) -> usize {
        ledger.snapshot().entries.iter().map(|e| e.count).sum()
    }

    #[test]
    fn bind_counts_each_token() {
        let mut ledger = Ledger::default();
        let observations = ledger.record_bind(&id("body"), "click  focus", Some(&callback()));

        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].outcome, Outcome::Bound { was: 0, now: 1 });
        assert_eq!(observations[0].total, 1);
        assert_eq!(observations[1].event, "focus");
        assert_eq!(observations[1].total, 2);
        assert_eq!(ledger.count("body", "click"), 1);
        assert_eq!(ledger.total(), 2);
    }

    #[test]
    fn ignored_events_never_count() {
        let mut ledger = Ledger::new(["touchstart".to_string()]);
        let cb = callback();
        let bound = ledger.record_bind(&id("a"), "touchstart click", Some(&cb));
        assert_eq!(bound[0].outcome, Outcome::Ignored);
        assert_eq!(bound[0].log_line(), None);
        assert_eq!(ledger.total(), 1);

        let unbound = ledger.record_unbind(&id("a"), "touchstart", None);
        assert_eq!(unbound[0].outcome, Outcome::Ignored);
        assert_eq!(ledger.count("a", "touchstart"), 0);
    }

    #[test]
    fn unbind_without_callback_clears_the_type() {
        let mut ledger = Ledger::default();
        ledger.record_bind(&id("a"), "click", Some(&callback()));
        ledger.record_bind(&id("a"), "click", Some(&callback()));
        ledger.record_bind(&id("a"), "focus", Some(&callback()));

        let observations = ledger.record_unbind(&id("a"), "click", None);
        assert_eq!(observations[0].outcome, Outcome::Unbound { was: 2, now: 0 });
        assert_eq!(observations[0].outcome.removed(), 2);
        assert_eq!(ledger.total(), 1);
        assert_eq!(ledger.count("a", "focus"), 1);
    }

    #[test]
    fn unbind_specific_callback_removes_every_match() {
        let mut ledger = Ledger::default();
        let first = callback();
        let second = callback();
        for cb in [&first, &first, &second, &second] {
            ledger.record_bind(&id("a"), "click", Some(cb));
        }
        assert_eq!(ledger.total(), 4);

        let observations = ledger.record_unbind(&id("a"), "click", Some(&first.clone()));
        assert_eq!(observations[0].outcome, Outcome::Unbound { was: 4, now: 2 });
        assert_eq!(ledger.total(), 2);

        ledger.record_unbind(&id("a"), "click", Some(&second));
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn unbind_of_unknown_callback_is_a_reported_noop() {
        let mut ledger = Ledger::default();
        ledger.record_bind(&id("a"), "click", Some(&callback()));
        let before = ledger.snapshot();

        let stranger = callback();
        let observations = ledger.record_unbind(&id("a"), "click", Some(&stranger));
        assert_eq!(observations[0].outcome, Outcome::CallbackNotBound { count: 1 });
        assert_eq!(
            observations[0].log_line().as_deref(),
            Some("a >> click (was: 1, now: 1) UNBOUND however provided callback NOT PREVIOUSLY BOUND; no effect")
        );
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn unbind_at_zero_reports_nothing_to_unbind() {
        let mut ledger = Ledger::default();
        let cb = callback();
        let observations = ledger.record_unbind(&id("a"), "click", Some(&cb));
        assert_eq!(observations[0].outcome, Outcome::NothingToUnbind);
        assert_eq!(
            observations[0].log_line().as_deref(),
            Some("a >> click (was: 0, now: 0) UNBIND [nothing to unbind]")
        );
        assert_eq!(ledger.total(), 0);
        // Entries are created lazily and stay at zero.
        assert_eq!(ledger.snapshot().entries.len(), 1);
    }

    #[test]
    fn bind_then_unbind_restores_prior_state() {
        let mut ledger = Ledger::default();
        let existing = callback();
        ledger.record_bind(&id("a"), "click", Some(&existing));
        let before = ledger.snapshot();

        let cb = callback();
        ledger.record_bind(&id("a"), "click", Some(&cb));
        ledger.record_unbind(&id("a"), "click", Some(&cb));
        let after = ledger.snapshot();

        assert_eq!(after.total, before.total);
        assert_eq!(after.count("a", "click"), before.count("a", "click"));
    }

    #[test]
    fn handlerless_binds_are_only_cleared_by_unbind_all() {
        let mut ledger = Ledger::default();
        ledger.record_bind(&id("a"), "click", None);
        let observations = ledger.record_unbind(&id("a"), "click", Some(&callback()));
        assert_eq!(observations[0].outcome, Outcome::CallbackNotBound { count: 1 });

        ledger.record_unbind(&id("a"), "click", None);
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn log_lines_match_trace_format() {
        let mut ledger = Ledger::default();
        let bound = ledger.record_bind(&id("a#x"), "click", None);
        assert_eq!(
            bound[0].log_line().as_deref(),
            Some("a#x >> click (was: 0, now: 1) BOUND")
        );
        let unbound = ledger.record_unbind(&id("a#x"), "click", None);
        assert_eq!(
            unbound[0].log_line().as_deref(),
            Some("a#x >> click (was: 1, now: 0) UNBOUND")
        );
    }

    #[test]
    fn total_matches_entries_over_mixed_sequence() {
        let mut ledger = Ledger::new(["mousemove".to_string()]);
        let callbacks: Vec<Callback> = (0..3).map(|_| callback()).collect();
        let identities = [id("a"), id("b"), id("c")];
        let events = ["click", "focus blur", "mousemove click", "keyup"];

        for step in 0..120usize {
            let identity = &identities[step % identities.len()];
            let event = events[(step / 3) % events.len()];
            let cb = &callbacks[(step / 7) % callbacks.len()];
            match step % 5 {
                0 | 1 | 2 => {
                    ledger.record_bind(identity, event, Some(cb));
                }
                3 => {
                    ledger.record_unbind(identity, event, Some(cb));
                }
                _ => {
                    ledger.record_unbind(identity, event, None);
                }
            }
            assert_eq!(ledger.total(), sum_of_entries(&ledger), "step {step}");
        }
    }

    #[test]
    fn dropped_callbacks_do_not_accumulate() {
        let mut ledger = Ledger::default();
        let kept = callback();
        ledger.record_bind(&id("a"), "click", Some(&kept));
        let kept_id = ledger.snapshot().entries[0].callbacks[0];

        for _ in 0..10_000 {
            let fresh = callback();
            ledger.record_bind(&id("a"), "scroll", Some(&fresh));
            ledger.record_unbind(&id("a"), "scroll", Some(&fresh));
        }

        assert_eq!(ledger.total(), 1);
        assert!(
            ledger.callback_ids.seen.len() <= 2 * MIN_PRUNE_AT,
            "side table holds {} entries",
            ledger.callback_ids.seen.len()
        );

        // a live callback keeps its id across pruning
        let observations = ledger.record_unbind(&id("a"), "click", Some(&kept));
        assert_eq!(observations[0].outcome, Outcome::Unbound { was: 1, now: 0 });
        ledger.record_bind(&id("a"), "click", Some(&kept));
        assert_eq!(ledger.snapshot().count("a", "click"), 1);
        assert_eq!(ledger.callback_ids.lookup(&kept), Some(kept_id));
    }
}
