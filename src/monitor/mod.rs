//! Listener-leak monitor: counts bound listeners per element and event type,
//! and mirrors the total into an on-page overlay.

mod config;
mod identity;
mod interceptor;
mod ledger;
mod reporter;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

pub use config::{
    ConfigError, LogSink, MonitorOptions, MonitorOverrides, OneOrMany, VisualizerStyle,
    DEFAULT_BIND, DEFAULT_IGNORE_EVENTS, DEFAULT_UNBIND,
};
pub use identity::{default_identity, ElementIdentity, IdentityFn, IdentityPolicy, EMPTY_COLLECTION};
pub use interceptor::{Direction, Interceptor, RegistrationObserver};
pub use ledger::{CallbackId, Ledger, LedgerSnapshot, Observation, Outcome, SnapshotEntry};
pub use reporter::{css_color, gradient, VisualReporter};

use crate::host::{Document, HostError, ListenerCall, NodeId, Selection};

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no event framework is available in this document")]
    HostUnavailable,
    #[error("no bind or unbind entry points configured")]
    NoEntryPoints,
    #[error("unknown entry point '{0}'")]
    UnknownEntryPoint(String),
    #[error("entry point '{0}' is configured more than once")]
    DuplicateEntryPoint(String),
    #[error("entry point '{0}' is already being monitored")]
    EntryPointBusy(String),
    #[error("interceptor is already installed")]
    AlreadyInstalled,
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

struct MonitorState {
    resolver: identity::IdentityResolver,
    ledger: Ledger,
    reporter: VisualReporter,
}

struct MonitorCore {
    state: RefCell<MonitorState>,
    log: LogSink,
}

impl RegistrationObserver for MonitorCore {
    fn observe(&self, document: &Document, direction: Direction, nodes: &[NodeId], call: &ListenerCall) {
        let lines = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                warn!(
                    target: "listener_monitor",
                    events = %call.events,
                    "registration issued while the monitor was busy; not counted"
                );
                return;
            };
            let MonitorState {
                resolver,
                ledger,
                reporter,
            } = &mut *state;

            let identity = resolver.resolve(document, nodes);
            let observations = match direction {
                Direction::Bind => ledger.record_bind(&identity, &call.events, call.callback.as_ref()),
                Direction::Unbind => {
                    ledger.record_unbind(&identity, &call.events, call.callback.as_ref())
                }
            };

            let mut lines = Vec::with_capacity(observations.len());
            for observation in &observations {
                match (direction, observation.outcome) {
                    (_, Outcome::Ignored) => {
                        debug!(
                            target: "listener_monitor",
                            identity = %observation.identity,
                            event = %observation.event,
                            "ignored event type"
                        );
                    }
                    (Direction::Bind, _) => reporter.add_marker(document, observation.total),
                    (Direction::Unbind, outcome) => {
                        reporter.remove_markers(document, outcome.removed(), observation.total)
                    }
                }
                lines.extend(observation.log_line());
            }
            lines
        };

        for line in lines {
            (self.log)(&line);
        }
    }
}

/// A running monitor. Stops (restoring the entry points and removing the
/// overlay) on [`MonitorHandle::stop`], [`stop`], or drop.
pub struct MonitorHandle {
    id: u64,
    document: Rc<Document>,
    core: Rc<MonitorCore>,
    interceptor: Interceptor,
    options: MonitorOptions,
    visualizer: NodeId,
    active: bool,
}

/// Starts monitoring registrations on `scope`'s document; the overlay is
/// appended to the first element of `scope`.
pub fn start(scope: &Selection, options: MonitorOptions) -> Result<MonitorHandle, MonitorError> {
    let document = Rc::clone(scope.document());
    if document.entry_points().is_empty() {
        return Err(MonitorError::HostUnavailable);
    }

    let id = NEXT_MONITOR_ID.fetch_add(1, Ordering::SeqCst);
    let ignore_events = options.effective_ignore_events(document.has_gesture_library());
    let reporter = VisualReporter::attach(&document, scope.first(), &options.visualizer)?;
    let visualizer = reporter.visualizer();

    let core = Rc::new(MonitorCore {
        state: RefCell::new(MonitorState {
            resolver: identity::IdentityResolver::new(options.identity.clone(), id),
            ledger: Ledger::new(ignore_events),
            reporter,
        }),
        log: Rc::clone(&options.log),
    });

    let observer: Rc<dyn RegistrationObserver> = core.clone();
    let observer: Weak<dyn RegistrationObserver> = Rc::downgrade(&observer);
    let mut interceptor = Interceptor::new();
    if let Err(err) = interceptor.install(&document, &options.bind, &options.unbind, observer) {
        core.state.borrow().reporter.detach(&document);
        return Err(err);
    }

    info!(
        target: "listener_monitor",
        monitor = id,
        bind = ?options.bind,
        unbind = ?options.unbind,
        "listener monitor started"
    );

    Ok(MonitorHandle {
        id,
        document,
        core,
        interceptor,
        options,
        visualizer,
        active: true,
    })
}

/// Stops `handle`; equivalent to [`MonitorHandle::stop`].
pub fn stop(handle: MonitorHandle) {
    handle.stop();
}

impl MonitorHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }

    /// Root node of the overlay.
    pub fn visualizer(&self) -> NodeId {
        self.visualizer
    }

    pub fn total(&self) -> usize {
        self.core.state.borrow().ledger.total()
    }

    pub fn count(&self, identity: &str, event: &str) -> usize {
        self.core.state.borrow().ledger.count(identity, event)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.core.state.borrow().ledger.snapshot()
    }

    /// Text of the overlay's count line, e.g. `"total: 3"`.
    pub fn count_text(&self) -> String {
        let style = &self.options.visualizer;
        self.document
            .find_by_class(self.visualizer, &style.count_class)
            .first()
            .map(|&node| self.document.text(node))
            .unwrap_or_default()
    }

    /// Marker elements currently shown in the overlay.
    pub fn markers(&self) -> Vec<NodeId> {
        self.core.state.borrow().reporter.markers(&self.document)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.interceptor.uninstall(&self.document);

        let mut state = self.core.state.borrow_mut();
        state.reporter.detach(&self.document);
        state.resolver.forget(&self.document);
        info!(
            target: "listener_monitor",
            monitor = self.id,
            total = state.ledger.total(),
            "listener monitor stopped"
        );
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
