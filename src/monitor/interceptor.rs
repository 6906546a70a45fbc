use std::collections::HashSet;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::MonitorError;
use crate::host::{Document, EntryPoint, HostError, ListenerCall, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bind,
    Unbind,
}

/// Receives every registration call seen by an installed [`Interceptor`],
/// before the original entry point runs. Must not panic or fail.
pub trait RegistrationObserver {
    fn observe(&self, document: &Document, direction: Direction, nodes: &[NodeId], call: &ListenerCall);
}

struct Captured {
    name: String,
    original: EntryPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Installed,
}

/// Wraps named registration entry points and restores them on uninstall.
///
/// The captured originals are owned here, not in any shared table. An entry
/// point can be wrapped by one installation at a time; the host refuses a
/// second one.
pub struct Interceptor {
    captured: Vec<Captured>,
    state: State,
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor {
    pub fn new() -> Self {
        Self {
            captured: Vec::new(),
            state: State::Idle,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.state == State::Installed
    }

    /// Names currently wrapped, in install order.
    pub fn wrapped(&self) -> Vec<&str> {
        self.captured.iter().map(|c| c.name.as_str()).collect()
    }

    /// Wraps every bind and unbind entry point. Either all names are wrapped
    /// or, on error, none are.
    pub fn install(
        &mut self,
        document: &Document,
        bind_points: &[String],
        unbind_points: &[String],
        observer: Weak<dyn RegistrationObserver>,
    ) -> Result<(), MonitorError> {
        if self.state == State::Installed {
            return Err(MonitorError::AlreadyInstalled);
        }
        if bind_points.is_empty() && unbind_points.is_empty() {
            return Err(MonitorError::NoEntryPoints);
        }

        let mut seen = HashSet::new();
        let requested = bind_points
            .iter()
            .map(|name| (name, Direction::Bind))
            .chain(unbind_points.iter().map(|name| (name, Direction::Unbind)));
        let mut plan = Vec::new();
        for (name, direction) in requested {
            if !seen.insert(name.as_str()) {
                return Err(MonitorError::DuplicateEntryPoint(name.clone()));
            }
            plan.push((name, direction));
        }

        for (name, direction) in plan {
            if let Err(err) = self.wrap(document, name, direction, Weak::clone(&observer)) {
                self.revert(document);
                return Err(err);
            }
        }

        self.state = State::Installed;
        debug!(target: "listener_monitor", wrapped = ?self.wrapped(), "interceptor installed");
        Ok(())
    }

    fn wrap(
        &mut self,
        document: &Document,
        name: &str,
        direction: Direction,
        observer: Weak<dyn RegistrationObserver>,
    ) -> Result<(), MonitorError> {
        let original = document
            .entry_points()
            .intercept(name, |original| {
                let wrapped: EntryPoint =
                    Rc::new(move |document: &Document, nodes: &[NodeId], call: &ListenerCall| {
                        if let Some(observer) = observer.upgrade() {
                            observer.observe(document, direction, nodes, call);
                        }
                        original(document, nodes, call)
                    });
                wrapped
            })
            .map_err(|err| match err {
                HostError::UnknownEntryPoint(name) => MonitorError::UnknownEntryPoint(name),
                HostError::AlreadyIntercepted(name) => MonitorError::EntryPointBusy(name),
                other => MonitorError::Host(other),
            })?;

        self.captured.push(Captured {
            name: name.to_string(),
            original,
        });
        Ok(())
    }

    fn revert(&mut self, document: &Document) {
        for Captured { name, original } in self.captured.drain(..).rev() {
            if let Err(err) = document.entry_points().restore(&name, original) {
                warn!(target: "listener_monitor", error = %err, "failed to restore entry point");
            }
        }
    }

    /// Puts every original entry point back. Returns `false` (and does nothing)
    /// when there is no active installation, so repeated calls are harmless.
    pub fn uninstall(&mut self, document: &Document) -> bool {
        if self.state != State::Installed {
            return false;
        }
        self.revert(document);
        self.state = State::Idle;
        debug!(target: "listener_monitor", "interceptor uninstalled");
        true
    }
}
