//! In-process DOM host: an element arena, a listener store, event dispatch
//! and the named registration entry points that instrumentation wraps.

mod dom;
mod entry_points;
mod listeners;

pub use dom::{Document, HostError, NodeId, Selection};
pub use entry_points::{EntryPoint, EntryPointTable, ListenerCall};
pub use listeners::{Callback, Event, WeakCallback};
