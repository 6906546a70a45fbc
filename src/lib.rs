//! Event-listener leak monitoring for a small in-process DOM.
//!
//! [`monitor::start`] wraps the document's registration entry points, keeps a
//! per-element, per-event-type count of bound listeners and renders the
//! running total as an overlay inside the page.

pub mod host;
pub mod monitor;
pub mod replay;

// Re-export commonly used types
pub use host::{Callback, Document, Selection};
pub use monitor::{start, stop, MonitorError, MonitorHandle, MonitorOptions, MonitorOverrides};
