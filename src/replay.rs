//! Replays a scripted sequence of registrations against a monitored document.
//!
//! ```yaml
//! gesture_library: false
//! elements:
//!   - { id: link, tag: a, class: "btn btn-primary" }
//! operations:
//!   - on: { target: "#link", events: click, callback: handler }
//!   - trigger: { target: "#link", event: click }
//!   - off: { target: "#link", events: click }
//!   - stop
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::host::{Callback, Document, HostError, Selection};
use crate::monitor::{self, LedgerSnapshot, MonitorError, MonitorHandle, MonitorOptions};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse trace YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown element '{0}'")]
    UnknownElement(String),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

fn default_tag() -> String {
    String::from("div")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageElement {
    pub id: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub class: Option<String>,
    /// Id of the parent element; the body when absent.
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registration {
    pub target: String,
    pub events: String,
    #[serde(default)]
    pub callback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryPointCall {
    pub entry_point: String,
    pub target: String,
    pub events: String,
    #[serde(default)]
    pub callback: Option<String>,
}

impl EntryPointCall {
    fn registration(&self) -> Registration {
        Registration {
            target: self.target.clone(),
            events: self.events.clone(),
            callback: self.callback.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    pub target: String,
    pub event: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Removal {
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    On(Registration),
    Off(Registration),
    /// Any named entry point, e.g. `bind` or `unbind`.
    Call(EntryPointCall),
    Trigger(Trigger),
    Remove(Removal),
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    #[serde(default)]
    pub gesture_library: bool,
    #[serde(default)]
    pub elements: Vec<PageElement>,
    /// Written as single-key maps, e.g. `- on: { ... }`, or a bare `- stop`.
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub operations: Vec<Operation>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ReplayError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    #[serde(skip_serializing)]
    pub lines: Vec<String>,
    pub ledger: LedgerSnapshot,
    /// Listeners the host actually holds at the end of the replay.
    pub host_listeners: usize,
    pub invocations: BTreeMap<String, usize>,
    pub stopped: bool,
}

struct NamedCallbacks {
    callbacks: HashMap<String, Callback>,
    invocations: BTreeMap<String, Rc<Cell<usize>>>,
}

impl NamedCallbacks {
    fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            invocations: BTreeMap::new(),
        }
    }

    /// The same name always yields the same callback reference.
    fn get(&mut self, name: &str) -> Callback {
        if let Some(callback) = self.callbacks.get(name) {
            return callback.clone();
        }
        let counter = Rc::new(Cell::new(0));
        let hits = Rc::clone(&counter);
        let callback = Callback::new(move |_, event| {
            hits.set(hits.get() + 1);
            event.prevent_default();
        });
        self.invocations.insert(name.to_string(), counter);
        self.callbacks.insert(name.to_string(), callback.clone());
        callback
    }

    fn invocations(&self) -> BTreeMap<String, usize> {
        self.invocations
            .iter()
            .map(|(name, count)| (name.clone(), count.get()))
            .collect()
    }
}

fn build_page(document: &Rc<Document>, elements: &[PageElement]) -> Result<(), ReplayError> {
    for element in elements {
        let node = document.create_element(&element.tag);
        document.set_element_id(node, &element.id)?;
        if let Some(class) = &element.class {
            document.set_class_name(node, class)?;
        }
        let parent = match &element.parent {
            Some(parent) => document
                .get_element_by_id(parent)
                .ok_or_else(|| ReplayError::UnknownElement(parent.clone()))?,
            None => document.body(),
        };
        document.append_child(parent, node)?;
    }
    Ok(())
}

fn select(document: &Rc<Document>, target: &str) -> Result<Selection, ReplayError> {
    if target == "body" {
        return Ok(document.select([document.body()]));
    }
    let id = target.strip_prefix('#').unwrap_or(target);
    document
        .get_element_by_id(id)
        .map(|node| document.select([node]))
        .ok_or_else(|| ReplayError::UnknownElement(target.to_string()))
}

fn register(
    document: &Rc<Document>,
    callbacks: &mut NamedCallbacks,
    entry_point: &str,
    registration: &Registration,
) -> Result<(), ReplayError> {
    let selection = select(document, &registration.target)?;
    let callback = registration
        .callback
        .as_deref()
        .map(|name| callbacks.get(name));
    selection.call(entry_point, &registration.events, callback.as_ref());
    Ok(())
}

/// Runs `trace` under a monitor configured by `options`. Trace lines still go
/// to the configured log sink and are also collected into the report.
pub fn run(trace: &Trace, options: MonitorOptions) -> Result<ReplayReport, ReplayError> {
    let document = Document::new();
    document.set_gesture_library(trace.gesture_library);
    build_page(&document, &trace.elements)?;

    let lines = Rc::new(RefCell::new(Vec::new()));
    let collected = Rc::clone(&lines);
    let forward = Rc::clone(&options.log);
    let options = options.with_log(move |line: &str| {
        collected.borrow_mut().push(line.to_string());
        forward(line);
    });

    let mut callbacks = NamedCallbacks::new();
    let mut running: Option<MonitorHandle> = Some(monitor::start(
        &document.select([document.body()]),
        options,
    )?);
    let mut last_snapshot = None;

    for operation in &trace.operations {
        match operation {
            Operation::On(registration) => {
                register(&document, &mut callbacks, "on", registration)?
            }
            Operation::Off(registration) => {
                register(&document, &mut callbacks, "off", registration)?
            }
            Operation::Call(call) => register(
                &document,
                &mut callbacks,
                &call.entry_point,
                &call.registration(),
            )?,
            Operation::Trigger(trigger) => {
                select(&document, &trigger.target)?.trigger(&trigger.event);
            }
            Operation::Remove(removal) => select(&document, &removal.target)?.remove()?,
            Operation::Stop => {
                if let Some(handle) = running.take() {
                    last_snapshot = Some(handle.snapshot());
                    handle.stop();
                }
            }
        }
    }

    let stopped = running.is_none();
    let ledger = match running {
        Some(handle) => handle.snapshot(),
        None => last_snapshot.unwrap_or_else(|| LedgerSnapshot {
            total: 0,
            entries: Vec::new(),
        }),
    };
    info!(
        target: "listener_monitor",
        operations = trace.operations.len(),
        total = ledger.total,
        "replay finished"
    );

    let lines = lines.borrow().clone();
    Ok(ReplayReport {
        lines,
        ledger,
        host_listeners: document.total_listeners(),
        invocations: callbacks.invocations(),
        stopped,
    })
}
