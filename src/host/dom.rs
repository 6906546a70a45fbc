use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use html_escape::{encode_double_quoted_attribute, encode_text};
use thiserror::Error;
use tracing::{trace, warn};

use super::entry_points::{EntryPoint, EntryPointTable, ListenerCall};
use super::listeners::{Callback, Event, ListenerStore};

pub type NodeId = usize;

const ROOT: NodeId = 0;
const BODY: NodeId = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {child} cannot be inserted under its own descendant {parent}")]
    HierarchyRequest { parent: NodeId, child: NodeId },
    #[error("entry point '{0}' is not registered")]
    UnknownEntryPoint(String),
    #[error("entry point '{0}' is already intercepted")]
    AlreadyIntercepted(String),
    #[error("entry point '{0}' is not intercepted")]
    NotIntercepted(String),
}

#[derive(Debug, Clone, Default)]
struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: HashMap<String, String>,
}

impl Node {
    fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }
}

/// Minimal single-threaded document with a jQuery-flavoured event framework.
///
/// Elements live in an arena and are addressed by [`NodeId`]. Listener
/// registration goes through named entry points (`on`, `off`, `bind`,
/// `unbind`) held in an [`EntryPointTable`], which is what instrumentation
/// hooks into.
#[derive(Debug)]
pub struct Document {
    nodes: RefCell<Vec<Node>>,
    listeners: RefCell<ListenerStore>,
    entry_points: EntryPointTable,
    gesture_library: Cell<bool>,
}

impl Document {
    /// A document with `<html><body>` and the event framework installed.
    pub fn new() -> Rc<Self> {
        let document = Self::without_event_framework();
        document.install_event_framework();
        document
    }

    /// A bare document: no registration entry points are available.
    pub fn without_event_framework() -> Rc<Self> {
        let mut html = Node::element("html");
        html.children.push(BODY);
        let mut body = Node::element("body");
        body.parent = Some(ROOT);

        Rc::new(Self {
            nodes: RefCell::new(vec![html, body]),
            listeners: RefCell::new(ListenerStore::default()),
            entry_points: EntryPointTable::default(),
            gesture_library: Cell::new(false),
        })
    }

    fn install_event_framework(&self) {
        let bind: EntryPoint = Rc::new(|document: &Document, nodes: &[NodeId], call: &ListenerCall| {
            let Some(callback) = call.callback.as_ref() else {
                trace!(target: "host", events = %call.events, "bind without handler ignored");
                return;
            };
            let mut listeners = document.listeners.borrow_mut();
            for &node in nodes {
                for event in call.event_types() {
                    listeners.add(node, event, callback.clone());
                }
            }
        });
        let unbind: EntryPoint = Rc::new(|document: &Document, nodes: &[NodeId], call: &ListenerCall| {
            let mut listeners = document.listeners.borrow_mut();
            for &node in nodes {
                for event in call.event_types() {
                    listeners.remove(node, event, call.callback.as_ref());
                }
            }
        });

        self.entry_points.register("on", Rc::clone(&bind));
        self.entry_points.register("bind", bind);
        self.entry_points.register("off", Rc::clone(&unbind));
        self.entry_points.register("unbind", unbind);
    }

    pub fn body(&self) -> NodeId {
        BODY
    }

    pub fn entry_points(&self) -> &EntryPointTable {
        &self.entry_points
    }

    /// Whether a gesture library that emits duplicate touch/mouse events is
    /// loaded on this page.
    pub fn has_gesture_library(&self) -> bool {
        self.gesture_library.get()
    }

    pub fn set_gesture_library(&self, loaded: bool) {
        self.gesture_library.set(loaded);
    }

    /// Invoke the named registration entry point. The table borrow is released
    /// before the call so entry points may use the document freely.
    pub fn call_entry_point(
        &self,
        name: &str,
        nodes: &[NodeId],
        call: &ListenerCall,
    ) -> Result<(), HostError> {
        let entry_point = self
            .entry_points
            .get(name)
            .ok_or_else(|| HostError::UnknownEntryPoint(name.to_string()))?;
        entry_point(self, nodes, call);
        Ok(())
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node::element(tag));
        nodes.len() - 1
    }

    fn with_node<T>(&self, node: NodeId, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.nodes.borrow().get(node).map(f)
    }

    fn with_node_mut<T>(&self, node: NodeId, f: impl FnOnce(&mut Node) -> T) -> Result<T, HostError> {
        self.nodes
            .borrow_mut()
            .get_mut(node)
            .map(f)
            .ok_or(HostError::UnknownNode(node))
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        node < self.nodes.borrow().len()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |n| n.tag.clone())
    }

    pub fn element_id(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |n| n.id.clone()).flatten()
    }

    pub fn set_element_id(&self, node: NodeId, id: &str) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            n.id = (!id.is_empty()).then(|| id.to_string());
        })
    }

    pub fn class_list(&self, node: NodeId) -> Vec<String> {
        self.with_node(node, |n| n.classes.clone()).unwrap_or_default()
    }

    /// Replace the class list from a `class` attribute value.
    pub fn set_class_name(&self, node: NodeId, value: &str) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            n.classes = value.split_whitespace().map(str::to_string).collect();
        })
    }

    pub fn add_class(&self, node: NodeId, class: &str) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            if !n.classes.iter().any(|c| c == class) {
                n.classes.push(class.to_string());
            }
        })
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.with_node(node, |n| n.classes.iter().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.with_node(node, |n| n.attributes.get(name).cloned())
            .flatten()
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError> {
        match name {
            "id" => self.set_element_id(node, value),
            "class" => self.set_class_name(node, value),
            _ => self.with_node_mut(node, |n| {
                n.attributes.insert(name.to_string(), value.to_string());
            }),
        }
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        self.with_node(node, |n| n.style.get(property).cloned())
            .flatten()
    }

    pub fn set_style(&self, node: NodeId, property: &str, value: &str) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            n.style.insert(property.to_string(), value.to_string());
        })
    }

    pub fn set_styles<'a>(
        &self,
        node: NodeId,
        styles: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            for (property, value) in styles {
                n.style.insert(property.clone(), value.clone());
            }
        })
    }

    /// Replaces the node's children with a single run of text.
    pub fn set_text(&self, node: NodeId, text: &str) -> Result<(), HostError> {
        let orphaned = self.with_node_mut(node, |n| {
            n.text = text.to_string();
            std::mem::take(&mut n.children)
        })?;
        let mut nodes = self.nodes.borrow_mut();
        for child in orphaned {
            if let Some(child) = nodes.get_mut(child) {
                child.parent = None;
            }
        }
        Ok(())
    }

    /// Concatenated text of the node and its descendants.
    pub fn text(&self, node: NodeId) -> String {
        let nodes = self.nodes.borrow();
        let mut out = String::new();
        collect_text(&nodes, node, &mut out);
        out
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.with_node(node, |n| n.parent).flatten()
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.with_node(node, |n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.insert_child(parent, child, None)
    }

    pub fn prepend_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.insert_child(parent, child, Some(0))
    }

    fn insert_child(&self, parent: NodeId, child: NodeId, at: Option<usize>) -> Result<(), HostError> {
        if !self.contains_node(parent) {
            return Err(HostError::UnknownNode(parent));
        }
        if !self.contains_node(child) {
            return Err(HostError::UnknownNode(child));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(HostError::HierarchyRequest { parent, child });
        }

        self.detach(child)?;
        let mut nodes = self.nodes.borrow_mut();
        nodes[child].parent = Some(parent);
        let siblings = &mut nodes[parent].children;
        match at {
            Some(index) => siblings.insert(index.min(siblings.len()), child),
            None => siblings.push(child),
        }
        Ok(())
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let nodes = self.nodes.borrow();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Removes the node from its parent; the subtree stays in the arena.
    pub fn detach(&self, node: NodeId) -> Result<(), HostError> {
        let mut nodes = self.nodes.borrow_mut();
        let parent = nodes
            .get_mut(node)
            .ok_or(HostError::UnknownNode(node))?
            .parent
            .take();
        if let Some(parent) = parent {
            nodes[parent].children.retain(|&c| c != node);
        }
        Ok(())
    }

    /// Detaches the node and drops every listener registered on its subtree.
    pub fn remove(&self, node: NodeId) -> Result<(), HostError> {
        self.detach(node)?;
        let subtree = self.descendants(node);
        let mut listeners = self.listeners.borrow_mut();
        listeners.forget_node(node);
        for id in subtree {
            listeners.forget_node(id);
        }
        Ok(())
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.is_inclusive_ancestor(ROOT, node)
    }

    /// Descendants of `node` in document order, excluding the node itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes.borrow();
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = nodes
            .get(node)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(nodes[id].children.iter().rev().copied());
        }
        out
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(ROOT)
            .into_iter()
            .find(|&node| self.element_id(node).as_deref() == Some(id))
    }

    pub fn find_by_class(&self, within: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(within)
            .into_iter()
            .filter(|&node| self.has_class(node, class))
            .collect()
    }

    /// Out-of-band per-element data, invisible to markup and application state.
    pub fn annotation(&self, node: NodeId, key: &str) -> Option<String> {
        self.with_node(node, |n| n.data.get(key).cloned()).flatten()
    }

    pub fn set_annotation(&self, node: NodeId, key: &str, value: &str) -> Result<(), HostError> {
        self.with_node_mut(node, |n| {
            n.data.insert(key.to_string(), value.to_string());
        })
    }

    pub fn remove_annotation(&self, node: NodeId, key: &str) -> Option<String> {
        self.with_node_mut(node, |n| n.data.remove(key)).ok().flatten()
    }

    pub fn listener_count(&self, node: NodeId, event: &str) -> usize {
        self.listeners.borrow().count(node, event)
    }

    /// Number of listeners registered across the whole document.
    pub fn total_listeners(&self) -> usize {
        self.listeners.borrow().total()
    }

    /// Dispatches `event_type` at `target`, bubbling up through its ancestors.
    /// Listeners are snapshotted per node before they run, so they may
    /// register or remove listeners themselves.
    pub fn dispatch(&self, target: NodeId, event_type: &str) -> Event {
        let mut event = Event::new(event_type, target);
        let mut current = Some(target);
        while let Some(node) = current {
            let listeners = self.listeners.borrow().get(node, event_type);
            event.current_target = node;
            for listener in listeners {
                listener.call(self, &mut event);
            }
            if event.propagation_stopped {
                break;
            }
            current = self.parent(node);
        }
        event.current_target = target;
        event
    }

    /// Serialises the subtree rooted at `node` for debugging and assertions.
    pub fn outer_html(&self, node: NodeId) -> String {
        let nodes = self.nodes.borrow();
        let mut out = String::new();
        if node < nodes.len() {
            serialize(&nodes, node, &mut out);
        }
        out
    }

    pub fn select(self: &Rc<Self>, nodes: impl IntoIterator<Item = NodeId>) -> Selection {
        Selection {
            document: Rc::clone(self),
            nodes: nodes.into_iter().collect(),
        }
    }
}

fn collect_text(nodes: &[Node], node: NodeId, out: &mut String) {
    let Some(n) = nodes.get(node) else {
        return;
    };
    out.push_str(&n.text);
    for &child in &n.children {
        collect_text(nodes, child, out);
    }
}

fn serialize(nodes: &[Node], node: NodeId, out: &mut String) {
    let n = &nodes[node];
    out.push('<');
    out.push_str(&n.tag);
    if let Some(id) = &n.id {
        out.push_str(&format!(" id=\"{}\"", encode_double_quoted_attribute(id)));
    }
    if !n.classes.is_empty() {
        let classes = n.classes.join(" ");
        out.push_str(&format!(" class=\"{}\"", encode_double_quoted_attribute(&classes)));
    }
    for (name, value) in &n.attributes {
        out.push_str(&format!(" {name}=\"{}\"", encode_double_quoted_attribute(value)));
    }
    if !n.style.is_empty() {
        let style = n
            .style
            .iter()
            .map(|(property, value)| format!("{property}: {value}"))
            .collect::<Vec<_>>()
            .join("; ");
        out.push_str(&format!(" style=\"{}\"", encode_double_quoted_attribute(&style)));
    }
    out.push('>');
    out.push_str(&encode_text(&n.text));
    for &child in &n.children {
        serialize(nodes, child, out);
    }
    out.push_str(&format!("</{}>", n.tag));
}

/// An ordered set of elements from one document, in the style of a jQuery
/// collection. Registration methods route through the document's named entry
/// points, so instrumentation sees every call.
#[derive(Debug, Clone)]
pub struct Selection {
    document: Rc<Document>,
    nodes: Vec<NodeId>,
}

impl Selection {
    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Calls the named registration entry point with this selection.
    pub fn call(&self, entry_point: &str, events: &str, callback: Option<&Callback>) -> &Self {
        let call = ListenerCall::new(events, callback);
        if let Err(err) = self.document.call_entry_point(entry_point, &self.nodes, &call) {
            warn!(target: "host", error = %err, "registration call failed");
        }
        self
    }

    pub fn on(&self, events: &str, callback: &Callback) -> &Self {
        self.call("on", events, Some(callback))
    }

    pub fn off(&self, events: &str, callback: Option<&Callback>) -> &Self {
        self.call("off", events, callback)
    }

    pub fn bind(&self, events: &str, callback: &Callback) -> &Self {
        self.call("bind", events, Some(callback))
    }

    pub fn unbind(&self, events: &str, callback: Option<&Callback>) -> &Self {
        self.call("unbind", events, callback)
    }

    pub fn trigger(&self, event_type: &str) -> &Self {
        for &node in &self.nodes {
            self.document.dispatch(node, event_type);
        }
        self
    }

    pub fn remove(&self) -> Result<(), HostError> {
        for &node in &self.nodes {
            self.document.remove(node)?;
        }
        Ok(())
    }
}
