use crate::{PageError, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Handle to a node in a [`Document`]. Handles stay valid after the node is
/// detached, the same way a script keeps a reference to a removed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// One child-list change, delivered to every registered observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

#[derive(Debug)]
enum NodeKind {
    Element { tag: String },
    Text,
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
}

impl NodeData {
    fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
            text: String::new(),
        }
    }

    fn text(text: &str) -> Self {
        Self {
            kind: NodeKind::Text,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
            text: text.to_string(),
        }
    }

    const fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }
}

#[derive(Default)]
struct Inner {
    nodes: Vec<NodeData>,
    observers: Vec<(ObserverId, UnboundedSender<MutationRecord>)>,
    next_observer: u64,
    click_listeners: HashMap<NodeId, Vec<UnboundedSender<NodeId>>>,
}

impl Inner {
    fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes.get(id.0).ok_or(PageError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes.get_mut(id.0).ok_or(PageError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        let node = self.node_mut(id)?;
        if node.is_element() {
            Ok(node)
        } else {
            Err(PageError::NotAnElement(id))
        }
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(data);
        NodeId(self.nodes.len() - 1)
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == Document::ROOT {
                return true;
            }
            current = self.nodes.get(node.0).and_then(|n| n.parent);
        }
        false
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(node.0).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get_mut(id.0)?.parent.take()?;
        if let Some(data) = self.nodes.get_mut(parent.0) {
            data.children.retain(|child| *child != id);
        }
        Some(parent)
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        for child in &node.children {
            out.push(*child);
            self.collect_descendants(*child, out);
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        match node.kind {
            NodeKind::Text => out.push_str(&node.text),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    fn notify(&mut self, record: MutationRecord) {
        if !self.is_connected(record.target) || self.observers.is_empty() {
            return;
        }
        self.observers
            .retain(|(_, sender)| sender.send(record.clone()).is_ok());
    }
}

/// In-memory page document: an element tree rooted at `<html>` with a
/// `<body>`, inline styles, attributes, child-list observation and click
/// dispatch.
pub struct Document {
    inner: Mutex<Inner>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    const ROOT: NodeId = NodeId(0);
    const BODY: NodeId = NodeId(1);

    pub fn new() -> Self {
        let mut inner = Inner::default();
        let root = inner.push(NodeData::element("html"));
        let body = inner.push(NodeData::element("body"));
        inner.nodes[body.0].parent = Some(root);
        inner.nodes[root.0].children.push(body);
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn root(&self) -> NodeId {
        Self::ROOT
    }

    pub const fn body(&self) -> NodeId {
        Self::BODY
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.lock().push(NodeData::element(tag))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.lock().push(NodeData::text(text))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.lock().nodes.len() > node.0
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.lock()
            .nodes
            .get(node.0)
            .is_some_and(NodeData::is_element)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.lock().is_connected(node)
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        match &self.lock().nodes.get(node.0)?.kind {
            NodeKind::Element { tag } => Some(tag.clone()),
            NodeKind::Text => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.lock().nodes.get(node.0)?.parent
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.lock()
            .nodes
            .get(node.0)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.lock().nodes.get(node.0)?.children.first().copied()
    }

    /// Every node below `node`, in document (pre-)order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.lock().collect_descendants(node, &mut out);
        out
    }

    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let inner = self.lock();
        let mut out = Vec::new();
        let mut current = inner.nodes.get(node.0).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = inner.nodes.get(parent.0).and_then(|n| n.parent);
        }
        out
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    pub fn prepend(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let first = self.first_child(parent);
        if first == Some(child) {
            return Ok(());
        }
        self.insert_before(parent, child, first)
    }

    /// Inserts `child` into `parent` before `reference`, or at the end when
    /// `reference` is `None`. A child that already has a parent is moved.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.element_mut(parent)?;
        inner.node(child)?;
        if inner.is_inclusive_ancestor(child, parent) {
            return Err(PageError::HierarchyRequest {
                parent,
                node: child,
            });
        }
        if let Some(reference) = reference {
            if inner.node(reference)?.parent != Some(parent) {
                return Err(PageError::NotAChild {
                    parent,
                    node: reference,
                });
            }
            if reference == child {
                return Ok(());
            }
        }

        if let Some(old_parent) = inner.detach(child) {
            inner.notify(MutationRecord {
                target: old_parent,
                added_nodes: Vec::new(),
                removed_nodes: vec![child],
            });
        }

        let data = inner.node_mut(parent)?;
        let position = reference
            .and_then(|r| data.children.iter().position(|c| *c == r))
            .unwrap_or(data.children.len());
        data.children.insert(position, child);
        inner.node_mut(child)?.parent = Some(parent);
        inner.notify(MutationRecord {
            target: parent,
            added_nodes: vec![child],
            removed_nodes: Vec::new(),
        });
        Ok(())
    }

    /// Detaches `node` from its parent. Returns false when it had none.
    pub fn remove(&self, node: NodeId) -> bool {
        let mut inner = self.lock();
        let Some(parent) = inner.detach(node) else {
            return false;
        };
        inner.notify(MutationRecord {
            target: parent,
            added_nodes: Vec::new(),
            removed_nodes: vec![node],
        });
        true
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.lock().nodes.get(node.0)?.attributes.get(name).cloned()
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.lock()
            .element_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<()> {
        self.lock().element_mut(node)?.attributes.remove(name);
        Ok(())
    }

    pub fn has_class(&self, node: NodeId, token: &str) -> bool {
        self.attribute(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == token))
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        self.lock().nodes.get(node.0)?.style.get(property).cloned()
    }

    /// Sets an inline style property. An empty value clears it.
    pub fn set_style(&self, node: NodeId, property: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        let style = &mut inner.element_mut(node)?.style;
        if value.is_empty() {
            style.remove(property);
        } else {
            style.insert(property.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn is_display_none(&self, node: NodeId) -> bool {
        self.style(node, "display").is_some_and(|v| v == "none")
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.lock().collect_text(node, &mut out);
        out
    }

    /// Replaces every child of `node` with a single text node. A lone text
    /// child is rewritten in place and no child-list record is emitted.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        let mut inner = self.lock();
        let lone_child = match inner.element_mut(node)?.children[..] {
            [only] => Some(only),
            _ => None,
        };
        if let Some(only) = lone_child {
            let child = inner.node_mut(only)?;
            if matches!(child.kind, NodeKind::Text) {
                child.text.clear();
                child.text.push_str(text);
                return Ok(());
            }
        }
        let removed = std::mem::take(&mut inner.element_mut(node)?.children);
        for child in &removed {
            if let Ok(data) = inner.node_mut(*child) {
                data.parent = None;
            }
        }
        let text_node = inner.push(NodeData::text(text));
        inner.node_mut(text_node)?.parent = Some(node);
        inner.node_mut(node)?.children.push(text_node);
        inner.notify(MutationRecord {
            target: node,
            added_nodes: vec![text_node],
            removed_nodes: removed,
        });
        Ok(())
    }

    /// Registers a child-list observer over the whole document.
    pub fn observe(&self, sender: UnboundedSender<MutationRecord>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        inner.observers.push((id, sender));
        debug!("mutation observer {id:?} attached");
        id
    }

    pub fn disconnect(&self, id: ObserverId) {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(observer, _)| *observer != id);
        if inner.observers.len() != before {
            debug!("mutation observer {id:?} detached");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn add_click_listener(&self, node: NodeId, sender: UnboundedSender<NodeId>) -> Result<()> {
        let mut inner = self.lock();
        inner.element_mut(node)?;
        inner.click_listeners.entry(node).or_default().push(sender);
        Ok(())
    }

    /// Dispatches a click on `node`, bubbling through its ancestors. Returns
    /// how many listeners received it.
    pub fn click(&self, node: NodeId) -> usize {
        let mut inner = self.lock();
        let mut path = vec![node];
        let mut current = inner.nodes.get(node.0).and_then(|n| n.parent);
        while let Some(parent) = current {
            path.push(parent);
            current = inner.nodes.get(parent.0).and_then(|n| n.parent);
        }

        let mut delivered = 0;
        for target in path {
            if let Some(listeners) = inner.click_listeners.get_mut(&target) {
                listeners.retain(|sender| {
                    let ok = sender.send(node).is_ok();
                    if ok {
                        delivered += 1;
                    }
                    ok
                });
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[test]
    fn insert_before_orders_children() {
        let doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        let c = doc.create_element("div");
        doc.append_child(doc.body(), a).unwrap();
        doc.append_child(doc.body(), c).unwrap();
        doc.insert_before(doc.body(), b, Some(c)).unwrap();
        assert_eq!(doc.children(doc.body()), vec![a, b, c]);
    }

    #[test]
    fn observers_see_connected_changes_only() {
        let doc = Document::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        doc.observe(tx);

        let detached = doc.create_element("div");
        let inner = doc.create_element("span");
        doc.append_child(detached, inner).unwrap();
        assert!(rx.try_recv().is_err());

        doc.append_child(doc.body(), detached).unwrap();
        let record = rx.try_recv().unwrap();
        assert_eq!(
            record,
            MutationRecord {
                target: doc.body(),
                added_nodes: vec![detached],
                removed_nodes: vec![],
            }
        );

        assert!(doc.remove(detached));
        let record = rx.try_recv().unwrap();
        assert_eq!(record.removed_nodes, vec![detached]);
        assert!(!doc.is_connected(inner));
    }

    #[test]
    fn moving_a_node_reports_removal_then_addition() {
        let doc = Document::new();
        let left = doc.create_element("div");
        let right = doc.create_element("div");
        let item = doc.create_element("p");
        doc.append_child(doc.body(), left).unwrap();
        doc.append_child(doc.body(), right).unwrap();
        doc.append_child(left, item).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = doc.observe(tx);
        doc.append_child(right, item).unwrap();
        assert_eq!(rx.try_recv().unwrap().removed_nodes, vec![item]);
        assert_eq!(rx.try_recv().unwrap().added_nodes, vec![item]);

        doc.disconnect(id);
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn cycles_are_rejected() {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(outer, inner).unwrap();
        let err = doc.append_child(inner, outer).unwrap_err();
        assert!(matches!(err, PageError::HierarchyRequest { .. }));
    }

    #[test]
    fn text_nodes_cannot_carry_attributes() {
        let doc = Document::new();
        let text = doc.create_text("hello");
        assert!(!doc.is_element(text));
        assert_eq!(
            doc.set_attribute(text, "id", "x"),
            Err(PageError::NotAnElement(text))
        );
    }

    #[test]
    fn set_text_content_replaces_children() {
        let doc = Document::new();
        let span = doc.create_element("span");
        let icon = doc.create_element("svg");
        doc.append_child(span, icon).unwrap();
        doc.set_text_content(span, "one").unwrap();
        assert_eq!(doc.parent(icon), None);
        assert_eq!(doc.text_content(span), "one");
        assert_eq!(doc.children(span).len(), 1);
    }

    #[test]
    fn set_text_content_reuses_lone_text_child() {
        let doc = Document::new();
        let span = doc.create_element("span");
        doc.append_child(doc.body(), span).unwrap();
        doc.set_text_content(span, "one").unwrap();
        let text = doc.first_child(span).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        doc.observe(tx);
        for round in 0..1_000 {
            doc.set_text_content(span, &format!("round {round}")).unwrap();
        }

        assert_eq!(doc.children(span), vec![text]);
        assert_eq!(doc.text_content(span), "round 999");
        assert!(rx.try_recv().is_err());
        assert_eq!(doc.create_text("next"), NodeId(text.0 + 1));
    }

    #[test]
    fn empty_style_value_clears_property() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_style(div, "display", "none").unwrap();
        assert!(doc.is_display_none(div));
        doc.set_style(div, "display", "").unwrap();
        assert_eq!(doc.style(div, "display"), None);
    }

    #[test]
    fn clicks_bubble_to_ancestor_listeners() {
        let doc = Document::new();
        let wrapper = doc.create_element("div");
        let button = doc.create_element("button");
        doc.append_child(wrapper, button).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        doc.add_click_listener(wrapper, tx).unwrap();
        assert_eq!(doc.click(button), 1);
        assert_eq!(rx.try_recv().unwrap(), button);
    }
}
