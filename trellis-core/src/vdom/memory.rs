//! In-memory backend.
//!
//! Keeps a node arena and records every operation the differ performs, so
//! tests and benchmarks can assert on exactly what a patch did.

use std::cell::RefCell;
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::Serialize;

use super::backend::Backend;
use super::vnode::NodeHandle;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    CreateElement { node: u64, tag: String },
    CreateText { node: u64, text: String },
    CreateComment { node: u64, text: String },
    /// `moved` is true when the node was already attached somewhere.
    Insert { parent: u64, node: u64, moved: bool },
    Remove { parent: u64, node: u64 },
    SetText { node: u64, text: String },
    SetAttribute { node: u64, name: String, value: String },
    RemoveAttribute { node: u64, name: String },
}

impl Op {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Op::CreateElement { .. } | Op::CreateText { .. } | Op::CreateComment { .. }
        )
    }

    /// A relocation of an already attached node.
    pub fn is_move(&self) -> bool {
        matches!(self, Op::Insert { moved: true, .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Op::Remove { .. })
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(String),
    Text,
    Comment,
}

#[derive(Debug, Clone)]
struct MemNode {
    kind: NodeKind,
    text: String,
    attrs: IndexMap<String, String>,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: Vec<MemNode>,
    ops: Vec<Op>,
}

impl MemoryState {
    fn node(&self, handle: NodeHandle) -> Option<&MemNode> {
        self.nodes.get(handle.raw() as usize)
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut MemNode> {
        self.nodes.get_mut(handle.raw() as usize)
    }

    fn alloc(&mut self, kind: NodeKind, text: &str) -> NodeHandle {
        let handle = NodeHandle::new(self.nodes.len() as u64);
        self.nodes.push(MemNode {
            kind,
            text: text.to_string(),
            attrs: IndexMap::new(),
            parent: None,
            children: Vec::new(),
        });
        handle
    }

    fn detach(&mut self, node: NodeHandle) -> bool {
        let Some(parent) = self.node(node).and_then(|n| n.parent) else {
            return false;
        };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|child| *child != node);
        }
        if let Some(n) = self.node_mut(node) {
            n.parent = None;
        }
        true
    }
}

/// A backend that renders into memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RefCell<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation recorded so far.
    pub fn ops(&self) -> Vec<Op> {
        self.state.borrow().ops.clone()
    }

    /// Take and clear the recorded operations.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut self.state.borrow_mut().ops)
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    pub fn children(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.state
            .borrow()
            .node(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeHandle) -> Option<String> {
        match &self.state.borrow().node(node)?.kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn text(&self, node: NodeHandle) -> Option<String> {
        self.state.borrow().node(node).map(|n| n.text.clone())
    }

    pub fn attribute(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.state.borrow().node(node)?.attrs.get(name).cloned()
    }

    /// Render a subtree as markup.
    pub fn serialize(&self, node: NodeHandle) -> String {
        let mut out = String::new();
        self.write_node(&self.state.borrow(), node, &mut out);
        out
    }

    fn write_node(&self, state: &MemoryState, handle: NodeHandle, out: &mut String) {
        let Some(node) = state.node(handle) else {
            return;
        };
        match &node.kind {
            NodeKind::Text => out.push_str(&node.text),
            NodeKind::Comment => {
                let _ = write!(out, "<!--{}-->", node.text);
            }
            NodeKind::Element(tag) => {
                let _ = write!(out, "<{tag}");
                for (name, value) in &node.attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                if node.children.is_empty() {
                    out.push_str(&node.text);
                }
                for child in &node.children {
                    self.write_node(state, *child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn create_element(&self, tag: &str) -> NodeHandle {
        let mut state = self.state.borrow_mut();
        let node = state.alloc(NodeKind::Element(tag.to_string()), "");
        state.ops.push(Op::CreateElement {
            node: node.raw(),
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&self, text: &str) -> NodeHandle {
        let mut state = self.state.borrow_mut();
        let node = state.alloc(NodeKind::Text, text);
        state.ops.push(Op::CreateText {
            node: node.raw(),
            text: text.to_string(),
        });
        node
    }

    fn create_comment(&self, text: &str) -> NodeHandle {
        let mut state = self.state.borrow_mut();
        let node = state.alloc(NodeKind::Comment, text);
        state.ops.push(Op::CreateComment {
            node: node.raw(),
            text: text.to_string(),
        });
        node
    }

    fn insert_before(&self, parent: NodeHandle, node: NodeHandle, reference: Option<NodeHandle>) {
        let mut state = self.state.borrow_mut();
        let moved = state.detach(node);
        let Some(p) = state.node_mut(parent) else {
            return;
        };
        let index = reference
            .and_then(|r| p.children.iter().position(|child| *child == r))
            .unwrap_or(p.children.len());
        p.children.insert(index, node);
        if let Some(n) = state.node_mut(node) {
            n.parent = Some(parent);
        }
        state.ops.push(Op::Insert {
            parent: parent.raw(),
            node: node.raw(),
            moved,
        });
    }

    fn remove_child(&self, parent: NodeHandle, node: NodeHandle) {
        let mut state = self.state.borrow_mut();
        let attached = state.node(node).and_then(|n| n.parent) == Some(parent);
        if attached {
            state.detach(node);
        }
        state.ops.push(Op::Remove {
            parent: parent.raw(),
            node: node.raw(),
        });
    }

    fn parent_node(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.state.borrow().node(node)?.parent
    }

    fn next_sibling(&self, node: NodeHandle) -> Option<NodeHandle> {
        let state = self.state.borrow();
        let parent = state.node(node)?.parent?;
        let siblings = &state.node(parent)?.children;
        let index = siblings.iter().position(|child| *child == node)?;
        siblings.get(index + 1).copied()
    }

    fn set_text_content(&self, node: NodeHandle, text: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(n) = state.node_mut(node) {
            n.text = text.to_string();
        }
        state.ops.push(Op::SetText {
            node: node.raw(),
            text: text.to_string(),
        });
    }

    fn set_attribute(&self, node: NodeHandle, name: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(n) = state.node_mut(node) {
            n.attrs.insert(name.to_string(), value.to_string());
        }
        state.ops.push(Op::SetAttribute {
            node: node.raw(),
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn remove_attribute(&self, node: NodeHandle, name: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(n) = state.node_mut(node) {
            n.attrs.shift_remove(name);
        }
        state.ops.push(Op::RemoveAttribute {
            node: node.raw(),
            name: name.to_string(),
        });
    }
}
