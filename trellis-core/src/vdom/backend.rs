//! Renderer backends and modules.
//!
//! The differ holds no host-specific logic. Everything that touches the
//! output surface goes through a [`Backend`], and everything derived from a
//! node's data payload goes through a [`Module`].

use std::fmt;

use indexmap::IndexMap;

use super::vnode::{NodeHandle, VNode};
use crate::component::Component;

/// Operations a renderer backend provides to the differ.
///
/// Methods take `&self`: backends keep their own interior state, and the
/// differ may call back into them while a component re-renders.
pub trait Backend {
    fn create_element(&self, tag: &str) -> NodeHandle;
    fn create_text(&self, text: &str) -> NodeHandle;
    fn create_comment(&self, text: &str) -> NodeHandle;

    /// Insert `node` under `parent` before `reference`, or last when there
    /// is no reference. Moving a node that is already attached relocates it.
    fn insert_before(&self, parent: NodeHandle, node: NodeHandle, reference: Option<NodeHandle>);

    fn append_child(&self, parent: NodeHandle, node: NodeHandle) {
        self.insert_before(parent, node, None);
    }

    fn remove_child(&self, parent: NodeHandle, node: NodeHandle);
    fn parent_node(&self, node: NodeHandle) -> Option<NodeHandle>;
    fn next_sibling(&self, node: NodeHandle) -> Option<NodeHandle>;
    fn set_text_content(&self, node: NodeHandle, text: &str);
    fn set_attribute(&self, node: NodeHandle, name: &str, value: &str);
    fn remove_attribute(&self, node: NodeHandle, name: &str);
}

/// What a module sees while it runs.
pub struct ModuleContext<'a> {
    pub backend: &'a dyn Backend,
    /// The component whose render produced the node.
    pub owner: Option<&'a Component>,
}

/// Synchronizes part of a node's data payload with the backend.
///
/// Hooks only run for nodes that carry data.
pub trait Module {
    fn create(&self, _cx: &ModuleContext<'_>, _vnode: &VNode) {}
    fn update(&self, _cx: &ModuleContext<'_>, _old: &VNode, _vnode: &VNode) {}
    fn destroy(&self, _cx: &ModuleContext<'_>, _vnode: &VNode) {}
}

/// What a named ref points at.
#[derive(Clone)]
pub enum RefTarget {
    Element(NodeHandle),
    Component(Component),
}

impl RefTarget {
    fn of(vnode: &VNode) -> Option<Self> {
        match vnode.as_component().and_then(|c| c.instance()) {
            Some(instance) => Some(RefTarget::Component(instance)),
            None => vnode.elm().map(RefTarget::Element),
        }
    }

    pub fn as_element(&self) -> Option<NodeHandle> {
        match self {
            RefTarget::Element(elm) => Some(*elm),
            RefTarget::Component(vm) => vm.el(),
        }
    }

    pub fn as_component(&self) -> Option<&Component> {
        match self {
            RefTarget::Component(vm) => Some(vm),
            RefTarget::Element(_) => None,
        }
    }

    pub(crate) fn same_target(&self, other: &RefTarget) -> bool {
        match (self, other) {
            (RefTarget::Element(a), RefTarget::Element(b)) => a == b,
            (RefTarget::Component(a), RefTarget::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefTarget::Element(elm) => f.debug_tuple("Element").field(elm).finish(),
            RefTarget::Component(vm) => f.debug_tuple("Component").field(&vm.name()).finish(),
        }
    }
}

/// Registers named refs on the owning component.
#[derive(Debug, Default)]
pub struct RefModule;

impl RefModule {
    fn register(cx: &ModuleContext<'_>, vnode: &VNode) {
        let (Some(owner), Some(name)) = (cx.owner, vnode.data().and_then(|d| d.ref_name.as_ref())) else {
            return;
        };
        if let Some(target) = RefTarget::of(vnode) {
            owner.register_ref(name, target);
        }
    }

    fn unregister(cx: &ModuleContext<'_>, vnode: &VNode) {
        let (Some(owner), Some(name)) = (cx.owner, vnode.data().and_then(|d| d.ref_name.as_ref())) else {
            return;
        };
        if let Some(target) = RefTarget::of(vnode) {
            owner.unregister_ref(name, &target);
        }
    }
}

impl Module for RefModule {
    fn create(&self, cx: &ModuleContext<'_>, vnode: &VNode) {
        Self::register(cx, vnode);
    }

    fn update(&self, cx: &ModuleContext<'_>, old: &VNode, vnode: &VNode) {
        let old_name = old.data().and_then(|d| d.ref_name.as_deref());
        let new_name = vnode.data().and_then(|d| d.ref_name.as_deref());
        if old_name != new_name {
            Self::unregister(cx, old);
        }
        Self::register(cx, vnode);
    }

    fn destroy(&self, cx: &ModuleContext<'_>, vnode: &VNode) {
        Self::unregister(cx, vnode);
    }
}

/// Mirrors `data.attrs` onto the backend node.
#[derive(Debug, Default)]
pub struct AttrsModule;

impl Module for AttrsModule {
    fn create(&self, cx: &ModuleContext<'_>, vnode: &VNode) {
        let (Some(elm), Some(data)) = (vnode.elm(), vnode.data()) else {
            return;
        };
        for (name, value) in &data.attrs {
            cx.backend.set_attribute(elm, name, value);
        }
    }

    fn update(&self, cx: &ModuleContext<'_>, old: &VNode, vnode: &VNode) {
        let Some(elm) = vnode.elm() else {
            return;
        };
        let empty = IndexMap::new();
        let old_attrs = old.data().map_or(&empty, |d| &d.attrs);
        let new_attrs = vnode.data().map_or(&empty, |d| &d.attrs);

        for (name, value) in new_attrs {
            if old_attrs.get(name) != Some(value) {
                cx.backend.set_attribute(elm, name, value);
            }
        }
        for name in old_attrs.keys() {
            if !new_attrs.contains_key(name) {
                cx.backend.remove_attribute(elm, name);
            }
        }
    }
}
