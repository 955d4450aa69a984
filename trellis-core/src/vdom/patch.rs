//! Tree Differ
//!
//! The patcher turns the difference between two vnode trees into backend
//! operations.
//!
//! # Algorithm
//!
//! 1. Two nodes are the *same* if their keys match and their kind, tag,
//!    data presence and (for `<input>`) input type agree. Same nodes are
//!    patched in place; anything else is destroyed and recreated.
//!
//! 2. Children are reconciled with four pointers: old start, old end, new
//!    start, new end. Each step tries start/start, end/end, start/end (node
//!    moved right) and end/start (node moved left). A hit patches in place
//!    and costs at most one relocation.
//!
//! 3. When none of the four match, the new start node is looked up in a map
//!    from key to old index, built once per pass on first use. Unkeyed
//!    nodes fall back to a linear scan of the live old window. A hit is
//!    relocated; a miss is created.
//!
//! 4. Once one side is exhausted, the remaining new nodes are inserted in
//!    bulk, or the remaining old nodes removed in bulk.
//!
//! Component placeholders are never diffed here. Patching one hands the new
//! props and listeners to the child instance, which re-renders through the
//! scheduler if anything it depends on changed.
//!
//! Insert hooks (and with them `mounted`) are deferred until the whole tree
//! is attached.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::backend::{AttrsModule, Backend, Module, ModuleContext, RefModule};
use super::vnode::{ComponentVNode, InsertHook, Key, NodeHandle, VNode, VNodeKind};
use crate::component::{lifecycle, CacheKey, Component};
use crate::error::warn;

/// Input types that can be patched into one another.
const TEXT_INPUT_TYPES: [&str; 7] = ["text", "number", "password", "search", "email", "tel", "url"];

/// A deferred insert notification.
pub(crate) enum Inserted {
    Element {
        hook: InsertHook,
        elm: NodeHandle,
    },
    Component {
        instance: Component,
        owner: Option<Component>,
        keep_alive: bool,
    },
}

struct PatchCx<'a> {
    owner: Option<&'a Component>,
    inserted: Vec<Inserted>,
    /// Uids of kept-alive instances placed during this pass.
    claimed: HashSet<u64>,
}

/// Applies vnode trees to a [`Backend`].
pub struct Patcher {
    backend: Rc<dyn Backend>,
    modules: Vec<Box<dyn Module>>,
}

impl Patcher {
    /// A patcher with the built-in attribute and ref modules.
    pub fn new(backend: Rc<dyn Backend>) -> Rc<Self> {
        Self::with_modules(backend, vec![Box::new(AttrsModule), Box::new(RefModule)])
    }

    pub fn with_modules(backend: Rc<dyn Backend>, modules: Vec<Box<dyn Module>>) -> Rc<Self> {
        Rc::new(Self { backend, modules })
    }

    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.backend
    }

    /// Build `vnode` and insert it under `parent` before `reference`.
    pub fn create(self: &Rc<Self>, vnode: &VNode, parent: Option<NodeHandle>, reference: Option<NodeHandle>) {
        let mut cx = PatchCx {
            owner: None,
            inserted: Vec::new(),
            claimed: HashSet::new(),
        };
        self.create_elm(&mut cx, vnode, parent, reference);
        invoke_insert_hooks(cx.inserted);
    }

    /// Patch `old` into `vnode`. With no old tree, `vnode` is built detached.
    pub fn patch(self: &Rc<Self>, old: Option<&VNode>, vnode: &VNode) {
        let queue = self.patch_with_owner(None, old, vnode);
        invoke_insert_hooks(queue);
    }

    /// Run destroy hooks over a tree without touching the backend.
    pub fn destroy(self: &Rc<Self>, vnode: &VNode) {
        self.destroy_with_owner(None, vnode);
    }

    pub(crate) fn destroy_with_owner(self: &Rc<Self>, owner: Option<&Component>, vnode: &VNode) {
        let mut cx = PatchCx {
            owner,
            inserted: Vec::new(),
            claimed: HashSet::new(),
        };
        self.invoke_destroy_hook(&mut cx, vnode);
    }

    /// Patch and hand back the insert queue instead of running it.
    pub(crate) fn patch_with_owner(
        self: &Rc<Self>,
        owner: Option<&Component>,
        old: Option<&VNode>,
        vnode: &VNode,
    ) -> Vec<Inserted> {
        let mut cx = PatchCx {
            owner,
            inserted: Vec::new(),
            claimed: HashSet::new(),
        };
        match old {
            None => self.create_elm(&mut cx, vnode, None, None),
            Some(old) if same_vnode(old, vnode) => self.patch_vnode(&mut cx, old, vnode),
            Some(old) => {
                let old_elm = old.elm();
                let parent = old_elm.and_then(|elm| self.backend.parent_node(elm));
                let reference = old_elm.and_then(|elm| self.backend.next_sibling(elm));
                self.create_elm(&mut cx, vnode, parent, reference);
                match parent {
                    Some(parent) => self.remove_vnodes(&mut cx, parent, std::iter::once(old)),
                    None => self.invoke_destroy_hook(&mut cx, old),
                }
            }
        }
        cx.inserted
    }

    fn module_cx<'a>(&'a self, cx: &PatchCx<'a>) -> ModuleContext<'a> {
        ModuleContext {
            backend: &*self.backend,
            owner: cx.owner,
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    fn create_elm(
        self: &Rc<Self>,
        cx: &mut PatchCx<'_>,
        vnode: &VNode,
        parent: Option<NodeHandle>,
        reference: Option<NodeHandle>,
    ) {
        let elm = match vnode.kind() {
            VNodeKind::Component(component) => {
                self.create_component(cx, vnode, component, parent, reference);
                return;
            }
            VNodeKind::Element { tag, children } => {
                let elm = self.backend.create_element(tag);
                vnode.set_elm(elm);
                check_duplicate_keys(children, cx.owner);
                for child in children {
                    self.create_elm(cx, child, Some(elm), None);
                }
                if vnode.data().is_some() {
                    self.invoke_create_hooks(cx, vnode);
                }
                elm
            }
            VNodeKind::Text(text) => {
                let elm = self.backend.create_text(text);
                vnode.set_elm(elm);
                elm
            }
            VNodeKind::Comment(text) => {
                let elm = self.backend.create_comment(text);
                vnode.set_elm(elm);
                elm
            }
        };
        if let Some(parent) = parent {
            self.backend.insert_before(parent, elm, reference);
        }
    }

    fn create_component(
        self: &Rc<Self>,
        cx: &mut PatchCx<'_>,
        vnode: &VNode,
        component: &ComponentVNode,
        parent: Option<NodeHandle>,
        reference: Option<NodeHandle>,
    ) {
        let cache_key = CacheKey::new(&component.options, vnode.key());
        let cached = if component.keep_alive {
            cx.owner.and_then(|owner| owner.cached_child(&cache_key, &cx.claimed))
        } else {
            None
        };

        let instance = match cached {
            Some(vm) => {
                lifecycle::update_child_component(&vm, component);
                vm
            }
            None => {
                let vm = lifecycle::create_child_component(self, cx.owner, component);
                if component.keep_alive {
                    if let Some(owner) = cx.owner {
                        if owner.cache_child(cache_key, vm.clone()) > 1 {
                            warn(
                                &format!(
                                    "kept-alive siblings of <{}> share a cache slot; give them distinct keys",
                                    vm.name()
                                ),
                                Some(owner),
                            );
                        }
                    }
                }
                vm
            }
        };
        if component.keep_alive {
            cx.claimed.insert(instance.uid());
        }
        *component.instance.borrow_mut() = Some(instance.clone());

        // The child's own deferred inserts go first, so children are
        // mounted before their parents.
        cx.inserted.extend(instance.take_pending_insert());
        if let Some(elm) = instance.el() {
            vnode.set_elm(elm);
        }
        if vnode.data().is_some() {
            self.invoke_create_hooks(cx, vnode);
        }
        cx.inserted.push(Inserted::Component {
            instance: instance.clone(),
            owner: cx.owner.cloned(),
            keep_alive: component.keep_alive,
        });

        if let (Some(parent), Some(elm)) = (parent, instance.el()) {
            self.backend.insert_before(parent, elm, reference);
        }
    }

    fn invoke_create_hooks(&self, cx: &mut PatchCx<'_>, vnode: &VNode) {
        let mcx = self.module_cx(cx);
        for module in &self.modules {
            module.create(&mcx, vnode);
        }
        if let (Some(hook), Some(elm)) = (vnode.data().and_then(|d| d.on_insert.clone()), vnode.elm()) {
            cx.inserted.push(Inserted::Element { hook, elm });
        }
    }

    fn add_vnodes(
        self: &Rc<Self>,
        cx: &mut PatchCx<'_>,
        parent: NodeHandle,
        reference: Option<NodeHandle>,
        vnodes: &[VNode],
    ) {
        for vnode in vnodes {
            self.create_elm(cx, vnode, Some(parent), reference);
        }
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    fn remove_vnodes<'v>(
        self: &Rc<Self>,
        cx: &mut PatchCx<'_>,
        parent: NodeHandle,
        vnodes: impl IntoIterator<Item = &'v VNode>,
    ) {
        for vnode in vnodes {
            if let Some(elm) = vnode.elm() {
                self.backend.remove_child(parent, elm);
            }
            self.invoke_destroy_hook(cx, vnode);
        }
    }

    /// Destroy hooks run children first.
    fn invoke_destroy_hook(self: &Rc<Self>, cx: &mut PatchCx<'_>, vnode: &VNode) {
        for child in vnode.children() {
            self.invoke_destroy_hook(cx, child);
        }
        if vnode.data().is_some() {
            let mcx = self.module_cx(cx);
            for module in &self.modules {
                module.destroy(&mcx, vnode);
            }
        }
        if let Some(component) = vnode.as_component() {
            if let Some(instance) = component.instance() {
                if !instance.is_destroyed() {
                    if component.keep_alive {
                        lifecycle::deactivate_child_component(&instance, true);
                    } else {
                        instance.destroy();
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Patching
    // ------------------------------------------------------------------

    fn patch_vnode(self: &Rc<Self>, cx: &mut PatchCx<'_>, old: &VNode, vnode: &VNode) {
        if std::ptr::eq(old, vnode) {
            return;
        }

        match (old.kind(), vnode.kind()) {
            (VNodeKind::Component(old_component), VNodeKind::Component(component)) => {
                let instance = old_component.instance();
                *component.instance.borrow_mut() = instance.clone();
                if let Some(vm) = &instance {
                    lifecycle::update_child_component(vm, component);
                }
                if let Some(elm) = vnode.elm() {
                    vnode.set_elm(elm);
                }
            }
            (VNodeKind::Text(old_text), VNodeKind::Text(text))
            | (VNodeKind::Comment(old_text), VNodeKind::Comment(text)) => {
                let Some(elm) = old.elm() else {
                    return;
                };
                vnode.set_elm(elm);
                if old_text != text {
                    self.backend.set_text_content(elm, text);
                }
            }
            (VNodeKind::Element { children: old_children, .. }, VNodeKind::Element { children, .. }) => {
                let Some(elm) = old.elm() else {
                    return;
                };
                vnode.set_elm(elm);
                if !old_children.is_empty() || !children.is_empty() {
                    self.update_children(cx, elm, old_children, children);
                }
            }
            // `same_vnode` never pairs different kinds.
            _ => return,
        }

        if vnode.data().is_some() {
            let mcx = self.module_cx(cx);
            for module in &self.modules {
                module.update(&mcx, old, vnode);
            }
        }
    }

    fn update_children(
        self: &Rc<Self>,
        cx: &mut PatchCx<'_>,
        parent: NodeHandle,
        old_children: &[VNode],
        children: &[VNode],
    ) {
        check_duplicate_keys(children, cx.owner);

        // Old nodes consumed out of order are cleared to `None`.
        let mut old: Vec<Option<&VNode>> = old_children.iter().map(Some).collect();
        let (mut old_start, mut old_end) = (0, old.len());
        let (mut new_start, mut new_end) = (0, children.len());
        let mut key_map: Option<HashMap<&Key, usize>> = None;

        while old_start < old_end && new_start < new_end {
            let Some(old_start_node) = old[old_start] else {
                old_start += 1;
                continue;
            };
            let Some(old_end_node) = old[old_end - 1] else {
                old_end -= 1;
                continue;
            };
            let new_start_node = &children[new_start];
            let new_end_node = &children[new_end - 1];

            if same_vnode(old_start_node, new_start_node) {
                self.patch_vnode(cx, old_start_node, new_start_node);
                old_start += 1;
                new_start += 1;
            } else if same_vnode(old_end_node, new_end_node) {
                self.patch_vnode(cx, old_end_node, new_end_node);
                old_end -= 1;
                new_end -= 1;
            } else if same_vnode(old_start_node, new_end_node) {
                // Moved right.
                self.patch_vnode(cx, old_start_node, new_end_node);
                let reference = old_end_node.elm().and_then(|elm| self.backend.next_sibling(elm));
                self.relocate(parent, new_end_node, reference);
                old_start += 1;
                new_end -= 1;
            } else if same_vnode(old_end_node, new_start_node) {
                // Moved left.
                self.patch_vnode(cx, old_end_node, new_start_node);
                self.relocate(parent, new_start_node, old_start_node.elm());
                old_end -= 1;
                new_start += 1;
            } else {
                let found = match new_start_node.key() {
                    Some(key) => key_map
                        .get_or_insert_with(|| build_key_map(&old, old_start, old_end))
                        .get(key)
                        .copied()
                        .filter(|&index| index >= old_start && index < old_end),
                    None => find_index_in_old(new_start_node, &old, old_start, old_end),
                };

                match found.and_then(|index| old[index].map(|node| (index, node))) {
                    Some((index, node)) if same_vnode(node, new_start_node) => {
                        if new_start_node.key().is_none() {
                            warn(
                                "Reordered children without keys: give list items a unique key \
                                 so they can be moved instead of matched by position.",
                                cx.owner,
                            );
                        }
                        self.patch_vnode(cx, node, new_start_node);
                        old[index] = None;
                        self.relocate(parent, new_start_node, old_start_node.elm());
                    }
                    // Same key, different element: treat as new.
                    _ => self.create_elm(cx, new_start_node, Some(parent), old_start_node.elm()),
                }
                new_start += 1;
            }
        }

        if old_start >= old_end {
            let reference = children.get(new_end).and_then(VNode::elm);
            self.add_vnodes(cx, parent, reference, &children[new_start..new_end]);
        } else if new_start >= new_end {
            let remaining: Vec<&VNode> = old[old_start..old_end].iter().flatten().copied().collect();
            self.remove_vnodes(cx, parent, remaining);
        }
    }

    fn relocate(&self, parent: NodeHandle, vnode: &VNode, reference: Option<NodeHandle>) {
        if let Some(elm) = vnode.elm() {
            self.backend.insert_before(parent, elm, reference);
        }
    }
}

/// Run deferred insert notifications in queue order.
pub(crate) fn invoke_insert_hooks(queue: Vec<Inserted>) {
    for item in queue {
        match item {
            Inserted::Element { hook, elm } => hook(elm),
            Inserted::Component {
                instance,
                owner,
                keep_alive,
            } => lifecycle::component_inserted(&instance, owner.as_ref(), keep_alive),
        }
    }
}

/// The single predicate deciding between patching in place and replacing.
pub fn same_vnode(a: &VNode, b: &VNode) -> bool {
    if a.key() != b.key() || a.data().is_some() != b.data().is_some() {
        return false;
    }
    match (a.kind(), b.kind()) {
        (VNodeKind::Element { tag: ta, .. }, VNodeKind::Element { tag: tb, .. }) => {
            ta == tb && same_input_type(a, b)
        }
        (VNodeKind::Text(_), VNodeKind::Text(_)) | (VNodeKind::Comment(_), VNodeKind::Comment(_)) => true,
        (VNodeKind::Component(ca), VNodeKind::Component(cb)) => Rc::ptr_eq(&ca.options, &cb.options),
        _ => false,
    }
}

fn same_input_type(a: &VNode, b: &VNode) -> bool {
    if a.tag() != Some("input") {
        return true;
    }
    fn input_type(v: &VNode) -> Option<&str> {
        v.data().and_then(|d| d.attrs.get("type")).map(String::as_str)
    }
    let (ta, tb) = (input_type(a), input_type(b));
    ta == tb
        || (ta.is_some_and(|t| TEXT_INPUT_TYPES.contains(&t)) && tb.is_some_and(|t| TEXT_INPUT_TYPES.contains(&t)))
}

/// Map keys in the live old window to their index. The first occurrence of
/// a duplicate key wins.
fn build_key_map<'a>(old: &[Option<&'a VNode>], start: usize, end: usize) -> HashMap<&'a Key, usize> {
    let mut map = HashMap::new();
    for (index, node) in old.iter().enumerate().take(end).skip(start) {
        if let Some(key) = node.and_then(VNode::key) {
            map.entry(key).or_insert(index);
        }
    }
    map
}

fn find_index_in_old(vnode: &VNode, old: &[Option<&VNode>], start: usize, end: usize) -> Option<usize> {
    (start..end).find(|&index| old[index].is_some_and(|node| same_vnode(node, vnode)))
}

fn check_duplicate_keys(children: &[VNode], owner: Option<&Component>) {
    let mut seen = HashSet::new();
    for key in children.iter().filter_map(VNode::key) {
        if !seen.insert(key) {
            warn(
                &format!("Duplicate key `{key}` among siblings; this may cause an update error."),
                owner,
            );
        }
    }
}
