//! Output nodes.
//!
//! A [`VNode`] describes one unit of rendered output. The node kind is a
//! tagged variant decided when the node is built, so the differ never
//! classifies nodes by inspecting strings.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::{Component, ComponentOptions};
use crate::error::Result;
use crate::reactive::Value;

/// Opaque handle to a node owned by a renderer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Identity of a node among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Rc<str>),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(i64::from(n))
    }
}

impl From<usize> for Key {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or_else(|_| Key::Str(n.to_string().into()), Key::Int)
    }
}

/// Called with a node's handle once its whole tree is attached.
pub type InsertHook = Rc<dyn Fn(NodeHandle)>;

/// An event listener passed from a parent to a child component.
pub type Listener = Rc<dyn Fn(&[Value]) -> Result<()>>;

/// Payload consumed by modules.
///
/// Whether a node carries data at all is part of the same-node test.
#[derive(Clone, Default)]
pub struct VNodeData {
    pub attrs: IndexMap<String, String>,
    pub ref_name: Option<String>,
    pub on_insert: Option<InsertHook>,
}

impl fmt::Debug for VNodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VNodeData")
            .field("attrs", &self.attrs)
            .field("ref_name", &self.ref_name)
            .field("on_insert", &self.on_insert.is_some())
            .finish()
    }
}

/// A child component placeholder.
#[derive(Clone)]
pub struct ComponentVNode {
    pub(crate) options: Rc<ComponentOptions>,
    pub(crate) props: IndexMap<String, Value>,
    pub(crate) listeners: IndexMap<String, Listener>,
    pub(crate) keep_alive: bool,
    /// Set once the placeholder has been created or patched.
    pub(crate) instance: RefCell<Option<Component>>,
}

impl ComponentVNode {
    pub fn options(&self) -> &Rc<ComponentOptions> {
        &self.options
    }

    pub fn props(&self) -> &IndexMap<String, Value> {
        &self.props
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn instance(&self) -> Option<Component> {
        self.instance.borrow().clone()
    }
}

#[derive(Clone)]
pub enum VNodeKind {
    Element { tag: String, children: Vec<VNode> },
    Text(String),
    Comment(String),
    Component(ComponentVNode),
}

/// One node of a rendered tree.
#[derive(Clone)]
pub struct VNode {
    kind: VNodeKind,
    data: Option<VNodeData>,
    key: Option<Key>,
    elm: Cell<Option<NodeHandle>>,
}

impl VNode {
    fn with_kind(kind: VNodeKind) -> Self {
        Self {
            kind,
            data: None,
            key: None,
            elm: Cell::new(None),
        }
    }

    pub fn element(tag: impl Into<String>, children: Vec<VNode>) -> Self {
        Self::with_kind(VNodeKind::Element {
            tag: tag.into(),
            children,
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_kind(VNodeKind::Text(text.into()))
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::with_kind(VNodeKind::Comment(text.into()))
    }

    /// A placeholder for a child component.
    pub fn component(options: &Rc<ComponentOptions>) -> Self {
        Self::with_kind(VNodeKind::Component(ComponentVNode {
            options: options.clone(),
            props: IndexMap::new(),
            listeners: IndexMap::new(),
            keep_alive: false,
            instance: RefCell::new(None),
        }))
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach an empty data payload.
    pub fn with_data(mut self) -> Self {
        self.data.get_or_insert_with(VNodeData::default);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(VNodeData::default)
            .attrs
            .insert(name.into(), value.into());
        self
    }

    pub fn with_ref(mut self, name: impl Into<String>) -> Self {
        self.data.get_or_insert_with(VNodeData::default).ref_name = Some(name.into());
        self
    }

    pub fn on_insert(mut self, hook: impl Fn(NodeHandle) + 'static) -> Self {
        self.data.get_or_insert_with(VNodeData::default).on_insert = Some(Rc::new(hook));
        self
    }

    /// Pass a prop to a component placeholder. Ignored on other nodes.
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let VNodeKind::Component(c) = &mut self.kind {
            c.props.insert(name.into(), value.into());
        }
        self
    }

    /// Listen to an event emitted by a component placeholder's instance.
    pub fn on(mut self, event: impl Into<String>, listener: impl Fn(&[Value]) -> Result<()> + 'static) -> Self {
        if let VNodeKind::Component(c) = &mut self.kind {
            c.listeners.insert(event.into(), Rc::new(listener));
        }
        self
    }

    /// Deactivate instead of destroying the instance when this placeholder
    /// is removed.
    pub fn keep_alive(mut self) -> Self {
        if let VNodeKind::Component(c) = &mut self.kind {
            c.keep_alive = true;
        }
        self
    }

    pub fn kind(&self) -> &VNodeKind {
        &self.kind
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn data(&self) -> Option<&VNodeData> {
        self.data.as_ref()
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            VNodeKind::Element { tag, .. } => Some(tag),
            VNodeKind::Component(c) => Some(c.options.name()),
            _ => None,
        }
    }

    pub fn children(&self) -> &[VNode] {
        match &self.kind {
            VNodeKind::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn as_component(&self) -> Option<&ComponentVNode> {
        match &self.kind {
            VNodeKind::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(self.kind, VNodeKind::Component(_))
    }

    /// The backend node this vnode is mounted as.
    ///
    /// A component placeholder resolves to its instance's root node, which
    /// follows the instance across its own re-renders.
    pub fn elm(&self) -> Option<NodeHandle> {
        match &self.kind {
            VNodeKind::Component(c) => c
                .instance
                .borrow()
                .as_ref()
                .and_then(Component::el)
                .or(self.elm.get()),
            _ => self.elm.get(),
        }
    }

    pub(crate) fn set_elm(&self, elm: NodeHandle) {
        self.elm.set(Some(elm));
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = match &self.kind {
            VNodeKind::Element { tag, children } => {
                let mut s = f.debug_struct("Element");
                s.field("tag", tag).field("children", children);
                s
            }
            VNodeKind::Text(text) => {
                let mut s = f.debug_struct("Text");
                s.field("text", text);
                s
            }
            VNodeKind::Comment(text) => {
                let mut s = f.debug_struct("Comment");
                s.field("text", text);
                s
            }
            VNodeKind::Component(c) => {
                let mut s = f.debug_struct("Component");
                s.field("name", &c.options.name())
                    .field("props", &c.props)
                    .field("keep_alive", &c.keep_alive);
                s
            }
        };
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        if let Some(data) = &self.data {
            s.field("data", data);
        }
        s.field("elm", &self.elm()).finish()
    }
}
