//! Component definitions.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::Component;
use crate::error::{Capture, Error, Result};
use crate::reactive::Value;
use crate::vdom::VNode;

pub type DataFn = Rc<dyn Fn(&Component) -> Result<Value>>;
pub type RenderFn = Rc<dyn Fn(&Component) -> Result<VNode>>;
pub type HookFn = Rc<dyn Fn(&Component) -> Result<()>>;
pub type ComputedFn = Rc<dyn Fn(&Component) -> Result<Value>>;
pub type PropDefault = Rc<dyn Fn() -> Value>;
pub type WatchHandler = Rc<dyn Fn(&Component, &Value, &Value) -> Result<()>>;

/// Called with `(error, source component, info)` for errors raised by a
/// descendant.
pub type ErrorCapturedFn = Rc<dyn Fn(&Error, &Component, &str) -> Result<Capture>>;

/// Lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
    BeforeDestroy,
    Destroyed,
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::BeforeCreate => "beforeCreate",
            Hook::Created => "created",
            Hook::BeforeMount => "beforeMount",
            Hook::Mounted => "mounted",
            Hook::BeforeUpdate => "beforeUpdate",
            Hook::Updated => "updated",
            Hook::Activated => "activated",
            Hook::Deactivated => "deactivated",
            Hook::BeforeDestroy => "beforeDestroy",
            Hook::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a watch observes.
#[derive(Clone)]
pub enum WatchSource {
    /// A dot-delimited path starting at a prop, data key or computed key.
    Path(String),
    Getter(ComputedFn),
}

/// A declared watch.
#[derive(Clone)]
pub struct WatchDef {
    pub(crate) source: WatchSource,
    pub(crate) handler: WatchHandler,
    pub(crate) deep: bool,
    pub(crate) immediate: bool,
    pub(crate) sync: bool,
}

impl WatchDef {
    pub fn path(
        path: impl Into<String>,
        handler: impl Fn(&Component, &Value, &Value) -> Result<()> + 'static,
    ) -> Self {
        Self::with_source(WatchSource::Path(path.into()), Rc::new(handler))
    }

    pub fn getter(
        getter: impl Fn(&Component) -> Result<Value> + 'static,
        handler: impl Fn(&Component, &Value, &Value) -> Result<()> + 'static,
    ) -> Self {
        Self::with_source(WatchSource::Getter(Rc::new(getter)), Rc::new(handler))
    }

    fn with_source(source: WatchSource, handler: WatchHandler) -> Self {
        Self {
            source,
            handler,
            deep: false,
            immediate: false,
            sync: false,
        }
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Call the handler once with the initial value.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub(crate) fn expression(&self) -> String {
        match &self.source {
            WatchSource::Path(path) => path.clone(),
            WatchSource::Getter(_) => "<fn>".to_string(),
        }
    }
}

/// A component definition. Shared by every instance built from it; its
/// identity distinguishes component types in the differ.
pub struct ComponentOptions {
    name: String,
    data: Option<DataFn>,
    props: IndexMap<String, Option<PropDefault>>,
    computed: IndexMap<String, ComputedFn>,
    watch: Vec<WatchDef>,
    render: Option<RenderFn>,
    hooks: HashMap<Hook, Vec<HookFn>>,
    error_captured: Vec<ErrorCapturedFn>,
}

impl ComponentOptions {
    pub fn builder(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder {
            options: ComponentOptions {
                name: name.into(),
                data: None,
                props: IndexMap::new(),
                computed: IndexMap::new(),
                watch: Vec::new(),
                render: None,
                hooks: HashMap::new(),
                error_captured: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn data(&self) -> Option<&DataFn> {
        self.data.as_ref()
    }

    pub(crate) fn props(&self) -> &IndexMap<String, Option<PropDefault>> {
        &self.props
    }

    pub(crate) fn computed(&self) -> &IndexMap<String, ComputedFn> {
        &self.computed
    }

    pub(crate) fn watch(&self) -> &[WatchDef] {
        &self.watch
    }

    pub(crate) fn render(&self) -> Option<&RenderFn> {
        self.render.as_ref()
    }

    pub(crate) fn hooks(&self, hook: Hook) -> &[HookFn] {
        self.hooks.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn error_captured_hooks(&self) -> &[ErrorCapturedFn] {
        &self.error_captured
    }
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("name", &self.name)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("watch", &self.watch.len())
            .field("render", &self.render.is_some())
            .finish()
    }
}

/// Builder for [`ComponentOptions`].
pub struct ComponentBuilder {
    options: ComponentOptions,
}

impl ComponentBuilder {
    /// Factory for the instance's root data. Must return an object.
    pub fn data(mut self, f: impl Fn(&Component) -> Result<Value> + 'static) -> Self {
        self.options.data = Some(Rc::new(f));
        self
    }

    pub fn prop(mut self, name: impl Into<String>) -> Self {
        self.options.props.insert(name.into(), None);
        self
    }

    /// A prop whose default is produced fresh for each instance.
    pub fn prop_with_default(mut self, name: impl Into<String>, default: impl Fn() -> Value + 'static) -> Self {
        self.options.props.insert(name.into(), Some(Rc::new(default)));
        self
    }

    pub fn computed(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Component) -> Result<Value> + 'static,
    ) -> Self {
        self.options.computed.insert(name.into(), Rc::new(f));
        self
    }

    pub fn watch(mut self, def: WatchDef) -> Self {
        self.options.watch.push(def);
        self
    }

    pub fn render(mut self, f: impl Fn(&Component) -> Result<VNode> + 'static) -> Self {
        self.options.render = Some(Rc::new(f));
        self
    }

    pub fn hook(mut self, hook: Hook, f: impl Fn(&Component) -> Result<()> + 'static) -> Self {
        self.options.hooks.entry(hook).or_default().push(Rc::new(f));
        self
    }

    pub fn error_captured(
        mut self,
        f: impl Fn(&Error, &Component, &str) -> Result<Capture> + 'static,
    ) -> Self {
        self.options.error_captured.push(Rc::new(f));
        self
    }

    pub fn build(self) -> Rc<ComponentOptions> {
        Rc::new(self.options)
    }
}
