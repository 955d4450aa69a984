//! Virtual DOM
//!
//! Render functions produce [`VNode`] trees; the [`Patcher`] reconciles a new
//! tree against the previous one and applies the difference to a
//! [`Backend`]. [`MemoryBackend`] is an in-memory backend that records every
//! operation.

mod backend;
pub mod memory;
mod patch;
mod vnode;

pub use backend::{AttrsModule, Backend, Module, ModuleContext, RefModule, RefTarget};
pub use memory::{MemoryBackend, Op};
pub use patch::{same_vnode, Patcher};
pub use vnode::{ComponentVNode, InsertHook, Key, Listener, NodeHandle, VNode, VNodeData, VNodeKind};

pub(crate) use patch::{invoke_insert_hooks, Inserted};
