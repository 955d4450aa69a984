//! Trellis Core
//!
//! This crate provides the update engine behind the Trellis component
//! runtime. It implements:
//!
//! - Reactive state with automatic dependency tracking
//! - Watchers (render, computed and user watches)
//! - A batching scheduler flushed at microtask boundaries
//! - A keyed virtual DOM differ over a pluggable backend
//! - Component instances with lifecycle hooks, keep-alive and error capture
//!
//! # Architecture
//!
//! - `reactive`: deps, observed containers, watchers and the tracking context
//! - `scheduler`: the watcher queue and the `next_tick` microtask queue
//! - `vdom`: vnodes, the [`Patcher`], backends and modules
//! - `component`: component definitions and instances
//! - `error` / `config`: the error funnel and per-thread configuration
//!
//! Everything is single-threaded. State lives in thread-locals and is shared
//! with `Rc`, so each thread runs an independent runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use trellis_core::{run_microtasks, Component, ComponentOptions, MemoryBackend, Patcher, VNode};
//!
//! let counter = ComponentOptions::builder("Counter")
//!     .data(|_| Ok(serde_json::json!({ "count": 0 }).into()))
//!     .render(|vm| {
//!         let text = vm.get("count").to_display_string();
//!         Ok(VNode::element("span", vec![VNode::text(text)]))
//!     })
//!     .build();
//!
//! let backend = Rc::new(MemoryBackend::new());
//! let patcher = Patcher::new(backend.clone());
//! let root = backend.create_element("root");
//!
//! let vm = Component::new(counter);
//! vm.mount(&patcher, root)?;
//!
//! vm.set("count", 1.0);
//! // Re-rendered once, on the next tick.
//! run_microtasks()?;
//! assert_eq!(backend.serialize(root), "<root><span>1</span></root>");
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod vdom;

pub use component::{Component, ComponentOptions, Hook, WatchDef};
pub use config::{configure, Config, Settings};
pub use error::{Capture, Error, Result};
pub use reactive::{del, observe, set, Value, Watcher, WatcherOptions};
pub use scheduler::{next_tick, next_tick_async, run_microtasks};
pub use vdom::{Backend, MemoryBackend, Patcher, VNode};
