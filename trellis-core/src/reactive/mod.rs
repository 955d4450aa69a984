//! Reactive Primitives
//!
//! This module implements the dependency-tracking half of the engine:
//! dependency nodes, the reactive wrapper for plain data, and watchers.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A [`Dep`] is the subscriber list of one reactive property. Reading the
//! property while a watcher evaluates subscribes that watcher; writing it
//! notifies every subscriber.
//!
//! ## Observers
//!
//! [`observe`] walks an object or array and makes every property reactive.
//! Each container gets an [`Observer`] whose own dep fires on structural
//! changes: keys added with [`set`] or removed with [`del`], and array
//! mutations.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter inside a tracking context and re-runs
//! when one of the deps it read notifies. Computed properties, explicit
//! watches and component render steps are all watchers.
//!
//! # Implementation Notes
//!
//! All state is thread-local. Deps and watchers meet in an id-keyed arena
//! ([`Runtime`]); watchers hold dep ids and the arena holds weak watcher
//! references, so neither side keeps the other alive.

mod context;
mod dep;
mod id;
mod observer;
mod runtime;
mod value;
mod watcher;

pub use context::{untracked, ReactiveContext};
pub use dep::Dep;
pub use id::{DepId, WatcherId};
pub use observer::{
    define_reactive, del, observe, set, Observer, Prop, ReactiveArray, ReactiveObject,
};
pub use runtime::Runtime;
pub use value::Value;
pub use watcher::{
    parse_path, traverse, BeforeHook, Getter, WatchCallback, Watcher, WatcherOptions,
};

pub(crate) use watcher::{resolve_path, warn_invalid_path};
