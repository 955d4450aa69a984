//! Reactive Runtime
//!
//! The runtime is the arena that connects deps and watchers.
//!
//! # How It Works
//!
//! 1. Every dep owns a slot in the arena: an ordered set of the watcher ids
//!    subscribed to it. The slot is freed when the owning [`Dep`] is dropped,
//!    which happens together with the property or container it belongs to.
//!
//! 2. Every watcher registers a weak reference to itself, so a dep can turn
//!    a subscriber id back into a watcher when it notifies.
//!
//! 3. Watchers keep the ids of the deps they subscribe to. Removing a
//!    subscription from a slot that was already freed is a no-op, so deps and
//!    watchers can be dropped in either order.
//!
//! # Thread Safety
//!
//! The arena is thread-local. No borrow is held while user code runs:
//! callers snapshot what they need and release the arena first.
//!
//! [`Dep`]: super::Dep

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::watcher::{Watcher, WatcherInner};
use super::{DepId, WatcherId};

/// Snapshot of a dep's subscribers.
pub(crate) type Subscribers = SmallVec<[WatcherId; 8]>;

#[derive(Default)]
struct RuntimeState {
    watchers: HashMap<WatcherId, Weak<WatcherInner>>,
    deps: HashMap<DepId, IndexSet<WatcherId>>,
}

thread_local! {
    static STATE: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> Option<R> {
    // `try_with` keeps drops during thread teardown from panicking.
    STATE.try_with(|state| f(&mut state.borrow_mut())).ok()
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register a watcher so deps can reach it by id.
    pub(crate) fn register(id: WatcherId, watcher: Weak<WatcherInner>) {
        with_state(|state| state.watchers.insert(id, watcher));
    }

    /// Unregister a watcher.
    pub(crate) fn unregister(id: WatcherId) {
        with_state(|state| state.watchers.remove(&id));
    }

    /// Look up a live watcher.
    pub(crate) fn watcher(id: WatcherId) -> Option<Watcher> {
        with_state(|state| state.watchers.get(&id).and_then(Weak::upgrade))
            .flatten()
            .map(Watcher::from_inner)
    }

    /// Allocate a dep slot.
    pub(crate) fn alloc_dep(id: DepId) {
        with_state(|state| state.deps.insert(id, IndexSet::new()));
    }

    /// Free a dep slot.
    pub(crate) fn free_dep(id: DepId) {
        with_state(|state| state.deps.remove(&id));
    }

    /// Subscribe a watcher to a dep.
    ///
    /// Returns false if the watcher was already subscribed or the dep is gone.
    pub(crate) fn add_sub(dep: DepId, watcher: WatcherId) -> bool {
        with_state(|state| {
            state
                .deps
                .get_mut(&dep)
                .map(|subs| subs.insert(watcher))
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }

    /// Unsubscribe a watcher from a dep.
    pub(crate) fn remove_sub(dep: DepId, watcher: WatcherId) {
        with_state(|state| {
            if let Some(subs) = state.deps.get_mut(&dep) {
                subs.shift_remove(&watcher);
            }
        });
    }

    /// Snapshot the subscribers of a dep, in subscription order.
    pub(crate) fn subscribers(dep: DepId) -> Subscribers {
        with_state(|state| {
            state
                .deps
                .get(&dep)
                .map(|subs| subs.iter().copied().collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Number of watchers subscribed to a dep.
    pub fn subscriber_count(dep: DepId) -> usize {
        with_state(|state| state.deps.get(&dep).map_or(0, IndexSet::len)).unwrap_or(0)
    }

    /// Number of live dep slots on this thread.
    pub fn dep_count() -> usize {
        with_state(|state| state.deps.len()).unwrap_or(0)
    }

    /// Number of registered watchers on this thread.
    pub fn watcher_count() -> usize {
        with_state(|state| state.watchers.len()).unwrap_or(0)
    }
}
