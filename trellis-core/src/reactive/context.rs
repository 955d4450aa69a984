//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! This enables automatic dependency tracking: when a reactive property is
//! read, the current watcher is registered as a subscriber of that
//! property's dep.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a context pushes an entry; the
//! returned guard pops it when dropped, even if the evaluation panics.
//!
//! An entry may be empty. Hooks, error handlers and patching run under an
//! empty entry so that whatever they read is not attributed to an
//! enclosing watcher.

use std::cell::RefCell;

use super::watcher::Watcher;
use super::WatcherId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    watcher_id: Option<WatcherId>,
}

impl ReactiveContext {
    /// Enter a tracking context for the given watcher.
    pub fn enter(watcher: Watcher) -> Self {
        let watcher_id = Some(watcher.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(watcher)));
        Self { watcher_id }
    }

    /// Enter a context in which reads are not tracked.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { watcher_id: None }
    }

    /// Check if a watcher is currently collecting dependencies.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The watcher currently collecting dependencies, if any.
    pub fn current() -> Option<Watcher> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Depth of the context stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let _ = CONTEXT_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(Watcher::id),
                    self.watcher_id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// Run `f` without tracking any reads it performs.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Value, WatcherOptions};

    fn idle_watcher() -> Watcher {
        Watcher::new(|| Ok(Value::Null), None, WatcherOptions { lazy: true, ..Default::default() })
            .unwrap()
    }

    #[test]
    fn context_tracks_watcher() {
        let watcher = idle_watcher();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());

        {
            let _ctx = ReactiveContext::enter(watcher.clone());

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(watcher.id()));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn untracked_masks_outer_watcher() {
        let watcher = idle_watcher();
        let _outer = ReactiveContext::enter(watcher.clone());

        untracked(|| {
            assert!(!ReactiveContext::is_active());
            assert!(ReactiveContext::current().is_none());
        });

        assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(watcher.id()));
    }

    #[test]
    fn nested_contexts() {
        let w1 = idle_watcher();
        let w2 = idle_watcher();

        {
            let _ctx1 = ReactiveContext::enter(w1.clone());
            assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(w1.id()));

            {
                let _ctx2 = ReactiveContext::enter(w2.clone());
                assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(w2.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current().map(|w| w.id()), Some(w1.id()));
        }

        assert!(ReactiveContext::current().is_none());
    }
}
