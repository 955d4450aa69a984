//! Runtime Configuration
//!
//! Configuration is per thread, like the rest of the runtime. Handlers are
//! cloned out before they are invoked, so a handler may itself call
//! [`configure`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::error::{Error, Result};

/// Global error handler: `(error, component, info)`.
pub type ErrorHandler = Rc<dyn Fn(&Error, Option<&Component>, &str) -> Result<()>>;

/// Diagnostic handler: `(message, component)`.
pub type WarnHandler = Rc<dyn Fn(&str, Option<&Component>)>;

/// Called when the first callback of a tick is queued. Hosts use it to
/// schedule a call to [`run_microtasks`](crate::scheduler::run_microtasks)
/// on their microtask (or macrotask) primitive.
pub type MicrotaskHook = Rc<dyn Fn()>;

/// Default bound on how often one watcher may re-queue itself per flush.
pub const MAX_UPDATE_COUNT: u32 = 100;

/// Runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// Suppress all diagnostics.
    pub silent: bool,

    /// Batch watcher runs into a microtask flush. When false, queued
    /// watchers flush immediately and notifications run in id order.
    pub async_mode: bool,

    /// Runaway-update threshold for a single watcher within one flush.
    pub max_update_count: u32,

    pub error_handler: Option<ErrorHandler>,
    pub warn_handler: Option<WarnHandler>,
    pub microtask_hook: Option<MicrotaskHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_mode: true,
            max_update_count: MAX_UPDATE_COUNT,
            error_handler: None,
            warn_handler: None,
            microtask_hook: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("async_mode", &self.async_mode)
            .field("max_update_count", &self.max_update_count)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .field("microtask_hook", &self.microtask_hook.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Modify the configuration of the current thread.
pub fn configure(f: impl FnOnce(&mut Config)) {
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Read the configuration of the current thread.
pub(crate) fn with_config<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|config| f(&config.borrow()))
}

pub(crate) fn is_async() -> bool {
    with_config(|c| c.async_mode)
}

/// The serializable part of [`Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub silent: bool,
    pub async_mode: bool,
    pub max_update_count: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            silent: false,
            async_mode: true,
            max_update_count: MAX_UPDATE_COUNT,
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Apply these settings to the current thread's configuration.
    pub fn apply(&self) {
        configure(|c| {
            c.silent = self.silent;
            c.async_mode = self.async_mode;
            c.max_update_count = self.max_update_count;
        });
    }
}
