//! Process-wide interop configuration.
//!
//! Controls the diagnostics layer only; the marshalling and dispatch paths
//! behave identically regardless of these settings.
//!
//! # Example
//!
//! ```ignore
//! use sharpcom_core::Configuration;
//!
//! Configuration::new()
//!     .with_object_tracking(true)
//!     .with_stack_traces(true)
//!     .install();
//! ```

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::Result;

static CURRENT: RwLock<Configuration> = RwLock::new(Configuration::new());

/// Diagnostics settings for wrappers and the object tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Register every wrapper in the [`ObjectTracker`](crate::ObjectTracker)
    /// on creation and remove it on disposal.
    pub enable_object_tracking: bool,

    /// Keep tracked references in a per-thread table instead of the
    /// process-wide one.
    pub use_thread_local_tracking: bool,

    /// Capture a backtrace for every tracked reference.
    /// Expensive; intended for leak hunting sessions.
    pub capture_stack_traces: bool,
}

impl Configuration {
    /// All diagnostics disabled.
    pub const fn new() -> Self {
        Self {
            enable_object_tracking: false,
            use_thread_local_tracking: false,
            capture_stack_traces: false,
        }
    }

    /// Enable or disable object tracking.
    pub const fn with_object_tracking(mut self, enabled: bool) -> Self {
        self.enable_object_tracking = enabled;
        self
    }

    /// Select the per-thread tracking table.
    pub const fn with_thread_local_tracking(mut self, enabled: bool) -> Self {
        self.use_thread_local_tracking = enabled;
        self
    }

    /// Capture backtraces for tracked references.
    pub const fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_traces = enabled;
        self
    }

    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The configuration currently in effect.
    pub fn current() -> Self {
        match CURRENT.read() {
            Ok(config) => *config,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Make this configuration the process-wide one.
    ///
    /// Switching between global and thread-local tracking does not migrate
    /// references that are already tracked.
    pub fn install(self) {
        log::debug!("installing interop configuration: {self:?}");
        match CURRENT.write() {
            Ok(mut config) => *config = self,
            Err(poisoned) => *poisoned.into_inner() = self,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
