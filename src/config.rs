//! Notifier configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default name given to the dispatcher thread.
pub const DEFAULT_DISPATCHER_THREAD_NAME: &str = "pgnotifier-dispatch";

/// Default time `stop()` waits for the dispatcher thread to exit.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Runtime settings for a [`Notifier`](crate::Notifier).
///
/// Deserializable so it can be embedded in an application's own config file;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Re-evaluate and, if needed, restart the listener after every registry
    /// mutation. When false, changes take effect at the next explicit
    /// `start()` / `restart()` / `maybe_restart()`.
    pub autorun: bool,
    /// Name of the dispatcher thread.
    pub dispatcher_thread_name: String,
    /// How long `stop()` waits for the dispatcher thread before detaching it.
    /// A callback that is still running when the listener stops holds the thread.
    pub stop_timeout_ms: u64,
}

impl NotifierConfig {
    /// `stop_timeout_ms` as a [`Duration`].
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            autorun: true,
            dispatcher_thread_name: DEFAULT_DISPATCHER_THREAD_NAME.to_string(),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}
