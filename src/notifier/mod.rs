//! Notification fan-out.
//!
//! A [`Notifier`] owns the registry of channels and subscribers, one upstream
//! connection listening on the channels that currently need monitoring, and the
//! dispatcher thread delivering decoded events to subscriber callbacks.
//!
//! Every mutation goes through one control lock and, with `autorun` on, is followed
//! by a re-evaluation of the valid set; the listener is rebuilt only when that set
//! actually changed.

mod dispatcher;
/// Valid-set evaluation.
pub mod evaluator;
mod listener;
/// Channel/subscriber bookkeeping.
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

pub use evaluator::{valid_set, SYSTEM_CHANNEL};
pub use registry::{Callback, ChannelState, Registry, SubscriptionState};

use self::listener::{Listener, ListenerStatus};
use crate::config::NotifierConfig;
use crate::decode::{Decoder, LiteralDecoder};
use crate::error::{DecodeError, NotifierResult};
use crate::transport::Transport;
use crate::value::Value;

/// Demultiplexes one upstream notification stream to many subscribers.
///
/// `K` is the subscriber id type. Callbacks run on the dispatcher thread and may
/// call back into the notifier; share it through an `Arc` for that.
pub struct Notifier<K = String> {
    registry: Arc<RwLock<Registry<K>>>,
    control: Mutex<Listener<K>>,
    status: Arc<ListenerStatus>,
    config: NotifierConfig,
}

impl<K> Notifier<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a notifier decoding payloads as Python literals, with default settings.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::with_config(Arc::new(transport), Arc::new(LiteralDecoder), NotifierConfig::default())
    }

    /// Creates a notifier with a custom payload decoder.
    pub fn with_decoder<T, D>(transport: T, decoder: D) -> Self
    where
        T: Transport + 'static,
        D: Decoder + 'static,
    {
        Self::with_config(Arc::new(transport), Arc::new(decoder), NotifierConfig::default())
    }

    /// Creates a notifier from shared parts. Nothing is connected until the first
    /// mutation (autorun) or an explicit [`start`](Self::start).
    pub fn with_config(transport: Arc<dyn Transport>, decoder: Arc<dyn Decoder>, config: NotifierConfig) -> Self {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let listener = Listener::new(Arc::clone(&registry), transport, decoder, config.clone());
        let status = listener.status();
        Self {
            registry,
            control: Mutex::new(listener),
            status,
            config,
        }
    }

    /// Settings this notifier was built with.
    #[must_use]
    pub const fn config(&self) -> &NotifierConfig {
        &self.config
    }

    fn control(&self) -> MutexGuard<'_, Listener<K>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<K>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the registry under the control lock, then re-evaluates the
    /// listener once if autorun is on.
    fn mutate<R>(&self, f: impl FnOnce(&mut Registry<K>) -> R) -> NotifierResult<R> {
        let mut listener = self.control();
        let out = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut registry)
        };
        if self.config.autorun {
            listener.maybe_restart()?;
        }
        Ok(out)
    }

    // ----- channels -----

    /// Registers a channel. A channel without subscriptions is not monitored.
    pub fn add_channel(&self, name: &str) -> NotifierResult<()> {
        tracing::debug!(channel = %name, "add channel");
        self.mutate(|r| {
            r.add_channel(name);
        })
    }

    /// Registers several channels with a single listener re-evaluation.
    pub fn add_channels<I, S>(&self, names: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(|r| {
            for name in names {
                r.add_channel(name.as_ref());
            }
        })
    }

    /// Removes a channel and every subscription on it.
    pub fn remove_channel(&self, name: &str) -> NotifierResult<()> {
        tracing::debug!(channel = %name, "remove channel");
        self.mutate(|r| {
            r.remove_channel(name);
        })
    }

    /// Removes several channels with a single listener re-evaluation.
    pub fn remove_channels<I, S>(&self, names: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(|r| {
            for name in names {
                r.remove_channel(name.as_ref());
            }
        })
    }

    /// Sets one channel's mute flag. Unknown channels are ignored.
    pub fn mute_channel(&self, name: &str, muted: bool) -> NotifierResult<()> {
        tracing::debug!(channel = %name, muted, "mute channel");
        self.mutate(|r| {
            r.mute_channel(name, muted);
        })
    }

    /// Mutes the given channels, or every channel if `names` is empty.
    pub fn mute_channels<I, S>(&self, names: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_channels_muted(names, true)
    }

    /// Unmutes the given channels, or every channel if `names` is empty.
    pub fn unmute_channels<I, S>(&self, names: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_channels_muted(names, false)
    }

    fn set_channels_muted<I, S>(&self, names: I, muted: bool) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
        tracing::debug!(channels = ?names, muted, "mute channels");
        self.mutate(|r| {
            let targets = if names.is_empty() {
                r.channels().into_keys().collect()
            } else {
                names
            };
            for name in &targets {
                r.mute_channel(name, muted);
            }
        })
    }

    // ----- subscriptions -----

    /// Subscribes `id` to `channel`, creating the channel if needed.
    ///
    /// The callback replaces any callback previously registered for `id`, on every
    /// channel. Re-subscribing keeps an existing subscription's mute flag.
    pub fn subscribe<F>(&self, id: K, channel: &str, callback: F) -> NotifierResult<()>
    where
        F: Fn(&K, &str, &Value, i32) + Send + Sync + 'static,
    {
        tracing::debug!(channel = %channel, "subscribe");
        let callback: Callback<K> = Arc::new(callback);
        self.mutate(|r| {
            r.subscribe(id, channel, callback);
        })
    }

    /// Subscribes `id` to several channels with one callback and a single
    /// listener re-evaluation.
    pub fn subscribe_channels<I, S, F>(&self, id: K, channels: I, callback: F) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&K, &str, &Value, i32) + Send + Sync + 'static,
    {
        let callback: Callback<K> = Arc::new(callback);
        self.mutate(|r| {
            for channel in channels {
                r.subscribe(id.clone(), channel.as_ref(), Arc::clone(&callback));
            }
        })
    }

    /// Removes the subscription of `id` on `channel`. The channel and the
    /// subscriber remain registered.
    pub fn unsubscribe(&self, id: &K, channel: &str) -> NotifierResult<()> {
        tracing::debug!(channel = %channel, "unsubscribe");
        self.mutate(|r| {
            r.unsubscribe(id, channel);
        })
    }

    /// Forgets a subscriber along with all of its subscriptions.
    pub fn remove_subscriber(&self, id: &K) -> NotifierResult<()> {
        self.mutate(|r| {
            r.remove_subscriber(id);
        })
    }

    /// Sets the mute flag of one subscription. Unknown subscriptions are ignored.
    pub fn mute_subscription(&self, id: &K, channel: &str, muted: bool) -> NotifierResult<()> {
        tracing::debug!(channel = %channel, muted, "mute subscription");
        self.mutate(|r| {
            r.mute_subscription(id, channel, muted);
        })
    }

    /// Mutes `id`'s subscriptions on the given channels, or on all of its
    /// channels if `channels` is empty.
    pub fn mute_subscriber<I, S>(&self, id: &K, channels: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_subscriber_muted(id, channels, true)
    }

    /// Unmutes `id`'s subscriptions on the given channels, or on all of its
    /// channels if `channels` is empty.
    pub fn unmute_subscriber<I, S>(&self, id: &K, channels: I) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_subscriber_muted(id, channels, false)
    }

    fn set_subscriber_muted<I, S>(&self, id: &K, channels: I, muted: bool) -> NotifierResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let channels: Vec<String> = channels.into_iter().map(|s| s.as_ref().to_string()).collect();
        tracing::debug!(channels = ?channels, muted, "mute subscriber");
        self.mutate(|r| {
            let targets = if channels.is_empty() { r.channels_of(id) } else { channels };
            for channel in &targets {
                r.mute_subscription(id, channel, muted);
            }
        })
    }

    // ----- queries -----

    /// All channels with their state.
    #[must_use]
    pub fn channels(&self) -> BTreeMap<String, ChannelState> {
        self.read().channels()
    }

    /// Subscriptions on `channel`.
    #[must_use]
    pub fn subscriptions(&self, channel: &str) -> Vec<(K, SubscriptionState)> {
        self.read().subscriptions(channel)
    }

    /// Names of muted channels.
    #[must_use]
    pub fn muted_channels(&self) -> Vec<String> {
        self.read().channels_by_mute(true)
    }

    /// Names of unmuted channels.
    #[must_use]
    pub fn unmuted_channels(&self) -> Vec<String> {
        self.read().channels_by_mute(false)
    }

    /// Muted `(channel, subscriber)` pairs, on one channel or all of them.
    #[must_use]
    pub fn muted_subscriptions(&self, channel: Option<&str>) -> Vec<(String, K)> {
        self.read().subscriptions_by_mute(true, channel)
    }

    /// Unmuted `(channel, subscriber)` pairs, on one channel or all of them.
    #[must_use]
    pub fn unmuted_subscriptions(&self, channel: Option<&str>) -> Vec<(String, K)> {
        self.read().subscriptions_by_mute(false, channel)
    }

    /// Known subscriber ids, including those left without subscriptions.
    #[must_use]
    pub fn subscribers(&self) -> Vec<K> {
        self.read().subscribers()
    }

    /// Channels `id` is subscribed to.
    #[must_use]
    pub fn channels_of(&self, id: &K) -> Vec<String> {
        self.read().channels_of(id)
    }

    /// Channels that should be monitored given the current registry state.
    #[must_use]
    pub fn valid_set(&self) -> BTreeSet<String> {
        valid_set(&self.read())
    }

    // ----- lifecycle -----
    //
    // The three queries below read the published status and never wait on the
    // control lock, so callbacks can use them while another thread mutates.

    /// Channels the running listener is listening on; empty when stopped.
    #[must_use]
    pub fn active_channels(&self) -> BTreeSet<String> {
        self.status.active_channels()
    }

    /// Whether a listener is running with a live dispatcher.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// The decode failure that last terminated a dispatcher, if any.
    #[must_use]
    pub fn last_dispatch_error(&self) -> Option<DecodeError> {
        self.status.last_error()
    }

    /// Connects and starts dispatching. No-op if already running.
    pub fn start(&self) -> NotifierResult<()> {
        self.control().start()
    }

    /// Stops dispatching and closes the connection. No-op if stopped.
    pub fn stop(&self) {
        self.control().stop();
    }

    /// Unconditionally reconnects on the current valid set.
    pub fn restart(&self) -> NotifierResult<()> {
        self.control().restart()
    }

    /// Reconnects only if the valid set differs from the active set. Returns
    /// whether a restart happened.
    pub fn maybe_restart(&self) -> NotifierResult<bool> {
        self.control().maybe_restart()
    }
}

impl<K> std::fmt::Debug for Notifier<K>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::transport::InMemoryTransport;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn noop(_: &String, _: &str, _: &Value, _: i32) {}

    #[test]
    fn test_mutation_restarts_listener() {
        let transport = InMemoryTransport::new();
        let notifier: Notifier = Notifier::new(transport.clone());
        assert!(!notifier.is_running());

        notifier.subscribe("s1".to_string(), "orders", noop).unwrap();
        assert!(notifier.is_running());
        assert_eq!(notifier.active_channels(), set(&["orders", SYSTEM_CHANNEL]));
        assert_eq!(transport.connect_count(), 1);

        // No change to the valid set, no reconnect.
        notifier.add_channel("orders").unwrap();
        notifier.subscribe("s2".to_string(), "orders", noop).unwrap();
        assert_eq!(transport.connect_count(), 1);
    }

    #[test]
    fn test_batch_mutation_restarts_once() {
        let transport = InMemoryTransport::new();
        let notifier: Notifier = Notifier::new(transport.clone());
        notifier
            .subscribe_channels("s1".to_string(), ["a", "b", "c"], noop)
            .unwrap();
        assert_eq!(transport.connect_count(), 1);

        notifier.mute_channels(["a", "b"]).unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(notifier.active_channels(), set(&["c", SYSTEM_CHANNEL]));

        notifier.unmute_channels(Vec::<String>::new()).unwrap();
        assert_eq!(notifier.unmuted_channels(), vec!["a", "b", "c"]);
        assert_eq!(transport.connect_count(), 3);
    }

    #[test]
    fn test_mute_subscriber_defaults_to_all_channels() {
        let notifier: Notifier = Notifier::new(InMemoryTransport::new());
        notifier
            .subscribe_channels("s1".to_string(), ["a", "b"], noop)
            .unwrap();
        notifier.subscribe("s2".to_string(), "b", noop).unwrap();

        notifier.mute_subscriber(&"s1".to_string(), Vec::<&str>::new()).unwrap();
        assert_eq!(notifier.active_channels(), set(&["b", SYSTEM_CHANNEL]));
        assert_eq!(notifier.muted_subscriptions(None).len(), 2);
        assert_eq!(notifier.muted_subscriptions(Some("a")), vec![("a".to_string(), "s1".to_string())]);

        notifier.unmute_subscriber(&"s1".to_string(), ["a"]).unwrap();
        assert_eq!(notifier.active_channels(), set(&["a", "b", SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_autorun_off_defers_listener() {
        let transport = InMemoryTransport::new();
        let config = NotifierConfig {
            autorun: false,
            ..NotifierConfig::default()
        };
        let notifier: Notifier = Notifier::with_config(Arc::new(transport.clone()), Arc::new(LiteralDecoder), config);

        notifier.subscribe("s1".to_string(), "orders", noop).unwrap();
        assert!(!notifier.is_running());
        assert_eq!(transport.connect_count(), 0);

        assert!(notifier.maybe_restart().unwrap());
        assert_eq!(notifier.active_channels(), set(&["orders", SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_remove_subscriber_cascades() {
        let notifier: Notifier = Notifier::new(InMemoryTransport::new());
        notifier
            .subscribe_channels("s1".to_string(), ["a", "b"], noop)
            .unwrap();
        notifier.remove_subscriber(&"s1".to_string()).unwrap();

        assert!(notifier.subscribers().is_empty());
        assert!(notifier.subscriptions("a").is_empty());
        assert_eq!(notifier.channels().len(), 2);
        assert_eq!(notifier.active_channels(), set(&[SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_custom_decoder_and_key_type() {
        let transport = InMemoryTransport::new();
        let decoder = |payload: &str| -> Result<Value, DecodeError> { Ok(Value::from(payload.len() as i64)) };
        let notifier: Notifier<u32> = Notifier::with_decoder(transport.clone(), decoder);

        let (tx, rx) = unbounded();
        notifier
            .subscribe(7, "orders", move |id: &u32, _: &str, value: &Value, _: i32| {
                let _ = tx.send((*id, value.clone()));
            })
            .unwrap();

        transport.notify("orders", "abcd", 1).unwrap();
        let (id, value) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(id, 7);
        assert_eq!(value, Value::Int(4));
    }

    #[test]
    fn test_drop_stops_listener() {
        let transport = InMemoryTransport::new();
        {
            let notifier: Notifier = Notifier::new(transport.clone());
            notifier.subscribe("s1".to_string(), "orders", noop).unwrap();
            assert_eq!(transport.open_connections(), 1);
        }
        assert_eq!(transport.open_connections(), 0);
    }
}
