//! Channel and subscriber bookkeeping.
//!
//! The registry keeps two indexes, channel → subscriptions and subscriber →
//! channels, and every mutation updates both in the same call. Operations on
//! channels or subscriptions that do not exist are no-ops.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::evaluator::SYSTEM_CHANNEL;
use crate::value::Value;

/// Subscriber callback: `(subscriber id, channel, decoded payload, notifying pid)`.
pub type Callback<K> = Arc<dyn Fn(&K, &str, &Value, i32) + Send + Sync>;

/// Per-channel state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// A muted channel is not monitored, whatever its subscriptions say.
    pub muted: bool,
}

/// Per-subscription state, independent of the channel and of the subscriber's
/// other subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// A muted subscription receives nothing and does not keep its channel monitored.
    pub muted: bool,
}

/// Channels, subscribers and the subscriptions between them.
pub struct Registry<K> {
    channels: BTreeMap<String, ChannelState>,
    callbacks: HashMap<K, Callback<K>>,
    by_channel: BTreeMap<String, HashMap<K, SubscriptionState>>,
    by_subscriber: HashMap<K, BTreeSet<String>>,
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            callbacks: HashMap::new(),
            by_channel: BTreeMap::new(),
            by_subscriber: HashMap::new(),
        }
    }

    /// Registers a channel, unmuted. Returns false if it already existed.
    ///
    /// The reserved system channel is never registered.
    pub fn add_channel(&mut self, name: &str) -> bool {
        if name == SYSTEM_CHANNEL || self.channels.contains_key(name) {
            return false;
        }
        self.channels.insert(name.to_string(), ChannelState::default());
        self.by_channel.insert(name.to_string(), HashMap::new());
        true
    }

    /// Removes a channel and every subscription on it. Subscribers are kept.
    pub fn remove_channel(&mut self, name: &str) -> bool {
        if self.channels.remove(name).is_none() {
            return false;
        }
        if let Some(subs) = self.by_channel.remove(name) {
            for id in subs.keys() {
                if let Some(channels) = self.by_subscriber.get_mut(id) {
                    channels.remove(name);
                }
            }
        }
        true
    }

    /// Subscribes `id` to `channel`, creating the channel if needed and replacing
    /// the subscriber's callback. An existing subscription keeps its mute flag.
    ///
    /// Returns true if a new subscription was created.
    pub fn subscribe(&mut self, id: K, channel: &str, callback: Callback<K>) -> bool {
        if channel == SYSTEM_CHANNEL {
            return false;
        }
        self.add_channel(channel);
        self.callbacks.insert(id.clone(), callback);

        let subs = self.by_channel.entry(channel.to_string()).or_default();
        let created = !subs.contains_key(&id);
        if created {
            subs.insert(id.clone(), SubscriptionState::default());
        }
        self.by_subscriber.entry(id).or_default().insert(channel.to_string());
        created
    }

    /// Removes the subscription of `id` on `channel`. The channel stays, even with
    /// no subscriptions left, and so does the subscriber.
    pub fn unsubscribe(&mut self, id: &K, channel: &str) -> bool {
        let removed = self
            .by_channel
            .get_mut(channel)
            .is_some_and(|subs| subs.remove(id).is_some());
        if removed {
            if let Some(channels) = self.by_subscriber.get_mut(id) {
                channels.remove(channel);
            }
        }
        removed
    }

    /// Removes a subscriber and all of its subscriptions.
    pub fn remove_subscriber(&mut self, id: &K) -> bool {
        let known = self.callbacks.remove(id).is_some();
        if let Some(channels) = self.by_subscriber.remove(id) {
            for channel in &channels {
                if let Some(subs) = self.by_channel.get_mut(channel) {
                    subs.remove(id);
                }
            }
        }
        known
    }

    /// Sets a channel's mute flag. Returns false if the channel does not exist.
    pub fn mute_channel(&mut self, name: &str, muted: bool) -> bool {
        match self.channels.get_mut(name) {
            Some(state) => {
                state.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Sets a subscription's mute flag. Returns false if there is no such subscription.
    pub fn mute_subscription(&mut self, id: &K, channel: &str, muted: bool) -> bool {
        match self.by_channel.get_mut(channel).and_then(|subs| subs.get_mut(id)) {
            Some(state) => {
                state.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// State of one channel, if registered.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<ChannelState> {
        self.channels.get(name).copied()
    }

    /// All channels with their state, ordered by name.
    #[must_use]
    pub fn channels(&self) -> BTreeMap<String, ChannelState> {
        self.channels.clone()
    }

    /// Names of channels whose mute flag equals `muted`.
    #[must_use]
    pub fn channels_by_mute(&self, muted: bool) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, state)| state.muted == muted)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Subscriptions on `channel`. Empty if the channel does not exist.
    #[must_use]
    pub fn subscriptions(&self, channel: &str) -> Vec<(K, SubscriptionState)> {
        self.by_channel
            .get(channel)
            .map(|subs| subs.iter().map(|(id, state)| (id.clone(), *state)).collect())
            .unwrap_or_default()
    }

    /// `(channel, subscriber)` pairs whose subscription mute flag equals `muted`,
    /// over one channel or all of them.
    #[must_use]
    pub fn subscriptions_by_mute(&self, muted: bool, channel: Option<&str>) -> Vec<(String, K)> {
        self.by_channel
            .iter()
            .filter(|(name, _)| channel.map_or(true, |c| c == name.as_str()))
            .flat_map(|(name, subs)| {
                subs.iter()
                    .filter(move |(_, state)| state.muted == muted)
                    .map(move |(id, _)| (name.clone(), id.clone()))
            })
            .collect()
    }

    /// Known subscriber ids.
    #[must_use]
    pub fn subscribers(&self) -> Vec<K> {
        self.callbacks.keys().cloned().collect()
    }

    #[must_use]
    #[allow(missing_docs)]
    pub fn contains_subscriber(&self, id: &K) -> bool {
        self.callbacks.contains_key(id)
    }

    /// Channels `id` is subscribed to, ordered by name.
    #[must_use]
    pub fn channels_of(&self, id: &K) -> Vec<String> {
        self.by_subscriber
            .get(id)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Callbacks to invoke for an event on `channel`: every unmuted subscription,
    /// or nothing when the channel is muted or unknown.
    pub(crate) fn delivery_targets(&self, channel: &str) -> Vec<(K, Callback<K>)> {
        if self.channels.get(channel).map_or(true, |state| state.muted) {
            return Vec::new();
        }
        let Some(subs) = self.by_channel.get(channel) else {
            return Vec::new();
        };
        subs.iter()
            .filter(|(_, state)| !state.muted)
            .filter_map(|(id, _)| self.callbacks.get(id).map(|cb| (id.clone(), Arc::clone(cb))))
            .collect()
    }

    pub(crate) fn iter_channels(&self) -> impl Iterator<Item = (&str, ChannelState)> {
        self.channels.iter().map(|(name, state)| (name.as_str(), *state))
    }

    pub(crate) fn has_unmuted_subscription(&self, channel: &str) -> bool {
        self.by_channel
            .get(channel)
            .is_some_and(|subs| subs.values().any(|state| !state.muted))
    }
}

impl<K> Default for Registry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Registry<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("channels", &self.channels)
            .field("subscribers", &self.callbacks.len())
            .field("by_subscriber", &self.by_subscriber)
            .finish()
    }
}
