//! Mute-state evaluation: which channels must be monitored right now.

use std::collections::BTreeSet;
use std::hash::Hash;

use super::registry::Registry;

/// Reserved channel, always monitored and never fanned out to subscribers.
pub const SYSTEM_CHANNEL: &str = "__pgnotifier__";

/// Computes the valid set: every unmuted channel that has at least one unmuted
/// subscription, plus [`SYSTEM_CHANNEL`].
#[must_use]
pub fn valid_set<K>(registry: &Registry<K>) -> BTreeSet<String>
where
    K: Eq + Hash + Clone,
{
    let mut set: BTreeSet<String> = registry
        .iter_channels()
        .filter(|(name, state)| !state.muted && registry.has_unmuted_subscription(name))
        .map(|(name, _)| name.to_string())
        .collect();
    set.insert(SYSTEM_CHANNEL.to_string());
    set
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notifier::registry::Callback;
    use crate::value::Value;

    fn noop() -> Callback<String> {
        Arc::new(|_: &String, _: &str, _: &Value, _: i32| {})
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_empty_registry_monitors_system_channel() {
        let reg: Registry<String> = Registry::new();
        assert_eq!(valid_set(&reg), set(&[SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_channel_without_subscribers_not_monitored() {
        let mut reg: Registry<String> = Registry::new();
        reg.add_channel("orders");
        assert_eq!(valid_set(&reg), set(&[SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_subscription_mutes() {
        let mut reg = Registry::new();
        reg.subscribe("s1".to_string(), "orders", noop());
        reg.subscribe("s2".to_string(), "orders", noop());
        assert_eq!(valid_set(&reg), set(&["orders", SYSTEM_CHANNEL]));

        // One unmuted subscription is enough.
        reg.mute_subscription(&"s1".to_string(), "orders", true);
        assert_eq!(valid_set(&reg), set(&["orders", SYSTEM_CHANNEL]));

        reg.mute_subscription(&"s2".to_string(), "orders", true);
        assert_eq!(valid_set(&reg), set(&[SYSTEM_CHANNEL]));

        reg.mute_subscription(&"s2".to_string(), "orders", false);
        assert_eq!(valid_set(&reg), set(&["orders", SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_channel_mute_overrides_subscriptions() {
        let mut reg = Registry::new();
        reg.subscribe("s1".to_string(), "orders", noop());
        reg.subscribe("s1".to_string(), "users", noop());

        reg.mute_channel("orders", true);
        assert_eq!(valid_set(&reg), set(&["users", SYSTEM_CHANNEL]));

        reg.mute_channel("orders", false);
        assert_eq!(valid_set(&reg), set(&["orders", "users", SYSTEM_CHANNEL]));
    }

    #[test]
    fn test_validity_invariant_over_mixed_states() {
        let mut reg = Registry::new();
        let channels = ["a", "b", "c", "d"];
        for (i, ch) in channels.iter().enumerate() {
            for j in 0..3 {
                reg.subscribe(format!("s{j}"), ch, noop());
                if (i + j) % 2 == 0 {
                    reg.mute_subscription(&format!("s{j}"), ch, true);
                }
            }
        }
        reg.mute_channel("c", true);
        reg.add_channel("e");

        let valid = valid_set(&reg);
        for (name, state) in reg.channels() {
            let expected = !state.muted && reg.subscriptions(&name).iter().any(|(_, s)| !s.muted);
            assert_eq!(valid.contains(&name), expected, "channel {name}");
        }
        assert!(valid.contains(SYSTEM_CHANNEL));
    }
}
