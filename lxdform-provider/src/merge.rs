//! Three-way config merge between user config, live config and the keys the
//! daemon computes on its own.
//!
//! Empty values in user config mean "unset": they are never sent to the
//! daemon, but stay in state so the attribute does not lose them.

use lxdform_client::api::ConfigMap;
use tracing::debug;

/// Prefix of keys the daemon maintains for every object.
pub const VOLATILE_PREFIX: &str = "volatile.";

/// Keys the daemon may fill in by itself.
///
/// Entries ending in `.` match every key with that prefix; anything else
/// matches literally. The volatile prefix is always included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedKeys {
    keys: Vec<String>,
}

impl Default for ComputedKeys {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ComputedKeys {
    pub fn new(keys: &[&str]) -> Self {
        let mut all: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        if !all.iter().any(|k| k == VOLATILE_PREFIX) {
            all.push(VOLATILE_PREFIX.to_string());
        }
        Self { keys: all }
    }

    /// Only the volatile prefix.
    pub fn volatile() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| {
            if k.ends_with('.') {
                key.starts_with(k.as_str())
            } else {
                key == k
            }
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Config sent to the daemon on update.
///
/// User entries with a value, plus live entries the daemon computed and the
/// user did not declare.
pub fn merge_for_write(live: &ConfigMap, user: &ConfigMap, computed: &ComputedKeys) -> ConfigMap {
    let mut write: ConfigMap = user
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (k, v) in live {
        if !v.is_empty() && computed.contains(k) && !user.contains_key(k) {
            debug!(key = %k, "Keeping computed key");
            write.insert(k.clone(), v.clone());
        }
    }

    write
}

/// Config stored in state after a read.
///
/// Live entries with a value, minus computed keys the user did not declare,
/// plus the user's empty entries.
pub fn strip_for_state(live: &ConfigMap, user: &ConfigMap, computed: &ComputedKeys) -> ConfigMap {
    let mut stored: ConfigMap = live
        .iter()
        .filter(|(k, v)| !v.is_empty() && (!computed.contains(k) || user.contains_key(*k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (k, v) in user {
        if v.is_empty() {
            stored.insert(k.clone(), String::new());
        }
    }

    stored
}

/// Full live config as exposed in `config_state`: everything except volatile
/// keys the user did not declare.
pub fn config_state(live: &ConfigMap, user: &ConfigMap) -> ConfigMap {
    let volatile = ComputedKeys::volatile();
    live.iter()
        .filter(|(k, v)| !v.is_empty() && (!volatile.contains(k) || user.contains_key(*k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Expected `config_state` after applying `user` on top of the previous one.
pub fn planned_config_state(
    prior_state: &ConfigMap,
    user: &ConfigMap,
    computed: &ComputedKeys,
) -> ConfigMap {
    config_state(&merge_for_write(prior_state, user, computed), user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn network_keys() -> ComputedKeys {
        ComputedKeys::new(&["ipv4.address", "ipv4.nat", "ipv6.address", "ipv6.nat"])
    }

    #[test]
    fn test_membership() {
        let keys = ComputedKeys::new(&["source", "zfs.pool_name"]);
        assert!(keys.contains("volatile.eth0.hwaddr"));
        assert!(!keys.contains("volatile"));
        assert!(keys.contains("source"));
        assert!(!keys.contains("source.extra"));
        assert!(!keys.contains("size"));
        assert_eq!(ComputedKeys::new(&["volatile."]).keys().len(), 1);
    }

    #[test]
    fn test_merge_for_write() {
        let live = map(&[
            ("ipv4.address", "10.0.0.1/24"),
            ("ipv4.nat", "true"),
            ("ipv6.address", ""),
            ("bridge.mtu", "1500"),
            ("volatile.bridge.hwaddr", "00:16:3e:00:00:01"),
        ]);
        let user = map(&[("ipv4.nat", "false"), ("dns.domain", "lxd"), ("bridge.mtu", "")]);

        let write = merge_for_write(&live, &user, &network_keys());

        assert_eq!(
            write,
            map(&[
                ("dns.domain", "lxd"),
                ("ipv4.address", "10.0.0.1/24"),
                ("ipv4.nat", "false"),
                ("volatile.bridge.hwaddr", "00:16:3e:00:00:01"),
            ])
        );
    }

    #[test]
    fn test_merge_for_write_exact_contents() {
        let keys = network_keys();
        let lives = [
            map(&[]),
            map(&[("ipv4.address", "a"), ("x", "1")]),
            map(&[("ipv4.nat", ""), ("volatile.a", "v"), ("y", "2")]),
        ];
        let users = [
            map(&[]),
            map(&[("ipv4.address", "")]),
            map(&[("x", "3"), ("volatile.a", "u"), ("z", "")]),
        ];

        for live in &lives {
            for user in &users {
                let write = merge_for_write(live, user, &keys);
                for (k, v) in &write {
                    let from_user = user.get(k) == Some(v) && !v.is_empty();
                    let from_live = live.get(k) == Some(v)
                        && !v.is_empty()
                        && keys.contains(k)
                        && !user.contains_key(k);
                    assert!(from_user || from_live, "unexpected {}={}", k, v);
                }
                for (k, v) in user {
                    if !v.is_empty() {
                        assert_eq!(write.get(k), Some(v));
                    }
                }
            }
        }
    }

    #[test]
    fn test_strip_for_state_network() {
        let live = map(&[
            ("ipv4.address", "10.150.19.1/24"),
            ("ipv4.nat", "true"),
            ("ipv6.address", "fd42::1/64"),
            ("ipv6.nat", "true"),
            ("volatile.bridge.hwaddr", "00:16:3e:aa:bb:cc"),
        ]);
        let user = map(&[("ipv4.address", "10.150.19.1/24")]);

        let stored = strip_for_state(&live, &user, &network_keys());
        assert_eq!(stored, user);

        let state = config_state(&live, &user);
        let mut expected = live.clone();
        expected.remove("volatile.bridge.hwaddr");
        assert_eq!(state, expected);
    }

    #[test]
    fn test_strip_keeps_unset_user_keys() {
        let live = map(&[("size", "10GiB")]);
        let user = map(&[("size", "10GiB"), ("source", "")]);
        let keys = ComputedKeys::new(&["source", "size"]);

        let stored = strip_for_state(&live, &user, &keys);
        assert_eq!(stored, map(&[("size", "10GiB"), ("source", "")]));
    }

    #[test]
    fn test_strip_is_idempotent() {
        let keys = network_keys();
        let live = map(&[
            ("ipv4.address", "a"),
            ("ipv6.nat", "true"),
            ("mtu", "1500"),
            ("volatile.x", "1"),
        ]);
        for user in [
            map(&[]),
            map(&[("ipv6.nat", "true"), ("gone", "")]),
            map(&[("volatile.x", "1")]),
        ] {
            let once = strip_for_state(&live, &user, &keys);
            let twice = strip_for_state(&live, &once, &keys);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_planned_config_state() {
        let prior = map(&[("ipv4.address", "10.0.0.1/24"), ("ipv4.nat", "true"), ("mtu", "1500")]);
        let user = map(&[("ipv4.nat", "false"), ("dns.domain", "lxd")]);

        let planned = planned_config_state(&prior, &user, &network_keys());
        assert_eq!(
            planned,
            map(&[("dns.domain", "lxd"), ("ipv4.address", "10.0.0.1/24"), ("ipv4.nat", "false")])
        );
    }
}
