//! Access control settings and the configuration store interface.
//!
//! The configuration collaborator owns persistence; the core only reads a
//! point-in-time [`Settings`] snapshot through [`ConfigStore`]. Lookups never
//! fail: a missing store falls back to defaults.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Access control snapshot used by prefiltering and permission gates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The privileged operator account. `0` means no master is configured.
    pub master: i64,
    /// Trusted users (in addition to the master).
    pub white_users: Vec<i64>,
    /// Users whose events are dropped before dispatch.
    pub black_users: Vec<i64>,
    /// When non-empty, only these groups are dispatched.
    pub white_groups: Vec<i64>,
    /// Groups whose events are dropped. Ignored when `white_groups` is set.
    pub black_groups: Vec<i64>,
    /// Drops private messages from everyone but the master.
    pub block_private: bool,
}

impl Settings {
    /// Returns `true` when `user_id` is the configured master.
    pub fn is_master(&self, user_id: i64) -> bool {
        self.master != 0 && self.master == user_id
    }

    /// Returns `true` for the master and whitelisted users.
    pub fn is_white(&self, user_id: i64) -> bool {
        self.is_master(user_id) || self.white_users.contains(&user_id)
    }
}

/// Read access to the current settings snapshot.
pub trait ConfigStore: Send + Sync {
    fn settings(&self) -> Settings;
}

/// A shared config store trait object.
pub type BoxedConfigStore = Arc<dyn ConfigStore>;

/// In-memory config store.
///
/// Serves as the default store and as the test double.
#[derive(Default)]
pub struct MemoryConfig {
    inner: RwLock<Settings>,
}

impl MemoryConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Replaces the current snapshot.
    pub fn set(&self, settings: Settings) {
        *self.inner.write() = settings;
    }
}

impl ConfigStore for MemoryConfig {
    fn settings(&self) -> Settings {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_is_white() {
        let settings = Settings {
            master: 100,
            white_users: vec![200],
            ..Default::default()
        };
        assert!(settings.is_master(100));
        assert!(!settings.is_master(200));
        assert!(settings.is_white(100));
        assert!(settings.is_white(200));
        assert!(!settings.is_white(300));
    }

    #[test]
    fn zero_master_matches_nobody() {
        let settings = Settings::default();
        assert!(!settings.is_master(0));
    }

    #[test]
    fn memory_store_swaps_snapshots() {
        let store = MemoryConfig::default();
        assert_eq!(store.settings().master, 0);
        store.set(Settings {
            master: 7,
            ..Default::default()
        });
        assert_eq!(store.settings().master, 7);
    }
}
