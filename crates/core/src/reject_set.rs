use std::collections::HashMap;

use firefrp_store::{Credential, Store};

/// The in-memory set of credential strings guaranteed to be rejected on the
/// Ping fast path (§4.5). Plain `HashMap` rather than a standalone
/// concurrent set: §5 requires it live under the same state mutex as the
/// rest of the composite state, so there is no need for its own
/// synchronization primitive.
#[derive(Debug, Default)]
pub struct RejectSet {
    /// key -> the wall-clock time (ms) its credential entered a terminal
    /// status, used to prune entries older than the rebuild horizon.
    entries: HashMap<String, i64>,
}

impl RejectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, terminal_at_ms: i64) {
        self.entries.insert(key.into(), terminal_at_ms);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk the credential store and re-add keys whose terminal status was
    /// entered within `horizon_ms` of `now_ms` (§4.5).
    pub fn rebuild_from(store: &Store<Credential>, horizon_ms: i64, now_ms: i64) -> Self {
        let mut set = Self::new();
        for credential in store.all() {
            if credential.status.is_terminal() && now_ms - credential.updated_at <= horizon_ms {
                set.add(credential.key.clone(), credential.updated_at);
            }
        }
        set
    }

    /// Garbage-collect entries older than `horizon_ms`, bounding memory for
    /// a long-running process (§4.5).
    pub fn prune(&mut self, horizon_ms: i64, now_ms: i64) {
        self.entries.retain(|_, &mut terminal_at| now_ms - terminal_at <= horizon_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_contains() {
        let mut set = RejectSet::new();
        assert!(!set.contains("ff-abc"));
        set.add("ff-abc", 1_000);
        assert!(set.contains("ff-abc"));
    }

    #[test]
    fn prune_drops_entries_past_horizon() {
        let mut set = RejectSet::new();
        set.add("ff-old", 0);
        set.add("ff-new", 9_000);
        set.prune(1_000, 10_000);
        assert!(!set.contains("ff-old"));
        assert!(set.contains("ff-new"));
    }
}
