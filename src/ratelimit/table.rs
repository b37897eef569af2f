//! Sharded identity table shared by the limiter variants.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default number of shards for the identity table.
pub const DEFAULT_SHARDS: usize = 16;

/// Per-identity state that records when it was last touched.
pub trait ClientState {
    /// The timestamp eviction compares against.
    fn last_activity(&self) -> Instant;
}

/// Mapping from identity to client state.
///
/// Each shard is guarded by its own lock. A lookup-check-mutate sequence for
/// one identity runs while holding that identity's shard lock, so calls for
/// the same identity are linearized while calls for identities in other
/// shards proceed in parallel.
#[derive(Debug)]
pub struct IdentityTable<S> {
    entries: DashMap<String, S>,
}

impl<S: ClientState> IdentityTable<S> {
    /// Create a table with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a table with roughly `shards` shards.
    ///
    /// The shard count is rounded up to a power of two and is at least 2.
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(2).next_power_of_two();
        Self {
            entries: DashMap::with_shard_amount(shards),
        }
    }

    /// Run `decide` against the state for `identity`.
    ///
    /// When the identity is unknown `create` builds its initial state and
    /// `decide` is not called; the first observation of an identity is
    /// always admitted. The identity's shard stays locked for the whole call.
    pub fn admit<C, D>(&self, identity: &str, create: C, decide: D) -> bool
    where
        C: FnOnce() -> S,
        D: FnOnce(&mut S) -> bool,
    {
        if let Some(mut state) = self.entries.get_mut(identity) {
            return decide(state.value_mut());
        }

        // Another caller may have inserted the identity between the lookup
        // above and taking the write lock here.
        match self.entries.entry(identity.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => decide(occupied.get_mut()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(create());
                true
            }
        }
    }

    /// Remove every entry whose last activity is at least `max_age` before `now`.
    ///
    /// Shards are swept one at a time. Returns the number of removed entries.
    pub fn evict_older_than(&self, max_age: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, state| now.saturating_duration_since(state.last_activity()) < max_age);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table tracks no identity.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `identity` currently has state.
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Read a copy of the state for `identity`.
    pub fn get(&self, identity: &str) -> Option<S>
    where
        S: Clone,
    {
        self.entries.get(identity).map(|state| state.value().clone())
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<S: ClientState> Default for IdentityTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
