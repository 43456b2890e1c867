use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::aggregator::EffectivePermissionSet;
use super::evaluator::Decision;
use crate::config::AuthzConfig;

/// Identifies one cached decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    /// Requested permission, or the sorted any-of list joined by `|`.
    pub requirement: String,
    /// Target fields of the authorization context that influence scope checks.
    pub context: String,
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    seq: u64,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Map with insertion-ordered eviction. Every entry shares one TTL, so the
/// oldest insertion is also the first to expire.
struct TtlMap<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order. Records whose `seq` no longer matches the live entry
    /// (overwritten or removed keys) are skipped and periodically compacted.
    order: VecDeque<(K, u64)>,
    next_seq: u64,
}

impl<K, V> Default for TtlMap<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn get(&self, key: &K, now: Instant) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: K, value: V, expires_at: Instant, max_entries: usize) {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= max_entries && self.evict_oldest() {}
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(key, CacheEntry { value, seq, expires_at });

        if self.order.len() > max_entries.saturating_mul(2) {
            self.compact();
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|entry| entry.seq == seq) {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
    }

    /// Keeps entries whose key passes `keep`; returns how many were removed.
    fn retain(&mut self, keep: impl Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| keep(key));
        self.compact();
        before - self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Snapshot taken before computing a value; pass it back on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    taken_at: Instant,
}

#[derive(Default)]
struct CacheState {
    decisions: TtlMap<DecisionKey, Decision>,
    permissions: TtlMap<(Uuid, Option<Uuid>), EffectivePermissionSet>,
    /// Bumped by every invalidation.
    epoch: u64,
    /// Last invalidation per user. Records older than the TTL are pruned;
    /// snapshots that old are refused anyway.
    invalidations: HashMap<Uuid, (u64, Instant)>,
}

impl CacheState {
    fn accepts(&self, user_id: Uuid, generation: Generation, ttl: Duration, now: Instant) -> bool {
        if now.saturating_duration_since(generation.taken_at) >= ttl {
            return false;
        }
        self.invalidations
            .get(&user_id)
            .map_or(true, |(epoch, _)| *epoch <= generation.epoch)
    }
}

/// Shared TTL cache for decisions and effective permission sets.
///
/// Every map sits behind one lock, so invalidating a user is atomic with
/// respect to readers.
pub struct DecisionCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_entries: usize,
}

impl DecisionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_entries,
        }
    }

    pub fn from_config(config: &AuthzConfig) -> Self {
        Self::new(config.cache_ttl, config.cache_max_entries)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn generation(&self) -> Generation {
        let state = self.state.read().await;
        Generation {
            epoch: state.epoch,
            taken_at: Instant::now(),
        }
    }

    pub async fn get_decision(&self, key: &DecisionKey) -> Option<Decision> {
        self.state.read().await.decisions.get(key, Instant::now())
    }

    pub async fn put_decision(&self, key: DecisionKey, decision: Decision, generation: Generation) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        let mut state = self.state.write().await;
        let now = Instant::now();
        if !state.accepts(key.user_id, generation, self.ttl, now) {
            tracing::debug!(user_id = %key.user_id, "discarding decision computed before invalidation");
            return;
        }
        let expires_at = self.expiry(now);
        state.decisions.insert(key, decision, expires_at, self.max_entries);
    }

    pub async fn get_permissions(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
    ) -> Option<EffectivePermissionSet> {
        self.state
            .read()
            .await
            .permissions
            .get(&(user_id, company_id), Instant::now())
    }

    pub async fn put_permissions(&self, set: EffectivePermissionSet, generation: Generation) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        let mut state = self.state.write().await;
        let now = Instant::now();
        if !state.accepts(set.user_id, generation, self.ttl, now) {
            return;
        }
        let expires_at = self.expiry(now);
        state
            .permissions
            .insert((set.user_id, set.company_id), set, expires_at, self.max_entries);
    }

    /// Drops every entry of `user_id`. Returns how many entries were removed.
    pub async fn invalidate_user(&self, user_id: Uuid) -> usize {
        let mut state = self.state.write().await;
        let now = Instant::now();
        state.epoch += 1;
        let epoch = state.epoch;
        let ttl = self.ttl;
        state
            .invalidations
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < ttl);
        state.invalidations.insert(user_id, (epoch, now));

        let removed = state.decisions.retain(|key| key.user_id != user_id)
            + state.permissions.retain(|(user, _)| *user != user_id);

        tracing::info!(user_id = %user_id, removed, "permission cache invalidated for user");
        removed
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.decisions.clear();
        state.permissions.clear();
    }

    /// Number of cached decisions and permission sets, expired ones included.
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.decisions.len() + state.permissions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn expiry(&self, now: Instant) -> Instant {
        now.checked_add(self.ttl).unwrap_or(now)
    }
}
