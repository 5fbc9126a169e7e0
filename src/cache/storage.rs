//! Thread-safe in-memory storage with TTL expiry and size-bounded eviction.
//!
//! A store can mirror its entries to a `Persistence` backend. Entries are
//! reloaded when the store is built, and expiry and eviction apply to them
//! as if they had never left memory.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use super::traits::Clock;

/// A stored value with its creation time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
  pub value: V,
  pub created_at: DateTime<Utc>,
}

/// Durable copy of a store's entries.
pub trait Persistence<K, V>: Send + Sync {
  /// Every persisted entry, expired or not.
  fn load(&self) -> Result<Vec<(K, CacheEntry<V>)>>;

  fn save(&self, key: &K, entry: &CacheEntry<V>) -> Result<()>;

  fn delete(&self, keys: &[K]) -> Result<()>;

  fn clear(&self) -> Result<()>;
}

/// Key-value store where entries expire `ttl` after creation.
///
/// Expired entries are dropped lazily: on lookup, before inserts, and when
/// counting. Once `max_entries` live entries exist, inserting a new key
/// evicts the single oldest entry.
pub struct TtlStore<K, V> {
  name: &'static str,
  entries: RwLock<HashMap<K, CacheEntry<V>>>,
  ttl: Duration,
  max_entries: usize,
  clock: Arc<dyn Clock>,
  persistence: Option<Arc<dyn Persistence<K, V>>>,
}

impl<K, V> TtlStore<K, V>
where
  K: Eq + Hash + Clone + std::fmt::Debug,
  V: Clone,
{
  pub fn new(name: &'static str, ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
    Self {
      name,
      entries: RwLock::new(HashMap::new()),
      ttl,
      max_entries: max_entries.max(1),
      clock,
      persistence: None,
    }
  }

  /// Build a store backed by `persistence`, starting from its saved entries.
  ///
  /// Saved entries that have expired, or that exceed `max_entries` (oldest
  /// first), are dropped from the backend too.
  pub fn with_persistence(
    name: &'static str,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    persistence: Arc<dyn Persistence<K, V>>,
  ) -> Self {
    let mut store = Self::new(name, ttl, max_entries, clock);

    match persistence.load() {
      Ok(loaded) => {
        debug!(cache = name, count = loaded.len(), "Loaded persisted entries");
        store
          .entries
          .get_mut()
          .unwrap_or_else(PoisonError::into_inner)
          .extend(loaded);
      }
      Err(e) => warn!(cache = name, error = %e, "Could not load persisted cache entries"),
    }
    store.persistence = Some(persistence);

    let now = store.clock.now();
    let mut entries = store.entries.write().unwrap_or_else(PoisonError::into_inner);
    let mut dropped = store.purge_locked(&mut entries, now);
    while entries.len() > store.max_entries {
      match store.oldest_locked(&entries) {
        Some(oldest) => {
          entries.remove(&oldest);
          dropped.push(oldest);
        }
        None => break,
      }
    }
    drop(entries);
    store.forget(&dropped);

    store
  }

  fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - created_at > self.ttl
  }

  /// Get a live entry. An expired entry is removed and reported as absent.
  pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
    let now = self.clock.now();
    {
      let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
      match entries.get(key) {
        None => return None,
        Some(entry) if !self.is_expired(entry.created_at, now) => return Some(entry.clone()),
        Some(_) => {}
      }
    }

    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    // A concurrent put may have refreshed the entry since the read lock was released
    match entries.get(key) {
      None => return None,
      Some(entry) if !self.is_expired(entry.created_at, now) => return Some(entry.clone()),
      Some(_) => {}
    }
    entries.remove(key);
    self.forget(std::slice::from_ref(key));
    debug!(cache = self.name, ?key, "Expired entry removed");
    None
  }

  /// Insert or overwrite an entry.
  pub fn put(&self, key: K, value: V) {
    let now = self.clock.now();
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

    let mut dropped = self.purge_locked(&mut entries, now);

    if !entries.contains_key(&key) && entries.len() >= self.max_entries {
      if let Some(oldest) = self.oldest_locked(&entries) {
        entries.remove(&oldest);
        debug!(cache = self.name, key = ?oldest, "Cache full, evicted oldest entry");
        dropped.push(oldest);
      }
    }
    self.forget(&dropped);

    let entry = CacheEntry {
      value,
      created_at: now,
    };
    if let Some(persistence) = &self.persistence {
      if let Err(e) = persistence.save(&key, &entry) {
        warn!(cache = self.name, ?key, error = %e, "Could not persist cache entry");
      }
    }
    entries.insert(key, entry);
  }

  pub fn remove(&self, key: &K) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let removed = entries.remove(key).is_some();
    if removed {
      self.forget(std::slice::from_ref(key));
    }
    removed
  }

  /// Remove every entry whose key matches; returns how many were removed.
  pub fn remove_where(&self, mut matches: impl FnMut(&K) -> bool) -> usize {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let doomed: Vec<K> = entries.keys().filter(|k| matches(k)).cloned().collect();
    for key in &doomed {
      entries.remove(key);
    }
    self.forget(&doomed);
    doomed.len()
  }

  pub fn clear(&self) {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.clear();
    if let Some(persistence) = &self.persistence {
      if let Err(e) = persistence.clear() {
        warn!(cache = self.name, error = %e, "Could not clear persisted cache");
      }
    }
  }

  /// Number of live entries. Expired entries are purged first.
  pub fn len(&self) -> usize {
    let now = self.clock.now();
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let expired = self.purge_locked(&mut entries, now);
    self.forget(&expired);
    entries.len()
  }

  /// Remove expired entries from the map, returning their keys.
  fn purge_locked(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: DateTime<Utc>) -> Vec<K> {
    let expired: Vec<K> = entries
      .iter()
      .filter(|(_, entry)| self.is_expired(entry.created_at, now))
      .map(|(k, _)| k.clone())
      .collect();
    for key in &expired {
      entries.remove(key);
    }
    if !expired.is_empty() {
      debug!(cache = self.name, purged = expired.len(), "Purged expired entries");
    }
    expired
  }

  fn oldest_locked(&self, entries: &HashMap<K, CacheEntry<V>>) -> Option<K> {
    entries
      .iter()
      .min_by_key(|(_, entry)| entry.created_at)
      .map(|(k, _)| k.clone())
  }

  /// Drop keys from the backend, if any.
  fn forget(&self, keys: &[K]) {
    if keys.is_empty() {
      return;
    }
    if let Some(persistence) = &self.persistence {
      if let Err(e) = persistence.delete(keys) {
        warn!(cache = self.name, error = %e, "Could not delete persisted cache entries");
      }
    }
  }
}
