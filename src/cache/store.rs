//! Tiered cache store: a volatile in-process tier backed by an optional
//! durable tier.
//!
//! Entries live in the volatile tier for speed; stores whose policy persists
//! write through to the durable tier and lazily repopulate the volatile tier
//! from it on a memory miss. Expiry is checked on read, not actively swept,
//! apart from an opportunistic sweep on writes.

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::policy::CachePolicy;
use super::storage::DurableStorage;

/// Writes between opportunistic expired-entry sweeps.
const SWEEP_INTERVAL: u32 = 32;

/// A single cache entry. The durable tier holds the serialized mirror of
/// exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub data: Value,
  /// Creation time, epoch milliseconds
  pub timestamp: i64,
  /// Expiry time, epoch milliseconds; valid iff now < expiry
  pub expiry: i64,
  pub key: String,
}

impl CacheEntry {
  fn is_valid(&self, now: i64) -> bool {
    now < self.expiry
  }
}

/// Diagnostic counters for one store.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub name: String,
  pub volatile_entries: usize,
  pub durable_entries: usize,
  /// Approximate serialized size of the volatile tier, in bytes
  pub approx_bytes: usize,
}

/// One named cache store with a fixed policy.
pub struct TieredCache {
  name: String,
  policy: CachePolicy,
  volatile: Mutex<HashMap<String, CacheEntry>>,
  durable: Option<Arc<dyn DurableStorage>>,
  writes: AtomicU32,
}

impl TieredCache {
  /// Create a store. The durable backend is only used when the policy
  /// persists.
  pub fn new(name: &str, policy: CachePolicy, durable: Option<Arc<dyn DurableStorage>>) -> Self {
    Self {
      name: name.to_string(),
      policy,
      volatile: Mutex::new(HashMap::new()),
      durable: if policy.persist { durable } else { None },
      writes: AtomicU32::new(0),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn policy(&self) -> &CachePolicy {
    &self.policy
  }

  fn durable_key(&self, key: &str) -> String {
    format!("cache:{}:{}", self.name, key)
  }

  fn durable_prefix(&self) -> String {
    format!("cache:{}:", self.name)
  }

  fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
  }

  /// Look up a valid entry. Checks the volatile tier first, then the durable
  /// tier, repopulating the volatile tier on a durable hit. A miss has no
  /// side effects.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let now = Self::now_ms();

    {
      let volatile = self.volatile.lock().ok()?;
      if let Some(entry) = volatile.get(key) {
        if entry.is_valid(now) {
          return decode(&self.name, key, &entry.data);
        }
        // Expired in memory; fall through without touching it
      }
    }

    let entry = self.durable_lookup(key)?;
    if !entry.is_valid(now) {
      return None;
    }

    let value = decode(&self.name, key, &entry.data);
    if value.is_some() {
      if let Ok(mut volatile) = self.volatile.lock() {
        volatile.insert(key.to_string(), entry);
      }
    }
    value
  }

  /// Look up an entry ignoring expiry. Used as a degraded fallback when the
  /// remote API is unreachable.
  pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    {
      let volatile = self.volatile.lock().ok()?;
      if let Some(entry) = volatile.get(key) {
        return decode(&self.name, key, &entry.data);
      }
    }

    let entry = self.durable_lookup(key)?;
    decode(&self.name, key, &entry.data)
  }

  fn durable_lookup(&self, key: &str) -> Option<CacheEntry> {
    let durable = self.durable.as_ref()?;
    match durable.get(&self.durable_key(key)) {
      Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
          warn!(store = %self.name, key, "Discarding unreadable durable entry: {}", e);
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(store = %self.name, key, "Durable tier read failed: {}", e);
        None
      }
    }
  }

  /// Store a value. Writes through to the durable tier when the policy
  /// persists; durable failures are logged and the volatile write stands.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
    let data = match serde_json::to_value(value) {
      Ok(v) => v,
      Err(e) => {
        warn!(store = %self.name, key, "Failed to serialize cache value: {}", e);
        return;
      }
    };

    let now = Self::now_ms();
    let ttl = ttl.unwrap_or(self.policy.default_ttl);
    let entry = CacheEntry {
      data,
      timestamp: now,
      expiry: now + ttl.num_milliseconds(),
      key: key.to_string(),
    };

    if let Some(durable) = &self.durable {
      match serde_json::to_string(&entry) {
        Ok(raw) => {
          if let Err(e) = durable.set(&self.durable_key(key), &raw) {
            warn!(store = %self.name, key, "Durable tier write failed: {}", e);
          }
        }
        Err(e) => warn!(store = %self.name, key, "Failed to serialize entry: {}", e),
      }
    }

    if let Ok(mut volatile) = self.volatile.lock() {
      volatile.insert(key.to_string(), entry);
      self.enforce_capacity(&mut volatile);
    }

    if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
      self.sweep_expired();
    }
  }

  /// Evict oldest-first until the volatile tier is within capacity.
  fn enforce_capacity(&self, volatile: &mut HashMap<String, CacheEntry>) {
    while volatile.len() > self.policy.max_volatile_entries {
      let oldest = volatile
        .values()
        .min_by_key(|e| e.timestamp)
        .map(|e| e.key.clone());
      match oldest {
        Some(key) => {
          debug!(store = %self.name, key = %key, "Evicting oldest entry");
          volatile.remove(&key);
        }
        None => break,
      }
    }
  }

  /// Drop expired entries so unread keys cannot accumulate forever.
  pub fn sweep_expired(&self) {
    let now = Self::now_ms();
    let swept: Vec<String> = match self.volatile.lock() {
      Ok(mut volatile) => {
        let expired: Vec<String> = volatile
          .values()
          .filter(|e| !e.is_valid(now))
          .map(|e| e.key.clone())
          .collect();
        for key in &expired {
          volatile.remove(key);
        }
        expired
      }
      Err(_) => return,
    };

    if let Some(durable) = &self.durable {
      for key in &swept {
        if let Err(e) = durable.remove(&self.durable_key(key)) {
          warn!(store = %self.name, key = %key, "Durable sweep failed: {}", e);
        }
      }
    }

    if !swept.is_empty() {
      debug!(store = %self.name, count = swept.len(), "Swept expired entries");
    }
  }

  /// Remove one key from both tiers unconditionally.
  pub fn delete(&self, key: &str) {
    if let Ok(mut volatile) = self.volatile.lock() {
      volatile.remove(key);
    }
    if let Some(durable) = &self.durable {
      if let Err(e) = durable.remove(&self.durable_key(key)) {
        warn!(store = %self.name, key, "Durable delete failed: {}", e);
      }
    }
  }

  /// Remove every key matching a `*`-wildcard pattern from both tiers.
  /// Returns the number of distinct keys removed; zero matches is a no-op.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    let mut removed: Vec<String> = Vec::new();

    if let Ok(mut volatile) = self.volatile.lock() {
      let matching: Vec<String> = volatile
        .keys()
        .filter(|k| glob_match(pattern, k))
        .cloned()
        .collect();
      for key in matching {
        volatile.remove(&key);
        removed.push(key);
      }
    }

    if let Some(durable) = &self.durable {
      let prefix = self.durable_prefix();
      match durable.keys_with_prefix(&prefix) {
        Ok(keys) => {
          for full_key in keys {
            let key = &full_key[prefix.len()..];
            if glob_match(pattern, key) {
              if let Err(e) = durable.remove(&full_key) {
                warn!(store = %self.name, key, "Durable invalidation failed: {}", e);
              }
              if !removed.iter().any(|r| r == key) {
                removed.push(key.to_string());
              }
            }
          }
        }
        Err(e) => warn!(store = %self.name, "Durable key listing failed: {}", e),
      }
    }

    if !removed.is_empty() {
      debug!(store = %self.name, pattern, count = removed.len(), "Invalidated entries");
    }
    removed.len()
  }

  /// Drop every entry in both tiers.
  pub fn clear(&self) {
    if let Ok(mut volatile) = self.volatile.lock() {
      volatile.clear();
    }
    if let Some(durable) = &self.durable {
      match durable.keys_with_prefix(&self.durable_prefix()) {
        Ok(keys) => {
          for key in keys {
            if let Err(e) = durable.remove(&key) {
              warn!(store = %self.name, "Durable clear failed for {}: {}", key, e);
            }
          }
        }
        Err(e) => warn!(store = %self.name, "Durable key listing failed: {}", e),
      }
    }
  }

  /// Entry counts and an approximate size. Diagnostic only.
  pub fn stats(&self) -> CacheStats {
    let (volatile_entries, approx_bytes) = match self.volatile.lock() {
      Ok(volatile) => (
        volatile.len(),
        volatile
          .values()
          .map(|e| e.data.to_string().len())
          .sum(),
      ),
      Err(_) => (0, 0),
    };

    let durable_entries = self
      .durable
      .as_ref()
      .and_then(|d| d.keys_with_prefix(&self.durable_prefix()).ok())
      .map(|keys| keys.len())
      .unwrap_or(0);

    CacheStats {
      name: self.name.clone(),
      volatile_entries,
      durable_entries,
      approx_bytes,
    }
  }

  #[cfg(test)]
  pub(crate) fn entry_meta(&self, key: &str) -> Option<(i64, i64)> {
    let volatile = self.volatile.lock().ok()?;
    volatile.get(key).map(|e| (e.timestamp, e.expiry))
  }
}

fn decode<T: DeserializeOwned>(store: &str, key: &str, data: &Value) -> Option<T> {
  match serde_json::from_value(data.clone()) {
    Ok(v) => Some(v),
    Err(e) => {
      warn!(store, key, "Cached value has unexpected shape: {}", e);
      None
    }
  }
}

/// Match a key against a pattern where `*` stands for any run of characters.
/// Everything else is literal and the pattern is anchored at both ends.
pub fn glob_match(pattern: &str, key: &str) -> bool {
  let segments: Vec<&str> = pattern.split('*').collect();
  if segments.len() == 1 {
    return pattern == key;
  }

  let mut rest = key;

  let first = segments[0];
  if !first.is_empty() {
    match rest.strip_prefix(first) {
      Some(r) => rest = r,
      None => return false,
    }
  }

  let last = segments[segments.len() - 1];
  for segment in &segments[1..segments.len() - 1] {
    if segment.is_empty() {
      continue;
    }
    match rest.find(segment) {
      Some(pos) => rest = &rest[pos + segment.len()..],
      None => return false,
    }
  }

  if last.is_empty() {
    true
  } else {
    rest.ends_with(last) && rest.len() >= last.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use std::thread::sleep;

  fn memory_policy(max: usize) -> CachePolicy {
    CachePolicy::new(Duration::minutes(5), max, false)
  }

  fn persisted_policy() -> CachePolicy {
    CachePolicy::new(Duration::minutes(5), 100, true)
  }

  #[test]
  fn test_get_after_set_within_ttl() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("k", &"hello", None);

    assert_eq!(cache.get::<String>("k"), Some("hello".to_string()));
  }

  #[test]
  fn test_entry_expires_after_ttl() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("k", &42u32, Some(Duration::milliseconds(30)));

    assert_eq!(cache.get::<u32>("k"), Some(42));
    sleep(std::time::Duration::from_millis(50));
    assert_eq!(cache.get::<u32>("k"), None);
  }

  #[test]
  fn test_get_does_not_touch_entry_metadata() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("k", &1u32, None);

    let before = cache.entry_meta("k").unwrap();
    cache.get::<u32>("k");
    cache.get::<u32>("k");
    let after = cache.entry_meta("k").unwrap();

    assert_eq!(before, after);
  }

  #[test]
  fn test_delete_removes_entry() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("k", &1u32, None);
    cache.delete("k");

    assert_eq!(cache.get::<u32>("k"), None);
  }

  #[test]
  fn test_eviction_drops_oldest_first() {
    let cache = TieredCache::new("test", memory_policy(2), None);

    cache.set("first", &1u32, None);
    sleep(std::time::Duration::from_millis(5));
    cache.set("second", &2u32, None);
    sleep(std::time::Duration::from_millis(5));
    cache.set("third", &3u32, None);

    assert_eq!(cache.get::<u32>("first"), None);
    assert_eq!(cache.get::<u32>("second"), Some(2));
    assert_eq!(cache.get::<u32>("third"), Some(3));
  }

  #[test]
  fn test_invalidate_pattern_removes_exact_subset() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("productos:list:aa", &1u32, None);
    cache.set("productos:detail:bb", &2u32, None);
    cache.set("pedidos:list:cc", &3u32, None);

    let removed = cache.invalidate_pattern("*productos*");
    assert_eq!(removed, 2);

    assert_eq!(cache.get::<u32>("productos:list:aa"), None);
    assert_eq!(cache.get::<u32>("productos:detail:bb"), None);
    assert_eq!(cache.get::<u32>("pedidos:list:cc"), Some(3));
  }

  #[test]
  fn test_invalidate_pattern_no_matches_is_noop() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("k", &1u32, None);

    assert_eq!(cache.invalidate_pattern("*empleados*"), 0);
    assert_eq!(cache.get::<u32>("k"), Some(1));
  }

  #[test]
  fn test_durable_tier_repopulates_volatile() {
    let storage = MemoryStorage::new();
    let cache = TieredCache::new("test", persisted_policy(), Some(Arc::new(storage.clone())));
    cache.set("k", &"persisted", None);

    // Fresh store over the same durable backend simulates a reload
    let reloaded = TieredCache::new("test", persisted_policy(), Some(Arc::new(storage)));
    assert_eq!(
      reloaded.get::<String>("k"),
      Some("persisted".to_string())
    );
    // And the volatile tier was repopulated
    assert!(reloaded.entry_meta("k").is_some());
  }

  #[test]
  fn test_stale_entry_readable_via_get_stale() {
    let storage = MemoryStorage::new();
    let cache = TieredCache::new("test", persisted_policy(), Some(Arc::new(storage)));
    cache.set("k", &7u32, Some(Duration::milliseconds(20)));

    sleep(std::time::Duration::from_millis(40));
    assert_eq!(cache.get::<u32>("k"), None);
    assert_eq!(cache.get_stale::<u32>("k"), Some(7));
  }

  #[test]
  fn test_clear_drops_both_tiers() {
    let storage = MemoryStorage::new();
    let cache = TieredCache::new("test", persisted_policy(), Some(Arc::new(storage.clone())));
    cache.set("a", &1u32, None);
    cache.set("b", &2u32, None);

    cache.clear();
    assert_eq!(cache.stats().volatile_entries, 0);
    assert!(storage.keys_with_prefix("cache:test:").unwrap().is_empty());
  }

  #[test]
  fn test_stats_counts_entries() {
    let cache = TieredCache::new("test", memory_policy(10), None);
    cache.set("a", &vec![1, 2, 3], None);
    cache.set("b", &"value", None);

    let stats = cache.stats();
    assert_eq!(stats.name, "test");
    assert_eq!(stats.volatile_entries, 2);
    assert_eq!(stats.durable_entries, 0);
    assert!(stats.approx_bytes > 0);
  }

  #[test]
  fn test_glob_match() {
    assert!(glob_match("*productos*", "productos:list:ab12"));
    assert!(glob_match("*productos*", "cached:productos"));
    assert!(glob_match("productos:*", "productos:detail:ff"));
    assert!(!glob_match("productos:*", "pedidos:productos"));
    assert!(glob_match("exact", "exact"));
    assert!(!glob_match("exact", "exactly"));
    assert!(glob_match("*:detail:*", "productos:detail:ab"));
    assert!(!glob_match("*:detail:*", "productos:list:ab"));
    assert!(glob_match("*", "anything"));
  }
}
