//! Per-store cache policies.

use chrono::Duration;

/// The four named stores, used for per-call store overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
  Static,
  Dynamic,
  User,
  Session,
}

/// Immutable policy for one named cache store, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
  /// TTL applied when a `set` does not override it
  pub default_ttl: Duration,
  /// Volatile-tier capacity; oldest entries are evicted past this
  pub max_volatile_entries: usize,
  /// Whether entries are written through to the durable tier
  pub persist: bool,
}

impl CachePolicy {
  pub fn new(default_ttl: Duration, max_volatile_entries: usize, persist: bool) -> Self {
    Self {
      default_ttl,
      max_volatile_entries,
      persist,
    }
  }

  /// Catalog-like data: long TTL, persisted, large capacity.
  pub fn static_data() -> Self {
    Self::new(Duration::minutes(30), 500, true)
  }

  /// Volatile data such as stock and order lists: short TTL, memory-only.
  pub fn dynamic_data() -> Self {
    Self::new(Duration::minutes(2), 200, false)
  }

  /// Per-identity records: medium TTL, persisted.
  pub fn user_data() -> Self {
    Self::new(Duration::minutes(15), 200, true)
  }

  /// Session/profile data: long TTL, persisted.
  pub fn session_data() -> Self {
    Self::new(Duration::hours(24), 100, true)
  }
}
