//! Tiered, TTL-based caching for remote storefront data.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Derives deterministic keys from an operation identity plus parameters
//! - Keeps entries in a fast volatile tier backed by an optional durable tier
//! - Expires lazily on read, with wildcard pattern invalidation
//! - Serves stale entries as a degraded fallback when the network is down

mod key;
mod layer;
mod policy;
mod storage;
mod store;

pub use key::derive_key;
pub use layer::{fetch_with_cache, is_connectivity_error, ConnectivityError, FetchOptions};
pub use policy::{CachePolicy, StoreKind};
pub use storage::{DurableStorage, MemoryStorage, SqliteStorage};
pub use store::{CacheStats, TieredCache};
