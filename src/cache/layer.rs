//! Cache-aside orchestration over a remote fetch.
//!
//! A hit never touches the network; a miss performs exactly one remote call
//! and stores the result. When the remote call fails because the network is
//! unreachable, an expired entry is served as a degraded fallback if one
//! exists.

use color_eyre::{eyre::Report, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, warn};

use super::policy::StoreKind;
use super::store::TieredCache;

/// Per-call cache overrides.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
  /// Override the store's default TTL for this write
  pub ttl: Option<chrono::Duration>,
  /// Bypass the cache entirely: no read, no write
  pub skip_cache: bool,
  /// Route the operation to a different named store than its default
  pub store: Option<StoreKind>,
}

impl FetchOptions {
  pub fn no_cache() -> Self {
    Self {
      skip_cache: true,
      ..Self::default()
    }
  }

  pub fn with_ttl(ttl: chrono::Duration) -> Self {
    Self {
      ttl: Some(ttl),
      ..Self::default()
    }
  }
}

/// Failure caused by an unreachable network, as opposed to the remote API
/// rejecting the call. Drives the stale-fallback path.
#[derive(Debug)]
pub struct ConnectivityError(pub String);

impl std::fmt::Display for ConnectivityError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "network unreachable: {}", self.0)
  }
}

impl std::error::Error for ConnectivityError {}

/// Whether an error anywhere in the chain marks a connectivity failure.
pub fn is_connectivity_error(err: &Report) -> bool {
  if err.downcast_ref::<ConnectivityError>().is_some() {
    return true;
  }
  err
    .downcast_ref::<reqwest::Error>()
    .map(|e| e.is_connect() || e.is_timeout())
    .unwrap_or(false)
}

/// Fetch through the cache.
///
/// `skip_cache` calls the remote operation directly without reading or
/// populating the cache. Otherwise: return a valid cached value if present,
/// else call the fetcher once and store the result under `key`.
pub async fn fetch_with_cache<T, F, Fut>(
  cache: &TieredCache,
  key: &str,
  opts: &FetchOptions,
  fetcher: F,
) -> Result<T>
where
  T: Serialize + DeserializeOwned,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  if opts.skip_cache {
    return fetcher().await;
  }

  if let Some(hit) = cache.get::<T>(key) {
    debug!(store = cache.name(), key, "Cache hit");
    return Ok(hit);
  }

  match fetcher().await {
    Ok(data) => {
      cache.set(key, &data, opts.ttl);
      Ok(data)
    }
    Err(e) if is_connectivity_error(&e) => match cache.get_stale::<T>(key) {
      Some(stale) => {
        warn!(store = cache.name(), key, "Network unreachable, serving stale entry");
        Ok(stale)
      }
      None => Err(e),
    },
    Err(e) => Err(e),
  }
}
