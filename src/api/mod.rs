//! Remote storefront API: domain types, the raw client, and the cached
//! client UI collaborators talk to.

pub mod cached_client;
pub mod client;
pub mod types;

pub use cached_client::{CacheRegistry, CachedApiClient};
pub use client::ApiClient;
