//! Cached storefront client that wraps [`ApiClient`] with transparent
//! caching, mutation-driven invalidation, and the durable order queue.

use color_eyre::Result;
use futures::future::join_all;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{
  derive_key, fetch_with_cache, CachePolicy, CacheStats, DurableStorage, FetchOptions,
  SqliteStorage, StoreKind, TieredCache,
};
use crate::config::Config;
use crate::queue::{LineaPedido, OrderQueue, PendingOperation, ReplayReport};

use super::client::ApiClient;
use super::types::{
  Cliente, DashboardData, DetallePedido, Empleado, NuevoDetalle, NuevoPedido, NuevoProducto,
  Pedido, Producto, Stock,
};

/// TTL for the assembled dashboard composite; it mixes several freshness
/// requirements so it stays deliberately short.
const DASHBOARD_TTL_SECS: i64 = 60;

/// TTL override for product searches.
const SEARCH_TTL_SECS: i64 = 300;

/// The four named cache stores, explicitly constructed and injected.
pub struct CacheRegistry {
  static_store: TieredCache,
  dynamic_store: TieredCache,
  user_store: TieredCache,
  /// No read operation defaults here; callers reach it through the
  /// per-call [`FetchOptions::store`] override.
  session_store: TieredCache,
}

impl CacheRegistry {
  pub fn new(config: &Config, durable: Arc<dyn DurableStorage>) -> Self {
    Self {
      static_store: TieredCache::new(
        "static",
        config.cache.static_data.policy(CachePolicy::static_data()),
        Some(durable.clone()),
      ),
      dynamic_store: TieredCache::new(
        "dynamic",
        config.cache.dynamic_data.policy(CachePolicy::dynamic_data()),
        Some(durable.clone()),
      ),
      user_store: TieredCache::new(
        "user",
        config.cache.user_data.policy(CachePolicy::user_data()),
        Some(durable.clone()),
      ),
      session_store: TieredCache::new(
        "session",
        config.cache.session_data.policy(CachePolicy::session_data()),
        Some(durable),
      ),
    }
  }

  pub fn store(&self, kind: StoreKind) -> &TieredCache {
    match kind {
      StoreKind::Static => &self.static_store,
      StoreKind::Dynamic => &self.dynamic_store,
      StoreKind::User => &self.user_store,
      StoreKind::Session => &self.session_store,
    }
  }

  fn all(&self) -> [&TieredCache; 4] {
    [
      &self.static_store,
      &self.dynamic_store,
      &self.user_store,
      &self.session_store,
    ]
  }

  /// Remove matching keys from every store. Returns total keys removed.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    self
      .all()
      .iter()
      .map(|store| store.invalidate_pattern(pattern))
      .sum()
  }

  pub fn clear_all(&self) {
    for store in self.all() {
      store.clear();
    }
  }

  pub fn stats(&self) -> Vec<CacheStats> {
    self.all().iter().map(|store| store.stats()).collect()
  }
}

/// Storefront client with transparent caching and offline order buffering.
///
/// Wraps the underlying [`ApiClient`] with the same surface: reads go through
/// the cache stores, writes bypass them and invalidate the affected resource
/// family, and order placement is buffered durably before a best-effort
/// immediate delivery.
#[derive(Clone)]
pub struct CachedApiClient {
  inner: ApiClient,
  caches: Arc<CacheRegistry>,
  queue: Arc<OrderQueue>,
}

impl CachedApiClient {
  /// Build a client over the default sqlite-backed durable storage.
  pub fn new(config: &Config) -> Result<Self> {
    let storage: Arc<dyn DurableStorage> = Arc::new(SqliteStorage::open()?);
    Self::from_parts(ApiClient::new(config)?, config, storage)
  }

  /// Build a client over explicit parts. Tests construct fresh stores here
  /// instead of sharing process-wide state.
  pub fn from_parts(
    inner: ApiClient,
    config: &Config,
    storage: Arc<dyn DurableStorage>,
  ) -> Result<Self> {
    let caches = Arc::new(CacheRegistry::new(config, storage.clone()));
    let queue = Arc::new(OrderQueue::new(storage));
    Ok(Self {
      inner,
      caches,
      queue,
    })
  }

  pub fn caches(&self) -> &CacheRegistry {
    &self.caches
  }

  pub fn queue(&self) -> &OrderQueue {
    &self.queue
  }

  fn resolve<'a>(&'a self, default: StoreKind, opts: &FetchOptions) -> &'a TieredCache {
    self.caches.store(opts.store.unwrap_or(default))
  }

  // --- cached reads ---

  pub async fn get_productos(&self, opts: &FetchOptions) -> Result<Vec<Producto>> {
    let key = derive_key("productos:list", None);
    let cache = self.resolve(StoreKind::Static, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_productos().await }
    })
    .await
  }

  pub async fn get_producto(&self, id: i64, opts: &FetchOptions) -> Result<Producto> {
    let key = derive_key("productos:detail", Some(&json!({ "id": id })));
    let cache = self.resolve(StoreKind::Static, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_producto(id).await }
    })
    .await
  }

  pub async fn search_productos(&self, term: &str, opts: &FetchOptions) -> Result<Vec<Producto>> {
    let key = derive_key("productos:search", Some(&json!({ "termino": term })));
    let cache = self.resolve(StoreKind::Static, opts);
    let opts = FetchOptions {
      ttl: opts
        .ttl
        .or(Some(chrono::Duration::seconds(SEARCH_TTL_SECS))),
      ..opts.clone()
    };
    let term = term.to_string();
    fetch_with_cache(cache, &key, &opts, || {
      let inner = self.inner.clone();
      async move { inner.search_productos(&term).await }
    })
    .await
  }

  pub async fn get_stock(&self, producto_id: i64, opts: &FetchOptions) -> Result<Stock> {
    let key = derive_key("productos:stock", Some(&json!({ "id": producto_id })));
    let cache = self.resolve(StoreKind::Dynamic, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_stock(producto_id).await }
    })
    .await
  }

  pub async fn get_pedidos(&self, opts: &FetchOptions) -> Result<Vec<Pedido>> {
    let key = derive_key("pedidos:list", None);
    let cache = self.resolve(StoreKind::Dynamic, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_pedidos().await }
    })
    .await
  }

  pub async fn get_pedidos_by_cliente(
    &self,
    cliente_id: i64,
    opts: &FetchOptions,
  ) -> Result<Vec<Pedido>> {
    let key = derive_key("pedidos:by-cliente", Some(&json!({ "cliente": cliente_id })));
    let cache = self.resolve(StoreKind::Dynamic, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_pedidos_by_cliente(cliente_id).await }
    })
    .await
  }

  pub async fn get_detalles_pedido(
    &self,
    pedido_id: i64,
    opts: &FetchOptions,
  ) -> Result<Vec<DetallePedido>> {
    let key = derive_key("pedidos:detalles", Some(&json!({ "pedido": pedido_id })));
    let cache = self.resolve(StoreKind::Dynamic, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_detalles_pedido(pedido_id).await }
    })
    .await
  }

  pub async fn get_empleado(&self, id: i64, opts: &FetchOptions) -> Result<Empleado> {
    let key = derive_key("empleados:detail", Some(&json!({ "id": id })));
    let cache = self.resolve(StoreKind::User, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_empleado(id).await }
    })
    .await
  }

  pub async fn get_cliente(&self, id: i64, opts: &FetchOptions) -> Result<Cliente> {
    let key = derive_key("clientes:detail", Some(&json!({ "id": id })));
    let cache = self.resolve(StoreKind::User, opts);
    fetch_with_cache(cache, &key, opts, || {
      let inner = self.inner.clone();
      async move { inner.get_cliente(id).await }
    })
    .await
  }

  // --- mutations: always bypass the cache, invalidate on success ---

  pub async fn create_producto(&self, producto: &NuevoProducto) -> Result<Producto> {
    let created = self.inner.create_producto(producto).await?;
    self.caches.invalidate_pattern("*productos*");
    Ok(created)
  }

  pub async fn update_producto(&self, id: i64, producto: &NuevoProducto) -> Result<Producto> {
    let updated = self.inner.update_producto(id, producto).await?;
    self.caches.invalidate_pattern("*productos*");
    Ok(updated)
  }

  pub async fn update_stock(&self, id: i64, stock: i64) -> Result<Producto> {
    let updated = self.inner.update_stock(id, stock).await?;
    self.caches.invalidate_pattern("*productos*");
    Ok(updated)
  }

  pub async fn delete_producto(&self, id: i64) -> Result<()> {
    self.inner.delete_producto(id).await?;
    self.caches.invalidate_pattern("*productos*");
    Ok(())
  }

  pub async fn update_cliente(&self, id: i64, cliente: &Cliente) -> Result<Cliente> {
    let updated = self.inner.update_cliente(id, cliente).await?;
    self.caches.invalidate_pattern("*clientes*");
    Ok(updated)
  }

  // --- order placement and replay ---

  /// Place an order. The entry is persisted to the durable queue first as a
  /// durability buffer, then a best-effort immediate delivery runs; when the
  /// remote API is unreachable the order simply stays queued.
  pub async fn place_pedido(
    &self,
    cliente_id: i64,
    line_items: Vec<LineaPedido>,
    metodo_pago_id: i64,
    estado_envio_id: i64,
    estado_pedido_id: i64,
  ) -> Result<(PendingOperation, ReplayReport)> {
    let entry = self.queue.append(
      cliente_id,
      line_items,
      metodo_pago_id,
      estado_envio_id,
      estado_pedido_id,
    )?;

    let report = match self.replay_pending().await {
      Ok(report) => report,
      Err(e) => {
        warn!("Immediate delivery attempt failed: {}", e);
        ReplayReport::default()
      }
    };

    Ok((entry, report))
  }

  /// Replay every queued order against the remote API, then invalidate the
  /// order caches if anything was delivered.
  pub async fn replay_pending(&self) -> Result<ReplayReport> {
    let create = {
      let inner = self.inner.clone();
      move |entry: PendingOperation| {
        let inner = inner.clone();
        async move {
          let pedido = inner
            .create_pedido(
              &NuevoPedido {
                cliente_id: entry.cliente_id,
                total: entry.total,
                metodo_pago_id: entry.metodo_pago_id,
                estado_envio_id: entry.estado_envio_id,
                estado_pedido_id: entry.estado_pedido_id,
              },
              Some(&entry.idempotency_key),
            )
            .await?;
          Ok(pedido.id)
        }
      }
    };

    let attach = {
      let inner = self.inner.clone();
      move |remote_id: i64, entry: PendingOperation| {
        let inner = inner.clone();
        async move {
          for item in &entry.line_items {
            inner
              .create_detalle(&NuevoDetalle {
                pedido_id: remote_id,
                producto_id: item.producto_id,
                cantidad: item.cantidad,
                precio_unitario: item.precio_unitario,
                subtotal: item.subtotal,
              })
              .await?;
          }
          Ok(())
        }
      }
    };

    let report = self.queue.replay(create, attach).await?;

    if report.synced > 0 {
      self.caches.invalidate_pattern("*pedidos*");
      self.caches.invalidate_pattern("*dashboard*");
    }

    Ok(report)
  }

  /// Best-effort refresh after connectivity returns: drop the hot list keys
  /// and refetch them so the next read is fresh. Every failure is logged and
  /// swallowed.
  pub async fn revalidate(&self) {
    self.caches.store(StoreKind::Static).sweep_expired();
    self.caches.store(StoreKind::Dynamic).sweep_expired();

    let productos_key = derive_key("productos:list", None);
    self.caches.store(StoreKind::Static).delete(&productos_key);
    let pedidos_key = derive_key("pedidos:list", None);
    self.caches.store(StoreKind::Dynamic).delete(&pedidos_key);

    if let Err(e) = self.get_productos(&FetchOptions::default()).await {
      warn!("Product list revalidation failed: {}", e);
    }
    if let Err(e) = self.get_pedidos(&FetchOptions::default()).await {
      warn!("Order list revalidation failed: {}", e);
    }
  }

  // --- aggregate ---

  /// Composite dashboard read: all orders with their lines and every
  /// referenced product resolved exactly once. Sub-fetch failures degrade
  /// (empty line list, placeholder product); only the two primary list
  /// calls are fatal.
  pub async fn get_dashboard_data(&self, opts: &FetchOptions) -> Result<DashboardData> {
    let key = derive_key("dashboard:data", None);
    let cache = self.resolve(StoreKind::Dynamic, opts);
    let opts = FetchOptions {
      ttl: opts
        .ttl
        .or(Some(chrono::Duration::seconds(DASHBOARD_TTL_SECS))),
      ..opts.clone()
    };

    fetch_with_cache(cache, &key, &opts, || {
      let inner = self.inner.clone();
      async move {
        // Both primary lists must succeed
        let (pedidos, productos_catalogo) =
          tokio::try_join!(inner.get_pedidos(), inner.get_productos())?;

        let detalles_client = inner.clone();
        let productos_client = inner.clone();
        Ok(
          assemble_dashboard(
            pedidos,
            productos_catalogo,
            move |pedido_id| {
              let inner = detalles_client.clone();
              async move { inner.get_detalles_pedido(pedido_id).await }
            },
            move |producto_id| {
              let inner = productos_client.clone();
              async move { inner.get_producto(producto_id).await }
            },
          )
          .await,
        )
      }
    })
    .await
  }
}

impl crate::sync::SyncTarget for CachedApiClient {
  async fn replay(&self) -> Result<ReplayReport> {
    self.replay_pending().await
  }

  async fn revalidate(&self) {
    CachedApiClient::revalidate(self).await
  }
}

/// Assemble the dashboard composite from its primary lists.
///
/// Fans out one line-item fetch per order, then one product lookup per
/// distinct product id across all lines. Every fan-out call runs
/// concurrently; individual failures degrade and never escape.
pub async fn assemble_dashboard<FD, FutD, FP, FutP>(
  pedidos: Vec<Pedido>,
  productos_catalogo: Vec<Producto>,
  fetch_detalles: FD,
  fetch_producto: FP,
) -> DashboardData
where
  FD: Fn(i64) -> FutD,
  FutD: Future<Output = Result<Vec<DetallePedido>>>,
  FP: Fn(i64) -> FutP,
  FutP: Future<Output = Result<Producto>>,
{
  let detalle_results = join_all(pedidos.iter().map(|pedido| {
    let fut = fetch_detalles(pedido.id);
    async move { (pedido.id, fut.await) }
  }))
  .await;

  let mut detalles: HashMap<i64, Vec<DetallePedido>> = HashMap::new();
  for (pedido_id, result) in detalle_results {
    match result {
      Ok(lines) => {
        detalles.insert(pedido_id, lines);
      }
      Err(e) => {
        warn!(pedido_id, "Line-item fetch degraded to empty: {}", e);
        detalles.insert(pedido_id, Vec::new());
      }
    }
  }

  // Each distinct product is fetched exactly once no matter how many lines
  // reference it
  let distinct_ids: BTreeSet<i64> = detalles
    .values()
    .flatten()
    .map(|d| d.producto_id)
    .collect();

  let producto_results = join_all(distinct_ids.into_iter().map(|id| {
    let fut = fetch_producto(id);
    async move { (id, fut.await) }
  }))
  .await;

  let mut productos: HashMap<i64, Producto> = HashMap::new();
  for (id, result) in producto_results {
    match result {
      Ok(producto) => {
        productos.insert(id, producto);
      }
      Err(e) => {
        warn!(producto_id = id, "Product lookup degraded to placeholder: {}", e);
        productos.insert(id, Producto::placeholder(id));
      }
    }
  }

  debug!(
    pedidos = pedidos.len(),
    productos = productos.len(),
    "Assembled dashboard data"
  );

  DashboardData {
    pedidos,
    productos_catalogo,
    detalles,
    productos,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::{ApiConfig, CacheConfig, SyncConfig};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn test_config() -> Config {
    Config {
      api: ApiConfig {
        url: "http://localhost:9/api".to_string(),
        timeout_secs: 1,
      },
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
    }
  }

  #[test]
  fn test_store_override_routes_read_to_session_store() {
    let config = test_config();
    let client = CachedApiClient::from_parts(
      ApiClient::new(&config).unwrap(),
      &config,
      Arc::new(MemoryStorage::new()),
    )
    .unwrap();

    let opts = FetchOptions {
      store: Some(StoreKind::Session),
      ..FetchOptions::default()
    };
    assert_eq!(client.resolve(StoreKind::User, &opts).name(), "session");
    assert_eq!(
      client.resolve(StoreKind::User, &FetchOptions::default()).name(),
      "user"
    );
  }

  fn pedido(id: i64) -> Pedido {
    Pedido {
      id,
      cliente_id: 1,
      fecha: "2025-01-01".to_string(),
      total: 10.0,
      metodo_pago_id: 1,
      estado_envio_id: 1,
      estado_pedido_id: 1,
    }
  }

  fn detalle(pedido_id: i64, producto_id: i64) -> DetallePedido {
    DetallePedido {
      id: pedido_id * 100 + producto_id,
      pedido_id,
      producto_id,
      cantidad: 1,
      precio_unitario: 5.0,
      subtotal: 5.0,
    }
  }

  fn producto(id: i64) -> Producto {
    Producto {
      id,
      nombre: format!("Real {}", id),
      descripcion: None,
      precio: 5.0,
      stock: 10,
      categoria_id: None,
    }
  }

  #[tokio::test]
  async fn test_aggregate_substitutes_placeholder_for_failed_lookup() {
    let pedidos = vec![pedido(1)];
    let lines = vec![
      detalle(1, 10),
      detalle(1, 11),
      detalle(1, 12),
      detalle(1, 13),
      detalle(1, 14),
    ];

    let data = assemble_dashboard(
      pedidos,
      Vec::new(),
      move |_| {
        let lines = lines.clone();
        async move { Ok(lines) }
      },
      |id| async move {
        if id == 12 {
          Err(eyre!("404 Not Found"))
        } else {
          Ok(producto(id))
        }
      },
    )
    .await;

    assert_eq!(data.productos.len(), 5);
    assert_eq!(data.productos[&10].nombre, "Real 10");
    assert_eq!(data.productos[&12].nombre, "Producto #12");
    assert_eq!(data.productos[&12].precio, 0.0);
  }

  #[tokio::test]
  async fn test_aggregate_fetches_each_distinct_product_once() {
    // Three orders all referencing the same two products
    let pedidos = vec![pedido(1), pedido(2), pedido(3)];
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in = calls.clone();

    let data = assemble_dashboard(
      pedidos,
      Vec::new(),
      |pedido_id| async move { Ok(vec![detalle(pedido_id, 7), detalle(pedido_id, 8)]) },
      move |id| {
        let calls = calls_in.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(producto(id))
        }
      },
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(data.productos.len(), 2);
    assert_eq!(data.detalles.len(), 3);
  }

  #[tokio::test]
  async fn test_aggregate_degrades_failed_line_fetch_to_empty() {
    let pedidos = vec![pedido(1), pedido(2)];

    let data = assemble_dashboard(
      pedidos,
      Vec::new(),
      |pedido_id| async move {
        if pedido_id == 2 {
          Err(eyre!("timeout"))
        } else {
          Ok(vec![detalle(pedido_id, 7)])
        }
      },
      |id| async move { Ok(producto(id)) },
    )
    .await;

    assert_eq!(data.detalles[&1].len(), 1);
    assert!(data.detalles[&2].is_empty());
    assert_eq!(data.pedidos.len(), 2);
  }
}
