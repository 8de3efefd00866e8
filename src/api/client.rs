//! Remote storefront API client.
//!
//! The remote API is treated as an opaque request/response boundary: status
//! codes are only interpreted as success or failure, payloads are parsed
//! into the domain types as-is.

use color_eyre::eyre::WrapErr;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::api::types::{
  Cliente, DetallePedido, Empleado, NuevoDetalle, NuevoPedido, NuevoProducto, Pedido, Producto,
  Stock,
};
use crate::config::Config;

/// Storefront API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    // Relative joins drop the last path segment unless the base ends in '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::get_api_token(),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => req.bearer_auth(token),
      None => req,
    }
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let url = self.endpoint(path)?;
    let response = self
      .authorize(self.http.get(url))
      .send()
      .await
      .wrap_err_with(|| format!("Request to {} failed", path))?;

    response
      .error_for_status()
      .wrap_err_with(|| format!("Request to {} was rejected", path))?
      .json()
      .await
      .wrap_err_with(|| format!("Failed to parse response from {}", path))
  }

  async fn send_json<B: Serialize, T: DeserializeOwned>(
    &self,
    method: reqwest::Method,
    path: &str,
    body: &B,
    idempotency_key: Option<&str>,
  ) -> Result<T> {
    let url = self.endpoint(path)?;
    let mut req = self.authorize(self.http.request(method, url)).json(body);
    if let Some(key) = idempotency_key {
      req = req.header("Idempotency-Key", key);
    }

    let response = req
      .send()
      .await
      .wrap_err_with(|| format!("Request to {} failed", path))?;

    response
      .error_for_status()
      .wrap_err_with(|| format!("Request to {} was rejected", path))?
      .json()
      .await
      .wrap_err_with(|| format!("Failed to parse response from {}", path))
  }

  // --- productos ---

  pub async fn get_productos(&self) -> Result<Vec<Producto>> {
    self.get_json("productos").await
  }

  pub async fn get_producto(&self, id: i64) -> Result<Producto> {
    self.get_json(&format!("productos/{}", id)).await
  }

  pub async fn search_productos(&self, term: &str) -> Result<Vec<Producto>> {
    let mut url = self.endpoint("productos/buscar")?;
    url.query_pairs_mut().append_pair("termino", term);

    let response = self
      .authorize(self.http.get(url))
      .send()
      .await
      .wrap_err("Product search request failed")?;

    response
      .error_for_status()
      .wrap_err("Product search was rejected")?
      .json()
      .await
      .wrap_err("Failed to parse product search response")
  }

  pub async fn get_stock(&self, producto_id: i64) -> Result<Stock> {
    self
      .get_json(&format!("productos/{}/stock", producto_id))
      .await
  }

  pub async fn create_producto(&self, producto: &NuevoProducto) -> Result<Producto> {
    self
      .send_json(reqwest::Method::POST, "productos", producto, None)
      .await
  }

  pub async fn update_producto(&self, id: i64, producto: &NuevoProducto) -> Result<Producto> {
    self
      .send_json(reqwest::Method::PUT, &format!("productos/{}", id), producto, None)
      .await
  }

  pub async fn update_stock(&self, id: i64, stock: i64) -> Result<Producto> {
    self
      .send_json(
        reqwest::Method::PATCH,
        &format!("productos/{}/stock", id),
        &serde_json::json!({ "stock": stock }),
        None,
      )
      .await
  }

  pub async fn delete_producto(&self, id: i64) -> Result<()> {
    let url = self.endpoint(&format!("productos/{}", id))?;
    let response = self
      .authorize(self.http.delete(url))
      .send()
      .await
      .wrap_err_with(|| format!("Failed to delete producto {}", id))?;

    response
      .error_for_status()
      .wrap_err_with(|| format!("Deleting producto {} was rejected", id))?;
    Ok(())
  }

  // --- pedidos ---

  pub async fn get_pedidos(&self) -> Result<Vec<Pedido>> {
    self.get_json("pedidos").await
  }

  pub async fn get_pedidos_by_cliente(&self, cliente_id: i64) -> Result<Vec<Pedido>> {
    self
      .get_json(&format!("pedidos/cliente/{}", cliente_id))
      .await
  }

  pub async fn get_detalles_pedido(&self, pedido_id: i64) -> Result<Vec<DetallePedido>> {
    self
      .get_json(&format!("detalles-pedido/pedido/{}", pedido_id))
      .await
  }

  /// Create an order header. The idempotency key lets the remote API
  /// deduplicate a replayed submission whose first response was lost.
  pub async fn create_pedido(
    &self,
    pedido: &NuevoPedido,
    idempotency_key: Option<&str>,
  ) -> Result<Pedido> {
    self
      .send_json(reqwest::Method::POST, "pedidos", pedido, idempotency_key)
      .await
  }

  pub async fn create_detalle(&self, detalle: &NuevoDetalle) -> Result<DetallePedido> {
    self
      .send_json(reqwest::Method::POST, "detalles-pedido", detalle, None)
      .await
  }

  // --- empleados / clientes ---

  pub async fn get_empleado(&self, id: i64) -> Result<Empleado> {
    self.get_json(&format!("empleados/{}", id)).await
  }

  pub async fn get_cliente(&self, id: i64) -> Result<Cliente> {
    self.get_json(&format!("clientes/{}", id)).await
  }

  pub async fn update_cliente(&self, id: i64, cliente: &Cliente) -> Result<Cliente> {
    self
      .send_json(reqwest::Method::PUT, &format!("clientes/{}", id), cliente, None)
      .await
  }
}
