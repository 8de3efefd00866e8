//! Storefront domain types, mirroring the remote API payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Catalog product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producto {
  pub id: i64,
  pub nombre: String,
  pub descripcion: Option<String>,
  pub precio: f64,
  pub stock: i64,
  pub categoria_id: Option<i64>,
}

impl Producto {
  /// Placeholder substituted when an individual product lookup fails inside
  /// an aggregate fetch.
  pub fn placeholder(id: i64) -> Self {
    Self {
      id,
      nombre: format!("Producto #{}", id),
      descripcion: None,
      precio: 0.0,
      stock: 0,
      categoria_id: None,
    }
  }
}

/// Order header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pedido {
  pub id: i64,
  pub cliente_id: i64,
  pub fecha: String,
  pub total: f64,
  pub metodo_pago_id: i64,
  pub estado_envio_id: i64,
  pub estado_pedido_id: i64,
}

/// Order line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetallePedido {
  pub id: i64,
  pub pedido_id: i64,
  pub producto_id: i64,
  pub cantidad: i64,
  pub precio_unitario: f64,
  pub subtotal: f64,
}

/// Employee record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empleado {
  pub id: i64,
  pub nombre: String,
  pub apellido: String,
  pub email: String,
  pub puesto: Option<String>,
}

/// Customer record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cliente {
  pub id: i64,
  pub nombre: String,
  pub apellido: Option<String>,
  pub email: String,
  pub direccion: Option<String>,
}

/// Stock level for one product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
  pub producto_id: i64,
  pub stock: i64,
}

/// Body for creating or updating a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoProducto {
  pub nombre: String,
  pub descripcion: Option<String>,
  pub precio: f64,
  pub stock: i64,
  pub categoria_id: Option<i64>,
}

/// Body for creating an order header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoPedido {
  pub cliente_id: i64,
  pub total: f64,
  pub metodo_pago_id: i64,
  pub estado_envio_id: i64,
  pub estado_pedido_id: i64,
}

/// Body for attaching one order line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoDetalle {
  pub pedido_id: i64,
  pub producto_id: i64,
  pub cantidad: i64,
  pub precio_unitario: f64,
  pub subtotal: f64,
}

/// Composite dashboard read: orders, their lines, and every referenced
/// product resolved once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
  pub pedidos: Vec<Pedido>,
  pub productos_catalogo: Vec<Producto>,
  /// pedido id -> its lines; empty when the line fetch degraded
  pub detalles: HashMap<i64, Vec<DetallePedido>>,
  /// producto id -> product, placeholder when the lookup degraded
  pub productos: HashMap<i64, Producto>,
}
