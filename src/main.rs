mod api;
mod cache;
mod config;
mod queue;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use api::CachedApiClient;
use cache::FetchOptions;
use queue::LineaPedido;
use sync::ConnectivityMonitor;

#[derive(Parser, Debug)]
#[command(name = "tienda")]
#[command(about = "Offline-first storefront client with tiered caching and durable order sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tienda/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Bypass the cache for read commands
  #[arg(long, global = true)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Product catalog reads
  Productos {
    #[command(subcommand)]
    action: ProductosCommand,
  },
  /// Stock level for one product
  Stock { id: i64 },
  /// Order reads
  Pedidos {
    #[command(subcommand)]
    action: PedidosCommand,
  },
  /// Look up an employee
  Empleado { id: i64 },
  /// Customer reads and updates
  Cliente {
    #[command(subcommand)]
    action: ClienteCommand,
  },
  /// Composite dashboard data (orders, lines, referenced products)
  Dashboard,
  /// Place an order: buffered durably, delivered best-effort
  Pedido {
    #[command(subcommand)]
    action: PedidoCommand,
  },
  /// Queue delivery and connectivity handling
  Sync {
    #[command(subcommand)]
    action: SyncCommand,
  },
  /// Cache diagnostics and manual recovery
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },
}

#[derive(Subcommand, Debug)]
enum ProductosCommand {
  /// List the whole catalog
  List,
  /// Get one product by id
  Get { id: i64 },
  /// Search products by term
  Search { term: String },
  /// Create a product
  Crear {
    #[arg(long)]
    nombre: String,
    #[arg(long)]
    descripcion: Option<String>,
    #[arg(long)]
    precio: f64,
    #[arg(long, default_value_t = 0)]
    stock: i64,
    #[arg(long)]
    categoria: Option<i64>,
  },
  /// Replace a product
  Actualizar {
    id: i64,
    #[arg(long)]
    nombre: String,
    #[arg(long)]
    descripcion: Option<String>,
    #[arg(long)]
    precio: f64,
    #[arg(long, default_value_t = 0)]
    stock: i64,
    #[arg(long)]
    categoria: Option<i64>,
  },
  /// Set the stock level of a product
  Stock { id: i64, stock: i64 },
  /// Delete a product
  Eliminar { id: i64 },
}

#[derive(Subcommand, Debug)]
enum PedidosCommand {
  /// List all orders
  List,
  /// Lines of one order
  Detalles { pedido_id: i64 },
  /// Orders of one customer
  ByCliente { cliente_id: i64 },
}

#[derive(Subcommand, Debug)]
enum PedidoCommand {
  /// Create an order from line items
  Nuevo {
    #[arg(long)]
    cliente: i64,

    /// Line item as producto_id:cantidad:precio_unitario (repeatable)
    #[arg(long = "item", required = true)]
    items: Vec<String>,

    #[arg(long, default_value_t = 1)]
    metodo_pago: i64,

    #[arg(long, default_value_t = 1)]
    estado_envio: i64,

    #[arg(long, default_value_t = 1)]
    estado_pedido: i64,
  },
}

#[derive(Subcommand, Debug)]
enum ClienteCommand {
  /// Get one customer by id
  Get { id: i64 },
  /// Update customer contact fields
  Actualizar {
    id: i64,
    #[arg(long)]
    nombre: Option<String>,
    #[arg(long)]
    apellido: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    direccion: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
  /// Replay queued orders once
  Run,
  /// Keep replaying on a timer until interrupted
  Watch,
  /// Show undelivered queue entries
  Pending,
  /// Remove delivered entries from the queue
  Prune,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Entry counts and sizes per store
  Stats,
  /// Drop every entry in every store
  Clear,
  /// Remove keys matching a *-wildcard pattern from every store
  Invalidate { pattern: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!(
    "{}",
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?
  );
  Ok(())
}

/// Parse a `producto_id:cantidad:precio_unitario` line-item argument.
fn parse_item(raw: &str) -> Result<(i64, i64, f64)> {
  let parts: Vec<&str> = raw.split(':').collect();
  if parts.len() != 3 {
    return Err(eyre!(
      "Invalid item '{}', expected producto_id:cantidad:precio_unitario",
      raw
    ));
  }
  let producto_id = parts[0]
    .parse()
    .map_err(|e| eyre!("Invalid producto id in '{}': {}", raw, e))?;
  let cantidad = parts[1]
    .parse()
    .map_err(|e| eyre!("Invalid cantidad in '{}': {}", raw, e))?;
  let precio = parts[2]
    .parse()
    .map_err(|e| eyre!("Invalid precio in '{}': {}", raw, e))?;
  Ok((producto_id, cantidad, precio))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tienda=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let client = CachedApiClient::new(&config)?;

  let opts = if args.no_cache {
    FetchOptions::no_cache()
  } else {
    FetchOptions::default()
  };

  match args.command {
    Command::Productos { action } => match action {
      ProductosCommand::List => print_json(&client.get_productos(&opts).await?)?,
      ProductosCommand::Get { id } => print_json(&client.get_producto(id, &opts).await?)?,
      ProductosCommand::Search { term } => {
        print_json(&client.search_productos(&term, &opts).await?)?
      }
      ProductosCommand::Crear {
        nombre,
        descripcion,
        precio,
        stock,
        categoria,
      } => print_json(
        &client
          .create_producto(&api::types::NuevoProducto {
            nombre,
            descripcion,
            precio,
            stock,
            categoria_id: categoria,
          })
          .await?,
      )?,
      ProductosCommand::Actualizar {
        id,
        nombre,
        descripcion,
        precio,
        stock,
        categoria,
      } => print_json(
        &client
          .update_producto(
            id,
            &api::types::NuevoProducto {
              nombre,
              descripcion,
              precio,
              stock,
              categoria_id: categoria,
            },
          )
          .await?,
      )?,
      ProductosCommand::Stock { id, stock } => print_json(&client.update_stock(id, stock).await?)?,
      ProductosCommand::Eliminar { id } => {
        client.delete_producto(id).await?;
        eprintln!("Producto {} eliminado", id);
      }
    },
    Command::Stock { id } => print_json(&client.get_stock(id, &opts).await?)?,
    Command::Pedidos { action } => match action {
      PedidosCommand::List => print_json(&client.get_pedidos(&opts).await?)?,
      PedidosCommand::Detalles { pedido_id } => {
        print_json(&client.get_detalles_pedido(pedido_id, &opts).await?)?
      }
      PedidosCommand::ByCliente { cliente_id } => {
        print_json(&client.get_pedidos_by_cliente(cliente_id, &opts).await?)?
      }
    },
    Command::Empleado { id } => print_json(&client.get_empleado(id, &opts).await?)?,
    Command::Cliente { action } => match action {
      ClienteCommand::Get { id } => print_json(&client.get_cliente(id, &opts).await?)?,
      ClienteCommand::Actualizar {
        id,
        nombre,
        apellido,
        email,
        direccion,
      } => {
        // Read-modify-write over the current record
        let mut cliente = client.get_cliente(id, &FetchOptions::no_cache()).await?;
        if let Some(nombre) = nombre {
          cliente.nombre = nombre;
        }
        if apellido.is_some() {
          cliente.apellido = apellido;
        }
        if let Some(email) = email {
          cliente.email = email;
        }
        if direccion.is_some() {
          cliente.direccion = direccion;
        }
        print_json(&client.update_cliente(id, &cliente).await?)?;
      }
    },
    Command::Dashboard => print_json(&client.get_dashboard_data(&opts).await?)?,
    Command::Pedido { action } => match action {
      PedidoCommand::Nuevo {
        cliente,
        items,
        metodo_pago,
        estado_envio,
        estado_pedido,
      } => {
        let mut line_items = Vec::new();
        for raw in &items {
          let (producto_id, cantidad, precio) = parse_item(raw)?;
          // Resolve the product name through the cache when reachable
          let nombre = match client.get_producto(producto_id, &FetchOptions::default()).await {
            Ok(producto) => producto.nombre,
            Err(_) => format!("Producto #{}", producto_id),
          };
          line_items.push(LineaPedido {
            producto_id,
            nombre,
            cantidad,
            precio_unitario: precio,
            subtotal: 0.0,
          });
        }

        let (entry, report) = client
          .place_pedido(cliente, line_items, metodo_pago, estado_envio, estado_pedido)
          .await?;

        if report.synced > 0 {
          eprintln!("Order delivered to the remote API");
        } else {
          eprintln!("Remote API unreachable, order queued for replay");
        }
        print_json(&entry)?;
      }
    },
    Command::Sync { action } => match action {
      SyncCommand::Run => print_json(&client.replay_pending().await?)?,
      SyncCommand::Watch => {
        let interval = Duration::from_secs(config.sync.interval_secs);
        let (monitor, _handle) = ConnectivityMonitor::new(client, interval);
        eprintln!(
          "Watching queue every {}s, Ctrl-C to stop",
          config.sync.interval_secs
        );
        monitor.run().await;
      }
      SyncCommand::Pending => print_json(&client.queue().pending()?)?,
      SyncCommand::Prune => {
        let removed = client.queue().prune_synced()?;
        eprintln!("Removed {} delivered entries", removed);
      }
    },
    Command::Cache { action } => match action {
      CacheCommand::Stats => print_json(&client.caches().stats())?,
      CacheCommand::Clear => {
        client.caches().clear_all();
        eprintln!("All cache stores cleared");
      }
      CacheCommand::Invalidate { pattern } => {
        let removed = client.caches().invalidate_pattern(&pattern);
        eprintln!("Removed {} keys matching '{}'", removed, pattern);
      }
    },
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_item() {
    assert_eq!(parse_item("7:2:19.99").unwrap(), (7, 2, 19.99));
    assert!(parse_item("7:2").is_err());
    assert!(parse_item("x:2:1.0").is_err());
  }
}
