//! Durable queue of pending orders.
//!
//! Orders placed while the remote API is unreachable (or before a best-effort
//! immediate submission) are appended here and replayed later. Entries are
//! only ever marked synced by [`OrderQueue::replay`]; they are removed solely
//! through the explicit [`OrderQueue::prune_synced`] policy, so a synced
//! entry doubles as an audit record until pruned.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::DurableStorage;

/// Storage key holding the serialized queue.
const QUEUE_KEY: &str = "queue:pedidos";

/// One order line captured at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineaPedido {
  pub producto_id: i64,
  pub nombre: String,
  pub cantidad: i64,
  pub precio_unitario: f64,
  pub subtotal: f64,
}

/// A locally persisted order awaiting delivery to the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
  pub local_id: i64,
  pub created_at: DateTime<Utc>,
  pub cliente_id: i64,
  pub metodo_pago_id: i64,
  pub estado_envio_id: i64,
  pub estado_pedido_id: i64,
  pub line_items: Vec<LineaPedido>,
  pub total: f64,
  pub synced: bool,
  /// Client-side token sent on replay so the remote API can deduplicate a
  /// resubmission whose first response was lost
  pub idempotency_key: String,
}

/// Aggregate outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
  /// Entries the pass tried to deliver
  pub attempted: usize,
  /// Entries that completed both remote steps and were marked synced
  pub synced: usize,
}

/// Append-only queue of pending orders over durable storage.
pub struct OrderQueue {
  storage: Arc<dyn DurableStorage>,
  /// Single-flight latch: a replay trigger observed while a pass is active
  /// is a no-op
  replaying: AtomicBool,
}

impl OrderQueue {
  pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
    Self {
      storage,
      replaying: AtomicBool::new(false),
    }
  }

  /// Append a new order. Persists synchronously and never touches the
  /// network. Line subtotals and the order total are recomputed here so the
  /// stored entry is internally consistent.
  pub fn append(
    &self,
    cliente_id: i64,
    mut line_items: Vec<LineaPedido>,
    metodo_pago_id: i64,
    estado_envio_id: i64,
    estado_pedido_id: i64,
  ) -> Result<PendingOperation> {
    let mut entries = self.load()?;

    // Wall-clock id, bumped past the previous max so same-millisecond
    // appends stay unique
    let now = Utc::now();
    let mut local_id = now.timestamp_millis();
    if let Some(max_id) = entries.iter().map(|e| e.local_id).max() {
      if local_id <= max_id {
        local_id = max_id + 1;
      }
    }

    for item in &mut line_items {
      item.subtotal = item.cantidad as f64 * item.precio_unitario;
    }
    let total: f64 = line_items.iter().map(|i| i.subtotal).sum();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", local_id, now.timestamp_micros()).as_bytes());
    let idempotency_key = hex::encode(hasher.finalize())[..32].to_string();

    let entry = PendingOperation {
      local_id,
      created_at: now,
      cliente_id,
      metodo_pago_id,
      estado_envio_id,
      estado_pedido_id,
      line_items,
      total,
      synced: false,
      idempotency_key,
    };

    entries.push(entry.clone());
    self.save(&entries)?;
    debug!(local_id, total, "Appended pending order");

    Ok(entry)
  }

  /// All entries, in append order.
  pub fn entries(&self) -> Result<Vec<PendingOperation>> {
    self.load()
  }

  /// Entries not yet delivered, in append order.
  pub fn pending(&self) -> Result<Vec<PendingOperation>> {
    Ok(self.load()?.into_iter().filter(|e| !e.synced).collect())
  }

  /// Replay every unsynced entry, oldest first, sequentially.
  ///
  /// Each entry is delivered in two remote steps: `create_header` creates the
  /// order and returns its remote id, then `attach_items` posts the line
  /// items. Only when both succeed is the entry marked synced and persisted.
  /// A failure at either step is logged, leaves the entry unsynced for the
  /// next pass, and does not stop the loop.
  ///
  /// Single-flight: a second call while a pass is running returns an empty
  /// report without touching any entry.
  pub async fn replay<F1, Fut1, F2, Fut2>(
    &self,
    create_header: F1,
    attach_items: F2,
  ) -> Result<ReplayReport>
  where
    F1: Fn(PendingOperation) -> Fut1,
    Fut1: Future<Output = Result<i64>>,
    F2: Fn(i64, PendingOperation) -> Fut2,
    Fut2: Future<Output = Result<()>>,
  {
    if self
      .replaying
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("Replay already in progress, skipping");
      return Ok(ReplayReport::default());
    }

    let result = self.replay_pass(create_header, attach_items).await;
    self.replaying.store(false, Ordering::SeqCst);
    result
  }

  async fn replay_pass<F1, Fut1, F2, Fut2>(
    &self,
    create_header: F1,
    attach_items: F2,
  ) -> Result<ReplayReport>
  where
    F1: Fn(PendingOperation) -> Fut1,
    Fut1: Future<Output = Result<i64>>,
    F2: Fn(i64, PendingOperation) -> Fut2,
    Fut2: Future<Output = Result<()>>,
  {
    let entries = self.load()?;
    let mut report = ReplayReport::default();

    for entry in entries.into_iter().filter(|e| !e.synced) {
      report.attempted += 1;
      let local_id = entry.local_id;

      let remote_id = match create_header(entry.clone()).await {
        Ok(id) => id,
        Err(e) => {
          warn!(local_id, "Order header creation failed: {}", e);
          continue;
        }
      };

      if let Err(e) = attach_items(remote_id, entry).await {
        warn!(local_id, remote_id, "Attaching line items failed: {}", e);
        continue;
      }

      // Persist progress after every delivered entry
      self.mark_synced(local_id)?;
      report.synced += 1;
      info!(local_id, remote_id, "Pending order delivered");
    }

    Ok(report)
  }

  /// Flip the synced flag against a fresh load. The remote calls above are
  /// await points, so the stored array may have gained entries since this
  /// pass started; persisting the pass's own snapshot would drop them.
  fn mark_synced(&self, local_id: i64) -> Result<()> {
    let mut entries = self.load()?;
    if let Some(entry) = entries.iter_mut().find(|e| e.local_id == local_id) {
      entry.synced = true;
    }
    self.save(&entries)
  }

  /// Remove synced entries. Explicit policy, never run by replay itself.
  /// Returns how many entries were removed.
  pub fn prune_synced(&self) -> Result<usize> {
    let entries = self.load()?;
    let before = entries.len();
    let remaining: Vec<PendingOperation> = entries.into_iter().filter(|e| !e.synced).collect();
    let removed = before - remaining.len();
    if removed > 0 {
      self.save(&remaining)?;
      info!(removed, "Pruned synced queue entries");
    }
    Ok(removed)
  }

  fn load(&self) -> Result<Vec<PendingOperation>> {
    match self.storage.get(QUEUE_KEY)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse pending queue: {}", e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn save(&self, entries: &[PendingOperation]) -> Result<()> {
    let raw =
      serde_json::to_string(entries).map_err(|e| eyre!("Failed to serialize queue: {}", e))?;
    self.storage.set(QUEUE_KEY, &raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicU32;

  fn linea(producto_id: i64, cantidad: i64, precio: f64) -> LineaPedido {
    LineaPedido {
      producto_id,
      nombre: format!("Producto {}", producto_id),
      cantidad,
      precio_unitario: precio,
      subtotal: 0.0,
    }
  }

  fn queue_with(storage: &MemoryStorage) -> OrderQueue {
    OrderQueue::new(Arc::new(storage.clone()))
  }

  #[test]
  fn test_append_computes_totals() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);

    let entry = queue
      .append(1, vec![linea(10, 2, 3.5), linea(11, 1, 10.0)], 1, 1, 1)
      .unwrap();

    assert_eq!(entry.line_items[0].subtotal, 7.0);
    assert_eq!(entry.line_items[1].subtotal, 10.0);
    assert_eq!(entry.total, 17.0);
    assert!(!entry.synced);
    assert_eq!(entry.idempotency_key.len(), 32);
  }

  #[test]
  fn test_append_survives_restart() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);
    let entry = queue.append(1, vec![linea(10, 1, 5.0)], 1, 1, 1).unwrap();

    // New queue over the same storage simulates a process restart
    let reloaded = queue_with(&storage);
    let pending = reloaded.pending().unwrap();

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].local_id, entry.local_id);
    assert!(!pending[0].synced);
  }

  #[test]
  fn test_local_ids_are_unique_and_increasing() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);

    let a = queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();
    let b = queue.append(1, vec![linea(2, 1, 1.0)], 1, 1, 1).unwrap();
    let c = queue.append(1, vec![linea(3, 1, 1.0)], 1, 1, 1).unwrap();

    assert!(a.local_id < b.local_id);
    assert!(b.local_id < c.local_id);
  }

  #[tokio::test]
  async fn test_replay_counts_and_retries_only_failures() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);

    let first = queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();
    let second = queue.append(2, vec![linea(2, 1, 1.0)], 1, 1, 1).unwrap();
    let third = queue.append(3, vec![linea(3, 1, 1.0)], 1, 1, 1).unwrap();

    let failing_id = second.local_id;
    let report = queue
      .replay(
        |entry| async move {
          if entry.local_id == failing_id {
            Err(eyre!("remote rejected"))
          } else {
            Ok(entry.local_id * 10)
          }
        },
        |_, _| async { Ok(()) },
      )
      .await
      .unwrap();

    assert_eq!(report, ReplayReport { attempted: 3, synced: 2 });

    let entries = queue.entries().unwrap();
    assert!(entries.iter().find(|e| e.local_id == first.local_id).unwrap().synced);
    assert!(!entries.iter().find(|e| e.local_id == second.local_id).unwrap().synced);
    assert!(entries.iter().find(|e| e.local_id == third.local_id).unwrap().synced);

    // Second pass only touches the failed entry
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = attempts.clone();
    let report = queue
      .replay(
        move |entry| {
          let attempts = attempts_in.clone();
          async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(entry.local_id * 10)
          }
        },
        |_, _| async { Ok(()) },
      )
      .await
      .unwrap();

    assert_eq!(report, ReplayReport { attempted: 1, synced: 1 });
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failure_attaching_items_leaves_entry_unsynced() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);
    queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();

    let report = queue
      .replay(
        |entry| async move { Ok(entry.local_id) },
        |_, _| async { Err(eyre!("detalle rejected")) },
      )
      .await
      .unwrap();

    assert_eq!(report, ReplayReport { attempted: 1, synced: 0 });
    assert_eq!(queue.pending().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_replays_attempt_each_entry_at_most_once() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);
    queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();
    queue.append(2, vec![linea(2, 1, 1.0)], 1, 1, 1).unwrap();

    let attempts = Arc::new(AtomicU32::new(0));

    let make_header = |attempts: Arc<AtomicU32>| {
      move |entry: PendingOperation| {
        let attempts = attempts.clone();
        async move {
          attempts.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(std::time::Duration::from_millis(20)).await;
          Ok(entry.local_id)
        }
      }
    };

    let (a, b) = tokio::join!(
      queue.replay(make_header(attempts.clone()), |_, _| async { Ok(()) }),
      queue.replay(make_header(attempts.clone()), |_, _| async { Ok(()) }),
    );

    let total_synced = a.unwrap().synced + b.unwrap().synced;
    assert_eq!(total_synced, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_append_during_replay_is_not_lost() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);
    let first = queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();

    // Second handle over the same storage appends mid-pass, while the
    // replay is waiting on the slow remote call
    let appender = queue_with(&storage);
    let (report, appended) = tokio::join!(
      queue.replay(
        |entry| async move {
          tokio::time::sleep(std::time::Duration::from_millis(50)).await;
          Ok(entry.local_id)
        },
        |_, _| async { Ok(()) },
      ),
      async {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        appender.append(2, vec![linea(2, 1, 1.0)], 1, 1, 1).unwrap()
      },
    );

    assert_eq!(report.unwrap(), ReplayReport { attempted: 1, synced: 1 });

    let entries = queue.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().find(|e| e.local_id == first.local_id).unwrap().synced);
    let late = entries.iter().find(|e| e.local_id == appended.local_id).unwrap();
    assert!(!late.synced);
  }

  #[tokio::test]
  async fn test_prune_removes_only_synced_entries() {
    let storage = MemoryStorage::new();
    let queue = queue_with(&storage);

    let keep = queue.append(1, vec![linea(1, 1, 1.0)], 1, 1, 1).unwrap();
    let drop = queue.append(2, vec![linea(2, 1, 1.0)], 1, 1, 1).unwrap();

    let drop_id = drop.local_id;
    queue
      .replay(
        |entry| async move {
          if entry.local_id == drop_id {
            Ok(entry.local_id)
          } else {
            Err(eyre!("unreachable host"))
          }
        },
        |_, _| async { Ok(()) },
      )
      .await
      .unwrap();

    let removed = queue.prune_synced().unwrap();
    assert_eq!(removed, 1);

    let entries = queue.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].local_id, keep.local_id);
  }
}
