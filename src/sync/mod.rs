//! Connectivity monitoring and background sync.
//!
//! The monitor trusts online/offline transitions as reported by the host
//! environment; it never probes reachability itself. Coming back online
//! triggers a queue replay and a best-effort cache revalidation pass; a
//! recurring timer re-runs the replay check while online so a missed
//! notification cannot strand queued orders.

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::queue::ReplayReport;

/// What the monitor drives on connectivity events.
pub trait SyncTarget {
  /// Deliver queued orders.
  fn replay(&self) -> impl Future<Output = Result<ReplayReport>>;

  /// Refresh the hot cached reads. Best-effort; never fails.
  fn revalidate(&self) -> impl Future<Output = ()>;
}

/// Host-facing handle for reporting connectivity transitions.
#[derive(Clone)]
pub struct ConnectivityHandle {
  tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
  pub fn set_online(&self, online: bool) {
    // Receiver gone means the monitor stopped; nothing left to notify
    let _ = self.tx.send(online);
  }
}

/// Two-state connectivity monitor driving replay and revalidation.
pub struct ConnectivityMonitor<T: SyncTarget> {
  target: T,
  interval: Duration,
  rx: watch::Receiver<bool>,
}

impl<T: SyncTarget> ConnectivityMonitor<T> {
  /// Create a monitor assuming an initially-online host.
  pub fn new(target: T, interval: Duration) -> (Self, ConnectivityHandle) {
    let (tx, rx) = watch::channel(true);
    (
      Self {
        target,
        interval,
        rx,
      },
      ConnectivityHandle { tx },
    )
  }

  /// Run until the [`ConnectivityHandle`] is dropped.
  ///
  /// The first timer tick fires immediately, so orders queued while the
  /// process was down are replayed on startup when online.
  pub async fn run(mut self) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut online = *self.rx.borrow_and_update();

    loop {
      tokio::select! {
        changed = self.rx.changed() => {
          if changed.is_err() {
            debug!("Connectivity handle dropped, stopping monitor");
            break;
          }
          let now_online = *self.rx.borrow_and_update();
          if now_online == online {
            continue;
          }
          online = now_online;
          if online {
            info!("Connectivity restored, replaying queued orders");
            self.replay_check().await;
            self.target.revalidate().await;
          } else {
            // Nothing else to do: appends keep working while offline
            info!("Connectivity lost, orders will be queued locally");
          }
        }
        _ = ticker.tick() => {
          if online {
            self.replay_check().await;
          }
        }
      }
    }
  }

  async fn replay_check(&self) {
    match self.target.replay().await {
      Ok(report) if report.attempted > 0 => {
        info!(
          attempted = report.attempted,
          synced = report.synced,
          "Replay pass finished"
        );
      }
      Ok(_) => {}
      Err(e) => warn!("Replay pass failed: {}", e),
    }
  }
}
