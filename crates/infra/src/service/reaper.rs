use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{ExpiryReport, InventoryService, ServiceError};

/// Handle to control and join the reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    /// Request graceful shutdown and wait for the reaper to stop.
    ///
    /// A pass already in flight runs to completion first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "reservation reaper task failed");
        }
    }
}

/// Periodically expires reservations whose hold lapsed and restores their stock.
#[derive(Debug, Clone)]
pub struct ReservationReaper {
    service: InventoryService,
    interval: Duration,
}

impl ReservationReaper {
    pub fn new(service: InventoryService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// One pass over the ledger with the current time as cutoff.
    pub async fn run_once(&self) -> Result<ExpiryReport, ServiceError> {
        self.service.expire_reservations(Utc::now()).await
    }

    /// Spawn the reaper loop. It stops when `shutdown` (or the returned
    /// handle) is cancelled.
    pub fn spawn(self, shutdown: &CancellationToken) -> ReaperHandle {
        let token = shutdown.child_token();
        let stop = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "reservation reaper started");

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => match self.run_once().await {
                        Ok(report) if !report.expired.is_empty() => tracing::info!(
                            expired = report.expired.len(),
                            restored = report.restored.len(),
                            "expired lapsed reservations"
                        ),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "reaper pass failed"),
                    },
                }
            }

            tracing::info!("reservation reaper stopped");
        });

        ReaperHandle {
            shutdown: token,
            join,
        }
    }
}
