use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::errors::StoreError;
use crate::store::TelemetryStore;

/// Prunes the dedup index. Records expire through the store's TTL.
pub struct ExpirySweeper {
    store: Arc<dyn TelemetryStore>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Removes every dedup entry scored at or before `now - retention`.
    pub async fn sweep(&self, retention: Duration) -> Result<u64, StoreError> {
        let retention_millis = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(retention_millis);
        let removed = self.store.prune_ingested_before(cutoff).await?;
        debug!("Removed {removed} dedup timestamps older than {}s", retention.as_secs());
        Ok(removed)
    }

    /// Sweeps every `period` until shutdown. The first sweep runs one period after start.
    pub async fn run(
        self,
        period: Duration,
        retention: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // consume the immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(retention).await {
                        error!("Dedup sweep failed: {e}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Expiry sweeper stopped");
    }
}
