use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::StoreError;
use crate::store::TelemetryStore;

/// Decides whether a snapshot timestamp still needs ingesting.
///
/// A timestamp enters the dedup index only through `DedupClaim::commit`, after
/// its snapshot was merged. While a claim is alive, every other attempt for the
/// same timestamp is turned away, so exactly one caller merges it.
pub struct DedupGate {
    store: Arc<dyn TelemetryStore>,
    in_flight: Mutex<HashSet<String>>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn should_ingest(&self, timestamp: &str) -> Result<bool, StoreError> {
        Ok(!self.store.is_ingested(timestamp).await?)
    }

    /// Claims `timestamp` for ingestion. `None` means it was already ingested
    /// or another caller holds the claim.
    pub async fn claim(
        &self,
        timestamp: &str,
        epoch_millis: i64,
    ) -> Result<Option<DedupClaim<'_>>, StoreError> {
        let fresh = self.lock_in_flight().insert(timestamp.to_string());
        if !fresh {
            return Ok(None);
        }
        let claim = DedupClaim {
            gate: self,
            timestamp: timestamp.to_string(),
            epoch_millis,
        };

        // dropping the claim releases the in-flight slot
        if self.should_ingest(timestamp).await? {
            Ok(Some(claim))
        } else {
            Ok(None)
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to ingest one snapshot timestamp.
pub struct DedupClaim<'a> {
    gate: &'a DedupGate,
    timestamp: String,
    epoch_millis: i64,
}

impl DedupClaim<'_> {
    /// Records the timestamp as fully ingested.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.gate
            .store
            .record_ingested(&self.timestamp, self.epoch_millis)
            .await
    }
}

impl Drop for DedupClaim<'_> {
    fn drop(&mut self) {
        self.gate.lock_in_flight().remove(&self.timestamp);
    }
}
