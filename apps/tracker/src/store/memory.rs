use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::errors::StoreError;
use crate::models::drone::AggregatedRecord;
use crate::store::merge::{merge_observation, MergeOutcome, MergeParams};
use crate::store::TelemetryStore;

struct Entry {
    record: AggregatedRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, Entry>,
    /// Dedup index: timestamp -> epoch millis.
    ingested: HashMap<String, i64>,
}

/// In-process store. A record and its history live in one entry with one
/// deadline, so they expire together. Expired entries are invisible to reads;
/// a merge replaces its own expired entry and the dedup sweep drops the rest.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn is_ingested(&self, timestamp: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().await.ingested.contains_key(timestamp))
    }

    async fn record_ingested(&self, timestamp: &str, epoch_millis: i64) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .ingested
            .insert(timestamp.to_string(), epoch_millis);
        Ok(())
    }

    async fn latest_timestamp(&self) -> Result<Option<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .ingested
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(timestamp, _)| timestamp.clone()))
    }

    async fn has_pilot(&self, entity_id: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .records
            .get(entity_id)
            .is_some_and(|e| e.is_live(now) && e.record.pilot.is_some()))
    }

    async fn merge(
        &self,
        params: &MergeParams<'_>,
        ttl: Duration,
    ) -> Result<MergeOutcome, StoreError> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let entity_id = &params.observation.entity_id;
        let existing = state.records.remove(entity_id).filter(|e| e.is_live(now));
        let previous_deadline = existing.as_ref().map(|e| e.expires_at);

        let (record, outcome) = merge_observation(existing.map(|e| e.record), params);
        let expires_at = match (outcome, previous_deadline) {
            (MergeOutcome::Duplicate, Some(deadline)) => deadline,
            _ => now + ttl,
        };
        state
            .records
            .insert(entity_id.clone(), Entry { record, expires_at });

        Ok(outcome)
    }

    async fn all_records(&self) -> Result<Vec<AggregatedRecord>, StoreError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|e| e.is_live(now))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn prune_ingested_before(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.records.retain(|_, e| e.is_live(now));

        let before = state.ingested.len();
        state.ingested.retain(|_, score| *score > cutoff_millis);
        Ok((before - state.ingested.len()) as u64)
    }
}
