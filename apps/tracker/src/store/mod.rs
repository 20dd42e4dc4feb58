// Storage of per-drone aggregates and the snapshot dedup index.
// Every mutation goes through `merge` (per-drone, atomic) or
// `record_ingested` (dedup index). Callers never read-modify-write records.

pub mod memory;
pub mod merge;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::drone::AggregatedRecord;

pub use memory::MemoryStore;
pub use merge::{merge_observation, MergeOutcome, MergeParams};
pub use redis_store::RedisStore;

/// Default lifetime of an aggregated record without new observations.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(600);

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// True if a snapshot with this timestamp was fully ingested.
    async fn is_ingested(&self, timestamp: &str) -> Result<bool, StoreError>;

    /// Adds `timestamp` to the dedup index, scored by `epoch_millis`.
    async fn record_ingested(&self, timestamp: &str, epoch_millis: i64) -> Result<(), StoreError>;

    /// The highest-scored timestamp in the dedup index.
    async fn latest_timestamp(&self) -> Result<Option<String>, StoreError>;

    async fn has_pilot(&self, entity_id: &str) -> Result<bool, StoreError>;

    /// Atomically folds one observation into the drone's record and refreshes
    /// the TTL of every key that belongs to it.
    async fn merge(&self, params: &MergeParams<'_>, ttl: Duration)
        -> Result<MergeOutcome, StoreError>;

    /// Every record still within its TTL, in no particular order.
    async fn all_records(&self) -> Result<Vec<AggregatedRecord>, StoreError>;

    /// Removes dedup entries scored at or below `cutoff_millis`. Returns how many went.
    /// Backends without native key expiry drop their expired records here too.
    async fn prune_ingested_before(&self, cutoff_millis: i64) -> Result<u64, StoreError>;
}
