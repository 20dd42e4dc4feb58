// Fan-out of aggregate views to live subscribers.
// Each subscriber owns a bounded queue; a slow subscriber misses updates
// instead of holding up ingestion or the other subscribers.
// Reading the store and queueing an event happen under one delivery lock, so
// every subscriber sees events in the order the store was read.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::drone::AggregatedRecord;
use crate::store::TelemetryStore;

const SUBSCRIBER_QUEUE: usize = 16;

pub type SubscriberId = Uuid;

/// The `update` event pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEvent {
    pub event: &'static str,
    pub timestamp: String,
    pub drones: Vec<AggregatedRecord>,
}

impl UpdateEvent {
    pub fn new(timestamp: String, drones: Vec<AggregatedRecord>) -> Self {
        Self {
            event: "update",
            timestamp,
            drones,
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn TelemetryStore>,
    subscribers: Arc<RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<UpdateEvent>>>>>,
    delivery: Arc<Mutex<()>>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<UpdateEvent>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.write().await.insert(id, tx);
        info!("Subscriber {id} connected");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.write().await.remove(&id).is_some() {
            info!("Subscriber {id} disconnected");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Pushes the full current aggregate set, tagged with `timestamp`, to every
    /// subscriber. No-op when the store holds no drones. Returns how many
    /// subscribers got the update.
    pub async fn notify_all(&self, timestamp: &str) -> Result<usize, StoreError> {
        let _delivery = self.delivery.lock().await;
        let drones = self.store.all_records().await?;
        if drones.is_empty() {
            return Ok(0);
        }
        let event = Arc::new(UpdateEvent::new(timestamp.to_string(), drones));

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in self.subscribers.read().await.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {id} is lagging, dropped update {timestamp}");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in gone {
                subscribers.remove(&id);
            }
        }

        debug!("Broadcast {timestamp} to {delivered} subscribers");
        Ok(delivered)
    }

    /// Catches one subscriber up with the latest known state. No-op when the
    /// store holds no drones. Returns whether anything was sent.
    pub async fn notify_one(&self, id: SubscriberId) -> Result<bool, StoreError> {
        let _delivery = self.delivery.lock().await;
        let Some(tx) = self.subscribers.read().await.get(&id).cloned() else {
            return Ok(false);
        };

        let drones = self.store.all_records().await?;
        if drones.is_empty() {
            return Ok(false);
        }

        // the dedup index may have been pruned while records are still live
        let timestamp = match self.store.latest_timestamp().await? {
            Some(timestamp) => timestamp,
            None => drones
                .iter()
                .map(|d| d.last_seen.as_str())
                .max()
                .unwrap_or_default()
                .to_string(),
        };

        Ok(tx
            .try_send(Arc::new(UpdateEvent::new(timestamp, drones)))
            .is_ok())
    }

    /// Drops every subscriber queue, which ends their connections.
    pub async fn close(&self) {
        let mut subscribers = self.subscribers.write().await;
        info!("Closing {} subscriber connections", subscribers.len());
        subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::models::snapshot::Observation;
    use crate::store::{MemoryStore, MergeOutcome, MergeParams};

    const T1: &str = "2023-01-11T13:58:02.472Z";
    const T2: &str = "2023-01-11T13:58:04.472Z";

    async fn store_with_drone() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let obs = Observation::new("SN-trespassin", 250000.0, 250000.0);
        store
            .merge(&MergeParams::new(T1, 1673445482472, &obs, None), Duration::from_secs(600))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_notify_all_is_noop_when_store_empty() {
        let broadcaster = Broadcaster::new(Arc::new(MemoryStore::new()));
        let (_id, mut rx) = broadcaster.subscribe().await;

        assert_eq!(broadcaster.notify_all(T1).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_all_reaches_every_subscriber() {
        let broadcaster = Broadcaster::new(store_with_drone().await);
        let (_a, mut rx_a) = broadcaster.subscribe().await;
        let (_b, mut rx_b) = broadcaster.subscribe().await;

        assert_eq!(broadcaster.notify_all(T1).await.unwrap(), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event, "update");
            assert_eq!(event.timestamp, T1);
            assert_eq!(event.drones[0].entity_id, "SN-trespassin");
        }
    }

    #[tokio::test]
    async fn test_notify_one_catches_up_only_that_subscriber() {
        let store = store_with_drone().await;
        store.record_ingested(T1, 1673445482472).await.unwrap();
        let broadcaster = Broadcaster::new(store);
        let (late, mut rx_late) = broadcaster.subscribe().await;
        let (_other, mut rx_other) = broadcaster.subscribe().await;

        assert!(broadcaster.notify_one(late).await.unwrap());

        let event = rx_late.recv().await.unwrap();
        assert_eq!(event.timestamp, T1);
        assert_eq!(event.drones.len(), 1);
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_one_falls_back_to_last_seen() {
        let broadcaster = Broadcaster::new(store_with_drone().await);
        let (id, mut rx) = broadcaster.subscribe().await;

        assert!(broadcaster.notify_one(id).await.unwrap());
        assert_eq!(rx.recv().await.unwrap().timestamp, T1);
    }

    /// Store whose first `all_records` call returns what it read only after
    /// `release` is signalled.
    struct HeldReadStore {
        inner: MemoryStore,
        held: AtomicBool,
        read_done: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TelemetryStore for HeldReadStore {
        async fn is_ingested(&self, timestamp: &str) -> Result<bool, StoreError> {
            self.inner.is_ingested(timestamp).await
        }
        async fn record_ingested(&self, timestamp: &str, epoch_millis: i64) -> Result<(), StoreError> {
            self.inner.record_ingested(timestamp, epoch_millis).await
        }
        async fn latest_timestamp(&self) -> Result<Option<String>, StoreError> {
            self.inner.latest_timestamp().await
        }
        async fn has_pilot(&self, entity_id: &str) -> Result<bool, StoreError> {
            self.inner.has_pilot(entity_id).await
        }
        async fn merge(
            &self,
            params: &MergeParams<'_>,
            ttl: Duration,
        ) -> Result<MergeOutcome, StoreError> {
            self.inner.merge(params, ttl).await
        }
        async fn all_records(&self) -> Result<Vec<AggregatedRecord>, StoreError> {
            let records = self.inner.all_records().await?;
            if !self.held.swap(true, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            Ok(records)
        }
        async fn prune_ingested_before(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
            self.inner.prune_ingested_before(cutoff_millis).await
        }
    }

    #[tokio::test]
    async fn test_catch_up_never_overtakes_newer_update() {
        let store = Arc::new(HeldReadStore {
            inner: MemoryStore::new(),
            held: AtomicBool::new(false),
            read_done: Notify::new(),
            release: Notify::new(),
        });
        let obs = Observation::new("SN-trespassin", 250000.0, 250000.0);
        store
            .merge(&MergeParams::new(T1, 1673445482472, &obs, None), Duration::from_secs(600))
            .await
            .unwrap();
        let broadcaster = Broadcaster::new(store.clone());
        let (id, mut rx) = broadcaster.subscribe().await;

        let catch_up = tokio::spawn({
            let broadcaster = broadcaster.clone();
            async move { broadcaster.notify_one(id).await }
        });
        store.read_done.notified().await;

        // a newer capture lands while the catch-up still holds its old read
        store
            .merge(&MergeParams::new(T2, 1673445484472, &obs, None), Duration::from_secs(600))
            .await
            .unwrap();
        let update = tokio::spawn({
            let broadcaster = broadcaster.clone();
            async move { broadcaster.notify_all(T2).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        store.release.notify_one();

        assert!(catch_up.await.unwrap().unwrap());
        assert_eq!(update.await.unwrap().unwrap(), 1);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.timestamp, T1);
        assert_eq!(second.timestamp, T2);
        assert_eq!(second.drones[0].position_history.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let broadcaster = Broadcaster::new(store_with_drone().await);
        let (_id, rx) = broadcaster.subscribe().await;
        drop(rx);

        assert_eq!(broadcaster.notify_all(T1).await.unwrap(), 0);
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscriber_streams() {
        let broadcaster = Broadcaster::new(Arc::new(MemoryStore::new()));
        let (_id, mut rx) = broadcaster.subscribe().await;

        broadcaster.close().await;
        assert!(rx.recv().await.is_none());
    }
}
