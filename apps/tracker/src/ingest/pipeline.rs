use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::feed::registry::PilotDirectory;
use crate::ingest::dedup::DedupGate;
use crate::ingest::validation::validate_pilot;
use crate::models::drone::PilotRecord;
use crate::models::snapshot::{Observation, Snapshot};
use crate::store::{MergeOutcome, MergeParams, TelemetryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    pub merged: usize,
    /// Drones that already held an observation for this timestamp.
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    AlreadyIngested,
    Ingested(IngestReport),
}

impl IngestOutcome {
    /// True if subscribers have something new to see.
    pub fn changed_store(&self) -> bool {
        matches!(self, IngestOutcome::Ingested(report) if report.merged > 0)
    }
}

/// Turns validated snapshots into per-drone merges.
pub struct Ingestor {
    store: Arc<dyn TelemetryStore>,
    gate: DedupGate,
    pilots: Arc<dyn PilotDirectory>,
    ttl: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        pilots: Arc<dyn PilotDirectory>,
        ttl: Duration,
    ) -> Self {
        Self {
            gate: DedupGate::new(store.clone()),
            store,
            pilots,
            ttl,
        }
    }

    /// Ingests one snapshot at most once.
    ///
    /// Drones are merged concurrently and independently: a store failure for one
    /// drone is logged and does not stop the others. The snapshot timestamp is
    /// recorded only when no merge failed, so a partially failed snapshot stays
    /// eligible for a retry (already merged drones report `duplicates` then).
    pub async fn ingest(&self, snapshot: &Snapshot) -> Result<IngestOutcome, StoreError> {
        let Some(claim) = self
            .gate
            .claim(&snapshot.timestamp, snapshot.epoch_millis)
            .await?
        else {
            info!(
                "Snapshot {} matches a previous capture, skipping",
                snapshot.timestamp
            );
            return Ok(IngestOutcome::AlreadyIngested);
        };

        let results = join_all(
            snapshot
                .observations
                .iter()
                .map(|obs| self.ingest_observation(snapshot, obs)),
        )
        .await;

        let mut report = IngestReport::default();
        for (obs, result) in snapshot.observations.iter().zip(results) {
            match result {
                Ok(MergeOutcome::Merged) => report.merged += 1,
                Ok(MergeOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!("Merge of {} at {} failed: {e}", obs.entity_id, snapshot.timestamp);
                    report.failed += 1;
                }
            }
        }

        if report.failed == 0 {
            claim.commit().await?;
        } else {
            warn!(
                "Snapshot {} left unrecorded: {} of {} merges failed",
                snapshot.timestamp,
                report.failed,
                snapshot.observations.len()
            );
        }

        info!(
            "Ingested snapshot {}: merged={} duplicates={} failed={}",
            snapshot.timestamp, report.merged, report.duplicates, report.failed
        );
        Ok(IngestOutcome::Ingested(report))
    }

    async fn ingest_observation(
        &self,
        snapshot: &Snapshot,
        observation: &Observation,
    ) -> Result<MergeOutcome, StoreError> {
        let pilot = if observation.restricted && !self.store.has_pilot(&observation.entity_id).await? {
            self.lookup_pilot(&observation.entity_id).await
        } else {
            None
        };

        self.store
            .merge(
                &MergeParams::new(
                    &snapshot.timestamp,
                    snapshot.epoch_millis,
                    observation,
                    pilot.as_ref(),
                ),
                self.ttl,
            )
            .await
    }

    /// Registry failures degrade to "no pilot"; they never fail the merge.
    async fn lookup_pilot(&self, entity_id: &str) -> Option<PilotRecord> {
        let pilot = match self.pilots.lookup(entity_id).await {
            Ok(pilot) => pilot,
            Err(e) => {
                warn!("Pilot lookup for {entity_id} failed: {e}");
                return None;
            }
        };

        match validate_pilot(&pilot) {
            Ok(()) => Some(pilot),
            Err(e) => {
                warn!("Discarding pilot for {entity_id}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::errors::TransportError;
    use crate::models::drone::{AggregatedRecord, RestrictionState};
    use crate::store::MemoryStore;

    const T1: &str = "2023-01-11T13:58:02.472Z";
    const T2: &str = "2023-01-11T13:58:04.472Z";
    const TTL: Duration = Duration::from_secs(600);

    /// Registry fake answering from a fixed table and counting calls.
    #[derive(Default)]
    pub(crate) struct FakeRegistry {
        pilots: HashMap<String, PilotRecord>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeRegistry {
        pub(crate) fn with(entries: &[(&str, PilotRecord)]) -> Self {
            Self {
                pilots: entries
                    .iter()
                    .map(|(id, p)| (id.to_string(), p.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PilotDirectory for FakeRegistry {
        async fn lookup(&self, entity_id: &str) -> Result<PilotRecord, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pilots
                .get(entity_id)
                .cloned()
                .ok_or(TransportError::Status {
                    service: "drone registry API",
                    status: 404,
                })
        }
    }

    /// Store wrapper that fails every merge for one drone.
    struct FailingStore {
        inner: MemoryStore,
        broken: &'static str,
    }

    #[async_trait]
    impl TelemetryStore for FailingStore {
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
            if params.observation.entity_id == self.broken {
                return Err(StoreError::Corrupt {
                    key: format!("drones:{}", self.broken),
                    message: "injected".to_string(),
                });
            }
            self.inner.merge(params, ttl).await
        }
        async fn all_records(&self) -> Result<Vec<AggregatedRecord>, StoreError> {
            self.inner.all_records().await
        }
        async fn prune_ingested_before(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
            self.inner.prune_ingested_before(cutoff_millis).await
        }
    }

    pub(crate) fn pilot(id: &str) -> PilotRecord {
        PilotRecord {
            pilot_id: id.to_string(),
            first_name: "test".to_string(),
            last_name: "pilot".to_string(),
            phone_number: "+123123".to_string(),
            email: "example@example.com".to_string(),
        }
    }

    pub(crate) fn snapshot(timestamp: &str, epoch_millis: i64, drones: &[(&str, f64, f64)]) -> Snapshot {
        Snapshot {
            timestamp: timestamp.to_string(),
            epoch_millis,
            observations: drones
                .iter()
                .map(|&(id, x, y)| Observation::new(id, x, y))
                .collect(),
        }
    }

    fn sorted(mut records: Vec<AggregatedRecord>) -> Vec<AggregatedRecord> {
        records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        records
    }

    #[tokio::test]
    async fn test_ingest_two_reports() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(FakeRegistry::with(&[
            ("SN-trespassin", pilot("P-0Mz6Mc7Nnv")),
            ("SN-nottrespas", pilot("P-2222222222")),
        ]));
        let ingestor = Ingestor::new(store.clone(), registry.clone(), TTL);

        let first = snapshot(
            T1,
            1673445482472,
            &[("SN-nottrespas", 250000.0, 149999.0), ("SN-trespassin", 250000.0, 250000.0)],
        );
        let outcome = ingestor.ingest(&first).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Ingested(IngestReport {
                merged: 2,
                duplicates: 0,
                failed: 0
            })
        );
        // only the restricted drone needed its pilot
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);

        let second = snapshot(T2, 1673445484472, &[("SN-nottrespas", 250000.0, 150000.0)]);
        ingestor.ingest(&second).await.unwrap();

        let records = sorted(store.all_records().await.unwrap());
        let later = &records[0];
        assert_eq!(later.entity_id, "SN-nottrespas");
        assert_eq!(later.closest_distance, 100000.0);
        assert_eq!(later.restriction.since(), Some(T2));
        assert_eq!(later.last_seen, T2);
        assert_eq!(later.pilot.as_ref().unwrap().pilot_id, "P-2222222222");
        assert_eq!(later.position_history.len(), 2);
        assert_eq!(later.position_history[0].timestamp, T2);
        assert_eq!(later.position_history[1].y, 149999.0);

        let early = &records[1];
        assert_eq!(early.closest_distance, 0.0);
        assert_eq!(
            early.restriction,
            RestrictionState::Restricted {
                since: T1.to_string()
            }
        );
        assert_eq!(early.last_seen, T1);

        assert_eq!(store.latest_timestamp().await.unwrap().as_deref(), Some(T2));
    }

    #[tokio::test]
    async fn test_same_timestamp_is_ingested_once() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(FakeRegistry::default()), TTL);

        ingestor
            .ingest(&snapshot(T1, 1, &[("SN-trespassin", 250000.0, 250000.0)]))
            .await
            .unwrap();
        let before = sorted(store.all_records().await.unwrap());

        let replay = snapshot(T1, 1, &[("SN-trespassin", 1.0, 1.0), ("SN-newcomer1", 2.0, 2.0)]);
        let outcome = ingestor.ingest(&replay).await.unwrap();

        assert_eq!(outcome, IngestOutcome::AlreadyIngested);
        assert!(!outcome.changed_store());
        assert_eq!(sorted(store.all_records().await.unwrap()), before);
    }

    #[tokio::test]
    async fn test_pilot_lookup_skipped_when_pilot_stored() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(FakeRegistry::with(&[("SN-trespassin", pilot("P-0Mz6Mc7Nnv"))]));
        let ingestor = Ingestor::new(store.clone(), registry.clone(), TTL);

        ingestor
            .ingest(&snapshot(T1, 1, &[("SN-trespassin", 250000.0, 250000.0)]))
            .await
            .unwrap();
        ingestor
            .ingest(&snapshot(T2, 2, &[("SN-trespassin", 250001.0, 250000.0)]))
            .await
            .unwrap();

        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_pilot_degrades_to_no_pilot() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(FakeRegistry::with(&[("SN-trespassin", pilot("testpilot"))]));
        let ingestor = Ingestor::new(store.clone(), registry, TTL);

        let outcome = ingestor
            .ingest(&snapshot(T1, 1, &[("SN-trespassin", 250000.0, 250000.0)]))
            .await
            .unwrap();

        assert!(outcome.changed_store());
        let records = store.all_records().await.unwrap();
        assert!(records[0].restriction.is_restricted());
        assert!(records[0].pilot.is_none());
    }

    #[tokio::test]
    async fn test_registry_failure_degrades_to_no_pilot() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(FakeRegistry::default()), TTL);

        ingestor
            .ingest(&snapshot(T1, 1, &[("SN-trespassin", 250000.0, 250000.0)]))
            .await
            .unwrap();

        assert!(store.all_records().await.unwrap()[0].pilot.is_none());
        assert!(store.is_ingested(T1).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_isolated_to_one_drone() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            broken: "SN-brokenbrkn",
        });
        let ingestor = Ingestor::new(store.clone(), Arc::new(FakeRegistry::default()), TTL);
        let snap = snapshot(
            T1,
            1,
            &[("SN-brokenbrkn", 1.0, 1.0), ("SN-healthyhlt", 2.0, 2.0)],
        );

        let outcome = ingestor.ingest(&snap).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Ingested(IngestReport {
                merged: 1,
                duplicates: 0,
                failed: 1
            })
        );
        assert!(!store.is_ingested(T1).await.unwrap());

        // a retry does not duplicate the healthy drone's history
        let retry = ingestor.ingest(&snap).await.unwrap();
        assert_eq!(
            retry,
            IngestOutcome::Ingested(IngestReport {
                merged: 0,
                duplicates: 1,
                failed: 1
            })
        );
        let records = store.all_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position_history.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_replay_after_partial_failure_is_ignored() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            broken: "SN-brokenbrkn",
        });
        let ingestor = Ingestor::new(store.clone(), Arc::new(FakeRegistry::default()), TTL);
        let first = snapshot(
            T1,
            1673445482472,
            &[("SN-brokenbrkn", 1.0, 1.0), ("SN-healthyhlt", 2.0, 2.0)],
        );

        ingestor.ingest(&first).await.unwrap();
        assert!(!store.is_ingested(T1).await.unwrap());
        ingestor
            .ingest(&snapshot(T2, 1673445484472, &[("SN-healthyhlt", 3.0, 3.0)]))
            .await
            .unwrap();

        let replay = ingestor.ingest(&first).await.unwrap();
        assert_eq!(
            replay,
            IngestOutcome::Ingested(IngestReport {
                merged: 0,
                duplicates: 1,
                failed: 1
            })
        );
        assert!(!replay.changed_store());

        let records = store.all_records().await.unwrap();
        assert_eq!(records.len(), 1);
        let healthy = &records[0];
        assert_eq!(healthy.last_seen, T2);
        let history: Vec<&str> = healthy
            .position_history
            .iter()
            .map(|p| p.timestamp.as_str())
            .collect();
        assert_eq!(history, vec![T2, T1]);
    }

    #[tokio::test]
    async fn test_history_has_one_entry_per_merge() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(FakeRegistry::default()), TTL);

        for i in 0..5 {
            let ts = format!("2023-01-11T13:58:0{i}.000Z");
            ingestor
                .ingest(&snapshot(&ts, i, &[("SN-nottrespas", 10.0 * i as f64, 5.0)]))
                .await
                .unwrap();
        }

        let record = &store.all_records().await.unwrap()[0];
        assert_eq!(record.position_history.len(), 5);
        for (entry, i) in record.position_history.iter().zip((0..5).rev()) {
            assert_eq!(entry.timestamp, format!("2023-01-11T13:58:0{i}.000Z"));
            assert_eq!(entry.x, 10.0 * i as f64);
            assert_eq!(entry.y, 5.0);
        }
    }
}
