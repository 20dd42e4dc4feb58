use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::models::drone::{AggregatedRecord, PilotRecord, PositionEntry, RestrictionState};
use crate::store::merge::{MergeOutcome, MergeParams};
use crate::store::TelemetryStore;

const TIMESTAMPS_KEY: &str = "timestamps";
const DRONE_PREFIX: &str = "drones:";
const MERGE_SCRIPT: &str = include_str!("merge_drone.lua");

fn drone_key(entity_id: &str) -> String {
    format!("{DRONE_PREFIX}{entity_id}")
}

fn pos_key(entity_id: &str) -> String {
    format!("pos:{entity_id}")
}

fn pilot_key(entity_id: &str) -> String {
    format!("pilots:{entity_id}")
}

/// Redis-backed store.
///
/// Layout per drone: `drones:{id}` hash, `pos:{id}` list (newest first) and
/// `pilots:{id}` hash, all sharing one TTL. The dedup index is the global
/// `timestamps` sorted set scored by epoch millis.
///
/// Merges run as one Lua script, so Redis serializes them per drone and no
/// reader ever sees a half-applied merge.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    merge_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to Redis...");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connection established");

        Ok(Self {
            conn,
            merge_script: Script::new(MERGE_SCRIPT),
        })
    }

    async fn load_record(
        &self,
        entity_id: &str,
    ) -> Result<Option<AggregatedRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let (fields, positions, pilot): (
            HashMap<String, String>,
            Vec<String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .atomic()
            .hgetall(drone_key(entity_id))
            .lrange(pos_key(entity_id), 0, -1)
            .hgetall(pilot_key(entity_id))
            .query_async(&mut conn)
            .await?;

        // expired between SCAN and read
        if fields.is_empty() {
            return Ok(None);
        }

        record_from_parts(entity_id, fields, positions, pilot).map(Some)
    }
}

#[async_trait]
impl TelemetryStore for RedisStore {
    async fn is_ingested(&self, timestamp: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn.zscore(TIMESTAMPS_KEY, timestamp).await?;
        Ok(score.is_some())
    }

    async fn record_ingested(&self, timestamp: &str, epoch_millis: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(TIMESTAMPS_KEY, timestamp, epoch_millis)
            .await?;
        Ok(())
    }

    async fn latest_timestamp(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let latest: Vec<String> = conn.zrevrange(TIMESTAMPS_KEY, 0, 0).await?;
        Ok(latest.into_iter().next())
    }

    async fn has_pilot(&self, entity_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(pilot_key(entity_id)).await?)
    }

    async fn merge(
        &self,
        params: &MergeParams<'_>,
        ttl: Duration,
    ) -> Result<MergeOutcome, StoreError> {
        let observation = params.observation;
        let entity_id = observation.entity_id.as_str();

        let mut invocation = self.merge_script.prepare_invoke();
        invocation
            .key(drone_key(entity_id))
            .key(pos_key(entity_id))
            .key(pilot_key(entity_id))
            .arg(params.timestamp)
            .arg(params.epoch_millis)
            // EXPIRE 0 would delete the record outright
            .arg(ttl.as_secs().max(1))
            .arg(entity_id)
            .arg(observation.x.to_string())
            .arg(observation.y.to_string())
            .arg(observation.distance.to_string())
            .arg(if observation.restricted { "true" } else { "false" });

        if let Some(pilot) = params.pilot {
            invocation
                .arg(&pilot.pilot_id)
                .arg(&pilot.first_name)
                .arg(&pilot.last_name)
                .arg(&pilot.phone_number)
                .arg(&pilot.email);
        }

        let mut conn = self.conn.clone();
        let merged: i64 = invocation.invoke_async(&mut conn).await?;

        Ok(if merged == 1 {
            MergeOutcome::Merged
        } else {
            MergeOutcome::Duplicate
        })
    }

    async fn all_records(&self) -> Result<Vec<AggregatedRecord>, StoreError> {
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter: redis::AsyncIter<String> =
                conn.scan_match(format!("{DRONE_PREFIX}*")).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(entity_id) = key.strip_prefix(DRONE_PREFIX) else {
                continue;
            };
            match self.load_record(entity_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                // one unreadable drone must not hide the others
                Err(StoreError::Corrupt { key, message }) => {
                    warn!("Skipping unreadable record {key}: {message}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn prune_ingested_before(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn
            .zrembyscore(TIMESTAMPS_KEY, "-inf", cutoff_millis)
            .await?)
    }
}

/// Rebuilds a record from the three hashes/lists the merge script writes.
fn record_from_parts(
    entity_id: &str,
    mut fields: HashMap<String, String>,
    positions: Vec<String>,
    mut pilot: HashMap<String, String>,
) -> Result<AggregatedRecord, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        key: drone_key(entity_id),
        message,
    };

    let closest_distance = fields
        .get("closestDistance")
        .ok_or_else(|| corrupt("missing closestDistance".to_string()))?
        .parse::<f64>()
        .map_err(|e| corrupt(format!("closestDistance: {e}")))?;
    let last_seen = fields
        .remove("lastSeen")
        .ok_or_else(|| corrupt("missing lastSeen".to_string()))?;
    let last_seen_millis = fields
        .get("lastSeenMillis")
        .ok_or_else(|| corrupt("missing lastSeenMillis".to_string()))?
        .parse::<i64>()
        .map_err(|e| corrupt(format!("lastSeenMillis: {e}")))?;
    let restricted_ever = fields.get("restrictedEver").is_some_and(|v| v == "true");
    let restriction = match (restricted_ever, fields.remove("firstRestrictedAt")) {
        (true, Some(since)) => RestrictionState::Restricted { since },
        (true, None) => {
            return Err(corrupt("restricted without firstRestrictedAt".to_string()));
        }
        (false, _) => RestrictionState::Clear,
    };

    let position_history = positions
        .iter()
        .map(|entry| parse_position(entry).ok_or_else(|| corrupt(format!("bad position '{entry}'"))))
        .collect::<Result<Vec<_>, _>>()?;

    let pilot = if pilot.is_empty() {
        None
    } else {
        let mut take = |field: &str| {
            pilot.remove(field).ok_or_else(|| StoreError::Corrupt {
                key: pilot_key(entity_id),
                message: format!("missing {field}"),
            })
        };
        Some(PilotRecord {
            pilot_id: take("pilotId")?,
            first_name: take("firstName")?,
            last_name: take("lastName")?,
            phone_number: take("phoneNumber")?,
            email: take("email")?,
        })
    };

    Ok(AggregatedRecord {
        entity_id: entity_id.to_string(),
        closest_distance,
        last_seen,
        last_seen_millis,
        restriction,
        position_history,
        pilot,
    })
}

/// Parses `"{timestamp} {x} {y}"`.
fn parse_position(entry: &str) -> Option<PositionEntry> {
    let mut parts = entry.split(' ');
    let timestamp = parts.next()?.to_string();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(PositionEntry { timestamp, x, y })
}
