use crate::models::drone::{AggregatedRecord, PilotRecord, PositionEntry, RestrictionState};
use crate::models::snapshot::Observation;

/// Input of one per-drone merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeParams<'a> {
    /// Timestamp of the snapshot the observation belongs to.
    pub timestamp: &'a str,
    pub epoch_millis: i64,
    pub observation: &'a Observation,
    /// Registry answer for this drone, if a lookup was made and succeeded.
    pub pilot: Option<&'a PilotRecord>,
}

impl<'a> MergeParams<'a> {
    pub fn new(
        timestamp: &'a str,
        epoch_millis: i64,
        observation: &'a Observation,
        pilot: Option<&'a PilotRecord>,
    ) -> Self {
        Self {
            timestamp,
            epoch_millis,
            observation,
            pilot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The record was already seen at this timestamp or a later one.
    Duplicate,
}

/// Folds one observation into the existing record (or a fresh one).
///
/// - `closest_distance` only ever decreases
/// - `restriction` moves `Clear -> Restricted` at most once, pinning the timestamp
/// - the new position goes to the front of the history
/// - a restricted observation that carries a pilot attaches it, replacing a
///   different pilot outright
///
/// An observation not newer than the record's `last_seen` is a no-op, so a
/// replayed capture can neither duplicate nor reorder the history.
pub fn merge_observation(
    existing: Option<AggregatedRecord>,
    params: &MergeParams<'_>,
) -> (AggregatedRecord, MergeOutcome) {
    let MergeParams {
        timestamp,
        epoch_millis,
        observation,
        pilot,
    } = *params;

    let mut record = match existing {
        Some(record) if epoch_millis <= record.last_seen_millis => {
            return (record, MergeOutcome::Duplicate);
        }
        Some(record) => record,
        None => AggregatedRecord {
            entity_id: observation.entity_id.clone(),
            closest_distance: f64::INFINITY,
            last_seen: String::new(),
            last_seen_millis: i64::MIN,
            restriction: RestrictionState::Clear,
            position_history: Vec::new(),
            pilot: None,
        },
    };

    record.closest_distance = record.closest_distance.min(observation.distance);
    record.last_seen = timestamp.to_string();
    record.last_seen_millis = epoch_millis;
    record.restriction =
        std::mem::take(&mut record.restriction).observe(observation.restricted, timestamp);
    record.position_history.insert(
        0,
        PositionEntry {
            timestamp: timestamp.to_string(),
            x: observation.x,
            y: observation.y,
        },
    );

    if let (true, Some(pilot)) = (observation.restricted, pilot) {
        if record.pilot.as_ref() != Some(pilot) {
            record.pilot = Some(pilot.clone());
        }
    }

    (record, MergeOutcome::Merged)
}
