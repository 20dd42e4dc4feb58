use serde::Deserialize;

use crate::models::airspace::{distance_to_origin, within_restricted_area};

/// Capture as decoded from the upstream XML feed, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCapture {
    #[serde(rename = "@snapshotTimestamp")]
    pub snapshot_timestamp: String,
    #[serde(rename = "drone", default)]
    pub drones: Vec<RawDrone>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDrone {
    pub serial_number: String,
    pub position_x: f64,
    pub position_y: f64,
}

/// One validated upstream report.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// ISO-8601 capture time; the dedup key.
    pub timestamp: String,
    /// Capture time as milliseconds since the epoch; the dedup index score.
    pub epoch_millis: i64,
    pub observations: Vec<Observation>,
}

/// One drone's reading within a snapshot, with its derived fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity_id: String,
    pub x: f64,
    pub y: f64,
    pub distance: f64,
    pub restricted: bool,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            x,
            y,
            distance: distance_to_origin(x, y),
            restricted: within_restricted_area(x, y),
        }
    }
}
