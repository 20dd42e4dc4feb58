use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;

use crate::errors::ValidationError;
use crate::models::airspace::within_bounds;
use crate::models::drone::PilotRecord;
use crate::models::snapshot::{Observation, RawCapture, Snapshot};

fn serial_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^SN-[A-Za-z0-9_-]{10}$").expect("valid serial regex"))
}

fn pilot_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^P-[A-Za-z0-9_-]{10}$").expect("valid pilot regex"))
}

/// Validates a decoded capture and turns it into a `Snapshot`.
///
/// Checks run in order and stop at the first failure:
/// 1. the timestamp is a strict ISO-8601 date-time (`T` separator, explicit offset)
/// 2. every serial number is `SN-` followed by ten alphanumerics (`-` and `_` allowed)
/// 3. every coordinate pair lies inside the monitored area, edges included
///
/// Nothing of a rejected capture is ingested.
pub fn validate_capture(raw: RawCapture) -> Result<Snapshot, ValidationError> {
    let epoch_millis = parse_strict_timestamp(&raw.snapshot_timestamp)
        .ok_or_else(|| ValidationError::Timestamp(raw.snapshot_timestamp.clone()))?;

    if let Some(drone) = raw
        .drones
        .iter()
        .find(|d| !serial_number_pattern().is_match(&d.serial_number))
    {
        return Err(ValidationError::SerialNumber(drone.serial_number.clone()));
    }

    if let Some(drone) = raw
        .drones
        .iter()
        .find(|d| !within_bounds(d.position_x, d.position_y))
    {
        return Err(ValidationError::Coordinates {
            entity_id: drone.serial_number.clone(),
            x: drone.position_x,
            y: drone.position_y,
        });
    }

    let observations = raw
        .drones
        .into_iter()
        .map(|d| Observation::new(d.serial_number, d.position_x, d.position_y))
        .collect();

    Ok(Snapshot {
        timestamp: raw.snapshot_timestamp,
        epoch_millis,
        observations,
    })
}

/// Rejects a registry payload whose `pilotId` is not `P-` plus ten alphanumerics.
/// Other pilot fields are passed through unchecked.
pub fn validate_pilot(pilot: &PilotRecord) -> Result<(), ValidationError> {
    if pilot_id_pattern().is_match(&pilot.pilot_id) {
        Ok(())
    } else {
        Err(ValidationError::PilotId(pilot.pilot_id.clone()))
    }
}

fn parse_strict_timestamp(value: &str) -> Option<i64> {
    if value.as_bytes().get(10) != Some(&b'T') {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
