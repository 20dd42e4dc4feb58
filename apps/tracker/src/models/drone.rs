use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// Owner of a drone as reported by the drone registry.
/// Unknown registry fields (e.g. `createdDt`) are dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PilotRecord {
    pub pilot_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: String,
}

/// One entry of a drone's position history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionEntry {
    pub timestamp: String,
    #[serde(rename = "positionX")]
    pub x: f64,
    #[serde(rename = "positionY")]
    pub y: f64,
}

/// One-way restriction state of a drone: `Clear -> Restricted`.
/// `since` is pinned by the transition and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestrictionState {
    #[default]
    Clear,
    Restricted { since: String },
}

impl RestrictionState {
    /// Folds one observation into the state. Only a restricted observation
    /// seen while `Clear` changes anything.
    pub fn observe(self, restricted: bool, timestamp: &str) -> Self {
        match self {
            RestrictionState::Clear if restricted => RestrictionState::Restricted {
                since: timestamp.to_string(),
            },
            state => state,
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, RestrictionState::Restricted { .. })
    }

    pub fn since(&self) -> Option<&str> {
        match self {
            RestrictionState::Clear => None,
            RestrictionState::Restricted { since } => Some(since),
        }
    }
}

impl Serialize for RestrictionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RestrictionState", 2)?;
        state.serialize_field("restrictedEver", &self.is_restricted())?;
        match self.since() {
            Some(since) => state.serialize_field("firstRestrictedAt", since)?,
            None => state.skip_field("firstRestrictedAt")?,
        }
        state.end()
    }
}

/// The rolling aggregate kept for every drone seen within its TTL window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    #[serde(rename = "id")]
    pub entity_id: String,
    pub closest_distance: f64,
    pub last_seen: String,
    /// `last_seen` as epoch millis; merges older than this are stale.
    #[serde(skip)]
    pub last_seen_millis: i64,
    #[serde(flatten)]
    pub restriction: RestrictionState,
    /// Newest first.
    pub position_history: Vec<PositionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot: Option<PilotRecord>,
}
