use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::drone::AggregatedRecord;
use crate::state::AppState;

#[derive(Serialize)]
pub struct DronesResponse {
    pub timestamp: Option<String>,
    pub drones: Vec<AggregatedRecord>,
}

/// GET /api/v1/drones
/// Current aggregate of every drone still inside its TTL window.
pub async fn handle_get_drones(
    State(state): State<AppState>,
) -> Result<Json<DronesResponse>, AppError> {
    let timestamp = state.store.latest_timestamp().await?;
    let mut drones = state.store.all_records().await?;
    drones.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.entity_id.cmp(&b.entity_id)));
    Ok(Json(DronesResponse { timestamp, drones }))
}
