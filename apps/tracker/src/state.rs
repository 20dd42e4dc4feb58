use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::store::TelemetryStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Read-only from handlers; all writes go through the ingestion pipeline.
    pub store: Arc<dyn TelemetryStore>,
    pub broadcaster: Broadcaster,
}
