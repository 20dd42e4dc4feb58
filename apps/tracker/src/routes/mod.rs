pub mod drones;
pub mod health;
pub mod ws;

use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn build_router(state: AppState, static_dir: &str) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/drones", get(drones::handle_get_drones))
        .route("/ws", get(ws::handle_ws))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}
