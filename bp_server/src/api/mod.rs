//! HTTP and WebSocket surface.
//!
//! The HTTP side creates rooms and reports persisted statistics; all live
//! play happens over the WebSocket channel at `/ws/{room_id}`.

pub mod rooms;
pub mod websocket;

use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use berrypoker::{RoomRegistry, Store};

use crate::config::ServerConfig;

/// Shared state for every handler. Cloned per request; the inner Arcs make
/// that cheap.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub store: Store,
}

/// Build the full router.
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = if config.cors_allow_all() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms", post(rooms::create_room))
        .route("/api/rooms/{room_id}", get(rooms::get_room))
        .route("/api/rooms/{room_id}/history", get(rooms::get_room_history))
        .route("/api/stats/{player_name}", get(rooms::get_player_stats))
        .route("/api/leaderboard", get(rooms::get_leaderboard))
        .route("/ws/{room_id}", get(websocket::websocket_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check for load balancers: status plus live room count.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let rooms = state.registry.room_count().await;
    crate::metrics::rooms_active(rooms);
    Json(json!({ "status": "healthy", "rooms": rooms }))
}
