//! Room and statistics endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use berrypoker::room::RoomSummary;
use berrypoker::RoomSettings;

use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub settings: RoomSettings,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: i64,
}

fn default_leaderboard_limit() -> i64 {
    10
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": message.into() })),
    )
}

fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": message })))
}

fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "internal server error" })),
    )
}

/// `POST /api/rooms` - create a room with optional settings.
pub async fn create_room(
    State(state): State<AppState>,
    body: Option<Json<CreateRoomRequest>>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let settings = body
        .and_then(|Json(request)| request.settings)
        .unwrap_or_default();
    settings.validate().map_err(bad_request)?;

    let handle = state
        .registry
        .create_room(settings.clone())
        .await
        .map_err(|err| {
            error!("room creation failed: {err}");
            internal_error()
        })?;

    crate::metrics::rooms_created_total();
    Ok(Json(CreateRoomResponse {
        room_id: handle.room_id().to_string(),
        settings,
    }))
}

/// `GET /api/rooms/{room_id}` - settings and seat occupancy.
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, ApiError> {
    let handle = state
        .registry
        .get_room(&room_id)
        .await
        .ok_or_else(|| not_found("Room not found"))?;
    let summary = handle
        .summary()
        .await
        .map_err(|_| not_found("Room not found"))?;
    Ok(Json(summary))
}

/// `GET /api/rooms/{room_id}/history` - recent hands for a room.
pub async fn get_room_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let history = state
        .store
        .room_history(&room_id, query.limit.clamp(1, 500))
        .await
        .map_err(|err| {
            error!("history query failed for room {room_id}: {err}");
            internal_error()
        })?;
    Ok(Json(json!(history)))
}

/// `GET /api/stats/{player_name}` - aggregate statistics for one player.
/// Unknown names report zeros rather than 404, matching the client's
/// expectations for new players.
pub async fn get_player_stats(
    State(state): State<AppState>,
    Path(player_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state
        .store
        .player_stats(&player_name)
        .await
        .map_err(|err| {
            error!("stats query failed for {player_name}: {err}");
            internal_error()
        })?
        .unwrap_or_else(|| berrypoker::db::PlayerStatsRow::empty(&player_name));
    Ok(Json(json!(stats)))
}

/// `GET /api/leaderboard` - top players by profit.
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Value>, ApiError> {
    let board = state
        .store
        .leaderboard(query.limit.clamp(1, 100))
        .await
        .map_err(|err| {
            error!("leaderboard query failed: {err}");
            internal_error()
        })?;
    Ok(Json(json!(board)))
}
