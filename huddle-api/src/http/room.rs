//! Room endpoints
//!
//! Room creation is implicit: a room exists from its first join until its
//! last participant leaves. These endpoints stay as the public surface for
//! clients that probe before connecting.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use huddle_core::models::RoomStats;

use crate::http::{AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomStats>,
}

/// `POST /api/rooms/create`
pub async fn create_room() -> AppResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse { status: "ok" }))
}

/// `GET /api/rooms/{room_id}`
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomResponse>> {
    let room = state.server.room_stats(&room_id);
    Ok(Json(RoomResponse { status: "ok", room }))
}
