use std::sync::Arc;

use axum::{Json, debug_handler, extract::{Path, State}};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::notify::{self, Notifier, RoomEventKind};
use crate::rooms::register::require_room;
use crate::scheduler::RoomScheduler;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateStartTimeBody {
    #[serde(default, with = "time::serde::rfc3339::option")]
    start_time: Option<OffsetDateTime>,
}

/// Owner-only. Persists the new start time, then re-runs scheduling so
/// the jobs registered for the old time are replaced.
#[debug_handler(state = AppState)]
pub(crate) async fn update_start_time(
    State(db_pool): State<SqlitePool>,
    State(scheduler): State<Arc<RoomScheduler>>,
    AuthUser(caller): AuthUser,
    Path(room_id): Path<String>,
    Json(body): Json<UpdateStartTimeBody>,
) -> AppResult<Json<serde_json::Value>> {
    let Some(start_time) = body.start_time else {
        return Err(ApiError::validation("Start time is required."));
    };

    let room = require_room(&db_pool, &room_id).await?;
    if room.owner != caller {
        return Err(ApiError::forbidden("Only the room owner can change the start time."));
    }

    sqlx::query("UPDATE rooms SET start_time=?, updated_at=? WHERE id=?")
        .bind(start_time.to_offset(time::UtcOffset::UTC))
        .bind(OffsetDateTime::now_utc())
        .bind(&room_id)
        .execute(&db_pool)
        .await?;

    let room = require_room(&db_pool, &room_id).await?;
    scheduler.schedule_room_start(&room).await;

    tracing::info!(room = %room_id, %start_time, "start time updated");

    Ok(Json(json!({
        "message": "Start time updated successfully.",
        "room": room,
    })))
}

/// Starts the room right now: any pending start/reminder jobs are
/// cancelled first, so the participants hear about the start exactly
/// once.
#[debug_handler(state = AppState)]
pub(crate) async fn start_room_now(
    State(db_pool): State<SqlitePool>,
    State(scheduler): State<Arc<RoomScheduler>>,
    State(notifier): State<Arc<dyn Notifier>>,
    AuthUser(caller): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let room = require_room(&db_pool, &room_id).await?;

    scheduler.cancel_room_start(&room.id).await;
    notify::notify_participants(notifier.as_ref(), &room, RoomEventKind::RoomStart, &caller).await;

    tracing::info!(room = %room_id, caller = %caller, "room started manually");

    Ok(Json(json!({ "message": "Room started." })))
}
