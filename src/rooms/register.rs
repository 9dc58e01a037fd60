use axum::{Json, debug_handler, extract::{Path, State}};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::rooms::{Room, fetch_room};

/// The membership checks below give precise messages, but the insert
/// itself is the authority: its count guard and the unique index keep the
/// capacity invariant under concurrent registrations.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn register_to_room(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let room = require_room(&db_pool, &room_id).await?;

    if room.is_participant(&user_id) {
        return Err(ApiError::conflict("You are already registered to this room."));
    }
    if room.is_full() {
        return Err(capacity_error(&room));
    }

    match try_register(&db_pool, &room_id, &user_id).await {
        Ok(result) if result.rows_affected() == 0 => return Err(capacity_error(&room)),
        Ok(_) => {}
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ApiError::conflict("You are already registered to this room."));
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(room = %room_id, user = %user_id, "user registered");

    let room = require_room(&db_pool, &room_id).await?;
    Ok(Json(json!({
        "message": "You have been registered to the room successfully.",
        "room": room,
    })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn unregister_from_room(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let room = require_room(&db_pool, &room_id).await?;

    if !room.is_participant(&user_id) {
        return Err(ApiError::conflict("You are not registered to this room."));
    }

    sqlx::query("DELETE FROM room_participants WHERE room_id=? AND user_id=?")
        .bind(&room_id)
        .bind(&user_id)
        .execute(&db_pool)
        .await?;

    tracing::info!(room = %room_id, user = %user_id, "user unregistered");

    let room = require_room(&db_pool, &room_id).await?;
    Ok(Json(json!({
        "message": "You have been unregistered from the room successfully.",
        "room": room,
    })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn is_user_in_room(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let room = require_room(&db_pool, &room_id).await?;
    Ok(Json(json!({ "isUserInRoom": room.is_participant(&user_id) })))
}

/// The atomic membership append: inserts only while the current count is
/// below the room's cap, and the unique index rejects duplicates. Zero
/// rows affected means the room was full.
pub(crate) async fn try_register(
    db_pool: &SqlitePool,
    room_id: &str,
    user_id: &str,
) -> Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error> {
    sqlx::query(
        "INSERT INTO room_participants (room_id, user_id, joined_at)
         SELECT ?, ?, ?
         WHERE (SELECT COUNT(*) FROM room_participants WHERE room_id = ?)
             < (SELECT max_participants FROM rooms WHERE id = ?)",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(OffsetDateTime::now_utc())
    .bind(room_id)
    .bind(room_id)
    .execute(db_pool)
    .await
}

pub(crate) async fn require_room(db_pool: &SqlitePool, room_id: &str) -> AppResult<Room> {
    fetch_room(db_pool, room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room not found."))
}

fn capacity_error(room: &Room) -> ApiError {
    ApiError::conflict(format!(
        "This room has reached its limit of {} participants.",
        room.max_participants
    ))
}
