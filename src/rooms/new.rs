use std::sync::Arc;

use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::catalog;
use crate::rooms::{RoomKind, fetch_room};
use crate::scheduler::RoomScheduler;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRoomBody {
    category: Option<String>,
    theme: Option<String>,
    duration: Option<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    start_time: Option<OffsetDateTime>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    is_sponsored: bool,
    sponsor_name: Option<String>,
    max_participants: Option<i64>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_room(
    State(db_pool): State<SqlitePool>,
    State(scheduler): State<Arc<RoomScheduler>>,
    AuthUser(owner): AuthUser,
    Json(body): Json<CreateRoomBody>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let (Some(category_id), Some(theme_id)) = (body.category, body.theme) else {
        return Err(ApiError::validation("Category and theme are required."));
    };

    if body.is_sponsored && body.sponsor_name.as_deref().is_none_or(|s| s.trim().is_empty()) {
        return Err(ApiError::validation("Sponsor name required"));
    }

    let kind = body
        .kind
        .as_deref()
        .and_then(RoomKind::parse)
        .ok_or_else(|| ApiError::validation("Invalid room type"))?;

    let duration = body.duration.unwrap_or(0);
    if duration <= 0 {
        return Err(ApiError::validation("Duration must be a positive number of minutes."));
    }

    let max_participants = body.max_participants.unwrap_or(10);
    if max_participants < 1 {
        return Err(ApiError::validation("Max participants must be at least 1."));
    }

    // Category checked before theme; each missing reference 404s on its own.
    if catalog::fetch_category(&db_pool, &category_id).await?.is_none() {
        return Err(ApiError::not_found("Category not found."));
    }
    if catalog::fetch_theme(&db_pool, &theme_id).await?.is_none() {
        return Err(ApiError::not_found("Theme not found."));
    }

    let id = Uuid::now_v7().to_string();
    let now = OffsetDateTime::now_utc();
    let start_time = body.start_time.map(|t| t.to_offset(time::UtcOffset::UTC));

    sqlx::query(
        "INSERT INTO rooms (id, category, theme, duration, start_time, kind, is_sponsored, sponsor_name, owner, max_participants, created_at, updated_at)
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
    )
    .bind(&id)
    .bind(&category_id)
    .bind(&theme_id)
    .bind(duration)
    .bind(start_time)
    .bind(kind.as_str())
    .bind(body.is_sponsored)
    .bind(body.is_sponsored.then_some(body.sponsor_name).flatten())
    .bind(&owner)
    .bind(max_participants)
    .bind(now)
    .bind(now)
    .execute(&db_pool)
    .await?;

    // Not transactional with the insert above: a failure here leaves the
    // room live but absent from the category/theme listings.
    catalog::append_room_refs(&db_pool, &category_id, &theme_id, &id).await?;

    let room = fetch_room(&db_pool, &id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("room {id} vanished right after insert"))?;

    // Scheduling failures are logged inside the scheduler; the created
    // room is returned either way.
    if room.start_time.is_some() {
        scheduler.schedule_room_start(&room).await;
    }

    tracing::info!(room = %room.id, owner = %owner, "room created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Room created successfully", "room": room })),
    ))
}
