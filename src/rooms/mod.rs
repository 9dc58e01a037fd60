mod new;
mod register;
mod room;
mod start;
pub(crate) mod ws;

use axum::{Router, routing::{get, patch, post}};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::AppState;

/// Paths are spelled out in full because the surface spans two prefixes
/// (`/room/...` for the original CRUD verbs, `/rooms/...` for the start
/// controls).
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/room/createRoom", post(new::create_room))
        .route("/room/getAllRooms", get(room::get_all_rooms))
        .route("/room/getRoomById/{id}", get(room::get_room_by_id))
        .route("/room/registerToRoom/{roomId}", post(register::register_to_room))
        .route("/room/unregisterFromRoom/{roomId}", post(register::unregister_from_room))
        .route("/room/{roomId}/isUserInRoom", get(register::is_user_in_room))
        .route("/rooms/{roomId}/start-time", patch(start::update_start_time))
        .route("/rooms/{roomId}/start", post(start::start_room_now))
        .route("/ws", get(ws::room_ws))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Public,
    Private,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: String,
    pub category: String,
    pub theme: String,
    pub duration: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub is_sponsored: bool,
    pub sponsor_name: Option<String>,
    pub owner: String,
    pub participants: Vec<String>,
    pub max_participants: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Room {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() as i64 >= self.max_participants
    }
}

pub(crate) const ROOM_COLUMNS: &str = "id, category, theme, duration, start_time, kind, \
     is_sponsored, sponsor_name, owner, max_participants, created_at, updated_at";

/// Raw row; participants are joined in from `room_participants` when the
/// row is turned into a `Room`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RoomRow {
    pub id: String,
    pub category: String,
    pub theme: String,
    pub duration: i64,
    pub start_time: Option<OffsetDateTime>,
    pub kind: String,
    pub is_sponsored: bool,
    pub sponsor_name: Option<String>,
    pub owner: String,
    pub max_participants: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl RoomRow {
    pub(crate) fn into_room(self, participants: Vec<String>) -> anyhow::Result<Room> {
        let kind = RoomKind::parse(&self.kind)
            .ok_or_else(|| anyhow::anyhow!("room {} has unknown kind {:?}", self.id, self.kind))?;
        Ok(Room {
            id: self.id,
            category: self.category,
            theme: self.theme,
            duration: self.duration,
            start_time: self.start_time,
            kind,
            is_sponsored: self.is_sponsored,
            sponsor_name: self.sponsor_name,
            owner: self.owner,
            participants,
            max_participants: self.max_participants,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn fetch_room(db_pool: &SqlitePool, id: &str) -> anyhow::Result<Option<Room>> {
    let query = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?");
    let Some(row) = sqlx::query_as::<_, RoomRow>(&query)
        .bind(id)
        .fetch_optional(db_pool)
        .await?
    else {
        return Ok(None);
    };

    let participants = participant_ids(db_pool, id).await?;
    Ok(Some(row.into_room(participants)?))
}

pub(crate) async fn participant_ids(
    db_pool: &SqlitePool,
    room_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT user_id FROM room_participants WHERE room_id=? ORDER BY joined_at")
        .bind(room_id)
        .fetch_all(db_pool)
        .await
}

/// Rooms whose start time is strictly after `after`, for startup
/// scheduling recovery.
pub async fn fetch_rooms_starting_after(
    db_pool: &SqlitePool,
    after: OffsetDateTime,
) -> anyhow::Result<Vec<Room>> {
    let query = format!(
        "SELECT {ROOM_COLUMNS} FROM rooms WHERE start_time IS NOT NULL AND start_time > ?"
    );
    let rows = sqlx::query_as::<_, RoomRow>(&query)
        .bind(after)
        .fetch_all(db_pool)
        .await?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        let participants = participant_ids(db_pool, &row.id).await?;
        rooms.push(row.into_room(participants)?);
    }
    Ok(rooms)
}
