use axum::{Json, Router, debug_handler, extract::{Path, State}, routing::{get, patch}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::appresult::{ApiError, AppResult};
use crate::auth::AuthUser;
use crate::rooms::Room;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_notifications))
        .route("/read-all", patch(mark_all_as_read))
        .route("/{notificationId}/read", patch(mark_as_read))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    RoomStart,
    RoomReminder,
}

impl RoomEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomStart => "room_start",
            Self::RoomReminder => "room_reminder",
        }
    }
}

/// The event handed to `Notifier::notify`, one call per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEvent {
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: RoomEventKind,
    pub room_id: String,
}

/// Dispatch boundary. Production uses `ChannelNotifier`; scheduler tests
/// substitute a recording double.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, event: RoomEvent) -> anyhow::Result<()>;
}

/// Frames pushed on the process-wide broadcast channel, fanned out to
/// WebSocket connections which filter by recipient or joined room.
#[derive(Debug, Clone)]
pub enum Outbound {
    Notification { recipient: String, json: String },
    RoomMessage { room_id: String, json: String },
}

/// Persists each notification, then best-effort pushes it over the
/// broadcast channel for connected clients. A send with no receivers is
/// not an error.
pub struct ChannelNotifier {
    db_pool: SqlitePool,
    tx: broadcast::Sender<Outbound>,
}

impl ChannelNotifier {
    pub fn new(db_pool: SqlitePool, tx: broadcast::Sender<Outbound>) -> Self {
        Self { db_pool, tx }
    }
}

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, recipient: &str, event: RoomEvent) -> anyhow::Result<()> {
        let id = Uuid::now_v7().to_string();
        let created_at = OffsetDateTime::now_utc();

        sqlx::query(
            "INSERT INTO notifications (id, recipient, sender, kind, room_id, is_read, created_at)
             VALUES (?,?,?,?,?,0,?)",
        )
        .bind(&id)
        .bind(recipient)
        .bind(&event.sender)
        .bind(event.kind.as_str())
        .bind(&event.room_id)
        .bind(created_at)
        .execute(&self.db_pool)
        .await?;

        let json = serde_json::to_string(&json!({
            "id": id,
            "type": event.kind,
            "sender": event.sender,
            "room_id": event.room_id,
        }))?;
        let _ = self.tx.send(Outbound::Notification {
            recipient: recipient.to_owned(),
            json,
        });

        tracing::debug!(recipient, kind = event.kind.as_str(), room = %event.room_id, "notification dispatched");
        Ok(())
    }
}

/// Notifies every current participant of `room`, one dispatch per
/// recipient. A failed dispatch is logged and skipped; the remaining
/// participants are still notified.
pub async fn notify_participants(
    notifier: &dyn Notifier,
    room: &Room,
    kind: RoomEventKind,
    sender: &str,
) {
    tracing::info!(room = %room.id, kind = kind.as_str(), count = room.participants.len(), "notifying participants");

    for participant in &room.participants {
        let event = RoomEvent {
            sender: sender.to_owned(),
            kind,
            room_id: room.id.clone(),
        };
        if let Err(err) = notifier.notify(participant, event).await {
            tracing::warn!(room = %room.id, user = %participant, "notification failed: {err:#}");
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub kind: String,
    pub room_id: String,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_notifications(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT id, recipient, sender, kind, room_id, is_read, created_at
         FROM notifications WHERE recipient=? ORDER BY created_at DESC",
    )
    .bind(&user_id)
    .fetch_all(&db_pool)
    .await?;
    Ok(Json(notifications))
}

#[debug_handler(state = AppState)]
pub(crate) async fn mark_as_read(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    Path(notification_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let updated = sqlx::query("UPDATE notifications SET is_read=1 WHERE id=? AND recipient=?")
        .bind(&notification_id)
        .bind(&user_id)
        .execute(&db_pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Notification not found."));
    }
    Ok(Json(json!({ "message": "Notification marked as read." })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn mark_all_as_read(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let updated = sqlx::query("UPDATE notifications SET is_read=1 WHERE recipient=? AND is_read=0")
        .bind(&user_id)
        .execute(&db_pool)
        .await?;
    Ok(Json(json!({ "updated": updated.rows_affected() })))
}
