use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Query, State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;

use crate::appresult::AppResult;
use crate::auth::TokenKeys;
use crate::notify::Outbound;
use crate::profanity::ProfanityFilter;
use crate::users;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: String,
}

/// What a connected client may send: join/leave a room's live feed, or
/// post a chat message into a joined room. Chat is broadcast only, it is
/// not persisted.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Join { room_id: String },
    Leave { room_id: String },
    Message { room_id: String, content: String },
}

/// Browsers cannot set headers on WebSocket upgrades, so the bearer token
/// rides in the query string instead.
#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(db_pool): State<SqlitePool>,
    State(tx): State<broadcast::Sender<Outbound>>,
    State(keys): State<TokenKeys>,
    State(profanity): State<Arc<ProfanityFilter>>,
    Query(WsQuery { token }): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = keys.verify(&token)?;

    let display_name = users::fetch_user(&db_pool, &user_id)
        .await?
        .map(|u| u.display_name)
        .unwrap_or_else(|| "Anonymous".to_owned());

    tracing::debug!(user = %user_id, "websocket connected");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, display_name, tx, profanity)))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: String,
    display_name: String,
    tx: broadcast::Sender<Outbound>,
    profanity: Arc<ProfanityFilter>,
) {
    let mut rx = tx.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let mut joined: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else { break };
                let Ok(client_msg) = serde_json::from_slice::<ClientMessage>(&msg.into_data()) else {
                    continue;
                };

                match client_msg {
                    ClientMessage::Join { room_id } => {
                        joined.insert(room_id);
                    }
                    ClientMessage::Leave { room_id } => {
                        joined.remove(&room_id);
                    }
                    ClientMessage::Message { room_id, content } => {
                        if !joined.contains(&room_id) {
                            continue;
                        }
                        let _ = tx.send(chat_frame(
                            &profanity,
                            room_id,
                            &user_id,
                            &display_name,
                            &content,
                        ));
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Ok(Outbound::Notification { recipient, json }) if recipient == user_id => {
                        if sender.send(json.into()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Outbound::RoomMessage { room_id, json }) if joined.contains(&room_id) => {
                        if sender.send(json.into()).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user = %user_id, skipped, "websocket fell behind the broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(user = %user_id, "websocket disconnected");
}

fn chat_frame(
    profanity: &ProfanityFilter,
    room_id: String,
    user_id: &str,
    display_name: &str,
    content: &str,
) -> Outbound {
    let matched = profanity.detect(content);
    let filtered = !matched.is_empty();
    let filtered_reason =
        filtered.then(|| format!("Inappropriate content: {}", matched.join(", ")));

    let payload = json!({
        "room_id": room_id,
        "sender": user_id,
        "sender_name": display_name,
        "content": profanity.clean(content),
        "filtered": filtered,
        "filtered_reason": filtered_reason,
        "sent_at": OffsetDateTime::now_utc().format(&Rfc3339).ok(),
    });

    Outbound::RoomMessage {
        room_id,
        json: payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_frame_cleans_and_flags() {
        let filter = ProfanityFilter::new();
        let frame = chat_frame(&filter, "room-1".to_owned(), "u1", "Quick Fox", "what the hell");
        let Outbound::RoomMessage { room_id, json } = frame else {
            panic!("expected a room message");
        };
        assert_eq!(room_id, "room-1");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["content"], "what the ****");
        assert_eq!(value["filtered"], true);
        assert!(value["filtered_reason"].as_str().unwrap().contains("hell"));
    }

    #[test]
    fn clean_messages_pass_through() {
        let filter = ProfanityFilter::new();
        let frame = chat_frame(&filter, "room-1".to_owned(), "u1", "Quick Fox", "hello there");
        let Outbound::RoomMessage { json, .. } = frame else {
            panic!("expected a room message");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["content"], "hello there");
        assert_eq!(value["filtered"], false);
        assert!(value["filtered_reason"].is_null());
    }

    #[test]
    fn client_messages_parse() {
        let join: ClientMessage =
            serde_json::from_str(r#"{"action":"join","room_id":"r1"}"#).unwrap();
        assert!(matches!(join, ClientMessage::Join { room_id } if room_id == "r1"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"message","room_id":"r1","content":"hi"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Message { content, .. } if content == "hi"));
    }
}
