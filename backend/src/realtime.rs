//! Real-time delivery. Each conversation id maps to a broadcast channel in
//! a shared hub; connected sockets subscribe on upgrade. Inbound chat
//! messages are persisted first and broadcast only after the insert
//! succeeds; typing indicators are fan-out only.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use chrono::NaiveDateTime;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::conversation;
use crate::db;
use crate::error::ApiError;
use crate::events::{self, DomainEvent};
use crate::message;
use crate::models::Message;
use crate::moderation;
use crate::AppState;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct MessageBroadcast {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

impl From<&Message> for MessageBroadcast {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            message_type: message.message_type.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    ChatMessage { message: MessageBroadcast },
    TypingIndicator { user_id: Uuid, is_typing: bool },
}

/// Per-conversation fan-out channels, created lazily on first use.
pub struct Hub {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ChatEvent>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, conversation_id: Uuid) -> broadcast::Receiver<ChatEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Best-effort: a conversation nobody is listening to is not an error.
    pub async fn publish(&self, conversation_id: Uuid, event: ChatEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&conversation_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops a conversation's channel once its last receiver is gone.
    /// Sockets call this on teardown; subscribe re-creates the channel if
    /// the conversation is opened again.
    pub async fn release(&self, conversation_id: Uuid) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&conversation_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&conversation_id);
            }
        }
    }

    #[cfg(test)]
    async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn publish_message(&self, message: &Message) {
        self.publish(
            message.conversation_id,
            ChatEvent::ChatMessage {
                message: MessageBroadcast::from(message),
            },
        )
        .await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    ChatMessage {
        content: String,
    },
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
}

#[derive(Deserialize)]
pub struct WsAuth {
    pub token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the bearer
/// token rides in the query string and the participant check runs before
/// the upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = match auth::resolve_user(&state, &params.token) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    let mut conn = match db::establish_connection(&state.config.database_url) {
        Ok(conn) => conn,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = conversation::require_participant(&mut conn, conversation_id, user.id) {
        return err.into_response();
    }
    info!("ws connect: user {} conversation {}", user.id, conversation_id);
    ws.on_upgrade(move |socket| handle_socket(state, conversation_id, user.id, socket))
}

async fn handle_socket(state: AppState, conversation_id: Uuid, user_id: Uuid, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.hub.subscribe(conversation_id).await;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(err) = handle_client_frame(&state, conversation_id, user_id, &text).await {
                            // The failure stays with this socket; nothing
                            // was broadcast.
                            let _ = send_error(&mut sender, &err.to_string()).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        // Typing echoes are suppressed for their author.
                        if let ChatEvent::TypingIndicator { user_id: typist, .. } = &event {
                            if *typist == user_id {
                                continue;
                            }
                        }
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("ws receiver lagged, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    drop(rx);
    state.hub.release(conversation_id).await;
    info!("ws disconnect: user {user_id} conversation {conversation_id}");
}

async fn handle_client_frame(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
    text: &str,
) -> Result<(), ApiError> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|_| ApiError::Validation("unsupported frame".to_string()))?;
    match frame {
        ClientFrame::ChatMessage { content } => {
            if content.trim().is_empty() {
                return Err(ApiError::Validation("message content is required".to_string()));
            }
            let conn = &mut db::establish_connection(&state.config.database_url)?;
            for other in conversation::other_participants(conn, conversation_id, user_id)? {
                if moderation::is_blocked(conn, user_id, other)? {
                    return Err(ApiError::Forbidden(
                        "messaging is unavailable for this user".to_string(),
                    ));
                }
            }
            // Persistence is authoritative; the broadcast happens only
            // after the row exists.
            let stored = message::store_message(
                conn,
                conversation_id,
                user_id,
                "text",
                content.trim(),
                None,
                None,
            )?;
            state.hub.publish_message(&stored).await;
            events::emit(
                &state.events,
                DomainEvent::MessagePosted {
                    conversation_id,
                    message_id: stored.id,
                    sender_id: user_id,
                },
            );
            Ok(())
        }
        ClientFrame::Typing { is_typing } => {
            state
                .hub
                .publish(conversation_id, ChatEvent::TypingIndicator { user_id, is_typing })
                .await;
            Ok(())
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &ChatEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            // Skip the frame rather than deliver an empty one.
            warn!("dropping unserializable event: {err}");
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(text)).await
}

async fn send_error(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    message: &str,
) -> Result<(), axum::Error> {
    let frame = json!({ "type": "error", "payload": { "message": message } });
    sender.send(WsMessage::Text(frame.to_string())).await
}
