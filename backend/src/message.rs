//! Message posting and retrieval inside a conversation.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::conversation;
use crate::db;
use crate::error::ApiError;
use crate::events::{self, DomainEvent};
use crate::models::Message;
use crate::moderation;
use crate::schema::{conversations, messages};
use crate::AppState;

/// Types a client may send directly. `system` and `offer` messages are
/// created by the service itself.
pub fn validate_client_message_type(message_type: &str) -> Result<(), ApiError> {
    match message_type {
        "text" | "image" | "file" => Ok(()),
        "system" | "offer" => Err(ApiError::Validation(format!(
            "message type '{message_type}' is reserved"
        ))),
        other => Err(ApiError::Validation(format!(
            "unknown message type '{other}'"
        ))),
    }
}

/// Persists a message and refreshes the conversation's last-message cache.
/// Conversation and sender are fixed at insert and never change.
pub fn store_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    sender_id: Uuid,
    message_type: &str,
    content: &str,
    attachment_url: Option<String>,
    attachment_name: Option<String>,
) -> Result<Message, ApiError> {
    let now = Utc::now().naive_utc();
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        message_type: message_type.to_string(),
        content: content.to_string(),
        attachment_url,
        attachment_name,
        is_read: false,
        read_at: None,
        is_edited: false,
        edited_at: None,
        metadata: None,
        created_at: now,
    };
    diesel::insert_into(messages::table)
        .values(&message)
        .execute(conn)?;
    diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
        .set((
            conversations::last_message.eq(&message.content),
            conversations::last_message_at.eq(now),
            conversations::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(message)
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
}

fn default_message_type() -> String {
    "text".to_string()
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    validate_client_message_type(&req.message_type)?;
    if req.content.trim().is_empty() && req.attachment_url.is_none() {
        return Err(ApiError::Validation(
            "message content or attachment is required".to_string(),
        ));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    conversation::require_participant(conn, conversation_id, user.id)?;
    for other in conversation::other_participants(conn, conversation_id, user.id)? {
        if moderation::is_blocked(conn, user.id, other)? {
            return Err(ApiError::Forbidden(
                "messaging is unavailable for this user".to_string(),
            ));
        }
    }

    let message = store_message(
        conn,
        conversation_id,
        user.id,
        &req.message_type,
        req.content.trim(),
        req.attachment_url,
        req.attachment_name,
    )?;
    state.hub.publish_message(&message).await;
    events::emit(
        &state.events,
        DomainEvent::MessagePosted {
            conversation_id,
            message_id: message.id,
            sender_id: user.id,
        },
    );
    Ok(Json(message))
}

/// Returns the thread oldest-first. Fetching a thread also marks the other
/// side's messages read, mirroring the read-on-open behavior of the client.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    conversation::require_participant(conn, conversation_id, user.id)?;
    let now = Utc::now().naive_utc();
    let mut rows: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order(messages::created_at.asc())
        .load(conn)?;
    if conversation::read_receipt(&mut rows, user.id, now) > 0 {
        conversation::mark_conversation_read(conn, conversation_id, user.id, now)?;
    }
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_types() {
        assert!(validate_client_message_type("text").is_ok());
        assert!(validate_client_message_type("image").is_ok());
        assert!(validate_client_message_type("file").is_ok());
        assert!(validate_client_message_type("system").is_err());
        assert!(validate_client_message_type("offer").is_err());
        assert!(validate_client_message_type("video").is_err());
    }
}
