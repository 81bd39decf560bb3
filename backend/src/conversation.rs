//! Conversation lifecycle: start-or-reuse, listing, read tracking,
//! archiving, and per-user chat statistics.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;
use crate::events::{self, DomainEvent};
use crate::message;
use crate::models::{Conversation, ConversationParticipant, Listing, Message, User};
use crate::moderation;
use crate::schema::{conversation_participants, conversations, listings, messages, price_offers, users};
use crate::AppState;

const PREVIEW_LEN: usize = 100;

/// Truncated last-message text shown in conversation lists.
pub fn last_message_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_LEN {
        let truncated: String = text.chars().take(PREVIEW_LEN).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

pub fn conversation_title(listing_title: &str) -> String {
    format!("About {listing_title}")
}

/// A listing's seller cannot open a conversation about their own listing.
pub fn check_self_contact(initiator: Uuid, seller: Uuid) -> Result<(), ApiError> {
    if initiator == seller {
        return Err(ApiError::Validation(
            "you cannot message yourself about your own listing".to_string(),
        ));
    }
    Ok(())
}

/// Picks the conversation to reuse for a buyer/seller/listing triple: the
/// one both sides participate in that is tied to the listing. `None` means
/// a fresh conversation is needed.
pub fn reusable_conversation(
    mine: &[Uuid],
    theirs: &[Uuid],
    for_listing: &[Uuid],
) -> Option<Uuid> {
    mine.iter()
        .find(|id| theirs.contains(id) && for_listing.contains(id))
        .copied()
}

/// Resolves the conversation only if the caller participates in it, so an
/// unknown id and a foreign one are indistinguishable.
pub fn require_participant(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Conversation, ApiError> {
    let member: i64 = conversation_participants::table
        .filter(conversation_participants::conversation_id.eq(conversation_id))
        .filter(conversation_participants::user_id.eq(user_id))
        .count()
        .get_result(conn)?;
    if member == 0 {
        return Err(ApiError::NotFound("conversation not found".to_string()));
    }
    Ok(conversations::table
        .filter(conversations::id.eq(conversation_id))
        .first(conn)?)
}

pub fn other_participants(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<Uuid>, ApiError> {
    Ok(conversation_participants::table
        .filter(conversation_participants::conversation_id.eq(conversation_id))
        .filter(conversation_participants::user_id.ne(user_id))
        .select(conversation_participants::user_id)
        .load(conn)?)
}

pub fn unread_count(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<i64, ApiError> {
    Ok(messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .filter(messages::is_read.eq(false))
        .filter(messages::sender_id.ne(user_id))
        .count()
        .get_result(conn)?)
}

/// Flips unread messages not sent by the reader. The `is_read = false`
/// predicate makes repeat calls no-ops.
pub fn mark_conversation_read(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    reader: Uuid,
    now: NaiveDateTime,
) -> Result<usize, ApiError> {
    Ok(diesel::update(
        messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .filter(messages::is_read.eq(false))
            .filter(messages::sender_id.ne(reader)),
    )
    .set((messages::is_read.eq(true), messages::read_at.eq(now)))
    .execute(conn)?)
}

/// In-memory counterpart of `mark_conversation_read`: flips unread
/// messages not sent by the reader and returns how many changed. Rows
/// already read, or sent by the reader, are untouched, so a second pass
/// changes nothing.
pub fn read_receipt(messages: &mut [Message], reader: Uuid, now: NaiveDateTime) -> usize {
    let mut flipped = 0;
    for message in messages.iter_mut() {
        if !message.is_read && message.sender_id != reader {
            message.is_read = true;
            message.read_at = Some(now);
            flipped += 1;
        }
    }
    flipped
}

#[derive(Serialize)]
pub struct ParticipantView {
    pub id: Uuid,
    pub display_name: String,
}

#[derive(Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub listing_id: Option<Uuid>,
    pub title: String,
    pub is_active: bool,
    pub is_archived: bool,
    pub last_message_preview: String,
    pub last_message_at: Option<NaiveDateTime>,
    pub unread_count: i64,
    pub other_participant: Option<ParticipantView>,
    pub created_at: NaiveDateTime,
}

fn build_view(
    conn: &mut PgConnection,
    conversation: &Conversation,
    user_id: Uuid,
) -> Result<ConversationView, ApiError> {
    let unread = unread_count(conn, conversation.id, user_id)?;
    let others = other_participants(conn, conversation.id, user_id)?;
    // Two-party threads in practice; pick the first other member.
    let other_participant = match others.first() {
        Some(other_id) => {
            let other: User = users::table.filter(users::id.eq(other_id)).first(conn)?;
            Some(ParticipantView {
                id: other.id,
                display_name: other.display_name,
            })
        }
        None => None,
    };
    Ok(ConversationView {
        id: conversation.id,
        listing_id: conversation.listing_id,
        title: conversation.title.clone(),
        is_active: conversation.is_active,
        is_archived: conversation.is_archived,
        last_message_preview: last_message_preview(&conversation.last_message),
        last_message_at: conversation.last_message_at,
        unread_count: unread,
        other_participant,
        created_at: conversation.created_at,
    })
}

#[derive(Deserialize)]
pub struct StartConversationRequest {
    pub listing_id: Uuid,
    pub message: String,
}

pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::Validation("message is required".to_string()));
    }
    if !user.is_verified {
        return Err(ApiError::Forbidden(
            "only verified accounts may start conversations".to_string(),
        ));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;

    let listing: Listing = listings::table
        .filter(listings::id.eq(req.listing_id))
        .filter(listings::is_active.eq(true))
        .first(conn)
        .map_err(|_| ApiError::NotFound("listing not found".to_string()))?;
    check_self_contact(user.id, listing.seller_id)?;
    if moderation::is_blocked(conn, user.id, listing.seller_id)? {
        return Err(ApiError::Forbidden(
            "messaging is unavailable for this user".to_string(),
        ));
    }

    // Reuse the conversation for this (pair, listing) if one exists.
    let mine: Vec<Uuid> = conversation_participants::table
        .filter(conversation_participants::user_id.eq(user.id))
        .select(conversation_participants::conversation_id)
        .load(conn)?;
    let theirs: Vec<Uuid> = conversation_participants::table
        .filter(conversation_participants::user_id.eq(listing.seller_id))
        .select(conversation_participants::conversation_id)
        .load(conn)?;
    let for_listing: Vec<Uuid> = conversations::table
        .filter(conversations::listing_id.eq(listing.id))
        .select(conversations::id)
        .load(conn)?;
    let existing: Option<Conversation> =
        match reusable_conversation(&mine, &theirs, &for_listing) {
            Some(id) => Some(
                conversations::table
                    .filter(conversations::id.eq(id))
                    .first(conn)?,
            ),
            None => None,
        };

    let conversation = match existing {
        Some(conversation) => conversation,
        None => {
            let now = Utc::now().naive_utc();
            let conversation = Conversation {
                id: Uuid::new_v4(),
                listing_id: Some(listing.id),
                title: conversation_title(&listing.title),
                is_active: true,
                is_archived: false,
                last_message: String::new(),
                last_message_at: None,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(conversations::table)
                .values(&conversation)
                .execute(conn)?;
            let members = vec![
                ConversationParticipant {
                    conversation_id: conversation.id,
                    user_id: user.id,
                    created_at: now,
                },
                ConversationParticipant {
                    conversation_id: conversation.id,
                    user_id: listing.seller_id,
                    created_at: now,
                },
            ];
            diesel::insert_into(conversation_participants::table)
                .values(&members)
                .execute(conn)?;
            info!("created conversation {} for listing {}", conversation.id, listing.id);
            conversation
        }
    };

    let stored = message::store_message(
        conn,
        conversation.id,
        user.id,
        "text",
        req.message.trim(),
        None,
        None,
    )?;
    state.hub.publish_message(&stored).await;
    events::emit(
        &state.events,
        DomainEvent::MessagePosted {
            conversation_id: conversation.id,
            message_id: stored.id,
            sender_id: user.id,
        },
    );

    let conversation: Conversation = conversations::table
        .filter(conversations::id.eq(conversation.id))
        .first(conn)?;
    Ok(Json(build_view(conn, &conversation, user.id)?))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let mine: Vec<Uuid> = conversation_participants::table
        .filter(conversation_participants::user_id.eq(user.id))
        .select(conversation_participants::conversation_id)
        .load(conn)?;
    let rows: Vec<Conversation> = conversations::table
        .filter(conversations::id.eq_any(&mine))
        .filter(conversations::is_active.eq(true))
        .order((conversations::last_message_at.desc(), conversations::created_at.desc()))
        .load(conn)?;
    let mut views = Vec::with_capacity(rows.len());
    for conversation in &rows {
        views.push(build_view(conn, conversation, user.id)?);
    }
    Ok(Json(views))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationView>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let conversation = require_participant(conn, conversation_id, user.id)?;
    Ok(Json(build_view(conn, &conversation, user.id)?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    require_participant(conn, conversation_id, user.id)?;
    let updated = mark_conversation_read(conn, conversation_id, user.id, Utc::now().naive_utc())?;
    Ok(Json(json!({ "message": format!("{updated} messages marked as read") })))
}

pub async fn archive(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    require_participant(conn, conversation_id, user.id)?;
    diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
        .set((
            conversations::is_archived.eq(true),
            conversations::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(Json(json!({ "message": "conversation archived" })))
}

pub async fn chat_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let mine: Vec<Uuid> = conversation_participants::table
        .filter(conversation_participants::user_id.eq(user.id))
        .select(conversation_participants::conversation_id)
        .load(conn)?;
    let total_conversations = mine.len() as i64;
    let unread_messages: i64 = messages::table
        .filter(messages::conversation_id.eq_any(&mine))
        .filter(messages::is_read.eq(false))
        .filter(messages::sender_id.ne(user.id))
        .count()
        .get_result(conn)?;
    let active_offers: i64 = price_offers::table
        .filter(
            price_offers::offerer_id
                .eq(user.id)
                .or(price_offers::recipient_id.eq(user.id)),
        )
        .filter(price_offers::status.eq("pending"))
        .count()
        .get_result(conn)?;
    let blocked_users: i64 = crate::schema::chat_blocks::table
        .filter(crate::schema::chat_blocks::blocker_id.eq(user.id))
        .count()
        .get_result(conn)?;
    Ok(Json(json!({
        "total_conversations": total_conversations,
        "unread_messages": unread_messages,
        "active_offers": active_offers,
        "blocked_users": blocked_users,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_contact_is_rejected() {
        let seller = Uuid::new_v4();
        assert!(check_self_contact(seller, seller).is_err());
        assert!(check_self_contact(Uuid::new_v4(), seller).is_ok());
    }

    #[test]
    fn preview_truncates_long_messages() {
        let short = "hello";
        assert_eq!(last_message_preview(short), "hello");
        let long = "x".repeat(150);
        let preview = last_message_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_LEN + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn preview_counts_chars_not_bytes() {
        let exactly_100 = "é".repeat(100);
        assert_eq!(last_message_preview(&exactly_100), exactly_100);
    }

    #[test]
    fn titles_derive_from_listing() {
        assert_eq!(conversation_title("Vintage Camera"), "About Vintage Camera");
    }

    #[test]
    fn same_pair_and_listing_reuses_the_conversation() {
        let shared = Uuid::new_v4();
        let unrelated = Uuid::new_v4();
        let mine = vec![unrelated, shared];
        let theirs = vec![shared, Uuid::new_v4()];
        let for_listing = vec![shared];
        assert_eq!(reusable_conversation(&mine, &theirs, &for_listing), Some(shared));
        // A second start sees the same state and picks the same id.
        assert_eq!(reusable_conversation(&mine, &theirs, &for_listing), Some(shared));
    }

    #[test]
    fn a_different_listing_starts_a_fresh_conversation() {
        let shared = Uuid::new_v4();
        let other_listing_conversation = Uuid::new_v4();
        let mine = vec![shared];
        let theirs = vec![shared];
        assert_eq!(
            reusable_conversation(&mine, &theirs, &[other_listing_conversation]),
            None
        );
    }

    #[test]
    fn one_sided_conversations_are_not_reused() {
        let theirs_only = Uuid::new_v4();
        let theirs = vec![theirs_only];
        let for_listing = vec![theirs_only];
        assert_eq!(reusable_conversation(&[], &theirs, &for_listing), None);
    }

    fn unread_message(conversation_id: Uuid, sender_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            message_type: "text".to_string(),
            content: "hello".to_string(),
            attachment_url: None,
            attachment_name: None,
            is_read: false,
            read_at: None,
            is_edited: false,
            edited_at: None,
            metadata: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn read_receipt_skips_the_readers_own_messages() {
        let conversation_id = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut thread = vec![
            unread_message(conversation_id, other),
            unread_message(conversation_id, reader),
        ];
        let now = Utc::now().naive_utc();
        assert_eq!(read_receipt(&mut thread, reader, now), 1);
        assert!(thread[0].is_read);
        assert_eq!(thread[0].read_at, Some(now));
        assert!(!thread[1].is_read);
    }

    #[test]
    fn read_receipt_is_idempotent() {
        let conversation_id = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut thread = vec![
            unread_message(conversation_id, other),
            unread_message(conversation_id, other),
        ];
        let now = Utc::now().naive_utc();
        assert_eq!(read_receipt(&mut thread, reader, now), 2);
        assert_eq!(read_receipt(&mut thread, reader, now), 0);
        assert!(thread.iter().all(|m| m.is_read));
    }
}
