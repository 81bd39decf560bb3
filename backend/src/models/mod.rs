use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_verified: bool,
    pub is_banned: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::listings)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub price: i64, // cents
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub listing_id: Option<Uuid>,
    pub title: String,
    pub is_active: bool,
    pub is_archived: bool,
    pub last_message: String,
    pub last_message_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::conversation_participants)]
pub struct ConversationParticipant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::messages)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub is_edited: bool,
    pub edited_at: Option<NaiveDateTime>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::price_offers)]
pub struct PriceOffer {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub listing_id: Uuid,
    pub message_id: Uuid,
    pub offerer_id: Uuid,
    pub recipient_id: Uuid,
    pub offered_price: i64,
    pub original_price: i64, // listing price snapshot at offer time
    pub status: String,
    pub expires_at: NaiveDateTime,
    pub response_message: String,
    pub responded_at: Option<NaiveDateTime>,
    pub counter_offer_id: Option<Uuid>, // set on a counter, pointing at the offer it answers
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::chat_blocks)]
pub struct ChatBlock {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub reason: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::schema::chat_reports)]
pub struct ChatReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: String,
    pub description: String,
    pub is_resolved: bool,
    pub created_at: NaiveDateTime,
}
