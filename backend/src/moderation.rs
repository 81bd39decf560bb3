//! Blocking and reporting. The block check is consulted by the chat core
//! before any conversation starts or message lands.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::conversation;
use crate::db;
use crate::error::ApiError;
use crate::models::{ChatBlock, ChatReport};
use crate::schema::{chat_blocks, chat_reports, users};
use crate::AppState;

pub const REPORT_REASONS: &[&str] =
    &["spam", "harassment", "inappropriate", "scam", "fake", "other"];

pub fn validate_report_reason(reason: &str) -> Result<(), ApiError> {
    if REPORT_REASONS.contains(&reason) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("unknown report reason '{reason}'")))
    }
}

/// Symmetric: either side blocking the other suppresses contact.
pub fn is_blocked(conn: &mut PgConnection, a: Uuid, b: Uuid) -> Result<bool, ApiError> {
    let count: i64 = chat_blocks::table
        .filter(
            chat_blocks::blocker_id
                .eq(a)
                .and(chat_blocks::blocked_id.eq(b))
                .or(chat_blocks::blocker_id.eq(b).and(chat_blocks::blocked_id.eq(a))),
        )
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

#[derive(Deserialize, Default)]
pub struct BlockRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn block_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    body: Option<Json<BlockRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if user_id == user.id {
        return Err(ApiError::Validation("you cannot block yourself".to_string()));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let target: i64 = users::table
        .filter(users::id.eq(user_id))
        .count()
        .get_result(conn)?;
    if target == 0 {
        return Err(ApiError::NotFound("user not found".to_string()));
    }
    let existing: i64 = chat_blocks::table
        .filter(chat_blocks::blocker_id.eq(user.id))
        .filter(chat_blocks::blocked_id.eq(user_id))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Ok(Json(json!({ "message": "user is already blocked" })));
    }
    let block = ChatBlock {
        id: Uuid::new_v4(),
        blocker_id: user.id,
        blocked_id: user_id,
        reason: body.map(|Json(b)| b.reason).unwrap_or_default(),
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(chat_blocks::table)
        .values(&block)
        .execute(conn)?;
    Ok(Json(json!({ "message": "user blocked successfully" })))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let deleted = diesel::delete(
        chat_blocks::table
            .filter(chat_blocks::blocker_id.eq(user.id))
            .filter(chat_blocks::blocked_id.eq(user_id)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("user is not blocked".to_string()));
    }
    Ok(Json(json!({ "message": "user unblocked successfully" })))
}

#[derive(Deserialize)]
pub struct ReportRequest {
    pub reason: String,
    #[serde(default)]
    pub description: String,
    pub message_id: Option<Uuid>,
}

pub async fn report_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_report_reason(&req.reason)?;
    if user_id == user.id {
        return Err(ApiError::Validation("you cannot report yourself".to_string()));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    conversation::require_participant(conn, conversation_id, user.id)?;
    let target: i64 = users::table
        .filter(users::id.eq(user_id))
        .count()
        .get_result(conn)?;
    if target == 0 {
        return Err(ApiError::NotFound("user not found".to_string()));
    }
    let report = ChatReport {
        id: Uuid::new_v4(),
        reporter_id: user.id,
        reported_user_id: user_id,
        conversation_id,
        message_id: req.message_id,
        reason: req.reason,
        description: req.description,
        is_resolved: false,
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(chat_reports::table)
        .values(&report)
        .execute(conn)?;
    Ok(Json(json!({ "message": "report submitted", "report_id": report.id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reasons() {
        for reason in REPORT_REASONS {
            assert!(validate_report_reason(reason).is_ok());
        }
        assert!(validate_report_reason("vibes").is_err());
    }
}
