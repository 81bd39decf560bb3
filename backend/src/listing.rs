//! Minimal listing catalog surface. The chat core only needs a listing's
//! price and seller; offers snapshot the price at creation time.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;
use crate::models::Listing;
use crate::schema::listings;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    pub price: i64, // cents
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<Listing>, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }
    if req.price <= 0 {
        return Err(ApiError::Validation("price must be greater than zero".to_string()));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let now = Utc::now().naive_utc();
    let listing = Listing {
        id: Uuid::new_v4(),
        seller_id: user.id,
        title: req.title.trim().to_string(),
        price: req.price,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(listings::table)
        .values(&listing)
        .execute(conn)?;
    info!("listing {} created by {}", listing.id, user.id);
    Ok(Json(listing))
}

pub async fn list_listings(
    State(state): State<AppState>,
) -> Result<Json<Vec<Listing>>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let rows: Vec<Listing> = listings::table
        .filter(listings::is_active.eq(true))
        .order(listings::created_at.desc())
        .load(conn)?;
    Ok(Json(rows))
}
