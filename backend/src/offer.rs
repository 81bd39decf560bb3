//! Price-offer endpoints. Decisions come from the negotiation core; this
//! module owns the storage side: snapshot loading, the guarded update that
//! resolves races between concurrent responders, and the successor row a
//! counter produces.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::conversation;
use crate::db;
use crate::error::ApiError;
use crate::events::{self, DomainEvent};
use crate::message;
use crate::models::{Listing, PriceOffer};
use crate::negotiation::{self, CounterOfferIntent, OfferSnapshot, OfferStatus};
use crate::schema::{listings, price_offers};
use crate::AppState;

pub fn format_price(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

fn to_snapshot(offer: &PriceOffer) -> Result<OfferSnapshot, ApiError> {
    let status = OfferStatus::parse(&offer.status).ok_or_else(|| {
        ApiError::Internal(format!("offer {} has unknown status '{}'", offer.id, offer.status))
    })?;
    Ok(OfferSnapshot {
        id: offer.id,
        offerer_id: offer.offerer_id,
        recipient_id: offer.recipient_id,
        offered_price: offer.offered_price,
        original_price: offer.original_price,
        status,
        expires_at: offer.expires_at,
    })
}

#[derive(Serialize)]
pub struct OfferView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub listing_id: Uuid,
    pub message_id: Uuid,
    pub offerer_id: Uuid,
    pub recipient_id: Uuid,
    pub offered_price: i64,
    pub original_price: i64,
    pub status: String,
    pub expires_at: NaiveDateTime,
    pub response_message: String,
    pub responded_at: Option<NaiveDateTime>,
    pub counter_offer_id: Option<Uuid>,
    pub is_expired: bool,
    pub discount_percentage: f64,
    pub created_at: NaiveDateTime,
}

impl OfferView {
    fn from_row(offer: &PriceOffer, now: NaiveDateTime) -> Self {
        Self {
            id: offer.id,
            conversation_id: offer.conversation_id,
            listing_id: offer.listing_id,
            message_id: offer.message_id,
            offerer_id: offer.offerer_id,
            recipient_id: offer.recipient_id,
            offered_price: offer.offered_price,
            original_price: offer.original_price,
            status: offer.status.clone(),
            expires_at: offer.expires_at,
            response_message: offer.response_message.clone(),
            responded_at: offer.responded_at,
            counter_offer_id: offer.counter_offer_id,
            is_expired: now > offer.expires_at,
            discount_percentage: negotiation::discount_percentage(
                offer.original_price,
                offer.offered_price,
            ),
            created_at: offer.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateOfferRequest {
    pub offered_price: i64, // cents
}

pub async fn create_offer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<CreateOfferRequest>,
) -> Result<Json<OfferView>, ApiError> {
    if !user.is_verified {
        return Err(ApiError::Forbidden(
            "only verified accounts may make offers".to_string(),
        ));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let conversation = conversation::require_participant(conn, conversation_id, user.id)?;
    let listing_id = conversation.listing_id.ok_or_else(|| {
        ApiError::Validation("this conversation has no associated listing".to_string())
    })?;
    let listing: Listing = listings::table
        .filter(listings::id.eq(listing_id))
        .first(conn)
        .map_err(|_| ApiError::NotFound("listing not found".to_string()))?;
    if listing.seller_id == user.id {
        return Err(ApiError::Validation(
            "you cannot make an offer on your own listing".to_string(),
        ));
    }
    // Creation is the only point the price rule is enforced; the listing
    // price is snapshotted and never re-read.
    negotiation::validate_new_offer(req.offered_price, listing.price)?;

    // The announcement message and the offer row land together or not at
    // all; an offer message with no offer behind it must never survive.
    let now = Utc::now().naive_utc();
    let (offer_message, offer) = conn.transaction::<_, ApiError, _>(|conn| {
        let offer_message = message::store_message(
            conn,
            conversation_id,
            user.id,
            "offer",
            &format!("Price offer: {}", format_price(req.offered_price)),
            None,
            None,
        )?;
        let offer = PriceOffer {
            id: Uuid::new_v4(),
            conversation_id,
            listing_id: listing.id,
            message_id: offer_message.id,
            offerer_id: user.id,
            recipient_id: listing.seller_id,
            offered_price: req.offered_price,
            original_price: listing.price,
            status: OfferStatus::Pending.as_str().to_string(),
            expires_at: negotiation::offer_expiry(now),
            response_message: String::new(),
            responded_at: None,
            counter_offer_id: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(price_offers::table)
            .values(&offer)
            .execute(conn)?;
        Ok((offer_message, offer))
    })?;
    info!("offer {} created on listing {}", offer.id, listing.id);

    state.hub.publish_message(&offer_message).await;
    events::emit(
        &state.events,
        DomainEvent::OfferCreated {
            conversation_id,
            offer_id: offer.id,
            offerer_id: offer.offerer_id,
            recipient_id: offer.recipient_id,
            offered_price: offer.offered_price,
        },
    );
    Ok(Json(OfferView::from_row(&offer, now)))
}

pub async fn list_offers(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<OfferView>>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    conversation::require_participant(conn, conversation_id, user.id)?;
    let now = Utc::now().naive_utc();
    let rows: Vec<PriceOffer> = price_offers::table
        .filter(price_offers::conversation_id.eq(conversation_id))
        .order(price_offers::created_at.desc())
        .load(conn)?;
    Ok(Json(rows.iter().map(|row| OfferView::from_row(row, now)).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferAction {
    Accept,
    Decline,
    Counter,
}

#[derive(Deserialize)]
pub struct RespondOfferRequest {
    pub action: OfferAction,
    pub response_message: Option<String>,
    pub counter_price: Option<i64>, // cents
}

/// Applies an accept/decline/counter decision. The update is guarded on
/// `status = 'pending'`: zero rows affected means a concurrent responder
/// won and this request fails with a state conflict. Callers run this
/// inside a transaction with the follow-up writes so a later failure
/// rolls the resolution back too.
fn apply_resolution(
    conn: &mut PgConnection,
    offer_id: Uuid,
    resolution: &negotiation::OfferResolution,
) -> Result<(), ApiError> {
    let updated = diesel::update(
        price_offers::table
            .filter(price_offers::id.eq(offer_id))
            .filter(price_offers::status.eq(OfferStatus::Pending.as_str())),
    )
    .set((
        price_offers::status.eq(resolution.status.as_str()),
        price_offers::response_message.eq(&resolution.response_message),
        price_offers::responded_at.eq(resolution.responded_at),
        price_offers::updated_at.eq(resolution.responded_at),
    ))
    .execute(conn)?;
    if updated == 0 {
        return Err(ApiError::Conflict(
            "this offer has already been responded to".to_string(),
        ));
    }
    Ok(())
}

/// Builds the pending successor row a counter produces. The successor
/// points back at the offer it answers through `counter_offer_id`.
fn counter_successor(
    original: &PriceOffer,
    intent: &CounterOfferIntent,
    message_id: Uuid,
    now: NaiveDateTime,
) -> PriceOffer {
    PriceOffer {
        id: Uuid::new_v4(),
        conversation_id: original.conversation_id,
        listing_id: original.listing_id,
        message_id,
        offerer_id: intent.offerer_id,
        recipient_id: intent.recipient_id,
        offered_price: intent.offered_price,
        original_price: intent.original_price,
        status: OfferStatus::Pending.as_str().to_string(),
        expires_at: intent.expires_at,
        response_message: String::new(),
        responded_at: None,
        counter_offer_id: Some(intent.counters),
        created_at: now,
        updated_at: now,
    }
}

pub async fn respond_offer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(offer_id): Path<Uuid>,
    Json(req): Json<RespondOfferRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    // Visible only to the two parties; everyone else sees "not found".
    let offer: PriceOffer = price_offers::table
        .filter(price_offers::id.eq(offer_id))
        .filter(
            price_offers::offerer_id
                .eq(user.id)
                .or(price_offers::recipient_id.eq(user.id)),
        )
        .first(conn)
        .map_err(|_| ApiError::NotFound("offer not found".to_string()))?;
    let snapshot = to_snapshot(&offer)?;
    let now = Utc::now().naive_utc();

    let counter_view = match req.action {
        OfferAction::Accept => {
            let resolution = negotiation::accept(&snapshot, user.id, req.response_message, now)?;
            let note = conn.transaction::<_, ApiError, _>(|conn| {
                apply_resolution(conn, offer.id, &resolution)?;
                message::store_message(
                    conn,
                    offer.conversation_id,
                    user.id,
                    "system",
                    &format!("Offer of {} accepted", format_price(offer.offered_price)),
                    None,
                    None,
                )
            })?;
            state.hub.publish_message(&note).await;
            events::emit(
                &state.events,
                DomainEvent::OfferAccepted {
                    conversation_id: offer.conversation_id,
                    offer_id: offer.id,
                },
            );
            None
        }
        OfferAction::Decline => {
            let resolution = negotiation::decline(&snapshot, user.id, req.response_message, now)?;
            let note = conn.transaction::<_, ApiError, _>(|conn| {
                apply_resolution(conn, offer.id, &resolution)?;
                message::store_message(
                    conn,
                    offer.conversation_id,
                    user.id,
                    "system",
                    &format!("Offer of {} declined", format_price(offer.offered_price)),
                    None,
                    None,
                )
            })?;
            state.hub.publish_message(&note).await;
            events::emit(
                &state.events,
                DomainEvent::OfferDeclined {
                    conversation_id: offer.conversation_id,
                    offer_id: offer.id,
                },
            );
            None
        }
        OfferAction::Counter => {
            let counter_price = req.counter_price.ok_or_else(|| {
                ApiError::Validation("counter_price is required for a counter".to_string())
            })?;
            let (resolution, intent) =
                negotiation::counter(&snapshot, user.id, counter_price, req.response_message, now)?;
            // Resolving the original, announcing the counter, and creating
            // the successor are one atomic step; a countered offer without
            // its successor must never be observable.
            let (counter_message, successor) = conn.transaction::<_, ApiError, _>(|conn| {
                apply_resolution(conn, offer.id, &resolution)?;
                let counter_message = message::store_message(
                    conn,
                    offer.conversation_id,
                    user.id,
                    "offer",
                    &format!("Counter offer: {}", format_price(intent.offered_price)),
                    None,
                    None,
                )?;
                let successor = counter_successor(&offer, &intent, counter_message.id, now);
                diesel::insert_into(price_offers::table)
                    .values(&successor)
                    .execute(conn)?;
                Ok((counter_message, successor))
            })?;
            info!("offer {} countered by {}", offer.id, successor.id);

            state.hub.publish_message(&counter_message).await;
            events::emit(
                &state.events,
                DomainEvent::OfferCountered {
                    conversation_id: offer.conversation_id,
                    offer_id: offer.id,
                    counter_offer_id: successor.id,
                },
            );
            Some(OfferView::from_row(&successor, now))
        }
    };

    let refreshed: PriceOffer = price_offers::table
        .filter(price_offers::id.eq(offer.id))
        .first(conn)?;
    Ok(Json(json!({
        "offer": OfferView::from_row(&refreshed, now),
        "counter_offer": counter_view,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_formatting() {
        assert_eq!(format_price(10_000), "$100.00");
        assert_eq!(format_price(9_050), "$90.50");
        assert_eq!(format_price(5), "$0.05");
    }

    #[test]
    fn snapshot_rejects_unknown_status() {
        let now = Utc::now().naive_utc();
        let offer = PriceOffer {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            offerer_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            offered_price: 8_000,
            original_price: 10_000,
            status: "haggling".to_string(),
            expires_at: now,
            response_message: String::new(),
            responded_at: None,
            counter_offer_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(to_snapshot(&offer).is_err());
    }

    #[test]
    fn counter_builds_a_pending_successor_linked_to_the_original() {
        let now = Utc::now().naive_utc();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let original = PriceOffer {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            offerer_id: buyer,
            recipient_id: seller,
            offered_price: 8_000,
            original_price: 10_000,
            status: "pending".to_string(),
            expires_at: now + chrono::Duration::days(1),
            response_message: String::new(),
            responded_at: None,
            counter_offer_id: None,
            created_at: now,
            updated_at: now,
        };
        let snapshot = to_snapshot(&original).unwrap();
        let (_, intent) = negotiation::counter(&snapshot, seller, 9_000, None, now).unwrap();

        let message_id = Uuid::new_v4();
        let successor = counter_successor(&original, &intent, message_id, now);
        assert_eq!(successor.counter_offer_id, Some(original.id));
        assert_eq!(successor.status, "pending");
        assert_eq!(successor.offerer_id, seller);
        assert_eq!(successor.recipient_id, buyer);
        assert_eq!(successor.offered_price, 9_000);
        assert_eq!(successor.conversation_id, original.conversation_id);
        assert_eq!(successor.listing_id, original.listing_id);
        assert_eq!(successor.message_id, message_id);
        assert_ne!(successor.id, original.id);
    }

    #[test]
    fn view_derives_expiry_and_discount() {
        let now = Utc::now().naive_utc();
        let offer = PriceOffer {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            offerer_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            offered_price: 8_000,
            original_price: 10_000,
            status: "pending".to_string(),
            expires_at: now - chrono::Duration::hours(1),
            response_message: String::new(),
            responded_at: None,
            counter_offer_id: None,
            created_at: now,
            updated_at: now,
        };
        let view = OfferView::from_row(&offer, now);
        assert!(view.is_expired);
        assert_eq!(view.discount_percentage, 20.0);
    }
}
