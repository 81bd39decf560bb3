//! Price-offer negotiation core.
//!
//! Pure state transitions over an immutable offer snapshot. The functions
//! here decide what should happen; the HTTP layer owns persistence and
//! applies the returned resolution (and counter-offer intent) in a single
//! guarded update so that two concurrent responders cannot both win.

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

/// Offers lapse this many days after creation. Counters get a fresh window.
pub const OFFER_TTL_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Countered,
    Expired,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Declined => "declined",
            OfferStatus::Countered => "countered",
            OfferStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OfferStatus::Pending),
            "accepted" => Some(OfferStatus::Accepted),
            "declined" => Some(OfferStatus::Declined),
            "countered" => Some(OfferStatus::Countered),
            "expired" => Some(OfferStatus::Expired),
            _ => None,
        }
    }

    /// `pending` is the only state a transition may leave from.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("only the offer recipient may respond to it")]
    NotRecipient,
    #[error("this offer has already been responded to (status: {0})")]
    AlreadyResponded(&'static str),
    #[error("this offer has expired")]
    Expired,
    #[error("{0}")]
    InvalidPrice(String),
}

/// Immutable view of a stored offer, as the transition functions see it.
#[derive(Debug, Clone)]
pub struct OfferSnapshot {
    pub id: Uuid,
    pub offerer_id: Uuid,
    pub recipient_id: Uuid,
    pub offered_price: i64,
    pub original_price: i64,
    pub status: OfferStatus,
    pub expires_at: NaiveDateTime,
}

/// Fields to persist on the offer being responded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferResolution {
    pub status: OfferStatus,
    pub response_message: String,
    pub responded_at: NaiveDateTime,
}

/// Successor offer to create when a pending offer is countered: roles
/// swapped, price basis carried over, fresh expiry window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOfferIntent {
    pub offerer_id: Uuid,
    pub recipient_id: Uuid,
    pub offered_price: i64,
    pub original_price: i64,
    pub expires_at: NaiveDateTime,
    pub counters: Uuid,
}

pub fn is_expired(offer: &OfferSnapshot, now: NaiveDateTime) -> bool {
    now > offer.expires_at
}

pub fn offer_expiry(now: NaiveDateTime) -> NaiveDateTime {
    now + Duration::days(OFFER_TTL_DAYS)
}

/// Percentage below the listing price, for display only.
pub fn discount_percentage(original_price: i64, offered_price: i64) -> f64 {
    if original_price > 0 {
        (original_price - offered_price) as f64 / original_price as f64 * 100.0
    } else {
        0.0
    }
}

/// Creation-time price rule. Enforced only here: a counter is not re-checked
/// against the listing price.
pub fn validate_new_offer(offered_price: i64, original_price: i64) -> Result<(), NegotiationError> {
    if offered_price <= 0 {
        return Err(NegotiationError::InvalidPrice(
            "offer price must be greater than zero".into(),
        ));
    }
    if offered_price >= original_price {
        return Err(NegotiationError::InvalidPrice(
            "offer price must be less than the listing price".into(),
        ));
    }
    Ok(())
}

// The recipient check comes first: a non-recipient is rejected as forbidden
// even when the offer is also expired or already resolved.
fn check_response(
    offer: &OfferSnapshot,
    responder: Uuid,
    now: NaiveDateTime,
) -> Result<(), NegotiationError> {
    if responder != offer.recipient_id {
        return Err(NegotiationError::NotRecipient);
    }
    if offer.status.is_terminal() {
        return Err(NegotiationError::AlreadyResponded(offer.status.as_str()));
    }
    if is_expired(offer, now) {
        return Err(NegotiationError::Expired);
    }
    Ok(())
}

pub fn accept(
    offer: &OfferSnapshot,
    responder: Uuid,
    response_message: Option<String>,
    now: NaiveDateTime,
) -> Result<OfferResolution, NegotiationError> {
    check_response(offer, responder, now)?;
    Ok(OfferResolution {
        status: OfferStatus::Accepted,
        response_message: response_message.unwrap_or_default(),
        responded_at: now,
    })
}

pub fn decline(
    offer: &OfferSnapshot,
    responder: Uuid,
    response_message: Option<String>,
    now: NaiveDateTime,
) -> Result<OfferResolution, NegotiationError> {
    check_response(offer, responder, now)?;
    Ok(OfferResolution {
        status: OfferStatus::Declined,
        response_message: response_message.unwrap_or_default(),
        responded_at: now,
    })
}

pub fn counter(
    offer: &OfferSnapshot,
    responder: Uuid,
    new_price: i64,
    response_message: Option<String>,
    now: NaiveDateTime,
) -> Result<(OfferResolution, CounterOfferIntent), NegotiationError> {
    check_response(offer, responder, now)?;
    if new_price <= 0 {
        return Err(NegotiationError::InvalidPrice(
            "counter price must be greater than zero".into(),
        ));
    }
    let resolution = OfferResolution {
        status: OfferStatus::Countered,
        response_message: response_message.unwrap_or_default(),
        responded_at: now,
    };
    let intent = CounterOfferIntent {
        offerer_id: offer.recipient_id,
        recipient_id: offer.offerer_id,
        offered_price: new_price,
        original_price: offer.original_price,
        expires_at: offer_expiry(now),
        counters: offer.id,
    };
    Ok((resolution, intent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(status: OfferStatus, expires_at: NaiveDateTime) -> OfferSnapshot {
        OfferSnapshot {
            id: Uuid::new_v4(),
            offerer_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            offered_price: 8_000,
            original_price: 10_000,
            status,
            expires_at,
        }
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    #[test]
    fn accept_pending_offer() {
        let offer = snapshot(OfferStatus::Pending, now() + Duration::days(1));
        let at = now();
        let resolution = accept(&offer, offer.recipient_id, Some("deal".into()), at).unwrap();
        assert_eq!(resolution.status, OfferStatus::Accepted);
        assert_eq!(resolution.response_message, "deal");
        assert_eq!(resolution.responded_at, at);
    }

    #[test]
    fn decline_pending_offer() {
        let offer = snapshot(OfferStatus::Pending, now() + Duration::days(1));
        let resolution = decline(&offer, offer.recipient_id, None, now()).unwrap();
        assert_eq!(resolution.status, OfferStatus::Declined);
        assert_eq!(resolution.response_message, "");
        assert!(resolution.responded_at <= now());
    }

    #[test]
    fn non_recipient_is_forbidden() {
        let offer = snapshot(OfferStatus::Pending, now() + Duration::days(1));
        let stranger = Uuid::new_v4();
        assert_eq!(
            accept(&offer, stranger, None, now()),
            Err(NegotiationError::NotRecipient)
        );
        assert_eq!(
            decline(&offer, stranger, None, now()),
            Err(NegotiationError::NotRecipient)
        );
        assert_eq!(
            counter(&offer, stranger, 9_000, None, now()),
            Err(NegotiationError::NotRecipient)
        );
        // The offerer is not the recipient either.
        assert_eq!(
            accept(&offer, offer.offerer_id, None, now()),
            Err(NegotiationError::NotRecipient)
        );
    }

    #[test]
    fn non_recipient_rejected_even_when_expired() {
        // Forbidden takes precedence over expiry.
        let offer = snapshot(OfferStatus::Pending, now() - Duration::days(1));
        assert_eq!(
            accept(&offer, offer.offerer_id, None, now()),
            Err(NegotiationError::NotRecipient)
        );
        assert_eq!(
            accept(&offer, offer.recipient_id, None, now()),
            Err(NegotiationError::Expired)
        );
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        for status in [
            OfferStatus::Accepted,
            OfferStatus::Declined,
            OfferStatus::Countered,
            OfferStatus::Expired,
        ] {
            let offer = snapshot(status, now() + Duration::days(1));
            assert_eq!(
                accept(&offer, offer.recipient_id, None, now()),
                Err(NegotiationError::AlreadyResponded(status.as_str()))
            );
            assert_eq!(
                decline(&offer, offer.recipient_id, None, now()),
                Err(NegotiationError::AlreadyResponded(status.as_str()))
            );
            assert_eq!(
                counter(&offer, offer.recipient_id, 9_000, None, now()),
                Err(NegotiationError::AlreadyResponded(status.as_str()))
            );
        }
    }

    #[test]
    fn expired_offer_rejects_recipient_actions() {
        let offer = snapshot(OfferStatus::Pending, now() - Duration::days(1));
        assert_eq!(
            accept(&offer, offer.recipient_id, None, now()),
            Err(NegotiationError::Expired)
        );
        assert_eq!(
            counter(&offer, offer.recipient_id, 9_000, None, now()),
            Err(NegotiationError::Expired)
        );
    }

    #[test]
    fn counter_swaps_roles_and_keeps_price_basis() {
        let offer = snapshot(OfferStatus::Pending, now() + Duration::days(1));
        let at = now();
        let (resolution, intent) = counter(&offer, offer.recipient_id, 9_000, None, at).unwrap();
        assert_eq!(resolution.status, OfferStatus::Countered);
        assert_eq!(resolution.responded_at, at);
        assert_eq!(intent.offerer_id, offer.recipient_id);
        assert_eq!(intent.recipient_id, offer.offerer_id);
        assert_eq!(intent.offered_price, 9_000);
        assert_eq!(intent.original_price, offer.original_price);
        assert_eq!(intent.expires_at, at + Duration::days(OFFER_TTL_DAYS));
        assert_eq!(intent.counters, offer.id);
    }

    #[test]
    fn counter_rejects_nonpositive_price() {
        let offer = snapshot(OfferStatus::Pending, now() + Duration::days(1));
        assert!(matches!(
            counter(&offer, offer.recipient_id, 0, None, now()),
            Err(NegotiationError::InvalidPrice(_))
        ));
    }

    #[test]
    fn new_offer_price_rules() {
        assert!(validate_new_offer(8_000, 10_000).is_ok());
        assert!(matches!(
            validate_new_offer(0, 10_000),
            Err(NegotiationError::InvalidPrice(_))
        ));
        assert!(matches!(
            validate_new_offer(-1, 10_000),
            Err(NegotiationError::InvalidPrice(_))
        ));
        assert!(matches!(
            validate_new_offer(10_000, 10_000),
            Err(NegotiationError::InvalidPrice(_))
        ));
        assert!(matches!(
            validate_new_offer(10_001, 10_000),
            Err(NegotiationError::InvalidPrice(_))
        ));
    }

    #[test]
    fn discount_is_guarded_at_zero() {
        assert_eq!(discount_percentage(0, 0), 0.0);
        assert_eq!(discount_percentage(10_000, 8_000), 20.0);
        assert!((discount_percentage(9_999, 3_333) - 66.67).abs() < 0.01);
    }

    #[test]
    fn offer_scenario_eighty_on_a_hundred() {
        // O offers $80 on a $100 listing to R, then R counters at $90.
        let at = now();
        let offerer = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let offer = OfferSnapshot {
            id: Uuid::new_v4(),
            offerer_id: offerer,
            recipient_id: recipient,
            offered_price: 8_000,
            original_price: 10_000,
            status: OfferStatus::Pending,
            expires_at: offer_expiry(at),
        };
        assert_eq!(discount_percentage(offer.original_price, offer.offered_price), 20.0);

        let (resolution, intent) = counter(&offer, recipient, 9_000, None, at).unwrap();
        assert_eq!(resolution.status, OfferStatus::Countered);
        assert_eq!(intent.offerer_id, recipient);
        assert_eq!(intent.recipient_id, offerer);
        assert_eq!(intent.offered_price, 9_000);
        assert_eq!(intent.original_price, 10_000);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OfferStatus::Pending,
            OfferStatus::Accepted,
            OfferStatus::Declined,
            OfferStatus::Countered,
            OfferStatus::Expired,
        ] {
            assert_eq!(OfferStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OfferStatus::parse("rejected"), None);
    }
}
