//! Domain events emitted for downstream consumers (sales ledger,
//! notifications). Delivery is best-effort over a process-wide broadcast
//! channel; a missing subscriber is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    MessagePosted {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
    },
    OfferCreated {
        conversation_id: Uuid,
        offer_id: Uuid,
        offerer_id: Uuid,
        recipient_id: Uuid,
        offered_price: i64,
    },
    OfferAccepted {
        conversation_id: Uuid,
        offer_id: Uuid,
    },
    OfferDeclined {
        conversation_id: Uuid,
        offer_id: Uuid,
    },
    OfferCountered {
        conversation_id: Uuid,
        offer_id: Uuid,
        counter_offer_id: Uuid,
    },
}

pub fn channel() -> broadcast::Sender<DomainEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

pub fn emit(sender: &broadcast::Sender<DomainEvent>, event: DomainEvent) {
    debug!("domain event: {event:?}");
    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let sender = channel();
        let mut rx = sender.subscribe();
        let conversation_id = Uuid::new_v4();
        let offer_id = Uuid::new_v4();
        emit(
            &sender,
            DomainEvent::OfferAccepted {
                conversation_id,
                offer_id,
            },
        );
        match rx.recv().await.unwrap() {
            DomainEvent::OfferAccepted {
                conversation_id: c,
                offer_id: o,
            } => {
                assert_eq!(c, conversation_id);
                assert_eq!(o, offer_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let sender = channel();
        emit(
            &sender,
            DomainEvent::MessagePosted {
                conversation_id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
                sender_id: Uuid::new_v4(),
            },
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(DomainEvent::OfferDeclined {
            conversation_id: Uuid::nil(),
            offer_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["event"], "offer_declined");
    }
}
