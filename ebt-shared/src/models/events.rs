use rust_decimal::Decimal;
use uuid::Uuid;

pub const TOPIC_BOOKING_CONFIRMED: &str = "booking.confirmed";
pub const TOPIC_BOOKING_CANCELLED: &str = "booking.cancelled";
pub const TOPIC_CANCELLATION_REQUESTED: &str = "booking.cancellation_requested";
pub const TOPIC_CANCELLATION_DECIDED: &str = "booking.cancellation_decided";
pub const TOPIC_RECONCILIATION_REQUIRED: &str = "booking.reconciliation_required";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub reference: String,
    pub contact_email: String,
    pub provider_booking_id: String,
    pub final_amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub reference: String,
    pub contact_email: String,
    pub cancelled_by: String,
    pub refund_amount: Decimal,
    pub currency: String,
    pub refund_status: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CancellationRequestedEvent {
    pub request_id: Uuid,
    pub booking_id: Uuid,
    pub reference: String,
    pub contact_email: String,
    pub requested_by: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CancellationDecidedEvent {
    pub request_id: Uuid,
    pub booking_id: Uuid,
    pub reference: String,
    pub contact_email: String,
    pub approved: bool,
    pub refund_amount: Option<Decimal>,
    pub currency: String,
    pub rejection_reason: Option<String>,
    pub processed_by: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReconciliationRequiredEvent {
    pub booking_id: Uuid,
    pub reference: String,
    pub payment_reference: Option<String>,
    pub reason: String,
    pub timestamp: i64,
}

/// Everything the booking core announces to the outside world.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    BookingConfirmed(BookingConfirmedEvent),
    BookingCancelled(BookingCancelledEvent),
    CancellationRequested(CancellationRequestedEvent),
    CancellationDecided(CancellationDecidedEvent),
    ReconciliationRequired(ReconciliationRequiredEvent),
}

impl BookingEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            BookingEvent::BookingConfirmed(_) => TOPIC_BOOKING_CONFIRMED,
            BookingEvent::BookingCancelled(_) => TOPIC_BOOKING_CANCELLED,
            BookingEvent::CancellationRequested(_) => TOPIC_CANCELLATION_REQUESTED,
            BookingEvent::CancellationDecided(_) => TOPIC_CANCELLATION_DECIDED,
            BookingEvent::ReconciliationRequired(_) => TOPIC_RECONCILIATION_REQUIRED,
        }
    }

    pub fn booking_id(&self) -> Uuid {
        match self {
            BookingEvent::BookingConfirmed(e) => e.booking_id,
            BookingEvent::BookingCancelled(e) => e.booking_id,
            BookingEvent::CancellationRequested(e) => e.booking_id,
            BookingEvent::CancellationDecided(e) => e.booking_id,
            BookingEvent::ReconciliationRequired(e) => e.booking_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_with_type() {
        let event = BookingEvent::ReconciliationRequired(ReconciliationRequiredEvent {
            booking_id: Uuid::new_v4(),
            reference: "EBT-20250101-000001".to_string(),
            payment_reference: Some("pi_1".to_string()),
            reason: "provider order failed".to_string(),
            timestamp: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RECONCILIATION_REQUIRED");
        assert_eq!(event.topic(), TOPIC_RECONCILIATION_REQUIRED);
    }
}
