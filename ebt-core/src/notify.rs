use async_trait::async_trait;
use ebt_shared::BookingEvent;

use crate::UpstreamError;

/// Outbound channel for booking events (emails, bus consumers).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &BookingEvent) -> Result<(), UpstreamError>;
}

/// Writes events to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: &BookingEvent) -> Result<(), UpstreamError> {
        tracing::info!("Booking event {} for booking {}", event.topic(), event.booking_id());
        Ok(())
    }
}

/// Publishes and swallows failures; notifications never fail a money movement.
pub async fn publish_best_effort(notifier: &dyn Notifier, event: BookingEvent) {
    if let Err(e) = notifier.publish(&event).await {
        tracing::warn!(
            "Failed to publish {} for booking {}: {}",
            event.topic(),
            event.booking_id(),
            ebt_shared::redact_text(&e.to_string())
        );
    }
}
