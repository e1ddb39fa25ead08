use chrono::{Duration, Utc};
use ebt_core::notify::{publish_best_effort, Notifier};
use ebt_core::CoreResult;
use std::sync::Arc;
use tracing::{error, info};

use crate::events;
use crate::models::Booking;
use crate::repository::BookingRepository;

/// Finds bookings that were paid but never got a provider order.
///
/// Only surfaces them; creating the order stays an explicit operator action.
pub struct ReconciliationScanner {
    bookings: Arc<dyn BookingRepository>,
    notifier: Arc<dyn Notifier>,
    stale_after: Duration,
}

impl ReconciliationScanner {
    pub fn new(bookings: Arc<dyn BookingRepository>, notifier: Arc<dyn Notifier>, stale_after: Duration) -> Self {
        Self { bookings, notifier, stale_after }
    }

    pub async fn unfulfilled(&self) -> CoreResult<Vec<Booking>> {
        self.bookings
            .list_unfulfilled_paid(Utc::now() - self.stale_after)
            .await
    }

    /// One pass: log and publish every stuck booking.
    pub async fn scan(&self) -> CoreResult<Vec<Booking>> {
        let stuck = self.unfulfilled().await?;
        if stuck.is_empty() {
            info!("Reconciliation scan: no unfulfilled paid bookings");
            return Ok(stuck);
        }
        for booking in &stuck {
            error!(
                "Booking {} paid via {} at {} has no provider order",
                booking.reference,
                booking.payment_reference.as_deref().unwrap_or("-"),
                booking.updated_at
            );
            publish_best_effort(
                self.notifier.as_ref(),
                events::reconciliation_required(booking, "payment completed without provider order"),
            )
            .await;
        }
        Ok(stuck)
    }
}
