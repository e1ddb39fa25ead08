use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_core::CoreResult;
use uuid::Uuid;

use crate::models::{Booking, CancellationRequest};

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Fails with `Conflict` when the reference is already taken.
    async fn insert(&self, booking: &Booking) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn find_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>>;

    async fn find_by_payment_reference(&self, payment_reference: &str) -> CoreResult<Option<Booking>>;

    /// Write `booking` if the stored version still equals `booking.version`.
    ///
    /// Returns the stored row with the bumped version; a stale version is a
    /// `Conflict` and nothing is written.
    async fn update(&self, booking: &Booking) -> CoreResult<Booking>;

    /// Paid bookings without a provider order, created before `older_than`.
    async fn list_unfulfilled_paid(&self, older_than: DateTime<Utc>) -> CoreResult<Vec<Booking>>;
}

/// Result of an insert-if-absent on the pending request slot of a booking.
#[derive(Debug, Clone)]
pub enum PendingInsert {
    Created(CancellationRequest),
    Existing(CancellationRequest),
}

impl PendingInsert {
    pub fn into_inner(self) -> CancellationRequest {
        match self {
            PendingInsert::Created(r) | PendingInsert::Existing(r) => r,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, PendingInsert::Created(_))
    }
}

#[async_trait]
pub trait CancellationRequestRepository: Send + Sync {
    /// Atomically insert unless the booking already has a PENDING request.
    async fn insert_pending(&self, request: &CancellationRequest) -> CoreResult<PendingInsert>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<CancellationRequest>>;

    async fn find_pending_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<CancellationRequest>>;

    /// Same optimistic-version contract as [`BookingRepository::update`].
    async fn update(&self, request: &CancellationRequest) -> CoreResult<CancellationRequest>;

    /// Oldest first.
    async fn list_pending(&self) -> CoreResult<Vec<CancellationRequest>>;
}
