use chrono::Utc;
use ebt_core::notify::{publish_best_effort, Notifier};
use ebt_core::supplier::InventoryRouter;
use ebt_core::{Actor, CoreError, CoreResult};
use ebt_shared::redact_text;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events;
use crate::models::{Booking, BookingStatus, CancellationRequest, CancellationRequestStatus, RefundStatus};
use crate::repository::{BookingRepository, CancellationRequestRepository, PendingInsert};
use crate::settlement::SettlementGateway;

pub const REVIEW_SLA_MESSAGE: &str =
    "Your cancellation request has been received and will be reviewed within 3-5 business days.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationAction {
    Reject,
    PartialRefund,
    FullRefund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub action: CancellationAction,
    pub refund_amount: Option<Decimal>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub request: CancellationRequest,
    pub booking: Booking,
}

/// Admin-processed queue of post-deadline cancellations.
pub struct CancellationQueue {
    bookings: Arc<dyn BookingRepository>,
    requests: Arc<dyn CancellationRequestRepository>,
    inventory: InventoryRouter,
    settlement: SettlementGateway,
    notifier: Arc<dyn Notifier>,
}

impl CancellationQueue {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        requests: Arc<dyn CancellationRequestRepository>,
        inventory: InventoryRouter,
        settlement: SettlementGateway,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { bookings, requests, inventory, settlement, notifier }
    }

    /// Returns the existing PENDING request instead of creating a second one.
    pub async fn enqueue(
        &self,
        booking: &Booking,
        requested_by: &str,
        reason: Option<String>,
    ) -> CoreResult<PendingInsert> {
        let outcome = self
            .requests
            .insert_pending(&CancellationRequest::new(booking.id, requested_by, reason))
            .await?;

        match &outcome {
            PendingInsert::Created(request) => {
                info!("Cancellation request {} queued for booking {}", request.id, booking.reference);
                publish_best_effort(self.notifier.as_ref(), events::cancellation_requested(request, booking)).await;
            }
            PendingInsert::Existing(request) => {
                info!(
                    "Booking {} already has pending cancellation request {}",
                    booking.reference, request.id
                );
            }
        }
        Ok(outcome)
    }

    pub async fn list_pending(&self, actor: &Actor) -> CoreResult<Vec<CancellationRequest>> {
        require_admin(actor)?;
        self.requests.list_pending().await
    }

    pub async fn process_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
        decision: ProcessRequest,
    ) -> CoreResult<ProcessOutcome> {
        require_admin(actor)?;

        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("cancellation request", request_id))?;
        if !request.is_pending() {
            return Err(CoreError::InvalidState(format!(
                "cancellation request {} was already {}",
                request.id,
                request.status.as_str()
            )));
        }
        let booking = self
            .bookings
            .get(request.booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", request.booking_id))?;

        match decision.action {
            CancellationAction::Reject => self.reject(request, booking, actor, decision).await,
            CancellationAction::PartialRefund => {
                let amount = decision
                    .refund_amount
                    .filter(|a| *a > Decimal::ZERO)
                    .ok_or_else(|| {
                        CoreError::Validation("partial refund requires a positive refund amount".to_string())
                    })?;
                let charged = self.settlement.charged_amount(&booking);
                if amount > charged {
                    return Err(CoreError::Validation(format!(
                        "refund amount {} exceeds the charged amount {}",
                        amount, charged
                    )));
                }
                self.approve(request, booking, actor, amount, decision.admin_notes).await
            }
            CancellationAction::FullRefund => {
                let amount = self.settlement.full_refund_amount(&booking);
                self.approve(request, booking, actor, amount, decision.admin_notes).await
            }
        }
    }

    async fn reject(
        &self,
        mut request: CancellationRequest,
        booking: Booking,
        actor: &Actor,
        decision: ProcessRequest,
    ) -> CoreResult<ProcessOutcome> {
        let reason = decision
            .rejection_reason
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| CoreError::Validation("rejection requires a rejection reason".to_string()))?;

        request.status = CancellationRequestStatus::Rejected;
        request.rejection_reason = Some(reason);
        request.admin_notes = decision.admin_notes;
        request.processed_at = Some(Utc::now());
        request.processed_by = Some(actor.id.clone());
        let request = self.requests.update(&request).await?;

        info!("Cancellation request {} rejected by {}", request.id, actor.id);
        publish_best_effort(self.notifier.as_ref(), events::cancellation_decided(&request, &booking)).await;
        Ok(ProcessOutcome { request, booking })
    }

    async fn approve(
        &self,
        request: CancellationRequest,
        mut booking: Booking,
        actor: &Actor,
        refund_amount: Decimal,
        admin_notes: Option<String>,
    ) -> CoreResult<ProcessOutcome> {
        if booking.status != BookingStatus::Confirmed {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {} and cannot be cancelled",
                booking.reference, booking.status
            )));
        }

        // Provider first; a failure here leaves request and booking untouched.
        if let Some(provider_booking_id) = booking.provider_booking_id.as_deref() {
            let adapter = self.inventory.get(booking.provider)?;
            adapter.cancel_order(provider_booking_id).await.map_err(|e| {
                warn!(
                    "Provider cancellation failed for booking {}: {}",
                    booking.reference,
                    redact_text(&e.message)
                );
                CoreError::upstream("inventory provider", e)
            })?;
        }

        // Claim the request before money moves so a racing admin cannot refund twice.
        let mut claimed = request;
        claimed.status = CancellationRequestStatus::Approved;
        claimed.processed_at = Some(Utc::now());
        claimed.processed_by = Some(actor.id.clone());
        claimed.admin_notes = admin_notes;
        claimed.refund_amount = Some(refund_amount);
        claimed.refund_status = Some(RefundStatus::Pending);
        let mut claimed = self.requests.update(&claimed).await?;

        let refund_status = if refund_amount.is_zero() {
            RefundStatus::Completed
        } else {
            match self.settlement.refund(&booking, refund_amount).await {
                Ok(refund) => {
                    info!("Refund {} issued for booking {}", refund.id, booking.reference);
                    RefundStatus::Completed
                }
                Err(e) => {
                    error!(
                        "Refund of {} {} for booking {} failed, manual follow-up required: {}",
                        refund_amount,
                        booking.currency,
                        booking.reference,
                        redact_text(&e.to_string())
                    );
                    RefundStatus::Processing
                }
            }
        };

        booking.transition(BookingStatus::Cancelled)?;
        booking.cancelled_at = Some(Utc::now());
        booking.cancelled_by = Some(actor.id.clone());
        booking.refund_amount = Some(refund_amount);
        booking.refund_status = Some(refund_status);
        claimed.refund_status = Some(refund_status);
        let booking = match self.bookings.update(&booking).await {
            Ok(booking) => booking,
            Err(e) => {
                error!(
                    "Cancellation request {} approved with refund {} but booking {} could not be saved, manual follow-up required: {}",
                    claimed.id,
                    refund_status.as_str(),
                    booking.reference,
                    e
                );
                if let Err(record_err) = self.requests.update(&claimed).await {
                    warn!(
                        "Could not record refund status on cancellation request {}: {}",
                        claimed.id, record_err
                    );
                }
                return Err(e);
            }
        };
        let request = self.requests.update(&claimed).await?;

        info!(
            "Cancellation request {} approved by {}: booking {} cancelled, refund {} {}",
            request.id, actor.id, booking.reference, refund_amount, booking.currency
        );
        publish_best_effort(self.notifier.as_ref(), events::cancellation_decided(&request, &booking)).await;
        publish_best_effort(self.notifier.as_ref(), events::cancelled(&booking)).await;
        Ok(ProcessOutcome { request, booking })
    }
}

pub(crate) fn require_admin(actor: &Actor) -> CoreResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CoreError::Forbidden("admin role required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBookingRepository, InMemoryCancellationRequests};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use crate::models::fixtures::confirmed_hotel;
    use crate::settlement::ChargingStrategy;
    use ebt_core::notify::LogNotifier;
    use ebt_core::payment::MockPaymentProcessor;
    use ebt_core::supplier::MockInventoryProvider;
    use ebt_shared::Provider;
    use rust_decimal_macros::dec;

    struct Harness {
        queue: CancellationQueue,
        bookings: Arc<InMemoryBookingRepository>,
        processor: Arc<MockPaymentProcessor>,
        provider: Arc<MockInventoryProvider>,
    }

    async fn harness(booking: &Booking) -> Harness {
        let bookings = Arc::new(InMemoryBookingRepository::new());
        bookings.insert(booking).await.unwrap();
        let processor = Arc::new(MockPaymentProcessor::new());
        let provider = Arc::new(MockInventoryProvider::new(Provider::Amadeus));
        let queue = CancellationQueue::new(
            bookings.clone(),
            Arc::new(InMemoryCancellationRequests::new()),
            InventoryRouter::new().with_provider(Provider::Amadeus, provider.clone()),
            SettlementGateway::new(processor.clone(), ChargingStrategy::GuestCard),
            Arc::new(LogNotifier),
        );
        Harness { queue, bookings, processor, provider }
    }

    fn decision(action: CancellationAction) -> ProcessRequest {
        ProcessRequest { action, refund_amount: None, admin_notes: None, rejection_reason: None }
    }

    #[tokio::test]
    async fn test_reject_requires_reason_and_leaves_booking() {
        let booking = confirmed_hotel();
        let h = harness(&booking).await;
        let request = h.queue.enqueue(&booking, "user-1", None).await.unwrap().into_inner();
        let admin = Actor::admin("admin-1");

        let err = h
            .queue
            .process_request(request.id, &admin, decision(CancellationAction::Reject))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let mut reject = decision(CancellationAction::Reject);
        reject.rejection_reason = Some("non-refundable rate".to_string());
        let outcome = h.queue.process_request(request.id, &admin, reject).await.unwrap();
        assert_eq!(outcome.request.status, CancellationRequestStatus::Rejected);
        let stored = h.bookings.get(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert!(h.processor.refunds().await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_refund_validation() {
        let booking = confirmed_hotel();
        let h = harness(&booking).await;
        let request = h.queue.enqueue(&booking, "user-1", None).await.unwrap().into_inner();
        let admin = Actor::admin("admin-1");

        let mut partial = decision(CancellationAction::PartialRefund);
        partial.refund_amount = Some(dec!(-5));
        assert!(h.queue.process_request(request.id, &admin, partial.clone()).await.is_err());

        // Guest-card booking only charged its 50 margin.
        partial.refund_amount = Some(dec!(60));
        assert!(h.queue.process_request(request.id, &admin, partial.clone()).await.is_err());

        partial.refund_amount = Some(dec!(20));
        let outcome = h.queue.process_request(request.id, &admin, partial).await.unwrap();
        assert_eq!(outcome.booking.refund_amount, Some(dec!(20)));
        assert_eq!(h.processor.refunds().await[0].amount_minor, 2000);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_approval() {
        let booking = confirmed_hotel();
        let h = harness(&booking).await;
        let request = h.queue.enqueue(&booking, "user-1", None).await.unwrap().into_inner();
        h.provider.fail_cancel(true);

        let err = h
            .queue
            .process_request(request.id, &Actor::admin("admin-1"), decision(CancellationAction::FullRefund))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Upstream { .. }));
        assert!(h.processor.refunds().await.is_empty());
        let pending = h.queue.list_pending(&Actor::admin("admin-1")).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_refund_failure_still_cancels() {
        let booking = confirmed_hotel();
        let h = harness(&booking).await;
        let request = h.queue.enqueue(&booking, "user-1", None).await.unwrap().into_inner();
        h.processor.fail_refunds(true);

        let outcome = h
            .queue
            .process_request(request.id, &Actor::admin("admin-1"), decision(CancellationAction::FullRefund))
            .await
            .unwrap();
        assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
        assert_eq!(outcome.booking.refund_status, Some(RefundStatus::Processing));
        assert_eq!(outcome.request.status, CancellationRequestStatus::Approved);
    }

    /// Reads pass through; every booking write loses the version race.
    struct ContendedBookings(InMemoryBookingRepository);

    #[async_trait]
    impl BookingRepository for ContendedBookings {
        async fn insert(&self, booking: &Booking) -> CoreResult<()> {
            self.0.insert(booking).await
        }

        async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
            self.0.get(id).await
        }

        async fn find_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>> {
            self.0.find_by_reference(reference).await
        }

        async fn find_by_payment_reference(&self, payment_reference: &str) -> CoreResult<Option<Booking>> {
            self.0.find_by_payment_reference(payment_reference).await
        }

        async fn update(&self, booking: &Booking) -> CoreResult<Booking> {
            Err(CoreError::Conflict(format!("booking {} was modified concurrently", booking.reference)))
        }

        async fn list_unfulfilled_paid(&self, older_than: DateTime<Utc>) -> CoreResult<Vec<Booking>> {
            self.0.list_unfulfilled_paid(older_than).await
        }
    }

    #[tokio::test]
    async fn test_unsaved_booking_after_refund_keeps_refund_on_request() {
        let booking = confirmed_hotel();
        let inner = InMemoryBookingRepository::new();
        inner.insert(&booking).await.unwrap();
        let bookings = Arc::new(ContendedBookings(inner));
        let processor = Arc::new(MockPaymentProcessor::new());
        let queue = CancellationQueue::new(
            bookings.clone(),
            Arc::new(InMemoryCancellationRequests::new()),
            InventoryRouter::new()
                .with_provider(Provider::Amadeus, Arc::new(MockInventoryProvider::new(Provider::Amadeus))),
            SettlementGateway::new(processor.clone(), ChargingStrategy::GuestCard),
            Arc::new(LogNotifier),
        );
        let request = queue.enqueue(&booking, "user-1", None).await.unwrap().into_inner();

        let err = queue
            .process_request(request.id, &Actor::admin("admin-1"), decision(CancellationAction::FullRefund))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(processor.refunds().await.len(), 1);

        let stored = queue.requests.get(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CancellationRequestStatus::Approved);
        assert_eq!(stored.refund_status, Some(RefundStatus::Completed));
        let unchanged = bookings.get(booking.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_non_admin_is_forbidden() {
        let booking = confirmed_hotel();
        let h = harness(&booking).await;
        let err = h.queue.list_pending(&Actor::customer("user-1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
