//! In-process repositories for the development binary and tests.
//!
//! A single write lock per table makes check-and-write atomic, matching the
//! guarantees the Postgres adapters get from conditional updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_core::{CoreError, CoreResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Booking, CancellationRequest, CancellationRequestStatus, PaymentStatus, BookingStatus};
use crate::repository::{BookingRepository, CancellationRequestRepository, PendingInsert};

#[derive(Default)]
pub struct InMemoryBookingRepository {
    rows: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|b| b.reference == booking.reference) {
            return Err(CoreError::Conflict(format!("reference {} already exists", booking.reference)));
        }
        rows.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>> {
        Ok(self.rows.read().await.values().find(|b| b.reference == reference).cloned())
    }

    async fn find_by_payment_reference(&self, payment_reference: &str) -> CoreResult<Option<Booking>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|b| b.payment_reference.as_deref() == Some(payment_reference))
            .cloned())
    }

    async fn update(&self, booking: &Booking) -> CoreResult<Booking> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get_mut(&booking.id)
            .ok_or_else(|| CoreError::not_found("booking", booking.id))?;
        if stored.version != booking.version {
            return Err(CoreError::Conflict(format!(
                "booking {} was modified concurrently",
                booking.reference
            )));
        }
        let mut next = booking.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_unfulfilled_paid(&self, older_than: DateTime<Utc>) -> CoreResult<Vec<Booking>> {
        let rows = self.rows.read().await;
        let mut stuck: Vec<Booking> = rows
            .values()
            .filter(|b| {
                b.payment_status == PaymentStatus::Completed
                    && b.provider_booking_id.is_none()
                    && b.status != BookingStatus::Cancelled
                    && b.created_at < older_than
            })
            .cloned()
            .collect();
        stuck.sort_by_key(|b| b.created_at);
        Ok(stuck)
    }
}

#[derive(Default)]
pub struct InMemoryCancellationRequests {
    rows: RwLock<HashMap<Uuid, CancellationRequest>>,
}

impl InMemoryCancellationRequests {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CancellationRequestRepository for InMemoryCancellationRequests {
    async fn insert_pending(&self, request: &CancellationRequest) -> CoreResult<PendingInsert> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows
            .values()
            .find(|r| r.booking_id == request.booking_id && r.status == CancellationRequestStatus::Pending)
        {
            return Ok(PendingInsert::Existing(existing.clone()));
        }
        rows.insert(request.id, request.clone());
        Ok(PendingInsert::Created(request.clone()))
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<CancellationRequest>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_pending_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<CancellationRequest>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.booking_id == booking_id && r.is_pending())
            .cloned())
    }

    async fn update(&self, request: &CancellationRequest) -> CoreResult<CancellationRequest> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get_mut(&request.id)
            .ok_or_else(|| CoreError::not_found("cancellation request", request.id))?;
        if stored.version != request.version {
            return Err(CoreError::Conflict(format!(
                "cancellation request {} was modified concurrently",
                request.id
            )));
        }
        let mut next = request.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_pending(&self) -> CoreResult<Vec<CancellationRequest>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<CancellationRequest> = rows.values().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by_key(|r| r.requested_at);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::confirmed_hotel;

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let repo = InMemoryBookingRepository::new();
        let booking = confirmed_hotel();
        repo.insert(&booking).await.unwrap();

        let first = repo.update(&booking).await.unwrap();
        assert_eq!(first.version, 1);

        // Second writer still holds version 0.
        let err = repo.update(&booking).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(repo.update(&first).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let repo = InMemoryBookingRepository::new();
        let booking = confirmed_hotel();
        repo.insert(&booking).await.unwrap();
        let mut other = confirmed_hotel();
        other.reference = booking.reference.clone();
        assert!(matches!(repo.insert(&other).await, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_single_pending_request_per_booking() {
        let repo = InMemoryCancellationRequests::new();
        let booking_id = Uuid::new_v4();
        let first = repo
            .insert_pending(&CancellationRequest::new(booking_id, "user-1", None))
            .await
            .unwrap();
        assert!(first.was_created());

        let second = repo
            .insert_pending(&CancellationRequest::new(booking_id, "user-1", None))
            .await
            .unwrap();
        assert!(!second.was_created());
        assert_eq!(second.into_inner().id, first.into_inner().id);
        assert_eq!(repo.list_pending().await.unwrap().len(), 1);
    }
}
