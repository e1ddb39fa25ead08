use chrono::Utc;
use ebt_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, CancellationDecidedEvent, CancellationRequestedEvent,
    ReconciliationRequiredEvent,
};
use ebt_shared::BookingEvent;

use crate::models::{Booking, CancellationRequest, CancellationRequestStatus};

pub fn confirmed(booking: &Booking) -> BookingEvent {
    BookingEvent::BookingConfirmed(BookingConfirmedEvent {
        booking_id: booking.id,
        reference: booking.reference.clone(),
        contact_email: booking.contact_email.clone(),
        provider_booking_id: booking.provider_booking_id.clone().unwrap_or_default(),
        final_amount: booking.final_amount,
        currency: booking.currency.clone(),
        timestamp: Utc::now().timestamp(),
    })
}

pub fn cancelled(booking: &Booking) -> BookingEvent {
    BookingEvent::BookingCancelled(BookingCancelledEvent {
        booking_id: booking.id,
        reference: booking.reference.clone(),
        contact_email: booking.contact_email.clone(),
        cancelled_by: booking.cancelled_by.clone().unwrap_or_default(),
        refund_amount: booking.refund_amount.unwrap_or_default(),
        currency: booking.currency.clone(),
        refund_status: booking
            .refund_status
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        timestamp: Utc::now().timestamp(),
    })
}

pub fn cancellation_requested(request: &CancellationRequest, booking: &Booking) -> BookingEvent {
    BookingEvent::CancellationRequested(CancellationRequestedEvent {
        request_id: request.id,
        booking_id: booking.id,
        reference: booking.reference.clone(),
        contact_email: booking.contact_email.clone(),
        requested_by: request.requested_by.clone(),
        timestamp: Utc::now().timestamp(),
    })
}

pub fn cancellation_decided(request: &CancellationRequest, booking: &Booking) -> BookingEvent {
    BookingEvent::CancellationDecided(CancellationDecidedEvent {
        request_id: request.id,
        booking_id: booking.id,
        reference: booking.reference.clone(),
        contact_email: booking.contact_email.clone(),
        approved: request.status == CancellationRequestStatus::Approved,
        refund_amount: request.refund_amount,
        currency: booking.currency.clone(),
        rejection_reason: request.rejection_reason.clone(),
        processed_by: request.processed_by.clone().unwrap_or_default(),
        timestamp: Utc::now().timestamp(),
    })
}

pub fn reconciliation_required(booking: &Booking, reason: &str) -> BookingEvent {
    BookingEvent::ReconciliationRequired(ReconciliationRequiredEvent {
        booking_id: booking.id,
        reference: booking.reference.clone(),
        payment_reference: booking.payment_reference.clone(),
        reason: ebt_shared::redact_text(reason),
        timestamp: Utc::now().timestamp(),
    })
}
