use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ebt_booking::{Booking, CancellationOutcome, PaymentIntentIssued};
use ebt_core::Actor;
use tracing::info;
use uuid::Uuid;

use crate::dto::{CreateBookingRequest, GuestPaymentIntentRequest, HotelCancellationRequest, PaymentIntentRequest};
use crate::error::AppError;
use crate::state::AppState;

/// POST /v1/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let input = req.into_new_booking()?;
    let booking = state.engine.create(input, &actor).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.get(id).await?;
    if !actor.is_admin() && !booking.is_owned_by(&actor.id) {
        return Err(AppError::AuthorizationError("booking belongs to another customer".to_string()));
    }
    Ok(Json(booking))
}

/// POST /v1/bookings/{id}/payment-intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentIssued>, AppError> {
    let issued = state.engine.issue_payment_intent(id, &actor, req.voucher_code).await?;
    info!(
        "Payment intent {} issued for booking {}",
        issued.payment_intent_id.as_deref().unwrap_or("-"),
        issued.booking.reference
    );
    Ok(Json(issued))
}

/// POST /v1/guest/bookings/{reference}/payment-intent
pub async fn create_guest_payment_intent(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(req): Json<GuestPaymentIntentRequest>,
) -> Result<Json<PaymentIntentIssued>, AppError> {
    let issued = state
        .engine
        .issue_guest_payment_intent(&reference, &req.email, req.voucher_code)
        .await?;
    Ok(Json(issued))
}

/// POST /v1/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<CancellationOutcome>), AppError> {
    let outcome = state.engine.cancel(id, &actor).await?;
    Ok((outcome_status(&outcome), Json(outcome)))
}

/// POST /v1/bookings/{id}/hotel-cancellation
pub async fn request_hotel_cancellation(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<HotelCancellationRequest>,
) -> Result<(StatusCode, Json<CancellationOutcome>), AppError> {
    let outcome = state.engine.request_hotel_cancellation(id, &actor, req.reason).await?;
    Ok((outcome_status(&outcome), Json(outcome)))
}

fn outcome_status(outcome: &CancellationOutcome) -> StatusCode {
    match outcome {
        CancellationOutcome::Cancelled { .. } => StatusCode::OK,
        CancellationOutcome::Requested { .. } => StatusCode::ACCEPTED,
    }
}
