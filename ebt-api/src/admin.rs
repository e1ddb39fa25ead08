use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ebt_booking::{Booking, CancellationRequest, DisputeEvidence, ProcessOutcome, ProcessRequest};
use ebt_catalog::currency::is_supported;
use ebt_catalog::MarkupConfig;
use ebt_core::Actor;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::dto::ActivateMarkupRequest;
use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Cancellation queue
// ============================================================================

/// GET /v1/admin/cancellation-requests
pub async fn list_pending_cancellations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<CancellationRequest>>, AppError> {
    let pending = state.engine.cancellations().list_pending(&actor).await?;
    Ok(Json(pending))
}

/// POST /v1/admin/cancellation-requests/{id}/process
pub async fn process_cancellation(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let outcome = state.engine.cancellations().process_request(id, &actor, req).await?;
    Ok(Json(outcome))
}

// ============================================================================
// Bookings
// ============================================================================

/// GET /v1/admin/bookings/{id}/dispute-evidence
pub async fn dispute_evidence(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<DisputeEvidence>, AppError> {
    Ok(Json(state.engine.dispute_evidence(id, &actor).await?))
}

#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    pub count: usize,
    pub bookings: Vec<Booking>,
}

/// GET /v1/admin/reconciliation
pub async fn list_unfulfilled(State(state): State<AppState>) -> Result<Json<ReconciliationReport>, AppError> {
    let bookings = state.reconciliation.unfulfilled().await?;
    Ok(Json(ReconciliationReport {
        count: bookings.len(),
        bookings,
    }))
}

/// POST /v1/admin/bookings/{id}/confirm
pub async fn confirm_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.retry_fulfilment(id, &actor).await?))
}

// ============================================================================
// Markup configuration
// ============================================================================

/// POST /v1/admin/markup-configs
pub async fn activate_markup(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ActivateMarkupRequest>,
) -> Result<(StatusCode, Json<MarkupConfig>), AppError> {
    if !is_supported(&req.currency) {
        return Err(AppError::ValidationError(format!("unsupported currency {}", req.currency)));
    }
    let config = MarkupConfig::new(
        req.product_type,
        &req.currency,
        req.markup_percentage,
        req.service_fee_amount,
    )?;
    let config = state.markups.activate(config).await?;
    info!(
        "Admin {} activated markup {}% + {} for {}/{}",
        actor.id, config.markup_percentage, config.service_fee_amount, config.product_type, config.currency
    );
    Ok((StatusCode::CREATED, Json(config)))
}
