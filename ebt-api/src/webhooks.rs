use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use ebt_booking::Booking;
use ebt_core::CoreError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use ebt_booking::PaymentStatus;
use ebt_shared::redact_value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: PaymentIntentObject,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: Value,
}

/// POST /v1/webhooks/payments
///
/// A failed provider order after a successful payment is acknowledged with
/// 200: the booking is already flagged for reconciliation and a redelivery
/// must not place a second order on its own. A redelivery that arrives while
/// another delivery is still placing the order is acknowledged the same way.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(header, &body, secret, Utc::now().timestamp()) {
            warn!("Payment webhook signature verification failed");
            return Err(AppError::AuthenticationError("invalid webhook signature".to_string()));
        }
    }

    let event: PaymentWebhook = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(format!("invalid webhook payload: {}", e)))?;
    let intent = &event.data.object;
    info!(
        "Received webhook {} ({}) for intent {}",
        event.type_,
        event.id.as_deref().unwrap_or("-"),
        intent.id
    );
    debug!("Webhook intent metadata: {}", redact_value(&intent.metadata));

    let booking = match event.type_.as_str() {
        "payment_intent.succeeded" | "payment_intent.payment_failed" => locate_booking(&state, intent).await?,
        other => {
            info!("Ignoring webhook type {}", other);
            return Ok((StatusCode::OK, Json(json!({ "received": true }))));
        }
    };

    if event.type_ == "payment_intent.payment_failed" {
        state.engine.record_payment_failure(booking.id, &intent.id).await?;
        return Ok((StatusCode::OK, Json(json!({ "received": true, "status": "payment_failed" }))));
    }

    match state.engine.confirm_after_payment(booking.id, &intent.id).await {
        Ok(confirmed) => Ok((
            StatusCode::OK,
            Json(json!({ "received": true, "status": confirmed.status.as_str() })),
        )),
        Err(CoreError::Upstream { service, .. }) => {
            error!(
                "Booking {} paid but {} failed; left for reconciliation",
                booking.reference, service
            );
            Ok((
                StatusCode::OK,
                Json(json!({ "received": true, "status": "reconciliation_required" })),
            ))
        }
        Err(CoreError::Conflict(reason)) => {
            // Only acknowledge once the payment itself is on record; otherwise
            // the processor must redeliver.
            let current = state.engine.get(booking.id).await?;
            if current.payment_status != PaymentStatus::Completed {
                return Err(CoreError::Conflict(reason).into());
            }
            info!("Booking {} is already being fulfilled: {}", booking.reference, reason);
            Ok((
                StatusCode::OK,
                Json(json!({ "received": true, "status": "in_progress" })),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

async fn locate_booking(state: &AppState, intent: &PaymentIntentObject) -> Result<Booking, AppError> {
    match state.engine.find_by_payment_reference(&intent.id).await {
        Ok(booking) => Ok(booking),
        Err(CoreError::NotFound(_)) => {
            let booking_id = intent
                .metadata
                .get("booking_id")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| AppError::NotFoundError(format!("no booking for payment {}", intent.id)))?;
            Ok(state.engine.get(booking_id).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Checks a `t=<unix>,v1=<hex>` header: HMAC-SHA256 over `"{t}.{body}"`,
/// within five minutes of `now`. Any matching `v1` entry is accepted.
pub fn verify_signature(header: &str, payload: &[u8], secret: &str, now: i64) -> bool {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let Some(ts) = timestamp else {
        return false;
    };
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    signatures.into_iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(ts.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    })
}

/// Builds the header value a processor would send; used by tests and tooling.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}
