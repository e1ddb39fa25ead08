use chrono::{DateTime, Utc};
use ebt_core::payment::ChargeType;
use ebt_core::supplier::CardDetails;
use ebt_core::{CoreError, CoreResult};
use ebt_shared::{ProductType, Provider};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use ebt_catalog::currency::round_amount;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    PaymentPending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::PaymentPending => "PAYMENT_PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(BookingStatus::Pending),
            "PAYMENT_PENDING" => Some(BookingStatus::PaymentPending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, PaymentPending)
                | (PaymentPending, PaymentPending)
                | (PaymentPending, Confirmed)
                | (PaymentPending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "PROCESSING" => Some(PaymentStatus::Processing),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// `Processing` means the refund still needs manual follow-up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Completed => "COMPLETED",
            RefundStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RefundStatus::Pending),
            "PROCESSING" => Some(RefundStatus::Processing),
            "COMPLETED" => Some(RefundStatus::Completed),
            "FAILED" => Some(RefundStatus::Failed),
            _ => None,
        }
    }
}

/// Human-readable booking reference: `EBT-YYYYMMDD-NNNNNN`.
pub fn generate_reference(now: DateTime<Utc>) -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("EBT-{}-{:06}", now.format("%Y%m%d"), n)
}

pub fn is_valid_reference(reference: &str) -> bool {
    let mut parts = reference.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("EBT"), Some(date), Some(seq), None) => {
            date.len() == 8
                && seq.len() == 6
                && date.bytes().all(|b| b.is_ascii_digit())
                && seq.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// Canonical driver details for car rentals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverDetails {
    pub first_name: String,
    pub last_name: String,
    pub license_number: String,
    pub age: Option<u8>,
}

/// Canonical input for `create`, produced by the API boundary.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub offer_id: String,
    pub provider: Provider,
    pub product_type: ProductType,
    pub provider_price: Decimal,
    pub provider_currency: String,
    pub currency: String,
    pub contact_email: String,
    pub passenger_info: Value,
    pub driver: Option<DriverDetails>,
    pub card: Option<CardDetails>,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub cancellation_policy: Value,
    pub booking_data: Value,
}

/// The central entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String,
    /// None for guest checkouts.
    pub user_id: Option<String>,
    pub contact_email: String,
    pub product_type: ProductType,
    pub provider: Provider,
    pub offer_id: String,

    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: Option<RefundStatus>,

    pub provider_price: Decimal,
    pub provider_currency: String,
    pub base_price: Decimal,
    pub markup_percentage: Decimal,
    pub markup_amount: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
    pub voucher_discount: Decimal,
    pub final_amount: Decimal,
    pub refund_amount: Option<Decimal>,
    pub currency: String,
    pub markup_config_id: Uuid,

    pub voucher_id: Option<Uuid>,
    pub voucher_code: Option<String>,

    pub charge_type: Option<ChargeType>,
    pub payment_reference: Option<String>,

    pub provider_booking_id: Option<String>,
    pub provider_data: Option<Value>,
    /// Set while one caller is placing the provider order; cleared when it finishes.
    pub fulfilment_claimed_at: Option<DateTime<Utc>>,
    pub booking_data: Value,
    pub passenger_info: Value,
    /// Vault ciphertext, cleared once the provider order exists.
    #[serde(skip_serializing)]
    pub encrypted_card: Option<String>,
    pub card_last4: Option<String>,

    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub cancellation_policy: Value,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn margin(&self) -> Decimal {
        self.markup_amount + self.service_fee
    }

    /// markup + fee, scaled by the share of the total the customer actually paid.
    pub fn prorated_margin(&self) -> Decimal {
        let margin = self.margin();
        if self.voucher_discount.is_zero() || self.total_amount.is_zero() {
            return margin;
        }
        let ratio = Decimal::ONE - self.voucher_discount / self.total_amount;
        round_amount(margin * ratio.max(Decimal::ZERO), &self.currency)
    }

    pub fn is_owned_by(&self, actor_id: &str) -> bool {
        self.user_id.as_deref() == Some(actor_id) || self.contact_email.eq_ignore_ascii_case(actor_id)
    }

    /// A missing deadline counts as passed, so cancellation goes to admin review.
    pub fn is_before_deadline(&self, now: DateTime<Utc>) -> bool {
        self.cancellation_deadline.is_some_and(|deadline| now < deadline)
    }

    /// Validate and apply a status change.
    pub fn transition(&mut self, next: BookingStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "booking {} cannot move from {} to {}",
                self.reference, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn apply_voucher(&mut self, voucher_id: Uuid, code: &str, discount: Decimal) {
        self.voucher_id = Some(voucher_id);
        self.voucher_code = Some(code.to_string());
        self.voucher_discount = discount;
        self.final_amount = self.total_amount - discount;
        self.updated_at = Utc::now();
    }

    pub fn guest_name(&self) -> Option<String> {
        let first = self
            .passenger_info
            .pointer("/0/first_name")
            .or_else(|| self.passenger_info.pointer("/first_name"))
            .and_then(Value::as_str)?;
        let last = self
            .passenger_info
            .pointer("/0/last_name")
            .or_else(|| self.passenger_info.pointer("/last_name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(format!("{} {}", first, last).trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl CancellationRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationRequestStatus::Pending => "PENDING",
            CancellationRequestStatus::Approved => "APPROVED",
            CancellationRequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(CancellationRequestStatus::Pending),
            "APPROVED" => Some(CancellationRequestStatus::Approved),
            "REJECTED" => Some(CancellationRequestStatus::Rejected),
            _ => None,
        }
    }
}

/// Post-deadline cancellation awaiting an admin decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: CancellationRequestStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub refund_status: Option<RefundStatus>,
    pub version: i64,
}

impl CancellationRequest {
    pub fn new(booking_id: Uuid, requested_by: &str, reason: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            requested_by: requested_by.to_string(),
            requested_at: Utc::now(),
            reason,
            status: CancellationRequestStatus::Pending,
            processed_at: None,
            processed_by: None,
            admin_notes: None,
            rejection_reason: None,
            refund_amount: None,
            refund_status: None,
            version: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CancellationRequestStatus::Pending
    }
}

/// Read-only projection handed over when a charge is disputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub booking_reference: String,
    pub status: BookingStatus,
    pub guest_name: Option<String>,
    pub contact_email: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_reference: Option<String>,
    pub provider_booking_id: Option<String>,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub cancellation_policy: Value,
    pub booked_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&Booking> for DisputeEvidence {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_reference: booking.reference.clone(),
            status: booking.status,
            guest_name: booking.guest_name(),
            contact_email: booking.contact_email.clone(),
            amount: booking.final_amount,
            currency: booking.currency.clone(),
            payment_reference: booking.payment_reference.clone(),
            provider_booking_id: booking.provider_booking_id.clone(),
            cancellation_deadline: booking.cancellation_deadline,
            cancellation_policy: booking.cancellation_policy.clone(),
            booked_at: booking.created_at,
            cancelled_at: booking.cancelled_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    /// Amadeus hotel: base 450, markup 40, fee 10, total 500.
    pub fn confirmed_hotel() -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            reference: generate_reference(now),
            user_id: Some("user-1".to_string()),
            contact_email: "guest@example.com".to_string(),
            product_type: ProductType::Hotel,
            provider: Provider::Amadeus,
            offer_id: "offer-1".to_string(),
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
            refund_status: None,
            provider_price: dec!(450),
            provider_currency: "EUR".to_string(),
            base_price: dec!(450),
            markup_percentage: dec!(8.89),
            markup_amount: dec!(40),
            service_fee: dec!(10),
            total_amount: dec!(500),
            voucher_discount: Decimal::ZERO,
            final_amount: dec!(500),
            refund_amount: None,
            currency: "EUR".to_string(),
            markup_config_id: Uuid::new_v4(),
            voucher_id: None,
            voucher_code: None,
            charge_type: Some(ChargeType::MarkupAndFeesOnly),
            payment_reference: Some("pi_test".to_string()),
            provider_booking_id: Some("AMADEUS-ORD-1".to_string()),
            provider_data: None,
            fulfilment_claimed_at: None,
            booking_data: Value::Null,
            passenger_info: serde_json::json!([{ "first_name": "Ada", "last_name": "Lovelace" }]),
            encrypted_card: None,
            card_last4: Some("1111".to_string()),
            cancellation_deadline: Some(now + chrono::Duration::days(3)),
            cancellation_policy: serde_json::json!({ "refundable": true }),
            cancelled_at: None,
            cancelled_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
