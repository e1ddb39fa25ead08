use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};

use crate::UpstreamError;

/// Metadata key carrying the charge type on every payment intent.
pub const CHARGE_TYPE_METADATA_KEY: &str = "charge_type";
pub const BOOKING_ID_METADATA_KEY: &str = "booking_id";
pub const BOOKING_REFERENCE_METADATA_KEY: &str = "booking_reference";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    MarkupAndFeesOnly,
    FullBookingAmount,
}

impl ChargeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::MarkupAndFeesOnly => "MARKUP_AND_FEES_ONLY",
            ChargeType::FullBookingAmount => "FULL_BOOKING_AMOUNT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MARKUP_AND_FEES_ONLY" => Some(ChargeType::MarkupAndFeesOnly),
            "FULL_BOOKING_AMOUNT" => Some(ChargeType::FullBookingAmount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    /// Already converted to the currency's smallest unit.
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String, // Processor's ID (e.g., pi_123)
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
    pub client_secret: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    RequestedByCustomer,
    Duplicate,
    Fraudulent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundRequest {
    pub payment_intent_id: String,
    pub amount_minor: i64,
    pub reason: RefundReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_intent_id: String,
    pub amount_minor: i64,
    pub status: String,
}

/// Card-payment processor capability. Calls that move money are never retried.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a payment intent with the processor
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, UpstreamError>;

    /// Refund part or all of a captured intent
    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, UpstreamError>;

    /// Void an intent that has not been paid yet.
    async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<(), UpstreamError>;
}

/// In-process processor used by the development binary and the test suites.
#[derive(Default)]
pub struct MockPaymentProcessor {
    fail_intents: AtomicBool,
    fail_refunds: AtomicBool,
    counter: AtomicUsize,
    intents: Mutex<Vec<PaymentIntentRequest>>,
    refunds: Mutex<Vec<RefundRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_intents(&self, fail: bool) {
        self.fail_intents.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub async fn intents(&self) -> Vec<PaymentIntentRequest> {
        self.intents.lock().await.clone()
    }

    pub async fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().await.clone()
    }

    pub async fn cancelled_intents(&self) -> Vec<String> {
        self.cancelled.lock().await.clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, UpstreamError> {
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(UpstreamError::network("Simulated payment processor outage"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let intent = PaymentIntent {
            id: format!("mock_pi_{}", n),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            status: PaymentIntentStatus::RequiresPaymentMethod,
            client_secret: Some(format!("mock_pi_{}_secret", n)),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };
        self.intents.lock().await.push(request);
        Ok(intent)
    }

    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, UpstreamError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(UpstreamError::server(502, "Simulated refund failure"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let refund = Refund {
            id: format!("mock_re_{}", n),
            payment_intent_id: request.payment_intent_id.clone(),
            amount_minor: request.amount_minor,
            status: "succeeded".to_string(),
        };
        self.refunds.lock().await.push(request);
        Ok(refund)
    }

    async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<(), UpstreamError> {
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(UpstreamError::network("Simulated payment processor outage"));
        }
        self.cancelled.lock().await.push(payment_intent_id.to_string());
        Ok(())
    }
}
