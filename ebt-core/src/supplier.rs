use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_shared::pii::last_four;
use ebt_shared::{ProductType, Provider};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{CoreError, CoreResult, UpstreamError};

/// Raw card details. Debug output never shows the number or security code.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDetails {
    pub holder_name: String,
    pub number: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub cvv: Option<String>,
}

impl CardDetails {
    pub fn last4(&self) -> String {
        last_four(&self.number)
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("holder_name", &self.holder_name)
            .field("last4", &self.last4())
            .finish_non_exhaustive()
    }
}

/// How the provider order is paid for.
#[derive(Debug, Clone)]
pub enum OrderPayment {
    /// The customer's own card, charged by the provider.
    GuestCard(CardDetails),
    /// The operator's card, used in the merchant model.
    AgencyCard(CardDetails),
    /// Operator's pre-funded balance at the provider.
    Balance { amount: Decimal, currency: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub product_type: ProductType,
    pub origin: Option<String>,
    pub destination: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub adults: u32,
}

impl SearchCriteria {
    /// Stable key for caching search results.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.product_type,
            self.origin.as_deref().unwrap_or("-"),
            self.destination,
            self.start_date,
            self.end_date.as_deref().unwrap_or("-"),
            self.adults
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOffer {
    pub offer_id: String,
    pub provider: Provider,
    pub product_type: ProductType,
    pub price: Decimal,
    pub currency: String,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub offer_id: String,
    pub guests: Value,
    pub payment: OrderPayment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub order_id: String,
    /// Stored verbatim on the booking.
    pub data: Value,
}

#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn search_offers(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<ProviderOffer>, UpstreamError>;

    async fn create_order(&self, request: OrderRequest) -> Result<ProviderOrder, UpstreamError>;

    async fn cancel_order(&self, provider_booking_id: &str) -> Result<Value, UpstreamError>;
}

/// Routes calls to the adapter registered for a booking's provider.
#[derive(Clone, Default)]
pub struct InventoryRouter {
    providers: HashMap<Provider, Arc<dyn InventoryProvider>>,
}

impl InventoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Provider, adapter: Arc<dyn InventoryProvider>) -> Self {
        self.providers.insert(provider, adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> CoreResult<Arc<dyn InventoryProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| CoreError::Configuration(format!("no inventory adapter for {}", provider)))
    }

    pub fn providers(&self) -> impl Iterator<Item = (&Provider, &Arc<dyn InventoryProvider>)> {
        self.providers.iter()
    }
}

/// In-process provider used by the development binary and the test suites.
pub struct MockInventoryProvider {
    provider: Provider,
    offers: Vec<ProviderOffer>,
    fail_create: AtomicBool,
    fail_cancel: AtomicBool,
    transient_search_failures: AtomicUsize,
    order_delay_ms: AtomicU64,
    counter: AtomicUsize,
    orders: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    order_payments: Mutex<Vec<String>>,
}

impl MockInventoryProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            offers: Vec::new(),
            fail_create: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            transient_search_failures: AtomicUsize::new(0),
            order_delay_ms: AtomicU64::new(0),
            counter: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            order_payments: Mutex::new(Vec::new()),
        }
    }

    pub fn with_offers(mut self, offers: Vec<ProviderOffer>) -> Self {
        self.offers = offers;
        self
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// The next `count` searches fail with a retryable error.
    pub fn fail_next_searches(&self, count: usize) {
        self.transient_search_failures.store(count, Ordering::SeqCst);
    }

    /// Simulates a slow provider: every order creation waits this long first.
    pub fn delay_orders(&self, delay: Duration) {
        self.order_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn created_orders(&self) -> Vec<String> {
        self.orders.lock().await.clone()
    }

    pub async fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.lock().await.clone()
    }

    /// Payment kinds used for each created order ("GUEST_CARD:1111", "AGENCY_CARD:4242", "BALANCE").
    pub async fn order_payments(&self) -> Vec<String> {
        self.order_payments.lock().await.clone()
    }
}

#[async_trait]
impl InventoryProvider for MockInventoryProvider {
    async fn search_offers(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<ProviderOffer>, UpstreamError> {
        let remaining = self.transient_search_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_search_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(UpstreamError::timeout("Simulated provider timeout"));
        }
        Ok(self
            .offers
            .iter()
            .filter(|o| o.product_type == criteria.product_type)
            .cloned()
            .collect())
    }

    async fn create_order(&self, request: OrderRequest) -> Result<ProviderOrder, UpstreamError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(UpstreamError::server(500, "Simulated order creation failure"));
        }
        let delay = self.order_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("{}-ORD-{}", self.provider, n);
        let payment = match &request.payment {
            OrderPayment::GuestCard(card) => format!("GUEST_CARD:{}", card.last4()),
            OrderPayment::AgencyCard(card) => format!("AGENCY_CARD:{}", card.last4()),
            OrderPayment::Balance { .. } => "BALANCE".to_string(),
        };
        self.orders.lock().await.push(order_id.clone());
        self.order_payments.lock().await.push(payment);
        Ok(ProviderOrder {
            order_id: order_id.clone(),
            data: serde_json::json!({
                "id": order_id,
                "offer_id": request.offer_id,
                "status": "CONFIRMED",
            }),
        })
    }

    async fn cancel_order(&self, provider_booking_id: &str) -> Result<Value, UpstreamError> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(UpstreamError::rejected("Simulated cancellation refusal"));
        }
        self.cancelled.lock().await.push(provider_booking_id.to_string());
        Ok(serde_json::json!({ "id": provider_booking_id, "status": "CANCELLED" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> CardDetails {
        CardDetails {
            holder_name: "Ada Lovelace".to_string(),
            number: "4111111111111111".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            cvv: Some("123".to_string()),
        }
    }

    #[test]
    fn test_card_debug_is_masked() {
        let debug = format!("{:?}", card());
        assert!(!debug.contains("4111111111111111"));
        assert!(!debug.contains("123\""));
        assert!(debug.contains("1111"));
    }

    #[tokio::test]
    async fn test_router_resolves_registered_provider() {
        let router = InventoryRouter::new()
            .with_provider(Provider::Amadeus, Arc::new(MockInventoryProvider::new(Provider::Amadeus)));
        assert!(router.get(Provider::Amadeus).is_ok());
        assert!(matches!(router.get(Provider::Duffel), Err(CoreError::Configuration(_))));
    }
}
