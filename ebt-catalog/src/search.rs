use chrono::{DateTime, Utc};
use ebt_core::retry::{retry_upstream, RetryConfig};
use ebt_core::supplier::{InventoryRouter, ProviderOffer, SearchCriteria};
use ebt_core::{CoreError, CoreResult};
use ebt_shared::{ProductType, Provider};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::pricing::{PriceBreakdown, PricingEngine};

pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(300);

/// A provider offer with the customer-facing price attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedOffer {
    pub offer_id: String,
    pub provider: Provider,
    pub product_type: ProductType,
    pub price: PriceBreakdown,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub data: Value,
}

struct CachedSearch {
    offers: Vec<PricedOffer>,
    expires_at: Instant,
}

pub struct SearchService {
    router: InventoryRouter,
    pricing: Arc<PricingEngine>,
    retry: RetryConfig,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedSearch>>,
}

impl SearchService {
    pub fn new(router: InventoryRouter, pricing: Arc<PricingEngine>) -> Self {
        Self {
            router,
            pricing,
            retry: RetryConfig::quick(),
            ttl: DEFAULT_SEARCH_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Query every registered provider and price the results in `currency`.
    ///
    /// A provider that keeps failing is skipped as long as another one answered;
    /// if all of them fail the last error is returned.
    pub async fn search(&self, criteria: &SearchCriteria, currency: &str) -> CoreResult<Vec<PricedOffer>> {
        let currency = currency.to_uppercase();
        let key = format!("{}|{}", criteria.cache_key(), currency);

        if let Some(hit) = self.cached(&key).await {
            debug!("Search cache hit for {}", key);
            return Ok(hit);
        }

        // Fails fast before any provider is contacted.
        let markup = self.pricing.active_markup(criteria.product_type, &currency).await?;

        let mut raw: Vec<ProviderOffer> = Vec::new();
        let mut last_error = None;
        let mut answered = 0usize;
        for (provider, adapter) in self.router.providers() {
            let op_name = format!("{} search", provider);
            match retry_upstream(&self.retry, &op_name, move || adapter.search_offers(criteria)).await {
                Ok(offers) => {
                    answered += 1;
                    raw.extend(offers);
                }
                Err(e) => {
                    warn!("{} search failed: {}", provider, ebt_shared::redact_text(&e.message));
                    last_error = Some(e);
                }
            }
        }
        if answered == 0 {
            if let Some(e) = last_error {
                return Err(CoreError::upstream("inventory", e));
            }
        }

        let mut priced = Vec::with_capacity(raw.len());
        for offer in raw {
            let price = self
                .pricing
                .quote_with(offer.price, &offer.currency, &currency, &markup)
                .await;
            priced.push(PricedOffer {
                offer_id: offer.offer_id,
                provider: offer.provider,
                product_type: offer.product_type,
                price,
                cancellation_deadline: offer.cancellation_deadline,
                data: offer.data,
            });
        }
        priced.sort_by(|a, b| a.price.total_amount.cmp(&b.price.total_amount));

        self.cache.write().await.insert(
            key,
            CachedSearch {
                offers: priced.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(priced)
    }

    async fn cached(&self, key: &str) -> Option<Vec<PricedOffer>> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.offers.clone())
    }

    /// Cheapest priced total for a single offer, used when a booking re-prices.
    pub fn lowest_total(offers: &[PricedOffer]) -> Option<Decimal> {
        offers.iter().map(|o| o.price.total_amount).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyConverter, InMemoryRateCache, StaticRateSource, DEFAULT_RATE_TTL};
    use crate::pricing::{InMemoryMarkupConfigs, MarkupConfig, MarkupConfigRepository};
    use ebt_core::supplier::MockInventoryProvider;
    use rust_decimal_macros::dec;

    fn offer(id: &str, price: Decimal) -> ProviderOffer {
        ProviderOffer {
            offer_id: id.to_string(),
            provider: Provider::Amadeus,
            product_type: ProductType::Hotel,
            price,
            currency: "EUR".to_string(),
            cancellation_deadline: None,
            data: serde_json::json!({ "name": id }),
        }
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            product_type: ProductType::Hotel,
            origin: None,
            destination: "PAR".to_string(),
            start_date: "2025-06-01".to_string(),
            end_date: Some("2025-06-03".to_string()),
            adults: 2,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    async fn service(provider: Arc<MockInventoryProvider>) -> SearchService {
        let converter = CurrencyConverter::new(
            Arc::new(StaticRateSource::new("EUR", HashMap::new())),
            Arc::new(InMemoryRateCache::new()),
            DEFAULT_RATE_TTL,
            dec!(0),
        )
        .unwrap();
        let markups = Arc::new(InMemoryMarkupConfigs::new());
        markups
            .activate(MarkupConfig::new(ProductType::Hotel, "EUR", dec!(10), dec!(5)).unwrap())
            .await
            .unwrap();
        let pricing = Arc::new(PricingEngine::new(Arc::new(converter), markups));
        let router = InventoryRouter::new().with_provider(Provider::Amadeus, provider);
        SearchService::new(router, pricing).with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_offers_are_priced_and_sorted() {
        let provider = Arc::new(
            MockInventoryProvider::new(Provider::Amadeus)
                .with_offers(vec![offer("b", dec!(200)), offer("a", dec!(100))]),
        );
        let service = service(provider).await;
        let offers = service.search(&criteria(), "eur").await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].offer_id, "a");
        assert_eq!(offers[0].price.total_amount, dec!(115));
        assert_eq!(SearchService::lowest_total(&offers), Some(dec!(115)));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_and_results_cached() {
        let provider = Arc::new(MockInventoryProvider::new(Provider::Amadeus).with_offers(vec![offer("a", dec!(100))]));
        provider.fail_next_searches(2);
        let service = service(provider.clone()).await;
        assert_eq!(service.search(&criteria(), "EUR").await.unwrap().len(), 1);

        // Served from cache even though the provider would fail now.
        provider.fail_next_searches(10);
        assert_eq!(service.search(&criteria(), "EUR").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_upstream_error() {
        let provider = Arc::new(MockInventoryProvider::new(Provider::Amadeus));
        provider.fail_next_searches(10);
        let service = service(provider).await;
        let err = service.search(&criteria(), "EUR").await.unwrap_err();
        assert!(matches!(err, CoreError::Upstream { service: "inventory", .. }));
    }

    #[tokio::test]
    async fn test_unpriced_currency_is_not_found() {
        let provider = Arc::new(MockInventoryProvider::new(Provider::Amadeus));
        let service = service(provider).await;
        let err = service.search(&criteria(), "GBP").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
