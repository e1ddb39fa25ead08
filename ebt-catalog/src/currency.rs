use async_trait::async_trait;
use ebt_core::retry::{retry_upstream, RetryConfig};
use ebt_core::{CoreError, CoreResult, UpstreamError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

pub const SUPPORTED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF", "NZD", "SGD", "HKD", "SEK", "NOK", "DKK", "THB",
];

pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(3600);

pub fn is_supported(code: &str) -> bool {
    SUPPORTED_CURRENCIES.iter().any(|c| c.eq_ignore_ascii_case(code))
}

fn is_jpy(code: &str) -> bool {
    code.eq_ignore_ascii_case("JPY")
}

/// 0 for JPY, 2 for everything else.
pub fn decimal_places(code: &str) -> u32 {
    if is_jpy(code) {
        0
    } else {
        2
    }
}

/// 1 for JPY, 100 for everything else.
pub fn minor_unit_multiplier(code: &str) -> i64 {
    if is_jpy(code) {
        1
    } else {
        100
    }
}

pub fn round_amount(amount: Decimal, code: &str) -> Decimal {
    amount.round_dp_with_strategy(decimal_places(code), RoundingStrategy::MidpointAwayFromZero)
}

/// Processors reject fractional minor units, so round to the nearest integer.
pub fn to_minor_units(amount: Decimal, code: &str) -> CoreResult<i64> {
    let minor = (amount * Decimal::from(minor_unit_multiplier(code)))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    minor
        .to_i64()
        .ok_or_else(|| CoreError::Validation(format!("amount out of range for {}", code)))
}

pub fn from_minor_units(minor: i64, code: &str) -> Decimal {
    Decimal::from(minor) / Decimal::from(minor_unit_multiplier(code))
}

/// Render with exactly the currency's decimal places.
pub fn format_amount(amount: Decimal, code: &str) -> String {
    let mut rounded = round_amount(amount, code);
    rounded.rescale(decimal_places(code));
    rounded.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionBreakdown {
    pub base_amount: Decimal,
    pub conversion_fee: Decimal,
    pub total_with_fee: Decimal,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `to` per one unit of `from`.
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal, UpstreamError>;
}

/// Rates quoted against a single base currency, e.g. loaded from configuration.
pub struct StaticRateSource {
    base: String,
    table: HashMap<String, Decimal>,
}

impl StaticRateSource {
    pub fn new(base: &str, table: HashMap<String, Decimal>) -> Self {
        let mut table: HashMap<String, Decimal> =
            table.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect();
        table.insert(base.to_uppercase(), Decimal::ONE);
        Self { base: base.to_uppercase(), table }
    }

    fn per_base(&self, code: &str) -> Option<Decimal> {
        self.table.get(&code.to_uppercase()).copied().filter(|r| !r.is_zero())
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal, UpstreamError> {
        match (self.per_base(from), self.per_base(to)) {
            (Some(f), Some(t)) => Ok(t / f),
            _ => Err(UpstreamError::rejected(format!(
                "no {} rate for {}->{}",
                self.base, from, to
            ))),
        }
    }
}

#[async_trait]
pub trait RateCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Decimal>;
    async fn put(&self, key: &str, rate: Decimal, ttl: Duration);
}

/// Process-local cache; last writer wins, cleared on restart.
#[derive(Default)]
pub struct InMemoryRateCache {
    entries: RwLock<HashMap<String, (Decimal, Instant)>>,
}

impl InMemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateCache for InMemoryRateCache {
    async fn get(&self, key: &str) -> Option<Decimal> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(rate, _)| *rate)
    }

    async fn put(&self, key: &str, rate: Decimal, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (rate, Instant::now() + ttl));
    }
}

/// Converts between currencies and prices the rate-drift buffer.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    cache: Arc<dyn RateCache>,
    ttl: Duration,
    fee_percentage: Decimal,
    retry: RetryConfig,
}

impl CurrencyConverter {
    pub fn new(
        source: Arc<dyn RateSource>,
        cache: Arc<dyn RateCache>,
        ttl: Duration,
        fee_percentage: Decimal,
    ) -> CoreResult<Self> {
        if fee_percentage.is_sign_negative() || fee_percentage > Decimal::from(10) {
            return Err(CoreError::Configuration(format!(
                "conversion fee percentage must be between 0 and 10, got {}",
                fee_percentage
            )));
        }
        Ok(Self {
            source,
            cache,
            ttl,
            fee_percentage,
            retry: RetryConfig::quick(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn fee_percentage(&self) -> Decimal {
        self.fee_percentage
    }

    /// Rate lookup through the cache. `None` when no rate can be obtained.
    pub async fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let key = format!("fx:{}:{}", from.to_uppercase(), to.to_uppercase());
        if let Some(rate) = self.cache.get(&key).await {
            return Some(rate);
        }

        let fetched = retry_upstream(&self.retry, "exchange rate fetch", move || {
            self.source.fetch_rate(from, to)
        })
        .await;

        match fetched {
            Ok(rate) => {
                self.cache.put(&key, rate, self.ttl).await;
                Some(rate)
            }
            Err(e) => {
                warn!("Exchange rate {}->{} unavailable: {}", from, to, e);
                None
            }
        }
    }

    /// Never fails: unsupported currencies or a rate outage return `amount` unchanged.
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Decimal {
        if from.eq_ignore_ascii_case(to) {
            return amount;
        }
        if !is_supported(from) || !is_supported(to) {
            warn!("Unsupported currency pair {}->{}, returning amount unconverted", from, to);
            return amount;
        }
        match self.rate(from, to).await {
            Some(rate) => round_amount(amount * rate, to),
            None => {
                warn!("Falling back to unconverted amount for {}->{}", from, to);
                amount
            }
        }
    }

    pub fn calculate_conversion_fee(
        &self,
        converted_amount: Decimal,
        from: &str,
        to: &str,
    ) -> ConversionBreakdown {
        if from.eq_ignore_ascii_case(to) {
            return ConversionBreakdown {
                base_amount: converted_amount,
                conversion_fee: Decimal::ZERO,
                total_with_fee: converted_amount,
            };
        }
        let fee = round_amount(
            converted_amount * self.fee_percentage / Decimal::ONE_HUNDRED,
            to,
        );
        ConversionBreakdown {
            base_amount: converted_amount,
            conversion_fee: fee,
            total_with_fee: converted_amount + fee,
        }
    }
}
