use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_core::{CoreError, CoreResult};
use ebt_shared::ProductType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::currency::{round_amount, CurrencyConverter};

/// One row of the markup rate table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkupConfig {
    pub id: Uuid,
    pub product_type: ProductType,
    pub currency: String,
    /// e.g. 8.5 means 8.5%
    pub markup_percentage: Decimal,
    /// Flat per-booking fee in `currency`
    pub service_fee_amount: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl MarkupConfig {
    pub fn new(
        product_type: ProductType,
        currency: &str,
        markup_percentage: Decimal,
        service_fee_amount: Decimal,
    ) -> CoreResult<Self> {
        if markup_percentage.is_sign_negative() || service_fee_amount.is_sign_negative() {
            return Err(CoreError::Validation(
                "markup percentage and service fee must not be negative".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            product_type,
            currency: currency.to_uppercase(),
            markup_percentage,
            service_fee_amount,
            is_active: true,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
pub trait MarkupConfigRepository: Send + Sync {
    async fn find_active(
        &self,
        product_type: ProductType,
        currency: &str,
    ) -> CoreResult<Option<MarkupConfig>>;

    /// Store `config` as the only active row for its (product type, currency).
    async fn activate(&self, config: MarkupConfig) -> CoreResult<MarkupConfig>;
}

/// Keeps every historical row; only the latest activation is active.
#[derive(Default)]
pub struct InMemoryMarkupConfigs {
    rows: RwLock<Vec<MarkupConfig>>,
}

impl InMemoryMarkupConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self, product_type: ProductType, currency: &str) -> Vec<MarkupConfig> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.product_type == product_type && r.currency.eq_ignore_ascii_case(currency))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MarkupConfigRepository for InMemoryMarkupConfigs {
    async fn find_active(
        &self,
        product_type: ProductType,
        currency: &str,
    ) -> CoreResult<Option<MarkupConfig>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| r.is_active && r.product_type == product_type && r.currency.eq_ignore_ascii_case(currency))
            .cloned())
    }

    async fn activate(&self, mut config: MarkupConfig) -> CoreResult<MarkupConfig> {
        let mut rows = self.rows.write().await;
        for row in rows.iter_mut() {
            if row.product_type == config.product_type && row.currency.eq_ignore_ascii_case(&config.currency) {
                row.is_active = false;
            }
        }
        config.is_active = true;
        rows.push(config.clone());
        Ok(config)
    }
}

/// Price composition, snapshotted onto the booking at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBreakdown {
    pub provider_price: Decimal,
    pub provider_currency: String,
    pub converted_amount: Decimal,
    pub conversion_fee: Decimal,
    /// Converted amount plus conversion fee.
    pub base_price: Decimal,
    pub markup_percentage: Decimal,
    pub markup_amount: Decimal,
    pub service_fee: Decimal,
    /// base_price + markup_amount + service_fee
    pub total_amount: Decimal,
    pub currency: String,
    pub markup_config_id: Uuid,
}

impl PriceBreakdown {
    pub fn margin(&self) -> Decimal {
        self.markup_amount + self.service_fee
    }
}

/// Currency conversion, then conversion fee, then markup and service fee.
pub struct PricingEngine {
    converter: Arc<CurrencyConverter>,
    markups: Arc<dyn MarkupConfigRepository>,
}

impl PricingEngine {
    pub fn new(converter: Arc<CurrencyConverter>, markups: Arc<dyn MarkupConfigRepository>) -> Self {
        Self { converter, markups }
    }

    pub fn converter(&self) -> &CurrencyConverter {
        &self.converter
    }

    pub fn markups(&self) -> &Arc<dyn MarkupConfigRepository> {
        &self.markups
    }

    /// The active row, or NotFound; a booking without one cannot be priced.
    pub async fn active_markup(&self, product_type: ProductType, currency: &str) -> CoreResult<MarkupConfig> {
        self.markups
            .find_active(product_type, currency)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no active markup configuration for {} in {}",
                    product_type, currency
                ))
            })
    }

    /// Returns (markup_amount, service_fee, total).
    pub fn apply_markup(
        base_price: Decimal,
        config: &MarkupConfig,
        currency: &str,
    ) -> (Decimal, Decimal, Decimal) {
        let markup = round_amount(base_price * config.markup_percentage / Decimal::ONE_HUNDRED, currency);
        let fee = round_amount(config.service_fee_amount, currency);
        (markup, fee, base_price + markup + fee)
    }

    pub async fn quote(
        &self,
        provider_price: Decimal,
        provider_currency: &str,
        currency: &str,
        product_type: ProductType,
    ) -> CoreResult<PriceBreakdown> {
        if provider_price.is_sign_negative() {
            return Err(CoreError::Validation("provider price must not be negative".to_string()));
        }
        let config = self.active_markup(product_type, currency).await?;
        Ok(self.quote_with(provider_price, provider_currency, currency, &config).await)
    }

    pub async fn quote_with(
        &self,
        provider_price: Decimal,
        provider_currency: &str,
        currency: &str,
        config: &MarkupConfig,
    ) -> PriceBreakdown {
        let converted = self.converter.convert(provider_price, provider_currency, currency).await;
        let conversion = self
            .converter
            .calculate_conversion_fee(converted, provider_currency, currency);
        let base_price = round_amount(conversion.total_with_fee, currency);
        let (markup_amount, service_fee, total_amount) = Self::apply_markup(base_price, config, currency);

        PriceBreakdown {
            provider_price,
            provider_currency: provider_currency.to_uppercase(),
            converted_amount: conversion.base_amount,
            conversion_fee: conversion.conversion_fee,
            base_price,
            markup_percentage: config.markup_percentage,
            markup_amount,
            service_fee,
            total_amount,
            currency: currency.to_uppercase(),
            markup_config_id: config.id,
        }
    }
}
