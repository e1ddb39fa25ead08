use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_core::voucher::{AppliedVoucher, VoucherRequest, VoucherService};
use ebt_core::{CoreError, CoreResult};
use ebt_shared::ProductType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::currency::round_amount;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountRule {
    Percentage { percentage: Decimal },
    Fixed { amount: Decimal, currency: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub rule: DiscountRule,
    /// Empty means every product type.
    pub product_types: Vec<ProductType>,
    pub min_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub used_count: u32,
    pub redeemed_by: HashSet<String>,
    pub is_active: bool,
}

impl Voucher {
    pub fn new(code: &str, rule: DiscountRule) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_uppercase(),
            rule,
            product_types: Vec::new(),
            min_amount: None,
            max_discount: None,
            valid_from: Utc::now(),
            valid_until: None,
            max_uses: None,
            used_count: 0,
            redeemed_by: HashSet::new(),
            is_active: true,
        }
    }

    fn validate(&self, request: &VoucherRequest, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.is_active || now < self.valid_from || self.valid_until.is_some_and(|until| now > until) {
            return Err(CoreError::Validation(format!("voucher {} is not valid", self.code)));
        }
        if !self.product_types.is_empty() && !self.product_types.contains(&request.product_type) {
            return Err(CoreError::Validation(format!(
                "voucher {} does not apply to {}",
                self.code, request.product_type
            )));
        }
        if let Some(min) = self.min_amount {
            if request.amount < min {
                return Err(CoreError::Validation(format!(
                    "voucher {} requires a minimum spend of {}",
                    self.code, min
                )));
            }
        }
        if self.max_uses.is_some_and(|max| self.used_count >= max) {
            return Err(CoreError::Validation(format!("voucher {} has been fully redeemed", self.code)));
        }
        if self.redeemed_by.contains(&request.user_id) {
            return Err(CoreError::Validation(format!("voucher {} already used", self.code)));
        }
        if let DiscountRule::Fixed { currency, .. } = &self.rule {
            if !currency.eq_ignore_ascii_case(&request.currency) {
                return Err(CoreError::Validation(format!(
                    "voucher {} is only valid for {} bookings",
                    self.code, currency
                )));
            }
        }
        Ok(())
    }

    /// Never exceeds `amount` or the configured cap.
    pub fn discount_for(&self, amount: Decimal, currency: &str) -> Decimal {
        let raw = match &self.rule {
            DiscountRule::Percentage { percentage } => amount * *percentage / Decimal::ONE_HUNDRED,
            DiscountRule::Fixed { amount: fixed, .. } => *fixed,
        };
        let capped = match self.max_discount {
            Some(max) => raw.min(max),
            None => raw,
        };
        round_amount(capped.min(amount).max(Decimal::ZERO), currency)
    }
}

/// Voucher table held in memory; applying a voucher reserves one use.
#[derive(Default)]
pub struct VoucherEngine {
    vouchers: RwLock<HashMap<String, Voucher>>,
}

impl VoucherEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_voucher(&self, voucher: Voucher) {
        let mut vouchers = self.vouchers.write().await;
        vouchers.insert(voucher.code.clone(), voucher);
    }

    pub async fn get(&self, code: &str) -> Option<Voucher> {
        self.vouchers.read().await.get(&code.to_uppercase()).cloned()
    }
}

#[async_trait]
impl VoucherService for VoucherEngine {
    async fn apply_voucher(&self, request: &VoucherRequest) -> CoreResult<AppliedVoucher> {
        let mut vouchers = self.vouchers.write().await;
        let voucher = vouchers
            .get_mut(&request.code.to_uppercase())
            .ok_or_else(|| CoreError::not_found("voucher", &request.code))?;

        voucher.validate(request, Utc::now())?;

        let discount = voucher.discount_for(request.amount, &request.currency);
        voucher.used_count += 1;
        voucher.redeemed_by.insert(request.user_id.clone());

        tracing::info!(
            "Voucher {} applied for user {}: discount {} {}",
            voucher.code,
            request.user_id,
            discount,
            request.currency
        );

        Ok(AppliedVoucher {
            voucher_id: voucher.id,
            voucher_code: voucher.code.clone(),
            discount_amount: discount,
            final_amount: request.amount - discount,
        })
    }
}
