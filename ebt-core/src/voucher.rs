use async_trait::async_trait;
use ebt_shared::ProductType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherRequest {
    pub code: String,
    pub user_id: String,
    pub product_type: ProductType,
    pub amount: Decimal,
    pub currency: String,
}

/// Outcome of a successful voucher application; frozen onto the booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedVoucher {
    pub voucher_id: Uuid,
    pub voucher_code: String,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[async_trait]
pub trait VoucherService: Send + Sync {
    /// Validate the code for this user and amount, consuming one use.
    async fn apply_voucher(&self, request: &VoucherRequest) -> CoreResult<AppliedVoucher>;
}
