use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_catalog::{MarkupConfig, MarkupConfigRepository, ProductType};
use ebt_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::db_error;

pub struct PgMarkupConfigRepository {
    pool: PgPool,
}

impl PgMarkupConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MarkupRow {
    id: Uuid,
    product_type: String,
    currency: String,
    markup_percentage: Decimal,
    service_fee_amount: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MarkupRow> for MarkupConfig {
    type Error = CoreError;

    fn try_from(row: MarkupRow) -> Result<Self, Self::Error> {
        let product_type: ProductType = row.product_type.parse().map_err(|_| {
            CoreError::InternalError(format!("unexpected product type '{}' in markup_configs", row.product_type))
        })?;
        Ok(MarkupConfig {
            id: row.id,
            product_type,
            currency: row.currency,
            markup_percentage: row.markup_percentage,
            service_fee_amount: row.service_fee_amount,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl MarkupConfigRepository for PgMarkupConfigRepository {
    async fn find_active(&self, product_type: ProductType, currency: &str) -> CoreResult<Option<MarkupConfig>> {
        let row = sqlx::query_as::<_, MarkupRow>(
            "SELECT id, product_type, currency, markup_percentage, service_fee_amount, is_active, created_at \
             FROM markup_configs WHERE product_type = $1 AND currency = $2 AND is_active",
        )
        .bind(product_type.as_str())
        .bind(currency.to_uppercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("markup lookup", e))?;

        row.map(MarkupConfig::try_from).transpose()
    }

    async fn activate(&self, config: MarkupConfig) -> CoreResult<MarkupConfig> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("markup activation", e))?;

        // Retire the current row before inserting so the partial unique index holds.
        sqlx::query("UPDATE markup_configs SET is_active = FALSE WHERE product_type = $1 AND currency = $2 AND is_active")
            .bind(config.product_type.as_str())
            .bind(&config.currency)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("markup activation", e))?;

        let row = sqlx::query_as::<_, MarkupRow>(
            "INSERT INTO markup_configs (id, product_type, currency, markup_percentage, service_fee_amount, is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6) \
             RETURNING id, product_type, currency, markup_percentage, service_fee_amount, is_active, created_at",
        )
        .bind(config.id)
        .bind(config.product_type.as_str())
        .bind(&config.currency)
        .bind(config.markup_percentage)
        .bind(config.service_fee_amount)
        .bind(config.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("markup activation", e))?;

        tx.commit().await.map_err(|e| db_error("markup activation", e))?;

        info!(
            "Activated markup {} for {}/{}",
            row.id, row.product_type, row.currency
        );
        MarkupConfig::try_from(row)
    }
}
