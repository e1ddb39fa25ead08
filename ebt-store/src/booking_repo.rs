use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_booking::models::{Booking, BookingStatus, PaymentStatus, RefundStatus};
use ebt_booking::repository::BookingRepository;
use ebt_core::payment::ChargeType;
use ebt_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::db_error;

const BOOKING_COLUMNS: &str = "id, reference, user_id, contact_email, product_type, provider, offer_id, \
    status, payment_status, refund_status, provider_price, provider_currency, base_price, markup_percentage, \
    markup_amount, service_fee, total_amount, voucher_discount, final_amount, refund_amount, currency, \
    markup_config_id, voucher_id, voucher_code, charge_type, payment_reference, provider_booking_id, \
    provider_data, booking_data, passenger_info, encrypted_card, card_last4, cancellation_deadline, \
    cancellation_policy, cancelled_at, cancelled_by, fulfilment_claimed_at, version, created_at, updated_at";

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE {} = $1", BOOKING_COLUMNS, clause);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("booking lookup", e))?;
        row.map(Booking::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    user_id: Option<String>,
    contact_email: String,
    product_type: String,
    provider: String,
    offer_id: String,
    status: String,
    payment_status: String,
    refund_status: Option<String>,
    provider_price: Decimal,
    provider_currency: String,
    base_price: Decimal,
    markup_percentage: Decimal,
    markup_amount: Decimal,
    service_fee: Decimal,
    total_amount: Decimal,
    voucher_discount: Decimal,
    final_amount: Decimal,
    refund_amount: Option<Decimal>,
    currency: String,
    markup_config_id: Uuid,
    voucher_id: Option<Uuid>,
    voucher_code: Option<String>,
    charge_type: Option<String>,
    payment_reference: Option<String>,
    provider_booking_id: Option<String>,
    provider_data: Option<Value>,
    booking_data: Value,
    passenger_info: Value,
    encrypted_card: Option<String>,
    card_last4: Option<String>,
    cancellation_deadline: Option<DateTime<Utc>>,
    cancellation_policy: Value,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<String>,
    fulfilment_claimed_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(column: &str, value: &str) -> CoreError {
    CoreError::InternalError(format!("unexpected {} value '{}' in bookings", column, value))
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let payment_status =
            PaymentStatus::parse(&row.payment_status).ok_or_else(|| corrupt("payment_status", &row.payment_status))?;
        let refund_status = match row.refund_status.as_deref() {
            Some(s) => Some(RefundStatus::parse(s).ok_or_else(|| corrupt("refund_status", s))?),
            None => None,
        };
        let charge_type = match row.charge_type.as_deref() {
            Some(s) => Some(ChargeType::parse(s).ok_or_else(|| corrupt("charge_type", s))?),
            None => None,
        };

        Ok(Booking {
            id: row.id,
            reference: row.reference,
            user_id: row.user_id,
            contact_email: row.contact_email,
            product_type: row.product_type.parse().map_err(|_| corrupt("product_type", &row.product_type))?,
            provider: row.provider.parse().map_err(|_| corrupt("provider", &row.provider))?,
            offer_id: row.offer_id,
            status,
            payment_status,
            refund_status,
            provider_price: row.provider_price,
            provider_currency: row.provider_currency,
            base_price: row.base_price,
            markup_percentage: row.markup_percentage,
            markup_amount: row.markup_amount,
            service_fee: row.service_fee,
            total_amount: row.total_amount,
            voucher_discount: row.voucher_discount,
            final_amount: row.final_amount,
            refund_amount: row.refund_amount,
            currency: row.currency,
            markup_config_id: row.markup_config_id,
            voucher_id: row.voucher_id,
            voucher_code: row.voucher_code,
            charge_type,
            payment_reference: row.payment_reference,
            provider_booking_id: row.provider_booking_id,
            provider_data: row.provider_data,
            fulfilment_claimed_at: row.fulfilment_claimed_at,
            booking_data: row.booking_data,
            passenger_info: row.passenger_info,
            encrypted_card: row.encrypted_card,
            card_last4: row.card_last4,
            cancellation_deadline: row.cancellation_deadline,
            cancellation_policy: row.cancellation_policy,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, b: &Booking) -> CoreResult<()> {
        let sql = format!(
            "INSERT INTO bookings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, \
             $36, $37, $38, $39, $40)",
            BOOKING_COLUMNS
        );
        sqlx::query(&sql)
            .bind(b.id)
            .bind(&b.reference)
            .bind(&b.user_id)
            .bind(&b.contact_email)
            .bind(b.product_type.as_str())
            .bind(b.provider.as_str())
            .bind(&b.offer_id)
            .bind(b.status.as_str())
            .bind(b.payment_status.as_str())
            .bind(b.refund_status.map(|s| s.as_str()))
            .bind(b.provider_price)
            .bind(&b.provider_currency)
            .bind(b.base_price)
            .bind(b.markup_percentage)
            .bind(b.markup_amount)
            .bind(b.service_fee)
            .bind(b.total_amount)
            .bind(b.voucher_discount)
            .bind(b.final_amount)
            .bind(b.refund_amount)
            .bind(&b.currency)
            .bind(b.markup_config_id)
            .bind(b.voucher_id)
            .bind(&b.voucher_code)
            .bind(b.charge_type.map(|c| c.as_str()))
            .bind(&b.payment_reference)
            .bind(&b.provider_booking_id)
            .bind(&b.provider_data)
            .bind(&b.booking_data)
            .bind(&b.passenger_info)
            .bind(&b.encrypted_card)
            .bind(&b.card_last4)
            .bind(b.cancellation_deadline)
            .bind(&b.cancellation_policy)
            .bind(b.cancelled_at)
            .bind(&b.cancelled_by)
            .bind(b.fulfilment_claimed_at)
            .bind(b.version)
            .bind(b.created_at)
            .bind(b.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("booking insert", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("booking lookup", e))?;
        row.map(Booking::try_from).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> CoreResult<Option<Booking>> {
        self.fetch_one_where("reference", reference).await
    }

    async fn find_by_payment_reference(&self, payment_reference: &str) -> CoreResult<Option<Booking>> {
        self.fetch_one_where("payment_reference", payment_reference).await
    }

    async fn update(&self, b: &Booking) -> CoreResult<Booking> {
        let sql = format!(
            "UPDATE bookings SET status = $3, payment_status = $4, refund_status = $5, voucher_discount = $6, \
             final_amount = $7, refund_amount = $8, voucher_id = $9, voucher_code = $10, charge_type = $11, \
             payment_reference = $12, provider_booking_id = $13, provider_data = $14, booking_data = $15, \
             encrypted_card = $16, card_last4 = $17, cancelled_at = $18, cancelled_by = $19, \
             fulfilment_claimed_at = $20, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 RETURNING {}",
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(b.id)
            .bind(b.version)
            .bind(b.status.as_str())
            .bind(b.payment_status.as_str())
            .bind(b.refund_status.map(|s| s.as_str()))
            .bind(b.voucher_discount)
            .bind(b.final_amount)
            .bind(b.refund_amount)
            .bind(b.voucher_id)
            .bind(&b.voucher_code)
            .bind(b.charge_type.map(|c| c.as_str()))
            .bind(&b.payment_reference)
            .bind(&b.provider_booking_id)
            .bind(&b.provider_data)
            .bind(&b.booking_data)
            .bind(&b.encrypted_card)
            .bind(&b.card_last4)
            .bind(b.cancelled_at)
            .bind(&b.cancelled_by)
            .bind(b.fulfilment_claimed_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("booking update", e))?;

        match row {
            Some(row) => Booking::try_from(row),
            None => Err(CoreError::Conflict(format!(
                "booking {} was modified concurrently",
                b.reference
            ))),
        }
    }

    async fn list_unfulfilled_paid(&self, older_than: DateTime<Utc>) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE payment_status = 'COMPLETED' AND provider_booking_id IS NULL \
             AND status <> 'CANCELLED' AND created_at < $1 ORDER BY created_at",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("unfulfilled booking scan", e))?;
        rows.into_iter().map(Booking::try_from).collect()
    }
}
