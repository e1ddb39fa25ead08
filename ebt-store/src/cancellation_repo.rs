use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebt_booking::models::{CancellationRequest, CancellationRequestStatus, RefundStatus};
use ebt_booking::repository::{CancellationRequestRepository, PendingInsert};
use ebt_core::{CoreError, CoreResult};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::db_error;

const REQUEST_COLUMNS: &str = "id, booking_id, requested_by, requested_at, reason, status, processed_at, \
    processed_by, admin_notes, rejection_reason, refund_amount, refund_status, version";

pub struct PgCancellationRequestRepository {
    pool: PgPool,
}

impl PgCancellationRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    booking_id: Uuid,
    requested_by: String,
    requested_at: DateTime<Utc>,
    reason: Option<String>,
    status: String,
    processed_at: Option<DateTime<Utc>>,
    processed_by: Option<String>,
    admin_notes: Option<String>,
    rejection_reason: Option<String>,
    refund_amount: Option<Decimal>,
    refund_status: Option<String>,
    version: i64,
}

impl TryFrom<RequestRow> for CancellationRequest {
    type Error = CoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = CancellationRequestStatus::parse(&row.status).ok_or_else(|| {
            CoreError::InternalError(format!("unexpected request status '{}'", row.status))
        })?;
        let refund_status = match row.refund_status.as_deref() {
            Some(s) => Some(
                RefundStatus::parse(s)
                    .ok_or_else(|| CoreError::InternalError(format!("unexpected refund status '{}'", s)))?,
            ),
            None => None,
        };
        Ok(CancellationRequest {
            id: row.id,
            booking_id: row.booking_id,
            requested_by: row.requested_by,
            requested_at: row.requested_at,
            reason: row.reason,
            status,
            processed_at: row.processed_at,
            processed_by: row.processed_by,
            admin_notes: row.admin_notes,
            rejection_reason: row.rejection_reason,
            refund_amount: row.refund_amount,
            refund_status,
            version: row.version,
        })
    }
}

#[async_trait]
impl CancellationRequestRepository for PgCancellationRequestRepository {
    async fn insert_pending(&self, request: &CancellationRequest) -> CoreResult<PendingInsert> {
        // The partial unique index arbitrates concurrent requests for one booking.
        let sql = format!(
            "INSERT INTO cancellation_requests (id, booking_id, requested_by, requested_at, reason, status, version) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', 0) \
             ON CONFLICT (booking_id) WHERE status = 'PENDING' DO NOTHING RETURNING {}",
            REQUEST_COLUMNS
        );
        let inserted = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.id)
            .bind(request.booking_id)
            .bind(&request.requested_by)
            .bind(request.requested_at)
            .bind(&request.reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("cancellation request insert", e))?;

        if let Some(row) = inserted {
            return Ok(PendingInsert::Created(CancellationRequest::try_from(row)?));
        }

        match self.find_pending_for_booking(request.booking_id).await? {
            Some(existing) => Ok(PendingInsert::Existing(existing)),
            // The competing request was decided between the two statements.
            None => Err(CoreError::Conflict(format!(
                "cancellation request for booking {} changed concurrently",
                request.booking_id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<CancellationRequest>> {
        let sql = format!("SELECT {} FROM cancellation_requests WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("cancellation request lookup", e))?;
        row.map(CancellationRequest::try_from).transpose()
    }

    async fn find_pending_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<CancellationRequest>> {
        let sql = format!(
            "SELECT {} FROM cancellation_requests WHERE booking_id = $1 AND status = 'PENDING'",
            REQUEST_COLUMNS
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("cancellation request lookup", e))?;
        row.map(CancellationRequest::try_from).transpose()
    }

    async fn update(&self, request: &CancellationRequest) -> CoreResult<CancellationRequest> {
        let sql = format!(
            "UPDATE cancellation_requests SET status = $3, processed_at = $4, processed_by = $5, admin_notes = $6, \
             rejection_reason = $7, refund_amount = $8, refund_status = $9, version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {}",
            REQUEST_COLUMNS
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request.id)
            .bind(request.version)
            .bind(request.status.as_str())
            .bind(request.processed_at)
            .bind(&request.processed_by)
            .bind(&request.admin_notes)
            .bind(&request.rejection_reason)
            .bind(request.refund_amount)
            .bind(request.refund_status.map(|s| s.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("cancellation request update", e))?;

        match row {
            Some(row) => CancellationRequest::try_from(row),
            None => Err(CoreError::Conflict(format!(
                "cancellation request {} was already processed",
                request.id
            ))),
        }
    }

    async fn list_pending(&self) -> CoreResult<Vec<CancellationRequest>> {
        let sql = format!(
            "SELECT {} FROM cancellation_requests WHERE status = 'PENDING' ORDER BY requested_at",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("pending cancellation scan", e))?;
        rows.into_iter().map(CancellationRequest::try_from).collect()
    }
}
