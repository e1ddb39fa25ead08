//! Booking Lifecycle Engine.
//!
//! `PENDING -> PAYMENT_PENDING -> CONFIRMED -> CANCELLED`. Every write goes
//! through the repository's version check, so a racing webhook and a racing
//! cancellation cannot both win. Placing the provider order is guarded by a
//! claim written with that same check before the provider is contacted.

use chrono::{Duration, Utc};
use ebt_catalog::currency::is_supported;
use ebt_catalog::PricingEngine;
use ebt_core::notify::{publish_best_effort, Notifier};
use ebt_core::payment::ChargeType;
use ebt_core::supplier::{InventoryRouter, OrderPayment, OrderRequest};
use ebt_core::vault::CardVault;
use ebt_core::voucher::{VoucherRequest, VoucherService};
use ebt_core::{Actor, ActorRole, CoreError, CoreResult};
use ebt_shared::{redact_text, redact_value, ProductType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancellation::{require_admin, CancellationQueue, REVIEW_SLA_MESSAGE};
use crate::events;
use crate::models::{
    generate_reference, Booking, BookingStatus, CancellationRequest, DisputeEvidence, NewBooking, PaymentStatus,
    RefundStatus,
};
use crate::repository::BookingRepository;
use crate::settlement::SettlementGateway;

const REFERENCE_ATTEMPTS: usize = 5;
/// A fulfilment claim older than this is treated as abandoned by a crashed caller.
const FULFILMENT_LEASE_MINUTES: i64 = 10;

/// Everything the engine talks to.
pub struct BookingDeps {
    pub bookings: Arc<dyn BookingRepository>,
    pub pricing: Arc<PricingEngine>,
    pub vault: CardVault,
    pub settlement: SettlementGateway,
    pub inventory: InventoryRouter,
    pub vouchers: Arc<dyn VoucherService>,
    pub notifier: Arc<dyn Notifier>,
    pub cancellations: Arc<CancellationQueue>,
    /// Vault ciphertext of the operator's card, used in the merchant model.
    pub agency_card: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentIssued {
    pub booking: Booking,
    /// None when a voucher covered the whole charge.
    pub payment_intent_id: Option<String>,
    pub client_secret: Option<String>,
    pub charge_type: ChargeType,
    pub amount: Decimal,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    Cancelled { booking: Booking },
    Requested { request: CancellationRequest, message: String },
}

pub struct BookingEngine {
    deps: BookingDeps,
}

impl BookingEngine {
    pub fn new(deps: BookingDeps) -> Self {
        Self { deps }
    }

    pub fn cancellations(&self) -> &Arc<CancellationQueue> {
        &self.deps.cancellations
    }

    pub fn settlement(&self) -> &SettlementGateway {
        &self.deps.settlement
    }

    pub async fn get(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.deps
            .bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", booking_id))
    }

    /// Price and persist a PENDING booking. Nothing external is contacted.
    pub async fn create(&self, input: NewBooking, actor: &Actor) -> CoreResult<Booking> {
        if !is_supported(&input.currency) {
            return Err(CoreError::Validation(format!("unsupported currency {}", input.currency)));
        }
        if input.contact_email.trim().is_empty() {
            return Err(CoreError::Validation("contact email is required".to_string()));
        }
        if input.product_type == ProductType::CarRental && input.driver.is_none() {
            return Err(CoreError::Validation("car rentals require driver details".to_string()));
        }
        let charge_type = self.deps.settlement.charge_type_for(input.provider, input.product_type);
        if charge_type == ChargeType::MarkupAndFeesOnly && input.card.is_none() {
            return Err(CoreError::Validation(
                "card details are required: the provider charges the guest's card directly".to_string(),
            ));
        }

        let price = self
            .deps
            .pricing
            .quote(input.provider_price, &input.provider_currency, &input.currency, input.product_type)
            .await?;

        let (encrypted_card, card_last4) = match &input.card {
            Some(card) => (Some(self.deps.vault.encrypt_card(card)?), Some(card.last4())),
            None => (None, None),
        };

        let mut booking_data = input.booking_data;
        if let Some(driver) = &input.driver {
            if let serde_json::Value::Object(map) = &mut booking_data {
                map.insert("driver".to_string(), serde_json::to_value(driver).unwrap_or_default());
            } else {
                booking_data = serde_json::json!({ "driver": driver });
            }
        }

        let now = Utc::now();
        let user_id = match actor.role {
            ActorRole::Guest => None,
            _ => Some(actor.id.clone()),
        };
        let mut booking = Booking {
            id: Uuid::new_v4(),
            reference: generate_reference(now),
            user_id,
            contact_email: input.contact_email,
            product_type: input.product_type,
            provider: input.provider,
            offer_id: input.offer_id,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            refund_status: None,
            provider_price: price.provider_price,
            provider_currency: price.provider_currency,
            base_price: price.base_price,
            markup_percentage: price.markup_percentage,
            markup_amount: price.markup_amount,
            service_fee: price.service_fee,
            total_amount: price.total_amount,
            voucher_discount: Decimal::ZERO,
            final_amount: price.total_amount,
            refund_amount: None,
            currency: price.currency,
            markup_config_id: price.markup_config_id,
            voucher_id: None,
            voucher_code: None,
            charge_type: None,
            payment_reference: None,
            provider_booking_id: None,
            provider_data: None,
            fulfilment_claimed_at: None,
            booking_data,
            passenger_info: input.passenger_info,
            encrypted_card,
            card_last4,
            cancellation_deadline: input.cancellation_deadline,
            cancellation_policy: input.cancellation_policy,
            cancelled_at: None,
            cancelled_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut attempt = 0;
        loop {
            match self.deps.bookings.insert(&booking).await {
                Ok(()) => break,
                Err(CoreError::Conflict(_)) if attempt + 1 < REFERENCE_ATTEMPTS => {
                    attempt += 1;
                    booking.reference = generate_reference(now);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Booking {} created: {} {} via {} (total {} {})",
            booking.reference,
            booking.product_type,
            booking.offer_id,
            booking.provider,
            booking.total_amount,
            booking.currency
        );
        Ok(booking)
    }

    pub async fn issue_payment_intent(
        &self,
        booking_id: Uuid,
        actor: &Actor,
        voucher_code: Option<String>,
    ) -> CoreResult<PaymentIntentIssued> {
        let booking = self.get(booking_id).await?;
        ensure_owner(&booking, actor)?;
        self.issue_intent(booking, &actor.id, voucher_code).await
    }

    /// Guest checkout: the reference plus contact email stand in for a login.
    pub async fn issue_guest_payment_intent(
        &self,
        reference: &str,
        email: &str,
        voucher_code: Option<String>,
    ) -> CoreResult<PaymentIntentIssued> {
        let booking = self
            .deps
            .bookings
            .find_by_reference(reference)
            .await?
            .filter(|b| b.contact_email.eq_ignore_ascii_case(email.trim()))
            .ok_or_else(|| CoreError::not_found("booking", reference))?;
        self.issue_intent(booking, email, voucher_code).await
    }

    async fn issue_intent(
        &self,
        mut booking: Booking,
        voucher_user: &str,
        voucher_code: Option<String>,
    ) -> CoreResult<PaymentIntentIssued> {
        if booking.payment_status == PaymentStatus::Completed {
            return Err(CoreError::InvalidState(format!(
                "booking {} has already been paid",
                booking.reference
            )));
        }
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::PaymentPending) {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {} and cannot be paid",
                booking.reference, booking.status
            )));
        }

        if let Some(code) = voucher_code.filter(|c| !c.trim().is_empty()) {
            match booking.voucher_code.as_deref() {
                Some(applied) if applied.eq_ignore_ascii_case(code.trim()) => {}
                Some(applied) => {
                    return Err(CoreError::Validation(format!(
                        "voucher {} is already applied to this booking",
                        applied
                    )));
                }
                None => {
                    let applied = self
                        .deps
                        .vouchers
                        .apply_voucher(&VoucherRequest {
                            code: code.trim().to_string(),
                            user_id: voucher_user.to_string(),
                            product_type: booking.product_type,
                            amount: booking.total_amount,
                            currency: booking.currency.clone(),
                        })
                        .await?;
                    booking.apply_voucher(applied.voucher_id, &applied.voucher_code, applied.discount_amount);
                    // Reserved now; survives a failed intent below.
                    booking = self.deps.bookings.update(&booking).await?;
                }
            }
        }

        let decision = self
            .deps
            .settlement
            .decide_charge_amount(&booking, booking.voucher_discount)?;
        let superseded = booking.payment_reference.take();

        if decision.amount_minor == 0 {
            info!(
                "Booking {} is fully covered by voucher {}, nothing to charge",
                booking.reference,
                booking.voucher_code.as_deref().unwrap_or("-")
            );
            booking.charge_type = Some(decision.charge_type);
            let booking = self.fulfil(booking, None, false).await?;
            self.void_superseded_intent(&booking, superseded).await;
            return Ok(PaymentIntentIssued {
                booking,
                payment_intent_id: None,
                client_secret: None,
                charge_type: decision.charge_type,
                amount: decision.amount,
                amount_minor: 0,
            });
        }

        let intent = self
            .deps
            .settlement
            .create_intent(&booking, &decision)
            .await
            .map_err(|e| {
                warn!(
                    "Payment intent creation failed for booking {}: {}",
                    booking.reference,
                    redact_text(&e.message)
                );
                CoreError::upstream("payment processor", e)
            })?;

        booking.transition(BookingStatus::PaymentPending)?;
        booking.payment_status = PaymentStatus::Processing;
        booking.payment_reference = Some(intent.id.clone());
        booking.charge_type = Some(decision.charge_type);
        let booking = self.deps.bookings.update(&booking).await?;

        info!(
            "Payment intent {} issued for booking {}: {} minor units ({})",
            intent.id,
            booking.reference,
            decision.amount_minor,
            decision.charge_type.as_str()
        );
        self.void_superseded_intent(&booking, superseded).await;
        Ok(PaymentIntentIssued {
            booking,
            payment_intent_id: Some(intent.id),
            client_secret: intent.client_secret,
            charge_type: decision.charge_type,
            amount: decision.amount,
            amount_minor: decision.amount_minor,
        })
    }

    /// Intent `payment_intent_id` was paid: create the provider order and confirm.
    /// Safe to call repeatedly.
    pub async fn confirm_after_payment(&self, booking_id: Uuid, payment_intent_id: &str) -> CoreResult<Booking> {
        let booking = self.get(booking_id).await?;
        self.fulfil(booking, Some(payment_intent_id), false).await
    }

    async fn fulfil(
        &self,
        mut booking: Booking,
        paid_intent: Option<&str>,
        reclaim_stale: bool,
    ) -> CoreResult<Booking> {
        if let Some(intent) = paid_intent {
            if booking.payment_status == PaymentStatus::Completed
                && booking.payment_reference.as_deref() != Some(intent)
            {
                error!(
                    "Booking {} received a second payment {} after {}, refund required",
                    booking.reference,
                    intent,
                    booking.payment_reference.as_deref().unwrap_or("-")
                );
                publish_best_effort(
                    self.deps.notifier.as_ref(),
                    events::reconciliation_required(&booking, &format!("duplicate payment {}", intent)),
                )
                .await;
                return Ok(booking);
            }
        }

        if booking.status == BookingStatus::Confirmed && booking.provider_booking_id.is_some() {
            info!("Booking {} already confirmed, ignoring duplicate confirmation", booking.reference);
            return Ok(booking);
        }
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::PaymentPending) {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {} and cannot be confirmed",
                booking.reference, booking.status
            )));
        }

        let now = Utc::now();
        if let Some(claimed_at) = booking.fulfilment_claimed_at {
            let stale = now - claimed_at > Duration::minutes(FULFILMENT_LEASE_MINUTES);
            if !(stale && reclaim_stale) {
                return Err(CoreError::Conflict(format!(
                    "provider order for booking {} is already being placed (since {})",
                    booking.reference, claimed_at
                )));
            }
            warn!(
                "Reclaiming stale fulfilment of booking {} claimed at {}",
                booking.reference, claimed_at
            );
        }

        if booking.payment_status != PaymentStatus::Completed {
            booking.payment_status = PaymentStatus::Completed;
            if let Some(intent) = paid_intent {
                if booking.payment_reference.as_deref() != Some(intent) {
                    warn!(
                        "Booking {} was paid through superseded intent {}",
                        booking.reference, intent
                    );
                    booking.payment_reference = Some(intent.to_string());
                }
            }
            if booking.status == BookingStatus::Pending {
                booking.transition(BookingStatus::PaymentPending)?;
            }
        }
        // A concurrent caller fails this versioned write before any order is placed.
        booking.fulfilment_claimed_at = Some(now);
        let mut booking = self.deps.bookings.update(&booking).await?;

        let payment = match self.order_payment(&booking) {
            Ok(payment) => payment,
            Err(e) => {
                self.abandon_fulfilment(booking, &e.to_string()).await;
                return Err(e);
            }
        };

        let order = match self.deps.inventory.get(booking.provider) {
            Ok(adapter) => {
                adapter
                    .create_order(OrderRequest {
                        offer_id: booking.offer_id.clone(),
                        guests: booking.passenger_info.clone(),
                        payment,
                    })
                    .await
            }
            Err(e) => {
                self.abandon_fulfilment(booking, &e.to_string()).await;
                return Err(e);
            }
        };
        let order = match order {
            Ok(order) => order,
            Err(e) => {
                self.abandon_fulfilment(booking, &e.message).await;
                return Err(CoreError::upstream("inventory provider", e));
            }
        };
        debug!(
            "Provider order for booking {}: {}",
            booking.reference,
            redact_value(&order.data)
        );

        booking.transition(BookingStatus::Confirmed)?;
        booking.provider_booking_id = Some(order.order_id);
        booking.provider_data = Some(order.data);
        booking.encrypted_card = None;
        booking.fulfilment_claimed_at = None;
        let booking = self.deps.bookings.update(&booking).await.map_err(|e| {
            error!(
                "Provider order {} was created for booking {} but could not be saved: {}",
                booking.provider_booking_id.as_deref().unwrap_or_default(),
                booking.reference,
                e
            );
            e
        })?;

        info!(
            "Booking {} confirmed with provider order {}",
            booking.reference,
            booking.provider_booking_id.as_deref().unwrap_or_default()
        );
        publish_best_effort(self.deps.notifier.as_ref(), events::confirmed(&booking)).await;
        Ok(booking)
    }

    /// Payment failed at the processor; the booking can be paid again.
    pub async fn record_payment_failure(&self, booking_id: Uuid, payment_intent_id: &str) -> CoreResult<Booking> {
        let mut booking = self.get(booking_id).await?;
        if booking.payment_reference.as_deref() != Some(payment_intent_id) {
            info!(
                "Ignoring failure of superseded intent {} for booking {}",
                payment_intent_id, booking.reference
            );
            return Ok(booking);
        }
        if booking.payment_status == PaymentStatus::Completed {
            warn!(
                "Ignoring payment failure for booking {}: payment already completed",
                booking.reference
            );
            return Ok(booking);
        }
        booking.payment_status = PaymentStatus::Failed;
        booking.updated_at = Utc::now();
        let booking = self.deps.bookings.update(&booking).await?;
        info!("Payment failed for booking {}", booking.reference);
        Ok(booking)
    }

    pub async fn find_by_payment_reference(&self, payment_reference: &str) -> CoreResult<Booking> {
        self.deps
            .bookings
            .find_by_payment_reference(payment_reference)
            .await?
            .ok_or_else(|| CoreError::not_found("booking with payment", payment_reference))
    }

    pub async fn cancel(&self, booking_id: Uuid, actor: &Actor) -> CoreResult<CancellationOutcome> {
        let booking = self.get(booking_id).await?;
        ensure_owner(&booking, actor)?;
        if booking.status != BookingStatus::Confirmed {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {} and cannot be cancelled",
                booking.reference, booking.status
            )));
        }

        if booking.is_before_deadline(Utc::now()) {
            self.cancel_before_deadline(booking, actor).await
        } else {
            self.queue_for_review(&booking, actor, None).await
        }
    }

    /// Hotel bookings can always be sent to admin review, whatever the deadline.
    pub async fn request_hotel_cancellation(
        &self,
        booking_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> CoreResult<CancellationOutcome> {
        let booking = self.get(booking_id).await?;
        ensure_owner(&booking, actor)?;
        if booking.product_type != ProductType::Hotel {
            return Err(CoreError::Validation(format!(
                "booking {} is not a hotel booking",
                booking.reference
            )));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {} and cannot be cancelled",
                booking.reference, booking.status
            )));
        }
        self.queue_for_review(&booking, actor, reason).await
    }

    async fn queue_for_review(
        &self,
        booking: &Booking,
        actor: &Actor,
        reason: Option<String>,
    ) -> CoreResult<CancellationOutcome> {
        let request = self.deps.cancellations.enqueue(booking, &actor.id, reason).await?.into_inner();
        Ok(CancellationOutcome::Requested {
            request,
            message: REVIEW_SLA_MESSAGE.to_string(),
        })
    }

    async fn cancel_before_deadline(&self, mut booking: Booking, actor: &Actor) -> CoreResult<CancellationOutcome> {
        // Provider first; failure aborts and the booking stays CONFIRMED.
        if let Some(provider_booking_id) = booking.provider_booking_id.as_deref() {
            let adapter = self.deps.inventory.get(booking.provider)?;
            adapter.cancel_order(provider_booking_id).await.map_err(|e| {
                warn!(
                    "Provider cancellation failed for booking {}: {}",
                    booking.reference,
                    redact_text(&e.message)
                );
                CoreError::upstream("inventory provider", e)
            })?;
        }

        let refund_amount = self.deps.settlement.cancellation_refund_amount(&booking);
        let refund_status = if refund_amount.is_zero() {
            RefundStatus::Completed
        } else {
            match self.deps.settlement.refund(&booking, refund_amount).await {
                Ok(refund) => {
                    info!("Refund {} issued for booking {}", refund.id, booking.reference);
                    RefundStatus::Completed
                }
                Err(e) => {
                    error!(
                        "Refund of {} {} for booking {} failed, manual follow-up required: {}",
                        refund_amount,
                        booking.currency,
                        booking.reference,
                        redact_text(&e.to_string())
                    );
                    RefundStatus::Processing
                }
            }
        };

        booking.transition(BookingStatus::Cancelled)?;
        booking.cancelled_at = Some(Utc::now());
        booking.cancelled_by = Some(actor.id.clone());
        booking.refund_amount = Some(refund_amount);
        booking.refund_status = Some(refund_status);
        let booking = self.deps.bookings.update(&booking).await.map_err(|e| {
            error!(
                "Booking {} was cancelled at the provider but could not be saved: {}",
                booking.reference, e
            );
            e
        })?;

        info!("Booking {} cancelled by {}", booking.reference, actor.id);
        publish_best_effort(self.deps.notifier.as_ref(), events::cancelled(&booking)).await;
        Ok(CancellationOutcome::Cancelled { booking })
    }

    /// Operator-triggered retry of the provider order for a paid booking.
    pub async fn retry_fulfilment(&self, booking_id: Uuid, actor: &Actor) -> CoreResult<Booking> {
        require_admin(actor)?;
        let booking = self.get(booking_id).await?;
        if booking.payment_status != PaymentStatus::Completed {
            return Err(CoreError::InvalidState(format!(
                "booking {} has no completed payment",
                booking.reference
            )));
        }
        info!("Admin {} retrying fulfilment of booking {}", actor.id, booking.reference);
        self.fulfil(booking, None, true).await
    }

    pub async fn dispute_evidence(&self, booking_id: Uuid, actor: &Actor) -> CoreResult<DisputeEvidence> {
        require_admin(actor)?;
        let booking = self.get(booking_id).await?;
        Ok(DisputeEvidence::from(&booking))
    }

    fn order_payment(&self, booking: &Booking) -> CoreResult<OrderPayment> {
        match booking.charge_type {
            Some(ChargeType::MarkupAndFeesOnly) => {
                let blob = booking.encrypted_card.as_deref().ok_or_else(|| {
                    CoreError::InvalidState(format!(
                        "booking {} has no stored guest card for the provider order",
                        booking.reference
                    ))
                })?;
                Ok(OrderPayment::GuestCard(self.deps.vault.decrypt_card(blob)?))
            }
            _ => match self.deps.agency_card.as_deref() {
                Some(blob) => Ok(OrderPayment::AgencyCard(self.deps.vault.decrypt_card(blob)?)),
                None => Ok(OrderPayment::Balance {
                    amount: booking.provider_price,
                    currency: booking.provider_currency.clone(),
                }),
            },
        }
    }

    async fn abandon_fulfilment(&self, mut booking: Booking, reason: &str) {
        self.flag_for_reconciliation(&booking, reason).await;
        booking.fulfilment_claimed_at = None;
        if let Err(e) = self.deps.bookings.update(&booking).await {
            warn!(
                "Could not release the fulfilment claim on booking {}: {}",
                booking.reference, e
            );
        }
    }

    async fn void_superseded_intent(&self, booking: &Booking, superseded: Option<String>) {
        let Some(previous) = superseded else {
            return;
        };
        if booking.payment_reference.as_deref() == Some(previous.as_str()) {
            return;
        }
        match self.deps.settlement.cancel_intent(&previous).await {
            Ok(()) => info!(
                "Cancelled superseded payment intent {} for booking {}",
                previous, booking.reference
            ),
            Err(e) => warn!(
                "Could not cancel superseded payment intent {} for booking {}: {}",
                previous,
                booking.reference,
                redact_text(&e.message)
            ),
        }
    }

    async fn flag_for_reconciliation(&self, booking: &Booking, reason: &str) {
        error!(
            "Booking {} paid ({}) but provider order was not created, manual reconciliation required: {}",
            booking.reference,
            booking.payment_reference.as_deref().unwrap_or("-"),
            redact_text(reason)
        );
        publish_best_effort(
            self.deps.notifier.as_ref(),
            events::reconciliation_required(booking, reason),
        )
        .await;
    }
}

fn ensure_owner(booking: &Booking, actor: &Actor) -> CoreResult<()> {
    if actor.is_admin() || booking.is_owned_by(&actor.id) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!(
            "booking {} belongs to another customer",
            booking.reference
        )))
    }
}
