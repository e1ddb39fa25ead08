use ebt_catalog::currency::{round_amount, to_minor_units};
use ebt_core::payment::{
    ChargeType, PaymentIntent, PaymentIntentRequest, PaymentProcessor, Refund, RefundReason, RefundRequest,
    BOOKING_ID_METADATA_KEY, BOOKING_REFERENCE_METADATA_KEY, CHARGE_TYPE_METADATA_KEY,
};
use ebt_core::{CoreError, CoreResult, UpstreamError};
use ebt_shared::{ProductType, Provider};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::Booking;

/// System-wide payment model, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingStrategy {
    /// Customer pays the full price; the operator settles with the provider.
    Merchant,
    /// Provider charges the guest's card; the operator charges its margin only.
    GuestCard,
}

impl FromStr for ChargingStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merchant" => Ok(ChargingStrategy::Merchant),
            "guest_card" | "guest-card" => Ok(ChargingStrategy::GuestCard),
            other => Err(CoreError::Configuration(format!("unknown payment model '{}'", other))),
        }
    }
}

/// The amount sent to the processor for one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeDecision {
    pub charge_type: ChargeType,
    pub amount: Decimal,
    pub amount_minor: i64,
}

/// Decides how much to charge and talks to the card processor.
#[derive(Clone)]
pub struct SettlementGateway {
    processor: Arc<dyn PaymentProcessor>,
    strategy: ChargingStrategy,
}

impl SettlementGateway {
    pub fn new(processor: Arc<dyn PaymentProcessor>, strategy: ChargingStrategy) -> Self {
        Self { processor, strategy }
    }

    pub fn strategy(&self) -> ChargingStrategy {
        self.strategy
    }

    /// Guest-card charging only applies to Amadeus hotels.
    pub fn charge_type_for(&self, provider: Provider, product_type: ProductType) -> ChargeType {
        match (self.strategy, provider, product_type) {
            (ChargingStrategy::GuestCard, Provider::Amadeus, ProductType::Hotel) => ChargeType::MarkupAndFeesOnly,
            _ => ChargeType::FullBookingAmount,
        }
    }

    /// Pure function of (booking, strategy, voucher discount).
    ///
    /// A zero amount means a voucher covers everything owed to the operator
    /// and no intent should be created.
    pub fn decide_charge_amount(&self, booking: &Booking, voucher_discount: Decimal) -> CoreResult<ChargeDecision> {
        let charge_type = self.charge_type_for(booking.provider, booking.product_type);
        let amount = charged_amount(booking, charge_type, voucher_discount);
        let amount_minor = to_minor_units(amount, &booking.currency)?;
        if amount_minor < 0 {
            return Err(CoreError::Validation(format!(
                "booking {} has a negative charge",
                booking.reference
            )));
        }
        Ok(ChargeDecision { charge_type, amount, amount_minor })
    }

    /// Not retried: an ambiguous failure could create a second intent.
    pub async fn create_intent(&self, booking: &Booking, decision: &ChargeDecision) -> Result<PaymentIntent, UpstreamError> {
        let mut metadata = HashMap::new();
        metadata.insert(CHARGE_TYPE_METADATA_KEY.to_string(), decision.charge_type.as_str().to_string());
        metadata.insert(BOOKING_ID_METADATA_KEY.to_string(), booking.id.to_string());
        metadata.insert(BOOKING_REFERENCE_METADATA_KEY.to_string(), booking.reference.clone());

        self.processor
            .create_payment_intent(PaymentIntentRequest {
                amount_minor: decision.amount_minor,
                currency: booking.currency.to_lowercase(),
                metadata,
            })
            .await
    }

    pub async fn cancel_intent(&self, payment_intent_id: &str) -> Result<(), UpstreamError> {
        self.processor.cancel_payment_intent(payment_intent_id).await
    }

    /// What the customer actually paid, replaying the charge type stored on the booking.
    pub fn charged_amount(&self, booking: &Booking) -> Decimal {
        let charge_type = booking
            .charge_type
            .unwrap_or_else(|| self.charge_type_for(booking.provider, booking.product_type));
        charged_amount(booking, charge_type, booking.voucher_discount)
    }

    /// Refund owed on a customer cancellation before the deadline.
    pub fn cancellation_refund_amount(&self, booking: &Booking) -> Decimal {
        self.charged_amount(booking)
    }

    /// Admin full refund: the operator margin only, pro-rated by the voucher.
    pub fn full_refund_amount(&self, booking: &Booking) -> Decimal {
        booking.prorated_margin()
    }

    pub async fn refund(&self, booking: &Booking, amount: Decimal) -> CoreResult<Refund> {
        let payment_intent_id = booking.payment_reference.clone().ok_or_else(|| {
            CoreError::InvalidState(format!("booking {} has no payment to refund", booking.reference))
        })?;
        let amount_minor = to_minor_units(amount, &booking.currency)?;
        self.processor
            .create_refund(RefundRequest {
                payment_intent_id,
                amount_minor,
                reason: RefundReason::RequestedByCustomer,
            })
            .await
            .map_err(|e| CoreError::upstream("payment processor", e))
    }
}

fn charged_amount(booking: &Booking, charge_type: ChargeType, voucher_discount: Decimal) -> Decimal {
    match charge_type {
        ChargeType::MarkupAndFeesOnly => {
            let margin = booking.margin();
            if voucher_discount.is_zero() || booking.total_amount.is_zero() {
                return margin;
            }
            let ratio = (Decimal::ONE - voucher_discount / booking.total_amount).max(Decimal::ZERO);
            round_amount(margin * ratio, &booking.currency)
        }
        ChargeType::FullBookingAmount => {
            round_amount((booking.total_amount - voucher_discount).max(Decimal::ZERO), &booking.currency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::confirmed_hotel;
    use ebt_core::payment::MockPaymentProcessor;
    use rust_decimal_macros::dec;

    fn gateway(strategy: ChargingStrategy) -> (SettlementGateway, Arc<MockPaymentProcessor>) {
        let processor = Arc::new(MockPaymentProcessor::new());
        (SettlementGateway::new(processor.clone(), strategy), processor)
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("merchant".parse::<ChargingStrategy>().unwrap(), ChargingStrategy::Merchant);
        assert_eq!("GUEST_CARD".parse::<ChargingStrategy>().unwrap(), ChargingStrategy::GuestCard);
        assert!("hybrid".parse::<ChargingStrategy>().is_err());
    }

    #[test]
    fn test_guest_card_charges_margin_for_amadeus_hotels_only() {
        let (gateway, _) = gateway(ChargingStrategy::GuestCard);
        let booking = confirmed_hotel();
        let decision = gateway.decide_charge_amount(&booking, Decimal::ZERO).unwrap();
        assert_eq!(decision.charge_type, ChargeType::MarkupAndFeesOnly);
        assert_eq!(decision.amount_minor, 5000);

        let decision = gateway.decide_charge_amount(&booking, dec!(50)).unwrap();
        assert_eq!(decision.amount, dec!(45));
        assert_eq!(decision.amount_minor, 4500);

        let mut flight = confirmed_hotel();
        flight.product_type = ProductType::FlightInternational;
        flight.provider = Provider::Duffel;
        let decision = gateway.decide_charge_amount(&flight, dec!(50)).unwrap();
        assert_eq!(decision.charge_type, ChargeType::FullBookingAmount);
        assert_eq!(decision.amount, dec!(450));
    }

    #[test]
    fn test_merchant_charges_full_amount() {
        let (gateway, _) = gateway(ChargingStrategy::Merchant);
        let decision = gateway.decide_charge_amount(&confirmed_hotel(), Decimal::ZERO).unwrap();
        assert_eq!(decision.charge_type, ChargeType::FullBookingAmount);
        assert_eq!(decision.amount_minor, 50000);
    }

    #[test]
    fn test_minor_units_for_jpy() {
        let (gateway, _) = gateway(ChargingStrategy::Merchant);
        let mut booking = confirmed_hotel();
        booking.currency = "JPY".to_string();
        booking.total_amount = dec!(4500);
        booking.final_amount = dec!(4500);
        let decision = gateway.decide_charge_amount(&booking, Decimal::ZERO).unwrap();
        assert_eq!(decision.amount_minor, 4500);
    }

    #[test]
    fn test_fully_discounted_booking_charges_nothing() {
        let booking = confirmed_hotel();
        let (guest_card, _) = gateway(ChargingStrategy::GuestCard);
        let decision = guest_card.decide_charge_amount(&booking, dec!(500)).unwrap();
        assert_eq!(decision.charge_type, ChargeType::MarkupAndFeesOnly);
        assert_eq!(decision.amount_minor, 0);

        let (merchant, _) = gateway(ChargingStrategy::Merchant);
        let decision = merchant.decide_charge_amount(&booking, dec!(500)).unwrap();
        assert_eq!(decision.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_intent_metadata_carries_charge_type() {
        let (gateway, processor) = gateway(ChargingStrategy::GuestCard);
        let booking = confirmed_hotel();
        let decision = gateway.decide_charge_amount(&booking, Decimal::ZERO).unwrap();
        gateway.create_intent(&booking, &decision).await.unwrap();
        let intents = processor.intents().await;
        assert_eq!(
            intents[0].metadata.get(CHARGE_TYPE_METADATA_KEY).map(String::as_str),
            Some("MARKUP_AND_FEES_ONLY")
        );
        assert_eq!(intents[0].currency, "eur");
    }

    #[tokio::test]
    async fn test_refund_replays_stored_charge_type() {
        // Strategy changed after the charge; the stored type still wins.
        let (gateway, processor) = gateway(ChargingStrategy::Merchant);
        let mut booking = confirmed_hotel();
        booking.voucher_discount = dec!(50);
        let amount = gateway.cancellation_refund_amount(&booking);
        assert_eq!(amount, dec!(45));
        gateway.refund(&booking, amount).await.unwrap();
        assert_eq!(processor.refunds().await[0].amount_minor, 4500);
    }
}
