//! Request bodies and their normalisation into the canonical booking input.
//!
//! Clients send card and driver data either nested or flat. Both shapes are
//! folded into [`CardDetails`] / [`DriverDetails`] here, before the booking
//! engine sees them.

use chrono::{DateTime, Utc};
use ebt_booking::{DriverDetails, NewBooking};
use ebt_core::supplier::{CardDetails, SearchCriteria};
use ebt_shared::{ProductType, Provider};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub criteria: SearchCriteria,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub offer_id: String,
    pub provider: Provider,
    pub product_type: ProductType,
    /// Offer price in the provider's currency.
    pub price: Decimal,
    pub price_currency: String,
    pub currency: String,
    pub contact_email: String,
    #[serde(default)]
    pub passengers: Value,
    pub driver: Option<DriverDetails>,
    #[serde(flatten)]
    pub flat_driver: FlatDriver,
    #[serde(default)]
    pub payment: PaymentInput,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation_policy: Value,
    #[serde(default)]
    pub booking_data: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlatDriver {
    #[serde(alias = "driverFirstName")]
    pub driver_first_name: Option<String>,
    #[serde(alias = "driverLastName")]
    pub driver_last_name: Option<String>,
    #[serde(alias = "driverLicenseNumber")]
    pub driver_license_number: Option<String>,
    #[serde(alias = "driverAge")]
    pub driver_age: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentInput {
    pub card: Option<CardInput>,
    #[serde(alias = "cardNumber")]
    pub card_number: Option<String>,
    #[serde(alias = "cardHolderName")]
    pub card_holder_name: Option<String>,
    #[serde(alias = "cardExpiryMonth")]
    pub card_expiry_month: Option<u8>,
    #[serde(alias = "cardExpiryYear")]
    pub card_expiry_year: Option<u16>,
    #[serde(alias = "cardCvv")]
    pub card_cvv: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CardInput {
    #[serde(alias = "holderName")]
    pub holder_name: String,
    pub number: String,
    #[serde(alias = "expiryMonth")]
    pub expiry_month: u8,
    #[serde(alias = "expiryYear")]
    pub expiry_year: u16,
    pub cvv: Option<String>,
}

impl PaymentInput {
    /// Nested wins over flat. `None` when no card was sent at all.
    pub fn into_card(self) -> Result<Option<CardDetails>, AppError> {
        let card = match self.card {
            Some(nested) => CardDetails {
                holder_name: nested.holder_name,
                number: nested.number,
                expiry_month: nested.expiry_month,
                expiry_year: nested.expiry_year,
                cvv: nested.cvv,
            },
            None => {
                let Some(number) = self.card_number else {
                    return Ok(None);
                };
                let missing = |field: &str| AppError::ValidationError(format!("payment.{} is required", field));
                CardDetails {
                    holder_name: self.card_holder_name.ok_or_else(|| missing("card_holder_name"))?,
                    number,
                    expiry_month: self.card_expiry_month.ok_or_else(|| missing("card_expiry_month"))?,
                    expiry_year: self.card_expiry_year.ok_or_else(|| missing("card_expiry_year"))?,
                    cvv: self.card_cvv,
                }
            }
        };
        validate_card(card).map(Some)
    }
}

fn validate_card(mut card: CardDetails) -> Result<CardDetails, AppError> {
    card.number.retain(|c| !c.is_whitespace() && c != '-');
    if !(12..=19).contains(&card.number.len()) || !card.number.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::ValidationError("card number is invalid".to_string()));
    }
    if !(1..=12).contains(&card.expiry_month) {
        return Err(AppError::ValidationError("card expiry month is invalid".to_string()));
    }
    if card.holder_name.trim().is_empty() {
        return Err(AppError::ValidationError("card holder name is required".to_string()));
    }
    Ok(card)
}

impl FlatDriver {
    fn into_driver(self) -> Result<Option<DriverDetails>, AppError> {
        if self.driver_first_name.is_none() && self.driver_last_name.is_none() && self.driver_license_number.is_none() {
            return Ok(None);
        }
        let missing = |field: &str| AppError::ValidationError(format!("{} is required", field));
        Ok(Some(DriverDetails {
            first_name: self.driver_first_name.ok_or_else(|| missing("driver_first_name"))?,
            last_name: self.driver_last_name.ok_or_else(|| missing("driver_last_name"))?,
            license_number: self.driver_license_number.ok_or_else(|| missing("driver_license_number"))?,
            age: self.driver_age,
        }))
    }
}

impl CreateBookingRequest {
    pub fn into_new_booking(self) -> Result<NewBooking, AppError> {
        let driver = match self.driver {
            Some(nested) => Some(nested),
            None => self.flat_driver.into_driver()?,
        };
        let card = self.payment.into_card()?;

        Ok(NewBooking {
            offer_id: self.offer_id,
            provider: self.provider,
            product_type: self.product_type,
            provider_price: self.price,
            provider_currency: self.price_currency.to_uppercase(),
            currency: self.currency.to_uppercase(),
            contact_email: self.contact_email,
            passenger_info: self.passengers,
            driver,
            card,
            cancellation_deadline: self.cancellation_deadline,
            cancellation_policy: self.cancellation_policy,
            booking_data: self.booking_data,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentIntentRequest {
    pub voucher_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GuestPaymentIntentRequest {
    pub email: String,
    pub voucher_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HotelCancellationRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateMarkupRequest {
    pub product_type: ProductType,
    pub currency: String,
    pub markup_percentage: Decimal,
    pub service_fee_amount: Decimal,
}
