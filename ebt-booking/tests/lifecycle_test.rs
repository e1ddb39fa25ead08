use async_trait::async_trait;
use chrono::{Duration, Utc};
use ebt_booking::*;
use ebt_catalog::currency::{CurrencyConverter, InMemoryRateCache, StaticRateSource, DEFAULT_RATE_TTL};
use ebt_catalog::{DiscountRule, InMemoryMarkupConfigs, MarkupConfig, MarkupConfigRepository, PricingEngine, Voucher, VoucherEngine};
use ebt_core::notify::Notifier;
use ebt_core::payment::{ChargeType, MockPaymentProcessor};
use ebt_core::supplier::{CardDetails, InventoryRouter, MockInventoryProvider};
use ebt_core::vault::CardVault;
use ebt_core::{Actor, CoreError, UpstreamError};
use ebt_shared::{BookingEvent, ProductType, Provider};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<BookingEvent>>,
}

impl RecordingNotifier {
    async fn topics(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.topic()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: &BookingEvent) -> Result<(), UpstreamError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

struct World {
    engine: BookingEngine,
    processor: Arc<MockPaymentProcessor>,
    amadeus: Arc<MockInventoryProvider>,
    duffel: Arc<MockInventoryProvider>,
    notifier: Arc<RecordingNotifier>,
}

fn card(number: &str) -> CardDetails {
    CardDetails {
        holder_name: "Ada Lovelace".to_string(),
        number: number.to_string(),
        expiry_month: 12,
        expiry_year: 2030,
        cvv: Some("123".to_string()),
    }
}

async fn world(strategy: ChargingStrategy) -> World {
    let vault = CardVault::from_key(&[9u8; 32]).unwrap();

    let mut rates = HashMap::new();
    rates.insert("USD".to_string(), dec!(1.25));
    let converter = CurrencyConverter::new(
        Arc::new(StaticRateSource::new("EUR", rates)),
        Arc::new(InMemoryRateCache::new()),
        DEFAULT_RATE_TTL,
        dec!(2),
    )
    .unwrap();
    let markups = Arc::new(InMemoryMarkupConfigs::new());
    for product_type in [ProductType::Hotel, ProductType::FlightInternational] {
        markups
            .activate(MarkupConfig::new(product_type, "EUR", dec!(10), dec!(10)).unwrap())
            .await
            .unwrap();
    }
    let pricing = Arc::new(PricingEngine::new(Arc::new(converter), markups));

    let vouchers = Arc::new(VoucherEngine::new());
    vouchers
        .add_voucher(Voucher::new("TEN", DiscountRule::Percentage { percentage: dec!(10) }))
        .await;
    vouchers
        .add_voucher(Voucher::new("FREE", DiscountRule::Percentage { percentage: dec!(100) }))
        .await;

    let processor = Arc::new(MockPaymentProcessor::new());
    let amadeus = Arc::new(MockInventoryProvider::new(Provider::Amadeus));
    let duffel = Arc::new(MockInventoryProvider::new(Provider::Duffel));
    let inventory = InventoryRouter::new()
        .with_provider(Provider::Amadeus, amadeus.clone())
        .with_provider(Provider::Duffel, duffel.clone());
    let notifier = Arc::new(RecordingNotifier::default());
    let settlement = SettlementGateway::new(processor.clone(), strategy);

    let bookings: Arc<dyn BookingRepository> = Arc::new(InMemoryBookingRepository::new());
    let cancellations = Arc::new(CancellationQueue::new(
        bookings.clone(),
        Arc::new(InMemoryCancellationRequests::new()),
        inventory.clone(),
        settlement.clone(),
        notifier.clone(),
    ));
    let agency_card = Some(vault.encrypt_card(&card("4242424242424242")).unwrap());

    let engine = BookingEngine::new(BookingDeps {
        bookings,
        pricing,
        vault,
        settlement,
        inventory,
        vouchers,
        notifier: notifier.clone(),
        cancellations,
        agency_card,
    });
    World { engine, processor, amadeus, duffel, notifier }
}

/// Amadeus hotel at 400 EUR: markup 40, fee 10, total 450.
fn hotel(deadline_in: Duration) -> NewBooking {
    NewBooking {
        offer_id: "hotel-offer-1".to_string(),
        provider: Provider::Amadeus,
        product_type: ProductType::Hotel,
        provider_price: dec!(400),
        provider_currency: "EUR".to_string(),
        currency: "EUR".to_string(),
        contact_email: "ada@example.com".to_string(),
        passenger_info: serde_json::json!([{ "first_name": "Ada", "last_name": "Lovelace" }]),
        driver: None,
        card: Some(card("4111111111111111")),
        cancellation_deadline: Some(Utc::now() + deadline_in),
        cancellation_policy: serde_json::json!({ "free_until": "deadline" }),
        booking_data: serde_json::json!({}),
    }
}

fn customer() -> Actor {
    Actor::customer("user-1")
}

async fn confirmed_hotel(world: &World, deadline_in: Duration, voucher: Option<&str>) -> Booking {
    let booking = world.engine.create(hotel(deadline_in), &customer()).await.unwrap();
    let issued = world
        .engine
        .issue_payment_intent(booking.id, &customer(), voucher.map(String::from))
        .await
        .unwrap();
    let intent_id = issued.payment_intent_id.unwrap();
    world.engine.confirm_after_payment(booking.id, &intent_id).await.unwrap()
}

/// Duffel flight under the merchant strategy, 100 USD.
fn flight() -> NewBooking {
    let mut input = hotel(Duration::days(3));
    input.provider = Provider::Duffel;
    input.product_type = ProductType::FlightInternational;
    input.card = None;
    input.provider_price = dec!(100);
    input.provider_currency = "USD".to_string();
    input
}

#[tokio::test]
async fn test_create_prices_and_stores_card_encrypted() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.base_price, dec!(400));
    assert_eq!(booking.markup_amount, dec!(40));
    assert_eq!(booking.service_fee, dec!(10));
    assert_eq!(booking.total_amount, booking.base_price + booking.markup_amount + booking.service_fee);
    assert_eq!(booking.final_amount, booking.total_amount);
    assert!(models::is_valid_reference(&booking.reference));
    assert_eq!(booking.card_last4.as_deref(), Some("1111"));
    let blob = booking.encrypted_card.as_deref().unwrap();
    assert!(!blob.contains("4111111111111111"));
    assert!(world.processor.intents().await.is_empty());
}

#[tokio::test]
async fn test_create_without_active_markup_is_not_found() {
    let world = world(ChargingStrategy::GuestCard).await;
    let mut input = hotel(Duration::days(3));
    input.currency = "GBP".to_string();
    let err = world.engine.create(input, &customer()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_voucher_is_snapshotted_and_margin_prorated() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();

    let issued = world
        .engine
        .issue_payment_intent(booking.id, &customer(), Some("ten".to_string()))
        .await
        .unwrap();

    assert_eq!(issued.booking.voucher_discount, dec!(45));
    assert_eq!(issued.booking.final_amount, issued.booking.total_amount - dec!(45));
    assert_eq!(issued.charge_type, ChargeType::MarkupAndFeesOnly);
    // 50 * (1 - 45/450)
    assert_eq!(issued.amount_minor, 4500);
    assert_eq!(issued.booking.status, BookingStatus::PaymentPending);
    assert_eq!(issued.booking.payment_status, PaymentStatus::Processing);
    assert_eq!(issued.booking.payment_reference, issued.payment_intent_id);
}

#[tokio::test]
async fn test_failed_intent_keeps_booking_pending_with_voucher_reserved() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    world.processor.fail_intents(true);

    let err = world
        .engine
        .issue_payment_intent(booking.id, &customer(), Some("TEN".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Upstream { .. }));

    let stored = world.engine.get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(stored.voucher_code.as_deref(), Some("TEN"));
    assert!(stored.payment_reference.is_none());

    // Retrying with the same code does not consume the voucher again.
    world.processor.fail_intents(false);
    let issued = world
        .engine
        .issue_payment_intent(booking.id, &customer(), Some("TEN".to_string()))
        .await
        .unwrap();
    assert_eq!(issued.booking.voucher_discount, dec!(45));
}

#[tokio::test]
async fn test_confirmation_is_idempotent() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Completed);
    assert!(booking.provider_booking_id.is_some());
    assert!(booking.encrypted_card.is_none());
    assert_eq!(booking.card_last4.as_deref(), Some("1111"));
    assert_eq!(world.amadeus.order_payments().await, vec!["GUEST_CARD:1111".to_string()]);

    let intent_id = booking.payment_reference.clone().unwrap();
    let again = world.engine.confirm_after_payment(booking.id, &intent_id).await.unwrap();
    assert_eq!(again.provider_booking_id, booking.provider_booking_id);
    assert_eq!(world.amadeus.created_orders().await.len(), 1);
    assert_eq!(world.processor.intents().await.len(), 1);
    assert!(world.notifier.topics().await.contains(&"booking.confirmed"));
}

#[tokio::test]
async fn test_paid_booking_cannot_be_charged_again() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;
    let err = world
        .engine
        .issue_payment_intent(booking.id, &customer(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
}

#[tokio::test]
async fn test_order_failure_leaves_booking_unconfirmed_and_flagged() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    let issued = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    world.amadeus.fail_create(true);

    let intent_id = issued.payment_intent_id.unwrap();
    let err = world.engine.confirm_after_payment(booking.id, &intent_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Upstream { .. }));

    let stored = world.engine.get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::PaymentPending);
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert!(stored.provider_booking_id.is_none());
    assert!(stored.encrypted_card.is_some());
    assert!(stored.fulfilment_claimed_at.is_none());
    assert!(world.notifier.topics().await.contains(&"booking.reconciliation_required"));

    // Manual retry once the provider recovers; operators only.
    world.amadeus.fail_create(false);
    let denied = world.engine.retry_fulfilment(booking.id, &customer()).await;
    assert!(matches!(denied, Err(CoreError::Forbidden(_))));
    let confirmed = world
        .engine
        .retry_fulfilment(booking.id, &Actor::admin("ops-1"))
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(world.amadeus.created_orders().await.len(), 1);
}

#[tokio::test]
async fn test_unpaid_booking_cannot_be_fulfilled_manually() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();

    let err = world
        .engine
        .retry_fulfilment(booking.id, &Actor::admin("ops-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
    assert!(world.amadeus.created_orders().await.is_empty());
}

#[tokio::test]
async fn test_payment_failure_keeps_booking_payable() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    let first = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();

    let failed = world
        .engine
        .record_payment_failure(booking.id, first.payment_intent_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    let issued = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    assert_eq!(issued.booking.payment_status, PaymentStatus::Processing);
    assert_eq!(world.processor.intents().await.len(), 2);
}

#[tokio::test]
async fn test_pre_deadline_cancel_refunds_margin_only() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;

    let outcome = world.engine.cancel(booking.id, &customer()).await.unwrap();
    let CancellationOutcome::Cancelled { booking: cancelled } = outcome else {
        panic!("expected immediate cancellation");
    };
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.refund_amount, Some(dec!(50)));
    assert_eq!(cancelled.refund_status, Some(RefundStatus::Completed));
    assert_eq!(world.processor.refunds().await[0].amount_minor, 5000);
    assert_eq!(world.amadeus.cancelled_orders().await.len(), 1);
}

#[tokio::test]
async fn test_pre_deadline_cancel_with_voucher_prorates_refund() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), Some("TEN")).await;

    world.engine.cancel(booking.id, &customer()).await.unwrap();
    let refunds = world.processor.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount_minor, 4500);
}

#[tokio::test]
async fn test_provider_cancel_failure_aborts_cancellation() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;
    world.amadeus.fail_cancel(true);

    let err = world.engine.cancel(booking.id, &customer()).await.unwrap_err();
    assert!(matches!(err, CoreError::Upstream { .. }));
    assert_eq!(world.engine.get(booking.id).await.unwrap().status, BookingStatus::Confirmed);
    assert!(world.processor.refunds().await.is_empty());
}

#[tokio::test]
async fn test_refund_failure_still_cancels_for_manual_follow_up() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;
    world.processor.fail_refunds(true);

    world.engine.cancel(booking.id, &customer()).await.unwrap();
    let stored = world.engine.get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(stored.refund_status, Some(RefundStatus::Processing));
}

#[tokio::test]
async fn test_post_deadline_cancel_is_queued_once() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::hours(-1), None).await;

    let first = world.engine.cancel(booking.id, &customer()).await.unwrap();
    let second = world.engine.cancel(booking.id, &customer()).await.unwrap();
    let (CancellationOutcome::Requested { request: a, message }, CancellationOutcome::Requested { request: b, .. }) =
        (first, second)
    else {
        panic!("expected queued requests");
    };
    assert_eq!(a.id, b.id);
    assert!(message.contains("3-5 business days"));

    let pending = world.engine.cancellations().list_pending(&Actor::admin("admin-1")).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(world.processor.refunds().await.is_empty());
    assert!(world.amadeus.cancelled_orders().await.is_empty());
    assert_eq!(world.engine.get(booking.id).await.unwrap().status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_processing_a_request_twice_refunds_once() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::hours(-1), Some("TEN")).await;
    let CancellationOutcome::Requested { request, .. } = world.engine.cancel(booking.id, &customer()).await.unwrap()
    else {
        panic!("expected queued request");
    };

    let admin = Actor::admin("admin-1");
    let full = ProcessRequest {
        action: CancellationAction::FullRefund,
        refund_amount: None,
        admin_notes: Some("goodwill".to_string()),
        rejection_reason: None,
    };
    let outcome = world
        .engine
        .cancellations()
        .process_request(request.id, &admin, full.clone())
        .await
        .unwrap();
    assert_eq!(outcome.request.status, CancellationRequestStatus::Approved);
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    assert_eq!(outcome.booking.refund_amount, Some(dec!(45)));

    let err = world
        .engine
        .cancellations()
        .process_request(request.id, &admin, full)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
    assert_eq!(world.processor.refunds().await.len(), 1);
}

#[tokio::test]
async fn test_hotel_cancellation_request_goes_to_review() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;
    let outcome = world
        .engine
        .request_hotel_cancellation(booking.id, &customer(), Some("change of plans".to_string()))
        .await
        .unwrap();
    assert!(matches!(outcome, CancellationOutcome::Requested { .. }));
    assert!(world.notifier.topics().await.contains(&"booking.cancellation_requested"));
}

#[tokio::test]
async fn test_merchant_flight_charges_full_and_pays_with_agency_card() {
    let world = world(ChargingStrategy::Merchant).await;
    let booking = world.engine.create(flight(), &customer()).await.unwrap();

    // 100 USD -> 80 EUR, +2% fee = 81.60, +10% = 8.16, +10 fee
    assert_eq!(booking.base_price, dec!(81.60));
    assert_eq!(booking.total_amount, dec!(99.76));

    let issued = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    assert_eq!(issued.charge_type, ChargeType::FullBookingAmount);
    assert_eq!(issued.amount_minor, 9976);

    let intent_id = issued.payment_intent_id.unwrap();
    world.engine.confirm_after_payment(booking.id, &intent_id).await.unwrap();
    assert_eq!(world.duffel.order_payments().await, vec!["AGENCY_CARD:4242".to_string()]);
}

#[tokio::test]
async fn test_other_customers_are_forbidden() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = confirmed_hotel(&world, Duration::days(3), None).await;
    let err = world
        .engine
        .cancel(booking.id, &Actor::customer("someone-else"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    let err = world.engine.dispute_evidence(booking.id, &customer()).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));
    let evidence = world
        .engine
        .dispute_evidence(booking.id, &Actor::admin("admin-1"))
        .await
        .unwrap();
    assert_eq!(evidence.booking_reference, booking.reference);
    assert_eq!(evidence.guest_name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn test_guest_checkout_by_reference_and_email() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world
        .engine
        .create(hotel(Duration::days(3)), &Actor::guest("ada@example.com"))
        .await
        .unwrap();
    assert!(booking.user_id.is_none());

    let err = world
        .engine
        .issue_guest_payment_intent(&booking.reference, "mallory@example.com", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let issued = world
        .engine
        .issue_guest_payment_intent(&booking.reference, "ADA@example.com", None)
        .await
        .unwrap();
    assert_eq!(issued.amount, Decimal::from(50));
}

#[tokio::test]
async fn test_concurrent_confirmations_place_one_order() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    let issued = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    let intent_id = issued.payment_intent_id.unwrap();
    world.amadeus.delay_orders(std::time::Duration::from_millis(200));

    // The redelivery lands while the first delivery is still waiting on the provider.
    let (first, second) = tokio::join!(
        world.engine.confirm_after_payment(booking.id, &intent_id),
        async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            world.engine.confirm_after_payment(booking.id, &intent_id).await
        }
    );
    let confirmed = first.unwrap();
    assert!(matches!(second, Err(CoreError::Conflict(_))));
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert!(confirmed.fulfilment_claimed_at.is_none());
    assert_eq!(world.amadeus.created_orders().await.len(), 1);

    // Once the first delivery finished, a late redelivery is a no-op.
    let late = world.engine.confirm_after_payment(booking.id, &intent_id).await.unwrap();
    assert_eq!(late.provider_booking_id, confirmed.provider_booking_id);
    assert_eq!(world.amadeus.created_orders().await.len(), 1);
}

#[tokio::test]
async fn test_reissued_intent_cancels_the_previous_one() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    let first = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    let second = world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();

    assert_eq!(first.payment_intent_id.as_deref(), Some("mock_pi_1"));
    assert_eq!(second.booking.payment_reference.as_deref(), Some("mock_pi_2"));
    assert_eq!(world.processor.cancelled_intents().await, vec!["mock_pi_1".to_string()]);
}

#[tokio::test]
async fn test_payment_through_superseded_intent_is_refunded_against_it() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();

    // The customer had already paid the first intent before it was replaced.
    let confirmed = world.engine.confirm_after_payment(booking.id, "mock_pi_1").await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_reference.as_deref(), Some("mock_pi_1"));

    // A second payment does not place another order; it is flagged instead.
    let again = world.engine.confirm_after_payment(booking.id, "mock_pi_2").await.unwrap();
    assert_eq!(again.payment_reference.as_deref(), Some("mock_pi_1"));
    assert_eq!(world.amadeus.created_orders().await.len(), 1);
    assert!(world.notifier.topics().await.contains(&"booking.reconciliation_required"));

    world.engine.cancel(booking.id, &customer()).await.unwrap();
    let refunds = world.processor.refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_intent_id, "mock_pi_1");
}

#[tokio::test]
async fn test_failure_of_superseded_intent_is_ignored() {
    let world = world(ChargingStrategy::GuestCard).await;
    let booking = world.engine.create(hotel(Duration::days(3)), &customer()).await.unwrap();
    world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();
    world.engine.issue_payment_intent(booking.id, &customer(), None).await.unwrap();

    let stored = world.engine.record_payment_failure(booking.id, "mock_pi_1").await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Processing);
    assert_eq!(stored.payment_reference.as_deref(), Some("mock_pi_2"));
}

#[tokio::test]
async fn test_fully_discounted_booking_confirms_without_payment() {
    let world = world(ChargingStrategy::Merchant).await;
    let booking = world.engine.create(flight(), &customer()).await.unwrap();

    let issued = world
        .engine
        .issue_payment_intent(booking.id, &customer(), Some("FREE".to_string()))
        .await
        .unwrap();
    assert_eq!(issued.amount_minor, 0);
    assert!(issued.payment_intent_id.is_none());
    assert!(issued.client_secret.is_none());
    assert_eq!(issued.booking.status, BookingStatus::Confirmed);
    assert_eq!(issued.booking.payment_status, PaymentStatus::Completed);
    assert_eq!(issued.booking.final_amount, Decimal::ZERO);
    assert!(world.processor.intents().await.is_empty());
    assert_eq!(world.duffel.created_orders().await.len(), 1);

    let CancellationOutcome::Cancelled { booking: cancelled } =
        world.engine.cancel(booking.id, &customer()).await.unwrap()
    else {
        panic!("expected immediate cancellation");
    };
    assert_eq!(cancelled.refund_amount, Some(Decimal::ZERO));
    assert_eq!(cancelled.refund_status, Some(RefundStatus::Completed));
    assert!(world.processor.refunds().await.is_empty());
}

#[tokio::test]
async fn test_guest_card_booking_requires_card() {
    let guest_card = world(ChargingStrategy::GuestCard).await;
    let mut input = hotel(Duration::days(3));
    input.card = None;

    let err = guest_card.engine.create(input, &customer()).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // Merchant bookings are paid by the agency and need no guest card.
    let merchant = world(ChargingStrategy::Merchant).await;
    let mut input = hotel(Duration::days(3));
    input.card = None;
    assert!(merchant.engine.create(input, &customer()).await.is_ok());
}
