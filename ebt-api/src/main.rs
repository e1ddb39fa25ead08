use anyhow::Context;
use ebt_api::middleware::Resiliency;
use ebt_api::{app, AppState, AuthConfig};
use ebt_booking::{BookingDeps, BookingEngine, BookingRepository, CancellationQueue, ReconciliationScanner, SettlementGateway};
use ebt_catalog::currency::{CurrencyConverter, InMemoryRateCache, RateCache, StaticRateSource};
use ebt_catalog::{MarkupConfigRepository, PricingEngine, SearchService, VoucherEngine};
use ebt_core::notify::{LogNotifier, Notifier};
use ebt_core::payment::MockPaymentProcessor;
use ebt_core::supplier::{InventoryRouter, MockInventoryProvider};
use ebt_core::vault::CardVault;
use ebt_shared::Provider;
use ebt_store::{
    Config, DbClient, EventProducer, PgBookingRepository, PgCancellationRequestRepository,
    PgMarkupConfigRepository, RedisRateCache,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ebt_api=debug,ebt_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    tracing::info!("Starting EBT API on port {} ({})", config.server.port, config.run_mode);

    let vault = CardVault::from_settings(&config.vault, config.is_production())?;
    let strategy = config.charging_strategy()?;

    let db = DbClient::new(&config.database.url)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;

    let rate_cache: Arc<dyn RateCache> = match config.redis.url.as_deref() {
        Some(url) => Arc::new(RedisRateCache::new(url).context("invalid Redis URL")?),
        None => {
            tracing::warn!("No redis.url configured, exchange rates are cached per instance");
            Arc::new(InMemoryRateCache::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match config.kafka.brokers.as_deref() {
        Some(brokers) => Arc::new(EventProducer::new(brokers).context("failed to create Kafka producer")?),
        None => {
            tracing::warn!("No kafka.brokers configured, booking events are only logged");
            Arc::new(LogNotifier)
        }
    };

    let converter = CurrencyConverter::new(
        Arc::new(StaticRateSource::new(&config.rates.base, config.rates.table.clone())),
        rate_cache,
        Duration::from_secs(config.payments.rate_cache_ttl_seconds),
        config.payments.conversion_fee_percentage,
    )?;
    let markups: Arc<dyn MarkupConfigRepository> = Arc::new(PgMarkupConfigRepository::new(db.pool.clone()));
    let pricing = Arc::new(PricingEngine::new(Arc::new(converter), markups.clone()));

    // Provider and processor wire clients live outside this service.
    if config.is_production() {
        tracing::warn!("Running with in-process inventory and payment adapters");
    }
    let inventory = InventoryRouter::new()
        .with_provider(Provider::Amadeus, Arc::new(MockInventoryProvider::new(Provider::Amadeus)))
        .with_provider(Provider::Duffel, Arc::new(MockInventoryProvider::new(Provider::Duffel)));
    let settlement = SettlementGateway::new(Arc::new(MockPaymentProcessor::new()), strategy);
    if config.payments.agency_card.is_none() {
        tracing::warn!("No payments.agency_card configured, merchant orders use provider balance payment");
    }
    if config.payments.webhook_secret.is_none() {
        tracing::warn!("No payments.webhook_secret configured, webhook signatures are not verified");
    }

    let bookings: Arc<dyn BookingRepository> = Arc::new(PgBookingRepository::new(db.pool.clone()));
    let cancellations = Arc::new(CancellationQueue::new(
        bookings.clone(),
        Arc::new(PgCancellationRequestRepository::new(db.pool.clone())),
        inventory.clone(),
        settlement.clone(),
        notifier.clone(),
    ));

    let engine = Arc::new(BookingEngine::new(BookingDeps {
        bookings: bookings.clone(),
        pricing: pricing.clone(),
        vault,
        settlement,
        inventory: inventory.clone(),
        vouchers: Arc::new(VoucherEngine::new()),
        notifier: notifier.clone(),
        cancellations,
        agency_card: config.payments.agency_card.clone(),
    }));

    let reconciliation = Arc::new(ReconciliationScanner::new(
        bookings,
        notifier,
        chrono::Duration::minutes(config.reconciliation.stale_after_minutes),
    ));
    tokio::spawn(ebt_api::worker::start_reconciliation_worker(
        reconciliation.clone(),
        Duration::from_secs(config.reconciliation.interval_seconds),
    ));

    let app_state = AppState {
        engine,
        search: Arc::new(SearchService::new(inventory, pricing)),
        markups,
        reconciliation,
        resiliency: Arc::new(Resiliency::default()),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        webhook_secret: config.payments.webhook_secret.clone(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}
