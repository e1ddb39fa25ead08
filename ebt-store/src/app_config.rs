use ebt_booking::ChargingStrategy;
use ebt_core::vault::VaultSettings;
use ebt_core::CoreResult;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub vault: VaultSettings,
    pub rates: RatesConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(skip)]
    pub run_mode: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Enables the shared rate cache when set.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// Enables the Kafka notifier when set.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// "merchant" or "guest_card"
    #[serde(default = "default_model")]
    pub model: String,
    pub conversion_fee_percentage: Decimal,
    #[serde(default = "default_rate_ttl")]
    pub rate_cache_ttl_seconds: u64,
    pub webhook_secret: Option<String>,
    /// Vault ciphertext of the operator's card.
    pub agency_card: Option<String>,
}

fn default_model() -> String {
    "merchant".to_string()
}

fn default_rate_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RatesConfig {
    pub base: String,
    #[serde(default)]
    pub table: HashMap<String, Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub interval_seconds: u64,
    pub stale_after_minutes: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            stale_after_minutes: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. EBT__PAYMENTS__MODEL=guest_card
            .add_source(config::Environment::with_prefix("EBT").separator("__"))
            .build()?;

        let mut config: Config = s.try_deserialize()?;
        config.run_mode = run_mode;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.run_mode.eq_ignore_ascii_case("production")
    }

    pub fn charging_strategy(&self) -> CoreResult<ChargingStrategy> {
        self.payments.model.parse()
    }
}
