use async_trait::async_trait;
use ebt_catalog::RateCache;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const KEY_PREFIX: &str = "fx:";

/// Exchange-rate cache shared across instances.
///
/// Rates are stored as decimal strings. Redis failures are logged and read as
/// misses, so conversion falls back to the rate source.
#[derive(Clone)]
pub struct RedisRateCache {
    client: redis::Client,
}

impl RedisRateCache {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    fn key(pair: &str) -> String {
        format!("{}{}", KEY_PREFIX, pair)
    }

    async fn read(&self, key: &str) -> redis::RedisResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(Self::key(key)).await
    }

    async fn write(&self, key: &str, rate: Decimal, ttl: Duration) -> redis::RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // SETEX rejects a zero expiry
        let ttl_seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(Self::key(key), rate.to_string(), ttl_seconds).await
    }
}

#[async_trait]
impl RateCache for RedisRateCache {
    async fn get(&self, key: &str) -> Option<Decimal> {
        match self.read(key).await {
            Ok(Some(raw)) => match Decimal::from_str(&raw) {
                Ok(rate) => Some(rate),
                Err(e) => {
                    warn!("Discarding unparsable cached rate for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Rate cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn put(&self, key: &str, rate: Decimal, ttl: Duration) {
        if let Err(e) = self.write(key, rate, ttl).await {
            warn!("Rate cache write failed for {}: {}", key, e);
        }
    }
}
