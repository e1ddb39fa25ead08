use async_trait::async_trait;
use ebt_core::notify::Notifier;
use ebt_core::UpstreamError;
use ebt_shared::BookingEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

/// Kafka-backed notifier. Each event goes to its own topic, keyed by booking
/// id so consumers see a booking's events in order.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent {} for {}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send {} for {}: {}", topic, key, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Notifier for EventProducer {
    async fn publish(&self, event: &BookingEvent) -> Result<(), UpstreamError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| UpstreamError::rejected(format!("event serialization failed: {}", e)))?;
        let key = event.booking_id().to_string();

        self.send(event.topic(), &key, &payload)
            .await
            .map_err(|e| UpstreamError::network(e.to_string()))
    }
}
