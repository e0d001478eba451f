use std::time::Duration;

use common_kafka::kafka_consumer::SingleTopicConsumer;
use health::{HealthHandle, HealthRegistry};
use rdkafka::error::KafkaError;

use crate::config::{Config, ProcessingGuarantee};

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub router_liveness: HealthHandle,
    pub kafka_consumer: SingleTopicConsumer,
    pub config: Config,
}

impl AppContext {
    pub fn from_config(config: &Config) -> Result<Self, KafkaError> {
        let health_registry = HealthRegistry::new("liveness");
        let router_liveness =
            health_registry.register("router".to_string(), Duration::from_secs(60));

        let mut consumer_config = config.consumer.clone();
        if config.processing_guarantee() == ProcessingGuarantee::ExactlyOnce {
            // Offsets travel with the transaction, never through the
            // consumer's background commit.
            consumer_config.kafka_consumer_auto_commit = false;
        }

        let kafka_consumer = SingleTopicConsumer::new(config.kafka.clone(), consumer_config)?;

        Ok(Self {
            health_registry,
            router_liveness,
            kafka_consumer,
            config: config.clone(),
        })
    }
}
