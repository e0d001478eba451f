use std::time::Duration;

use health::HealthHandle;
use prost::Message as ProstMessage;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(liveness: HealthHandle) -> Self {
        Self { liveness }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();
    }
}

/// The producer settings shared by the plain and transactional producers.
/// Callers layer their own keys (e.g. `transactional.id`) on top.
pub(crate) fn producer_base_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    client_config
}

/// Probe the brokers with a metadata request, so a bad bootstrap list fails
/// the service at start-up instead of on its first send.
pub(crate) fn ping_brokers<C>(
    producer: &FutureProducer<C>,
    timeout: Duration,
) -> Result<(), KafkaError>
where
    C: rdkafka::ClientContext + 'static,
{
    match producer.client().fetch_metadata(None, timeout) {
        Ok(metadata) => {
            info!(
                brokers = metadata.brokers().len(),
                topics = metadata.topics().len(),
                "Connected to Kafka"
            );
            Ok(())
        }
        Err(e) => {
            error!("Kafka broker metadata probe failed: {e}");
            Err(e)
        }
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let client_config = producer_base_config(config);
    debug!("rdkafka configuration: {:?}", client_config);

    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext { liveness })?;
    ping_brokers(&producer, Duration::from_secs(2))?;

    Ok(producer)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Forward a record byte-for-byte, awaiting broker acknowledgement.
pub async fn send_keyed_bytes<C>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key: Option<&[u8]>,
    payload: &[u8],
) -> Result<(), KafkaProduceError>
where
    C: rdkafka::ClientContext + 'static,
{
    let record = FutureRecord {
        topic,
        payload: Some(payload),
        partition: None,
        key,
        timestamp: None,
        headers: None,
    };

    let delivery = match kafka_producer.send_result(record) {
        Ok(future) => future,
        Err((error, _)) => return Err(KafkaProduceError::KafkaProduceError { error }),
    };

    match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError { error }),
        // Cancelled due to timeout while retrying
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
    }
}

/// Encode a protobuf message and produce it under a string key.
pub async fn send_keyed_proto<C, T>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key: &str,
    message: &T,
) -> Result<(), KafkaProduceError>
where
    C: rdkafka::ClientContext + 'static,
    T: ProstMessage,
{
    let payload = message.encode_to_vec();
    send_keyed_bytes(kafka_producer, topic, Some(key.as_bytes()), &payload).await
}
