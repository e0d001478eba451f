use std::sync::{Arc, Weak};
use std::time::Duration;

use prost::Message as ProstMessage;
use rdkafka::{
    consumer::{Consumer, ConsumerGroupMetadata, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::{ConsumerConfig, KafkaConfig};

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

/// A raw record as read from the topic: key and value bytes, untouched.
pub struct RawRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            );

        // Offsets are always stored explicitly, once the record is accounted
        // for; the background commit (when enabled) only commits stored ones.
        client_config.set("enable.auto.offset.store", "false");
        client_config.set(
            "enable.auto.commit",
            consumer_config.kafka_consumer_auto_commit.to_string(),
        );
        client_config.set(
            "auto.commit.interval.ms",
            consumer_config
                .kafka_consumer_auto_commit_interval_ms
                .to_string(),
        );

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn group_metadata(&self) -> Option<ConsumerGroupMetadata> {
        self.inner.consumer.group_metadata()
    }

    /// Receive one record without touching its bytes. Empty payloads are
    /// poison pills: their offset is auto-stored, panicking on failure.
    pub async fn recv_raw(&self) -> Result<(RawRecord, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            offset.store().unwrap();
            return Err(RecvErr::Empty);
        };

        let record = RawRecord {
            key: message.key().map(|k| k.to_vec()),
            payload: payload.to_vec(),
        };

        Ok((record, offset))
    }

    /// Receive one record and decode its value as a protobuf message.
    /// Undecodable payloads are poison pills, same as empty ones.
    pub async fn recv_proto<T>(&self) -> Result<(T, Offset), RecvErr>
    where
        T: ProstMessage + Default,
    {
        let (record, offset) = self.recv_raw().await?;

        let decoded = match T::decode(record.payload.as_slice()) {
            Ok(d) => d,
            Err(e) => {
                offset.store().unwrap();
                return Err(RecvErr::Decode(e));
            }
        };

        Ok((decoded, offset))
    }

    /// Receive up to `max` records, waiting at most `wait` overall. Returns
    /// early with fewer (possibly zero) records when the window elapses, or
    /// right after a broker error so the caller can decide what to do.
    pub async fn recv_proto_batch<T>(
        &self,
        max: usize,
        wait: Duration,
    ) -> Vec<Result<(T, Offset), RecvErr>>
    where
        T: ProstMessage + Default,
    {
        let deadline = tokio::time::Instant::now() + wait;
        let mut received = Vec::with_capacity(max);

        while received.len() < max {
            match tokio::time::timeout_at(deadline, self.recv_proto::<T>()).await {
                Ok(result) => {
                    let broker_error = matches!(&result, Err(RecvErr::Kafka(_)));
                    received.push(result);
                    if broker_error {
                        break;
                    }
                }
                Err(_elapsed) => break,
            }
        }

        received
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    pub(crate) fn position(&self) -> Option<(String, i32, i64)> {
        let inner = self.handle.upgrade()?;
        Some((inner.topic.clone(), self.partition, self.offset))
    }
}
