use std::collections::HashMap;
use std::time::Duration;

use rdkafka::{
    consumer::ConsumerGroupMetadata,
    error::KafkaError,
    producer::{FutureProducer, Producer},
    TopicPartitionList,
};
use tracing::debug;

use crate::{
    config::KafkaConfig,
    kafka_consumer::Offset,
    kafka_producer::{ping_brokers, producer_base_config, send_keyed_bytes, KafkaProduceError},
};

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    ConsumerGone,
}

/// A producer whose sends happen inside Kafka transactions, for
/// read-process-write loops that must not duplicate forwarded records.
pub struct TransactionalProducer<C>
where
    C: rdkafka::ClientContext + 'static,
{
    inner: FutureProducer<C>,
    timeout: Duration,
}

impl<C> TransactionalProducer<C>
where
    C: rdkafka::ClientContext + 'static,
{
    pub fn with_context(
        config: &KafkaConfig,
        transactional_id: &str,
        timeout: Duration,
        context: C,
    ) -> Result<Self, KafkaError> {
        let mut client_config = producer_base_config(config);
        client_config.set("transactional.id", transactional_id);

        debug!("rdkafka configuration: {:?}", client_config);
        let api: FutureProducer<C> = client_config.create_with_context(context)?;
        ping_brokers(&api, Duration::from_secs(15))?;

        api.init_transactions(timeout)?;

        Ok(TransactionalProducer {
            inner: api,
            timeout,
        })
    }

    pub fn begin(self) -> Result<KafkaTransaction<C>, KafkaError> {
        self.inner.begin_transaction()?;
        Ok(KafkaTransaction { producer: self })
    }
}

// Transactions are either read-write or write-only; a read-write transaction
// associates the source offsets before committing, so the consumed position
// and the produced records become visible together.
pub struct KafkaTransaction<C>
where
    C: rdkafka::ClientContext + 'static,
{
    producer: TransactionalProducer<C>,
}

impl<C> KafkaTransaction<C>
where
    C: rdkafka::ClientContext + 'static,
{
    pub async fn send_keyed_bytes(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<(), KafkaProduceError> {
        send_keyed_bytes(&self.producer.inner, topic, key, payload).await
    }

    pub fn associate_offsets(
        &self,
        offsets: &[Offset],
        metadata: &ConsumerGroupMetadata,
    ) -> Result<(), TransactionError> {
        // The committed offset is the next one to read, hence the +1.
        let mut next_by_partition: HashMap<(String, i32), i64> = HashMap::new();
        for offset in offsets {
            let (topic, partition, position) =
                offset.position().ok_or(TransactionError::ConsumerGone)?;
            let next = next_by_partition.entry((topic, partition)).or_insert(0);
            *next = (*next).max(position + 1);
        }

        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), next) in next_by_partition {
            tpl.add_partition_offset(&topic, partition, rdkafka::Offset::Offset(next))?;
        }

        self.producer
            .inner
            .send_offsets_to_transaction(&tpl, metadata, self.producer.timeout)?;
        Ok(())
    }

    pub fn commit(self) -> Result<TransactionalProducer<C>, KafkaError> {
        self.producer
            .inner
            .commit_transaction(self.producer.timeout)?;
        Ok(self.producer)
    }

    pub fn abort(self) -> Result<TransactionalProducer<C>, KafkaError> {
        self.producer
            .inner
            .abort_transaction(self.producer.timeout)?;
        Ok(self.producer)
    }
}
