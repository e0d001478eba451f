use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::{RawRecord, RecvErr};
use common_kafka::kafka_messages::profile_sync::{RoutingProbe, SyncPriority};
use common_kafka::kafka_producer::{create_kafka_producer, send_keyed_bytes, KafkaContext};
use common_kafka::transaction::TransactionalProducer;
use prost::Message;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_context::AppContext;
use crate::config::ProcessingGuarantee;
use crate::metric_consts::{MALFORMED, ROUTED_BATCH, ROUTED_IMMEDIATE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Immediate,
    Batch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classified {
    pub route: Route,
    pub malformed: bool,
}

/// Classify a record by decoding just enough of the value to read its
/// declared priority. Unrecognized priorities and undecodable values go to
/// the batch egress, the recovery default.
pub fn classify(payload: &[u8]) -> Classified {
    match RoutingProbe::decode(payload) {
        Ok(probe) => Classified {
            route: match probe.priority() {
                SyncPriority::Immediate => Route::Immediate,
                SyncPriority::Batch | SyncPriority::Unspecified => Route::Batch,
            },
            malformed: false,
        },
        Err(_) => Classified {
            route: Route::Batch,
            malformed: true,
        },
    }
}

fn record_route(classified: Classified) {
    if classified.malformed {
        metrics::counter!(MALFORMED).increment(1);
    }
    match classified.route {
        Route::Immediate => metrics::counter!(ROUTED_IMMEDIATE).increment(1),
        Route::Batch => metrics::counter!(ROUTED_BATCH).increment(1),
    };
}

fn egress_topic<'a>(context: &'a AppContext, route: Route) -> &'a str {
    match route {
        Route::Immediate => &context.config.immediate_topic,
        Route::Batch => &context.config.batch_topic,
    }
}

pub async fn start_router(context: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    match context.config.processing_guarantee() {
        ProcessingGuarantee::AtLeastOnce => run_at_least_once(context, &mut shutdown).await,
        ProcessingGuarantee::ExactlyOnce => run_exactly_once(context, &mut shutdown).await,
    }
}

/// Forward each record, await broker acknowledgement, then store the source
/// offset. A crash between the send and the store re-forwards the record on
/// restart; downstream version checks make the duplicate harmless.
async fn run_at_least_once(context: Arc<AppContext>, shutdown: &mut watch::Receiver<bool>) {
    let producer_liveness = context
        .health_registry
        .register("producer".to_string(), Duration::from_secs(30));
    let producer = create_kafka_producer(&context.config.kafka, producer_liveness)
        .await
        .expect("failed to create kafka producer");

    info!("Router started (at-least-once)");

    loop {
        context.router_liveness.report_healthy();

        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = context.kafka_consumer.recv_raw() => received,
        };

        let (record, offset) = match received {
            Ok(pair) => pair,
            Err(RecvErr::Kafka(e)) => {
                panic!("Kafka error: {e}")
            }
            Err(err) => {
                // Empty payloads carry nothing to route; the consumer has
                // already stored their offset for us.
                warn!("Skipping unroutable record: {:?}", err);
                continue;
            }
        };

        let classified = classify(&record.payload);
        let topic = egress_topic(&context, classified.route);

        if let Err(e) = forward(&producer, topic, &record).await {
            error!("Failed to forward record to {}: {:?}", topic, e);
            panic!("Failed to forward record to {topic}: {e:?}");
        }

        record_route(classified);
        offset.store().expect("failed to store offset");
    }

    info!("Router shutting down");
}

/// Read-process-write inside a Kafka transaction: the forwarded records and
/// the source offsets commit atomically, so a crash can never double-route.
async fn run_exactly_once(context: Arc<AppContext>, shutdown: &mut watch::Receiver<bool>) {
    let transactional_id = format!("profile-router-{}", Uuid::now_v7());
    let producer_liveness = context
        .health_registry
        .register("producer".to_string(), Duration::from_secs(30));
    let mut producer = TransactionalProducer::with_context(
        &context.config.kafka,
        &transactional_id,
        Duration::from_secs(10),
        KafkaContext::from(producer_liveness),
    )
    .expect("failed to create transactional producer");

    let max_batch = context.config.max_txn_batch;
    let batch_wait = Duration::from_millis(context.config.txn_batch_wait_ms);

    info!(transactional_id, "Router started (exactly-once)");

    loop {
        context.router_liveness.report_healthy();

        if *shutdown.borrow() {
            break;
        }

        let mut records = Vec::with_capacity(max_batch);
        let mut offsets = Vec::with_capacity(max_batch);
        let deadline = tokio::time::Instant::now() + batch_wait;

        while records.len() < max_batch {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                received = context.kafka_consumer.recv_raw() => received,
            };
            match received {
                Ok((record, offset)) => {
                    records.push(record);
                    offsets.push(offset);
                }
                Err(RecvErr::Kafka(e)) => {
                    panic!("Kafka error: {e}")
                }
                Err(err) => {
                    warn!("Skipping unroutable record: {:?}", err);
                    continue;
                }
            }
        }

        if records.is_empty() {
            continue;
        }

        let txn = producer.begin().expect("failed to begin kafka transaction");

        let mut classifications = Vec::with_capacity(records.len());
        for record in &records {
            let classified = classify(&record.payload);
            let topic = egress_topic(&context, classified.route);
            if let Err(e) = txn.send_keyed_bytes(topic, record.key.as_deref(), &record.payload).await
            {
                error!("Failed to forward record to {}: {:?}", topic, e);
                panic!("Failed to forward record to {topic}: {e:?}");
            }
            classifications.push(classified);
        }

        let metadata = context
            .kafka_consumer
            .group_metadata()
            .expect("consumer group metadata unavailable");
        txn.associate_offsets(&offsets, &metadata)
            .expect("failed to associate offsets with kafka transaction");

        producer = txn.commit().expect("failed to commit kafka transaction");

        // Counters only after the commit, so aborted transactions never count.
        for classified in classifications {
            record_route(classified);
        }
    }

    info!("Router shutting down");
}

async fn forward(
    producer: &rdkafka::producer::FutureProducer<KafkaContext>,
    topic: &str,
    record: &RawRecord,
) -> Result<(), common_kafka::kafka_producer::KafkaProduceError> {
    send_keyed_bytes(producer, topic, record.key.as_deref(), &record.payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kafka::kafka_messages::profile_sync::{ProfileSyncEvent, SyncPriority};
    use prost::Message;

    fn encoded(priority: SyncPriority) -> Vec<u8> {
        ProfileSyncEvent {
            user_id: "user-123".to_string(),
            priority: priority as i32,
            version: 1,
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[test]
    fn immediate_events_route_to_immediate() {
        let classified = classify(&encoded(SyncPriority::Immediate));
        assert_eq!(classified.route, Route::Immediate);
        assert!(!classified.malformed);
    }

    #[test]
    fn batch_events_route_to_batch() {
        let classified = classify(&encoded(SyncPriority::Batch));
        assert_eq!(classified.route, Route::Batch);
        assert!(!classified.malformed);
    }

    #[test]
    fn unspecified_priority_routes_to_batch() {
        let classified = classify(&encoded(SyncPriority::Unspecified));
        assert_eq!(classified.route, Route::Batch);
        assert!(!classified.malformed);
    }

    #[test]
    fn malformed_payloads_route_to_batch() {
        // A lone 0xFF is not a valid field header.
        let classified = classify(&[0xFF]);
        assert_eq!(classified.route, Route::Batch);
        assert!(classified.malformed);
    }

    #[test]
    fn routing_split_counts_match() {
        let stream = vec![
            encoded(SyncPriority::Immediate),
            encoded(SyncPriority::Immediate),
            encoded(SyncPriority::Batch),
            vec![0xFF],
        ];

        let classified: Vec<_> = stream.iter().map(|p| classify(p)).collect();
        let immediate = classified
            .iter()
            .filter(|c| c.route == Route::Immediate)
            .count();
        let batch = classified.iter().filter(|c| c.route == Route::Batch).count();
        let malformed = classified.iter().filter(|c| c.malformed).count();

        assert_eq!(immediate, 2);
        assert_eq!(batch, 2);
        assert_eq!(malformed, 1);
    }
}
