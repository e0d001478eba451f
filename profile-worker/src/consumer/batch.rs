use std::sync::Arc;
use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use common_kafka::kafka_messages::profile_sync::ProfileSyncEvent;
use health::HealthHandle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app_context::AppContext;
use crate::consumer::sync_event;
use crate::metric_consts::{BATCH_SYNC_DURATION, BATCH_SYNC_FAILURE, BATCH_SYNC_SUCCESS};
use crate::sync::DocumentStore;
use crate::version_manager::VersionManager;

pub async fn start_batch_consumers(context: Arc<AppContext>, shutdown: watch::Receiver<bool>) {
    let mut workers = Vec::with_capacity(context.config.batch_concurrency);
    for index in 0..context.config.batch_concurrency {
        let consumer = SingleTopicConsumer::new(
            context.config.kafka.clone(),
            ConsumerConfig::for_topic(
                &context.config.batch_consumer_group,
                &context.config.batch_topic,
                true,
            ),
        )
        .expect("failed to create batch consumer");
        let liveness = context
            .health_registry
            .register(format!("batch-{index}"), Duration::from_secs(60));
        workers.push(tokio::spawn(worker_loop(
            context.clone(),
            consumer,
            liveness,
            shutdown.clone(),
            index,
        )));
    }
    for worker in workers {
        let _unused = worker.await;
    }
}

async fn worker_loop(
    context: Arc<AppContext>,
    consumer: SingleTopicConsumer,
    liveness: HealthHandle,
    shutdown: watch::Receiver<bool>,
    index: usize,
) {
    let source = format!("batch-consumer-{index}");
    let store: &dyn DocumentStore = context.document_store.as_ref();
    let versions: &VersionManager = context.version_manager.as_ref();
    let max_poll = context.config.batch_max_poll;
    let poll_wait = Duration::from_millis(context.config.batch_poll_wait_ms);

    info!(index, "Batch consumer started");

    loop {
        liveness.report_healthy();
        if *shutdown.borrow() {
            break;
        }

        let received = consumer
            .recv_proto_batch::<ProfileSyncEvent>(max_poll, poll_wait)
            .await;
        if received.is_empty() {
            continue;
        }

        let timer = common_metrics::timing_guard(BATCH_SYNC_DURATION);

        // One record failing must not take its siblings down with it; there
        // is no retry loop here either, a failed record waits for the next
        // group resumption rather than blocking the partition.
        let mut offsets = Vec::with_capacity(received.len());
        for result in received {
            let (event, offset) = match result {
                Ok(pair) => pair,
                Err(RecvErr::Kafka(e)) => {
                    panic!("Kafka error: {e}")
                }
                Err(err) => {
                    // Poison pill; its offset is already stored.
                    warn!("Skipping undecodable batch record: {:?}", err);
                    continue;
                }
            };

            match sync_event(store, versions, &event, &source).await {
                Ok(_) => {
                    metrics::counter!(BATCH_SYNC_SUCCESS).increment(1);
                }
                Err(e) => {
                    metrics::counter!(BATCH_SYNC_FAILURE).increment(1);
                    error!(
                        user_id = %event.user_id,
                        version = event.version,
                        "Batch sync failed: {}", e
                    );
                }
            }
            offsets.push(offset);
        }

        // Positions move only once every record in the batch is accounted for.
        for offset in offsets {
            offset.store().expect("failed to store offset");
        }
        timer.fin();
    }

    info!(index, "Batch consumer shutting down");
}
