use std::sync::Arc;
use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use common_kafka::kafka_messages::profile_sync::ProfileSyncEvent;
use common_kafka::kafka_producer::send_keyed_proto;
use health::HealthHandle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app_context::AppContext;
use crate::config::Config;
use crate::consumer::sync_event;
use crate::metric_consts::{
    IMMEDIATE_SYNC_DURATION, IMMEDIATE_SYNC_FALLBACK, IMMEDIATE_SYNC_FALLBACK_FAILED,
    IMMEDIATE_SYNC_SUCCESS,
};
use crate::sync::{ApplyOutcome, DocumentStore};
use crate::version_manager::VersionManager;

const POLL_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Apply attempts per record before demotion.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.immediate_retries,
            initial_backoff: Duration::from_millis(config.immediate_backoff_ms),
            backoff_factor: config.immediate_backoff_factor,
        }
    }

    /// The pause after a given (1-based) failed attempt.
    pub fn backoff_interval(&self, attempt: u32) -> Duration {
        self.initial_backoff * self.backoff_factor.pow(attempt.saturating_sub(1))
    }
}

/// What the consumer should do with the record: it either synced (applied
/// or superseded), or exhausted its attempts and belongs on the batch
/// egress now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmediateOutcome {
    Processed(ApplyOutcome),
    Demote,
}

pub async fn handle_event(
    store: &dyn DocumentStore,
    versions: &VersionManager,
    event: &ProfileSyncEvent,
    policy: &RetryPolicy,
    source: &str,
) -> ImmediateOutcome {
    for attempt in 1..=policy.attempts {
        match sync_event(store, versions, event, source).await {
            Ok(outcome) => return ImmediateOutcome::Processed(outcome),
            Err(e) => {
                warn!(
                    user_id = %event.user_id,
                    version = event.version,
                    attempt,
                    "Immediate sync failed: {}", e
                );
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.backoff_interval(attempt)).await;
                }
            }
        }
    }
    ImmediateOutcome::Demote
}

pub async fn start_immediate_consumers(context: Arc<AppContext>, shutdown: watch::Receiver<bool>) {
    let mut workers = Vec::with_capacity(context.config.immediate_concurrency);
    for index in 0..context.config.immediate_concurrency {
        let consumer = SingleTopicConsumer::new(
            context.config.kafka.clone(),
            ConsumerConfig::for_topic(
                &context.config.immediate_consumer_group,
                &context.config.immediate_topic,
                true,
            ),
        )
        .expect("failed to create immediate consumer");
        let liveness = context
            .health_registry
            .register(format!("immediate-{index}"), Duration::from_secs(60));
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
    let policy = RetryPolicy::from_config(&context.config);
    let source = format!("immediate-consumer-{index}");
    let store: &dyn DocumentStore = context.document_store.as_ref();
    let versions: &VersionManager = context.version_manager.as_ref();

    info!(index, "Immediate consumer started");

    loop {
        liveness.report_healthy();
        if *shutdown.borrow() {
            break;
        }

        // Latency-critical records are taken one at a time; a slow record
        // never holds siblings hostage beyond its own partition.
        let received = consumer
            .recv_proto_batch::<ProfileSyncEvent>(context.config.immediate_max_poll, POLL_WAIT)
            .await;

        for result in received {
            let (event, offset) = match result {
                Ok(pair) => pair,
                Err(RecvErr::Kafka(e)) => {
                    panic!("Kafka error: {e}")
                }
                Err(err) => {
                    // Poison pill; its offset is already stored.
                    warn!("Skipping undecodable immediate record: {:?}", err);
                    continue;
                }
            };

            let timer = common_metrics::timing_guard(IMMEDIATE_SYNC_DURATION);
            match handle_event(store, versions, &event, &policy, &source).await {
                ImmediateOutcome::Processed(_) => {
                    metrics::counter!(IMMEDIATE_SYNC_SUCCESS).increment(1);
                    timer.label("outcome", "success").fin();
                    offset.store().expect("failed to store offset");
                }
                ImmediateOutcome::Demote => {
                    let demoted = event.demoted();
                    match send_keyed_proto(
                        &context.kafka_producer,
                        &context.config.batch_topic,
                        &event.user_id,
                        &demoted,
                    )
                    .await
                    {
                        Ok(()) => {
                            metrics::counter!(IMMEDIATE_SYNC_FALLBACK).increment(1);
                            timer.label("outcome", "fallback").fin();
                            offset.store().expect("failed to store offset");
                        }
                        Err(e) => {
                            // The event now exists nowhere durable except the
                            // source partition: leave the offset unstored so
                            // it is redelivered on restart.
                            metrics::counter!(IMMEDIATE_SYNC_FALLBACK_FAILED).increment(1);
                            timer.label("outcome", "fallback_failed").fin();
                            error!(
                                user_id = %event.user_id,
                                version = event.version,
                                "Failed to demote immediate event to batch egress: {}", e
                            );
                        }
                    }
                }
            }
        }
    }

    info!(index, "Immediate consumer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2,
        };
        assert_eq!(policy.backoff_interval(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_interval(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_interval(3), Duration::from_secs(4));
    }
}
