use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_messages::profile_sync::{
    ProfileSyncEvent, PropertyValue, SyncPriority, SyncType,
};
use common_redis::MockRedisClient;
use profile_worker::consumer::immediate::{handle_event, ImmediateOutcome, RetryPolicy};
use profile_worker::consumer::sync_event;
use profile_worker::sync::memory::MemoryDocumentStore;
use profile_worker::sync::ApplyOutcome;
use profile_worker::version_manager::{profile_key, FastPathProfile, VersionManager};

fn policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
        backoff_factor: 2,
    }
}

fn versions(redis: &MockRedisClient) -> VersionManager {
    VersionManager::new(
        Arc::new(redis.clone()),
        Duration::from_secs(10),
        Duration::ZERO,
    )
}

fn event(user_id: &str, version: u64) -> ProfileSyncEvent {
    let mut event = ProfileSyncEvent {
        user_id: user_id.to_string(),
        priority: SyncPriority::Immediate as i32,
        sync_type: SyncType::IncrementalSync as i32,
        version,
        ..Default::default()
    };
    event
        .static_profile_updates
        .insert("email".to_string(), PropertyValue::string("a@b.c"));
    event
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new();
    let versions = versions(&redis);

    store.fail_next(2);
    let outcome = handle_event(&store, &versions, &event("user-42", 1), &policy(), "test").await;

    assert_eq!(outcome, ImmediateOutcome::Processed(ApplyOutcome::Applied));
    assert_eq!(store.document("user-42").unwrap().data_version, 1);
}

#[tokio::test]
async fn exhausted_retries_demote_without_touching_the_document() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new();
    let versions = versions(&redis);

    store.fail_next(3);
    let incoming = event("user-42", 10);
    let outcome = handle_event(&store, &versions, &incoming, &policy(), "test").await;

    assert_eq!(outcome, ImmediateOutcome::Demote);
    assert!(store.document("user-42").is_none());

    // The demoted twin differs from the original only in its latency class.
    let demoted = incoming.demoted();
    assert_eq!(demoted.user_id, incoming.user_id);
    assert_eq!(demoted.version, incoming.version);
    assert_eq!(demoted.priority(), SyncPriority::Batch);

    // Redelivered on the batch side, it applies cleanly.
    let applied = sync_event(&store, &versions, &demoted, "batch-test")
        .await
        .unwrap();
    assert_eq!(applied, ApplyOutcome::Applied);
    assert_eq!(store.document("user-42").unwrap().data_version, 10);
}

#[tokio::test]
async fn stale_applies_count_as_processed() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new();
    let versions = versions(&redis);

    let first = event("u", 5);
    sync_event(&store, &versions, &first, "test").await.unwrap();

    let outcome = handle_event(&store, &versions, &first, &policy(), "test").await;
    assert_eq!(outcome, ImmediateOutcome::Processed(ApplyOutcome::Stale));
}

#[tokio::test]
async fn sync_mirrors_fields_into_the_fast_path() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new();
    let versions = versions(&redis);

    sync_event(&store, &versions, &event("u", 1), "immediate-consumer-0")
        .await
        .unwrap();

    let raw = redis.current_value(&profile_key("u")).unwrap();
    let profile: FastPathProfile = serde_json::from_str(&raw).unwrap();
    assert_eq!(profile.version, 1);
    assert_eq!(
        profile.fields["static_profile.email"],
        serde_json::json!("a@b.c")
    );
    assert_eq!(profile.last_updated_by, "immediate-consumer-0");
}

#[tokio::test]
async fn fast_path_contention_does_not_fail_the_record() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new().with_value(
        profile_worker::version_manager::lock_key("u"),
        "someone-else",
    );
    let versions = versions(&redis);

    let outcome = sync_event(&store, &versions, &event("u", 1), "test")
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert!(store.document("u").is_some());
    // No mirror was written while the lock was held elsewhere.
    assert_eq!(redis.current_value(&profile_key("u")), None);
}

#[tokio::test]
async fn malformed_events_are_not_retried_into_the_document() {
    let store = MemoryDocumentStore::new();
    let redis = MockRedisClient::new();
    let versions = versions(&redis);

    let mut bad = event("u", 1);
    bad.version = 0;
    let outcome = handle_event(&store, &versions, &bad, &policy(), "test").await;

    assert_eq!(outcome, ImmediateOutcome::Demote);
    assert!(store.is_empty());
}
