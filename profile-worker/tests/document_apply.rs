use common_kafka::kafka_messages::profile_sync::{
    ProfileMetadata, ProfileSyncEvent, PropertyValue, SyncPriority, SyncType,
};
use profile_worker::sync::memory::MemoryDocumentStore;
use profile_worker::sync::update::DocumentUpdate;
use profile_worker::sync::{ApplyOutcome, DocumentStore, ProfileStatus};
use serde_json::Value;

fn event(user_id: &str, version: u64) -> ProfileSyncEvent {
    ProfileSyncEvent {
        user_id: user_id.to_string(),
        priority: SyncPriority::Immediate as i32,
        sync_type: SyncType::IncrementalSync as i32,
        version,
        ..Default::default()
    }
}

async fn apply(store: &MemoryDocumentStore, event: &ProfileSyncEvent) -> ApplyOutcome {
    let update = DocumentUpdate::from_event(event).unwrap();
    store.apply(&update).await.unwrap()
}

#[tokio::test]
async fn first_event_creates_the_document() {
    let store = MemoryDocumentStore::new();

    let mut incoming = event("user-123", 1);
    incoming
        .static_profile_updates
        .insert("email".to_string(), PropertyValue::string("a@b.c"));

    assert_eq!(apply(&store, &incoming).await, ApplyOutcome::Applied);

    let document = store.document("user-123").unwrap();
    assert_eq!(document.data_version, 1);
    assert_eq!(document.status, ProfileStatus::Active);
    assert_eq!(
        document.partitions["static_profile"].get("email"),
        Some(&Value::String("a@b.c".to_string()))
    );
}

#[tokio::test]
async fn older_version_is_stale_and_leaves_the_document_unchanged() {
    let store = MemoryDocumentStore::new();
    assert_eq!(apply(&store, &event("user-7", 5)).await, ApplyOutcome::Applied);

    let mut late = event("user-7", 3);
    late.static_profile_updates
        .insert("city".to_string(), PropertyValue::string("X"));

    assert_eq!(apply(&store, &late).await, ApplyOutcome::Stale);

    let document = store.document("user-7").unwrap();
    assert_eq!(document.data_version, 5);
    assert!(document.partitions["static_profile"].get("city").is_none());
}

#[tokio::test]
async fn version_gaps_are_stale_for_incremental_syncs() {
    let store = MemoryDocumentStore::new();
    assert_eq!(apply(&store, &event("u", 2)).await, ApplyOutcome::Applied);

    // 2 -> 4 skips a version; the optimistic filter does not match.
    assert_eq!(apply(&store, &event("u", 4)).await, ApplyOutcome::Stale);
    assert_eq!(store.document("u").unwrap().data_version, 2);

    assert_eq!(apply(&store, &event("u", 3)).await, ApplyOutcome::Applied);
    assert_eq!(apply(&store, &event("u", 4)).await, ApplyOutcome::Applied);
}

#[tokio::test]
async fn applying_the_same_event_twice_is_idempotent() {
    let store = MemoryDocumentStore::new();

    let mut incoming = event("u", 1);
    incoming
        .dynamic_profile_updates
        .insert("plan".to_string(), PropertyValue::string("pro"));
    incoming.tags_to_add = vec!["premium".to_string()];

    assert_eq!(apply(&store, &incoming).await, ApplyOutcome::Applied);
    let first = store.document("u").unwrap();

    assert_eq!(apply(&store, &incoming).await, ApplyOutcome::Stale);
    let second = store.document("u").unwrap();

    assert_eq!(first.data_version, second.data_version);
    assert_eq!(first.partitions, second.partitions);
    assert_eq!(first.tags, second.tags);
}

#[tokio::test]
async fn tags_merge_as_a_set() {
    let store = MemoryDocumentStore::new();

    let mut first = event("u", 4);
    first.tags_to_add = vec!["premium".to_string(), "trial".to_string()];
    assert_eq!(apply(&store, &first).await, ApplyOutcome::Applied);

    let mut second = event("u", 5);
    second.tags_to_add = vec!["verified".to_string()];
    second.tags_to_remove = vec!["trial".to_string()];
    assert_eq!(apply(&store, &second).await, ApplyOutcome::Applied);

    let document = store.document("u").unwrap();
    assert_eq!(document.data_version, 5);
    let tags: Vec<_> = document.tags.iter().cloned().collect();
    assert_eq!(tags, vec!["premium".to_string(), "verified".to_string()]);
}

#[tokio::test]
async fn incremental_merge_touches_only_listed_fields() {
    let store = MemoryDocumentStore::new();

    let mut first = event("u", 1);
    first
        .static_profile_updates
        .insert("email".to_string(), PropertyValue::string("a@b.c"));
    first
        .static_profile_updates
        .insert("name".to_string(), PropertyValue::string("Ada"));
    assert_eq!(apply(&store, &first).await, ApplyOutcome::Applied);

    let mut second = event("u", 2);
    second
        .static_profile_updates
        .insert("email".to_string(), PropertyValue::string("new@b.c"));
    assert_eq!(apply(&store, &second).await, ApplyOutcome::Applied);

    let statics = &store.document("u").unwrap().partitions["static_profile"];
    assert_eq!(statics.get("email"), Some(&Value::String("new@b.c".to_string())));
    assert_eq!(statics.get("name"), Some(&Value::String("Ada".to_string())));
}

#[tokio::test]
async fn full_sync_replaces_partitions() {
    let store = MemoryDocumentStore::new();

    let mut first = event("u", 1);
    first
        .static_profile_updates
        .insert("email".to_string(), PropertyValue::string("a@b.c"));
    first
        .behavioral_data_updates
        .insert("clicks".to_string(), PropertyValue::int(10));
    assert_eq!(apply(&store, &first).await, ApplyOutcome::Applied);

    let mut replace = event("u", 2);
    replace.sync_type = SyncType::FullSync as i32;
    replace
        .static_profile_updates
        .insert("name".to_string(), PropertyValue::string("Ada"));
    assert_eq!(apply(&store, &replace).await, ApplyOutcome::Applied);

    let document = store.document("u").unwrap();
    let statics = &document.partitions["static_profile"];
    assert!(statics.get("email").is_none());
    assert_eq!(statics.get("name"), Some(&Value::String("Ada".to_string())));
    assert!(document.partitions["behavioral_data"].is_empty());
}

#[tokio::test]
async fn late_full_sync_cannot_roll_the_document_back() {
    let store = MemoryDocumentStore::new();
    assert_eq!(apply(&store, &event("u", 6)).await, ApplyOutcome::Applied);

    let mut late = event("u", 6);
    late.sync_type = SyncType::FullSync as i32;
    assert_eq!(apply(&store, &late).await, ApplyOutcome::Stale);
    assert_eq!(store.document("u").unwrap().data_version, 6);

    let mut newer = event("u", 9);
    newer.sync_type = SyncType::FullSync as i32;
    assert_eq!(apply(&store, &newer).await, ApplyOutcome::Applied);
    assert_eq!(store.document("u").unwrap().data_version, 9);
}

#[tokio::test]
async fn status_and_metadata_are_set_when_present() {
    let store = MemoryDocumentStore::new();

    let mut first = event("u", 1);
    first.status_update = Some("ARCHIVED".to_string());
    first.metadata = Some(ProfileMetadata {
        registration_date_ms: Some(1_700_000_000_000),
        last_active_at_ms: Some(1_720_000_000_000),
    });
    assert_eq!(apply(&store, &first).await, ApplyOutcome::Applied);

    let document = store.document("u").unwrap();
    assert_eq!(document.status, ProfileStatus::Archived);
    assert_eq!(
        document.registration_date.unwrap().timestamp_millis(),
        1_700_000_000_000
    );

    // A follow-up without status or metadata leaves them in place.
    assert_eq!(apply(&store, &event("u", 2)).await, ApplyOutcome::Applied);
    let document = store.document("u").unwrap();
    assert_eq!(document.status, ProfileStatus::Archived);
    assert!(document.registration_date.is_some());
}

#[tokio::test]
async fn document_version_is_non_decreasing_across_a_substream() {
    let store = MemoryDocumentStore::new();
    let versions = [1u64, 2, 3, 2, 4, 1, 5];

    let mut observed = Vec::new();
    for version in versions {
        let _ = apply(&store, &event("u", version)).await;
        observed.push(store.document("u").unwrap().data_version);
    }

    let mut sorted = observed.clone();
    sorted.sort();
    assert_eq!(observed, sorted);
    assert_eq!(*observed.last().unwrap(), 5);
}
