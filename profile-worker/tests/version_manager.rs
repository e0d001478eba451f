use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common_redis::MockRedisClient;
use profile_worker::version_manager::{
    lock_key, profile_key, AtomicUpdateOutcome, FastPathProfile, SafeUpdateOutcome,
    VersionManager, INITIAL_VERSION,
};
use serde_json::{json, Value};

fn manager(redis: &MockRedisClient) -> VersionManager {
    VersionManager::new(
        Arc::new(redis.clone()),
        Duration::from_secs(10),
        Duration::ZERO,
    )
}

fn updates(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn seed_profile(redis: &MockRedisClient, user_id: &str, version: u64) -> MockRedisClient {
    let profile = FastPathProfile {
        fields: HashMap::new(),
        version,
        last_updated_by: "seed".to_string(),
        last_updated_at: Utc::now(),
    };
    redis
        .clone()
        .with_value(profile_key(user_id), serde_json::to_string(&profile).unwrap())
}

#[tokio::test]
async fn safe_update_creates_at_the_initial_version() {
    let redis = MockRedisClient::new();
    let versions = manager(&redis);

    let outcome = versions
        .safe_update("u", &updates(&[("static_profile.email", json!("a@b.c"))]), "test")
        .await
        .unwrap();
    assert_eq!(outcome, SafeUpdateOutcome::Success { version: INITIAL_VERSION });

    let raw = redis.current_value(&profile_key("u")).unwrap();
    let profile: FastPathProfile = serde_json::from_str(&raw).unwrap();
    assert_eq!(profile.version, 1);
    assert_eq!(profile.fields["static_profile.email"], json!("a@b.c"));
    assert_eq!(profile.last_updated_by, "test");

    // The lock is gone once the update is done.
    assert_eq!(redis.current_value(&lock_key("u")), None);
}

#[tokio::test]
async fn safe_update_bumps_and_merges() {
    let redis = MockRedisClient::new();
    let versions = manager(&redis);

    versions
        .safe_update("u", &updates(&[("a", json!(1))]), "first")
        .await
        .unwrap();
    let outcome = versions
        .safe_update("u", &updates(&[("b", json!(2))]), "second")
        .await
        .unwrap();
    assert_eq!(outcome, SafeUpdateOutcome::Success { version: 2 });

    let raw = redis.current_value(&profile_key("u")).unwrap();
    let profile: FastPathProfile = serde_json::from_str(&raw).unwrap();
    assert_eq!(profile.fields["a"], json!(1));
    assert_eq!(profile.fields["b"], json!(2));
    assert_eq!(profile.last_updated_by, "second");
}

#[tokio::test]
async fn safe_update_reports_contention_without_touching_state() {
    let redis = MockRedisClient::new().with_value(lock_key("u"), "someone-else");
    let versions = manager(&redis);

    let outcome = versions
        .safe_update("u", &updates(&[("a", json!(1))]), "test")
        .await
        .unwrap();
    assert_eq!(outcome, SafeUpdateOutcome::LockFailed);

    // Neither the profile nor the other holder's lock were touched.
    assert_eq!(redis.current_value(&profile_key("u")), None);
    assert_eq!(
        redis.current_value(&lock_key("u")),
        Some("someone-else".to_string())
    );
}

#[tokio::test]
async fn atomic_update_conflicts_report_the_observed_version() {
    let redis = seed_profile(&MockRedisClient::new(), "u", 7);
    let versions = manager(&redis);
    let before = redis.current_value(&profile_key("u")).unwrap();

    let outcome = versions
        .atomic_update("u", &updates(&[("a", json!(1))]), 6, "test")
        .await
        .unwrap();
    assert_eq!(outcome, AtomicUpdateOutcome::VersionConflict { observed: 7 });

    // State unchanged on conflict.
    assert_eq!(redis.current_value(&profile_key("u")).unwrap(), before);
}

#[tokio::test]
async fn atomic_update_swaps_when_the_expectation_holds() {
    let redis = seed_profile(&MockRedisClient::new(), "u", 7);
    let versions = manager(&redis);

    let outcome = versions
        .atomic_update("u", &updates(&[("a", json!(1))]), 7, "test")
        .await
        .unwrap();
    assert_eq!(outcome, AtomicUpdateOutcome::Success { version: 8 });
    assert_eq!(versions.current_version("u").await.unwrap(), 8);
}

#[tokio::test]
async fn atomic_update_creates_when_absent_counts_as_initial() {
    let redis = MockRedisClient::new();
    let versions = manager(&redis);

    let outcome = versions
        .atomic_update("u", &updates(&[("a", json!(1))]), INITIAL_VERSION, "test")
        .await
        .unwrap();
    assert_eq!(outcome, AtomicUpdateOutcome::Success { version: INITIAL_VERSION });
    assert!(versions.exists("u").await.unwrap());
}

#[tokio::test]
async fn current_version_defaults_to_initial_when_absent() {
    let redis = MockRedisClient::new();
    let versions = manager(&redis);

    assert_eq!(versions.current_version("ghost").await.unwrap(), INITIAL_VERSION);
    assert!(!versions.exists("ghost").await.unwrap());
}

#[tokio::test]
async fn delete_is_lock_guarded() {
    let redis = seed_profile(&MockRedisClient::new(), "u", 3);
    let versions = manager(&redis);

    assert!(versions.delete("u", "gdpr request").await.unwrap());
    assert!(!versions.exists("u").await.unwrap());

    // Deleting an absent profile reports false.
    assert!(!versions.delete("u", "gdpr request").await.unwrap());

    // A contended lock blocks the deletion.
    let redis = seed_profile(&MockRedisClient::new(), "v", 3).with_value(lock_key("v"), "other");
    let versions = manager(&redis);
    assert!(!versions.delete("v", "gdpr request").await.unwrap());
    assert!(versions.exists("v").await.unwrap());
}
