use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::sync::store::{ApplyError, ApplyOutcome, DocumentStore};
use crate::sync::update::{DocumentUpdate, SyncMode};

const PARTITION_COLUMNS: [&str; 6] = [
    "static_profile",
    "dynamic_profile",
    "computed_metrics",
    "behavioral_data",
    "social_media",
    "extended_properties",
];

// One conditional upsert per event: the insert arm creates the document at
// the event's version, the update arm merges field-by-field, and the WHERE
// clause is the optimistic version filter. Zero rows touched means another
// writer already advanced the document.
const INCREMENTAL_APPLY: &str = r#"
INSERT INTO user_profiles AS p (
    user_id, data_version, status,
    static_profile, dynamic_profile, computed_metrics,
    behavioral_data, social_media, extended_properties,
    tags, registration_date, last_active_at, updated_at
) VALUES ($1, $2, COALESCE($3, 'ACTIVE'), $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
ON CONFLICT (user_id) DO UPDATE SET
    data_version = EXCLUDED.data_version,
    status = COALESCE($3, p.status),
    static_profile = p.static_profile || EXCLUDED.static_profile,
    dynamic_profile = p.dynamic_profile || EXCLUDED.dynamic_profile,
    computed_metrics = p.computed_metrics || EXCLUDED.computed_metrics,
    behavioral_data = p.behavioral_data || EXCLUDED.behavioral_data,
    social_media = p.social_media || EXCLUDED.social_media,
    extended_properties = p.extended_properties || EXCLUDED.extended_properties,
    tags = ARRAY(SELECT unnest(p.tags || $13::text[]) EXCEPT SELECT unnest($14::text[])),
    registration_date = COALESCE($11, p.registration_date),
    last_active_at = COALESCE($12, p.last_active_at),
    updated_at = NOW()
WHERE p.data_version = $2 - 1
"#;

// Full syncs replace the partitions instead of merging them. The filter is
// by user only, but guarded against version regression so a late full sync
// cannot roll the document back.
const FULL_APPLY: &str = r#"
INSERT INTO user_profiles AS p (
    user_id, data_version, status,
    static_profile, dynamic_profile, computed_metrics,
    behavioral_data, social_media, extended_properties,
    tags, registration_date, last_active_at, updated_at
) VALUES ($1, $2, COALESCE($3, 'ACTIVE'), $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
ON CONFLICT (user_id) DO UPDATE SET
    data_version = EXCLUDED.data_version,
    status = COALESCE($3, p.status),
    static_profile = EXCLUDED.static_profile,
    dynamic_profile = EXCLUDED.dynamic_profile,
    computed_metrics = EXCLUDED.computed_metrics,
    behavioral_data = EXCLUDED.behavioral_data,
    social_media = EXCLUDED.social_media,
    extended_properties = EXCLUDED.extended_properties,
    tags = ARRAY(SELECT unnest(p.tags || $13::text[]) EXCEPT SELECT unnest($14::text[])),
    registration_date = COALESCE($11, p.registration_date),
    last_active_at = COALESCE($12, p.last_active_at),
    updated_at = NOW()
WHERE p.data_version < $2
"#;

pub struct PostgresDocumentStore {
    pool: PgPool,
    apply_timeout: Duration,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool, apply_timeout: Duration) -> Self {
        Self {
            pool,
            apply_timeout,
        }
    }

    fn partition_json(update: &DocumentUpdate, column: &str) -> Value {
        update
            .partitions
            .iter()
            .find(|p| p.column == column)
            .map(|p| Value::Object(p.fields.clone()))
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn apply(&self, update: &DocumentUpdate) -> Result<ApplyOutcome, ApplyError> {
        let statement = match update.mode {
            SyncMode::Incremental => INCREMENTAL_APPLY,
            SyncMode::Full => FULL_APPLY,
        };

        let mut query = sqlx::query(statement)
            .bind(&update.user_id)
            .bind(update.version)
            .bind(update.status.map(|s| s.as_str()));
        for column in PARTITION_COLUMNS {
            query = query.bind(Self::partition_json(update, column));
        }
        let query = query
            .bind(update.initial_tags())
            .bind(update.registration_date)
            .bind(update.last_active_at)
            .bind(&update.tags_to_add)
            .bind(&update.tags_to_remove);

        let result = tokio::time::timeout(self.apply_timeout, query.execute(&self.pool))
            .await
            .map_err(|_| ApplyError::Timeout)??;

        match result.rows_affected() {
            0 => Ok(ApplyOutcome::Stale),
            _ => Ok(ApplyOutcome::Applied),
        }
    }
}
