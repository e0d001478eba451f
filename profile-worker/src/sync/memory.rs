use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::sync::store::{ApplyError, ApplyOutcome, DocumentStore};
use crate::sync::update::{DocumentUpdate, ProfileStatus, SyncMode};

/// An in-memory document store with the same apply semantics as the
/// Postgres one, plus failure injection. Lets consumer flows and apply
/// semantics be exercised without a database.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
    failures: Mutex<u32>,
}

#[derive(Clone, Debug)]
pub struct StoredDocument {
    pub user_id: String,
    pub data_version: i64,
    pub status: ProfileStatus,
    pub partitions: HashMap<&'static str, Map<String, Value>>,
    pub tags: BTreeSet<String>,
    pub registration_date: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

const PARTITION_COLUMNS: [&str; 6] = [
    "static_profile",
    "dynamic_profile",
    "computed_metrics",
    "behavioral_data",
    "social_media",
    "extended_properties",
];

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` applies fail, as a store outage would.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    pub fn document(&self, user_id: &str) -> Option<StoredDocument> {
        self.documents.lock().unwrap().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().unwrap().is_empty()
    }

    fn create(update: &DocumentUpdate) -> StoredDocument {
        let mut partitions: HashMap<&'static str, Map<String, Value>> = PARTITION_COLUMNS
            .iter()
            .map(|c| (*c, Map::new()))
            .collect();
        for partition in &update.partitions {
            partitions.insert(partition.column, partition.fields.clone());
        }

        StoredDocument {
            user_id: update.user_id.clone(),
            data_version: update.version,
            status: update.status.unwrap_or(ProfileStatus::Active),
            partitions,
            tags: update.initial_tags().into_iter().collect(),
            registration_date: update.registration_date,
            last_active_at: update.last_active_at,
            updated_at: Utc::now(),
        }
    }

    fn merge_into(document: &mut StoredDocument, update: &DocumentUpdate) {
        document.data_version = update.version;
        if let Some(status) = update.status {
            document.status = status;
        }

        match update.mode {
            SyncMode::Incremental => {
                for partition in &update.partitions {
                    document
                        .partitions
                        .entry(partition.column)
                        .or_default()
                        .extend(partition.fields.clone());
                }
            }
            SyncMode::Full => {
                for (column, fields) in document.partitions.iter_mut() {
                    *fields = update
                        .partitions
                        .iter()
                        .find(|p| p.column == *column)
                        .map(|p| p.fields.clone())
                        .unwrap_or_default();
                }
            }
        }

        for tag in &update.tags_to_add {
            document.tags.insert(tag.clone());
        }
        for tag in &update.tags_to_remove {
            document.tags.remove(tag);
        }

        if update.registration_date.is_some() {
            document.registration_date = update.registration_date;
        }
        if update.last_active_at.is_some() {
            document.last_active_at = update.last_active_at;
        }
        document.updated_at = Utc::now();
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn apply(&self, update: &DocumentUpdate) -> Result<ApplyOutcome, ApplyError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ApplyError::Unavailable("injected failure".to_string()));
            }
        }

        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(&update.user_id) {
            None => {
                documents.insert(update.user_id.clone(), Self::create(update));
                Ok(ApplyOutcome::Applied)
            }
            Some(document) => {
                let matched = match update.mode {
                    SyncMode::Incremental => document.data_version == update.version - 1,
                    SyncMode::Full => document.data_version < update.version,
                };
                if !matched {
                    return Ok(ApplyOutcome::Stale);
                }
                Self::merge_into(document, update);
                Ok(ApplyOutcome::Applied)
            }
        }
    }
}
