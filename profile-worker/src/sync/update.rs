use std::collections::HashMap;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use common_kafka::kafka_messages::profile_sync::{
    property_value::Kind, ProfileSyncEvent, PropertyValue, SyncType,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidEvent {
    #[error("event user_id is empty")]
    EmptyUserId,
    #[error("event version {0} is out of range")]
    VersionOutOfRange(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// Replace the six partitions with the event's content.
    Full,
    /// Merge the event's fields into the existing partitions.
    Incremental,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileStatus {
    Active,
    Archived,
    Deleted,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Active => "ACTIVE",
            ProfileStatus::Archived => "ARCHIVED",
            ProfileStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => Some(ProfileStatus::Active),
            "ARCHIVED" => Some(ProfileStatus::Archived),
            "DELETED" => Some(ProfileStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionUpdate {
    /// Document column the partition lives in.
    pub column: &'static str,
    pub fields: Map<String, Value>,
}

/// The update a single event makes to a user's aggregated document,
/// planned ahead of any store round-trip.
///
/// For incremental events only the partitions the event touches are
/// listed; for full syncs all six are, so the store replaces the ones the
/// event left empty as well.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentUpdate {
    pub user_id: String,
    /// The event's version, validated to fit the document's BIGINT column.
    pub version: i64,
    pub mode: SyncMode,
    pub partitions: Vec<PartitionUpdate>,
    /// Deduplicated; the tags the document gains.
    pub tags_to_add: Vec<String>,
    pub tags_to_remove: Vec<String>,
    pub status: Option<ProfileStatus>,
    pub registration_date: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl DocumentUpdate {
    pub fn from_event(event: &ProfileSyncEvent) -> Result<Self, InvalidEvent> {
        if event.user_id.is_empty() {
            return Err(InvalidEvent::EmptyUserId);
        }
        let version = match i64::try_from(event.version) {
            Ok(v) if v >= 1 => v,
            _ => return Err(InvalidEvent::VersionOutOfRange(event.version)),
        };

        let mode = match event.sync_type() {
            SyncType::FullSync => SyncMode::Full,
            SyncType::IncrementalSync | SyncType::Unspecified => SyncMode::Incremental,
        };

        let partitions = event
            .partitions()
            .into_iter()
            .filter(|(_, fields)| mode == SyncMode::Full || !fields.is_empty())
            .map(|(column, fields)| PartitionUpdate {
                column,
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), json_value(v)))
                    .collect(),
            })
            .collect();

        let mut tags_to_add = Vec::new();
        for tag in &event.tags_to_add {
            if !tags_to_add.contains(tag) {
                tags_to_add.push(tag.clone());
            }
        }

        let status = event.status_update.as_deref().and_then(|s| {
            let parsed = ProfileStatus::parse(s);
            if parsed.is_none() {
                warn!(user_id = %event.user_id, status = s, "Ignoring unrecognized status update");
            }
            parsed
        });

        let metadata = event.metadata.as_ref();
        let registration_date = metadata
            .and_then(|m| m.registration_date_ms)
            .and_then(DateTime::from_timestamp_millis);
        let last_active_at = metadata
            .and_then(|m| m.last_active_at_ms)
            .and_then(DateTime::from_timestamp_millis);

        Ok(Self {
            user_id: event.user_id.clone(),
            version,
            mode,
            partitions,
            tags_to_add,
            tags_to_remove: event.tags_to_remove.clone(),
            status,
            registration_date,
            last_active_at,
        })
    }

    /// The tag set a freshly created document starts with.
    pub fn initial_tags(&self) -> Vec<String> {
        self.tags_to_add
            .iter()
            .filter(|t| !self.tags_to_remove.contains(t))
            .cloned()
            .collect()
    }

    /// The event's fields flattened to `<partition>.<field>` keys, the shape
    /// the fast-path mirror stores them in.
    pub fn flattened_fields(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        for partition in &self.partitions {
            for (key, value) in &partition.fields {
                fields.insert(format!("{}.{}", partition.column, key), value.clone());
            }
        }
        fields
    }
}

/// Convert a wire value into its document representation. Byte payloads
/// (including the opaque catch-all) become base64 strings; a double that
/// JSON cannot carry becomes null.
pub fn json_value(value: &PropertyValue) -> Value {
    match &value.kind {
        None => Value::Null,
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::IntValue(i)) => Value::from(*i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::BytesValue(b)) => Value::String(BASE64_STANDARD.encode(b)),
        Some(Kind::NestedValue(map)) => Value::Object(
            map.entries
                .iter()
                .map(|(k, v)| (k.clone(), json_value(v)))
                .collect(),
        ),
        Some(Kind::EncodedValue(b)) => Value::String(BASE64_STANDARD.encode(b)),
    }
}
