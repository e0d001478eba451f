//! The profile sync wire model. Events are binary protobuf on every topic,
//! and the router forwards them without re-encoding, so the field tags here
//! are the cross-service contract.

use std::collections::HashMap;

/// Latency class of an event. Tag 0 is reserved so that a missing field is
/// distinguishable from an explicit choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum SyncPriority {
    Unspecified = 0,
    Immediate = 1,
    Batch = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum SyncType {
    Unspecified = 0,
    FullSync = 1,
    IncrementalSync = 2,
}

/// A dynamically typed field value. An unset `kind` is the null carrier;
/// `encoded_value` is the catch-all for payloads the producer could not
/// express in the other arms.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertyValue {
    #[prost(oneof = "property_value::Kind", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub kind: Option<property_value::Kind>,
}

pub mod property_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(string, tag = "1")]
        StringValue(String),
        #[prost(int64, tag = "2")]
        IntValue(i64),
        #[prost(double, tag = "3")]
        DoubleValue(f64),
        #[prost(bool, tag = "4")]
        BoolValue(bool),
        #[prost(bytes, tag = "5")]
        BytesValue(Vec<u8>),
        #[prost(message, tag = "6")]
        NestedValue(super::PropertyMap),
        #[prost(bytes, tag = "7")]
        EncodedValue(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertyMap {
    #[prost(map = "string, message", tag = "1")]
    pub entries: HashMap<String, PropertyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileMetadata {
    #[prost(int64, optional, tag = "1")]
    pub registration_date_ms: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub last_active_at_ms: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSyncEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(enumeration = "SyncPriority", tag = "2")]
    pub priority: i32,
    #[prost(enumeration = "SyncType", tag = "3")]
    pub sync_type: i32,
    /// Monotonic per user, supplied by the producer. The basis of
    /// idempotence: downstream applies are conditional on it.
    #[prost(uint64, tag = "4")]
    pub version: u64,
    /// Event time in millis, producer clock. Informational.
    #[prost(int64, tag = "5")]
    pub timestamp_ms: i64,
    #[prost(string, optional, tag = "6")]
    pub status_update: Option<String>,

    #[prost(map = "string, message", tag = "7")]
    pub static_profile_updates: HashMap<String, PropertyValue>,
    #[prost(map = "string, message", tag = "8")]
    pub dynamic_profile_updates: HashMap<String, PropertyValue>,
    #[prost(map = "string, message", tag = "9")]
    pub computed_metrics_updates: HashMap<String, PropertyValue>,
    #[prost(map = "string, message", tag = "10")]
    pub behavioral_data_updates: HashMap<String, PropertyValue>,
    #[prost(map = "string, message", tag = "11")]
    pub social_media_updates: HashMap<String, PropertyValue>,
    #[prost(map = "string, message", tag = "12")]
    pub extended_properties_updates: HashMap<String, PropertyValue>,

    #[prost(string, repeated, tag = "13")]
    pub tags_to_add: Vec<String>,
    #[prost(string, repeated, tag = "14")]
    pub tags_to_remove: Vec<String>,

    #[prost(message, optional, tag = "15")]
    pub metadata: Option<ProfileMetadata>,
}

/// Decodes only the priority field out of an encoded `ProfileSyncEvent`.
/// The router uses this to classify records without materialising the six
/// partition maps; unknown tags are skipped by the decoder.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoutingProbe {
    #[prost(enumeration = "SyncPriority", tag = "2")]
    pub priority: i32,
}

impl ProfileSyncEvent {
    /// The demoted twin of this event: same payload, batch latency class.
    pub fn demoted(&self) -> ProfileSyncEvent {
        let mut demoted = self.clone();
        demoted.priority = SyncPriority::Batch as i32;
        demoted
    }

    /// The six named partitions, paired with their document column names.
    pub fn partitions(&self) -> [(&'static str, &HashMap<String, PropertyValue>); 6] {
        [
            ("static_profile", &self.static_profile_updates),
            ("dynamic_profile", &self.dynamic_profile_updates),
            ("computed_metrics", &self.computed_metrics_updates),
            ("behavioral_data", &self.behavioral_data_updates),
            ("social_media", &self.social_media_updates),
            ("extended_properties", &self.extended_properties_updates),
        ]
    }
}

impl PropertyValue {
    pub fn string(v: impl Into<String>) -> Self {
        Self {
            kind: Some(property_value::Kind::StringValue(v.into())),
        }
    }

    pub fn int(v: i64) -> Self {
        Self {
            kind: Some(property_value::Kind::IntValue(v)),
        }
    }

    pub fn double(v: f64) -> Self {
        Self {
            kind: Some(property_value::Kind::DoubleValue(v)),
        }
    }

    pub fn bool(v: bool) -> Self {
        Self {
            kind: Some(property_value::Kind::BoolValue(v)),
        }
    }

    pub fn bytes(v: Vec<u8>) -> Self {
        Self {
            kind: Some(property_value::Kind::BytesValue(v)),
        }
    }

    pub fn nested(entries: HashMap<String, PropertyValue>) -> Self {
        Self {
            kind: Some(property_value::Kind::NestedValue(PropertyMap { entries })),
        }
    }

    pub fn null() -> Self {
        Self { kind: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn sample_event() -> ProfileSyncEvent {
        let mut event = ProfileSyncEvent {
            user_id: "user-123".to_string(),
            priority: SyncPriority::Immediate as i32,
            sync_type: SyncType::IncrementalSync as i32,
            version: 7,
            timestamp_ms: 1_720_000_000_000,
            status_update: Some("ACTIVE".to_string()),
            tags_to_add: vec!["premium".to_string()],
            tags_to_remove: vec!["trial".to_string()],
            metadata: Some(ProfileMetadata {
                registration_date_ms: Some(1_700_000_000_000),
                last_active_at_ms: None,
            }),
            ..Default::default()
        };
        event
            .static_profile_updates
            .insert("email".to_string(), PropertyValue::string("a@b.c"));
        event
            .computed_metrics_updates
            .insert("ltv".to_string(), PropertyValue::double(12.5));
        event
    }

    #[test]
    fn event_roundtrips() {
        let event = sample_event();
        let bytes = event.encode_to_vec();
        let decoded = ProfileSyncEvent::decode(bytes.as_slice()).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.priority(), SyncPriority::Immediate);
        assert_eq!(decoded.sync_type(), SyncType::IncrementalSync);
    }

    #[test]
    fn probe_reads_priority_from_full_event_bytes() {
        let bytes = sample_event().encode_to_vec();
        let probe = RoutingProbe::decode(bytes.as_slice()).unwrap();
        assert_eq!(probe.priority(), SyncPriority::Immediate);

        let mut batch = sample_event();
        batch.priority = SyncPriority::Batch as i32;
        let probe = RoutingProbe::decode(batch.encode_to_vec().as_slice()).unwrap();
        assert_eq!(probe.priority(), SyncPriority::Batch);
    }

    #[test]
    fn probe_tolerates_missing_priority() {
        let event = ProfileSyncEvent {
            user_id: "u".to_string(),
            ..Default::default()
        };
        let probe = RoutingProbe::decode(event.encode_to_vec().as_slice()).unwrap();
        assert_eq!(probe.priority(), SyncPriority::Unspecified);
    }

    #[test]
    fn demotion_changes_only_the_priority() {
        let event = sample_event();
        let demoted = event.demoted();
        assert_eq!(demoted.priority(), SyncPriority::Batch);

        let mut reverted = demoted.clone();
        reverted.priority = event.priority;
        assert_eq!(reverted, event);
    }

    #[test]
    fn nested_values_roundtrip() {
        let mut inner = HashMap::new();
        inner.insert("city".to_string(), PropertyValue::string("Berlin"));
        inner.insert("zip".to_string(), PropertyValue::int(10115));

        let value = PropertyValue::nested(inner);
        let decoded = PropertyValue::decode(value.encode_to_vec().as_slice()).unwrap();
        assert_eq!(value, decoded);
    }
}
