//! Protobuf shapes exchanged on the event stream.

use crate::domain::{AckStatus, Acknowledgement, Event};
use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventRecord {
    #[prost(string, tag = "1")]
    pub subject_id: String,
    #[prost(string, tag = "2")]
    pub event_type: String,
    /// Empty when the event carries no document reference.
    #[prost(string, tag = "3")]
    pub document_ref: String,
    #[prost(message, optional, tag = "4")]
    pub timestamp: Option<WireTimestamp>,
    #[prost(message, optional, tag = "5")]
    pub metadata: Option<Metadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireTimestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metadata {
    #[prost(map = "string, string", tag = "1")]
    pub fields: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AckRecord {
    #[prost(string, tag = "1")]
    pub event_id: String,
    #[prost(string, tag = "2")]
    pub certificate_id: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(string, tag = "4")]
    pub error: String,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        let timestamp = event.timestamp.map(|ts| WireTimestamp {
            seconds: ts.timestamp(),
            nanos: ts.timestamp_subsec_nanos() as i32,
        });

        // An empty payload produces no metadata message at all
        let metadata = (!event.data.is_empty()).then(|| Metadata {
            fields: event.metadata_fields(),
        });

        Self {
            subject_id: event.subject_id,
            event_type: event.event_type,
            document_ref: event.document_ref.unwrap_or_default(),
            timestamp,
            metadata,
        }
    }
}

impl From<AckRecord> for Acknowledgement {
    fn from(record: AckRecord) -> Self {
        Self {
            status: AckStatus::parse(&record.status),
            error: (!record.error.is_empty()).then_some(record.error),
            event_id: record.event_id,
            certificate_id: record.certificate_id,
        }
    }
}
