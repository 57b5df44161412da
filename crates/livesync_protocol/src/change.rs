//! Change-feed events and their wire representation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entity was inserted.
    Insert,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl ChangeKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    /// Parses a wire name, case-insensitively.
    pub fn parse(name: &str) -> ProtocolResult<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            _ => Err(ProtocolError::UnknownEventType(name.to_string())),
        }
    }
}

/// A single change pushed by the feed.
///
/// Insert and Update carry the full record; Delete carries only the id.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    /// Entity was inserted.
    Insert(R),
    /// Entity was updated.
    Update(R),
    /// Entity was deleted.
    Delete {
        /// ID of the deleted entity.
        id: String,
    },
}

impl<R: Record> ChangeEvent<R> {
    /// Creates a delete event.
    pub fn delete(id: impl Into<String>) -> Self {
        ChangeEvent::Delete { id: id.into() }
    }

    /// Returns the kind of change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Returns the id of the affected entity.
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => r.id(),
            ChangeEvent::Delete { id } => id,
        }
    }

    /// Returns the carried record, if any.
    pub fn record(&self) -> Option<&R> {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => Some(r),
            ChangeEvent::Delete { .. } => None,
        }
    }
}

/// Change payload as delivered by the backend.
///
/// ```json
/// {"eventType": "UPDATE", "table": "measurements",
///  "new": {"id": "m-1", "updated_at": "..."}, "old": {"id": "m-1"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// INSERT, UPDATE or DELETE.
    #[serde(rename = "eventType", alias = "event_type", alias = "type")]
    pub event_type: String,
    /// Source table, if the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Row after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row before the change (at least its id for deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl RawChange {
    /// Builds the payload for a kind and row.
    pub fn new(kind: ChangeKind, row: Value) -> Self {
        match kind {
            ChangeKind::Insert | ChangeKind::Update => Self {
                event_type: kind.as_str().to_string(),
                table: None,
                new: Some(row),
                old: None,
            },
            ChangeKind::Delete => Self {
                event_type: kind.as_str().to_string(),
                table: None,
                new: None,
                old: Some(row),
            },
        }
    }

    /// Sets the source table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Parses a payload from JSON text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::malformed)
    }

    /// Decodes the payload into a typed event.
    pub fn decode<R>(&self) -> ProtocolResult<ChangeEvent<R>>
    where
        R: Record + DeserializeOwned,
    {
        let kind = ChangeKind::parse(&self.event_type)?;
        match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = self
                    .new
                    .as_ref()
                    .filter(|v| is_present(v))
                    .ok_or(ProtocolError::MissingRecord {
                        event: kind.as_str(),
                        field: "new",
                    })?;
                let record = R::deserialize(row)
                    .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
                Ok(if kind == ChangeKind::Insert {
                    ChangeEvent::Insert(record)
                } else {
                    ChangeEvent::Update(record)
                })
            }
            ChangeKind::Delete => {
                let id = self
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(id_text)
                    .ok_or(ProtocolError::MissingRecord {
                        event: "DELETE",
                        field: "old",
                    })?;
                Ok(ChangeEvent::Delete { id })
            }
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Connection status reported by the change-feed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Channel is being established.
    Connecting,
    /// Channel is live and delivering events.
    Connected,
    /// Channel failed.
    Error,
    /// Channel was closed.
    Closed,
}

impl ChannelStatus {
    /// Returns true if the status means the channel is gone.
    pub fn is_failure(&self) -> bool {
        matches!(self, ChannelStatus::Error | ChannelStatus::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Document;
    use serde_json::json;

    #[test]
    fn decode_insert() {
        let raw = RawChange::from_json(
            r#"{"eventType":"INSERT","table":"measurements",
                "new":{"id":"m-1","updated_at":"2024-01-01T00:00:00Z","height_mm":900}}"#,
        )
        .unwrap();

        let event: ChangeEvent<Document> = raw.decode().unwrap();
        assert_eq!(event.kind(), ChangeKind::Insert);
        assert_eq!(event.id(), "m-1");
        assert_eq!(event.record().unwrap().field("height_mm"), Some(&json!(900)));
    }

    #[test]
    fn decode_update_lowercase_type() {
        let raw = RawChange::new(
            ChangeKind::Update,
            json!({"id": "m-1", "updated_at": 1_000}),
        );
        let raw = RawChange {
            event_type: "update".into(),
            ..raw
        };

        let event: ChangeEvent<Document> = raw.decode().unwrap();
        assert_eq!(event.kind(), ChangeKind::Update);
    }

    #[test]
    fn decode_delete_uses_old_id() {
        let raw = RawChange::new(ChangeKind::Delete, json!({"id": "m-9"}));
        let event: ChangeEvent<Document> = raw.decode().unwrap();
        assert_eq!(event, ChangeEvent::delete("m-9"));
        assert!(event.record().is_none());

        let raw = RawChange::new(ChangeKind::Delete, json!({"id": 17}));
        let event: ChangeEvent<Document> = raw.decode().unwrap();
        assert_eq!(event.id(), "17");
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        let unknown = RawChange {
            event_type: "TRUNCATE".into(),
            table: None,
            new: None,
            old: None,
        };
        assert!(matches!(
            unknown.decode::<Document>(),
            Err(ProtocolError::UnknownEventType(_))
        ));

        let empty_new = RawChange::new(ChangeKind::Insert, json!({}));
        assert!(matches!(
            empty_new.decode::<Document>(),
            Err(ProtocolError::MissingRecord { field: "new", .. })
        ));

        let no_id = RawChange::new(ChangeKind::Delete, json!({}));
        assert!(matches!(
            no_id.decode::<Document>(),
            Err(ProtocolError::MissingRecord { field: "old", .. })
        ));

        let bad_ts = RawChange::new(ChangeKind::Insert, json!({"id": "x", "updated_at": true}));
        assert!(matches!(
            bad_ts.decode::<Document>(),
            Err(ProtocolError::InvalidRecord(_))
        ));

        assert!(matches!(
            RawChange::from_json("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn channel_status_failures() {
        assert!(ChannelStatus::Error.is_failure());
        assert!(ChannelStatus::Closed.is_failure());
        assert!(!ChannelStatus::Connected.is_failure());
        assert!(!ChannelStatus::Connecting.is_failure());
    }
}
