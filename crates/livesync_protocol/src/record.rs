//! Records mirrored by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp type used for record recency.
pub type Timestamp = DateTime<Utc>;

/// A record that can be mirrored.
///
/// The engine only looks at the identity and the last-modified timestamp;
/// everything else is opaque payload. Equality is used to recognize
/// redelivered copies of a record the mirror already holds.
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Stable, unique identifier of the entity.
    fn id(&self) -> &str;

    /// Last-modified time. Non-decreasing per id under correct server behavior.
    fn updated_at(&self) -> Timestamp;
}

/// A schemaless record: id, timestamp and arbitrary JSON fields.
///
/// `updated_at` is accepted as an RFC 3339 string or as integer epoch
/// milliseconds, under either `updated_at` or `updatedAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Entity ID.
    pub id: String,
    /// Last-modified time.
    #[serde(alias = "updatedAt", with = "timestamp")]
    pub updated_at: Timestamp,
    /// Remaining payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Creates a document with no payload fields.
    pub fn new(id: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            updated_at,
            fields: Map::new(),
        }
    }

    /// Sets a payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Record for Document {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

/// Serde helpers for timestamps that may arrive as text or epoch millis.
pub mod timestamp {
    use super::Timestamp;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Millis(i64),
    }

    /// Serializes as RFC 3339 with millisecond precision.
    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    /// Deserializes from RFC 3339 text or epoch milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => parse(&text).map_err(D::Error::custom),
            Repr::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }

    /// Parses an RFC 3339 timestamp.
    ///
    /// Postgres-style `2024-01-01 10:00:00+00` is accepted as well.
    pub fn parse(text: &str) -> Result<Timestamp, String> {
        DateTime::parse_from_rfc3339(text)
            .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp {text:?}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn document_accepts_rfc3339() {
        let doc: Document = serde_json::from_value(json!({
            "id": "m-1",
            "updated_at": "2024-03-01T10:00:00Z",
            "width_mm": 1200,
        }))
        .unwrap();

        assert_eq!(doc.id(), "m-1");
        assert_eq!(doc.updated_at(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(doc.field("width_mm"), Some(&json!(1200)));
    }

    #[test]
    fn document_accepts_epoch_millis_and_camel_case() {
        let doc: Document = serde_json::from_value(json!({
            "id": "m-2",
            "updatedAt": 1_700_000_000_000i64,
        }))
        .unwrap();

        assert_eq!(doc.updated_at().timestamp_millis(), 1_700_000_000_000);
        assert!(doc.fields.is_empty());
    }

    #[test]
    fn document_accepts_postgres_timestamp() {
        let doc: Document = serde_json::from_value(json!({
            "id": "m-3",
            "updated_at": "2024-03-01 10:00:00.5+00",
        }))
        .unwrap();

        assert_eq!(doc.updated_at().timestamp_subsec_millis(), 500);
    }

    #[test]
    fn document_rejects_bad_timestamp() {
        let result: Result<Document, _> = serde_json::from_value(json!({
            "id": "m-4",
            "updated_at": "yesterday",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn document_serializes_flat() {
        let doc = Document::new("m-5", Utc.timestamp_millis_opt(0).unwrap())
            .with_field("project_id", "p-1");
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["id"], "m-5");
        assert_eq!(value["project_id"], "p-1");
        assert_eq!(value["updated_at"], "1970-01-01T00:00:00.000Z");
    }
}
