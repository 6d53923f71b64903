//! Flat output records and the sink boundary.
//!
//! Every poll result and every delivered notification terminates in an
//! [`OutputEvent`]: a flat, string-keyed record handed to the host's
//! [`EventSink`]. Records carry the static event context, the fixed `host`
//! and `name` fields, and whatever the attribute traversal resolved.
//!
//! Nesting never reaches a record: composite values are flattened upstream
//! (see [`crate::value`]) by joining the output field name with each
//! sub-field name using `_`.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;

/// A value that may appear in an emitted record.
///
/// Booleans are coerced to `Int(1)` / `Int(0)` before they ever reach a
/// record, and nulls are omitted entirely, so neither shape exists here.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String value
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Working map of resolved field values, keyed by output field name.
///
/// Seeded from a copy of the static event context, filled by the attribute
/// traversal, and finally sealed into an [`OutputEvent`].
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A flat record ready for submission to the downstream pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputEvent {
    #[serde(flatten)]
    fields: FieldMap,
}

impl OutputEvent {
    /// Seals a resolved value map into a record.
    ///
    /// `host` and `name` are written first, so a resolved value under either
    /// key takes precedence, matching the downstream contract that resolved
    /// fields always win.
    #[must_use]
    pub fn new(host: &str, name: &str, values: FieldMap) -> Self {
        let mut fields = FieldMap::new();
        fields.insert("host".to_string(), FieldValue::Text(host.to_string()));
        fields.insert("name".to_string(), FieldValue::Text(name.to_string()));
        fields.extend(values);
        Self { fields }
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns all fields of the record.
    #[must_use]
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }
}

/// Destination for emitted records.
///
/// Implemented by the host pipeline. Must be safe to call from both the
/// scheduler task and the client library's notification dispatch context;
/// submission is assumed non-blocking.
pub trait EventSink: Send + Sync {
    /// Accepts one flat record.
    fn submit(&self, event: OutputEvent);
}

/// Unbounded channel sender as a sink.
///
/// Convenient for hosts that drain records from a channel. A closed receiver
/// drops records silently; the pipe keeps running.
impl EventSink for mpsc::UnboundedSender<OutputEvent> {
    fn submit(&self, event: OutputEvent) {
        let _ = self.send(event);
    }
}
