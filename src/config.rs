//! Pipe configuration: typed queries/subscriptions and structural validation.
//!
//! The host hands query and subscription definitions over as raw JSON lists.
//! [`parse_queries`] and [`parse_subscriptions`] validate them structurally
//! before any connection is attempted, reporting the first violation with a
//! path-like index (`queries[2].objects`). A validation failure is fatal:
//! the pipe refuses to start.
//!
//! Once parsed, definitions are immutable for the life of the process.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::client::Credentials;

// ============================================================================
// Errors
// ============================================================================

/// Structural violation in the raw query/subscription lists.
///
/// Carries a path-like index locating the first violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The top-level value is not a list.
    #[error("{key} is not a list")]
    NotAList { key: &'static str },

    /// A list element is not a key/value mapping.
    #[error("{path} is not an object")]
    NotAnObject { path: String },

    /// A required string field is missing or has the wrong type.
    #[error("{path}.{field} missing or not a string")]
    MissingString { path: String, field: &'static str },

    /// A required mapping field is missing or has the wrong type.
    #[error("{path}.{field} missing or not an object")]
    MissingMapping { path: String, field: &'static str },

    /// A nested mapping key is empty.
    #[error("one of the {path} keys is empty")]
    EmptyKey { path: String },

    /// A nested mapping value is not a non-empty string.
    #[error("one of the {path} values is not a non-empty string")]
    NotAString { path: String },
}

// ============================================================================
// Attribute Paths
// ============================================================================

/// Dot-separated attribute path, optionally `=`-prefixed.
///
/// The first segment selects the top-level attribute, or an identity
/// key-property of the object's name when `key_property` is set. Remaining
/// segments descend into composite values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    /// Read from the object's identity key-properties instead of attributes.
    pub key_property: bool,
    /// Path segments, outermost first. Never empty.
    pub segments: Vec<String>,
}

impl AttributePath {
    /// Parses the string form (`HeapMemoryUsage.used`, `=name`).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let (key_property, rest) = match raw.strip_prefix('=') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        Self {
            key_property,
            segments: rest.split('.').map(str::to_string).collect(),
        }
    }

    /// First segment: the attribute or key-property name.
    #[must_use]
    pub fn head(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }

    /// Segments after the first, for descending into composite values.
    #[must_use]
    pub fn tail(&self) -> &[String] {
        self.segments.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key_property {
            f.write_str("=")?;
        }
        f.write_str(&self.segments.join("."))
    }
}

/// One attribute-path → output-field entry of a query or subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMapping {
    /// Where the value comes from.
    pub path: AttributePath,
    /// Output field name it is written under.
    pub field: String,
}

// ============================================================================
// Queries and Subscriptions
// ============================================================================

/// A polled query: one or more object-name patterns, each with an attribute
/// spec, producing one or many records per tick.
///
/// Pattern order is the declared order; the tie-break and emission policies
/// depend on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Value of the emitted records' `name` field.
    pub name: String,
    /// Ordered pattern → attribute-spec pairs.
    pub objects: Vec<(String, Vec<AttributeMapping>)>,
}

/// A notification subscription on all objects matching one pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Value of the emitted records' `name` field.
    pub name: String,
    /// Object-name pattern to subscribe on.
    pub object: String,
    /// Notification-payload path → output-field entries.
    pub attributes: Vec<AttributeMapping>,
}

// ============================================================================
// Pipe Configuration
// ============================================================================

/// Complete configuration of one pipe instance.
///
/// One instance observes one registry endpoint; configure several instances
/// to observe several endpoints. `interval` must be non-zero.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Registry endpoint host.
    pub host: String,
    /// Registry endpoint port.
    pub port: u16,
    /// Optional username; absent or empty means no credentials.
    pub username: Option<String>,
    /// Optional password, paired with `username`.
    pub password: Option<String>,
    /// Polling interval.
    pub interval: Duration,
    /// Static context copied into every emitted record.
    pub event_context: BTreeMap<String, String>,
    /// Polled queries. May be empty.
    pub queries: Vec<Query>,
    /// Notification subscriptions. May be empty.
    pub subscriptions: Vec<Subscription>,
    /// Emit a multi-pattern record even when it equals the untouched context
    /// copy (i.e. no pattern contributed anything). Defaults to `false`.
    pub emit_on_no_match: bool,
}

impl PipeConfig {
    /// Creates a configuration with no credentials, context, queries, or
    /// subscriptions.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, interval: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            interval,
            event_context: BTreeMap::new(),
            queries: Vec::new(),
            subscriptions: Vec::new(),
            emit_on_no_match: false,
        }
    }

    /// Credentials for the connect primitive.
    ///
    /// An absent or empty username means no credentials at all.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        Some(Credentials {
            username: username.to_string(),
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validates and parses the raw `queries` list.
///
/// Returns the first structural violation found, indexed by path.
pub fn parse_queries(raw: &JsonValue) -> Result<Vec<Query>, ConfigError> {
    let list = raw
        .as_array()
        .ok_or(ConfigError::NotAList { key: "queries" })?;

    let mut queries = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let path = format!("queries[{i}]");
        let query = entry
            .as_object()
            .ok_or_else(|| ConfigError::NotAnObject { path: path.clone() })?;

        let name = required_string(query, &path, "name")?;
        let objects_raw = query
            .get("objects")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| ConfigError::MissingMapping {
                path: path.clone(),
                field: "objects",
            })?;

        let objects_path = format!("{path}.objects");
        let mut objects = Vec::with_capacity(objects_raw.len());
        for (pattern, spec) in objects_raw {
            if pattern.is_empty() {
                return Err(ConfigError::EmptyKey {
                    path: objects_path.clone(),
                });
            }
            let spec = spec.as_object().ok_or_else(|| ConfigError::NotAnObject {
                path: format!("{objects_path}[{pattern}]"),
            })?;
            objects.push((
                pattern.clone(),
                parse_attribute_spec(spec, &format!("{objects_path}[{pattern}]"))?,
            ));
        }

        queries.push(Query { name, objects });
    }
    Ok(queries)
}

/// Validates and parses the raw `subscriptions` list.
pub fn parse_subscriptions(raw: &JsonValue) -> Result<Vec<Subscription>, ConfigError> {
    let list = raw.as_array().ok_or(ConfigError::NotAList {
        key: "subscriptions",
    })?;

    let mut subscriptions = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let path = format!("subscriptions[{i}]");
        let subscription = entry
            .as_object()
            .ok_or_else(|| ConfigError::NotAnObject { path: path.clone() })?;

        let name = required_string(subscription, &path, "name")?;
        let object = required_string(subscription, &path, "object")?;
        let attributes_raw = subscription
            .get("attributes")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| ConfigError::MissingMapping {
                path: path.clone(),
                field: "attributes",
            })?;

        let attributes =
            parse_attribute_spec(attributes_raw, &format!("{path}.attributes"))?;

        subscriptions.push(Subscription {
            name,
            object,
            attributes,
        });
    }
    Ok(subscriptions)
}

fn required_string(
    object: &serde_json::Map<String, JsonValue>,
    path: &str,
    field: &'static str,
) -> Result<String, ConfigError> {
    object
        .get(field)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingString {
            path: path.to_string(),
            field,
        })
}

fn parse_attribute_spec(
    spec: &serde_json::Map<String, JsonValue>,
    path: &str,
) -> Result<Vec<AttributeMapping>, ConfigError> {
    let mut mappings = Vec::with_capacity(spec.len());
    for (attr_path, field) in spec {
        if attr_path.is_empty() {
            return Err(ConfigError::EmptyKey {
                path: path.to_string(),
            });
        }
        let field = field
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::NotAString {
                path: path.to_string(),
            })?;
        mappings.push(AttributeMapping {
            path: AttributePath::parse(attr_path),
            field: field.to_string(),
        });
    }
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_full_query_list() {
        let raw = json!([
            {
                "name": "Heap",
                "objects": {
                    "java.lang:type=Memory": { "HeapMemoryUsage.used": "Used" }
                }
            },
            {
                "name": "GC",
                "objects": {
                    "java.lang:type=GarbageCollector,name=*": {
                        "=name": "GCName",
                        "CollectionCount": "Count"
                    }
                }
            }
        ]);

        let queries = parse_queries(&raw).expect("valid queries");
        assert_eq!(queries.len(), 2);

        let (pattern, spec) = &queries[0].objects[0];
        assert_eq!(pattern, "java.lang:type=Memory");
        assert_eq!(spec[0].field, "Used");
        assert_eq!(spec[0].path.head(), "HeapMemoryUsage");
        assert_eq!(spec[0].path.tail(), ["used".to_string()].as_slice());

        let (_, spec) = &queries[1].objects[0];
        assert!(spec[0].path.key_property);
        assert_eq!(spec[0].path.head(), "name");
    }

    #[test]
    fn test_objects_mapping_preserves_declared_order() {
        let raw = json!([
            {
                "name": "Mixed",
                "objects": {
                    "z:type=Last": { "A": "A" },
                    "a:type=First": { "B": "B" }
                }
            }
        ]);

        let queries = parse_queries(&raw).expect("valid");
        let patterns: Vec<&str> = queries[0]
            .objects
            .iter()
            .map(|(p, _)| p.as_str())
            .collect();
        assert_eq!(patterns, ["z:type=Last", "a:type=First"]);
    }

    #[test]
    fn test_rejects_non_list_queries() {
        let err = parse_queries(&json!({"not": "a list"})).unwrap_err();
        assert_eq!(err, ConfigError::NotAList { key: "queries" });
    }

    #[test]
    fn test_rejects_non_object_element() {
        let err = parse_queries(&json!(["oops"])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotAnObject {
                path: "queries[0]".into()
            }
        );
    }

    #[test]
    fn test_rejects_missing_name() {
        let err = parse_queries(&json!([{ "objects": {} }])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingString {
                path: "queries[0]".into(),
                field: "name"
            }
        );
    }

    #[test]
    fn test_rejects_non_string_name() {
        let err = parse_queries(&json!([{ "name": 7, "objects": {} }])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingString { .. }));
    }

    #[test]
    fn test_rejects_missing_objects() {
        let err = parse_queries(&json!([{ "name": "q" }])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingMapping {
                path: "queries[0]".into(),
                field: "objects"
            }
        );
    }

    #[test]
    fn test_rejects_non_object_attribute_spec() {
        let raw = json!([{ "name": "q", "objects": { "a:b=c": "nope" } }]);
        let err = parse_queries(&raw).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotAnObject {
                path: "queries[0].objects[a:b=c]".into()
            }
        );
    }

    #[test]
    fn test_rejects_non_string_alias() {
        let raw = json!([{ "name": "q", "objects": { "a:b=c": { "Attr": 1 } } }]);
        let err = parse_queries(&raw).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotAString {
                path: "queries[0].objects[a:b=c]".into()
            }
        );
    }

    #[test]
    fn test_rejects_empty_pattern_key() {
        let raw = json!([{ "name": "q", "objects": { "": { "A": "A" } } }]);
        let err = parse_queries(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKey { .. }));
    }

    #[test]
    fn test_parses_subscription_list() {
        let raw = json!([
            {
                "name": "GCEvent",
                "object": "java.lang:type=GarbageCollector,name=*",
                "attributes": { "gcInfo.duration": "GCDuration" }
            }
        ]);

        let subs = parse_subscriptions(&raw).expect("valid");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].name, "GCEvent");
        assert_eq!(subs[0].attributes[0].field, "GCDuration");
    }

    #[test]
    fn test_rejects_subscription_without_object() {
        let raw = json!([{ "name": "s", "attributes": {} }]);
        let err = parse_subscriptions(&raw).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingString {
                path: "subscriptions[0]".into(),
                field: "object"
            }
        );
    }

    #[test]
    fn test_rejects_subscription_without_attributes() {
        let raw = json!([{ "name": "s", "object": "a:b=c" }]);
        let err = parse_subscriptions(&raw).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingMapping {
                path: "subscriptions[0]".into(),
                field: "attributes"
            }
        );
    }

    #[test]
    fn test_credentials_skipped_for_empty_username() {
        let mut config = PipeConfig::new("h", 1099, Duration::from_secs(15));
        assert!(config.credentials().is_none());

        config.username = Some(String::new());
        assert!(config.credentials().is_none());

        config.username = Some("monitorRole".into());
        config.password = Some("secret".into());
        let creds = config.credentials().expect("credentials");
        assert_eq!(creds.username, "monitorRole");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn test_attribute_path_display_round_trips() {
        for raw in ["HeapMemoryUsage.used", "=name", "SystemCpuLoad"] {
            assert_eq!(AttributePath::parse(raw).to_string(), raw);
        }
    }
}
