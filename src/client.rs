//! Boundary to the remote-registry client library.
//!
//! The wire protocol is out of scope: an existing client SDK provides the
//! connect, object-lookup, attribute-get, and notification-subscribe
//! primitives. This module defines the traits that SDK must be adapted to,
//! plus the shared name/notification/error types both sides speak.
//!
//! Errors are split into two classes, because the scheduler treats them very
//! differently: a [`ClientError::Transport`] means the whole session is dead
//! and must be rebuilt; anything else is local to the failing call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::AttrValue;

// ============================================================================
// Errors
// ============================================================================

/// Error returned by any registry-client primitive.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Transport-level failure: the session is unusable and must be rebuilt.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Application-level failure: the call failed, the session survives.
    #[error("remote error: {message}")]
    Remote { message: String },
}

impl ClientError {
    /// Builds a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Builds an application-level error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Classifies this error: does it indicate the session is dead?
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

// ============================================================================
// Object Names
// ============================================================================

/// Name of a concrete managed object, usable as a handle in session calls.
///
/// Carries the canonical string form plus the identity key-properties parsed
/// from it (`domain:key=value,key=value`). Key-property values may be
/// quote-wrapped; [`unquote`] undoes that wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    canonical: String,
    key_properties: BTreeMap<String, String>,
}

impl ObjectName {
    /// Parses a canonical object name.
    ///
    /// Everything before the first `:` is the domain; the remainder is a
    /// comma-separated list of `key=value` pairs. Commas and equals signs
    /// inside quote-wrapped values are preserved.
    #[must_use]
    pub fn new(canonical: impl Into<String>) -> Self {
        let canonical = canonical.into();
        let key_properties = canonical
            .split_once(':')
            .map(|(_, props)| parse_key_properties(props))
            .unwrap_or_default();
        Self {
            canonical,
            key_properties,
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Returns the raw value of an identity key-property, if present.
    ///
    /// The value is returned as written in the name; callers that need the
    /// logical value should [`unquote`] quote-wrapped results.
    #[must_use]
    pub fn key_property(&self, name: &str) -> Option<&str> {
        self.key_properties.get(name).map(String::as_str)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Splits a property list on commas outside quotes, collecting `key=value`
/// pairs. Malformed pairs (no `=`) are skipped.
fn parse_key_properties(props: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut pair = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    let commit = |pair: &str, out: &mut BTreeMap<String, String>| {
        if let Some((key, value)) = pair.split_once('=') {
            out.insert(key.to_string(), value.to_string());
        }
    };

    for c in props.chars() {
        match c {
            '\\' if in_quotes && !escaped => {
                escaped = true;
                pair.push(c);
            }
            '"' if !escaped => {
                in_quotes = !in_quotes;
                pair.push(c);
            }
            ',' if !in_quotes => {
                commit(&pair, &mut out);
                pair.clear();
            }
            _ => {
                escaped = false;
                pair.push(c);
            }
        }
    }
    if !pair.is_empty() {
        commit(&pair, &mut out);
    }
    out
}

/// Undoes quote-wrapping of a key-property value.
///
/// Strips the surrounding quotes and unescapes `\"`, `\\`, `\n`, `\*` and
/// `\?`. Values that are not quote-wrapped are returned unchanged.
#[must_use]
pub fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(escaped) => out.push(escaped),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Notifications
// ============================================================================

/// An asynchronous notification delivered by a managed object.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Human-readable message text.
    pub message: String,
    /// Payload value; same composite/scalar shape as attribute values.
    pub payload: AttrValue,
}

/// Receiver for delivered notifications.
///
/// Invoked on the client library's own dispatch context, possibly
/// concurrently with a scheduler tick, so implementations only read immutable
/// state and write to their own freshly allocated records.
pub trait NotificationListener: Send + Sync {
    /// Handles one delivered notification.
    fn on_notification(&self, notification: &Notification);
}

// ============================================================================
// Client / Session
// ============================================================================

/// Opaque credentials handed to the connect primitive.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Factory for sessions against one remote registry endpoint.
pub trait RegistryClient: Send + Sync {
    /// Opens a session. May block on network I/O.
    fn connect(
        &self,
        host: &str,
        port: u16,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RegistrySession>, ClientError>;
}

/// A live session to the remote registry.
///
/// Sessions are owned by the scheduler task, created lazily and discarded on
/// detected connection loss; listeners installed through a session die with
/// it.
pub trait RegistrySession: Send + Sync {
    /// Resolves an object-name pattern against the live registry.
    ///
    /// Patterns may contain wildcard segments and can match zero, one, or
    /// many concrete objects; resolution is re-done on every poll.
    fn find_objects(&self, pattern: &str) -> Result<Vec<ObjectName>, ClientError>;

    /// Fetches the named top-level attributes of one object in one call.
    ///
    /// Attributes the object does not expose are simply absent from the
    /// result.
    fn get_attributes(
        &self,
        object: &ObjectName,
        names: &[String],
    ) -> Result<BTreeMap<String, AttrValue>, ClientError>;

    /// Installs a notification listener on one object.
    fn subscribe(
        &self,
        object: &ObjectName,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_parses_key_properties() {
        let name = ObjectName::new("java.lang:type=GarbageCollector,name=G1 Young Generation");
        assert_eq!(name.key_property("type"), Some("GarbageCollector"));
        assert_eq!(name.key_property("name"), Some("G1 Young Generation"));
        assert_eq!(name.key_property("missing"), None);
    }

    #[test]
    fn test_object_name_without_properties() {
        let name = ObjectName::new("java.lang");
        assert_eq!(name.key_property("type"), None);
        assert_eq!(name.canonical(), "java.lang");
    }

    #[test]
    fn test_quoted_property_value_keeps_commas() {
        let name = ObjectName::new(r#"app:type=Pool,name="a,b",size=2"#);
        assert_eq!(name.key_property("name"), Some(r#""a,b""#));
        assert_eq!(name.key_property("size"), Some("2"));
    }

    #[test]
    fn test_unquote_plain_value_unchanged() {
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_unquote_strips_quotes_and_escapes() {
        assert_eq!(unquote(r#""a,b""#), "a,b");
        assert_eq!(unquote(r#""say \"hi\"""#), r#"say "hi""#);
        assert_eq!(unquote(r#""star\*""#), "star*");
        assert_eq!(unquote(r#""line\n""#), "line\n");
    }

    #[test]
    fn test_error_classification() {
        assert!(ClientError::transport("broken pipe").is_connection_lost());
        assert!(!ClientError::remote("no such attribute").is_connection_lost());
    }
}
