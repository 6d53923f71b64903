//! Attribute values and the recursive path traversal.
//!
//! Remote attribute values and notification payloads are heterogeneous:
//! scalars, booleans, nulls, or composite trees of named sub-fields.
//! [`AttrValue`] models that shape as a tagged variant, and [`resolve_into`]
//! walks it along a dot-separated attribute path, coercing whatever it finds
//! into flat [`FieldValue`] entries.
//!
//! Traversal never fails hard: a path that cannot be followed logs a warning
//! and writes nothing, so one bad field cannot spoil the rest of a record.

use std::collections::BTreeMap;

use tracing::warn;

use crate::event::{FieldMap, FieldValue};

/// A raw value as delivered by the registry client.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Absent value; never written to a record.
    Null,
    /// Boolean; coerced to `1` / `0` on output.
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String value
    Text(String),
    /// Composite value: an ordered set of named sub-fields, recursively.
    Composite(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Builds a composite value from name/value pairs.
    #[must_use]
    pub fn composite<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, AttrValue)>,
        K: Into<String>,
    {
        Self::Composite(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Returns true for composite values.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Resolves `value` along `path`, writing coerced leaves into `out`.
///
/// The contract, applied identically to query attributes and notification
/// payloads:
///
/// - Composite value, empty path: every sub-field is flattened recursively
///   under `field_<subfield>`; unpacking a whole composite writes one entry
///   per leaf.
/// - Composite value, path remaining: descend into the sub-field named by the
///   next segment; an absent sub-field logs a warning and writes nothing.
/// - Scalar, empty path: nulls are omitted, booleans become `1`/`0`, numbers
///   stay numbers, anything else becomes its string form.
/// - Scalar, path remaining: the path cannot be followed into a scalar; logs
///   a warning and writes nothing.
pub fn resolve_into(value: &AttrValue, field: &str, path: &[String], out: &mut FieldMap) {
    match value {
        AttrValue::Composite(subfields) => {
            if let Some((next, rest)) = path.split_first() {
                match subfields.get(next) {
                    Some(sub) => resolve_into(sub, field, rest, out),
                    None => warn!(
                        field = %field,
                        subfield = %next,
                        "attribute traversal failed: no field with that name"
                    ),
                }
            } else {
                for (name, sub) in subfields {
                    resolve_into(sub, &format!("{field}_{name}"), &[], out);
                }
            }
        }
        scalar => {
            if !path.is_empty() {
                warn!(
                    field = %field,
                    leftover = %path.join("."),
                    "attribute traversal failed: non-composite value with path remaining"
                );
                return;
            }
            let coerced = match scalar {
                AttrValue::Null => return,
                AttrValue::Bool(b) => FieldValue::Int(i64::from(*b)),
                AttrValue::Int(i) => FieldValue::Int(*i),
                AttrValue::Float(f) => FieldValue::Float(*f),
                AttrValue::Text(s) => FieldValue::Text(s.clone()),
                AttrValue::Composite(_) => return, // handled above
            };
            out.insert(field.to_string(), coerced);
        }
    }
}
