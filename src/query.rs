//! Query execution: pattern resolution, attribute fetch, record assembly.
//!
//! For each configured query, every object-name pattern is re-resolved
//! against the live registry on every tick (objects may appear and
//! disappear), attributes are fetched in one batched call per object, and the
//! traversal in [`crate::value`] flattens the results into a values map.
//!
//! Emission policy:
//! - A query with exactly one pattern emits one record per resolved object,
//!   each seeded from a fresh context copy; a pure-wildcard query fanning
//!   out to N records.
//! - A query with several patterns accumulates all contributions into a
//!   single map and emits one merged record, dropping all but the first
//!   object of any over-matched pattern to avoid a combinatorial
//!   cross-product.
//!
//! Failures on one matched object are logged and skipped; only transport
//! errors escape to the scheduler, which owns reconnection.

use tracing::{debug, error, warn};

use crate::client::{unquote, ClientError, ObjectName, RegistrySession};
use crate::config::{AttributeMapping, Query};
use crate::event::{EventSink, FieldMap, OutputEvent};
use crate::value::{resolve_into, AttrValue};

/// Executes configured queries against a live session.
pub struct QueryExecutor<'a> {
    host: &'a str,
    context: &'a FieldMap,
    emit_on_no_match: bool,
    sink: &'a dyn EventSink,
}

impl<'a> QueryExecutor<'a> {
    /// Creates an executor bound to one tick's session-independent state.
    #[must_use]
    pub fn new(
        host: &'a str,
        context: &'a FieldMap,
        emit_on_no_match: bool,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            host,
            context,
            emit_on_no_match,
            sink,
        }
    }

    /// Runs one query, emitting zero or more records.
    ///
    /// Returns an error only for transport-level failures; everything else
    /// degrades to a log line and partial output.
    pub fn execute(&self, session: &dyn RegistrySession, query: &Query) -> Result<(), ClientError> {
        let single_pattern = query.objects.len() == 1;
        let mut values = self.context.clone();
        let mut any_commit_done = false;

        for (pattern, spec) in &query.objects {
            let mut objects = session.find_objects(pattern)?;
            if objects.is_empty() {
                warn!(query = %query.name, pattern = %pattern, "no object matched pattern");
                continue;
            }

            if !single_pattern && objects.len() > 1 {
                warn!(
                    query = %query.name,
                    pattern = %pattern,
                    matched = objects.len(),
                    "pattern over-matched; only the first object is queried"
                );
                objects.truncate(1);
            } else {
                debug!(
                    query = %query.name,
                    pattern = %pattern,
                    matched = objects.len(),
                    "resolved pattern"
                );
            }

            for object in &objects {
                match self.collect_object(session, object, spec, &mut values) {
                    Ok(()) => {}
                    Err(e) if e.is_connection_lost() => return Err(e),
                    Err(e) => {
                        error!(
                            query = %query.name,
                            object = %object,
                            error = %e,
                            "failed to process matched object"
                        );
                    }
                }

                if single_pattern {
                    // Possibly a wildcard query: commit each object separately.
                    let record = std::mem::replace(&mut values, self.context.clone());
                    self.emit(&query.name, record);
                    any_commit_done = true;
                }
            }
        }

        if !any_commit_done && (self.emit_on_no_match || values != *self.context) {
            self.emit(&query.name, values);
        }
        Ok(())
    }

    /// Fetches and resolves one object's attributes into `values`.
    fn collect_object(
        &self,
        session: &dyn RegistrySession,
        object: &ObjectName,
        spec: &[AttributeMapping],
        values: &mut FieldMap,
    ) -> Result<(), ClientError> {
        // One batched fetch covering the first segment of every non-`=` path.
        let mut names: Vec<String> = Vec::new();
        for mapping in spec.iter().filter(|m| !m.path.key_property) {
            let head = mapping.path.head();
            if !names.iter().any(|n| n == head) {
                names.push(head.to_string());
            }
        }
        let attrs = if names.is_empty() {
            std::collections::BTreeMap::new()
        } else {
            session.get_attributes(object, &names)?
        };

        for mapping in spec {
            if mapping.path.key_property {
                match object.key_property(mapping.path.head()) {
                    Some(raw) => {
                        let value = if raw.starts_with('"') {
                            unquote(raw)
                        } else {
                            raw.to_string()
                        };
                        resolve_into(
                            &AttrValue::Text(value),
                            &mapping.field,
                            mapping.path.tail(),
                            values,
                        );
                    }
                    None => warn!(
                        object = %object,
                        property = %mapping.path.head(),
                        "object name has no such key-property"
                    ),
                }
            } else {
                let value = attrs.get(mapping.path.head()).unwrap_or(&AttrValue::Null);
                resolve_into(value, &mapping.field, mapping.path.tail(), values);
            }
        }
        Ok(())
    }

    fn emit(&self, name: &str, values: FieldMap) {
        debug!(name = %name, "submitting record");
        self.sink.submit(OutputEvent::new(self.host, name, values));
    }
}
