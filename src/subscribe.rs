//! Notification subscriptions: resolution, installation, record conversion.
//!
//! Subscriptions start out pending. On every scheduler tick, before the
//! query pass, each pending subscription's pattern is resolved; a pattern
//! matching one or more objects gets an independent listener installed on
//! every match (all sharing the subscription's name and attribute spec) and
//! leaves the pending set. Zero matches or an install failure keep it
//! pending, retried indefinitely on subsequent ticks.
//!
//! Listeners die with the session they were installed through, so the whole
//! set is reset to pending whenever the session is rebuilt after a
//! connection loss.
//!
//! Delivery runs on the client library's dispatch context, concurrently with
//! scheduler ticks. Handlers only read the immutable subscription definition
//! and write to a freshly allocated record, so no synchronization is needed
//! beyond the sink itself.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{ClientError, Notification, NotificationListener, RegistrySession};
use crate::config::Subscription;
use crate::event::{EventSink, FieldMap, FieldValue, OutputEvent};
use crate::value::resolve_into;

/// Tracks which subscriptions still need a listener and installs them.
pub struct NotificationSubscriber {
    /// All configured subscriptions; immutable after startup.
    configured: Vec<Subscription>,
    /// Subscriptions not yet attached to at least one live object.
    pending: Vec<Subscription>,
    host: String,
    context: FieldMap,
    sink: Arc<dyn EventSink>,
}

impl NotificationSubscriber {
    /// Creates a subscriber with every configured subscription pending.
    #[must_use]
    pub fn new(
        configured: Vec<Subscription>,
        host: impl Into<String>,
        context: FieldMap,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let pending = configured.clone();
        Self {
            configured,
            pending,
            host: host.into(),
            context,
            sink,
        }
    }

    /// Resets the pending set to "all subscriptions pending".
    ///
    /// Must be called whenever the session is recreated: listeners attached
    /// to the dead session are unrecoverable.
    pub fn reset(&mut self) {
        self.pending = self.configured.clone();
    }

    /// Subscriptions not yet attached.
    #[must_use]
    pub fn pending(&self) -> &[Subscription] {
        &self.pending
    }

    /// Attempts to attach every pending subscription on `session`.
    ///
    /// Application-level failures and unmatched patterns keep a subscription
    /// pending for the next tick; a transport error aborts the pass and
    /// propagates so the scheduler can rebuild the session.
    pub fn resubscribe(&mut self, session: &dyn RegistrySession) -> Result<(), ClientError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut still_pending = Vec::new();
        let mut lost: Option<ClientError> = None;

        for subscription in std::mem::take(&mut self.pending) {
            if lost.is_some() {
                // Session already known dead; keep the rest pending untouched.
                still_pending.push(subscription);
                continue;
            }
            match self.install(session, &subscription) {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        subscription = %subscription.name,
                        pattern = %subscription.object,
                        "no object matched pattern; postponing subscription"
                    );
                    still_pending.push(subscription);
                }
                Err(e) if e.is_connection_lost() => {
                    still_pending.push(subscription);
                    lost = Some(e);
                }
                Err(e) => {
                    warn!(
                        subscription = %subscription.name,
                        error = %e,
                        "failed to install notification listener; will retry"
                    );
                    still_pending.push(subscription);
                }
            }
        }

        self.pending = still_pending;
        match lost {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Installs listeners on every object matching one subscription.
    ///
    /// Returns `Ok(false)` when the pattern matched nothing.
    fn install(
        &self,
        session: &dyn RegistrySession,
        subscription: &Subscription,
    ) -> Result<bool, ClientError> {
        let objects = session.find_objects(&subscription.object)?;
        if objects.is_empty() {
            return Ok(false);
        }

        for object in &objects {
            let handler = Arc::new(NotificationHandler {
                name: subscription.name.clone(),
                attributes: subscription.attributes.clone(),
                host: self.host.clone(),
                context: self.context.clone(),
                sink: Arc::clone(&self.sink),
            });
            session.subscribe(object, handler)?;
            debug!(
                subscription = %subscription.name,
                object = %object,
                "notification listener installed"
            );
        }
        Ok(true)
    }
}

/// Converts delivered notifications into records for one subscription.
struct NotificationHandler {
    name: String,
    attributes: Vec<crate::config::AttributeMapping>,
    host: String,
    context: FieldMap,
    sink: Arc<dyn EventSink>,
}

impl NotificationListener for NotificationHandler {
    fn on_notification(&self, notification: &Notification) {
        debug!(subscription = %self.name, "handling notification");

        let mut values = self.context.clone();
        values.insert(
            "message".to_string(),
            FieldValue::Text(notification.message.clone()),
        );
        for mapping in &self.attributes {
            if mapping.path.key_property {
                // Notifications carry no object name to read the property
                // from; traversing the payload instead could hit an unrelated
                // field that happens to share the name.
                warn!(
                    subscription = %self.name,
                    field = %mapping.field,
                    property = %mapping.path.head(),
                    "key-property paths cannot be resolved from a notification"
                );
                continue;
            }
            resolve_into(
                &notification.payload,
                &mapping.field,
                &mapping.path.segments,
                &mut values,
            );
        }

        self.sink.submit(OutputEvent::new(&self.host, &self.name, values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryClient;
    use crate::config::{AttributeMapping, AttributePath};
    use crate::testing::{CollectingSink, MockRegistry};
    use crate::value::AttrValue;

    fn subscription(name: &str, object: &str, path: &str, field: &str) -> Subscription {
        Subscription {
            name: name.into(),
            object: object.into(),
            attributes: vec![AttributeMapping {
                path: AttributePath::parse(path),
                field: field.into(),
            }],
        }
    }

    fn subscriber(subs: Vec<Subscription>, sink: &CollectingSink) -> NotificationSubscriber {
        NotificationSubscriber::new(subs, "h", FieldMap::new(), Arc::new(sink.clone()))
    }

    #[test]
    fn test_unmatched_pattern_stays_pending() {
        let registry = MockRegistry::new();
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut sub = subscriber(
            vec![subscription("GC", "app:type=GC,name=*", "info.duration", "D")],
            &sink,
        );

        sub.resubscribe(session.as_ref()).expect("no transport error");
        assert_eq!(sub.pending().len(), 1);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_matched_pattern_attaches_every_object() {
        let registry = MockRegistry::new();
        registry.add_object("app:type=GC,name=young", vec![]);
        registry.add_object("app:type=GC,name=old", vec![]);
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut sub = subscriber(
            vec![subscription("GC", "app:type=GC,name=*", "info.duration", "D")],
            &sink,
        );

        sub.resubscribe(session.as_ref()).expect("ok");
        assert!(sub.pending().is_empty());
        assert_eq!(registry.listener_count(), 2);
    }

    #[test]
    fn test_install_failure_keeps_subscription_pending() {
        let registry = MockRegistry::new();
        registry.add_object("app:type=GC,name=young", vec![]);
        registry.fail_next_subscribes(1);
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut sub = subscriber(
            vec![subscription("GC", "app:type=GC,name=*", "info.duration", "D")],
            &sink,
        );

        sub.resubscribe(session.as_ref()).expect("install failure is local");
        assert_eq!(sub.pending().len(), 1);

        // Next tick retries and succeeds.
        sub.resubscribe(session.as_ref()).expect("ok");
        assert!(sub.pending().is_empty());
    }

    #[test]
    fn test_transport_error_propagates_and_keeps_all_pending() {
        let registry = MockRegistry::new();
        registry.add_object("a:id=1", vec![]);
        let session = registry.connect("h", 1, None).expect("connects");
        registry.kill_sessions();

        let sink = CollectingSink::new();
        let mut sub = subscriber(
            vec![
                subscription("One", "a:id=1", "x", "X"),
                subscription("Two", "b:id=2", "y", "Y"),
            ],
            &sink,
        );

        let err = sub.resubscribe(session.as_ref()).unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(sub.pending().len(), 2);
    }

    #[test]
    fn test_reset_restores_full_pending_set() {
        let registry = MockRegistry::new();
        registry.add_object("a:id=1", vec![]);
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut sub = subscriber(vec![subscription("One", "a:id=1", "x", "X")], &sink);

        sub.resubscribe(session.as_ref()).expect("ok");
        assert!(sub.pending().is_empty());

        sub.reset();
        assert_eq!(sub.pending().len(), 1);
    }

    #[test]
    fn test_notification_becomes_record() {
        let registry = MockRegistry::new();
        registry.add_object("app:type=GC,name=young", vec![]);
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut context = FieldMap::new();
        context.insert("server".to_string(), FieldValue::Text("catalog".into()));
        let mut sub = NotificationSubscriber::new(
            vec![subscription("GCEvent", "app:type=GC,name=*", "info.duration", "GCDuration")],
            "h",
            context,
            Arc::new(sink.clone()),
        );
        sub.resubscribe(session.as_ref()).expect("ok");

        registry.deliver(
            "app:type=GC,name=young",
            Notification {
                message: "gc".into(),
                payload: AttrValue::composite([(
                    "info",
                    AttrValue::composite([("duration", AttrValue::Int(42))]),
                )]),
            },
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("name"), Some(&FieldValue::Text("GCEvent".into())));
        assert_eq!(events[0].get("message"), Some(&FieldValue::Text("gc".into())));
        assert_eq!(events[0].get("GCDuration"), Some(&FieldValue::Int(42)));
        assert_eq!(events[0].get("server"), Some(&FieldValue::Text("catalog".into())));
    }

    #[test]
    fn test_key_property_path_is_not_read_from_payload() {
        let registry = MockRegistry::new();
        registry.add_object("app:type=GC,name=young", vec![]);
        let session = registry.connect("h", 1, None).expect("connects");

        let sink = CollectingSink::new();
        let mut sub = subscriber(
            vec![subscription("GCEvent", "app:type=GC,name=*", "=name", "PoolName")],
            &sink,
        );
        sub.resubscribe(session.as_ref()).expect("ok");

        // The payload deliberately carries a field named like the property.
        registry.deliver(
            "app:type=GC,name=young",
            Notification {
                message: "gc".into(),
                payload: AttrValue::composite([("name", AttrValue::from("not a key-property"))]),
            },
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(
            events[0].get("PoolName").is_none(),
            "payload field must not masquerade as the key-property"
        );
        assert_eq!(events[0].get("message"), Some(&FieldValue::Text("gc".into())));
    }
}
