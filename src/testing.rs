//! Test doubles for the registry-client boundary and the output sink.
//!
//! [`MockRegistry`] is an in-memory registry client: objects are added with
//! fixed attributes, patterns resolve with `*` wildcards, and sessions can be
//! invalidated to simulate connection loss. [`CollectingSink`] accumulates
//! emitted records for assertions.
//!
//! Used by this crate's own unit and integration tests; exported so hosts
//! can test their adapter and pipeline wiring the same way.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{
    ClientError, Credentials, Notification, NotificationListener, ObjectName, RegistryClient,
    RegistrySession,
};
use crate::event::{EventSink, OutputEvent};
use crate::value::AttrValue;

// ============================================================================
// Mock Registry
// ============================================================================

struct MockObject {
    name: ObjectName,
    attributes: BTreeMap<String, AttrValue>,
}

struct Listener {
    canonical: String,
    epoch: u64,
    handler: Arc<dyn NotificationListener>,
}

#[derive(Default)]
struct MockState {
    objects: Vec<MockObject>,
    listeners: Vec<Listener>,
    epoch: u64,
    connect_count: u32,
    subscribe_count: u32,
    connect_failures: u32,
    subscribe_failures: u32,
    connect_delay: Option<Duration>,
    last_credentials: Option<Credentials>,
}

/// In-memory registry client for tests.
#[derive(Clone, Default)]
pub struct MockRegistry {
    state: Arc<Mutex<MockState>>,
}

impl MockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object with fixed attribute values.
    pub fn add_object(&self, name: &str, attributes: Vec<(&str, AttrValue)>) {
        let mut state = self.lock();
        state.objects.push(MockObject {
            name: ObjectName::new(name),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
    }

    /// Removes an object by canonical name; its listeners go with it.
    pub fn remove_object(&self, name: &str) {
        let mut state = self.lock();
        state.objects.retain(|o| o.name.canonical() != name);
        state.listeners.retain(|l| l.canonical != name);
    }

    /// Makes the next `n` connect attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Makes the next `n` subscribe calls fail with an application error.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().subscribe_failures = n;
    }

    /// Makes every connect attempt block for `delay`, simulating slow
    /// network I/O.
    pub fn delay_connects(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Invalidates every open session: all further calls through them fail
    /// with a transport error, and their listeners are gone.
    pub fn kill_sessions(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        state.listeners.retain(|l| l.epoch >= epoch);
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.lock().connect_count
    }

    /// Subscribe calls accepted so far (across all sessions).
    #[must_use]
    pub fn subscribe_count(&self) -> u32 {
        self.lock().subscribe_count
    }

    /// Listeners currently installed on live sessions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Credentials seen by the most recent connect attempt.
    #[must_use]
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.lock().last_credentials.clone()
    }

    /// Delivers a notification to every live listener on `object_name`,
    /// the way the client library's dispatch context would.
    pub fn deliver(&self, object_name: &str, notification: Notification) {
        let handlers: Vec<Arc<dyn NotificationListener>> = {
            let state = self.lock();
            state
                .listeners
                .iter()
                .filter(|l| l.canonical == object_name && l.epoch == state.epoch)
                .map(|l| Arc::clone(&l.handler))
                .collect()
        };
        for handler in handlers {
            handler.on_notification(&notification);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RegistryClient for MockRegistry {
    fn connect(
        &self,
        _host: &str,
        _port: u16,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RegistrySession>, ClientError> {
        // Sleep outside the lock so other registry calls keep working.
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        state.last_credentials = credentials.cloned();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ClientError::transport("connection refused"));
        }
        state.connect_count += 1;
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            epoch: state.epoch,
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    epoch: u64,
}

impl MockSession {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, ClientError> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.epoch != self.epoch {
            return Err(ClientError::transport("session closed"));
        }
        Ok(state)
    }
}

impl RegistrySession for MockSession {
    fn find_objects(&self, pattern: &str) -> Result<Vec<ObjectName>, ClientError> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|o| pattern_matches(pattern, o.name.canonical()))
            .map(|o| o.name.clone())
            .collect())
    }

    fn get_attributes(
        &self,
        object: &ObjectName,
        names: &[String],
    ) -> Result<BTreeMap<String, AttrValue>, ClientError> {
        let state = self.lock()?;
        let found = state
            .objects
            .iter()
            .find(|o| o.name == *object)
            .ok_or_else(|| ClientError::remote(format!("no such object: {object}")))?;

        Ok(names
            .iter()
            .filter_map(|n| found.attributes.get(n).map(|v| (n.clone(), v.clone())))
            .collect())
    }

    fn subscribe(
        &self,
        object: &ObjectName,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<(), ClientError> {
        let mut state = self.lock()?;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(ClientError::remote("listener rejected"));
        }
        if !state.objects.iter().any(|o| o.name == *object) {
            return Err(ClientError::remote(format!("no such object: {object}")));
        }
        state.subscribe_count += 1;
        state.listeners.push(Listener {
            canonical: object.canonical().to_string(),
            epoch: self.epoch,
            handler: listener,
        });
        Ok(())
    }
}

/// Matches a name against a pattern with `*` wildcards.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }

    let mut remainder = name;
    let mut parts = pattern.split('*').peekable();
    let mut first = true;
    while let Some(part) = parts.next() {
        if first {
            first = false;
            let Some(rest) = remainder.strip_prefix(part) else {
                return false;
            };
            remainder = rest;
        } else if parts.peek().is_none() {
            return part.is_empty() || remainder.ends_with(part);
        } else {
            let Some(at) = remainder.find(part) else {
                return false;
            };
            remainder = &remainder[at + part.len()..];
        }
    }
    true
}

// ============================================================================
// Collecting Sink
// ============================================================================

/// Sink that stores every submitted record.
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<OutputEvent>>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records received so far.
    #[must_use]
    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock().clone()
    }

    /// Number of records received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no record has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and returns all records received so far.
    pub fn drain(&self) -> Vec<OutputEvent> {
        self.lock().drain(..).collect()
    }

    /// Waits until at least `n` records arrived, or `timeout` elapses.
    ///
    /// Returns true on success. Polling granularity is a few milliseconds,
    /// intended for integration tests with short intervals.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OutputEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventSink for CollectingSink {
    fn submit(&self, event: OutputEvent) {
        self.lock().push(event);
    }
}
