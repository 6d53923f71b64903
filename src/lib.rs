//! mbean-pipe - polling and notification bridge for managed-object registries
//!
//! This crate polls a remote management-bean registry on a fixed interval,
//! flattens attribute values (including composite trees) into flat records,
//! and subscribes to asynchronous notifications from selected managed
//! objects, feeding both into one downstream record stream.
//!
//! It is a library: the host process owns configuration loading, logger
//! setup, and the output pipeline, and drives the pipe through
//! [`MBeanPipe::start`] / [`PipeHandle`]. The wire protocol is likewise
//! external - an SDK adapter implements [`RegistryClient`] and
//! [`RegistrySession`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      scheduler task                           │
//! │                                                               │
//! │  ┌───────────┐   ┌──────────────────┐   ┌────────────────┐   │
//! │  │ Schedule  │──▶│ ConnectionManager│──▶│ RegistrySession│   │
//! │  │ (drift-   │   │ (connect, loss   │   │  (SDK adapter) │   │
//! │  │ corrected)│   │  classification) │   └───────┬────────┘   │
//! │  └───────────┘   └──────────────────┘           │            │
//! │        │                                        │            │
//! │        ▼                                        ▼            │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌─────────────┐    │
//! │  │QueryExecutor │  │ Notification     │  │ value::     │    │
//! │  │ (patterns,   │  │ Subscriber       │──│ resolve_into│    │
//! │  │  tie-break)  │  │ (pending set)    │  │ (flattening)│    │
//! │  └──────┬───────┘  └────────┬─────────┘  └─────────────┘    │
//! └─────────┼───────────────────┼────────────────────────────────┘
//!           │                   │ listeners fire on the client
//!           ▼                   ▼ library's dispatch context
//!      ┌─────────────────────────────┐
//!      │     EventSink (host)        │
//!      └─────────────────────────────┘
//! ```
//!
//! Both paths terminate in flat [`OutputEvent`] records carrying the static
//! event context plus `host` and `name`.
//!
//! Nothing except a configuration error terminates the pipe: connection loss
//! rebuilds the session and re-arms every subscription, and all other
//! failures degrade to a log line plus sparse fields in the emitted records.

pub mod client;
pub mod config;
pub mod connection;
pub mod event;
pub mod pipe;
pub mod query;
pub mod scheduler;
pub mod subscribe;
pub mod testing;
pub mod value;

// Re-exports for convenience
pub use client::{
    unquote, ClientError, Credentials, Notification, NotificationListener, ObjectName,
    RegistryClient, RegistrySession,
};
pub use config::{
    parse_queries, parse_subscriptions, AttributeMapping, AttributePath, ConfigError, PipeConfig,
    Query, Subscription,
};
pub use connection::ConnectionManager;
pub use event::{EventSink, FieldMap, FieldValue, OutputEvent};
pub use pipe::{MBeanPipe, PipeHandle};
pub use query::QueryExecutor;
pub use scheduler::{Schedule, TickDelay, RECONNECT_PAUSE};
pub use subscribe::NotificationSubscriber;
pub use value::{resolve_into, AttrValue};
