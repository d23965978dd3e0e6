//! In-process system events.
//!
//! A handler announces that something happened by publishing a typed
//! [`EventBody`] through its [`RequestContext`](crate::RequestContext). The
//! context carries one [`EventPublisher`] per [`Topic`]; an [`EventBus`] is
//! the in-process publisher that fans each [`SystemEvent`] out to its
//! subscribers. A body whose topic has no publisher is dropped with a debug
//! log line.
//!
//! On the wire an event is
//!
//! ```json
//! {"name": "article.cached", "body": {"id": "7"}, "occured_time": "2024-05-01T10:00:00.12Z"}
//! ```
//!
//! and [`EventRegistry::decode`] turns such bytes back into a [`SystemEvent`],
//! accepting only registered names whose body decodes as the registered type.
//!
//! # Adding an event
//!
//! 1. Define the body as a serde struct.
//! 2. Implement [`EventBody`] with its name and topic.
//! 3. Register it with the [`EventRegistry`] used for decoding.
//!
//! # Example
//!
//! ```
//! use harbor_core::events::{EventBody, EventBus, Publishers, SystemEvent, Topic};
//! use parking_lot::Mutex;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct UserSignedUp {
//!     id: String,
//! }
//!
//! impl EventBody for UserSignedUp {
//!     const NAME: &'static str = "user.signed_up";
//!     const TOPIC: Topic = Topic::new("users");
//! }
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let bus = EventBus::new();
//! let sink = Arc::clone(&seen);
//! bus.subscribe(move |event: &SystemEvent| sink.lock().push(event.name().to_string()));
//!
//! let publishers = Publishers::new().with(UserSignedUp::TOPIC, bus);
//! publishers.publish(UserSignedUp { id: "u-1".into() });
//!
//! assert_eq!(*seen.lock(), vec!["user.signed_up"]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Selects the publisher a context uses for a family of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(&'static str);

impl Topic {
    /// Creates a topic.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the topic name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A typed event payload.
pub trait EventBody: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Event name, e.g. `article.cached`.
    const NAME: &'static str;

    /// Topic whose publisher receives the event.
    const TOPIC: Topic;
}

/// Why an event could not be encoded or decoded.
#[derive(Error, Debug)]
pub enum EventError {
    /// No decoder is registered for the event name.
    #[error("no decoder registered for event '{0}'")]
    UnknownEvent(String),

    /// The event is not of the requested type.
    #[error("event is '{actual}', not '{expected}'")]
    NameMismatch {
        /// The requested event name.
        expected: &'static str,
        /// The event's name.
        actual: String,
    },

    /// The envelope or body is not valid JSON for its type.
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An event that occurred, with its body in JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    name: String,
    body: Value,
    #[serde(rename = "occured_time")]
    occurred_at: DateTime<Utc>,
}

impl SystemEvent {
    /// Stamps `body` with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Json`] if the body does not serialize.
    pub fn new<B: EventBody>(body: &B) -> Result<Self, EventError> {
        Ok(Self {
            name: B::NAME.to_string(),
            body: serde_json::to_value(body)?,
            occurred_at: Utc::now(),
        })
    }

    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the body as JSON.
    #[must_use]
    pub const fn raw_body(&self) -> &Value {
        &self.body
    }

    /// Returns when the event occurred.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Decodes the body as `B`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::NameMismatch`] if this is not a `B` event, and
    /// [`EventError::Json`] if the body does not decode.
    pub fn body<B: EventBody>(&self) -> Result<B, EventError> {
        if self.name != B::NAME {
            return Err(EventError::NameMismatch {
                expected: B::NAME,
                actual: self.name.clone(),
            });
        }
        Ok(B::deserialize(&self.body)?)
    }

    /// Serializes the event envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }
}

type BodyCheck = fn(&Value) -> Result<(), serde_json::Error>;

fn check_body<B: EventBody>(body: &Value) -> Result<(), serde_json::Error> {
    B::deserialize(body).map(|_| ())
}

/// Decodes serialized events of the registered types.
#[derive(Clone, Default)]
pub struct EventRegistry {
    checks: HashMap<&'static str, BodyCheck>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.checks.keys().collect();
        names.sort_unstable();
        f.debug_struct("EventRegistry").field("events", &names).finish()
    }
}

impl EventRegistry {
    /// Creates a registry that accepts no events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts events of type `B`.
    #[must_use]
    pub fn register<B: EventBody>(mut self) -> Self {
        self.checks.insert(B::NAME, check_body::<B>);
        self
    }

    /// Returns `true` if events named `name` are accepted.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Decodes one serialized event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEvent`] for unregistered names and
    /// [`EventError::Json`] for malformed envelopes or bodies.
    pub fn decode(&self, data: &[u8]) -> Result<SystemEvent, EventError> {
        let event: SystemEvent = serde_json::from_slice(data)?;
        let check = self
            .checks
            .get(event.name())
            .ok_or_else(|| EventError::UnknownEvent(event.name.clone()))?;
        check(&event.body)?;
        Ok(event)
    }
}

/// Receives published events.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event.
    fn handle(&self, event: &SystemEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&SystemEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: &SystemEvent) {
        self(event);
    }
}

/// Delivers events published on a topic.
pub trait EventPublisher: Send + Sync + 'static {
    /// Publishes one event.
    fn publish(&self, event: SystemEvent);
}

/// In-process publisher calling every subscriber in registration order.
///
/// Clones share their subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn subscribe(&self, handler: impl EventHandler) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: SystemEvent) {
        // Handlers may subscribe while being called.
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            handler.handle(&event);
        }
    }
}

/// The publishers a request can reach, keyed by topic.
///
/// Cloning is cheap.
#[derive(Clone, Default)]
pub struct Publishers {
    by_topic: Arc<HashMap<Topic, Arc<dyn EventPublisher>>>,
}

impl fmt::Debug for Publishers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<_> = self.by_topic.keys().collect();
        topics.sort_unstable();
        f.debug_struct("Publishers").field("topics", &topics).finish()
    }
}

impl Publishers {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `topic` to `publisher`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, topic: Topic, publisher: impl EventPublisher) -> Self {
        Arc::make_mut(&mut self.by_topic).insert(topic, Arc::new(publisher));
        self
    }

    /// Returns the publisher of `topic`.
    #[must_use]
    pub fn get(&self, topic: Topic) -> Option<&Arc<dyn EventPublisher>> {
        self.by_topic.get(&topic)
    }

    /// Returns `true` if no topic has a publisher.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }

    /// Publishes `body` to the publisher of its topic, if there is one.
    pub fn publish<B: EventBody>(&self, body: B) {
        let Some(publisher) = self.get(B::TOPIC) else {
            tracing::debug!(event = B::NAME, topic = %B::TOPIC, "no publisher for event");
            return;
        };
        match SystemEvent::new(&body) {
            Ok(event) => publisher.publish(event),
            Err(err) => tracing::warn!(event = B::NAME, error = %err, "failed to encode event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FooCreated {
        foo: Value,
    }

    impl EventBody for FooCreated {
        const NAME: &'static str = "foo.created";
        const TOPIC: Topic = Topic::new("foo");
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FooDeleted {
        id: u64,
    }

    impl EventBody for FooDeleted {
        const NAME: &'static str = "foo.deleted";
        const TOPIC: Topic = Topic::new("foo");
    }

    fn registry() -> EventRegistry {
        EventRegistry::new().register::<FooCreated>()
    }

    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<SystemEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event: &SystemEvent| sink.lock().push(event.clone()));
        (bus, seen)
    }

    #[test]
    fn test_event_survives_json() {
        let body = FooCreated {
            foo: json!({ "id": "some-id" }),
        };
        let event = SystemEvent::new(&body).unwrap();

        let decoded = registry().decode(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.body::<FooCreated>().unwrap(), body);
    }

    #[test]
    fn test_wire_format() {
        let event = SystemEvent::new(&FooCreated {
            foo: json!({ "id": "my-id" }),
        })
        .unwrap();

        let wire: Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(wire["name"], "foo.created");
        assert_eq!(wire["body"], json!({ "foo": { "id": "my-id" } }));
        assert!(wire["occured_time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_unregistered_event_is_rejected() {
        let event = SystemEvent::new(&FooDeleted { id: 1 }).unwrap();
        let err = registry().decode(&event.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, EventError::UnknownEvent(ref name) if name == "foo.deleted"));
    }

    #[test]
    fn test_body_must_match_registered_type() {
        let data = concat!(
            r#"{"name":"foo.created","body":{"id":1},"#,
            r#""occured_time":"2024-05-01T10:00:00Z"}"#
        )
        .as_bytes();
        assert!(matches!(registry().decode(data), Err(EventError::Json(_))));
        assert!(matches!(registry().decode(b"{}"), Err(EventError::Json(_))));
    }

    #[test]
    fn test_body_checks_name() {
        let event = SystemEvent::new(&FooDeleted { id: 3 }).unwrap();
        assert_eq!(event.body::<FooDeleted>().unwrap(), FooDeleted { id: 3 });
        assert!(matches!(
            event.body::<FooCreated>(),
            Err(EventError::NameMismatch { expected: "foo.created", .. })
        ));
    }

    #[test]
    fn test_bus_delivers_to_every_subscriber() {
        let (bus, first) = recording_bus();
        let second = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&second);
        bus.subscribe(move |_: &SystemEvent| *counter.lock() += 1);
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::new(&FooDeleted { id: 1 }).unwrap());
        bus.publish(SystemEvent::new(&FooDeleted { id: 2 }).unwrap());

        assert_eq!(first.lock().len(), 2);
        assert_eq!(*second.lock(), 2);
    }

    #[test]
    fn test_subscribing_from_a_handler_does_not_deadlock() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe(move |_: &SystemEvent| inner.subscribe(|_: &SystemEvent| {}));

        bus.publish(SystemEvent::new(&FooDeleted { id: 1 }).unwrap());
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_publish_routes_by_topic() {
        let (bus, seen) = recording_bus();
        let publishers = Publishers::new().with(Topic::new("foo"), bus);

        publishers.publish(FooCreated {
            foo: json!({ "id": "my-id" }),
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].name(), "foo.created");
        assert_eq!(seen[0].raw_body(), &json!({ "foo": { "id": "my-id" } }));
    }

    #[test]
    fn test_publish_without_publisher_is_dropped() {
        let (bus, seen) = recording_bus();
        let publishers = Publishers::new().with(Topic::new("bar"), bus);

        publishers.publish(FooDeleted { id: 1 });
        assert!(seen.lock().is_empty());
        assert!(Publishers::new().is_empty());
    }
}
