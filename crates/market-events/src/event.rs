//! Event types for communication between bounded contexts
//!
//! Two event kinds travel over the bus:
//! - [`DomainEvent`]: something happened to an aggregate, consumed inside
//!   the context that owns the aggregate
//! - [`IntegrationEvent`]: a context announces a fact to other contexts
//!
//! Both are immutable once built. Fields are private; the factories are the
//! only way in, so the identifying-field invariants always hold.

use crate::error::{EventError, EventResult};
use crate::topic;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Event payload: a JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Free-form event metadata (correlation ids, actor, request id, ...).
pub type Metadata = HashMap<String, Value>;

/// Payload key the domain event factory pins to the aggregate id.
pub const AGGREGATE_ID_KEY: &str = "aggregate_id";

/// Payload key the integration event factory pins to the entity id.
pub const ENTITY_ID_KEY: &str = "entity_id";

/// Event kind, used to tag messages on the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Intra-context event
    Domain,
    /// Cross-context event
    Integration,
}

impl EventKind {
    /// Get the kind as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Domain => "domain",
            EventKind::Integration => "integration",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional inputs for the event factories.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    /// Partial payload merged underneath the caller's payload
    pub payload: Payload,
    /// Metadata attached to the event
    pub metadata: Option<Metadata>,
    /// Explicit occurrence time (defaults to now)
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload entry.
    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Set the occurrence time.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}

/// An event raised by an aggregate inside its own bounded context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    aggregate_type: String,
    payload: Payload,
    occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

impl DomainEvent {
    /// Create a new domain event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - Event tag (e.g., `"enrolled"`)
    /// * `aggregate_id` - Id of the aggregate that raised the event; must not be blank
    /// * `aggregate_type` - Aggregate tag (e.g., `"course"`)
    /// * `payload` - JSON object (or `null` for an empty payload)
    /// * `opts` - Partial payload, metadata and timestamp
    ///
    /// The payload is assembled as `opts.payload`, overlaid by `payload`,
    /// then `"aggregate_id"` is forced to `aggregate_id`. Callers cannot
    /// spoof the identifying field through the payload.
    ///
    /// # Errors
    ///
    /// `InvalidAggregateId` when `aggregate_id` is blank, `MissingField` when
    /// a tag is empty, `InvalidTag` when a tag contains `':'`,
    /// `InvalidPayload` when `payload` is not an object.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: Value,
        opts: EventOptions,
    ) -> EventResult<Self> {
        let aggregate_id = require_id(aggregate_id.into(), EventError::InvalidAggregateId)?;
        let event_type = require_tag(event_type.into(), "event_type")?;
        let aggregate_type = require_tag(aggregate_type.into(), "aggregate_type")?;
        let payload = merge_payload(opts.payload, payload, AGGREGATE_ID_KEY, &aggregate_id)?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type,
            aggregate_id,
            aggregate_type,
            payload,
            occurred_at: opts.occurred_at.unwrap_or_else(Utc::now),
            metadata: opts.metadata,
        })
    }

    /// Unique event id.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Event tag.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Id of the aggregate that raised the event.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Aggregate tag.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Event payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// When the event occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Event metadata, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata("correlation_id", Value::String(correlation_id.into()))
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `{aggregate_type}:{event_type}`
    pub fn topic(&self) -> String {
        topic::build_topic(&self.aggregate_type, &self.event_type)
    }
}

/// An event published by one bounded context for consumption by others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationEvent {
    event_id: Uuid,
    event_type: String,
    entity_id: String,
    entity_type: String,
    source_context: String,
    payload: Payload,
    occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

impl IntegrationEvent {
    /// Create a new integration event.
    ///
    /// Same rules as [`DomainEvent::new`], with `"entity_id"` as the pinned
    /// payload field and `source_context` naming the producing context.
    pub fn new(
        event_type: impl Into<String>,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        source_context: impl Into<String>,
        payload: Value,
        opts: EventOptions,
    ) -> EventResult<Self> {
        let entity_id = require_id(entity_id.into(), EventError::InvalidEntityId)?;
        let event_type = require_tag(event_type.into(), "event_type")?;
        let entity_type = require_tag(entity_type.into(), "entity_type")?;
        let source_context = require_tag(source_context.into(), "source_context")?;
        let payload = merge_payload(opts.payload, payload, ENTITY_ID_KEY, &entity_id)?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type,
            entity_id,
            entity_type,
            source_context,
            payload,
            occurred_at: opts.occurred_at.unwrap_or_else(Utc::now),
            metadata: opts.metadata,
        })
    }

    /// Unique event id.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Event tag.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Id of the entity the event is about.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Entity tag.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Bounded context that produced the event.
    pub fn source_context(&self) -> &str {
        &self.source_context
    }

    /// Event payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// When the event occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Event metadata, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata("correlation_id", Value::String(correlation_id.into()))
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `integration:{source_context}:{event_type}`
    pub fn topic(&self) -> String {
        topic::build_integration_topic(&self.source_context, &self.event_type)
    }
}

/// Any event the bus can carry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Intra-context event
    Domain(DomainEvent),
    /// Cross-context event
    Integration(IntegrationEvent),
}

impl Event {
    /// Event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Domain(_) => EventKind::Domain,
            Event::Integration(_) => EventKind::Integration,
        }
    }

    /// Unique event id.
    pub fn id(&self) -> Uuid {
        match self {
            Event::Domain(e) => e.event_id(),
            Event::Integration(e) => e.event_id(),
        }
    }

    /// Event tag.
    pub fn event_type(&self) -> &str {
        match self {
            Event::Domain(e) => e.event_type(),
            Event::Integration(e) => e.event_type(),
        }
    }

    /// Aggregate id for domain events, entity id for integration events.
    pub fn subject_id(&self) -> &str {
        match self {
            Event::Domain(e) => e.aggregate_id(),
            Event::Integration(e) => e.entity_id(),
        }
    }

    /// Aggregate type for domain events, entity type for integration events.
    pub fn subject_type(&self) -> &str {
        match self {
            Event::Domain(e) => e.aggregate_type(),
            Event::Integration(e) => e.entity_type(),
        }
    }

    /// Event payload.
    pub fn payload(&self) -> &Payload {
        match self {
            Event::Domain(e) => e.payload(),
            Event::Integration(e) => e.payload(),
        }
    }

    /// When the event occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Event::Domain(e) => e.occurred_at(),
            Event::Integration(e) => e.occurred_at(),
        }
    }

    /// Event metadata, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Event::Domain(e) => e.metadata(),
            Event::Integration(e) => e.metadata(),
        }
    }

    /// Get the topic for this event.
    pub fn topic(&self) -> String {
        topic::derive_topic(self)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload().clone()))
    }
}

impl From<DomainEvent> for Event {
    fn from(event: DomainEvent) -> Self {
        Event::Domain(event)
    }
}

impl From<IntegrationEvent> for Event {
    fn from(event: IntegrationEvent) -> Self {
        Event::Integration(event)
    }
}

fn require_id(id: String, invalid: fn(String) -> EventError) -> EventResult<String> {
    if id.trim().is_empty() {
        return Err(invalid(id));
    }
    Ok(id)
}

fn require_tag(tag: String, field: &'static str) -> EventResult<String> {
    if tag.trim().is_empty() {
        return Err(EventError::MissingField(field));
    }
    // Tags are topic segments; a separator would let two events share a topic.
    if tag.contains(topic::TOPIC_SEPARATOR) {
        return Err(EventError::InvalidTag { field, value: tag });
    }
    Ok(tag)
}

fn merge_payload(
    base: Payload,
    payload: Value,
    id_key: &str,
    id: &str,
) -> EventResult<Payload> {
    let mut merged = base;
    match payload {
        Value::Object(map) => merged.extend(map),
        Value::Null => {}
        other => return Err(EventError::InvalidPayload(json_kind(&other))),
    }
    // Identifying field always wins.
    merged.insert(id_key.to_string(), Value::String(id.to_string()));
    Ok(merged)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enrolled(payload: Value) -> EventResult<DomainEvent> {
        DomainEvent::new("enrolled", "course-42", "course", payload, EventOptions::new())
    }

    #[test]
    fn test_domain_event_creation() {
        let event = enrolled(json!({"student_id": "s-1"}))
            .unwrap()
            .with_correlation_id("req-7");

        assert_eq!(event.event_type(), "enrolled");
        assert_eq!(event.aggregate_id(), "course-42");
        assert_eq!(event.aggregate_type(), "course");
        assert_eq!(event.payload()["student_id"], json!("s-1"));
        assert_eq!(event.payload()[AGGREGATE_ID_KEY], json!("course-42"));
        assert_eq!(event.metadata().unwrap()["correlation_id"], json!("req-7"));
    }

    #[test]
    fn test_event_ids_are_fresh() {
        let a = enrolled(Value::Null).unwrap();
        let b = enrolled(Value::Null).unwrap();
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn test_empty_aggregate_id_rejected() {
        let err = DomainEvent::new("enrolled", "", "course", json!({}), EventOptions::new())
            .unwrap_err();
        assert_eq!(err, EventError::InvalidAggregateId(String::new()));

        let err = DomainEvent::new("enrolled", "   ", "course", json!({}), EventOptions::new())
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidAggregateId(_)));
    }

    #[test]
    fn test_identifying_field_cannot_be_spoofed() {
        let event = DomainEvent::new(
            "x",
            "id-1",
            "agg",
            json!({"aggregate_id": "spoofed"}),
            EventOptions::new().with_payload("aggregate_id", json!("also-spoofed")),
        )
        .unwrap();
        assert_eq!(event.payload()[AGGREGATE_ID_KEY], json!("id-1"));
    }

    #[test]
    fn test_caller_payload_overrides_options() {
        let event = DomainEvent::new(
            "priced",
            "listing-1",
            "listing",
            json!({"fee": 10}),
            EventOptions::new()
                .with_payload("fee", json!(5))
                .with_payload("currency", json!("EUR")),
        )
        .unwrap();
        assert_eq!(event.payload()["fee"], json!(10));
        assert_eq!(event.payload()["currency"], json!("EUR"));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let err = enrolled(json!([1, 2])).unwrap_err();
        assert_eq!(err, EventError::InvalidPayload("array"));
    }

    #[test]
    fn test_missing_tags_rejected() {
        let err = DomainEvent::new("", "id-1", "course", json!({}), EventOptions::new())
            .unwrap_err();
        assert_eq!(err, EventError::MissingField("event_type"));

        let err = IntegrationEvent::new("created", "u-1", "user", "", json!({}), EventOptions::new())
            .unwrap_err();
        assert_eq!(err, EventError::MissingField("source_context"));
    }

    #[test]
    fn test_tags_with_separator_rejected() {
        let err = DomainEvent::new(
            "accounts:user_registered",
            "user-7",
            "integration",
            json!({}),
            EventOptions::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EventError::InvalidTag {
                field: "event_type",
                value: "accounts:user_registered".to_string(),
            }
        );

        let err = DomainEvent::new("c", "id-1", "a:b", json!({}), EventOptions::new()).unwrap_err();
        assert!(matches!(err, EventError::InvalidTag { field: "aggregate_type", .. }));

        let err = IntegrationEvent::new("x", "u-1", "user:admin", "accounts", json!({}), EventOptions::new())
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidTag { field: "entity_type", .. }));

        let err = IntegrationEvent::new("x", "u-1", "user", "billing:eu", json!({}), EventOptions::new())
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidTag { field: "source_context", .. }));
    }

    #[test]
    fn test_integration_event_creation() {
        let event = IntegrationEvent::new(
            "profile_requested",
            "user-9",
            "user",
            "accounts",
            json!({"entity_id": "spoofed", "email": "a@b.c"}),
            EventOptions::new(),
        )
        .unwrap();

        assert_eq!(event.source_context(), "accounts");
        assert_eq!(event.payload()[ENTITY_ID_KEY], json!("user-9"));

        let err = IntegrationEvent::new("x", "", "user", "accounts", json!({}), EventOptions::new())
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidEntityId(_)));
    }

    #[test]
    fn test_event_accessors() {
        let domain: Event = enrolled(json!({})).unwrap().into();
        assert_eq!(domain.kind(), EventKind::Domain);
        assert_eq!(domain.subject_id(), "course-42");
        assert_eq!(domain.subject_type(), "course");

        let integration: Event = IntegrationEvent::new(
            "created",
            "u-1",
            "user",
            "accounts",
            Value::Null,
            EventOptions::new(),
        )
        .unwrap()
        .into();
        assert_eq!(integration.kind(), EventKind::Integration);
        assert_eq!(integration.subject_id(), "u-1");
    }

    #[test]
    fn test_parse_payload() {
        #[derive(Deserialize)]
        struct Enrolled {
            aggregate_id: String,
            student_id: String,
        }

        let event: Event = enrolled(json!({"student_id": "s-1"})).unwrap().into();
        let parsed: Enrolled = event.parse_payload().unwrap();
        assert_eq!(parsed.aggregate_id, "course-42");
        assert_eq!(parsed.student_id, "s-1");
    }

    #[test]
    fn test_serialized_kind_tag() {
        let event: Event = enrolled(json!({})).unwrap().into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], json!("domain"));
        assert_eq!(json["aggregate_id"], json!("course-42"));
        assert!(json.get("metadata").is_none());
    }
}
