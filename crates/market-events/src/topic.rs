//! Topic derivation
//!
//! Topics are the only addressing mechanism on the bus. Publishers derive
//! the topic from the event, subscribers build it from the type tags they
//! care about; both go through the functions in this module.
//!
//! - Domain events: `{aggregate_type}:{event_type}` (e.g., `course:enrolled`)
//! - Integration events: `integration:{source_context}:{event_type}`
//!   (e.g., `integration:accounts:user_registered`)
//!
//! Event constructors reject tags containing [`TOPIC_SEPARATOR`], so two
//! distinct events never derive the same topic.

use crate::event::Event;

/// Prefix shared by every integration event topic.
pub const INTEGRATION_PREFIX: &str = "integration";

/// Separator between topic segments.
pub const TOPIC_SEPARATOR: char = ':';

/// Build the topic for a domain event type.
pub fn build_topic(aggregate_type: &str, event_type: &str) -> String {
    format!("{aggregate_type}{TOPIC_SEPARATOR}{event_type}")
}

/// Build the topic for an integration event type.
pub fn build_integration_topic(source_context: &str, event_type: &str) -> String {
    format!("{INTEGRATION_PREFIX}{TOPIC_SEPARATOR}{source_context}{TOPIC_SEPARATOR}{event_type}")
}

/// Derive the topic an event is published on.
pub fn derive_topic(event: &Event) -> String {
    match event {
        Event::Domain(e) => build_topic(e.aggregate_type(), e.event_type()),
        Event::Integration(e) => build_integration_topic(e.source_context(), e.event_type()),
    }
}
