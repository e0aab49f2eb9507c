//! Event publisher
//!
//! The publisher hands events to the transport. It never waits on
//! subscribers and never retries: a failure here is a transport failure and
//! goes straight back to the business code that published.

use crate::config::BusConfig;
use crate::error::BusResult;
use crate::event::Event;
use crate::transport::{Message, Transport};
use std::sync::Arc;

/// Publishes events on a broadcast transport.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    log_payloads: bool,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("log_payloads", &self.log_payloads)
            .finish()
    }
}

impl Publisher {
    /// Create a publisher over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            log_payloads: false,
        }
    }

    /// Create a publisher using the settings in `config`.
    pub fn with_config(transport: Arc<dyn Transport>, config: &BusConfig) -> Self {
        Self {
            transport,
            log_payloads: config.log_payloads,
        }
    }

    /// Publish an event on its derived topic.
    pub async fn publish(&self, event: &Event) -> BusResult<()> {
        let topic = event.topic();
        self.publish_to(event, &topic).await
    }

    /// Publish an event on an explicit topic.
    ///
    /// The transport's result is returned unchanged.
    pub async fn publish_to(&self, event: &Event, topic: &str) -> BusResult<()> {
        if self.log_payloads {
            tracing::trace!(
                event_id = %event.id(),
                topic = %topic,
                payload = %serde_json::Value::Object(event.payload().clone()),
                "Publishing event"
            );
        }

        let result = self
            .transport
            .broadcast(topic, Message::from(event.clone()))
            .await;

        match &result {
            Ok(()) => tracing::debug!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                kind = %event.kind(),
                subject_id = %event.subject_id(),
                topic = %topic,
                "Event published"
            ),
            Err(e) => tracing::error!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                kind = %event.kind(),
                subject_id = %event.subject_id(),
                topic = %topic,
                error = %e,
                "Failed to publish event"
            ),
        }

        result
    }

    /// Publish every event, returning the first failure.
    ///
    /// All events are attempted even after a failure, so on `Err` some
    /// subset may already have been delivered.
    pub async fn publish_all(&self, events: &[Event]) -> BusResult<()> {
        let mut first_error = None;

        for event in events {
            if let Err(e) = self.publish(event).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => {
                tracing::warn!(
                    events = events.len(),
                    error = %e,
                    "Batch publish finished with failures; some events may have been delivered"
                );
                Err(e)
            }
        }
    }
}
