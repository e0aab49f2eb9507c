//! Test doubles for the event bus.
//!
//! [`RecordingTransport`] implements [`Transport`] like production does and
//! records every broadcast, so tests can assert on what a business
//! operation published without a global collector. It wraps a
//! [`MemoryTransport`], so subscribers started against it still receive
//! messages.

use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::transport::{Mailbox, MemoryTransport, Message, SubscriptionId, Transport, TransportStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// One recorded broadcast attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBroadcast {
    /// Topic the message was broadcast on
    pub topic: String,
    /// The message
    pub message: Message,
    /// Whether the transport accepted it
    pub accepted: bool,
}

#[derive(Default)]
struct Recorder {
    broadcasts: Vec<RecordedBroadcast>,
    broadcast_failures: HashMap<usize, BusError>,
    subscribe_failures: HashMap<String, BusError>,
}

/// Spy transport that records broadcasts and can inject failures.
#[derive(Default)]
pub struct RecordingTransport {
    inner: MemoryTransport,
    recorder: Mutex<Recorder>,
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("broadcasts", &self.lock().broadcasts.len())
            .finish()
    }
}

impl RecordingTransport {
    /// Create a new recording transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th broadcast (0-based) fail with `error`.
    pub fn fail_broadcast(&self, call: usize, error: BusError) {
        self.lock().broadcast_failures.insert(call, error);
    }

    /// Make subscriptions to `topic` fail with `error`.
    pub fn fail_subscribe(&self, topic: impl Into<String>, error: BusError) {
        self.lock().subscribe_failures.insert(topic.into(), error);
    }

    /// Number of broadcast attempts, failed ones included.
    pub fn broadcast_count(&self) -> usize {
        self.lock().broadcasts.len()
    }

    /// Every recorded broadcast, in call order.
    pub fn broadcasts(&self) -> Vec<RecordedBroadcast> {
        self.lock().broadcasts.clone()
    }

    /// Events the transport accepted, in call order.
    pub fn published_events(&self) -> Vec<Event> {
        self.lock()
            .broadcasts
            .iter()
            .filter(|b| b.accepted)
            .filter_map(|b| b.message.clone().into_event())
            .collect()
    }

    /// Accepted events of the given type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<Event> {
        self.published_events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Forget recorded broadcasts. Injected failures stay in place.
    pub fn clear(&self) {
        self.lock().broadcasts.clear();
    }

    /// The wrapped in-memory transport.
    pub fn inner(&self) -> &MemoryTransport {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn broadcast(&self, topic: &str, message: Message) -> BusResult<()> {
        let injected = {
            let mut recorder = self.lock();
            let call = recorder.broadcasts.len();
            let injected = recorder.broadcast_failures.remove(&call);
            recorder.broadcasts.push(RecordedBroadcast {
                topic: topic.to_string(),
                message: message.clone(),
                accepted: injected.is_none(),
            });
            injected
        };

        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.broadcast(topic, message).await
    }

    async fn subscribe(&self, topic: &str, mailbox: Mailbox) -> BusResult<SubscriptionId> {
        let injected = self.lock().subscribe_failures.get(topic).cloned();
        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.subscribe(topic, mailbox).await
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> BusResult<()> {
        self.inner.unsubscribe(id).await
    }

    async fn stats(&self) -> TransportStats {
        self.inner.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DomainEvent, EventOptions};
    use serde_json::json;

    fn message(event_type: &str) -> Message {
        Message::DomainEvent(
            DomainEvent::new(event_type, "listing-1", "listing", json!({}), EventOptions::new())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_records_broadcasts() {
        let transport = RecordingTransport::new();
        transport.broadcast("listing:created", message("created")).await.unwrap();
        transport.broadcast("listing:priced", message("priced")).await.unwrap();

        assert_eq!(transport.broadcast_count(), 2);
        assert_eq!(transport.events_of_type("priced").len(), 1);
        assert_eq!(transport.broadcasts()[0].topic, "listing:created");
    }

    #[tokio::test]
    async fn test_injected_broadcast_failure() {
        let transport = RecordingTransport::new();
        transport.fail_broadcast(1, BusError::PublishError("rejected".into()));

        assert!(transport.broadcast("t", message("a")).await.is_ok());
        assert_eq!(
            transport.broadcast("t", message("b")).await,
            Err(BusError::PublishError("rejected".into()))
        );
        assert!(transport.broadcast("t", message("c")).await.is_ok());

        assert_eq!(transport.broadcast_count(), 3);
        let accepted: Vec<String> = transport
            .published_events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(accepted, ["a", "c"]);

        transport.clear();
        assert_eq!(transport.broadcast_count(), 0);
    }
}
