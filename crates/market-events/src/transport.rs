//! Broadcast transport
//!
//! This module defines the transport abstraction the publisher and the
//! subscribers talk to, plus the in-memory implementation used by
//! single-process deployments.
//!
//! A transport delivers a copy of every broadcast message to every mailbox
//! currently subscribed to the message's topic. It keeps nothing: a mailbox
//! that subscribes after a broadcast never sees it.

use crate::error::{BusError, BusResult};
use crate::event::{DomainEvent, Event, IntegrationEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[cfg(feature = "memory")]
use std::collections::HashMap;
#[cfg(feature = "memory")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "memory")]
use tokio::sync::RwLock;

/// Message shape tag.
///
/// Several message shapes can share one mailbox; subscribers use the tag to
/// pick the ones they dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageTag {
    /// Carries a [`DomainEvent`]
    DomainEvent,
    /// Carries an [`IntegrationEvent`]
    IntegrationEvent,
    /// Anything else broadcast on the transport
    Other,
}

impl MessageTag {
    /// Get the tag as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::DomainEvent => "domain_event",
            MessageTag::IntegrationEvent => "integration_event",
            MessageTag::Other => "other",
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Domain event broadcast
    DomainEvent(DomainEvent),
    /// Integration event broadcast
    IntegrationEvent(IntegrationEvent),
    /// Foreign message sharing the transport (cache pings, admin commands, ...)
    Other {
        /// Free-form shape name
        kind: String,
        /// Message body
        body: Value,
    },
}

impl Message {
    /// Get the message shape tag.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::DomainEvent(_) => MessageTag::DomainEvent,
            Message::IntegrationEvent(_) => MessageTag::IntegrationEvent,
            Message::Other { .. } => MessageTag::Other,
        }
    }

    /// Convert into the carried event, if any.
    pub fn into_event(self) -> Option<Event> {
        match self {
            Message::DomainEvent(e) => Some(Event::Domain(e)),
            Message::IntegrationEvent(e) => Some(Event::Integration(e)),
            Message::Other { .. } => None,
        }
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        match event {
            Event::Domain(e) => Message::DomainEvent(e),
            Event::Integration(e) => Message::IntegrationEvent(e),
        }
    }
}

/// A message as it lands in a mailbox.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message was broadcast on
    pub topic: String,
    /// The message (shared between all receiving mailboxes)
    pub message: Arc<Message>,
}

/// Sending half of a subscriber mailbox.
pub type Mailbox = mpsc::UnboundedSender<Delivery>;

/// Receiving half of a subscriber mailbox.
pub type MailboxReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Create a new mailbox.
pub fn mailbox() -> (Mailbox, MailboxReceiver) {
    mpsc::unbounded_channel()
}

/// Subscription handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a fresh subscription id.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broadcast transport trait.
///
/// Implementations must accept concurrent broadcasts and subscriptions from
/// many callers without external locking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a copy of `message` to every mailbox subscribed to `topic`.
    ///
    /// Returns once the transport has accepted the message, not once
    /// subscribers have processed it.
    async fn broadcast(&self, topic: &str, message: Message) -> BusResult<()>;

    /// Register `mailbox` for messages broadcast on `topic`.
    async fn subscribe(&self, topic: &str, mailbox: Mailbox) -> BusResult<SubscriptionId>;

    /// Remove a subscription.
    async fn unsubscribe(&self, id: &SubscriptionId) -> BusResult<()>;

    /// Get transport stats.
    async fn stats(&self) -> TransportStats;
}

/// Transport statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total messages broadcast
    pub messages_broadcast: u64,
    /// Total copies handed to mailboxes
    pub messages_delivered: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

#[cfg(feature = "memory")]
struct Subscriber {
    id: SubscriptionId,
    mailbox: Mailbox,
}

/// In-memory broadcast transport.
///
/// This is suitable for single-process deployments and testing. Topics are
/// matched exactly; a mailbox whose receiver is gone is pruned on the next
/// broadcast to its topic.
#[cfg(feature = "memory")]
pub struct MemoryTransport {
    /// Topic subscribers
    topics: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
    /// Statistics
    stats: Arc<RwLock<TransportStats>>,
    /// Set once the transport is shut down
    closed: AtomicBool,
}

#[cfg(feature = "memory")]
impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(feature = "memory")]
impl MemoryTransport {
    /// Create a new in-memory transport.
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live mailboxes subscribed to `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.mailbox.is_closed()).count())
            .unwrap_or(0)
    }

    /// Shut the transport down. Later broadcasts and subscriptions fail
    /// with [`BusError::ChannelClosed`]; existing mailboxes are released.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.write().await.clear();
        self.stats.write().await.active_subscriptions = 0;
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ChannelClosed);
        }
        Ok(())
    }

    async fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        let mut removed = 0;
        if let Some(subs) = topics.get_mut(topic) {
            let before = subs.len();
            subs.retain(|s| !s.mailbox.is_closed());
            removed = before - subs.len();
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
        drop(topics);

        if removed > 0 {
            let mut stats = self.stats.write().await;
            stats.active_subscriptions = stats.active_subscriptions.saturating_sub(removed);
            tracing::debug!(topic = %topic, removed, "Pruned closed mailboxes");
        }
    }
}

#[cfg(feature = "memory")]
impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "memory")]
#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast(&self, topic: &str, message: Message) -> BusResult<()> {
        self.ensure_open()?;

        let message = Arc::new(message);
        let mut delivered = 0u64;
        let mut saw_closed = false;

        {
            let topics = self.topics.read().await;
            if let Some(subs) = topics.get(topic) {
                for sub in subs {
                    let delivery = Delivery {
                        topic: topic.to_string(),
                        message: Arc::clone(&message),
                    };
                    match sub.mailbox.send(delivery) {
                        Ok(()) => delivered += 1,
                        Err(_) => saw_closed = true,
                    }
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.messages_broadcast += 1;
            stats.messages_delivered += delivered;
        }

        if saw_closed {
            self.prune(topic).await;
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, mailbox: Mailbox) -> BusResult<SubscriptionId> {
        self.ensure_open()?;

        let id = SubscriptionId::new();
        {
            let mut topics = self.topics.write().await;
            topics.entry(topic.to_string()).or_default().push(Subscriber {
                id: id.clone(),
                mailbox,
            });
        }

        {
            let mut stats = self.stats.write().await;
            stats.active_subscriptions += 1;
        }

        Ok(id)
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> BusResult<()> {
        let removed = {
            let mut topics = self.topics.write().await;
            let mut removed = false;
            topics.retain(|_, subs| {
                let before = subs.len();
                subs.retain(|s| &s.id != id);
                removed |= subs.len() != before;
                !subs.is_empty()
            });
            removed
        };

        if !removed {
            return Err(BusError::UnknownSubscription(id.to_string()));
        }

        let mut stats = self.stats.write().await;
        stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
        Ok(())
    }

    async fn stats(&self) -> TransportStats {
        self.stats.read().await.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
