//! Subscriber dispatch loop
//!
//! A [`Subscriber`] owns one mailbox subscribed to a set of topics and one
//! tokio task that drains it, calling its handler for each matching message.
//!
//! ## Architecture
//! ```text
//! transport.broadcast(topic, msg)
//!     │
//!     ├──► [mailbox A] ──► dispatch loop A ──► handler_a.handle()
//!     │                          └──────────► panic → logged, loop continues
//!     └──► [mailbox B] ──► dispatch loop B ──► handler_b.handle()
//! ```
//!
//! ## Rules
//! - **Serial**: one handler call at a time per subscriber, FIFO mailbox
//! - **Isolation**: a slow or panicking handler only affects its own mailbox
//! - **No feedback**: outcomes are logged and counted, never sent back to
//!   the publisher
//! - **No retry**: handler-reported errors are final as far as the bus goes
//!
//! ## Lifecycle
//! `Stopped → Subscribing → Running → Stopped`. A failed subscription during
//! start is fatal, releases every topic already subscribed and returns the
//! state to `Stopped`. Handler failures never change the state. Watch the
//! transitions with [`SubscriberSpec::watch_state`] before starting.
//!
//! A handler panic is logged with the panic message and a backtrace taken at
//! the panic site (see `crash`).
//!
//! **Warning**: `AssertUnwindSafe` is used around the handler call; a handler
//! that panics while holding a lock on shared state can leave it poisoned or
//! inconsistent.

use crate::crash::{self, CaptureGuard};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::handler::{EventHandler, HandlerOutcome};
use crate::transport::{
    mailbox, Delivery, MailboxReceiver, Message, MessageTag, SubscriptionId, Transport,
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// What a subscriber is bound to.
pub struct SubscriberSpec {
    /// Handler called for every matching message
    pub handler: Arc<dyn EventHandler>,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Message shape this subscriber dispatches; others are dropped
    pub message_tag: MessageTag,
    /// Label used in log lines
    pub event_label: String,
    state: Arc<watch::Sender<SubscriberState>>,
}

impl SubscriberSpec {
    /// Create a spec for domain events.
    pub fn domain(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            topics: Vec::new(),
            message_tag: MessageTag::DomainEvent,
            event_label: "domain event".to_string(),
            state: Arc::new(watch::channel(SubscriberState::Stopped).0),
        }
    }

    /// Create a spec for integration events.
    pub fn integration(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            topics: Vec::new(),
            message_tag: MessageTag::IntegrationEvent,
            event_label: "integration event".to_string(),
            state: Arc::new(watch::channel(SubscriberState::Stopped).0),
        }
    }

    /// Add a topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Add several topics.
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Set the log label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.event_label = label.into();
        self
    }

    /// Observe the lifecycle state of the subscriber started from this spec,
    /// including the `Subscribing` phase inside [`Subscriber::start`].
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }
}

impl std::fmt::Debug for SubscriberSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSpec")
            .field("handler", &self.handler.name())
            .field("topics", &self.topics)
            .field("message_tag", &self.message_tag)
            .field("event_label", &self.event_label)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Subscriber lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Not running
    Stopped,
    /// Registering topics with the transport
    Subscribing,
    /// Dispatching messages
    Running,
}

/// Classified result of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler returned `Ok`
    Handled,
    /// Handler returned `Ignore`
    Ignored,
    /// Handler returned `Error`
    Failed(String),
    /// Handler panicked
    Crashed(String),
    /// Message did not match the subscriber's tag
    Dropped,
}

/// Dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Messages handled
    pub handled: u64,
    /// Messages the handler declined
    pub ignored: u64,
    /// Messages the handler rejected
    pub failed: u64,
    /// Handler panics
    pub crashed: u64,
    /// Unexpected messages dropped
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handled: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    crashed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Handled => &self.handled,
            DispatchOutcome::Ignored => &self.ignored,
            DispatchOutcome::Failed(_) => &self.failed,
            DispatchOutcome::Crashed(_) => &self.crashed,
            DispatchOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SubscriberStats {
        SubscriberStats {
            handled: self.handled.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            crashed: self.crashed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A running subscriber.
///
/// Dropping the value stops the dispatch loop after the message in flight
/// and releases the topic subscriptions on a background task. Call
/// [`Subscriber::shutdown`] to release them and wait for the loop to finish.
#[must_use = "dropping a Subscriber stops its dispatch loop"]
pub struct Subscriber {
    handler_name: String,
    event_label: String,
    topics: Vec<String>,
    subscriptions: Vec<SubscriptionId>,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<SubscriberState>,
    counters: Arc<Counters>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("handler", &self.handler_name)
            .field("topics", &self.topics)
            .field("state", &self.state())
            .finish()
    }
}

impl Subscriber {
    /// Subscribe to every topic in `spec` and start the dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if any subscription fails. Topics
    /// subscribed before the failure are released first, so the subscriber
    /// never runs half-subscribed.
    pub async fn start(spec: SubscriberSpec, transport: Arc<dyn Transport>) -> BusResult<Self> {
        let SubscriberSpec {
            handler,
            topics,
            message_tag,
            event_label,
            state,
        } = spec;

        let mut unique: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        let topics = unique;

        if topics.is_empty() {
            return Err(BusError::SubscribeError {
                topic: String::new(),
                reason: "subscriber has no topics".to_string(),
            });
        }

        crash::install_hook();

        let handler_name = handler.name().to_string();
        let state_rx = state.subscribe();
        state.send_replace(SubscriberState::Subscribing);
        let (sender, receiver) = mailbox();

        let mut subscriptions = Vec::with_capacity(topics.len());
        for topic in &topics {
            match transport.subscribe(topic, sender.clone()).await {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    tracing::error!(
                        subscriber = %event_label,
                        handler = %handler_name,
                        topic = %topic,
                        error = %e,
                        "Subscription failed, aborting subscriber start"
                    );
                    release(transport.as_ref(), &subscriptions).await;
                    state.send_replace(SubscriberState::Stopped);
                    return Err(e);
                }
            }
        }
        // The transport now holds the only senders.
        drop(sender);

        tracing::info!(
            subscriber = %event_label,
            handler = %handler_name,
            topics = ?topics,
            "Subscriber started"
        );

        let counters = Arc::new(Counters::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatcher = Dispatcher {
            handler,
            handler_name: handler_name.clone(),
            message_tag,
            event_label: event_label.clone(),
            counters: Arc::clone(&counters),
        };

        state.send_replace(SubscriberState::Running);
        let task = tokio::spawn(dispatcher.run(receiver, shutdown_rx, state));

        Ok(Self {
            handler_name,
            event_label,
            topics,
            subscriptions,
            transport,
            state: state_rx,
            counters,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Dispatch counters.
    pub fn stats(&self) -> SubscriberStats {
        self.counters.snapshot()
    }

    /// Topics this subscriber is bound to.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Name of the bound handler.
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Stop the subscriber.
    ///
    /// Releases the topic subscriptions, then stops the loop. A handler call
    /// in progress runs to completion; queued messages are discarded.
    pub async fn shutdown(mut self) {
        release(self.transport.as_ref(), &self.subscriptions).await;
        self.subscriptions.clear();

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    error = %e,
                    "Dispatch loop ended abnormally"
                );
            }
        }

        tracing::info!(
            subscriber = %self.event_label,
            handler = %self.handler_name,
            "Subscriber stopped"
        );
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }

        let subscriptions = std::mem::take(&mut self.subscriptions);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = Arc::clone(&self.transport);
                runtime.spawn(async move {
                    release(transport.as_ref(), &subscriptions).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    subscriptions = subscriptions.len(),
                    "Subscriber dropped outside a runtime, subscriptions left to transport pruning"
                );
            }
        }
    }
}

async fn release(transport: &dyn Transport, subscriptions: &[SubscriptionId]) {
    for id in subscriptions {
        if let Err(e) = transport.unsubscribe(id).await {
            tracing::warn!(subscription = %id, error = %e, "Failed to release subscription");
        }
    }
}

/// State owned by the dispatch task.
struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    handler_name: String,
    message_tag: MessageTag,
    event_label: String,
    counters: Arc<Counters>,
}

impl Dispatcher {
    async fn run(
        self,
        mut receiver: MailboxReceiver,
        mut shutdown: oneshot::Receiver<()>,
        state: Arc<watch::Sender<SubscriberState>>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                delivery = receiver.recv() => match delivery {
                    Some(delivery) => {
                        let outcome = self.dispatch(delivery).await;
                        self.counters.record(&outcome);
                    }
                    None => break,
                },
            }
        }

        state.send_replace(SubscriberState::Stopped);
    }

    async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let Delivery { topic, message } = delivery;
        let tag = message.tag();

        if tag != self.message_tag {
            tracing::warn!(
                subscriber = %self.event_label,
                handler = %self.handler_name,
                topic = %topic,
                expected = %self.message_tag,
                received = %tag,
                "Unexpected message, dropping"
            );
            return DispatchOutcome::Dropped;
        }

        let message = Arc::try_unwrap(message).unwrap_or_else(|shared| Message::clone(&shared));
        let Some(event) = message.into_event() else {
            tracing::warn!(
                subscriber = %self.event_label,
                handler = %self.handler_name,
                topic = %topic,
                "Message carries no event, dropping"
            );
            return DispatchOutcome::Dropped;
        };

        self.invoke(&event, &topic).await
    }

    async fn invoke(&self, event: &Event, topic: &str) -> DispatchOutcome {
        let call = AssertUnwindSafe(async { self.handler.handle(event).await }).catch_unwind();
        let mut call = std::pin::pin!(call);
        let result = std::future::poll_fn(|cx| {
            let _capture = CaptureGuard::enter();
            call.as_mut().poll(cx)
        })
        .await;

        match result {
            Ok(HandlerOutcome::Ok) => {
                tracing::debug!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    subject_id = %event.subject_id(),
                    topic = %topic,
                    "Event handled"
                );
                DispatchOutcome::Handled
            }
            Ok(HandlerOutcome::Ignore) => {
                tracing::debug!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    subject_id = %event.subject_id(),
                    topic = %topic,
                    "Event ignored"
                );
                DispatchOutcome::Ignored
            }
            Ok(HandlerOutcome::Error(reason)) => {
                tracing::error!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    subject_id = %event.subject_id(),
                    topic = %topic,
                    reason = %reason,
                    "Handler failed to process event"
                );
                DispatchOutcome::Failed(reason)
            }
            Err(panic) => {
                let message = crash::panic_message(panic.as_ref());
                let backtrace = crash::take_backtrace()
                    .map(|bt| bt.to_string())
                    .unwrap_or_else(|| "unavailable".to_string());
                tracing::error!(
                    subscriber = %self.event_label,
                    handler = %self.handler_name,
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    subject_id = %event.subject_id(),
                    topic = %topic,
                    panic = %message,
                    backtrace = %backtrace,
                    "Handler crashed while processing event"
                );
                DispatchOutcome::Crashed(message)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
