//! # Market Events
//!
//! This crate provides the event bus that lets the marketplace's bounded
//! contexts (catalog, enrollment, billing, accounts, ...) talk to each
//! other without direct coupling.
//!
//! ## Overview
//!
//! The market-events crate handles:
//! - **Event Types**: immutable domain and integration events
//! - **Topics**: deterministic topic derivation shared by both sides
//! - **Publisher**: fire-and-forget publishing, single or batched
//! - **Subscribers**: one serial dispatch loop per handler, with panic isolation
//! - **Retry Policy**: single-retry helper for cross-context writes
//!
//! ## Features
//!
//! - `memory` (default): in-memory transport and the recording test transport
//!
//! ## Event Kinds
//!
//! - `DomainEvent`: raised by an aggregate, consumed inside its own context.
//!   Topic: `{aggregate_type}:{event_type}`
//! - `IntegrationEvent`: announced by one context to the others.
//!   Topic: `integration:{source_context}:{event_type}`
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust,no_run
//! use market_events::{DomainEvent, Event, EventOptions, MemoryTransport, Publisher};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! async fn publish_example() -> Result<(), Box<dyn std::error::Error>> {
//!     let publisher = Publisher::new(Arc::new(MemoryTransport::new()));
//!
//!     let event = DomainEvent::new(
//!         "enrolled",
//!         "course-42",
//!         "course",
//!         json!({"student_id": "s-1"}),
//!         EventOptions::new(),
//!     )?;
//!
//!     publisher.publish(&Event::from(event)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Subscribing to Events
//!
//! ```rust,no_run
//! use market_events::{build_topic, handler_fn, HandlerOutcome, MemoryTransport, Subscriber, SubscriberSpec};
//! use std::sync::Arc;
//!
//! async fn subscribe_example() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(MemoryTransport::new());
//!
//!     let handler = handler_fn("enrollment-mailer", |event| async move {
//!         println!("Received: {}", event.event_type());
//!         HandlerOutcome::Ok
//!     });
//!
//!     let subscriber = Subscriber::start(
//!         SubscriberSpec::domain(Arc::new(handler)).topic(build_topic("course", "enrolled")),
//!         transport,
//!     )
//!     .await?;
//!
//!     // ...
//!     subscriber.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery Guarantees
//!
//! - Publishing returns once the transport accepts the message; subscriber
//!   health never reaches the publisher.
//! - Each subscriber handles its messages one at a time, in delivery order.
//! - No ordering across topics or across subscribers.
//! - Nothing is persisted; a subscriber only sees messages broadcast while it
//!   is subscribed.

pub mod config;
mod crash;
pub mod error;
pub mod event;
pub mod handler;
pub mod publisher;
pub mod retry;
pub mod subscriber;
#[cfg(feature = "memory")]
pub mod testing;
pub mod topic;
pub mod transport;

// Re-export main types
pub use config::{BusConfig, ConfigError};
pub use error::{BusError, BusResult, EventError, EventResult, OperationError};
pub use event::{DomainEvent, Event, EventKind, EventOptions, IntegrationEvent, Metadata, Payload};
pub use handler::{handler_fn, EventHandler, HandlerOutcome};
pub use publisher::Publisher;
pub use retry::{
    duplicate_error, permanent_error, retry_with_backoff, retryable_error, RetryClass,
    RetryClassify, RetryContext, RetryOutcome,
};
pub use subscriber::{DispatchOutcome, Subscriber, SubscriberSpec, SubscriberState, SubscriberStats};
pub use topic::{build_integration_topic, build_topic, derive_topic};
pub use transport::{Delivery, Message, MessageTag, SubscriptionId, Transport, TransportStats};

#[cfg(feature = "memory")]
pub use transport::MemoryTransport;
