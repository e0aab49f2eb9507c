//! Event handler contract
//!
//! Handlers hold the business logic that interprets an event. The bus treats
//! them as untrusted: whatever they return or however they fail, the
//! subscriber that calls them keeps running.

use crate::event::Event;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// What a handler did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Event was processed
    Ok,
    /// Handler declined this event type; not an error
    Ignore,
    /// Business-level rejection; logged, never retried by the bus
    Error(String),
}

impl HandlerOutcome {
    /// Build an error outcome from anything displayable.
    pub fn error(reason: impl std::fmt::Display) -> Self {
        HandlerOutcome::Error(reason.to_string())
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for HandlerOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => HandlerOutcome::Ok,
            Err(e) => HandlerOutcome::error(e),
        }
    }
}

/// Event handler trait for processing events.
///
/// Called from the subscriber's dispatch loop, one event at a time. A handler
/// may call [`crate::retry::retry_with_backoff`] for its own outbound writes;
/// the backoff sleep then delays this subscriber's next message.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle an event.
    async fn handle(&self, event: &Event) -> HandlerOutcome;

    /// Handler name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F, Fut> {
    name: String,
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// The closure receives its own copy of the event.
///
/// # Example
///
/// ```rust
/// use market_events::{handler_fn, HandlerOutcome};
///
/// let handler = handler_fn("audit", |event| async move {
///     if event.event_type() == "enrolled" {
///         HandlerOutcome::Ok
///     } else {
///         HandlerOutcome::Ignore
///     }
/// });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> HandlerOutcome {
        (self.f)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DomainEvent, EventOptions};
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn("only-enrolled", |event: Event| async move {
            if event.event_type() == "enrolled" {
                HandlerOutcome::Ok
            } else {
                HandlerOutcome::Ignore
            }
        });

        let enrolled: Event =
            DomainEvent::new("enrolled", "c-1", "course", json!({}), EventOptions::new())
                .unwrap()
                .into();
        let dropped: Event =
            DomainEvent::new("dropped", "c-1", "course", json!({}), EventOptions::new())
                .unwrap()
                .into();

        assert_eq!(handler.name(), "only-enrolled");
        assert_eq!(handler.handle(&enrolled).await, HandlerOutcome::Ok);
        assert_eq!(handler.handle(&dropped).await, HandlerOutcome::Ignore);
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(HandlerOutcome::from(Ok::<(), String>(())), HandlerOutcome::Ok);
        assert_eq!(
            HandlerOutcome::from(Err::<(), _>("seat limit reached")),
            HandlerOutcome::Error("seat limit reached".to_string())
        );
    }
}
