//! Error types for the event bus
//!
//! Each failure family gets its own enum so callers can tell a malformed
//! event apart from a transport failure without string matching:
//! - [`EventError`]: an event could not be constructed
//! - [`BusError`]: the transport rejected a broadcast or subscription
//! - [`OperationError`]: a cross-context write failed (see [`crate::retry`])

use thiserror::Error;

/// Event construction errors.
///
/// Construction is all-or-nothing: a factory returning one of these never
/// hands out a partially built event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Aggregate id is empty or blank
    #[error("Invalid aggregate id: {0:?}")]
    InvalidAggregateId(String),

    /// Entity id is empty or blank
    #[error("Invalid entity id: {0:?}")]
    InvalidEntityId(String),

    /// A required tag field is empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A tag contains the topic separator
    #[error("Invalid {field}: {value:?} must not contain ':'")]
    InvalidTag {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Payload is not a JSON object
    #[error("Invalid payload: expected a JSON object, got {0}")]
    InvalidPayload(&'static str),
}

/// Result type for event construction.
pub type EventResult<T> = Result<T, EventError>;

/// Transport error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Failed to broadcast a message
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to subscribe
    #[error("Failed to subscribe to {topic}: {reason}")]
    SubscribeError {
        /// Topic the subscription was requested for.
        topic: String,
        /// Why the transport refused.
        reason: String,
    },

    /// Transport is unreachable
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Unknown subscription id
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for transport operations.
pub type BusResult<T> = Result<T, BusError>;

impl BusError {
    /// Check if this error means the transport itself is gone,
    /// as opposed to a single message being rejected.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BusError::ConnectionError(_) | BusError::ChannelClosed)
    }
}

/// Failures reported by a cross-context write.
///
/// These mirror what the relational store and the transports in front of it
/// report. Classification for retries lives in [`crate::retry::RetryClassify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The resource already exists; the write has already been applied
    #[error("Resource already exists")]
    DuplicateResource,

    /// Database connection dropped or could not be checked out
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    /// Transport-level failure talking to the backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Input rejected by validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Target resource does not exist
    #[error("Resource not found")]
    NotFound,

    /// Query was rejected by the store
    #[error("Query error: {0}")]
    Query(String),

    /// Anything the backend reported that has no better classification
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl OperationError {
    /// Get a stable error code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            OperationError::DuplicateResource => "duplicate_resource",
            OperationError::DatabaseConnection(_) => "database_connection_error",
            OperationError::Transport(_) => "transport_error",
            OperationError::Validation(_) => "validation_error",
            OperationError::NotFound => "resource_not_found",
            OperationError::Query(_) => "query_error",
            OperationError::Unexpected(_) => "unexpected_error",
        }
    }
}
