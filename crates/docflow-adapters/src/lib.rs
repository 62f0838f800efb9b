//! Adapters for the external services docflow consumes
//!
//! The engine and watcher never talk to storage or notification systems
//! directly; they go through the traits defined here. In-memory
//! implementations back the test suite, the HTTP implementation backs real
//! deployments.

pub mod notify;
pub mod retry;
pub mod storage;

pub use notify::{Delivery, HttpNotificationAdapter, InMemoryNotifier, NotificationAdapter};
pub use retry::RetryPolicy;
pub use storage::{DocumentStorage, InMemoryDocumentStorage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AdapterError {
    /// Transient failures (network, timeouts, 5xx) are worth retrying;
    /// validation and missing-resource failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Connection(_)
            | AdapterError::Timeout(_)
            | AdapterError::ServiceUnavailable(_)
            | AdapterError::Unknown(_) => true,
            AdapterError::InvalidRequest(_)
            | AdapterError::NotFound(_)
            | AdapterError::Serialization(_) => false,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
