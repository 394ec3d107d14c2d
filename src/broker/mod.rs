//! RabbitMQ integration: connection management, producing, and consuming
//! with dead-letter and retry semantics.

pub mod connection;
pub mod consumer;
pub mod producer;
pub mod retry;

pub use connection::ConnectionManager;
pub use consumer::Consumer;
pub use producer::Producer;
pub use retry::{FailureAction, RedisRetryLedger, RetryLedger, RetryPolicy};

use thiserror::Error;

/// Errors surfaced by the broker components.
///
/// Only fatal setup failures (connection, topology declaration) reach callers;
/// per-message failures are absorbed by the retry policy.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(#[from] lapin::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
