//! Scouter Service Library
//!
//! Consumes social listening tasks from RabbitMQ with dead-letter and retry
//! semantics, fans each task out to the registered platform listeners, and
//! streams normalized posts to a single-reader sink.

pub mod bluesky;
pub mod broker;
pub mod listeners;
pub mod pipeline;
pub mod types;

pub use broker::{BrokerError, ConnectionManager, Consumer, Producer, RetryLedger, RetryPolicy};
pub use listeners::SocialListener;
pub use pipeline::{ListenerWorker, ResultHandler, SinkWorker};
pub use types::{AppConfig, ListeningTask, SocialPost, TaskStatus};

/// Default cap on failed delivery attempts before dead-lettering.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default cap on concurrently in-flight listening tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;

/// Default capacity of the bounded result channel.
pub const DEFAULT_RESULT_BUFFER: usize = 256;
