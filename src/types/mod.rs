//! Core types for the scouter service.

mod config;
mod task;

pub use config::{AppConfig, BlueskyConfig, BrokerConfig};
pub use task::{ListeningTask, SocialPost, TaskStatus};
