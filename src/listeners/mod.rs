//! Pluggable platform search strategies.

mod bluesky;

pub use bluesky::BlueskySocialListener;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ListeningTask, SocialPost};

/// A platform-specific search strategy.
///
/// Implementations are registered explicitly at startup and the full set is
/// run concurrently for every task by the fan-out worker. A listener owns its
/// own outbound calls; it must not assume it is the only one running.
#[async_trait]
pub trait SocialListener: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Search the platform for posts matching the task's query.
    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>>;
}
