//! Bluesky search strategy.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::bluesky::{BlueskyClient, PostView, SearchParams};
use crate::types::{ListeningTask, SocialPost};

use super::SocialListener;

/// Searches Bluesky posts using the task's query text.
pub struct BlueskySocialListener {
    client: Arc<BlueskyClient>,
}

impl BlueskySocialListener {
    pub fn new(client: Arc<BlueskyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SocialListener for BlueskySocialListener {
    fn name(&self) -> &'static str {
        "bluesky"
    }

    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>> {
        debug!(task_id = %task.id, query = %task.query, "starting search");

        let response = self
            .client
            .search_posts(&task.query, &SearchParams::default())
            .await?;

        Ok(response
            .posts
            .into_iter()
            .map(|post| to_social_post(post, task))
            .collect())
    }
}

/// Normalize a platform post into a [`SocialPost`] stamped with the task that
/// generated it.
fn to_social_post(post: PostView, task: &ListeningTask) -> SocialPost {
    SocialPost {
        id: Uuid::new_v4(),
        original_id: post.cid,
        original_url: post.uri,
        content: post.record.text,
        source_platform_id: task.source_platform_id,
        generated_from_task_id: task.id,
    }
}
