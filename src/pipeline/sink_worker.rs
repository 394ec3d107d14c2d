//! Single-reader drain of the result channel.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::types::SocialPost;

/// Downstream handling for a single result.
///
/// The sink worker is the sole owner of per-result side effects; persistence
/// or forwarding to the next stage plugs in behind this trait.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, post: &SocialPost) -> Result<()>;
}

/// Default handler: logs a content preview.
pub struct LoggingResultHandler;

#[async_trait]
impl ResultHandler for LoggingResultHandler {
    async fn handle(&self, post: &SocialPost) -> Result<()> {
        let preview: String = post.content.chars().take(50).collect();
        info!(
            post_id = %post.id,
            platform_id = %post.source_platform_id,
            preview = %preview,
            "processed post"
        );
        Ok(())
    }
}

/// Drains the result channel sequentially.
///
/// Exactly one instance may own the receiver; running several sinks would
/// need coordination the handler contract does not provide.
pub struct SinkWorker {
    results: mpsc::Receiver<SocialPost>,
    handler: Arc<dyn ResultHandler>,
}

impl SinkWorker {
    pub fn new(results: mpsc::Receiver<SocialPost>, handler: Arc<dyn ResultHandler>) -> Self {
        Self { results, handler }
    }

    /// Read until the channel closes or shutdown flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("sink worker started; waiting for posts");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                post = self.results.recv() => match post {
                    Some(post) => {
                        // One bad result never stops the drain.
                        if let Err(error) = self.handler.handle(&post).await {
                            error!(post_id = %post.id, error = %error, "failed to process post");
                        }
                    }
                    None => break,
                }
            }
        }

        info!("sink worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::result_channel;
    use anyhow::bail;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Records every post it sees and fails on the ones marked "poison".
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultHandler for RecordingHandler {
        async fn handle(&self, post: &SocialPost) -> Result<()> {
            self.seen.lock().unwrap().push(post.content.clone());
            if post.content == "poison" {
                bail!("cannot process this one");
            }
            Ok(())
        }
    }

    fn post(content: &str) -> SocialPost {
        SocialPost {
            id: Uuid::new_v4(),
            original_id: content.to_string(),
            original_url: format!("https://example.test/{content}"),
            content: content.to_string(),
            source_platform_id: Uuid::new_v4(),
            generated_from_task_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn a_failing_result_never_stops_the_drain() {
        let (tx, rx) = result_channel(8);
        let handler = Arc::new(RecordingHandler::default());
        let worker = SinkWorker::new(rx, handler.clone());

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        tx.send(post("first")).await.unwrap();
        tx.send(post("poison")).await.unwrap();
        tx.send(post("last")).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sink should stop when the channel closes")
            .unwrap();

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["first", "poison", "last"]);
    }

    #[tokio::test]
    async fn sink_stops_on_shutdown_signal() {
        let (_tx, rx) = result_channel(4);
        let worker = SinkWorker::new(rx, Arc::new(LoggingResultHandler));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sink should observe the shutdown signal")
            .unwrap();
    }

    #[tokio::test]
    async fn logging_handler_accepts_any_post() {
        let handler = LoggingResultHandler;
        handler.handle(&post("hello")).await.unwrap();
    }
}
