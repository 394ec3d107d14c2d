//! Fan-out worker: one task in, all listeners run concurrently.

use std::sync::Arc;

use futures::future;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::listeners::SocialListener;
use crate::types::{ListeningTask, SocialPost, TaskStatus};

/// Reads listening tasks one at a time and fans each out to every registered
/// listener.
///
/// Task units run detached from the read loop; a semaphore caps how many are
/// in flight at once so a burst of tasks cannot grow without bound.
pub struct ListenerWorker {
    listeners: Arc<Vec<Arc<dyn SocialListener>>>,
    tasks: mpsc::UnboundedReceiver<ListeningTask>,
    results: mpsc::Sender<SocialPost>,
    limiter: Arc<Semaphore>,
}

impl ListenerWorker {
    pub fn new(
        listeners: Vec<Arc<dyn SocialListener>>,
        tasks: mpsc::UnboundedReceiver<ListeningTask>,
        results: mpsc::Sender<SocialPost>,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            listeners: Arc::new(listeners),
            tasks,
            results,
            limiter: Arc::new(Semaphore::new(max_concurrent_tasks)),
        }
    }

    /// Consume tasks until the channel closes or shutdown flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            listeners = self.listeners.len(),
            "listener worker started; waiting for listening tasks"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                task = self.tasks.recv() => match task {
                    Some(task) => {
                        if !self.dispatch(task, &mut shutdown).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        info!("listener worker stopped");
    }

    /// Launch an independent unit of work for the task. The only wait here is
    /// for a concurrency permit, and the shutdown signal interrupts it; the
    /// unit itself is never awaited. Returns false when the worker should stop.
    async fn dispatch(&self, task: ListeningTask, shutdown: &mut watch::Receiver<bool>) -> bool {
        let permit = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => break permit,
                    Err(_) => return false, // semaphore closed
                }
            }
        };

        let listeners = Arc::clone(&self.listeners);
        let results = self.results.clone();

        tokio::spawn(async move {
            process_task(listeners, results, task).await;
            drop(permit);
        });

        true
    }
}

/// Run every listener concurrently for this task and wait for all of them.
/// Returns the task's final status.
async fn process_task(
    listeners: Arc<Vec<Arc<dyn SocialListener>>>,
    results: mpsc::Sender<SocialPost>,
    mut task: ListeningTask,
) -> TaskStatus {
    if listeners.is_empty() {
        warn!(task_id = %task.id, "no listeners registered; skipping task");
        return task.status;
    }

    task.mark(TaskStatus::Processing);
    info!(task_id = %task.id, topic_id = %task.topic_id, "processing task");

    let runs = listeners
        .iter()
        .map(|listener| run_listener(Arc::clone(listener), &task, results.clone()));
    let outcomes = future::join_all(runs).await;

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    if succeeded == 0 {
        task.mark(TaskStatus::Failed);
        error!(task_id = %task.id, "task failed; every listener errored");
    } else {
        task.mark(TaskStatus::Succeeded);
        info!(
            task_id = %task.id,
            listeners = outcomes.len(),
            "task completed; all listeners executed"
        );
    }

    task.status
}

/// Execute one listener; its failure never cancels siblings.
async fn run_listener(
    listener: Arc<dyn SocialListener>,
    task: &ListeningTask,
    results: mpsc::Sender<SocialPost>,
) -> bool {
    debug!(listener = listener.name(), task_id = %task.id, "executing listener");

    match listener.search(task).await {
        Ok(posts) => {
            let count = posts.len();
            for post in posts {
                // One at a time, so the sink can start before this listener
                // has finished.
                debug!(listener = listener.name(), post_id = %post.id, "pushing post");
                if results.send(post).await.is_err() {
                    warn!(listener = listener.name(), "result channel closed");
                    return false;
                }
            }
            info!(
                listener = listener.name(),
                task_id = %task.id,
                count,
                "listener completed"
            );
            true
        }
        Err(error) => {
            error!(
                listener = listener.name(),
                task_id = %task.id,
                error = %error,
                "listener failed"
            );
            false
        }
    }
}
