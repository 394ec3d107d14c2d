//! In-process channels and workers connecting the consumer to the sink.

pub mod listener_worker;
pub mod sink_worker;

pub use listener_worker::ListenerWorker;
pub use sink_worker::{LoggingResultHandler, ResultHandler, SinkWorker};

use tokio::sync::mpsc;

use crate::types::{ListeningTask, SocialPost};

/// Many-writer queue of decoded listening tasks.
///
/// Unbounded: the fan-out semaphore and the bounded result channel are the
/// backpressure points, not this queue.
pub fn task_channel() -> (
    mpsc::UnboundedSender<ListeningTask>,
    mpsc::UnboundedReceiver<ListeningTask>,
) {
    mpsc::unbounded_channel()
}

/// Many-writer, single-reader queue of search results.
///
/// Bounded so a slow sink suspends listener sends instead of growing memory.
/// The receiver must stay with exactly one sink worker; the sink is the sole
/// owner of per-result side effects.
pub fn result_channel(capacity: usize) -> (mpsc::Sender<SocialPost>, mpsc::Receiver<SocialPost>) {
    mpsc::channel(capacity)
}
