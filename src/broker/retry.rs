//! Externally persisted retry counting for delivered messages.
//!
//! Local counters are unsafe across process restarts or multiple consumer
//! instances sharing a queue, so attempts are tracked in Redis keyed by the
//! logical message id with a 24h expiry.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;

/// Key prefix for retry counters in the external store.
pub const RETRY_KEY_PREFIX: &str = "broker:retry:";

/// Retry counters expire after 24 hours.
const RETRY_TTL_SECS: u64 = 24 * 60 * 60;

/// Per-message retry counter storage.
///
/// An entry exists only for a message that has failed at least once and has
/// neither succeeded nor exhausted its attempts.
#[async_trait]
pub trait RetryLedger: Send + Sync {
    /// Current retry count for the message, 0 when absent.
    async fn get(&self, message_id: &str) -> Result<u32>;

    /// Store the retry count with the standard expiry.
    async fn set(&self, message_id: &str, count: u32) -> Result<()>;

    /// Remove the counter (on success or exhaustion).
    async fn clear(&self, message_id: &str) -> Result<()>;
}

/// Redis-backed retry ledger.
pub struct RedisRetryLedger {
    conn: redis::aio::ConnectionManager,
}

impl RedisRetryLedger {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(message_id: &str) -> String {
        format!("{RETRY_KEY_PREFIX}{message_id}")
    }
}

#[async_trait]
impl RetryLedger for RedisRetryLedger {
    async fn get(&self, message_id: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let count: Option<u32> = conn.get(Self::key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn set(&self, message_id: &str, count: u32) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key(message_id), count, RETRY_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn clear(&self, message_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(message_id)).await?;
        Ok(())
    }
}

/// What the consumer should do with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Reject with requeue so the broker redelivers.
    Requeue { attempt: u32 },
    /// Reject without requeue, routing the message to the DLX.
    DeadLetter { attempt: u32 },
}

/// Applies the bounded-retry policy against a [`RetryLedger`].
#[derive(Clone)]
pub struct RetryPolicy {
    ledger: Arc<dyn RetryLedger>,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(ledger: Arc<dyn RetryLedger>, max_attempts: u32) -> Self {
        Self {
            ledger,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a processing failure and decide the message's fate.
    ///
    /// Reaching `max_attempts` clears the counter and dead-letters; otherwise
    /// the counter is bumped and the message requeued for redelivery.
    pub async fn on_failure(&self, message_id: &str) -> Result<FailureAction> {
        let attempt = self.ledger.get(message_id).await? + 1;

        if attempt >= self.max_attempts {
            self.ledger.clear(message_id).await?;
            Ok(FailureAction::DeadLetter { attempt })
        } else {
            self.ledger.set(message_id, attempt).await?;
            Ok(FailureAction::Requeue { attempt })
        }
    }

    /// Clear any counter left over from earlier failed attempts.
    pub async fn on_success(&self, message_id: &str) -> Result<()> {
        self.ledger.clear(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory stand-in for the Redis ledger.
    #[derive(Default)]
    struct MemoryLedger {
        counts: Mutex<HashMap<String, u32>>,
    }

    impl MemoryLedger {
        fn value(&self, message_id: &str) -> Option<u32> {
            self.counts.lock().unwrap().get(message_id).copied()
        }
    }

    #[async_trait]
    impl RetryLedger for MemoryLedger {
        async fn get(&self, message_id: &str) -> Result<u32> {
            Ok(self.value(message_id).unwrap_or(0))
        }

        async fn set(&self, message_id: &str, count: u32) -> Result<()> {
            self.counts
                .lock()
                .unwrap()
                .insert(message_id.to_string(), count);
            Ok(())
        }

        async fn clear(&self, message_id: &str) -> Result<()> {
            self.counts.lock().unwrap().remove(message_id);
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> (RetryPolicy, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::default());
        (RetryPolicy::new(ledger.clone(), max_attempts), ledger)
    }

    #[tokio::test]
    async fn failures_below_limit_requeue_and_increment_by_one() {
        let (policy, ledger) = policy(3);

        let first = policy.on_failure("m1").await.unwrap();
        assert_eq!(first, FailureAction::Requeue { attempt: 1 });
        assert_eq!(ledger.value("m1"), Some(1));

        let second = policy.on_failure("m1").await.unwrap();
        assert_eq!(second, FailureAction::Requeue { attempt: 2 });
        assert_eq!(ledger.value("m1"), Some(2));
    }

    #[tokio::test]
    async fn reaching_the_limit_dead_letters_and_clears_the_ledger() {
        let (policy, ledger) = policy(3);

        assert_eq!(
            policy.on_failure("m1").await.unwrap(),
            FailureAction::Requeue { attempt: 1 }
        );
        assert_eq!(
            policy.on_failure("m1").await.unwrap(),
            FailureAction::Requeue { attempt: 2 }
        );
        assert_eq!(
            policy.on_failure("m1").await.unwrap(),
            FailureAction::DeadLetter { attempt: 3 }
        );
        assert_eq!(ledger.value("m1"), None);
    }

    #[tokio::test]
    async fn success_clears_the_counter() {
        let (policy, ledger) = policy(3);

        policy.on_failure("m1").await.unwrap();
        assert_eq!(ledger.value("m1"), Some(1));

        policy.on_success("m1").await.unwrap();
        assert_eq!(ledger.value("m1"), None);
    }

    #[tokio::test]
    async fn success_without_prior_failure_is_a_no_op() {
        let (policy, ledger) = policy(3);

        policy.on_success("m1").await.unwrap();
        assert_eq!(ledger.value("m1"), None);
    }

    #[tokio::test]
    async fn replay_never_exceeds_max_attempts_per_cycle() {
        let (policy, ledger) = policy(3);

        // Two full fail-until-dead-letter cycles for the same message id:
        // each cycle dead-letters exactly once, on the third attempt.
        for _ in 0..2 {
            let mut dead_letters = 0;
            for _ in 0..3 {
                if let FailureAction::DeadLetter { attempt } =
                    policy.on_failure("m1").await.unwrap()
                {
                    dead_letters += 1;
                    assert_eq!(attempt, 3);
                }
            }
            assert_eq!(dead_letters, 1);
            assert_eq!(ledger.value("m1"), None);
        }
    }

    #[tokio::test]
    async fn max_attempts_of_one_dead_letters_immediately() {
        let (policy, ledger) = policy(1);

        assert_eq!(
            policy.on_failure("m1").await.unwrap(),
            FailureAction::DeadLetter { attempt: 1 }
        );
        assert_eq!(ledger.value("m1"), None);
    }

    #[tokio::test]
    async fn counters_are_tracked_per_message_id() {
        let (policy, ledger) = policy(5);

        policy.on_failure("m1").await.unwrap();
        policy.on_failure("m2").await.unwrap();
        policy.on_failure("m2").await.unwrap();

        assert_eq!(ledger.value("m1"), Some(1));
        assert_eq!(ledger.value("m2"), Some(2));
    }
}
