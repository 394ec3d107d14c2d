//! Generic queue consumer with dead-letter topology and bounded retries.

use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::types::BrokerConfig;

use super::{BrokerError, ConnectionManager, FailureAction, RetryPolicy};

/// What to do with a delivery once its body has been examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Ack,
    Reject { requeue: bool },
}

/// Per-delivery decision protocol, separated from broker acking so it can be
/// exercised without a live channel.
pub(crate) struct DeliveryResolver<T> {
    policy: RetryPolicy,
    output: mpsc::UnboundedSender<T>,
    simulate_failure_rate: f64,
}

impl<T> DeliveryResolver<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(
        policy: RetryPolicy,
        output: mpsc::UnboundedSender<T>,
        simulate_failure_rate: f64,
    ) -> Self {
        Self {
            policy,
            output,
            simulate_failure_rate,
        }
    }

    /// Decode the body and run it through processing and the retry policy.
    pub(crate) async fn resolve(&self, body: &[u8], message_id: &str) -> Resolution {
        let message: T = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(error) => {
                // Malformed payloads cannot self-heal: straight to the DLQ,
                // no retry, no ledger entry.
                warn!(message_id = %message_id, error = %error, "failed to deserialize message; dead-lettering");
                return Resolution::Reject { requeue: false };
            }
        };

        match self.process(message) {
            Ok(()) => {
                if let Err(error) = self.policy.on_success(message_id).await {
                    warn!(message_id = %message_id, error = %error, "failed to clear retry counter");
                }
                debug!(message_id = %message_id, "message processed");
                Resolution::Ack
            }
            Err(error) => {
                error!(message_id = %message_id, error = %error, "failed to process message");
                self.on_failure(message_id).await
            }
        }
    }

    /// Forward the decoded message downstream, with the optional synthetic
    /// failure injected first.
    fn process(&self, message: T) -> anyhow::Result<()> {
        if self.simulate_failure_rate > 0.0 && rand::random::<f64>() < self.simulate_failure_rate {
            anyhow::bail!("simulated processing failure");
        }

        self.output
            .send(message)
            .map_err(|_| anyhow::anyhow!("task channel closed"))?;

        Ok(())
    }

    async fn on_failure(&self, message_id: &str) -> Resolution {
        match self.policy.on_failure(message_id).await {
            Ok(FailureAction::Requeue { attempt }) => {
                warn!(
                    message_id = %message_id,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    "retrying message"
                );
                Resolution::Reject { requeue: true }
            }
            Ok(FailureAction::DeadLetter { attempt }) => {
                error!(
                    message_id = %message_id,
                    attempt,
                    "max retries reached; dead-lettering message"
                );
                Resolution::Reject { requeue: false }
            }
            Err(error) => {
                // Ledger unavailable: requeue rather than risk losing the
                // message, the next attempt re-reads the counter.
                error!(message_id = %message_id, error = %error, "retry ledger unavailable; requeueing");
                Resolution::Reject { requeue: true }
            }
        }
    }
}

/// Consumes messages of type `T` from the task queue and forwards decoded
/// payloads into an in-process channel.
///
/// Prefetch is fixed at 1 so at most one delivery is unacknowledged per
/// consumer instance, which both bounds this consumer's concurrency and lets
/// downstream backpressure reach the broker.
pub struct Consumer<T> {
    connection: Arc<ConnectionManager>,
    config: BrokerConfig,
    resolver: DeliveryResolver<T>,
}

impl<T> Consumer<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        connection: Arc<ConnectionManager>,
        config: BrokerConfig,
        policy: RetryPolicy,
        output: mpsc::UnboundedSender<T>,
    ) -> Self {
        let resolver = DeliveryResolver::new(policy, output, config.simulate_failure_rate);
        Self {
            connection,
            config,
            resolver,
        }
    }

    /// Declare topology and consume until the shutdown signal flips.
    ///
    /// On shutdown the broker-level consumer tag is cancelled and the channel
    /// closed before returning, so no new delivery can race the stop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        info!(queue = %self.config.task_queue, "consumer starting");

        let channel = self.connection.create_channel().await?;
        self.declare_topology(&channel).await?;

        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let mut deliveries = channel
            .basic_consume(
                &self.config.task_queue,
                "scouter-task-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer_tag = deliveries.tag().as_str().to_string();

        info!(consumer_tag = %consumer_tag, "consumer started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                    Some(Err(error)) => {
                        // Channel-level failures are not retried here; the
                        // transport redelivers once the topology is back.
                        warn!(error = %error, "delivery stream error");
                    }
                    None => {
                        warn!("delivery stream closed");
                        break;
                    }
                }
            }
        }

        self.stop(&channel, &consumer_tag).await;

        Ok(())
    }

    /// Idempotent declaration of the main and dead-letter topology.
    async fn declare_topology(&self, channel: &Channel) -> Result<(), BrokerError> {
        let durable = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(
                &self.config.task_exchange,
                ExchangeKind::Topic,
                durable,
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                &self.config.dead_letter_exchange,
                ExchangeKind::Topic,
                durable,
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &self.config.dead_letter_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &self.config.dead_letter_queue,
                &self.config.dead_letter_exchange,
                &self.config.dead_letter_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        // Rejected (requeue=false) messages on the main queue route to the DLX.
        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dead_letter_exchange.clone().into()),
        );
        queue_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.config.dead_letter_routing_key.clone().into()),
        );

        channel
            .queue_declare(
                &self.config.task_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await?;

        channel
            .queue_bind(
                &self.config.task_queue,
                &self.config.task_exchange,
                &self.config.task_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %self.config.task_queue,
            exchange = %self.config.task_exchange,
            dlx = %self.config.dead_letter_exchange,
            dlq = %self.config.dead_letter_queue,
            "topology declared"
        );

        Ok(())
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let delivery_tag = delivery.delivery_tag;
        // Logical id for retry tracking; a redelivery keeps its message id
        // while the delivery tag is broker-local and changes.
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| delivery_tag.to_string());

        debug!(message_id = %message_id, delivery_tag, "message received");

        match self.resolver.resolve(&delivery.data, &message_id).await {
            Resolution::Ack => {
                if let Err(error) = delivery.acker.ack(BasicAckOptions::default()).await {
                    error!(message_id = %message_id, error = %error, "failed to ack message");
                }
            }
            Resolution::Reject { requeue } => {
                if let Err(error) = delivery.acker.reject(BasicRejectOptions { requeue }).await {
                    error!(message_id = %message_id, error = %error, "failed to reject message");
                }
            }
        }
    }

    /// Stop sequence: cancel the consumer tag first so no new deliveries
    /// arrive, then close the channel.
    async fn stop(&self, channel: &Channel, consumer_tag: &str) {
        info!("consumer stopping");

        if let Err(error) = channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(consumer_tag, error = %error, "failed to cancel consumer");
        }

        if let Err(error) = channel.close(200, "consumer stopped").await {
            warn!(error = %error, "failed to close consumer channel");
        }

        info!("consumer stopped");
    }
}
