//! Generic producer publishing typed payloads to any exchange.

use std::sync::Arc;

use chrono::Utc;
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{BrokerError, ConnectionManager};

/// Publishes messages durably with persistent delivery.
///
/// The channel is created lazily and reopened if the broker closed it. There
/// is no internal retry: publish failures propagate to the caller, which owns
/// its own backoff policy.
pub struct Producer {
    connection: Arc<ConnectionManager>,
    channel: Mutex<Option<Channel>>,
}

impl Producer {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            channel: Mutex::new(None),
        }
    }

    /// Serialize `message` as camelCase JSON and publish it.
    ///
    /// The target exchange is declared idempotently first, so publishing never
    /// races topology setup. Each message carries a generated message id used
    /// by consumers for retry tracking.
    pub async fn publish<T: Serialize>(
        &self,
        message: &T,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let channel = self.ensure_channel().await?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let body = encode_payload(message)?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_timestamp(Utc::now().timestamp() as u64);

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?;

        debug!(exchange, routing_key, "message published");

        Ok(())
    }

    /// Reuse the open channel or open a fresh one if it was closed.
    async fn ensure_channel(&self) -> Result<Channel, BrokerError> {
        let mut guard = self.channel.lock().await;

        match guard.as_ref() {
            Some(channel) if channel.status().connected() => Ok(channel.clone()),
            _ => {
                let channel = self.connection.create_channel().await?;
                debug!("producer channel initialized");
                *guard = Some(channel.clone());
                Ok(channel)
            }
        }
    }
}

/// Encode a payload with the stable camelCase wire convention.
pub(crate) fn encode_payload<T: Serialize>(message: &T) -> Result<Vec<u8>, BrokerError> {
    Ok(serde_json::to_vec(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListeningTask, TaskStatus};
    use uuid::Uuid;

    #[test]
    fn payload_uses_camel_case_wire_naming() {
        let task = ListeningTask {
            id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            source_platform_id: Uuid::new_v4(),
            query: "rustlang".to_string(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            updated_at: None,
        };

        let body = encode_payload(&task).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(value.get("sourcePlatformId").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("source_platform_id").is_none());
    }
}
