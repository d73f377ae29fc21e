//! Event handlers for consumed messages

use async_trait::async_trait;
use eventbus::{CancellationToken, ConsumerHandler, Message, Producer, SendOptions};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::{info, instrument};

/// Logs every message and optionally forwards it to another topic.
///
/// Empty payloads are rejected, which naks them in persistent mode. A forward
/// still in flight at shutdown is abandoned with an error.
pub struct EventLogger {
    forward: Option<Arc<dyn Producer>>,
}

impl EventLogger {
    pub fn new(forward: Option<Arc<dyn Producer>>) -> Self {
        Self { forward }
    }
}

#[async_trait]
impl ConsumerHandler for EventLogger {
    #[instrument(skip(self, message, cancel), fields(topic = %message.topic, group = %message.group))]
    async fn handle(&self, message: Message, cancel: CancellationToken) -> Result<()> {
        if message.body.is_empty() {
            eyre::bail!("empty payload on {}", message.topic);
        }

        info!(
            bytes = message.body.len(),
            sharding_key = ?message.sharding_key,
            "Received event"
        );

        if let Some(producer) = &self.forward {
            let options = match message.sharding_key {
                Some(key) => SendOptions::new().with_sharding_key(key),
                None => SendOptions::default(),
            };
            tokio::select! {
                result = producer.send(message.body, options) => {
                    result.wrap_err("Failed to forward event")?
                }
                _ = cancel.cancelled() => eyre::bail!("Shutting down before event was forwarded"),
            }
        }

        Ok(())
    }
}
