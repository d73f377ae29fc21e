//! Producer bound to one topic.

use crate::config::ProducerConfig;
use crate::error::EventBusError;
use crate::message::{DeliveryMode, SendOptions};
use crate::metrics::EventBusMetrics;
use crate::nats::auth::Credentials;
use crate::nats::connection::NatsConnection;
use crate::nats::stream::{StreamAdmin, StreamProvisioner};
use crate::nats::transport::{OutboundMessage, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upper bound on concurrent publishes within one batch.
pub const MAX_PUBLISH_WORKERS: usize = 5;

/// Publishing contract exposed to the rest of the application.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Send one message.
    async fn send(&self, body: Bytes, options: SendOptions) -> Result<(), EventBusError> {
        self.batch_send(vec![body], options).await
    }

    /// Send several messages. No ordering is guaranteed among them.
    async fn batch_send(&self, bodies: Vec<Bytes>, options: SendOptions) -> Result<(), EventBusError>;

    /// Stop accepting sends and release the connection. Idempotent.
    async fn close(&self) -> Result<(), EventBusError>;
}

/// NATS producer.
///
/// In persistent mode the topic's stream is provisioned before each batch and
/// every publish waits for the JetStream ack; the first failure cancels the
/// rest of the batch. In core mode all publishes run to completion and the
/// connection is flushed before returning.
pub struct NatsProducer {
    topic: String,
    mode: DeliveryMode,
    transport: Arc<dyn Transport>,
    provisioner: StreamProvisioner,
    /// Held shared for the length of a batch, exclusively by `close`.
    closed: RwLock<bool>,
    metrics: EventBusMetrics,
}

impl NatsProducer {
    /// Connect a producer described by `config`.
    pub async fn connect(config: ProducerConfig) -> Result<Self, EventBusError> {
        config.validate()?;

        let connection = Arc::new(
            NatsConnection::connect(&config.server_url, &config.client_name(), &config.credentials)
                .await?,
        );

        info!(topic = %config.topic, mode = %config.mode, "NATS producer ready");
        Ok(Self::with_transport(
            config.topic,
            &config.group,
            config.mode,
            connection.clone(),
            connection,
        ))
    }

    /// Build a producer on top of an existing transport.
    pub fn with_transport(
        topic: impl Into<String>,
        group: &str,
        mode: DeliveryMode,
        transport: Arc<dyn Transport>,
        admin: Arc<dyn StreamAdmin>,
    ) -> Self {
        let topic = topic.into();
        Self {
            metrics: EventBusMetrics::new(&topic, group, mode),
            topic,
            mode,
            transport,
            provisioner: StreamProvisioner::new(admin),
            closed: RwLock::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    async fn batch_send_persistent(
        &self,
        bodies: Vec<Bytes>,
        options: &SendOptions,
    ) -> Result<(), EventBusError> {
        self.provisioner.ensure_stream(&self.topic).await?;

        let workers = bodies.len().min(MAX_PUBLISH_WORKERS);
        let transport = &self.transport;

        stream::iter(bodies.into_iter().enumerate())
            .map(Ok::<_, EventBusError>)
            .try_for_each_concurrent(workers, |(index, payload)| {
                let message = OutboundMessage {
                    subject: self.topic.clone(),
                    payload,
                    sharding_key: None,
                    message_id: options.message_id(index),
                };
                async move {
                    transport
                        .publish_persistent(message)
                        .await
                        .map_err(|e| at_index(index, e))
                }
            })
            .await
    }

    async fn batch_send_core(
        &self,
        bodies: Vec<Bytes>,
        options: &SendOptions,
    ) -> Result<(), EventBusError> {
        let workers = bodies.len().min(MAX_PUBLISH_WORKERS);
        let transport = &self.transport;
        let sharding_key = options.sharding_key().map(str::to_string);

        let results: Vec<Result<(), EventBusError>> = stream::iter(bodies.into_iter().enumerate())
            .map(|(index, payload)| {
                let message = OutboundMessage {
                    subject: self.topic.clone(),
                    payload,
                    sharding_key: sharding_key.clone(),
                    message_id: None,
                };
                async move { transport.publish(message).await.map_err(|e| at_index(index, e)) }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        // results are in completion order, so this is the first failure observed
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }

        self.transport.flush().await
    }
}

fn at_index(index: usize, error: EventBusError) -> EventBusError {
    match error {
        EventBusError::Publish { message, .. } => EventBusError::Publish { index, message },
        other => other,
    }
}

#[async_trait]
impl Producer for NatsProducer {
    async fn batch_send(&self, bodies: Vec<Bytes>, options: SendOptions) -> Result<(), EventBusError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(EventBusError::ProducerClosed);
        }
        if bodies.is_empty() {
            return Err(EventBusError::validation("no messages to send"));
        }
        if self.topic.is_empty() {
            return Err(EventBusError::validation("topic is not set"));
        }

        let count = bodies.len();
        let result = match self.mode {
            DeliveryMode::Persistent => self.batch_send_persistent(bodies, &options).await,
            DeliveryMode::Core => self.batch_send_core(bodies, &options).await,
        };

        match &result {
            Ok(()) => {
                self.metrics.messages_published(count);
                debug!(topic = %self.topic, mode = %self.mode, count, "Sent messages");
            }
            Err(e) => {
                self.metrics.publish_failed();
                debug!(topic = %self.topic, mode = %self.mode, error = %e, "Batch send failed");
            }
        }
        result
    }

    async fn close(&self) -> Result<(), EventBusError> {
        let mut closed = self.closed.write().await;
        if *closed {
            return Ok(());
        }
        *closed = true;

        if let Err(e) = self.transport.drain().await {
            warn!(topic = %self.topic, error = %e, "Drain NATS connection failed");
        }

        info!(topic = %self.topic, "NATS producer closed");
        Ok(())
    }
}

/// Connect a producer using credentials from the environment.
pub async fn new_producer(
    server_url: &str,
    topic: &str,
    group: &str,
    mode: DeliveryMode,
) -> Result<NatsProducer, EventBusError> {
    let config = ProducerConfig::new(server_url, topic, group)
        .with_mode(mode)
        .with_credentials(Credentials::from_env()?);
    NatsProducer::connect(config).await
}
