//! Broker seams used by the producer and the consume loops.
//!
//! The NATS implementations live next to the traits; tests substitute mocks
//! or scripted fakes.

use crate::error::EventBusError;
use crate::message::SHARDING_KEY_HEADER;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::Consumer;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Sent as the `Sharding-Key` header (core publishes only).
    pub sharding_key: Option<String>,
    /// Broker-level deduplication id (persistent publishes only).
    pub message_id: Option<String>,
}

/// Publishing side of a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, message: OutboundMessage) -> Result<(), EventBusError>;

    /// Publish into a durable stream and wait for the broker ack.
    async fn publish_persistent(&self, message: OutboundMessage) -> Result<(), EventBusError>;

    /// Wait until the server has processed everything published so far.
    async fn flush(&self) -> Result<(), EventBusError>;

    /// Flush pending work and close the connection.
    async fn drain(&self) -> Result<(), EventBusError>;
}

/// Positive/negative acknowledgement of one durable delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), EventBusError>;
    async fn nak(&self) -> Result<(), EventBusError>;
}

/// One message fetched from a durable consumer.
pub struct Delivery {
    pub payload: Bytes,
    acknowledger: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(payload: Bytes, acknowledger: Box<dyn Acknowledge>) -> Self {
        Self {
            payload,
            acknowledger,
        }
    }

    /// Advance the durable cursor past this message.
    pub async fn ack(&self) -> Result<(), EventBusError> {
        self.acknowledger.ack().await
    }

    /// Ask the broker to redeliver this message.
    pub async fn nak(&self) -> Result<(), EventBusError> {
        self.acknowledger.nak().await
    }
}

/// Durable pull subscription scoped to topic + group.
#[async_trait]
pub trait PullSubscription: Send {
    /// Fetch at most one message, waiting up to `max_wait`.
    ///
    /// `Ok(None)` means the wait elapsed with nothing to deliver.
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Delivery>, EventBusError>;

    /// Release the local subscription.
    async fn unsubscribe(&mut self) -> Result<(), EventBusError>;
}

/// A message pushed by a queue-group subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub payload: Bytes,
    pub sharding_key: Option<String>,
}

/// Queue-grouped push subscription.
#[async_trait]
pub trait PushSubscription: Send {
    /// Next message, or `None` once the subscription is closed.
    async fn next(&mut self) -> Option<Inbound>;

    /// Release the subscription.
    async fn unsubscribe(&mut self) -> Result<(), EventBusError>;
}

/// JetStream durable pull consumer.
pub struct NatsPullSubscription {
    consumer: Consumer<PullConfig>,
}

impl NatsPullSubscription {
    pub fn new(consumer: Consumer<PullConfig>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl PullSubscription for NatsPullSubscription {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<Delivery>, EventBusError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| EventBusError::Fetch(e.to_string()))?;

        match batch.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(EventBusError::Fetch(e.to_string())),
            Some(Ok(message)) => {
                let payload = message.payload.clone();
                Ok(Some(Delivery::new(payload, Box::new(JetStreamAck(message)))))
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), EventBusError> {
        // The durable consumer stays on the server so the cursor survives restarts.
        debug!("Released JetStream pull subscription");
        Ok(())
    }
}

struct JetStreamAck(async_nats::jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), EventBusError> {
        self.0
            .ack()
            .await
            .map_err(|e| EventBusError::Acknowledge(e.to_string()))
    }

    async fn nak(&self) -> Result<(), EventBusError> {
        self.0
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| EventBusError::Acknowledge(e.to_string()))
    }
}

/// Core NATS queue subscription.
pub struct NatsQueueSubscription {
    subscriber: async_nats::Subscriber,
}

impl NatsQueueSubscription {
    pub fn new(subscriber: async_nats::Subscriber) -> Self {
        Self { subscriber }
    }
}

#[async_trait]
impl PushSubscription for NatsQueueSubscription {
    async fn next(&mut self) -> Option<Inbound> {
        self.subscriber.next().await.map(|msg| Inbound {
            sharding_key: msg
                .headers
                .as_ref()
                .and_then(|headers| headers.get(SHARDING_KEY_HEADER))
                .map(|value| value.as_str().to_string()),
            payload: msg.payload,
        })
    }

    async fn unsubscribe(&mut self) -> Result<(), EventBusError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| EventBusError::Subscribe(e.to_string()))
    }
}
