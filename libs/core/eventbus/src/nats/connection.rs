//! Connection manager: one NATS connection per producer or consumer.

use crate::error::EventBusError;
use crate::message::SHARDING_KEY_HEADER;
use crate::nats::auth::Credentials;
use crate::nats::stream::{stream_name, StreamAdmin, StreamDescriptor};
use crate::nats::transport::{
    NatsPullSubscription, NatsQueueSubscription, OutboundMessage, Transport,
};
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::context::{CreateStreamErrorKind, GetStreamErrorKind, Publish};
use async_nats::jetstream::{self, ErrorCode};
use async_nats::{Client, ConnectOptions, Event, HeaderMap};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed pause between reconnect attempts.
pub const RECONNECT_WAIT: Duration = Duration::from_secs(2);

/// An open NATS connection with its JetStream context.
///
/// Reconnects forever after the initial connect succeeds; reconnect and
/// disconnect events are only logged.
pub struct NatsConnection {
    client: Client,
    jetstream: jetstream::Context,
    name: String,
    closed: AtomicBool,
}

impl NatsConnection {
    /// Connect to `server_url` announcing `name`.
    ///
    /// Fails fast on an empty URL, bad credentials or an unreachable server.
    pub async fn connect(
        server_url: &str,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Self, EventBusError> {
        if server_url.trim().is_empty() {
            return Err(EventBusError::validation("NATS server URL is empty"));
        }

        let event_name = name.to_string();
        let options = ConnectOptions::new()
            .name(name)
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(|_attempts| RECONNECT_WAIT)
            .event_callback(move |event| {
                let name = event_name.clone();
                async move {
                    match event {
                        Event::Disconnected => {
                            warn!(client = %name, "NATS connection lost, reconnecting")
                        }
                        Event::Connected => info!(client = %name, "NATS connection established"),
                        other => debug!(client = %name, event = %other, "NATS connection event"),
                    }
                }
            });
        let options = credentials.apply(options)?;

        let client = options
            .connect(server_url)
            .await
            .map_err(|e| EventBusError::Connection(format!("{}: {}", server_url, e)))?;

        info!(
            client = %name,
            server = %server_url,
            auth = credentials.strategy(),
            "Connected to NATS"
        );

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            name: name.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a durable pull subscription; `group` names the durable cursor.
    pub async fn pull_subscription(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<NatsPullSubscription, EventBusError> {
        let name = stream_name(topic);
        let stream = self
            .jetstream
            .get_stream(&name)
            .await
            .map_err(|e| EventBusError::Subscribe(format!("stream {}: {}", name, e)))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                PullConfig {
                    durable_name: Some(group.to_string()),
                    filter_subject: topic.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventBusError::Subscribe(format!("durable {}: {}", group, e)))?;

        debug!(stream = %name, durable = %group, "Opened JetStream pull subscription");
        Ok(NatsPullSubscription::new(consumer))
    }

    /// Open a queue-grouped push subscription.
    pub async fn queue_subscription(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<NatsQueueSubscription, EventBusError> {
        let subscriber = self
            .client
            .queue_subscribe(topic.to_string(), group.to_string())
            .await
            .map_err(|e| EventBusError::Subscribe(format!("queue {} on {}: {}", group, topic, e)))?;
        // the server must know the interest before register returns
        self.client
            .flush()
            .await
            .map_err(|e| EventBusError::Subscribe(format!("queue {} on {}: {}", group, topic, e)))?;

        debug!(subject = %topic, queue = %group, "Opened NATS queue subscription");
        Ok(NatsQueueSubscription::new(subscriber))
    }

    /// Drain and close the connection. Idempotent; drain failures are logged.
    pub async fn close(&self) {
        if let Err(e) = Transport::drain(self).await {
            warn!(client = %self.name, error = %e, "Drain NATS connection failed");
        }
        debug!(client = %self.name, "NATS connection closed");
    }
}

#[async_trait]
impl Transport for NatsConnection {
    async fn publish(&self, message: OutboundMessage) -> Result<(), EventBusError> {
        let result = match message.sharding_key {
            Some(key) => {
                let mut headers = HeaderMap::new();
                headers.insert(SHARDING_KEY_HEADER, key.as_str());
                self.client
                    .publish_with_headers(message.subject, headers, message.payload)
                    .await
            }
            None => self.client.publish(message.subject, message.payload).await,
        };
        result.map_err(|e| EventBusError::publish(0, e))
    }

    async fn publish_persistent(&self, message: OutboundMessage) -> Result<(), EventBusError> {
        let mut publish = Publish::build().payload(message.payload);
        if let Some(id) = message.message_id {
            publish = publish.message_id(id);
        }

        let ack = self
            .jetstream
            .send_publish(message.subject, publish)
            .await
            .map_err(|e| EventBusError::publish(0, e))?;
        ack.await.map_err(|e| EventBusError::publish(0, e))?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), EventBusError> {
        self.client
            .flush()
            .await
            .map_err(|e| EventBusError::Flush(e.to_string()))
    }

    async fn drain(&self) -> Result<(), EventBusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .drain()
            .await
            .map_err(|e| EventBusError::Drain(e.to_string()))
    }
}

#[async_trait]
impl StreamAdmin for NatsConnection {
    async fn stream_info(&self, name: &str) -> Result<(), EventBusError> {
        match self.jetstream.get_stream(name).await {
            Ok(_) => Ok(()),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(js)
                    if js.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Err(EventBusError::StreamNotFound(name.to_string()))
                }
                _ => Err(EventBusError::StreamLookup {
                    stream: name.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), EventBusError> {
        match self.jetstream.create_stream(jetstream::stream::Config::from(descriptor)).await {
            Ok(_) => Ok(()),
            Err(e) => match e.kind() {
                CreateStreamErrorKind::JetStream(js)
                    if js.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    Err(EventBusError::StreamAlreadyExists(descriptor.name.clone()))
                }
                _ => Err(EventBusError::StreamCreate {
                    stream: descriptor.name.clone(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_url() {
        let err = NatsConnection::connect("  ", "test-producer", &Credentials::Anonymous)
            .await
            .err()
            .expect("empty URL must fail");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_connect_rejects_jwt_with_bad_seed_before_dialing() {
        let creds = Credentials::Jwt {
            jwt: "eyJ0eXAi".into(),
            seed: "garbage".into(),
        };
        // port 1 is never a NATS server; the auth error must win
        let err = NatsConnection::connect("nats://127.0.0.1:1", "test-consumer", &creds)
            .await
            .err()
            .expect("bad seed must fail");
        assert!(matches!(err, EventBusError::Auth(_)));
    }

    #[tokio::test]
    async fn test_connect_unreachable_server() {
        let err = NatsConnection::connect("nats://127.0.0.1:1", "test-producer", &Credentials::Anonymous)
            .await
            .err()
            .expect("unreachable server must fail");
        assert!(err.is_connection());
    }
}
