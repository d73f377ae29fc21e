//! Consumer registration and the two consume loops.
//!
//! Persistent mode pulls one message at a time from a durable consumer named
//! after the group: a handler `Ok` acks it, an `Err` naks it for redelivery.
//! Core mode joins a queue group, so each message reaches one member of the
//! group at most once and handler errors are only logged.

use crate::config::ConsumerConfig;
use crate::error::EventBusError;
use crate::handler::ConsumerHandler;
use crate::message::{DeliveryMode, Message};
use crate::metrics::EventBusMetrics;
use crate::nats::auth::Credentials;
use crate::nats::connection::NatsConnection;
use crate::nats::stream::StreamProvisioner;
use crate::nats::transport::{Delivery, NatsPullSubscription, PullSubscription, PushSubscription};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// A running consume loop.
///
/// Dropping the handle does not stop the loop; it runs until [`stop`](Self::stop)
/// or until the coordinator it was registered with shuts down.
pub struct ConsumerHandle {
    topic: String,
    group: String,
    mode: DeliveryMode,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Stop this consumer only. Other consumers keep running.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to exit and its connection to close.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(topic = %self.topic, group = %self.group, error = %e, "Consume task panicked");
        }
    }
}

/// Start consuming `config.topic` as part of `config.group`.
///
/// Validation, connect, stream provisioning and subscription all happen
/// before this returns; failures there are returned and nothing is left
/// running. The loop itself runs on the coordinator's task tracker.
pub async fn register(
    config: ConsumerConfig,
    handler: Arc<dyn ConsumerHandler>,
    coordinator: &ShutdownCoordinator,
) -> Result<ConsumerHandle, EventBusError> {
    config.validate()?;

    let connection = Arc::new(
        NatsConnection::connect(&config.server_url, &config.client_name(), &config.credentials)
            .await?,
    );

    let cancel = coordinator.child_token();
    let consume = ConsumeLoop::new(&config, handler);

    let task = match config.mode {
        DeliveryMode::Persistent => {
            let subscription = match open_durable(&connection, &config.topic, &config.group).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    connection.close().await;
                    return Err(e);
                }
            };
            let cancel = cancel.clone();
            coordinator.spawn(async move {
                consume.run_persistent(subscription, cancel).await;
                connection.close().await;
            })
        }
        DeliveryMode::Core => {
            let subscription = match connection
                .queue_subscription(&config.topic, &config.group)
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    connection.close().await;
                    return Err(e);
                }
            };
            let cancel = cancel.clone();
            coordinator.spawn(async move {
                consume.run_core(subscription, cancel).await;
                connection.close().await;
            })
        }
    };

    info!(
        topic = %config.topic,
        group = %config.group,
        mode = %config.mode,
        "Registered consumer"
    );

    Ok(ConsumerHandle {
        topic: config.topic,
        group: config.group,
        mode: config.mode,
        cancel,
        task,
    })
}

/// [`register`] with credentials taken from the environment.
pub async fn register_consumer(
    server_url: &str,
    topic: &str,
    group: &str,
    handler: Arc<dyn ConsumerHandler>,
    mode: DeliveryMode,
    coordinator: &ShutdownCoordinator,
) -> Result<ConsumerHandle, EventBusError> {
    let config = ConsumerConfig::new(server_url, topic, group)
        .with_mode(mode)
        .with_credentials(Credentials::from_env()?);
    register(config, handler, coordinator).await
}

async fn open_durable(
    connection: &Arc<NatsConnection>,
    topic: &str,
    group: &str,
) -> Result<NatsPullSubscription, EventBusError> {
    StreamProvisioner::new(connection.clone())
        .ensure_stream(topic)
        .await?;
    connection.pull_subscription(topic, group).await
}

/// State shared by both loop flavours.
struct ConsumeLoop {
    topic: String,
    group: String,
    handler: Arc<dyn ConsumerHandler>,
    metrics: EventBusMetrics,
    fetch_wait: Duration,
    fetch_error_backoff: Duration,
}

impl ConsumeLoop {
    fn new(config: &ConsumerConfig, handler: Arc<dyn ConsumerHandler>) -> Self {
        Self {
            topic: config.topic.clone(),
            group: config.group.clone(),
            handler,
            metrics: EventBusMetrics::new(&config.topic, &config.group, config.mode),
            fetch_wait: config.fetch_wait,
            fetch_error_backoff: config.fetch_error_backoff,
        }
    }

    fn message(&self, body: bytes::Bytes, sharding_key: Option<String>) -> Message {
        Message {
            topic: self.topic.clone(),
            group: self.group.clone(),
            body,
            sharding_key,
        }
    }

    /// Fetch, dispatch and ack one message at a time until cancelled.
    ///
    /// The handler receives the loop's token and decides whether to cut its
    /// work short; the loop itself observes cancellation between fetches.
    async fn run_persistent<S: PullSubscription>(&self, mut subscription: S, cancel: CancellationToken) {
        info!(topic = %self.topic, group = %self.group, "Persistent consumer started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = subscription.fetch(self.fetch_wait) => fetched,
            };

            match fetched {
                Ok(Some(delivery)) => self.dispatch_durable(delivery, &cancel).await,
                Ok(None) => {
                    trace!(topic = %self.topic, group = %self.group, "Fetch wait elapsed");
                }
                Err(e) => {
                    self.metrics.fetch_failed();
                    error!(topic = %self.topic, group = %self.group, error = %e, "Fetch failed");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.fetch_error_backoff) => {}
                    }
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(topic = %self.topic, group = %self.group, error = %e, "Unsubscribe failed");
        }
        info!(topic = %self.topic, group = %self.group, "Persistent consumer stopped");
    }

    async fn dispatch_durable(&self, delivery: Delivery, cancel: &CancellationToken) {
        self.metrics.message_received();
        let message = self.message(delivery.payload.clone(), None);

        let started = Instant::now();
        match self.handler.handle(message, cancel.clone()).await {
            Ok(()) => {
                self.metrics.message_handled(started.elapsed());
                match delivery.ack().await {
                    Ok(()) => self.metrics.message_acked(),
                    Err(e) => {
                        warn!(topic = %self.topic, group = %self.group, error = %e, "Ack failed, message will be redelivered")
                    }
                }
            }
            Err(e) => {
                self.metrics.handler_failed();
                error!(topic = %self.topic, group = %self.group, error = ?e, "Handler failed, requesting redelivery");
                match delivery.nak().await {
                    Ok(()) => self.metrics.message_nacked(),
                    Err(e) => {
                        warn!(topic = %self.topic, group = %self.group, error = %e, "Nak failed")
                    }
                }
            }
        }
    }

    /// Dispatch queue-group deliveries until cancelled or the subscription ends.
    async fn run_core<S: PushSubscription>(&self, mut subscription: S, cancel: CancellationToken) {
        info!(topic = %self.topic, group = %self.group, "Core consumer started");

        loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                inbound = subscription.next() => inbound,
            };
            let Some(inbound) = inbound else {
                debug!(topic = %self.topic, group = %self.group, "Subscription closed");
                break;
            };

            self.metrics.message_received();
            let message = self.message(inbound.payload, inbound.sharding_key);
            let started = Instant::now();
            match self.handler.handle(message, cancel.clone()).await {
                Ok(()) => {
                    self.metrics.message_handled(started.elapsed());
                    debug!(topic = %self.topic, group = %self.group, "Message handled");
                }
                Err(e) => {
                    self.metrics.handler_failed();
                    error!(topic = %self.topic, group = %self.group, error = ?e, "Handler failed, message dropped");
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            debug!(topic = %self.topic, group = %self.group, error = %e, "Unsubscribe failed");
        }
        info!(topic = %self.topic, group = %self.group, "Core consumer stopped");
    }
}
