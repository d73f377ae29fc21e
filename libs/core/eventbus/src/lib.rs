//! Uniform publish/consume over NATS.
//!
//! One producer and consumer API covers two delivery models:
//! - **Core**: core NATS pub/sub with queue groups. At-most-once, no redelivery.
//! - **Persistent**: JetStream streams with durable pull consumers. At-least-once,
//!   the handler result decides ack or nak.
//!
//! The mode is chosen once per producer or consumer and never changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ NatsProducer │──▶│                  │──▶│ consume loop     │
//! │ (batch_send) │   │  NATS / JetStream│   │ (register)       │
//! └──────┬───────┘   │  <topic>_STREAM  │   └────────┬─────────┘
//!        │           └──────────────────┘            │
//!        ▼                    ▲                      ▼
//! ┌──────────────┐            │             ┌──────────────────┐
//! │ Stream       │────────────┘             │ ConsumerHandler  │
//! │ Provisioner  │                          │ (your logic)     │
//! └──────────────┘                          └──────────────────┘
//!        ▲                                           ▲
//!        └────────── ShutdownCoordinator ────────────┘
//!                 (signals, cancel, join, drain)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use eventbus::{handler_fn, register, EventBusSettings, FromEnv, Message, NatsProducer,
//!     Producer, SendOptions, ShutdownCoordinator};
//!
//! let settings = EventBusSettings::from_env()?;
//! let coordinator = ShutdownCoordinator::new();
//!
//! let handler = handler_fn(|message: Message, _cancel| async move {
//!     tracing::info!(bytes = message.body.len(), "invoice requested");
//!     Ok(())
//! });
//! register(settings.consumer("orders.created", "billing"), Arc::new(handler), &coordinator).await?;
//!
//! let producer = Arc::new(NatsProducer::connect(settings.producer("orders.created", "checkout")).await?);
//! coordinator.track_producer(producer.clone());
//! producer.send(Bytes::from_static(b"{\"order\":42}"), SendOptions::new().with_sharding_key("order-42")).await?;
//!
//! coordinator.wait_for_signal().await;
//! coordinator.drain_with_timeout(Duration::from_secs(30)).await.ok();
//! ```

mod config;
mod error;
mod handler;
mod message;
mod metrics;
pub mod nats;
mod shutdown;

pub use config::{
    env_non_empty, env_or_default, env_required, ConfigError, ConsumerConfig, EventBusSettings,
    FromEnv, ProducerConfig, DEFAULT_FETCH_ERROR_BACKOFF, DEFAULT_FETCH_WAIT, DEFAULT_NATS_URL,
};
pub use error::EventBusError;
pub use handler::{handler_fn, ConsumerHandler, FnHandler};
pub use message::{DeliveryMode, Message, SendOptions, SHARDING_KEY_HEADER};
pub use metrics::EventBusMetrics;
pub use nats::{
    new_producer, register, register_consumer, stream_name, ConsumerHandle, Credentials,
    NatsProducer, Producer, StreamProvisioner,
};
pub use shutdown::ShutdownCoordinator;
pub use tokio_util::sync::CancellationToken;
