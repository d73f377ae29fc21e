//! NATS backend: connection management, stream provisioning, producer and
//! consume loops.

mod auth;
mod connection;
mod consumer;
mod producer;
mod stream;
mod transport;

pub use auth::{
    Credentials, NATS_JWT_TOKEN, NATS_NKEY_SEED, NATS_PASSWORD, NATS_TOKEN, NATS_USERNAME,
};
pub use connection::{NatsConnection, RECONNECT_WAIT};
pub use consumer::{register, register_consumer, ConsumerHandle};
pub use producer::{new_producer, NatsProducer, Producer, MAX_PUBLISH_WORKERS};
pub use stream::{
    stream_name, StreamAdmin, StreamDescriptor, StreamProvisioner, StreamStorage,
    STREAM_MAX_AGE, STREAM_MAX_BYTES, STREAM_MAX_MESSAGES, STREAM_SUFFIX,
};
pub use transport::{
    Acknowledge, Delivery, Inbound, NatsPullSubscription, NatsQueueSubscription,
    OutboundMessage, PullSubscription, PushSubscription, Transport,
};
