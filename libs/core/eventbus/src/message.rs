//! Message and delivery types shared by producers and consumers.

use bytes::Bytes;
use strum::{Display, EnumString, IntoStaticStr};

/// Header carrying the sharding key on core NATS messages.
pub const SHARDING_KEY_HEADER: &str = "Sharding-Key";

/// How messages travel through the broker.
///
/// Chosen once when a producer or consumer is built and never changed
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeliveryMode {
    /// Fire-and-forget pub/sub, at-most-once, no redelivery.
    #[default]
    Core,
    /// Durable JetStream log, at-least-once with ack/nak.
    Persistent,
}

impl DeliveryMode {
    /// Map the legacy `NATS_USE_JETSTREAM=true` toggle to a mode.
    pub fn from_jetstream_flag(enabled: bool) -> Self {
        if enabled {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::Core
        }
    }
}

/// A message delivered to a consumer handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub group: String,
    pub body: Bytes,
    pub sharding_key: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, group: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            body: body.into(),
            sharding_key: None,
        }
    }

    pub fn with_sharding_key(mut self, key: impl Into<String>) -> Self {
        self.sharding_key = Some(key.into());
        self
    }
}

/// Per-send options.
///
/// The sharding key is a deduplication hint in persistent mode and a routing
/// header in core mode. It never implies ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub sharding_key: Option<String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharding key.
    pub fn with_sharding_key(mut self, key: impl Into<String>) -> Self {
        self.sharding_key = Some(key.into());
        self
    }

    /// The sharding key, treating an empty string as unset.
    pub fn sharding_key(&self) -> Option<&str> {
        self.sharding_key.as_deref().filter(|key| !key.is_empty())
    }

    /// Deduplication id for the message at `index` of a persistent batch.
    pub fn message_id(&self, index: usize) -> Option<String> {
        self.sharding_key().map(|key| format!("{}-{}", key, index))
    }
}
