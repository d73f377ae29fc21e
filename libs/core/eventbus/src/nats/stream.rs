//! JetStream stream provisioning.
//!
//! Every persistent topic is backed by one stream whose name is derived from
//! the topic. The derived name doubles as the existence key, so it must stay
//! bit-exact:
//!
//! | topic character | stream name |
//! |-----------------|-------------|
//! | `.`             | `_`         |
//! | anything else   | unchanged   |
//!
//! followed by the `_STREAM` suffix (`jobs.queue` -> `jobs_queue_STREAM`).

use crate::error::EventBusError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Suffix appended to every derived stream name.
pub const STREAM_SUFFIX: &str = "_STREAM";

/// Messages older than this are discarded.
pub const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of retained messages.
pub const STREAM_MAX_MESSAGES: i64 = 1_000_000;

/// Maximum retained bytes (1 GiB).
pub const STREAM_MAX_BYTES: i64 = 1024 * 1024 * 1024;

/// Derive the stream name for a topic.
pub fn stream_name(topic: &str) -> String {
    let mut name = topic.replace('.', "_");
    name.push_str(STREAM_SUFFIX);
    name
}

/// Where a stream keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStorage {
    File,
}

/// Stream definition with the fixed retention policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StreamStorage,
    pub max_age: Duration,
    pub max_messages: i64,
    pub max_bytes: i64,
}

impl StreamDescriptor {
    /// Descriptor for the stream backing `topic`.
    pub fn for_topic(topic: &str) -> Self {
        Self {
            name: stream_name(topic),
            subjects: vec![topic.to_string()],
            storage: StreamStorage::File,
            max_age: STREAM_MAX_AGE,
            max_messages: STREAM_MAX_MESSAGES,
            max_bytes: STREAM_MAX_BYTES,
        }
    }
}

impl From<&StreamDescriptor> for async_nats::jetstream::stream::Config {
    fn from(descriptor: &StreamDescriptor) -> Self {
        let storage = match descriptor.storage {
            StreamStorage::File => async_nats::jetstream::stream::StorageType::File,
        };
        Self {
            name: descriptor.name.clone(),
            subjects: descriptor.subjects.clone(),
            storage,
            max_age: descriptor.max_age,
            max_messages: descriptor.max_messages,
            max_bytes: descriptor.max_bytes,
            ..Default::default()
        }
    }
}

/// Stream management calls against the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    /// Look a stream up by name.
    ///
    /// Returns [`EventBusError::StreamNotFound`] when it does not exist.
    async fn stream_info(&self, name: &str) -> Result<(), EventBusError>;

    /// Create a stream.
    ///
    /// Returns [`EventBusError::StreamAlreadyExists`] when another client won
    /// the race.
    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), EventBusError>;
}

/// Makes sure the stream for a topic exists before it is used.
#[derive(Clone)]
pub struct StreamProvisioner {
    admin: Arc<dyn StreamAdmin>,
}

impl StreamProvisioner {
    pub fn new(admin: Arc<dyn StreamAdmin>) -> Self {
        Self { admin }
    }

    /// Ensure the stream backing `topic` exists, creating it if absent.
    ///
    /// Safe to call concurrently: a lost create race counts as success.
    /// Lookup failures other than "not found" are returned unchanged.
    pub async fn ensure_stream(&self, topic: &str) -> Result<String, EventBusError> {
        let descriptor = StreamDescriptor::for_topic(topic);

        match self.admin.stream_info(&descriptor.name).await {
            Ok(()) => {
                debug!(stream = %descriptor.name, "Stream already exists");
                return Ok(descriptor.name);
            }
            Err(e) if e.is_stream_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.admin.create_stream(&descriptor).await {
            Ok(()) => {
                info!(stream = %descriptor.name, subject = %topic, "Created JetStream stream");
                Ok(descriptor.name)
            }
            Err(EventBusError::StreamAlreadyExists(_)) => {
                debug!(stream = %descriptor.name, "Stream created concurrently");
                Ok(descriptor.name)
            }
            Err(e) => Err(e),
        }
    }
}
