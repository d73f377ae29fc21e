//! Configuration for producers and consumers.

use crate::error::EventBusError;
use crate::message::DeliveryMode;
use crate::nats::Credentials;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Bounded wait for a single durable fetch.
pub const DEFAULT_FETCH_WAIT: Duration = Duration::from_secs(1);

/// Pause after a non-timeout fetch failure before fetching again.
pub const DEFAULT_FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid configuration for '{key}': {details}")]
    Invalid { key: String, details: String },
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read an environment variable, treating an empty value as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

/// Read an environment variable or fall back to `default`.
pub fn env_or_default(key: &str, default: &str) -> String {
    env_non_empty(key).unwrap_or_else(|| default.to_string())
}

/// Read an environment variable or return an error.
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env_non_empty(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Process-level event bus settings.
///
/// Loaded once at startup. The delivery mode read here is handed to every
/// producer and consumer explicitly.
///
/// Environment variables:
/// - `NATS_URL` (default `nats://localhost:4222`)
/// - `NATS_USE_JETSTREAM` (`true` selects persistent mode)
/// - credentials, see [`Credentials::from_env`]
#[derive(Debug, Clone)]
pub struct EventBusSettings {
    pub server_url: String,
    pub mode: DeliveryMode,
    pub credentials: Credentials,
}

impl FromEnv for EventBusSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let use_jetstream = match env_non_empty("NATS_USE_JETSTREAM") {
            None => false,
            Some(value) => value.parse::<bool>().map_err(|e| ConfigError::ParseError {
                key: "NATS_USE_JETSTREAM".to_string(),
                details: e.to_string(),
            })?,
        };

        // the only way credential resolution fails is a JWT without its seed
        let credentials = Credentials::from_env().map_err(|e| ConfigError::Invalid {
            key: "credentials".to_string(),
            details: e.to_string(),
        })?;

        Ok(Self {
            server_url: env_or_default("NATS_URL", DEFAULT_NATS_URL),
            mode: DeliveryMode::from_jetstream_flag(use_jetstream),
            credentials,
        })
    }
}

impl EventBusSettings {
    /// Producer configuration for `topic` using these settings.
    pub fn producer(&self, topic: impl Into<String>, group: impl Into<String>) -> ProducerConfig {
        ProducerConfig::new(&self.server_url, topic, group)
            .with_mode(self.mode)
            .with_credentials(self.credentials.clone())
    }

    /// Consumer configuration for `topic`/`group` using these settings.
    pub fn consumer(&self, topic: impl Into<String>, group: impl Into<String>) -> ConsumerConfig {
        ConsumerConfig::new(&self.server_url, topic, group)
            .with_mode(self.mode)
            .with_credentials(self.credentials.clone())
    }
}

fn require(value: &str, what: &str) -> Result<(), EventBusError> {
    if value.trim().is_empty() {
        return Err(EventBusError::validation(format!("{} is empty", what)));
    }
    Ok(())
}

/// Producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub server_url: String,
    pub topic: String,
    pub group: String,
    pub mode: DeliveryMode,
    pub credentials: Credentials,
}

impl ProducerConfig {
    /// Create a core-mode, anonymous producer configuration.
    pub fn new(
        server_url: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            topic: topic.into(),
            group: group.into(),
            mode: DeliveryMode::Core,
            credentials: Credentials::Anonymous,
        }
    }

    /// Set the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Check required fields before connecting.
    pub fn validate(&self) -> Result<(), EventBusError> {
        require(&self.server_url, "server URL")?;
        require(&self.topic, "topic")?;
        Ok(())
    }

    /// Client name announced to the server.
    pub fn client_name(&self) -> String {
        if self.group.is_empty() {
            "eventbus-producer".to_string()
        } else {
            format!("{}-producer", self.group)
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub server_url: String,
    pub topic: String,
    pub group: String,
    pub mode: DeliveryMode,
    pub credentials: Credentials,
    /// Bounded wait for one durable fetch; also bounds shutdown latency.
    pub fetch_wait: Duration,
    /// Pause after a failed fetch that was not a timeout.
    pub fetch_error_backoff: Duration,
}

impl ConsumerConfig {
    /// Create a core-mode, anonymous consumer configuration.
    pub fn new(
        server_url: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            topic: topic.into(),
            group: group.into(),
            mode: DeliveryMode::Core,
            credentials: Credentials::Anonymous,
            fetch_wait: DEFAULT_FETCH_WAIT,
            fetch_error_backoff: DEFAULT_FETCH_ERROR_BACKOFF,
        }
    }

    /// Set the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the fetch wait.
    pub fn with_fetch_wait(mut self, wait: Duration) -> Self {
        self.fetch_wait = wait;
        self
    }

    /// Set the pause after a failed fetch.
    pub fn with_fetch_error_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_error_backoff = backoff;
        self
    }

    /// Check required fields before connecting.
    pub fn validate(&self) -> Result<(), EventBusError> {
        require(&self.server_url, "NATS server URL")?;
        require(&self.topic, "topic")?;
        require(&self.group, "group")?;
        if self.fetch_wait.is_zero() {
            return Err(EventBusError::validation("fetch wait must be positive"));
        }
        Ok(())
    }

    /// Client name announced to the server.
    pub fn client_name(&self) -> String {
        format!("{}-consumer", self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_builder() {
        let config = ConsumerConfig::new("nats://localhost:4222", "jobs.queue", "workers")
            .with_mode(DeliveryMode::Persistent)
            .with_fetch_wait(Duration::from_millis(250))
            .with_fetch_error_backoff(Duration::from_millis(10));

        assert_eq!(config.mode, DeliveryMode::Persistent);
        assert_eq!(config.fetch_wait, Duration::from_millis(250));
        assert_eq!(config.fetch_error_backoff, Duration::from_millis(10));
        assert_eq!(config.client_name(), "workers-consumer");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consumer_config_rejects_empty_fields() {
        let cases = [
            ConsumerConfig::new("", "jobs.queue", "workers"),
            ConsumerConfig::new("nats://localhost:4222", "", "workers"),
            ConsumerConfig::new("nats://localhost:4222", "jobs.queue", " "),
            ConsumerConfig::new("nats://localhost:4222", "jobs.queue", "workers")
                .with_fetch_wait(Duration::ZERO),
        ];
        for config in cases {
            assert!(config.validate().unwrap_err().is_validation());
        }
    }

    #[test]
    fn test_producer_config_requires_url_and_topic() {
        assert!(ProducerConfig::new("", "t", "g").validate().is_err());
        assert!(ProducerConfig::new("nats://x", "", "g").validate().is_err());
        // group is only used for the client name
        assert!(ProducerConfig::new("nats://x", "t", "").validate().is_ok());
        assert_eq!(ProducerConfig::new("nats://x", "t", "").client_name(), "eventbus-producer");
        assert_eq!(ProducerConfig::new("nats://x", "t", "billing").client_name(), "billing-producer");
    }

    #[test]
    fn test_settings_defaults() {
        temp_env::with_vars_unset(
            [
                "NATS_URL",
                "NATS_USE_JETSTREAM",
                "NATS_JWT_TOKEN",
                "NATS_NKEY_SEED",
                "NATS_USERNAME",
                "NATS_PASSWORD",
                "NATS_TOKEN",
            ],
            || {
                let settings = EventBusSettings::from_env().unwrap();
                assert_eq!(settings.server_url, DEFAULT_NATS_URL);
                assert_eq!(settings.mode, DeliveryMode::Core);
                assert_eq!(settings.credentials, Credentials::Anonymous);
            },
        );
    }

    #[test]
    fn test_settings_jetstream_toggle() {
        temp_env::with_vars(
            [
                ("NATS_URL", Some("nats://broker:4222")),
                ("NATS_USE_JETSTREAM", Some("true")),
                ("NATS_JWT_TOKEN", None),
                ("NATS_USERNAME", None),
                ("NATS_TOKEN", Some("s3cret")),
            ],
            || {
                let settings = EventBusSettings::from_env().unwrap();
                assert_eq!(settings.server_url, "nats://broker:4222");
                assert_eq!(settings.mode, DeliveryMode::Persistent);
                assert_eq!(settings.credentials, Credentials::Token("s3cret".into()));

                let consumer = settings.consumer("jobs.queue", "workers");
                assert_eq!(consumer.mode, DeliveryMode::Persistent);
                assert_eq!(consumer.server_url, "nats://broker:4222");
            },
        );
    }

    #[test]
    fn test_settings_keep_credential_error_details() {
        temp_env::with_vars(
            [("NATS_JWT_TOKEN", Some("eyJ0eXAi")), ("NATS_NKEY_SEED", None)],
            || match EventBusSettings::from_env().unwrap_err() {
                ConfigError::Invalid { key, details } => {
                    assert_eq!(key, "credentials");
                    assert!(details.contains("NATS_NKEY_SEED is required"), "{}", details);
                }
                other => panic!("unexpected error: {:?}", other),
            },
        );
    }

    #[test]
    fn test_settings_invalid_jetstream_flag() {
        temp_env::with_var("NATS_USE_JETSTREAM", Some("yes please"), || {
            let err = EventBusSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("NATS_USE_JETSTREAM"));
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("EVENTBUS_MISSING_REQUIRED", || {
            let err = env_required("EVENTBUS_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("EVENTBUS_MISSING_REQUIRED"));
        });
    }
}
