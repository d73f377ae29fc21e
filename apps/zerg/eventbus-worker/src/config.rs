//! Configuration for the event bus worker

use eventbus::{env_non_empty, env_or_default, ConfigError, EventBusSettings, FromEnv};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// NATS URL, delivery mode and credentials
    pub eventbus: EventBusSettings,

    /// Topics to consume, one consumer each
    pub topics: Vec<String>,

    /// Consumer group shared by every worker instance
    pub group: String,

    /// Handled messages are re-published here when set
    pub forward_topic: Option<String>,

    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,

    /// Upper bound on graceful shutdown
    pub shutdown_timeout: Duration,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        let topics: Vec<String> = env_or_default("WORKER_TOPICS", "orders.created")
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect();
        if topics.is_empty() {
            return Err(ConfigError::MissingEnvVar("WORKER_TOPICS".to_string()));
        }

        let metrics_port = env_non_empty("METRICS_PORT")
            .map(|port| parse("METRICS_PORT", &port))
            .transpose()?;

        let shutdown_timeout = Duration::from_secs(parse(
            "SHUTDOWN_TIMEOUT_SECS",
            &env_or_default("SHUTDOWN_TIMEOUT_SECS", "30"),
        )?);

        Ok(Self {
            eventbus: EventBusSettings::from_env()?,
            topics,
            group: env_or_default("WORKER_GROUP", "eventbus-workers"),
            forward_topic: env_non_empty("WORKER_FORWARD_TOPIC"),
            metrics_port,
            shutdown_timeout,
        })
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::ParseError {
        key: key.to_string(),
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventbus::DeliveryMode;

    const VARS: [&str; 8] = [
        "WORKER_TOPICS",
        "WORKER_GROUP",
        "WORKER_FORWARD_TOPIC",
        "METRICS_PORT",
        "SHUTDOWN_TIMEOUT_SECS",
        "NATS_URL",
        "NATS_USE_JETSTREAM",
        "NATS_JWT_TOKEN",
    ];

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.topics, vec!["orders.created".to_string()]);
            assert_eq!(config.group, "eventbus-workers");
            assert_eq!(config.forward_topic, None);
            assert_eq!(config.metrics_port, None);
            assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
            assert_eq!(config.eventbus.mode, DeliveryMode::Core);
        });
    }

    #[test]
    fn test_topic_list_and_persistent_mode() {
        temp_env::with_vars(
            [
                ("WORKER_TOPICS", Some("orders.created, jobs.queue ,,")),
                ("WORKER_GROUP", Some("billing")),
                ("NATS_USE_JETSTREAM", Some("true")),
                ("METRICS_PORT", Some("9464")),
                ("WORKER_FORWARD_TOPIC", None),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.topics, vec!["orders.created", "jobs.queue"]);
                assert_eq!(config.group, "billing");
                assert_eq!(config.metrics_port, Some(9464));
                assert_eq!(config.eventbus.mode, DeliveryMode::Persistent);
            },
        );
    }

    #[test]
    fn test_invalid_values() {
        temp_env::with_vars([("METRICS_PORT", Some("not-a-port"))], || {
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "METRICS_PORT"));
        });

        temp_env::with_vars([("WORKER_TOPICS", Some(" , "))], || {
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(_)));
        });
    }
}
