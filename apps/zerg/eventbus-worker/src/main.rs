//! Zerg Event Bus Worker
//!
//! Consumes the configured topics through the event bus, in core or
//! persistent mode depending on `NATS_USE_JETSTREAM`, and drains every
//! consumer and producer on SIGINT/SIGTERM.

mod config;
mod handlers;

use crate::config::Config;
use crate::handlers::EventLogger;
use eventbus::{
    register, ConsumerHandler, FromEnv, NatsProducer, Producer, ShutdownCoordinator,
};
use eyre::{Result, WrapErr};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();
    init_tracing();

    info!("Starting Zerg event bus worker");

    let config = Config::from_env().wrap_err("Failed to load configuration")?;

    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
    }

    let coordinator = ShutdownCoordinator::new();
    coordinator.listen();

    if let Err(e) = start(&config, &coordinator).await {
        coordinator.drain_with_timeout(config.shutdown_timeout).await.ok();
        return Err(e);
    }

    coordinator.cancelled().await;

    if coordinator
        .drain_with_timeout(config.shutdown_timeout)
        .await
        .is_err()
    {
        warn!("Worker did not stop in time, exiting anyway");
    }

    info!("Zerg event bus worker stopped");
    Ok(())
}

/// Connect the forwarding producer and register one consumer per topic.
async fn start(config: &Config, coordinator: &ShutdownCoordinator) -> Result<()> {
    let forward = match &config.forward_topic {
        Some(topic) => {
            let producer = NatsProducer::connect(config.eventbus.producer(topic, &config.group))
                .await
                .wrap_err_with(|| format!("Failed to connect producer for {}", topic))?;
            let producer: Arc<dyn Producer> = Arc::new(producer);
            coordinator.track_producer(producer.clone());
            Some(producer)
        }
        None => None,
    };

    let handler: Arc<dyn ConsumerHandler> = Arc::new(EventLogger::new(forward));

    for topic in &config.topics {
        let consumer = register(
            config.eventbus.consumer(topic, &config.group),
            handler.clone(),
            coordinator,
        )
        .await
        .wrap_err_with(|| format!("Failed to register consumer for {}", topic))?;

        info!(
            topic = %consumer.topic(),
            group = %consumer.group(),
            mode = %consumer.mode(),
            "Consuming"
        );
    }

    Ok(())
}

fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_prod = std::env::var("APP_ENV")
        .map(|e| e == "production")
        .unwrap_or(false);

    let result = if is_prod {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false).pretty())
            .with(tracing_error::ErrorLayer::default())
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        debug!("Tracing already initialized, skipping re-initialization");
    }
}

/// Serve Prometheus metrics on `port`.
fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .wrap_err("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
