//! End-to-end tests against a real NATS server.
//!
//! Run with `cargo test -p eventbus -- --ignored` on a host with Docker.

use bytes::Bytes;
use eventbus::nats::NatsConnection;
use eventbus::{
    handler_fn, register, ConsumerConfig, Credentials, DeliveryMode, Message, NatsProducer,
    Producer, ProducerConfig, SendOptions, ShutdownCoordinator, StreamProvisioner,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::assertions::assert_same_items;
use test_utils::{TestDataBuilder, TestNats};
use tokio::sync::mpsc;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
const QUIET_PERIOD: Duration = Duration::from_secs(2);

async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(RECEIVE_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Handler channel closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<String>) {
    if let Ok(Some(extra)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        panic!("unexpected delivery: {}", extra);
    }
}

fn forwarding_handler(tx: mpsc::UnboundedSender<String>) -> Arc<dyn eventbus::ConsumerHandler> {
    Arc::new(handler_fn(move |message: Message, _cancel| {
        let tx = tx.clone();
        async move {
            tx.send(String::from_utf8_lossy(&message.body).to_string())?;
            Ok(())
        }
    }))
}

fn consumer_config(nats: &TestNats, topic: &str, group: &str, mode: DeliveryMode) -> ConsumerConfig {
    ConsumerConfig::new(nats.server_url(), topic, group)
        .with_mode(mode)
        .with_fetch_wait(Duration::from_millis(250))
}

#[tokio::test]
#[ignore = "requires Docker (testcontainers)"]
async fn test_core_delivery_is_at_most_once() {
    let nats = TestNats::new().await;
    let coordinator = ShutdownCoordinator::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = register(
        consumer_config(&nats, "orders.created", "billing", DeliveryMode::Core),
        forwarding_handler(tx),
        &coordinator,
    )
    .await
    .unwrap();

    let producer = NatsProducer::connect(ProducerConfig::new(
        nats.server_url(),
        "orders.created",
        "checkout",
    ))
    .await
    .unwrap();
    producer
        .send(Bytes::from_static(b"invoice-1"), SendOptions::default())
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, "invoice-1");
    assert_quiet(&mut rx).await;

    consumer.stop();
    consumer.join().await;

    // a fresh registration sees nothing from before
    let (tx, mut rx) = mpsc::unbounded_channel();
    register(
        consumer_config(&nats, "orders.created", "billing", DeliveryMode::Core),
        forwarding_handler(tx),
        &coordinator,
    )
    .await
    .unwrap();
    assert_quiet(&mut rx).await;

    producer.close().await.unwrap();
    coordinator.drain_with_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker (testcontainers)"]
async fn test_persistent_batch_is_delivered_once_each() {
    let nats = TestNats::new().await;
    let coordinator = ShutdownCoordinator::new();

    let payloads = TestDataBuilder::new(7).payloads("job", 3);

    let producer = NatsProducer::connect(
        ProducerConfig::new(nats.server_url(), "jobs.queue", "scheduler")
            .with_mode(DeliveryMode::Persistent),
    )
    .await
    .unwrap();

    producer
        .batch_send(
            payloads.iter().cloned().map(Bytes::from).collect(),
            SendOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(nats.stream_messages("jobs_queue_STREAM").await, 3);

    let (tx, mut rx) = mpsc::unbounded_channel();
    register(
        consumer_config(&nats, "jobs.queue", "workers", DeliveryMode::Persistent),
        forwarding_handler(tx),
        &coordinator,
    )
    .await
    .unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(recv(&mut rx).await);
    }
    assert_same_items(&received, &payloads, "persistent batch");
    assert_quiet(&mut rx).await;

    coordinator.track_producer(Arc::new(producer));
    coordinator.drain_with_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker (testcontainers)"]
async fn test_failed_delivery_is_redelivered_once() {
    let nats = TestNats::new().await;
    let coordinator = ShutdownCoordinator::new();
    let builder = TestDataBuilder::from_test_name("test_failed_delivery_is_redelivered_once");
    let topic = builder.topic("jobs");
    let group = builder.group("workers");

    let attempts: Arc<Mutex<HashMap<String, usize>>> = Default::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = {
        let attempts = attempts.clone();
        handler_fn(move |message: Message, _cancel| {
            let attempts = attempts.clone();
            let tx = tx.clone();
            async move {
                let body = String::from_utf8_lossy(&message.body).to_string();
                let attempt = {
                    let mut attempts = attempts.lock().unwrap();
                    let count = attempts.entry(body.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                tx.send(format!("{}#{}", body, attempt))?;
                if body == "x" && attempt == 1 {
                    eyre::bail!("transient failure on first delivery");
                }
                Ok(())
            }
        })
    };

    register(
        consumer_config(&nats, &topic, &group, DeliveryMode::Persistent),
        Arc::new(handler),
        &coordinator,
    )
    .await
    .unwrap();

    let producer = NatsProducer::connect(
        ProducerConfig::new(nats.server_url(), topic.as_str(), "scheduler")
            .with_mode(DeliveryMode::Persistent),
    )
    .await
    .unwrap();
    producer
        .send(Bytes::from_static(b"x"), SendOptions::new().with_sharding_key("job-x"))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, "x#1");

    // published after the failure, still handled after the redelivery
    producer
        .send(Bytes::from_static(b"y"), SendOptions::new().with_sharding_key("job-y"))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, "x#2");
    assert_eq!(recv(&mut rx).await, "y#1");
    assert_quiet(&mut rx).await;
    assert_eq!(attempts.lock().unwrap()["x"], 2);
    assert_eq!(attempts.lock().unwrap()["y"], 1);

    let mut consumer: async_nats::jetstream::consumer::PullConsumer = nats
        .jetstream()
        .get_stream(eventbus::stream_name(&topic))
        .await
        .unwrap()
        .get_consumer(&group)
        .await
        .unwrap();
    let info = consumer.info().await.unwrap();
    assert_eq!(info.num_ack_pending, 0);
    assert_eq!(info.num_pending, 0);

    producer.close().await.unwrap();
    coordinator.drain_with_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker (testcontainers)"]
async fn test_ensure_stream_twice() {
    let nats = TestNats::new().await;
    let connection = Arc::new(
        NatsConnection::connect(nats.server_url(), "provisioner-test", &Credentials::Anonymous)
            .await
            .unwrap(),
    );
    let provisioner = StreamProvisioner::new(connection.clone());

    let first = provisioner.ensure_stream("jobs.queue").await.unwrap();
    let second = provisioner.ensure_stream("jobs.queue").await.unwrap();

    assert_eq!(first, "jobs_queue_STREAM");
    assert_eq!(first, second);
    assert_eq!(nats.stream_messages("jobs_queue_STREAM").await, 0);

    connection.close().await;
}

#[tokio::test]
#[ignore = "requires Docker (testcontainers)"]
async fn test_send_after_close_is_rejected() {
    let nats = TestNats::new().await;
    let producer = NatsProducer::connect(ProducerConfig::new(
        nats.server_url(),
        "orders.created",
        "checkout",
    ))
    .await
    .unwrap();

    producer.close().await.unwrap();
    producer.close().await.unwrap();

    let err = producer
        .send(Bytes::from_static(b"late"), SendOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
