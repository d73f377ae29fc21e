//! Metrics for producers and consumers.
//!
//! Emitted through the `metrics` facade; the application decides which
//! recorder (if any) to install.

use crate::message::DeliveryMode;
use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics bound to one topic/group/mode.
#[derive(Clone)]
pub struct EventBusMetrics {
    topic: String,
    group: String,
    mode: &'static str,
}

impl EventBusMetrics {
    pub fn new(topic: &str, group: &str, mode: DeliveryMode) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            mode: mode.into(),
        }
    }

    pub fn messages_published(&self, count: usize) {
        counter!(
            "eventbus_messages_published_total",
            "topic" => self.topic.clone(),
            "mode" => self.mode
        )
        .increment(count as u64);
    }

    pub fn publish_failed(&self) {
        counter!(
            "eventbus_publish_failures_total",
            "topic" => self.topic.clone(),
            "mode" => self.mode
        )
        .increment(1);
    }

    pub fn message_received(&self) {
        counter!(
            "eventbus_messages_received_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone(),
            "mode" => self.mode
        )
        .increment(1);
    }

    /// Record a successful handler run.
    pub fn message_handled(&self, duration: Duration) {
        histogram!(
            "eventbus_handler_duration_seconds",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn handler_failed(&self) {
        counter!(
            "eventbus_handler_failures_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone(),
            "mode" => self.mode
        )
        .increment(1);
    }

    pub fn message_acked(&self) {
        counter!(
            "eventbus_messages_acked_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    pub fn message_nacked(&self) {
        counter!(
            "eventbus_messages_nacked_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    pub fn fetch_failed(&self) {
        counter!(
            "eventbus_fetch_errors_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }
}
