//! Shared test utilities for event bus testing
//!
//! This crate provides reusable test infrastructure:
//! - `TestNats`: NATS container with JetStream and automatic cleanup (feature: "nats")
//! - `TestDataBuilder`: Deterministic topic, group and payload naming (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `nats` (default): Enables NATS test infrastructure
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestNats};
//!
//! #[tokio::test]
//! async fn my_nats_test() {
//!     let nats = TestNats::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let topic = builder.topic("orders");
//!     let group = builder.group("billing");
//!     // connect producers/consumers to nats.server_url()
//! }
//! ```

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::TestNats;

/// Builder for test data with deterministic naming
///
/// Topics and groups derived from a test name do not collide with those of
/// other tests sharing a server, and stay the same across runs.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_batch_send");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Dotted subject unique to this builder.
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.topic("orders"), "test.orders.7");
    /// ```
    pub fn topic(&self, prefix: &str) -> String {
        format!("test.{}.{}", prefix, self.seed)
    }

    /// Consumer group name; also valid as a JetStream durable name.
    pub fn group(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.seed)
    }

    /// Numbered payloads `"{prefix}-0"`, `"{prefix}-1"`, ...
    pub fn payloads(&self, prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{}-{}", prefix, i)).collect()
    }
}

/// Test assertion helpers
pub mod assertions {
    use std::collections::HashSet;
    use std::fmt::Debug;
    use std::hash::Hash;

    /// Assert that two collections hold the same items, ignoring order
    pub fn assert_same_items<T>(actual: &[T], expected: &[T], context: &str)
    where
        T: Eq + Hash + Debug,
    {
        let actual_set: HashSet<&T> = actual.iter().collect();
        let expected_set: HashSet<&T> = expected.iter().collect();
        assert_eq!(
            actual_set, expected_set,
            "{}: expected {:?}, got {:?}",
            context, expected, actual
        );
        assert_eq!(
            actual.len(),
            expected.len(),
            "{}: expected {} items, got {}",
            context,
            expected.len(),
            actual.len()
        );
    }
}
