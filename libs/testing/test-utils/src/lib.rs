//! Shared test utilities for pipeline crates
//!
//! This crate provides reusable test infrastructure:
//! - `TestNats`: NATS container with JetStream and automatic cleanup (feature: "nats")
//! - `TestDataBuilder`: Deterministic mail ids, point ids and embeddings (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Usage
//!
//! ```rust
//! use test_utils::TestDataBuilder;
//!
//! let builder = TestDataBuilder::from_test_name("fetch_returns_neighbours");
//! let mail_id = builder.mail_id(1);
//! let embedding = builder.embedding(8, 1);
//! assert_eq!(embedding.len(), 8);
//! # let _ = mail_id;
//! ```
//!
//! ## NATS Testing
//!
//! Add `features = ["nats"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["nats"] }
//! ```

use uuid::Uuid;

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::TestNats;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
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
    /// This is the recommended way to create a builder for consistent test data.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Source-assigned mail identifier
    pub fn mail_id(&self, n: u32) -> String {
        format!("mail-{:x}-{n}", self.seed)
    }

    /// Conversation identifier shared by related mails
    pub fn thread_id(&self, n: u32) -> String {
        format!("thread-{:x}-{n}", self.seed)
    }

    /// Collection name unique to this test
    pub fn collection(&self, suffix: &str) -> String {
        format!("test-{}-{suffix}", self.seed)
    }

    /// Deterministic point identifier
    pub fn point_id(&self, n: u32) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..12].copy_from_slice(&n.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// Vector of `dim` components with a single 1.0 on `axis`
    pub fn unit_vector(dim: usize, axis: usize) -> Vec<f32> {
        let mut vector = vec![0.0; dim];
        vector[axis % dim] = 1.0;
        vector
    }

    /// Deterministic pseudo-random embedding, normalized to unit length
    pub fn embedding(&self, dim: usize, n: u32) -> Vec<f32> {
        let mut state = self.seed ^ ((u64::from(n) << 32) | 0x9e37_79b9);
        let raw: Vec<f32> = (0..dim)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
            })
            .collect();

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Self::unit_vector(dim, 0);
        }
        raw.into_iter().map(|x| x / norm).collect()
    }
}

/// Test assertion helpers
pub mod assertions {
    use std::collections::HashSet;
    use std::hash::Hash;

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that no element appears in both collections
    pub fn assert_disjoint<T>(left: &[T], right: &[T], context: &str)
    where
        T: Eq + Hash + std::fmt::Debug,
    {
        let left: HashSet<&T> = left.iter().collect();
        let shared: Vec<&T> = right.iter().filter(|item| left.contains(item)).collect();
        assert!(
            shared.is_empty(),
            "{}: expected disjoint sets, shared {:?}",
            context,
            shared
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.point_id(1), builder2.point_id(1));
        assert_eq!(builder1.mail_id(3), builder2.mail_id(3));
        assert_eq!(builder1.embedding(16, 2), builder2.embedding(16, 2));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different data
        assert_ne!(builder1.point_id(0), builder2.point_id(0));
        assert_ne!(builder1.collection("mails"), builder2.collection("mails"));
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let builder = TestDataBuilder::new(7);
        let embedding = builder.embedding(32, 5);
        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert_ne!(embedding, builder.embedding(32, 6));
    }

    #[test]
    fn test_unit_vector() {
        assert_eq!(TestDataBuilder::unit_vector(3, 1), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "expected disjoint sets")]
    fn test_assert_disjoint_panics_on_overlap() {
        assertions::assert_disjoint(&["a", "b"], &["b", "c"], "batches");
    }
}
