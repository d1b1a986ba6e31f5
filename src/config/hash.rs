//! Content hashing for change detection.
//!
//! This module provides deterministic hashing of resource specs, whole
//! graphs and resolved inputs so re-applies can skip unchanged resources.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::graph::ResourceGraph;
use crate::resource::{InputValue, ResourceSpec};

/// Hasher for computing spec, graph and input hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a single resource spec.
    ///
    /// Covers kind, name, inputs (references included, unresolved), declared
    /// outputs and tags.
    #[must_use]
    pub fn hash_spec(&self, spec: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.kind().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.name().as_bytes());
        hasher.update([0u8]);

        // BTreeMap iteration is already sorted
        for (field, value) in spec.inputs() {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            update_input(&mut hasher, value);
            hasher.update([0u8]);
        }

        for (field, ty) in spec.outputs() {
            hasher.update(field.as_bytes());
            hasher.update(b":");
            hasher.update(ty.to_string().as_bytes());
            hasher.update([0u8]);
        }

        for (key, value) in spec.tags() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the whole graph: every spec and every export.
    #[must_use]
    pub fn hash_graph(&self, graph: &ResourceGraph) -> String {
        let mut hasher = Sha256::new();

        hasher.update(graph.provider().account.as_bytes());
        hasher.update(graph.provider().region.as_bytes());

        for spec in graph.specs() {
            hasher.update(self.hash_spec(spec).as_bytes());
        }

        for (name, reference) in graph.exports() {
            hasher.update(name.as_bytes());
            hasher.update(reference.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Fingerprints a set of resolved inputs.
    ///
    /// Two passes produce the same fingerprint exactly when every field
    /// resolved to the same value.
    #[must_use]
    pub fn fingerprint(&self, inputs: &BTreeMap<String, serde_json::Value>) -> String {
        let mut hasher = Sha256::new();

        for (field, value) in inputs {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn update_input(hasher: &mut Sha256, value: &InputValue) {
    match value {
        InputValue::Ref(reference) => {
            hasher.update(b"ref:");
            hasher.update(reference.to_string().as_bytes());
        }
        InputValue::List(items) => {
            hasher.update(b"[");
            for item in items {
                update_input(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        InputValue::Map(entries) => {
            hasher.update(b"{");
            for (key, item) in entries {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                update_input(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        InputValue::Literal(literal) => {
            hasher.update(literal.to_string().as_bytes());
        }
    }
}
