//! Type definitions for collections.
//!
//! A **collection** is the physical table memory records live in — the
//! generalization of the teacher's per-project collective, now carrying the
//! schema properties the hybrid retrieval engine needs (distance metric,
//! fulltext parser, sparse/hybrid capability flags).

use serde::{Deserialize, Serialize};

use crate::config::{DistanceMetric, HnswConfig};
use crate::types::Timestamp;

/// Which tokenizer the full-text index uses to parse `content`.
///
/// Only `Simple` is implemented: lowercase, whitespace/punctuation split,
/// no stemming. Named as an enum (rather than hardcoded) so a smarter parser
/// can be added later without changing the [`Collection`] schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulltextParser {
    /// Lowercase, split on non-alphanumeric runs.
    #[default]
    Simple,
}

/// A collection — the physical table memory records belong to.
///
/// Records belong to exactly one collection and are identified within it
/// solely by `id` (data model: "No foreign keys between records").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Collection {
    /// Human-readable, unique name (e.g. `"default"`, `"project-x"`).
    pub name: String,

    /// Dense embedding dimension. Locked at creation; all records in this
    /// collection must have embeddings of exactly this length (invariant I2).
    pub dense_dimension: usize,

    /// Distance metric used for dense vector search.
    pub distance_metric: DistanceMetric,

    /// Full-text tokenizer for `content`.
    pub fulltext_parser: FulltextParser,

    /// Whether sparse embeddings are accepted and indexed for this collection.
    pub supports_sparse: bool,

    /// Whether hybrid (fused) search is offered for this collection. The
    /// actual native-vs-fallback choice is still made per-query by the
    /// planner (§4.4) based on backend capabilities.
    pub supports_hybrid: bool,

    /// Vector index tuning parameters.
    pub index_params: HnswConfig,

    /// When this collection was created.
    pub created_at: Timestamp,

    /// When this collection's schema was last modified.
    pub updated_at: Timestamp,
}

impl Collection {
    /// Creates a new collection with the given name and dense dimension.
    ///
    /// Sparse and hybrid support default to off; enable with
    /// [`with_sparse`](Self::with_sparse) / [`with_hybrid`](Self::with_hybrid).
    pub fn new(name: impl Into<String>, dense_dimension: usize) -> Self {
        let now = Timestamp::now();
        Self {
            name: name.into(),
            dense_dimension,
            distance_metric: DistanceMetric::default(),
            fulltext_parser: FulltextParser::default(),
            supports_sparse: false,
            supports_hybrid: false,
            index_params: HnswConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Enables sparse embedding support on this collection.
    pub fn with_sparse(mut self) -> Self {
        self.supports_sparse = true;
        self
    }

    /// Enables hybrid search on this collection. Implies sparse support so
    /// sparse signals can participate in fusion if a sparse embedding is
    /// supplied.
    pub fn with_hybrid(mut self) -> Self {
        self.supports_hybrid = true;
        self.supports_sparse = true;
        self
    }

    /// Sets a non-default distance metric.
    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_collection_defaults() {
        let collection = Collection::new("default", 384);
        assert_eq!(collection.dense_dimension, 384);
        assert!(!collection.supports_sparse);
        assert!(!collection.supports_hybrid);
        assert!(collection.created_at == collection.updated_at);
    }

    #[test]
    fn with_hybrid_implies_sparse() {
        let collection = Collection::new("default", 384).with_hybrid();
        assert!(collection.supports_hybrid);
        assert!(collection.supports_sparse);
    }

    #[test]
    fn bincode_roundtrip() {
        let collection = Collection::new("roundtrip", 768).with_sparse();
        let bytes = bincode::serialize(&collection).unwrap();
        let restored: Collection = bincode::deserialize(&bytes).unwrap();
        assert_eq!(collection.name, restored.name);
        assert_eq!(collection.dense_dimension, restored.dense_dimension);
        assert_eq!(collection.supports_sparse, restored.supports_sparse);
    }
}
