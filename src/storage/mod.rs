//! Storage layer abstractions for AgentMem.
//!
//! This module provides a trait-based abstraction over the storage engine,
//! allowing different backends to be used (e.g., redb, mock for testing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryCore                              │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                    ▲         ▲                              │
//! │                    │         │                              │
//! │         ┌─────────┴─┐   ┌───┴─────────┐                    │
//! │         │RedbStorage│   │ MockStorage │                    │
//! │         └───────────┘   └─────────────┘                    │
//! │           (prod)           (test)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{DatabaseMetadata, SCHEMA_VERSION};

use std::collections::HashMap;
use std::path::Path;

use crate::collection::Collection;
use crate::config::Config;
use crate::error::Result;
use crate::filter::Filter;
use crate::memory::{MemoryRecord, MemoryUpdate};
use crate::types::{Embedding, MemoryId, SparseEmbedding};

/// Which column to sort `list` results by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    /// Sort by `MemoryRecord::id`.
    Id,
    /// Sort by `MemoryRecord::created_at`.
    CreatedAt,
    /// Sort by `MemoryRecord::updated_at`.
    UpdatedAt,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// A record paired with a relevance/similarity score from a search op.
#[derive(Clone, Debug)]
pub struct ScoredMemory {
    /// The matching record.
    pub record: MemoryRecord,
    /// The score, in the scale native to the search kind (cosine similarity
    /// for `vector_search`, a relevance score for `fulltext_search`/
    /// `sparse_search`, a fused RRF score for `hybrid_search`).
    pub score: f32,
}

/// Per-signal weights for `hybrid_search` / fallback RRF fusion.
#[derive(Clone, Copy, Debug)]
pub struct HybridWeights {
    /// Weight for the dense-vector signal.
    pub dense: f32,
    /// Weight for the full-text signal.
    pub fulltext: f32,
    /// Weight for the sparse signal (ignored if no sparse query is given).
    pub sparse: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            dense: 1.0,
            fulltext: 1.0,
            sparse: 1.0,
        }
    }
}

/// One bucket of the age-distribution histogram returned by `get_statistics`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AgeBucket {
    /// Human-readable bucket label (e.g. `"<1h"`, `"<1d"`, `">=30d"`).
    pub label: String,
    /// Number of records whose age falls in this bucket.
    pub count: u64,
}

/// Aggregate statistics over a collection (optionally filtered).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Statistics {
    /// Total number of matching records.
    pub total_count: u64,
    /// Count per `memory_type` tag (`"(untagged)"` for records with none).
    pub by_memory_type: HashMap<String, u64>,
    /// Age-distribution histogram, buckets in ascending order.
    pub age_buckets: Vec<AgeBucket>,
}

/// What a storage backend supports, consulted by the Hybrid Query Planner
/// (§4.4) to decide between the native and fallback search paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageCapabilities {
    /// Whether the engine can fuse dense + fulltext (+ sparse) signals in a
    /// single call rather than three calls fused client-side. [`RedbStorage`]
    /// always reports `false` — it has one engine behind both `hybrid_search`
    /// and the per-signal calls, so there's no latency win from "native"
    /// fusion here; the native branch exists for backends that do.
    pub native_hybrid: bool,
    /// Whether the engine indexes sparse embeddings at all.
    pub supports_sparse: bool,
}

/// Storage engine trait for AgentMem.
///
/// This trait defines the contract that any storage backend must implement.
/// The primary implementation is [`RedbStorage`], but other implementations
/// can be created for testing or alternative backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow the database to be shared
/// across threads. The engine handles internal synchronization.
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the database metadata.
    fn metadata(&self) -> &DatabaseMetadata;

    /// Returns this backend's search capabilities.
    fn capabilities(&self) -> StorageCapabilities;

    /// Closes the storage engine, flushing any pending writes.
    ///
    /// This method consumes the storage engine. After calling `close()`,
    /// the engine cannot be used.
    fn close(self: Box<Self>) -> Result<()>;

    /// Returns the path to the database file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Collection Operations
    // =========================================================================

    /// Creates or overwrites a collection's schema.
    fn create_collection(&self, collection: &Collection) -> Result<()>;

    /// Retrieves a collection's schema by name.
    fn get_collection(&self, name: &str) -> Result<Option<Collection>>;

    /// Lists all collections in the database.
    fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Deletes a collection and all memories within it (cascade).
    ///
    /// Returns `true` if the collection existed.
    fn delete_collection(&self, name: &str) -> Result<bool>;

    // =========================================================================
    // Memory Storage Operations (§4.3)
    // =========================================================================

    /// Inserts a batch of records into a collection. Rejects the whole batch
    /// if any record's dense embedding doesn't match the collection's
    /// configured dimension. Does not deduplicate — callers check `hash`
    /// themselves (the Reconciler centralizes this; see §4.6).
    fn insert(&self, collection: &str, records: &[MemoryRecord]) -> Result<Vec<MemoryId>>;

    /// Retrieves a record by id. Returns `None` if the id doesn't exist in
    /// this collection.
    ///
    /// Carries no owner filter: callers enforce I5 afterward against the
    /// full returned `MemoryRecord` (see `MemoryCore::check_identity`), since
    /// `Private`-scope enforcement needs exact equality against the complete
    /// `Owner` tuple, which the `Filter` DSL passed to `list`/`vector_search`
    /// can only approximate.
    fn point_get(&self, collection: &str, id: MemoryId) -> Result<Option<MemoryRecord>>;

    /// Lists records matching `filter`, ordered by `sort_by`/`order`, stable,
    /// with `limit`/`offset` applied after sorting.
    #[allow(clippy::too_many_arguments)]
    fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
        sort_by: SortField,
        order: SortOrder,
    ) -> Result<Vec<MemoryRecord>>;

    /// Dense vector nearest-neighbor search, filtered, top-k by the
    /// collection's configured distance metric.
    fn vector_search(
        &self,
        collection: &str,
        query: &Embedding,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>>;

    /// Full-text search, filtered, top-k by token-overlap relevance.
    fn fulltext_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>>;

    /// Sparse-vector search, filtered, top-k. Returns an empty result
    /// (rather than erroring) if the collection doesn't support sparse —
    /// callers downgrade silently per the §4.3 failure model.
    fn sparse_search(
        &self,
        collection: &str,
        query: &SparseEmbedding,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>>;

    /// Fused multi-signal search: dense + fulltext + optional sparse,
    /// combined by weighted Reciprocal Rank Fusion (§4.4), top-k.
    #[allow(clippy::too_many_arguments)]
    fn hybrid_search(
        &self,
        collection: &str,
        dense_query: &Embedding,
        text_query: &str,
        sparse_query: Option<&SparseEmbedding>,
        filter: Option<&Filter>,
        k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<ScoredMemory>>;

    /// Applies a partial update. Recomputes `hash`/`dense_embedding`/
    /// `updated_at` iff `content` changed (invariant I3); caller supplies the
    /// recomputed embedding since the storage layer has no Embedding Client.
    fn update(
        &self,
        collection: &str,
        id: MemoryId,
        update: &MemoryUpdate,
        new_embedding: Option<Embedding>,
    ) -> Result<bool>;

    /// Permanently deletes a record and its index entries.
    fn delete(&self, collection: &str, id: MemoryId) -> Result<bool>;

    /// Deletes every record matching `filter`. Returns the count deleted.
    fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Computes aggregate statistics over a collection, optionally filtered.
    fn get_statistics(&self, collection: &str, filter: Option<&Filter>) -> Result<Statistics>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
/// For more control, use `RedbStorage::open()` directly.
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_storage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let config = Config::default();
        let storage = open_storage(&path, &config).unwrap();

        assert!(storage.path().is_some());
        assert!(!storage.capabilities().native_hybrid);

        storage.close().unwrap();
    }

    #[test]
    fn test_storage_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedbStorage>();
    }
}
