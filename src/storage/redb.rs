//! redb storage engine implementation.
//!
//! This module provides the primary storage backend for AgentMem using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//! - Zero external dependencies (pure Rust)
//!
//! # File Layout
//!
//! When you open a database at `./agentmem.db`, redb creates:
//! - `./agentmem.db` - Main database file
//! - `./agentmem.db.lock` - Lock file for writer coordination (may not be visible)

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use ::redb::{Database, ReadTransaction, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    self, DatabaseMetadata, StoredMemory, COLLECTIONS_TABLE, DENSE_EMBEDDINGS_TABLE,
    FULLTEXT_INDEX_TABLE, MEMORIES_BY_COLLECTION_TABLE, MEMORIES_TABLE, METADATA_TABLE,
    SCHEMA_VERSION, SPARSE_EMBEDDINGS_TABLE, SPARSE_INDEX_TABLE,
};
use super::{
    HybridWeights, ScoredMemory, SortField, SortOrder, Statistics, StorageCapabilities,
    StorageEngine,
};
use crate::collection::Collection;
use crate::config::{Config, DistanceMetric};
use crate::error::{AgentMemError, NotFoundError, Result, StorageError, ValidationError};
use crate::filter::Filter;
use crate::memory::{content_hash, MemoryRecord, MemoryUpdate};
use crate::types::{Embedding, MemoryId, SparseEmbedding, Timestamp};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "db_metadata";

/// redb storage engine wrapper.
///
/// This struct holds the redb database handle and cached metadata.
/// It implements [`StorageEngine`] for use with [`crate::core::MemoryCore`].
///
/// # Thread Safety
///
/// `RedbStorage` is `Send + Sync`. redb handles internal synchronization
/// using MVCC for readers and exclusive locking for writers.
#[derive(Debug)]
pub struct RedbStorage {
    /// The redb database handle.
    db: Database,

    /// Cached database metadata.
    metadata: DatabaseMetadata,

    /// Path to the database file.
    path: PathBuf,
}

impl RedbStorage {
    /// Opens or creates a database at the given path.
    ///
    /// If the database doesn't exist, it will be created and initialized.
    /// If it exists, the stored schema version is validated.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "opening storage engine");

        let db = Self::create_database(path, config)?;

        if db_exists {
            Self::open_existing(db, path.to_path_buf())
        } else {
            Self::initialize_new(db, path.to_path_buf())
        }
    }

    /// Creates the redb database with appropriate settings.
    fn create_database(path: &Path, _config: &Config) -> Result<Database> {
        let builder = Database::builder();

        // Note: redb 2.x doesn't have set_cache_size, it manages memory internally.
        // The cache_size_mb config is reserved for future tuning.
        let db = builder
            .create(path)
            .map_err(|e| StorageError::redb(e.to_string()))?;

        debug!("database file opened successfully");
        Ok(db)
    }

    /// Initializes a new database with tables and metadata.
    #[instrument(skip(db), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf) -> Result<Self> {
        info!("initializing new database");

        let metadata = DatabaseMetadata::new();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;

            let _ = write_txn.open_table(COLLECTIONS_TABLE)?;
            let _ = write_txn.open_table(MEMORIES_TABLE)?;
            let _ = write_txn.open_table(DENSE_EMBEDDINGS_TABLE)?;
            let _ = write_txn.open_table(SPARSE_EMBEDDINGS_TABLE)?;
            let _ = write_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
            let _ = write_txn.open_multimap_table(FULLTEXT_INDEX_TABLE)?;
            let _ = write_txn.open_multimap_table(SPARSE_INDEX_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(schema_version = SCHEMA_VERSION, "database initialized");

        Ok(Self { db, metadata, path })
    }

    /// Opens and validates an existing database.
    #[instrument(skip(db), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf) -> Result<Self> {
        info!("opening existing database");

        let read_txn = db.begin_read().map_err(StorageError::from)?;
        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("cannot open metadata table: {e}"))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("missing database metadata"))?;

            bincode::deserialize::<DatabaseMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("invalid metadata format: {e}")))?
        };
        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "schema version mismatch"
            );
            return Err(AgentMemError::Storage(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }));
        }

        let mut metadata = metadata;
        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = metadata.schema_version,
            "database opened successfully"
        );

        Ok(Self { db, metadata, path })
    }

    /// Returns a reference to the underlying redb database.
    #[inline]
    #[allow(dead_code)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }
}

impl StorageEngine for RedbStorage {
    fn metadata(&self) -> &DatabaseMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            native_hybrid: false,
            supports_sparse: true,
        }
    }

    #[instrument(skip(self))]
    fn close(self: Box<Self>) -> Result<()> {
        info!("closing storage engine");
        drop(self.db);
        info!("storage engine closed");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn create_collection(&self, collection: &Collection) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            let bytes = bincode::serialize(collection)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            table.insert(collection.name.as_str(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        read_collection(&read_txn, name)
    }

    fn list_collections(&self) -> Result<Vec<Collection>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(
                bincode::deserialize(value.value())
                    .map_err(|e| StorageError::serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }

    fn delete_collection(&self, name: &str) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;

        let existed = {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            table.remove(name)?.is_some()
        };

        if existed {
            let ids: Vec<MemoryId> = {
                let by_collection = write_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
                let mut ids = Vec::new();
                for entry in by_collection.get(name)? {
                    ids.push(schema::decode_id_from_collection_index_key(entry?.value()));
                }
                ids
            };
            for id in ids {
                delete_one(&write_txn, name, id)?;
            }
        }

        write_txn.commit().map_err(StorageError::from)?;
        Ok(existed)
    }

    fn insert(&self, collection: &str, records: &[MemoryRecord]) -> Result<Vec<MemoryId>> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;

        let coll: Collection = {
            let table = write_txn.open_table(COLLECTIONS_TABLE)?;
            let entry = table
                .get(collection)?
                .ok_or_else(|| NotFoundError::collection(collection))?;
            bincode::deserialize(entry.value())
                .map_err(|e| StorageError::serialization(e.to_string()))?
        };

        for record in records {
            if !record.dense_embedding.is_empty()
                && record.dense_embedding.len() != coll.dense_dimension
            {
                return Err(ValidationError::dimension_mismatch(
                    coll.dense_dimension,
                    record.dense_embedding.len(),
                )
                .into());
            }
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            write_stored_memory(&write_txn, collection, record)?;
            ids.push(record.id);
        }

        write_txn.commit().map_err(StorageError::from)?;
        Ok(ids)
    }

    fn point_get(&self, collection: &str, id: MemoryId) -> Result<Option<MemoryRecord>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        hydrate(&read_txn, &schema::encode_id_key(id), collection)
    }

    fn list(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
        sort_by: SortField,
        order: SortOrder,
    ) -> Result<Vec<MemoryRecord>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let ids = collection_ids(&read_txn, collection)?;

        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = hydrate(&read_txn, &schema::encode_id_key(id), collection)? {
                if filter.map(|f| f.matches(&record)).unwrap_or(true) {
                    records.push(record);
                }
            }
        }

        sort_records(&mut records, sort_by, order);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    fn vector_search(
        &self,
        collection: &str,
        query: &Embedding,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let coll = read_collection(&read_txn, collection)?
            .ok_or_else(|| NotFoundError::collection(collection))?;
        let ids = collection_ids(&read_txn, collection)?;

        let mut scored = Vec::new();
        for id in ids {
            if let Some(record) = hydrate(&read_txn, &schema::encode_id_key(id), collection)? {
                if record.dense_embedding.is_empty() {
                    continue;
                }
                if filter.map(|f| f.matches(&record)).unwrap_or(true) {
                    let score = similarity(coll.distance_metric, query, &record.dense_embedding);
                    scored.push(ScoredMemory { record, score });
                }
            }
        }

        sort_scored(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn fulltext_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: HashMap<MemoryId, usize> = HashMap::new();
        {
            let index = read_txn.open_multimap_table(FULLTEXT_INDEX_TABLE)?;
            for token in &query_tokens {
                let key = schema::index_term_key(collection, token);
                for entry in index.get(key.as_str())? {
                    let id = schema::decode_id_key(entry?.value());
                    *hits.entry(id).or_insert(0) += 1;
                }
            }
        }

        let query_len = query_tokens.len() as f32;
        let mut scored = Vec::new();
        for (id, overlap) in hits {
            if let Some(record) = hydrate(&read_txn, &schema::encode_id_key(id), collection)? {
                if filter.map(|f| f.matches(&record)).unwrap_or(true) {
                    scored.push(ScoredMemory {
                        record,
                        score: overlap as f32 / query_len,
                    });
                }
            }
        }

        sort_scored(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn sparse_search(
        &self,
        collection: &str,
        query: &SparseEmbedding,
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let coll = read_collection(&read_txn, collection)?
            .ok_or_else(|| NotFoundError::collection(collection))?;
        if !coll.supports_sparse || query.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: HashSet<MemoryId> = HashSet::new();
        {
            let index = read_txn.open_multimap_table(SPARSE_INDEX_TABLE)?;
            for (term, _) in &query.0 {
                let key = schema::index_term_key(collection, &term.to_string());
                for entry in index.get(key.as_str())? {
                    candidates.insert(schema::decode_id_key(entry?.value()));
                }
            }
        }

        let mut scored = Vec::new();
        for id in candidates {
            if let Some(record) = hydrate(&read_txn, &schema::encode_id_key(id), collection)? {
                let Some(doc_sparse) = &record.sparse_embedding else {
                    continue;
                };
                if filter.map(|f| f.matches(&record)).unwrap_or(true) {
                    let score = sparse_dot(&query.0, &doc_sparse.0);
                    scored.push(ScoredMemory { record, score });
                }
            }
        }

        sort_scored(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn hybrid_search(
        &self,
        collection: &str,
        dense_query: &Embedding,
        text_query: &str,
        sparse_query: Option<&SparseEmbedding>,
        filter: Option<&Filter>,
        k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<ScoredMemory>> {
        let fetch_k = k.saturating_mul(4).max(20);

        let dense_hits = if dense_query.is_empty() {
            Vec::new()
        } else {
            self.vector_search(collection, dense_query, filter, fetch_k)?
        };
        let fulltext_hits = if text_query.trim().is_empty() {
            Vec::new()
        } else {
            self.fulltext_search(collection, text_query, filter, fetch_k)?
        };
        let sparse_hits = match sparse_query {
            Some(sq) if !sq.is_empty() => self.sparse_search(collection, sq, filter, fetch_k)?,
            _ => Vec::new(),
        };

        let scored = crate::planner::reciprocal_rank_fusion(
            &[
                (dense_hits, weights.dense),
                (fulltext_hits, weights.fulltext),
                (sparse_hits, weights.sparse),
            ],
            k,
        );
        Ok(scored)
    }

    fn update(
        &self,
        collection: &str,
        id: MemoryId,
        update: &MemoryUpdate,
        new_embedding: Option<Embedding>,
    ) -> Result<bool> {
        let id_key = schema::encode_id_key(id);
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;

        let mut stored: StoredMemory = {
            let memories = write_txn.open_table(MEMORIES_TABLE)?;
            match memories.get(&id_key)? {
                Some(entry) => bincode::deserialize(entry.value())
                    .map_err(|e| StorageError::serialization(e.to_string()))?,
                None => return Ok(false),
            }
        };

        if stored.collection != collection {
            return Ok(false);
        }

        let old_tokens = tokenize(&stored.record.content);
        let content_changed = update.content.is_some();

        if let Some(content) = &update.content {
            stored.record.content = content.clone();
            stored.record.hash = content_hash(content);
            if let Some(embedding) = &new_embedding {
                stored.record.dense_embedding = embedding.clone();
            }
            stored.record.updated_at = Timestamp::now();
        }
        if let Some(metadata) = &update.metadata {
            stored.record.metadata = metadata.clone();
            stored.record.updated_at = Timestamp::now();
        }
        if let Some(category) = &update.category {
            stored.record.category = Some(category.clone());
            stored.record.updated_at = Timestamp::now();
        }
        if let Some(memory_type) = &update.memory_type {
            stored.record.memory_type = Some(memory_type.clone());
            stored.record.updated_at = Timestamp::now();
        }

        {
            let mut memories = write_txn.open_table(MEMORIES_TABLE)?;
            let bytes = bincode::serialize(&stored)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            memories.insert(&id_key, bytes.as_slice())?;
        }

        if content_changed {
            if let Some(embedding) = &new_embedding {
                let mut dense = write_txn.open_table(DENSE_EMBEDDINGS_TABLE)?;
                dense.insert(&id_key, embedding_to_bytes(embedding).as_slice())?;
            }

            let new_tokens = tokenize(&stored.record.content);
            let mut fulltext = write_txn.open_multimap_table(FULLTEXT_INDEX_TABLE)?;
            for token in &old_tokens {
                if !new_tokens.contains(token) {
                    fulltext.remove(schema::index_term_key(collection, token).as_str(), &id_key)?;
                }
            }
            for token in &new_tokens {
                if !old_tokens.contains(token) {
                    fulltext.insert(schema::index_term_key(collection, token).as_str(), &id_key)?;
                }
            }
        }

        write_txn.commit().map_err(StorageError::from)?;
        Ok(true)
    }

    fn delete(&self, collection: &str, id: MemoryId) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let deleted = delete_one(&write_txn, collection, id)?;
        write_txn.commit().map_err(StorageError::from)?;
        Ok(deleted)
    }

    fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;

        let matching_ids: Vec<MemoryId> = {
            let ids = {
                let by_collection = write_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
                let mut ids = Vec::new();
                for entry in by_collection.get(collection)? {
                    ids.push(schema::decode_id_from_collection_index_key(entry?.value()));
                }
                ids
            };

            let mut matched = Vec::new();
            for id in ids {
                let record = {
                    let memories = write_txn.open_table(MEMORIES_TABLE)?;
                    match memories.get(&schema::encode_id_key(id))? {
                        Some(entry) => {
                            let stored: StoredMemory = bincode::deserialize(entry.value())
                                .map_err(|e| StorageError::serialization(e.to_string()))?;
                            stored.record
                        }
                        None => continue,
                    }
                };
                if filter.matches(&record) {
                    matched.push(id);
                }
            }
            matched
        };

        let mut count = 0u64;
        for id in matching_ids {
            if delete_one(&write_txn, collection, id)? {
                count += 1;
            }
        }

        write_txn.commit().map_err(StorageError::from)?;
        Ok(count)
    }

    fn get_statistics(&self, collection: &str, filter: Option<&Filter>) -> Result<Statistics> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let ids = collection_ids(&read_txn, collection)?;

        let mut total = 0u64;
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut buckets = [0u64; 5];
        let now = Timestamp::now().as_millis();

        for id in ids {
            let Some(record) = hydrate(&read_txn, &schema::encode_id_key(id), collection)? else {
                continue;
            };
            if !filter.map(|f| f.matches(&record)).unwrap_or(true) {
                continue;
            }

            total += 1;
            let key = record
                .memory_type
                .as_ref()
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| "(untagged)".to_string());
            *by_type.entry(key).or_insert(0) += 1;

            let age_ms = (now - record.created_at.as_millis()).max(0);
            let idx = if age_ms < 3_600_000 {
                0
            } else if age_ms < 86_400_000 {
                1
            } else if age_ms < 7 * 86_400_000 {
                2
            } else if age_ms < 30 * 86_400_000 {
                3
            } else {
                4
            };
            buckets[idx] += 1;
        }

        let labels = ["<1h", "<1d", "<7d", "<30d", ">=30d"];
        let age_buckets = labels
            .iter()
            .zip(buckets.iter())
            .map(|(label, count)| super::AgeBucket {
                label: label.to_string(),
                count: *count,
            })
            .collect();

        Ok(Statistics {
            total_count: total,
            by_memory_type: by_type,
            age_buckets,
        })
    }
}

// Implement Send and Sync - redb::Database is Send + Sync
unsafe impl Send for RedbStorage {}
unsafe impl Sync for RedbStorage {}

// =============================================================================
// Free functions shared by the trait methods above
// =============================================================================

fn read_collection(read_txn: &ReadTransaction, name: &str) -> Result<Option<Collection>> {
    let table = read_txn.open_table(COLLECTIONS_TABLE)?;
    match table.get(name)? {
        Some(entry) => Ok(Some(
            bincode::deserialize(entry.value())
                .map_err(|e| StorageError::serialization(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

fn collection_ids(read_txn: &ReadTransaction, collection: &str) -> Result<Vec<MemoryId>> {
    let table = read_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
    let mut ids = Vec::new();
    for entry in table.get(collection)? {
        ids.push(schema::decode_id_from_collection_index_key(entry?.value()));
    }
    Ok(ids)
}

/// Reads a full record (with embeddings joined in) by id, verifying it
/// belongs to `collection`.
fn hydrate(
    read_txn: &ReadTransaction,
    id_key: &[u8; 8],
    collection: &str,
) -> Result<Option<MemoryRecord>> {
    let stored: StoredMemory = {
        let table = read_txn.open_table(MEMORIES_TABLE)?;
        match table.get(id_key)? {
            Some(entry) => bincode::deserialize(entry.value())
                .map_err(|e| StorageError::serialization(e.to_string()))?,
            None => return Ok(None),
        }
    };
    if stored.collection != collection {
        return Ok(None);
    }

    let mut record = stored.record;

    let dense_table = read_txn.open_table(DENSE_EMBEDDINGS_TABLE)?;
    if let Some(bytes) = dense_table.get(id_key)? {
        record.dense_embedding = bytes_to_embedding(bytes.value());
    }

    let sparse_table = read_txn.open_table(SPARSE_EMBEDDINGS_TABLE)?;
    if let Some(bytes) = sparse_table.get(id_key)? {
        let pairs: Vec<(u32, f32)> = bincode::deserialize(bytes.value())
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        record.sparse_embedding = Some(SparseEmbedding(pairs));
    }

    Ok(Some(record))
}

/// Writes a record and all of its index entries within an open write
/// transaction.
fn write_stored_memory(
    write_txn: &WriteTransaction,
    collection: &str,
    record: &MemoryRecord,
) -> Result<()> {
    let id_key = schema::encode_id_key(record.id);
    let stored = StoredMemory {
        collection: collection.to_string(),
        record: record.clone(),
    };

    {
        let mut table = write_txn.open_table(MEMORIES_TABLE)?;
        let bytes =
            bincode::serialize(&stored).map_err(|e| StorageError::serialization(e.to_string()))?;
        table.insert(&id_key, bytes.as_slice())?;
    }

    if !record.dense_embedding.is_empty() {
        let mut dense_table = write_txn.open_table(DENSE_EMBEDDINGS_TABLE)?;
        dense_table.insert(&id_key, embedding_to_bytes(&record.dense_embedding).as_slice())?;
    }

    if let Some(sparse) = &record.sparse_embedding {
        let mut sparse_table = write_txn.open_table(SPARSE_EMBEDDINGS_TABLE)?;
        let bytes = bincode::serialize(&sparse.0)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        sparse_table.insert(&id_key, bytes.as_slice())?;
    }

    {
        let mut by_collection = write_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
        by_collection.insert(
            collection,
            &schema::encode_collection_index_key(record.created_at, record.id),
        )?;
    }

    {
        let mut fulltext = write_txn.open_multimap_table(FULLTEXT_INDEX_TABLE)?;
        for token in tokenize(&record.content) {
            fulltext.insert(schema::index_term_key(collection, &token).as_str(), &id_key)?;
        }
    }

    if let Some(sparse) = &record.sparse_embedding {
        let mut sparse_index = write_txn.open_multimap_table(SPARSE_INDEX_TABLE)?;
        for (term, _) in &sparse.0 {
            sparse_index.insert(
                schema::index_term_key(collection, &term.to_string()).as_str(),
                &id_key,
            )?;
        }
    }

    Ok(())
}

/// Deletes a record and all of its index entries within an open write
/// transaction. Returns `false` if the id doesn't exist or belongs to a
/// different collection, leaving the transaction untouched either way.
fn delete_one(write_txn: &WriteTransaction, collection: &str, id: MemoryId) -> Result<bool> {
    let id_key = schema::encode_id_key(id);

    let stored: StoredMemory = {
        let memories = write_txn.open_table(MEMORIES_TABLE)?;
        match memories.get(&id_key)? {
            Some(entry) => bincode::deserialize(entry.value())
                .map_err(|e| StorageError::serialization(e.to_string()))?,
            None => return Ok(false),
        }
    };
    if stored.collection != collection {
        return Ok(false);
    }

    let sparse_pairs: Option<Vec<(u32, f32)>> = {
        let sparse_table = write_txn.open_table(SPARSE_EMBEDDINGS_TABLE)?;
        match sparse_table.get(&id_key)? {
            Some(entry) => Some(
                bincode::deserialize(entry.value())
                    .map_err(|e| StorageError::serialization(e.to_string()))?,
            ),
            None => None,
        }
    };

    {
        let mut memories = write_txn.open_table(MEMORIES_TABLE)?;
        memories.remove(&id_key)?;
    }
    {
        let mut dense = write_txn.open_table(DENSE_EMBEDDINGS_TABLE)?;
        dense.remove(&id_key)?;
    }
    {
        let mut sparse_table = write_txn.open_table(SPARSE_EMBEDDINGS_TABLE)?;
        sparse_table.remove(&id_key)?;
    }
    {
        let mut by_collection = write_txn.open_multimap_table(MEMORIES_BY_COLLECTION_TABLE)?;
        by_collection.remove(
            collection,
            &schema::encode_collection_index_key(stored.record.created_at, id),
        )?;
    }
    {
        let mut fulltext = write_txn.open_multimap_table(FULLTEXT_INDEX_TABLE)?;
        for token in tokenize(&stored.record.content) {
            fulltext.remove(schema::index_term_key(collection, &token).as_str(), &id_key)?;
        }
    }
    if let Some(pairs) = &sparse_pairs {
        let mut sparse_index = write_txn.open_multimap_table(SPARSE_INDEX_TABLE)?;
        for (term, _) in pairs {
            sparse_index.remove(
                schema::index_term_key(collection, &term.to_string()).as_str(),
                &id_key,
            )?;
        }
    }

    Ok(true)
}

fn sort_records(records: &mut [MemoryRecord], sort_by: SortField, order: SortOrder) {
    records.sort_by(|a, b| {
        let primary = match sort_by {
            SortField::Id => a.id.as_u64().cmp(&b.id.as_u64()),
            SortField::CreatedAt => a.created_at.as_millis().cmp(&b.created_at.as_millis()),
            SortField::UpdatedAt => a.updated_at.as_millis().cmp(&b.updated_at.as_millis()),
        };
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| b.id.as_u64().cmp(&a.id.as_u64()))
    });
}

fn sort_scored(scored: &mut [ScoredMemory]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.id.as_u64().cmp(&a.record.id.as_u64()))
    });
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn similarity(metric: DistanceMetric, query: &[f32], candidate: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(query, candidate),
        DistanceMetric::Euclidean => -euclidean_distance(query, candidate),
        DistanceMetric::DotProduct => dot(query, candidate),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Dot product of two sparse vectors, each sorted ascending by term id.
fn sparse_dot(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Category, MemoryType, NewMemory};
    use crate::types::Owner;
    use tempfile::tempdir;

    fn default_config() -> Config {
        Config::default()
    }

    fn open_with_collection(dim: usize) -> (tempfile::TempDir, RedbStorage) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let storage = RedbStorage::open(&path, &default_config()).unwrap();
        storage
            .create_collection(&Collection::new("default", dim))
            .unwrap();
        (dir, storage)
    }

    fn record(content: &str, embedding: Vec<f32>) -> MemoryRecord {
        let new = NewMemory {
            content: content.to_string(),
            owner: Owner::user("u1"),
            dense_embedding: Some(embedding),
            category: Some(Category::new("preferences")),
            memory_type: Some(MemoryType::working()),
            ..NewMemory::default()
        };
        let now = Timestamp::now();
        MemoryRecord {
            id: MemoryId::from_raw(rand_id()),
            hash: content_hash(&new.content),
            content: new.content,
            dense_embedding: new.dense_embedding.unwrap(),
            sparse_embedding: new.sparse_embedding,
            owner: new.owner,
            scope: new.scope.unwrap_or(crate::types::Scope::Private),
            category: new.category,
            memory_type: new.memory_type,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    // Deterministic-enough id generator for tests (not a real Snowflake call,
    // just needs to be unique within one test).
    fn rand_id() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn test_open_creates_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        assert!(!path.exists());
        let storage = RedbStorage::open(&path, &default_config()).unwrap();

        assert!(path.exists());
        assert_eq!(storage.metadata().schema_version, SCHEMA_VERSION);

        Box::new(storage).close().unwrap();
    }

    #[test]
    fn test_schema_version_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::create(&path).unwrap();
            let write_txn = db.begin_write().unwrap();
            {
                let mut table = write_txn.open_table(METADATA_TABLE).unwrap();
                let bad_metadata = DatabaseMetadata {
                    schema_version: SCHEMA_VERSION + 1,
                    created_at: Timestamp::now(),
                    last_opened_at: Timestamp::now(),
                };
                let bytes = bincode::serialize(&bad_metadata).unwrap();
                table.insert(METADATA_KEY, bytes.as_slice()).unwrap();
            }
            write_txn.commit().unwrap();
        }

        let result = RedbStorage::open(&path, &default_config());
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_and_point_get_roundtrip() {
        let (_dir, storage) = open_with_collection(3);
        let rec = record("likes dark mode", vec![0.1, 0.2, 0.3]);
        let id = rec.id;

        let ids = storage.insert("default", &[rec.clone()]).unwrap();
        assert_eq!(ids, vec![id]);

        let fetched = storage.point_get("default", id).unwrap().unwrap();
        assert_eq!(fetched.content, "likes dark mode");
        assert_eq!(fetched.dense_embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_insert_rejects_dimension_mismatch() {
        let (_dir, storage) = open_with_collection(3);
        let rec = record("bad dimension", vec![0.1, 0.2]);
        assert!(storage.insert("default", &[rec]).is_err());
    }

    #[test]
    fn test_point_get_scoped_to_collection() {
        let (_dir, storage) = open_with_collection(3);
        storage
            .create_collection(&Collection::new("other", 3))
            .unwrap();
        let rec = record("scoped", vec![0.1, 0.2, 0.3]);
        let id = rec.id;
        storage.insert("default", &[rec]).unwrap();

        assert!(storage.point_get("other", id).unwrap().is_none());
        assert!(storage.point_get("default", id).unwrap().is_some());
    }

    #[test]
    fn test_vector_search_orders_by_similarity() {
        let (_dir, storage) = open_with_collection(2);
        let close = record("close match", vec![1.0, 0.0]);
        let far = record("far match", vec![0.0, 1.0]);
        storage
            .insert("default", &[close.clone(), far.clone()])
            .unwrap();

        let results = storage
            .vector_search("default", &vec![1.0, 0.0], None, 10)
            .unwrap();
        assert_eq!(results[0].record.id, close.id);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_fulltext_search_matches_tokens() {
        let (_dir, storage) = open_with_collection(2);
        let rec = record("user prefers dark mode interface", vec![0.0, 0.0]);
        storage.insert("default", &[rec.clone()]).unwrap();

        let results = storage
            .fulltext_search("default", "dark mode", None, 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, rec.id);
    }

    #[test]
    fn test_update_recomputes_hash_and_reindexes_fulltext() {
        let (_dir, storage) = open_with_collection(2);
        let rec = record("original content", vec![0.0, 0.0]);
        let id = rec.id;
        let old_hash = rec.hash;
        storage.insert("default", &[rec]).unwrap();

        let update = MemoryUpdate {
            content: Some("updated content".to_string()),
            ..Default::default()
        };
        let updated = storage
            .update("default", id, &update, Some(vec![0.5, 0.5]))
            .unwrap();
        assert!(updated);

        let fetched = storage.point_get("default", id).unwrap().unwrap();
        assert_eq!(fetched.content, "updated content");
        assert_ne!(fetched.hash, old_hash);
        assert_eq!(fetched.dense_embedding, vec![0.5, 0.5]);

        assert!(storage
            .fulltext_search("default", "original", None, 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            storage
                .fulltext_search("default", "updated", None, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_delete_removes_record_and_index_entries() {
        let (_dir, storage) = open_with_collection(2);
        let rec = record("to be deleted", vec![0.0, 0.0]);
        let id = rec.id;
        storage.insert("default", &[rec]).unwrap();

        assert!(storage.delete("default", id).unwrap());
        assert!(storage.point_get("default", id).unwrap().is_none());
        assert!(storage
            .fulltext_search("default", "deleted", None, 10)
            .unwrap()
            .is_empty());
        assert!(!storage.delete("default", id).unwrap());
    }

    #[test]
    fn test_delete_by_filter_bulk_removes() {
        let (_dir, storage) = open_with_collection(2);
        let a = record("alpha", vec![0.0, 0.0]);
        let b = record("beta", vec![0.0, 0.0]);
        storage.insert("default", &[a.clone(), b.clone()]).unwrap();

        let filter = crate::filter::Filter::column_eq(
            crate::filter::ColumnField::Category,
            "preferences",
        );
        let count = storage.delete_by_filter("default", &filter).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            storage
                .list(
                    "default",
                    None,
                    10,
                    0,
                    SortField::Id,
                    SortOrder::Asc
                )
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn test_get_statistics_counts_and_buckets() {
        let (_dir, storage) = open_with_collection(2);
        let a = record("alpha", vec![0.0, 0.0]);
        let b = record("beta", vec![0.0, 0.0]);
        storage.insert("default", &[a, b]).unwrap();

        let stats = storage.get_statistics("default", None).unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.by_memory_type.get("working"), Some(&2));
        assert_eq!(
            stats.age_buckets.iter().map(|b| b.count).sum::<u64>(),
            2
        );
    }

    #[test]
    fn test_hybrid_search_fuses_dense_and_fulltext() {
        let (_dir, storage) = open_with_collection(2);
        let rec = record("dark mode preference", vec![1.0, 0.0]);
        let other = record("unrelated note", vec![0.0, 1.0]);
        storage
            .insert("default", &[rec.clone(), other.clone()])
            .unwrap();

        let results = storage
            .hybrid_search(
                "default",
                &vec![1.0, 0.0],
                "dark mode",
                None,
                None,
                10,
                HybridWeights::default(),
            )
            .unwrap();
        assert_eq!(results[0].record.id, rec.id);
    }

    #[test]
    fn test_storage_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedbStorage>();
    }
}
