//! Database schema definitions and versioning.
//!
//! This module defines the table structure for the redb storage engine.
//! All table definitions are compile-time constants to ensure consistency.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the metadata table. When opening an
//! existing database, we check the version and fail if it doesn't match.
//! Migration support will be added in a future release.
//!
//! # Table Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE        "db_metadata" -> DatabaseMetadata      │
//! │ COLLECTIONS_TABLE     name -> bincode(Collection)            │
//! │ MEMORIES_TABLE        id_be[8] -> bincode(StoredMemory)      │
//! │ DENSE_EMBEDDINGS_TABLE id_be[8] -> raw f32 LE bytes           │
//! │ SPARSE_EMBEDDINGS_TABLE id_be[8] -> bincode(Vec<(u32,f32)>)   │
//! │ MEMORIES_BY_COLLECTION_TABLE  name -> [created_be:8][id_be:8] │
//! │ FULLTEXT_INDEX_TABLE   "coll\0token" -> id_be[8]              │
//! │ SPARSE_INDEX_TABLE     "coll\0term"  -> id_be[8]              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryRecord;
use crate::types::{MemoryId, Timestamp};

/// Current schema version.
///
/// Increment this when making breaking changes to the schema.
/// The database will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for database-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Collections table.
///
/// Key: collection name. Value: bincode-serialized [`crate::collection::Collection`].
pub const COLLECTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");

/// Memories table.
///
/// Key: [`MemoryId`] as 8-byte big-endian. Value: bincode-serialized
/// [`StoredMemory`] (record plus the collection it belongs to; embeddings
/// live in their own tables).
pub const MEMORIES_TABLE: TableDefinition<&[u8; 8], &[u8]> = TableDefinition::new("memories");

/// Index: memory ids by collection, ordered by creation time.
///
/// Key: collection name. Value: `[created_at_be: 8 bytes][id_be: 8 bytes]`.
/// Big-endian timestamp ensures lexicographic order matches time order;
/// the trailing id breaks ties between same-millisecond inserts.
pub const MEMORIES_BY_COLLECTION_TABLE: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("memories_by_collection");

/// Dense embeddings table.
///
/// Key: [`MemoryId`] as 8-byte big-endian. Value: raw little-endian f32 bytes
/// (dimension * 4 bytes), stored separately to keep `MEMORIES_TABLE` compact.
pub const DENSE_EMBEDDINGS_TABLE: TableDefinition<&[u8; 8], &[u8]> =
    TableDefinition::new("dense_embeddings");

/// Sparse embeddings table.
///
/// Key: [`MemoryId`] as 8-byte big-endian. Value: bincode-serialized
/// `Vec<(u32, f32)>` term/weight pairs.
pub const SPARSE_EMBEDDINGS_TABLE: TableDefinition<&[u8; 8], &[u8]> =
    TableDefinition::new("sparse_embeddings");

/// Full-text inverted index.
///
/// Key: `"{collection}\0{token}"`. Value: matching memory id, big-endian.
pub const FULLTEXT_INDEX_TABLE: MultimapTableDefinition<&str, &[u8; 8]> =
    MultimapTableDefinition::new("fulltext_index");

/// Sparse-term inverted index.
///
/// Key: `"{collection}\0{term_id}"`. Value: matching memory id, big-endian.
pub const SPARSE_INDEX_TABLE: MultimapTableDefinition<&str, &[u8; 8]> =
    MultimapTableDefinition::new("sparse_index");

// ============================================================================
// Database Metadata
// ============================================================================

/// Database metadata stored in the metadata table.
///
/// Unlike the teacher's single-collection database, dimension compatibility
/// is checked per [`crate::collection::Collection`] rather than globally —
/// this only tracks schema version and lifecycle timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,
    /// Timestamp when the database was created.
    pub created_at: Timestamp,
    /// Last time the database was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl DatabaseMetadata {
    /// Creates new metadata for a fresh database.
    pub fn new() -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Checks if this metadata is compatible with the current schema.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

impl Default for DatabaseMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory record plus the collection it belongs to, as persisted in
/// `MEMORIES_TABLE`. `MemoryRecord` itself carries no collection field —
/// records are scoped to a collection purely by storage-layer bookkeeping,
/// matching the data model's "no foreign keys between records" rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMemory {
    /// Name of the owning collection.
    pub collection: String,
    /// The record itself (embeddings always empty/`None`; see the dedicated
    /// embedding tables).
    pub record: MemoryRecord,
}

// ============================================================================
// Key Encoding Helpers
// ============================================================================

/// Encodes a [`MemoryId`] as an 8-byte big-endian key.
#[inline]
pub fn encode_id_key(id: MemoryId) -> [u8; 8] {
    id.as_u64().to_be_bytes()
}

/// Decodes a [`MemoryId`] from an 8-byte big-endian key.
#[inline]
pub fn decode_id_key(key: &[u8; 8]) -> MemoryId {
    MemoryId::from_raw(u64::from_be_bytes(*key))
}

/// Encodes a `(created_at, id)` pair for the by-collection index.
///
/// Format: `[created_at_be: 8 bytes][id_be: 8 bytes]` = 16 bytes.
#[inline]
pub fn encode_collection_index_key(created_at: Timestamp, id: MemoryId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&created_at.to_be_bytes());
    key[8..].copy_from_slice(&encode_id_key(id));
    key
}

/// Decodes the id from a by-collection index key.
#[inline]
pub fn decode_id_from_collection_index_key(key: &[u8; 16]) -> MemoryId {
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&key[8..]);
    decode_id_key(&id_bytes)
}

/// Builds the composite key used by [`FULLTEXT_INDEX_TABLE`] and
/// [`SPARSE_INDEX_TABLE`]: `"{collection}\0{term}"`.
#[inline]
pub fn index_term_key(collection: &str, term: &str) -> String {
    format!("{collection}\0{term}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        assert_eq!(SCHEMA_VERSION, 1);
    }

    #[test]
    fn test_database_metadata_new() {
        let meta = DatabaseMetadata::new();
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert!(meta.is_compatible());
    }

    #[test]
    fn test_database_metadata_touch() {
        let mut meta = DatabaseMetadata::new();
        let original = meta.last_opened_at;
        std::thread::sleep(std::time::Duration::from_millis(1));
        meta.touch();
        assert!(meta.last_opened_at > original);
    }

    #[test]
    fn test_database_metadata_serialization() {
        let meta = DatabaseMetadata::new();
        let bytes = bincode::serialize(&meta).unwrap();
        let restored: DatabaseMetadata = bincode::deserialize(&bytes).unwrap();
        assert_eq!(meta.schema_version, restored.schema_version);
    }

    #[test]
    fn test_id_key_roundtrip() {
        let id = MemoryId::from_raw(123456789);
        let key = encode_id_key(id);
        assert_eq!(decode_id_key(&key), id);
    }

    #[test]
    fn test_collection_index_key_ordering() {
        let id = MemoryId::from_raw(1);
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(2000);
        let key1 = encode_collection_index_key(t1, id);
        let key2 = encode_collection_index_key(t2, id);
        assert!(key1 < key2);
        assert_eq!(decode_id_from_collection_index_key(&key1), id);
    }

    #[test]
    fn test_index_term_key_separates_collections() {
        let a = index_term_key("coll-a", "dark");
        let b = index_term_key("coll-b", "dark");
        assert_ne!(a, b);
    }
}
