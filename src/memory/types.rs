//! Type definitions for memory records.
//!
//! A **memory record** is the atomic unit AgentMem stores — a fact, derived
//! from a conversation or inserted directly, carrying its own dense (and
//! optionally sparse) embedding alongside the owner/scope tuple that
//! controls who can see it.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Embedding, MemoryId, Owner, Scope, SparseEmbedding, Timestamp};

/// A short, validated category tag (e.g. `"preferences"`, `"project-x"`).
///
/// Fully free-form, per the source system this spec traces to — validated
/// for size only (see [`crate::memory::validate_new_memory`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(pub String);

impl Category {
    /// Wraps a string as a category tag.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the category as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short, validated memory-type tag.
///
/// The source system treats this as one of `working`, `short_term`,
/// `long_term`, `factual` by convention but never closes the set — modeled
/// here as an open string rather than an enum, matching the teacher's
/// preference for validated newtypes over enums for fields the upstream
/// system treats as open text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryType(pub String);

impl MemoryType {
    /// Wraps a string as a memory-type tag.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the memory type as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The conventional "working" memory type.
    pub fn working() -> Self {
        Self::new("working")
    }

    /// The conventional "short_term" memory type.
    pub fn short_term() -> Self {
        Self::new("short_term")
    }

    /// The conventional "long_term" memory type.
    pub fn long_term() -> Self {
        Self::new("long_term")
    }

    /// The conventional "factual" memory type.
    pub fn factual() -> Self {
        Self::new("factual")
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalizes content for hashing: lowercased, whitespace collapsed.
///
/// Two records whose normalized content matches share a `hash` and are a
/// deduplication target (data model invariant I1), even if their original
/// casing/spacing differs.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Computes the 128-bit content hash stored on [`MemoryRecord::hash`].
///
/// Not cryptographic — only used for exact-duplicate detection within an
/// identity scope, so a pair of 64-bit hashes over the normalized content
/// (with distinct seeds, to decorrelate them) is sufficient collision
/// resistance for that purpose.
pub fn content_hash(content: &str) -> u128 {
    let normalized = normalize_content(content);

    let mut low = DefaultHasher::new();
    0xA5A5_A5A5_A5A5_A5A5u64.hash(&mut low);
    normalized.hash(&mut low);

    let mut high = DefaultHasher::new();
    0x5A5A_5A5A_5A5A_5A5Au64.hash(&mut high);
    normalized.hash(&mut high);

    ((high.finish() as u128) << 64) | low.finish() as u128
}

/// A stored memory record — the atomic unit in AgentMem.
///
/// # Serialization Note
///
/// `dense_embedding` and `sparse_embedding` are marked `#[serde(skip)]`:
/// they're stored in dedicated storage-engine tables and the storage layer
/// reconstitutes the full struct by joining tables on read, the same split
/// the teacher uses for experience embeddings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier (Snowflake, time-ordered within a process). Never reused.
    pub id: MemoryId,

    /// The memory content (text). Mutating it recomputes `hash`,
    /// `dense_embedding`, and `updated_at` atomically (invariant I3).
    pub content: String,

    /// 128-bit digest of the normalized content. Primary deduplication key
    /// within an identity scope (invariant I1).
    pub hash: u128,

    /// Dense embedding vector; length equals the owning collection's
    /// configured dimension (invariant I2).
    #[serde(skip)]
    pub dense_embedding: Embedding,

    /// Sparse embedding, present iff the collection and backend both
    /// support sparse retrieval.
    #[serde(skip)]
    pub sparse_embedding: Option<SparseEmbedding>,

    /// The `(user_id?, agent_id?, run_id?, actor_id?)` identity tuple this
    /// record belongs to.
    pub owner: Owner,

    /// Visibility level. Controls which identity filters see this record
    /// (invariant I5).
    pub scope: Scope,

    /// Optional free-form category tag.
    pub category: Option<Category>,

    /// Optional memory-type tag.
    pub memory_type: Option<MemoryType>,

    /// Arbitrary JSON metadata. Queryable via JSON-path filters, never via
    /// the native hybrid fast path (§4.4 native-path eligibility rule 4).
    pub metadata: Value,

    /// When this record was created. Never changes after insert (invariant I4).
    pub created_at: Timestamp,

    /// When this record was last mutated. Always `>= created_at`.
    pub updated_at: Timestamp,
}

/// Input for creating a new memory record directly (bypassing extraction/
/// reconciliation, i.e. `add(..., infer=false)`), or as the shape the
/// Reconciler's ADD event constructs internally.
#[derive(Clone, Debug)]
pub struct NewMemory {
    /// The memory content.
    pub content: String,
    /// The identity tuple this record belongs to.
    pub owner: Owner,
    /// Visibility level. Defaults to [`Owner::default_scope`] if `None`.
    pub scope: Option<Scope>,
    /// Optional free-form category tag.
    pub category: Option<Category>,
    /// Optional memory-type tag.
    pub memory_type: Option<MemoryType>,
    /// Arbitrary JSON metadata.
    pub metadata: Value,
    /// Pre-computed dense embedding. If `None`, the Memory Core embeds
    /// `content` via the configured Embedding Client.
    pub dense_embedding: Option<Embedding>,
    /// Pre-computed sparse embedding, if the collection supports sparse.
    pub sparse_embedding: Option<SparseEmbedding>,
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            content: String::new(),
            owner: Owner::default(),
            scope: None,
            category: None,
            memory_type: None,
            metadata: Value::Object(Default::default()),
            dense_embedding: None,
            sparse_embedding: None,
        }
    }
}

/// Partial update to a memory record's mutable fields.
///
/// Only fields set to `Some(...)` are applied. Setting `content` triggers
/// the invariant-I3 recompute of `hash`, `dense_embedding`, and `updated_at`;
/// `owner`/`scope`/`created_at`/`id` are immutable after creation.
#[derive(Clone, Debug, Default)]
pub struct MemoryUpdate {
    /// Replacement content, if changing.
    pub content: Option<String>,
    /// Replacement metadata, if changing (replaces the whole JSON value).
    pub metadata: Option<Value>,
    /// Replacement category tag, if changing.
    pub category: Option<Category>,
    /// Replacement memory-type tag, if changing.
    pub memory_type: Option<MemoryType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_ignores_case_and_whitespace() {
        let a = content_hash("The Cat Sat   on the Mat");
        let b = content_hash("the cat sat on the mat");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_for_different_content() {
        assert_ne!(content_hash("fact one"), content_hash("fact two"));
    }

    #[test]
    fn new_memory_default_has_empty_object_metadata() {
        let new_memory = NewMemory::default();
        assert!(new_memory.metadata.is_object());
        assert!(new_memory.owner.is_empty());
    }

    #[test]
    fn memory_update_default_is_all_none() {
        let update = MemoryUpdate::default();
        assert!(update.content.is_none());
        assert!(update.metadata.is_none());
        assert!(update.category.is_none());
        assert!(update.memory_type.is_none());
    }

    #[test]
    fn memory_type_conventional_constructors() {
        assert_eq!(MemoryType::working().as_str(), "working");
        assert_eq!(MemoryType::long_term().as_str(), "long_term");
    }
}
