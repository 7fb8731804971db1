//! Memory record domain: the atomic unit AgentMem stores.
//!
//! # Operations
//!
//! Memory record mutation is exposed on [`MemoryCore`](crate::core::MemoryCore):
//!
//! - [`add`](crate::core::MemoryCore::add)
//! - [`get`](crate::core::MemoryCore::get)
//! - [`get_all`](crate::core::MemoryCore::get_all)
//! - [`update`](crate::core::MemoryCore::update)
//! - [`delete`](crate::core::MemoryCore::delete) / [`delete_all`](crate::core::MemoryCore::delete_all)

pub mod types;

pub use types::{content_hash, normalize_content, Category, MemoryRecord, MemoryType, NewMemory, MemoryUpdate};

use crate::error::{Result, ValidationError};

/// Maximum content size in bytes (100 KB).
pub const MAX_CONTENT_SIZE: usize = 100 * 1024;

/// Maximum length of a category or memory-type tag, in bytes.
pub const MAX_TAG_LENGTH: usize = 64;

/// Maximum serialized size of the `metadata` JSON value, in bytes.
pub const MAX_METADATA_SIZE: usize = 64 * 1024;

/// Validates a [`NewMemory`] before storage.
///
/// # Rules
///
/// - `content`: non-empty, max 100 KB
/// - `owner`: non-empty unless `scope` is (or defaults to) `Public`
/// - `category` / `memory_type`: max 64 bytes each
/// - `metadata`: max 64 KB serialized
/// - `dense_embedding`, if supplied: dimension must match the collection
pub(crate) fn validate_new_memory(new: &NewMemory, collection_dimension: usize) -> Result<()> {
    if new.content.is_empty() {
        return Err(ValidationError::required_field("content").into());
    }
    if new.content.len() > MAX_CONTENT_SIZE {
        return Err(ValidationError::content_too_large(new.content.len(), MAX_CONTENT_SIZE).into());
    }

    let scope = new.scope.unwrap_or_else(|| new.owner.default_scope());
    if new.owner.is_empty() && !matches!(scope, crate::types::Scope::Public) {
        return Err(ValidationError::required_field(
            "owner (at least one of user_id/agent_id/run_id/actor_id, unless scope is Public)",
        )
        .into());
    }

    if let Some(category) = &new.category {
        if category.as_str().len() > MAX_TAG_LENGTH {
            return Err(ValidationError::invalid_field(
                "category",
                format!("exceeds max length of {MAX_TAG_LENGTH} bytes"),
            )
            .into());
        }
    }
    if let Some(memory_type) = &new.memory_type {
        if memory_type.as_str().len() > MAX_TAG_LENGTH {
            return Err(ValidationError::invalid_field(
                "memory_type",
                format!("exceeds max length of {MAX_TAG_LENGTH} bytes"),
            )
            .into());
        }
    }

    let metadata_size = serde_json::to_vec(&new.metadata).map(|b| b.len()).unwrap_or(0);
    if metadata_size > MAX_METADATA_SIZE {
        return Err(ValidationError::content_too_large(metadata_size, MAX_METADATA_SIZE).into());
    }

    if let Some(embedding) = &new.dense_embedding {
        if embedding.len() != collection_dimension {
            return Err(ValidationError::dimension_mismatch(collection_dimension, embedding.len()).into());
        }
    }

    Ok(())
}

/// Validates a [`MemoryUpdate`] before applying.
///
/// Only validates fields that are `Some(...)`.
pub(crate) fn validate_memory_update(update: &MemoryUpdate) -> Result<()> {
    if let Some(content) = &update.content {
        if content.is_empty() {
            return Err(ValidationError::required_field("content").into());
        }
        if content.len() > MAX_CONTENT_SIZE {
            return Err(ValidationError::content_too_large(content.len(), MAX_CONTENT_SIZE).into());
        }
    }

    if let Some(category) = &update.category {
        if category.as_str().len() > MAX_TAG_LENGTH {
            return Err(ValidationError::invalid_field(
                "category",
                format!("exceeds max length of {MAX_TAG_LENGTH} bytes"),
            )
            .into());
        }
    }
    if let Some(memory_type) = &update.memory_type {
        if memory_type.as_str().len() > MAX_TAG_LENGTH {
            return Err(ValidationError::invalid_field(
                "memory_type",
                format!("exceeds max length of {MAX_TAG_LENGTH} bytes"),
            )
            .into());
        }
    }

    if let Some(metadata) = &update.metadata {
        let metadata_size = serde_json::to_vec(metadata).map(|b| b.len()).unwrap_or(0);
        if metadata_size > MAX_METADATA_SIZE {
            return Err(ValidationError::content_too_large(metadata_size, MAX_METADATA_SIZE).into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Owner;

    fn valid_new_memory() -> NewMemory {
        NewMemory {
            content: "User prefers dark mode".into(),
            owner: Owner::user("user-1"),
            dense_embedding: Some(vec![0.1; 384]),
            ..NewMemory::default()
        }
    }

    #[test]
    fn valid_memory_passes() {
        assert!(validate_new_memory(&valid_new_memory(), 384).is_ok());
    }

    #[test]
    fn empty_content_rejected() {
        let mut new_memory = valid_new_memory();
        new_memory.content = String::new();
        assert!(validate_new_memory(&new_memory, 384).is_err());
    }

    #[test]
    fn content_too_large_rejected() {
        let mut new_memory = valid_new_memory();
        new_memory.content = "x".repeat(MAX_CONTENT_SIZE + 1);
        assert!(validate_new_memory(&new_memory, 384).is_err());
    }

    #[test]
    fn empty_owner_rejected_unless_public_scope() {
        let mut new_memory = valid_new_memory();
        new_memory.owner = Owner::default();
        assert!(validate_new_memory(&new_memory, 384).is_err());

        new_memory.scope = Some(crate::types::Scope::Public);
        assert!(validate_new_memory(&new_memory, 384).is_ok());
    }

    #[test]
    fn category_too_long_rejected() {
        let mut new_memory = valid_new_memory();
        new_memory.category = Some(Category::new("x".repeat(MAX_TAG_LENGTH + 1)));
        assert!(validate_new_memory(&new_memory, 384).is_err());
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut new_memory = valid_new_memory();
        new_memory.dense_embedding = Some(vec![0.1; 768]);
        assert!(validate_new_memory(&new_memory, 384).is_err());
    }

    #[test]
    fn embedding_optional_when_core_will_compute_it() {
        let mut new_memory = valid_new_memory();
        new_memory.dense_embedding = None;
        assert!(validate_new_memory(&new_memory, 384).is_ok());
    }

    #[test]
    fn empty_update_passes() {
        assert!(validate_memory_update(&MemoryUpdate::default()).is_ok());
    }

    #[test]
    fn update_empty_content_rejected() {
        let update = MemoryUpdate {
            content: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_memory_update(&update).is_err());
    }

    #[test]
    fn update_memory_type_too_long_rejected() {
        let update = MemoryUpdate {
            memory_type: Some(MemoryType::new("x".repeat(MAX_TAG_LENGTH + 1))),
            ..Default::default()
        };
        assert!(validate_memory_update(&update).is_err());
    }
}
