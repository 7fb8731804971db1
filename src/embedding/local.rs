//! In-process embedding generation via a local ONNX model.
//!
//! Requires the `builtin-embeddings` feature to load and run a model.
//! Without it (or before a model is wired up) this provider always reports
//! the configured dimension and fails on `embed`/`embed_batch`, so callers
//! can still validate dimensions and construct collections against it.
//!
//! # Supported Models
//!
//! - **all-MiniLM-L6-v2** (384 dimensions) — default
//! - **bge-base-en-v1.5** (768 dimensions)
//!
//! # Implementation Status
//!
//! Loading and inference are not yet wired up — `ort`/`tokenizers` are
//! pulled in by the `builtin-embeddings` feature but this provider doesn't
//! call them yet.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::embedding::{EmbeddingAction, EmbeddingService, SparseEmbeddingService};
use crate::error::{ProviderError, Result};
use crate::types::{Embedding, SparseEmbedding};

/// Local (in-process) embedding provider.
///
/// # Thread Safety
///
/// `LocalEmbedding` is `Send + Sync`; a real ONNX Runtime session handles
/// its own internal synchronization for concurrent inference.
pub struct LocalEmbedding {
    /// Path to the ONNX model file.
    #[allow(dead_code)]
    model_path: Option<PathBuf>,

    /// Embedding dimension produced by this model.
    dimension: u16,
}

impl LocalEmbedding {
    /// Creates a new local embedding provider.
    ///
    /// # Arguments
    ///
    /// * `model_path` - Optional path to a custom ONNX model. If `None`,
    ///   the bundled all-MiniLM-L6-v2 model (384 dimensions) is assumed.
    pub fn new(model_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            model_path,
            dimension: 384,
        })
    }

    /// Creates a local embedding provider with a specific dimension.
    ///
    /// Useful for testing or when the caller knows the model's output
    /// dimension ahead of loading it.
    pub fn with_dimension(dimension: u16) -> Self {
        Self {
            model_path: None,
            dimension,
        }
    }
}

impl EmbeddingService for LocalEmbedding {
    fn embed(&self, _text: &str, _action: EmbeddingAction) -> Result<Embedding> {
        // TODO: tokenize, run ONNX inference, mean-pool, normalize.
        Err(ProviderError::Misconfigured {
            provider: "local".to_string(),
            reason: "local embedding inference is not yet implemented".to_string(),
        }
        .into())
    }

    fn embed_batch(&self, _texts: &[&str], _action: EmbeddingAction) -> Result<Vec<Embedding>> {
        Err(ProviderError::Misconfigured {
            provider: "local".to_string(),
            reason: "local embedding inference is not yet implemented".to_string(),
        }
        .into())
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }
}

/// Size of the hashed feature space a [`LocalSparseEmbedding`] projects
/// tokens into.
const SPARSE_BUCKETS: u32 = 1 << 18;

/// Local (in-process) sparse embedding provider.
///
/// No external model or index is required: each token is hashed into one
/// of [`SPARSE_BUCKETS`] buckets (the standard hashing-trick approach to
/// sparse bag-of-words vectors), weighted by term frequency. Deterministic
/// and dependency-free, unlike [`LocalEmbedding`]'s dense path which waits
/// on real ONNX inference.
pub struct LocalSparseEmbedding;

impl LocalSparseEmbedding {
    /// Creates a local sparse embedding provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalSparseEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseEmbeddingService for LocalSparseEmbedding {
    fn embed_sparse(&self, text: &str) -> Result<SparseEmbedding> {
        let mut counts: std::collections::HashMap<u32, f32> = std::collections::HashMap::new();
        for token in text.split_whitespace() {
            let normalized = token.to_lowercase();
            let mut hasher = DefaultHasher::new();
            normalized.hash(&mut hasher);
            let bucket = (hasher.finish() % SPARSE_BUCKETS as u64) as u32;
            *counts.entry(bucket).or_insert(0.0) += 1.0;
        }
        let mut entries: Vec<(u32, f32)> = counts.into_iter().collect();
        entries.sort_by_key(|(bucket, _)| *bucket);
        Ok(SparseEmbedding(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_embedding_new() {
        let service = LocalEmbedding::new(None).unwrap();
        assert_eq!(service.dimension(), 384);
    }

    #[test]
    fn test_local_embedding_with_dimension() {
        let service = LocalEmbedding::with_dimension(768);
        assert_eq!(service.dimension(), 768);
    }

    #[test]
    fn test_local_embedding_embed_not_implemented() {
        let service = LocalEmbedding::new(None).unwrap();
        let result = service.embed("hello", EmbeddingAction::Add);
        assert!(result.is_err());
    }

    #[test]
    fn test_local_embedding_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LocalEmbedding>();
    }
}
