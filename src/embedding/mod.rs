//! Embedding service abstractions for AgentMem.
//!
//! This module provides the trait and implementations for embedding generation.
//! Embeddings are dense vector representations of text used for semantic search.
//!
//! # Providers
//!
//! - [`ExternalEmbedding`] — validate-only, for callers who supply their own
//!   precomputed embeddings.
//! - [`local::LocalEmbedding`] — in-process ONNX model (requires the
//!   `builtin-embeddings` feature). Currently a stub.
//! - [`http::HttpEmbedding`] — HTTP-backed provider (OpenAI-compatible and
//!   similar embedding APIs).

#[cfg(feature = "providers")]
pub mod http;
pub mod local;

#[cfg(feature = "providers")]
pub use http::HttpEmbedding;
pub use local::{LocalEmbedding, LocalSparseEmbedding};

use crate::error::{AgentMemError, Result, ValidationError};
use crate::types::{Embedding, SparseEmbedding};

/// Which mode an embedding is being generated for.
///
/// Some providers (notably ones trained with asymmetric dual encoders) embed
/// queries and documents differently; `action` lets the caller select the
/// right mode. Providers that don't distinguish modes treat all three the
/// same (the default, symmetric behavior).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingAction {
    /// Embedding a fact being added to the store.
    Add,
    /// Embedding a query for retrieval.
    Search,
    /// Embedding updated content for an existing record.
    Update,
}

/// Embedding service trait for generating vector representations of text.
///
/// This trait defines the contract for any embedding provider. Implementations
/// must be thread-safe (`Send + Sync`) to allow concurrent embedding operations.
/// Embedding is deterministic per `(provider, model, text, action)` — the
/// same input always produces the same vector, so callers may cache by
/// content hash if they wish (see spec's "optional embedding cache" note).
pub trait EmbeddingService: Send + Sync {
    /// Generates an embedding for a single text.
    ///
    /// Returns a vector of f32 values with length equal to `dimension()`.
    fn embed(&self, text: &str, action: EmbeddingAction) -> Result<Embedding>;

    /// Generates embeddings for multiple texts in a batch.
    ///
    /// Batch processing is typically more efficient than individual calls
    /// due to reduced API overhead. The default implementation calls
    /// `embed` once per text; providers with a native batch API should
    /// override this.
    fn embed_batch(&self, texts: &[&str], action: EmbeddingAction) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text, action)).collect()
    }

    /// Returns the dimension of embeddings produced by this service.
    fn dimension(&self) -> u16;

    /// Validates that an embedding has the correct dimension.
    fn validate_embedding(&self, embedding: &Embedding) -> Result<()> {
        let expected = self.dimension() as usize;
        let actual = embedding.len();

        if actual != expected {
            return Err(AgentMemError::Validation(ValidationError::dimension_mismatch(
                expected, actual,
            )));
        }

        Ok(())
    }
}

/// Optional capability: sparse (token-id → weight) embedding.
///
/// A provider implements this alongside [`EmbeddingService`] when it can
/// also produce sparse vectors (e.g. SPLADE-style models). When a
/// collection or provider doesn't support sparse, the sparse retrieval
/// path is disabled rather than erroring (§4.3 failure model).
pub trait SparseEmbeddingService: Send + Sync {
    /// Generates a sparse embedding for a single text.
    fn embed_sparse(&self, text: &str) -> Result<SparseEmbedding>;
}

/// External embedding provider.
///
/// Used when embeddings are generated entirely outside the crate (e.g. the
/// caller already ran the text through their own OpenAI/Cohere client). It
/// validates embedding dimensions but cannot generate embeddings itself —
/// calling `embed`/`embed_batch` is always an error.
#[derive(Clone, Debug)]
pub struct ExternalEmbedding {
    dimension: u16,
}

impl ExternalEmbedding {
    /// Creates a new external embedding provider with the given dimension.
    pub fn new(dimension: u16) -> Self {
        Self { dimension }
    }
}

impl EmbeddingService for ExternalEmbedding {
    fn embed(&self, _text: &str, _action: EmbeddingAction) -> Result<Embedding> {
        Err(crate::error::ProviderError::Misconfigured {
            provider: "external".to_string(),
            reason: "external embedding mode: embeddings must be provided by the caller".to_string(),
        }
        .into())
    }

    fn embed_batch(&self, _texts: &[&str], _action: EmbeddingAction) -> Result<Vec<Embedding>> {
        Err(crate::error::ProviderError::Misconfigured {
            provider: "external".to_string(),
            reason: "external embedding mode: embeddings must be provided by the caller".to_string(),
        }
        .into())
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_embedding_dimension() {
        let service = ExternalEmbedding::new(384);
        assert_eq!(service.dimension(), 384);
    }

    #[test]
    fn test_external_embedding_embed_returns_error() {
        let service = ExternalEmbedding::new(384);
        let result = service.embed("hello world", EmbeddingAction::Add);
        assert!(result.is_err());
    }

    #[test]
    fn test_external_embedding_embed_batch_returns_error() {
        let service = ExternalEmbedding::new(384);
        let result = service.embed_batch(&["hello", "world"], EmbeddingAction::Search);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_embedding_correct_dimension() {
        let service = ExternalEmbedding::new(3);
        let embedding = vec![1.0, 2.0, 3.0];
        assert!(service.validate_embedding(&embedding).is_ok());
    }

    #[test]
    fn test_validate_embedding_wrong_dimension() {
        let service = ExternalEmbedding::new(3);
        let embedding = vec![1.0, 2.0];
        let result = service.validate_embedding(&embedding);
        assert!(result.is_err());
    }

    #[test]
    fn test_external_embedding_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExternalEmbedding>();
    }

    #[test]
    fn test_embed_batch_default_impl_preserves_order() {
        struct Echo;
        impl EmbeddingService for Echo {
            fn embed(&self, text: &str, _action: EmbeddingAction) -> Result<Embedding> {
                Ok(vec![text.len() as f32])
            }
            fn dimension(&self) -> u16 {
                1
            }
        }

        let service = Echo;
        let result = service
            .embed_batch(&["a", "bb", "ccc"], EmbeddingAction::Add)
            .unwrap();
        assert_eq!(result, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }
}
