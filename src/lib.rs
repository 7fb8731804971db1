//! # agentmem
//!
//! Long-term memory store for conversational agents: hybrid (dense + sparse)
//! retrieval over an embedded storage engine, with an LLM-driven fact
//! extraction and reconciliation pipeline sitting in front of it.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use agentmem::{Config, MemoryCore, ConversationMessage, Owner};
//! use agentmem::registry;
//!
//! let config = Config::default();
//! let handles = registry::build_handles(&config)?;
//! let core = MemoryCore::open("./agentmem.db", config, handles)?;
//!
//! let owner = Owner::user("alice");
//! core.add(
//!     &[ConversationMessage::new("user", "I prefer tea over coffee")],
//!     &owner,
//!     false,
//!     Default::default(),
//! )?;
//!
//! let results = core.search("what does alice drink", &owner, Default::default())?;
//! core.close()?;
//! # Ok::<(), agentmem::AgentMemError>(())
//! ```
//!
//! ## Key concepts
//!
//! ### Memory
//!
//! A **memory** is a single fact about an identity (`user_id`/`agent_id`/
//! `run_id`/`actor_id`), stored with a dense embedding (and optionally a
//! sparse one) for retrieval, plus free-form metadata.
//!
//! ### Fact Extractor and Reconciler
//!
//! When `add` is called with `infer=true`, raw conversation turns are first
//! reduced to atomic facts by the Fact Extractor (an LLM call), then the
//! Reconciler diffs those facts against existing neighbors and decides to
//! add, update, delete, or no-op each one.
//!
//! ### Hybrid Query Planner
//!
//! `search` blends dense similarity, full-text, and (if configured) sparse
//! retrieval. The planner picks a storage-native fast path when available
//! and falls back to client-side reciprocal rank fusion otherwise.
//!
//! ## Features
//!
//! - `builtin-embeddings` — in-process ONNX embedding generation.
//! - `providers` — HTTP-backed LLM/embedding/reranker clients.
//! - `http` — the `/memories`, `/system` HTTP transport ([`http`] module).
//! - `cli` — the `agentmem` binary ([`cli`] module).
//!
//! ## Thread safety
//!
//! [`MemoryCore`] is `Send + Sync` and can be shared across threads using
//! `Arc`. The underlying storage engine uses MVCC for concurrent reads with
//! exclusive write locking.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod error;
mod types;

pub mod collection;
pub mod embedding;
pub mod filter;
pub mod llm;
pub mod memory;
pub mod rerank;
pub mod storage;

mod extractor;
mod planner;
mod reconciler;
mod snowflake;

pub mod core;
pub mod registry;

/// HTTP transport surface (`/memories`, `/system`) over [`core::MemoryCore`].
#[cfg(feature = "http")]
pub mod http;

/// `agentmem` CLI command definitions and handlers.
#[cfg(feature = "cli")]
pub mod cli;

/// Vector index module for HNSW-based approximate nearest neighbor search.
pub mod vector;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main orchestrator
pub use core::{AddEvent, AddOptions, CoreHandles, MemoryCore, SearchOptions};

// Configuration
pub use config::{Config, EmbeddingDimension, HnswConfig, SyncMode};

// Error handling
pub use error::{
    AgentMemError, ConfigError, NotFoundError, Result, StorageError, ValidationError,
};

// Core types
pub use types::{
    AgentId, Embedding, MemoryId, Owner, RunId, Scope, SparseEmbedding, Timestamp, UserId,
};

// Domain types
pub use collection::Collection;
pub use memory::{Category, MemoryRecord, MemoryType, MemoryUpdate, NewMemory};

// Search
pub use extractor::ConversationMessage;
pub use filter::{Filter, FilterOp};

// Storage (for advanced users)
pub use storage::{Statistics, StorageEngine};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common `agentmem` usage.
///
/// ```rust
/// use agentmem::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::core::{AddOptions, CoreHandles, MemoryCore, SearchOptions};
    pub use crate::error::{AgentMemError, Result};
    pub use crate::extractor::ConversationMessage;
    pub use crate::memory::{MemoryRecord, MemoryUpdate, NewMemory};
    pub use crate::types::{Owner, Scope, Timestamp};
}
