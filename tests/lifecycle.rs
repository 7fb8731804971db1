//! Open/close and basic CRUD lifecycle integration tests for `MemoryCore`.

use agentmem::core::{AddOptions, CoreHandles};
use agentmem::embedding::{EmbeddingAction, EmbeddingService};
use agentmem::{Config, ConversationMessage, Embedding, MemoryCore, Owner};
use tempfile::tempdir;

/// Deterministic stand-in for a real embedding provider, matching the one
/// `src/core.rs`'s own unit tests use (`registry::build_handles`'s "local"
/// provider is an unimplemented stub with no vendored inference backend).
struct TestEmbedding {
    dimension: u16,
}

impl EmbeddingService for TestEmbedding {
    fn embed(&self, text: &str, _action: EmbeddingAction) -> agentmem::Result<Embedding> {
        let mut state: u64 = 1469598103934665603;
        for byte in text.as_bytes() {
            state ^= *byte as u64;
            state = state.wrapping_mul(1099511628211);
        }
        Ok((0..self.dimension)
            .map(|i| {
                let mixed = state.wrapping_add(i as u64).wrapping_mul(2654435761);
                ((mixed % 2000) as f32 / 1000.0) - 1.0
            })
            .collect())
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }
}

fn handles_for(config: &Config) -> CoreHandles {
    let dimension = config.vector_store.dense_dimension.size() as u16;
    CoreHandles {
        embedder: Box::new(TestEmbedding { dimension }),
        sparse_embedder: None,
        llm: None,
        reranker: None,
    }
}

fn open_core(path: &std::path::Path) -> MemoryCore {
    let config = Config::default();
    let handles = handles_for(&config);
    MemoryCore::open(path, config, handles).unwrap()
}

#[test]
fn test_open_creates_database_and_close_is_clean() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lifecycle.db");

    let core = open_core(&path);
    core.close().unwrap();

    assert!(path.exists());
}

#[test]
fn test_reopen_after_close_preserves_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lifecycle.db");
    let owner = Owner::user("u1");

    let core = open_core(&path);
    let events = core
        .add(
            &[ConversationMessage::new("user", "likes dark roast coffee")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    let id = events[0].id;
    core.close().unwrap();

    let config = Config::default();
    let handles = handles_for(&config);
    let core = MemoryCore::open(&path, config, handles).unwrap();
    let record = core.get(id, &owner).unwrap();
    assert!(record.is_some());
    assert_eq!(record.unwrap().content, "likes dark roast coffee");
    core.close().unwrap();
}

#[test]
fn test_add_get_update_delete_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crud.db");
    let owner = Owner::user("u1");
    let core = open_core(&path);

    let events = core
        .add(
            &[ConversationMessage::new("user", "plays guitar on weekends")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    assert_eq!(events.len(), 1);
    let id = events[0].id;

    let fetched = core.get(id, &owner).unwrap().unwrap();
    assert_eq!(fetched.content, "plays guitar on weekends");

    let updated = core
        .update(id, &owner, Some("plays bass guitar on weekends".to_string()), None)
        .unwrap();
    assert!(updated);
    let fetched = core.get(id, &owner).unwrap().unwrap();
    assert_eq!(fetched.content, "plays bass guitar on weekends");
    assert!(fetched.updated_at >= fetched.created_at);

    let deleted = core.delete(id, &owner).unwrap();
    assert!(deleted);
    assert!(core.get(id, &owner).unwrap().is_none());

    core.close().unwrap();
}
