//! Integration tests for the orchestrator's documented invariants: identity
//! isolation, round-trip fidelity, idempotent delete, stable sort, and the
//! dimension contract. Also covers the inferred-add path (Fact Extractor +
//! Reconciler) against a scripted fake LLM client.

use std::sync::Mutex;

use agentmem::core::{AddOptions, CoreHandles, SearchOptions};
use agentmem::embedding::{EmbeddingAction, EmbeddingService};
use agentmem::llm::{LlmClient, Message, Provider};
use agentmem::storage::{SortField, SortOrder};
use agentmem::{Config, ConfigError, ConversationMessage, Embedding, MemoryCore, Owner};
use tempfile::tempdir;

/// Deterministic stand-in for a real embedding provider — every call to
/// `embed` hashes `text` into a fixed-length vector of the collection's
/// configured dimension. The `local`/`external` providers wired by
/// `registry::build_handles` are intentionally unimplemented stubs (no
/// inference backend is vendored), so integration tests that exercise
/// `MemoryCore::add`/`search` supply this instead, the same way
/// `src/core.rs`'s own unit tests use a `FixedEmbedding` test double.
struct TestEmbedding {
    dimension: u16,
}

impl TestEmbedding {
    fn new(dimension: u16) -> Self {
        Self { dimension }
    }
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

fn test_handles(config: &Config, llm: Option<Box<dyn LlmClient>>) -> CoreHandles {
    let dimension = config.vector_store.dense_dimension.size() as u16;
    CoreHandles {
        embedder: Box::new(TestEmbedding::new(dimension)),
        sparse_embedder: None,
        llm,
        reranker: None,
    }
}

fn open_core(config: Config) -> (MemoryCore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let handles = test_handles(&config, None);
    let core = MemoryCore::open(&path, config, handles).unwrap();
    (core, dir)
}

/// A scripted LLM client: returns the next queued response regardless of
/// the prompt, so tests can drive the Fact Extractor and Reconciler without
/// a real provider. Queued by call order (extraction call, then reconcile
/// call, per `add(infer=true)` invocation).
struct ScriptedLlm {
    responses: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, _messages: &[Message], _expected_schema: Option<&str>) -> agentmem::Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(agentmem::AgentMemError::Config(ConfigError::invalid(
                "scripted LLM ran out of queued responses",
            )));
        }
        Ok(responses.remove(0))
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn core_with_llm(responses: Vec<&str>) -> (MemoryCore, tempfile::TempDir) {
    let config = Config::default();
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let llm: Box<dyn LlmClient> = Box::new(ScriptedLlm::new(
        responses.into_iter().map(str::to_string).collect(),
    ));
    let handles = test_handles(&config, Some(llm));
    let core = MemoryCore::open(&path, config, handles).unwrap();
    (core, dir)
}

// ---------------------------------------------------------------------
// P1: add(infer=false) hash dedup
// ---------------------------------------------------------------------

#[test]
fn p1_duplicate_content_add_is_a_no_op() {
    let (core, _dir) = open_core(Config::default());
    let owner = Owner::user("u1");

    let first = core
        .add(
            &[ConversationMessage::new("user", "has a cat named Whiskers")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    assert_eq!(first[0].event, "ADD");

    let second = core
        .add(
            &[ConversationMessage::new("user", "has a cat named Whiskers")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    assert!(matches!(second[0].event.as_str(), "NONE" | "UPDATE"));
    assert_eq!(second[0].id, first[0].id);
}

// ---------------------------------------------------------------------
// P2: identity isolation
// ---------------------------------------------------------------------

#[test]
fn p2_search_never_crosses_identity_boundaries() {
    let (core, _dir) = open_core(Config::default());
    let owner_a = Owner::user("alice");
    let owner_b = Owner::user("bob");

    core.add(
        &[ConversationMessage::new("user", "prefers cold brew coffee")],
        &owner_a,
        false,
        AddOptions::default(),
    )
    .unwrap();
    core.add(
        &[ConversationMessage::new("user", "prefers green tea")],
        &owner_b,
        false,
        AddOptions::default(),
    )
    .unwrap();

    let results = core
        .search("beverage preference", &owner_a, SearchOptions::default())
        .unwrap();
    assert!(results.iter().all(|r| r.owner.user_id.as_ref().map(|u| u.as_str()) == Some("alice")));

    let results = core
        .search("beverage preference", &owner_b, SearchOptions::default())
        .unwrap();
    assert!(results.iter().all(|r| r.owner.user_id.as_ref().map(|u| u.as_str()) == Some("bob")));
}

// ---------------------------------------------------------------------
// P3: round trip
// ---------------------------------------------------------------------

#[test]
fn p3_add_then_get_round_trips_content_and_owner() {
    let (core, _dir) = open_core(Config::default());
    let owner = Owner::user("u1");

    let events = core
        .add(
            &[ConversationMessage::new("user", "works the night shift")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    let id = events[0].id;

    let record = core.get(id, &owner).unwrap().unwrap();
    assert_eq!(record.content, "works the night shift");
    assert_eq!(record.owner.user_id.as_ref().map(|u| u.as_str()), Some("u1"));
}

// ---------------------------------------------------------------------
// P4: idempotent delete
// ---------------------------------------------------------------------

#[test]
fn p4_second_delete_is_a_no_op() {
    let (core, _dir) = open_core(Config::default());
    let owner = Owner::user("u1");

    let events = core
        .add(
            &[ConversationMessage::new("user", "is allergic to peanuts")],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    let id = events[0].id;

    assert!(core.delete(id, &owner).unwrap());
    assert!(!core.delete(id, &owner).unwrap());
    assert!(core.get(id, &owner).unwrap().is_none());
}

// ---------------------------------------------------------------------
// P5 / S6: sort stability
// ---------------------------------------------------------------------

#[test]
fn p5_get_all_sorts_by_created_at_desc_with_id_tiebreak() {
    let (core, _dir) = open_core(Config::default());
    let owner = Owner::user("u1");

    for i in 0..20 {
        core.add(
            &[ConversationMessage::new("user", format!("fact number {i}"))],
            &owner,
            false,
            AddOptions::default(),
        )
        .unwrap();
    }

    let page = core
        .get_all(&owner, None, 10, 5, SortField::CreatedAt, SortOrder::Desc)
        .unwrap();

    assert_eq!(page.len(), 10);
    for window in page.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        assert!(a.created_at >= b.created_at);
        if a.created_at == b.created_at {
            assert!(a.id.as_u64() >= b.id.as_u64());
        }
    }
}

// ---------------------------------------------------------------------
// P6: dimension contract
// ---------------------------------------------------------------------

#[test]
fn p6_insert_with_wrong_dimension_vector_fails_before_any_write() {
    use agentmem::collection::Collection;
    use agentmem::memory::{Category, MemoryRecord};
    use agentmem::{MemoryId, Scope, Timestamp};

    let dir = tempdir().unwrap();
    let path = dir.path().join("dim.db");
    let config = Config::default();
    let storage = agentmem::storage::open_storage(&path, &config).unwrap();

    storage.create_collection(&Collection::new("default", 384)).unwrap();

    let record = MemoryRecord {
        id: MemoryId::from_raw(1),
        content: "wrong length vector".to_string(),
        hash: agentmem::memory::content_hash("wrong length vector"),
        dense_embedding: vec![0.0; 3],
        sparse_embedding: None,
        owner: Owner::user("u1"),
        scope: Scope::Private,
        category: None::<Category>,
        memory_type: None,
        metadata: serde_json::Value::Null,
        created_at: Timestamp::now(),
        updated_at: Timestamp::now(),
    };

    let err = storage.insert("default", &[record]).unwrap_err();
    assert!(matches!(err, agentmem::AgentMemError::Validation(_)));

    let all = storage
        .list(
            "default",
            None,
            10,
            0,
            agentmem::storage::SortField::Id,
            agentmem::storage::SortOrder::Asc,
        )
        .unwrap();
    assert!(all.is_empty());

    storage.close().unwrap();
}

// ---------------------------------------------------------------------
// S1 / S2: inferred add, scripted against a fake LLM.
// ---------------------------------------------------------------------

#[test]
fn s1_inferred_add_on_empty_store_produces_a_searchable_record() {
    let (core, _dir) = core_with_llm(vec![
        r#"{"facts": ["likes espresso"]}"#,
        r#"{"memory": [{"id": "new", "text": "likes espresso", "event": "ADD"}]}"#,
    ]);
    let owner = Owner::user("u1");

    let events = core
        .add(
            &[ConversationMessage::new("user", "I love espresso")],
            &owner,
            true,
            AddOptions::default(),
        )
        .unwrap();
    assert!(!events.is_empty());
    assert!(events.iter().any(|e| e.event == "ADD"));

    let all = core
        .get_all(&owner, None, 10, 0, SortField::Id, SortOrder::Asc)
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].content, "likes espresso");

    let results = core.search("coffee preference", &owner, SearchOptions::default()).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn s2_inferred_add_updates_a_contradicted_fact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let config = Config::default();
    let llm: Box<dyn LlmClient> = Box::new(ScriptedLlm::new(vec![
        r#"{"facts": ["likes dark mode"]}"#.to_string(),
        r#"{"memory": [{"id": "new", "text": "likes dark mode", "event": "ADD"}]}"#.to_string(),
    ]));
    let handles = test_handles(&config, Some(llm));
    let core = MemoryCore::open(&path, config, handles).unwrap();
    let owner = Owner::user("u1");

    let first = core
        .add(
            &[ConversationMessage::new("user", "I like dark mode")],
            &owner,
            true,
            AddOptions::default(),
        )
        .unwrap();
    let prior_id = first[0].id;
    core.close().unwrap();

    // Handles are fixed at construction, so the scripted LLM for the second
    // `add` call is wired by reopening the same on-disk database.
    let config = Config::default();
    let llm: Box<dyn LlmClient> = Box::new(ScriptedLlm::new(vec![
        r#"{"facts": ["prefers light mode now"]}"#.to_string(),
        format!(
            r#"{{"memory": [{{"id": "{}", "text": "prefers light mode now", "event": "UPDATE", "old_memory": "likes dark mode"}}]}}"#,
            prior_id.as_u64()
        ),
    ]));
    let handles = test_handles(&config, Some(llm));
    let core = MemoryCore::open(&path, config, handles).unwrap();

    let second = core
        .add(
            &[ConversationMessage::new("user", "I prefer light mode now")],
            &owner,
            true,
            AddOptions::default(),
        )
        .unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second[0].event, "UPDATE");
    assert_eq!(second[0].id, prior_id);

    let record = core.get(prior_id, &owner).unwrap().unwrap();
    assert_eq!(record.content, "prefers light mode now");
    assert!(record.updated_at >= record.created_at);
}
