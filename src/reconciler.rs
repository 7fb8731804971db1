//! Reconciler (§4.6).
//!
//! Takes candidate facts from the Fact Extractor and merges them into
//! existing memory, one "update-graph" LLM call at a time: retrieve
//! near-neighbor records per fact, ask the LLM which of ADD/UPDATE/DELETE/
//! NONE applies to each, then apply the events transactionally (per-fact,
//! not the whole batch — a schema-validation failure is the only thing
//! that aborts the batch).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::{EmbeddingAction, EmbeddingService, SparseEmbeddingService};
use crate::error::{ReconcileError, Result};
use crate::filter::{ColumnField, Filter};
use crate::llm::{LlmClient, Message};
use crate::memory::{content_hash, MemoryRecord, MemoryUpdate};
use crate::snowflake::SnowflakeGenerator;
use crate::storage::{SortField, SortOrder, StorageEngine};
use crate::types::{MemoryId, Owner, Scope, Timestamp};

/// Default top-N neighbor count per fact (§4.6 step 1).
pub const DEFAULT_NEIGHBOR_LIMIT: usize = 5;

/// What happened to one fact during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileEventKind {
    /// A new record was inserted.
    Add,
    /// An existing record's content was updated.
    Update,
    /// An existing record was deleted.
    Delete,
    /// No change was made.
    None,
}

impl ReconcileEventKind {
    fn wire_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::None => "NONE",
        }
    }

    fn from_wire(s: &str) -> std::result::Result<Self, ReconcileError> {
        match s {
            "ADD" => Ok(Self::Add),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "NONE" => Ok(Self::None),
            other => Err(ReconcileError::SchemaMismatch(format!(
                "unknown event kind {other:?}"
            ))),
        }
    }
}

/// Per-event summary returned from a reconcile call (§4.6 step 5).
#[derive(Clone, Debug)]
pub struct ReconcileEvent {
    /// The affected record's id.
    pub id: MemoryId,
    /// What happened.
    pub event: ReconcileEventKind,
    /// The fact/memory text involved.
    pub memory_text: String,
    /// The prior content, for `Update`/`Delete`.
    pub previous_text: Option<String>,
    /// Set to `"duplicate"` when an `ADD` is downgraded to `None` by
    /// hash-based dedup (§4.6 step 4).
    pub reason: Option<String>,
}

const UPDATE_GRAPH_PROMPT: &str = "You reconcile new candidate facts against a list of \
existing memories for the same identity. For each new fact, decide one event: ADD (no \
related existing memory), UPDATE (a related memory's content should change — give its id \
and the new text), DELETE (an existing memory is now contradicted or obsolete — give its \
id), or NONE (no change needed). Respond with JSON matching {\"memory\": [{\"id\": \
\"<existing id as string, or \\\"new\\\">\", \"text\": \"<fact or updated text>\", \
\"event\": \"ADD\"|\"UPDATE\"|\"DELETE\"|\"NONE\", \"old_memory\": \"<prior text, if \
UPDATE or DELETE>\"}]}.";

const STRICT_JSON_INSTRUCTION: &str =
    "Your previous response did not parse as valid JSON matching the required schema. \
Respond with valid JSON only, no surrounding prose or markdown fences.";

#[derive(Deserialize)]
struct MemoryEventWire {
    id: String,
    text: String,
    event: String,
    #[serde(default)]
    old_memory: Option<String>,
}

#[derive(Deserialize)]
struct MemoryResponse {
    memory: Vec<MemoryEventWire>,
}

#[derive(Serialize)]
struct ExistingMemoryWire<'a> {
    id: String,
    text: &'a str,
}

/// Exact-tuple filter: ANDs every owner field the caller supplied. Matches a
/// record only if it carries the same value in each of those fields,
/// regardless of the record's `scope` — used where identity, not visibility,
/// is the question (P1 hash dedup in `add`, reconciler neighbor lookup).
pub(crate) fn identity_filter(owner: &Owner) -> Option<Filter> {
    let mut leaves = Vec::new();
    if let Some(user_id) = &owner.user_id {
        leaves.push(Filter::column_eq(ColumnField::UserId, user_id.as_str()));
    }
    if let Some(agent_id) = &owner.agent_id {
        leaves.push(Filter::column_eq(ColumnField::AgentId, agent_id.as_str()));
    }
    if let Some(run_id) = &owner.run_id {
        leaves.push(Filter::column_eq(ColumnField::RunId, run_id.as_str()));
    }
    if let Some(actor_id) = &owner.actor_id {
        leaves.push(Filter::column_eq(ColumnField::ActorId, actor_id.as_str()));
    }
    match leaves.len() {
        0 => None,
        1 => leaves.into_iter().next(),
        _ => Some(Filter::And(leaves)),
    }
}

/// Storage-level read-visibility filter (data model invariant I5): a record
/// is visible to `owner` if its `scope` is `Public`, or if its scope permits
/// cross-owner visibility and the matching owner field lines up
/// (`UserGroup` + same `user_id`, `AgentGroup` + same `agent_id`), or if it's
/// `Private` and [`identity_filter`] narrows to it.
///
/// The `Private` branch narrows by whichever fields `owner` supplies, the
/// same approximation `identity_filter` already makes elsewhere — the filter
/// DSL has no "is absent" operator to additionally require the record's
/// *other* owner fields be unset, so exact full-tuple equality for `Private`
/// is enforced precisely only where the whole `Owner` value is available to
/// compare directly (point access, see `MemoryCore::check_identity`).
pub(crate) fn visibility_filter(owner: &Owner) -> Filter {
    let mut branches = vec![Filter::column_eq(ColumnField::Scope, "public")];

    if let Some(user_id) = &owner.user_id {
        branches.push(Filter::And(vec![
            Filter::column_eq(ColumnField::Scope, "user_group"),
            Filter::column_eq(ColumnField::UserId, user_id.as_str()),
        ]));
    }
    if let Some(agent_id) = &owner.agent_id {
        branches.push(Filter::And(vec![
            Filter::column_eq(ColumnField::Scope, "agent_group"),
            Filter::column_eq(ColumnField::AgentId, agent_id.as_str()),
        ]));
    }
    if let Some(exact) = identity_filter(owner) {
        branches.push(Filter::And(vec![
            Filter::column_eq(ColumnField::Scope, "private"),
            exact,
        ]));
    }

    Filter::Or(branches)
}

fn invoke_update_graph(
    llm: &dyn LlmClient,
    new_facts: &[String],
    existing: &[&MemoryRecord],
) -> Result<Vec<MemoryEventWire>> {
    let existing_wire: Vec<ExistingMemoryWire<'_>> = existing
        .iter()
        .map(|r| ExistingMemoryWire {
            id: r.id.as_u64().to_string(),
            text: &r.content,
        })
        .collect();

    let body = serde_json::json!({
        "new_facts": new_facts,
        "existing_memories": existing_wire,
    });
    let user_message = Message::user(body.to_string());

    let messages = [Message::system(UPDATE_GRAPH_PROMPT), user_message.clone()];
    let raw = llm
        .generate(&messages, Some("memory"))
        .map_err(|e| ReconcileError::ProviderFailed(e.to_string()))?;

    if let Ok(parsed) = serde_json::from_str::<MemoryResponse>(&raw) {
        return Ok(parsed.memory);
    }

    tracing::debug!("reconcile response failed schema validation, retrying");
    let retry_messages = [
        Message::system(UPDATE_GRAPH_PROMPT),
        user_message,
        Message::system(STRICT_JSON_INSTRUCTION),
    ];
    let raw_retry = llm
        .generate(&retry_messages, Some("memory"))
        .map_err(|e| ReconcileError::ProviderFailed(e.to_string()))?;

    serde_json::from_str::<MemoryResponse>(&raw_retry)
        .map(|parsed| parsed.memory)
        .map_err(|e| ReconcileError::SchemaMismatch(e.to_string()).into())
}

fn find_duplicate_by_hash(
    storage: &dyn StorageEngine,
    collection: &str,
    filter: Option<&Filter>,
    hash: u128,
) -> Result<Option<MemoryRecord>> {
    // No dedicated hash index; the reconciler is the sole place I1
    // (hash-based dedup within identity scope) is enforced, per the
    // storage layer's own contract (`StorageEngine::insert` never dedups).
    let candidates = storage.list(
        collection,
        filter,
        usize::MAX,
        0,
        SortField::Id,
        SortOrder::Asc,
    )?;
    Ok(candidates.into_iter().find(|r| r.hash == hash))
}

fn parse_memory_id(raw: &str) -> std::result::Result<MemoryId, ReconcileError> {
    raw.parse::<u64>()
        .map(MemoryId::from_raw)
        .map_err(|_| ReconcileError::SchemaMismatch(format!("invalid memory id {raw:?}")))
}

/// Reconciles `new_facts` into storage for the given owner/scope.
///
/// Returns `Ok(vec![])` for an empty fact list (no call made). On an LLM
/// schema-validation failure that survives one retry, returns
/// `Err(ReconcileError::SchemaMismatch(..))` — the caller applies nothing,
/// per the "no partial apply" failure model.
#[allow(clippy::too_many_arguments)]
pub fn reconcile(
    storage: &dyn StorageEngine,
    embedder: &dyn EmbeddingService,
    sparse_embedder: Option<&dyn SparseEmbeddingService>,
    llm: &dyn LlmClient,
    id_gen: &SnowflakeGenerator,
    collection: &str,
    new_facts: &[String],
    owner: &Owner,
    scope: Scope,
    neighbor_limit: usize,
) -> Result<Vec<ReconcileEvent>> {
    if new_facts.is_empty() {
        return Ok(Vec::new());
    }

    let filter = identity_filter(owner);
    let mut existing: HashMap<MemoryId, MemoryRecord> = HashMap::new();

    for fact in new_facts {
        let embedding = embedder.embed(fact, EmbeddingAction::Add)?;
        let hits = storage.vector_search(collection, &embedding, filter.as_ref(), neighbor_limit)?;
        for hit in hits {
            existing.entry(hit.record.id).or_insert(hit.record);
        }
    }

    let mut existing_list: Vec<&MemoryRecord> = existing.values().collect();
    existing_list.sort_by_key(|r| r.id.as_u64());

    let wire_events = invoke_update_graph(llm, new_facts, &existing_list)?;

    let mut summaries = Vec::with_capacity(wire_events.len());
    for wire in wire_events {
        let kind = ReconcileEventKind::from_wire(&wire.event)?;
        let event = apply_event(
            storage,
            embedder,
            sparse_embedder,
            id_gen,
            collection,
            owner,
            scope,
            &filter,
            kind,
            wire,
        )?;
        summaries.push(event);
    }

    Ok(summaries)
}

#[allow(clippy::too_many_arguments)]
fn apply_event(
    storage: &dyn StorageEngine,
    embedder: &dyn EmbeddingService,
    sparse_embedder: Option<&dyn SparseEmbeddingService>,
    id_gen: &SnowflakeGenerator,
    collection: &str,
    owner: &Owner,
    scope: Scope,
    filter: &Option<Filter>,
    kind: ReconcileEventKind,
    wire: MemoryEventWire,
) -> Result<ReconcileEvent> {
    match kind {
        ReconcileEventKind::Add => {
            let hash = content_hash(&wire.text);
            if let Some(dup) = find_duplicate_by_hash(storage, collection, filter.as_ref(), hash)? {
                return Ok(ReconcileEvent {
                    id: dup.id,
                    event: ReconcileEventKind::None,
                    memory_text: wire.text,
                    previous_text: None,
                    reason: Some("duplicate".to_string()),
                });
            }

            let embedding = embedder.embed(&wire.text, EmbeddingAction::Add)?;
            let sparse_embedding = sparse_embedder
                .map(|e| e.embed_sparse(&wire.text))
                .transpose()?;
            let id = id_gen.next_id();
            let now = Timestamp::now();
            let record = MemoryRecord {
                id,
                content: wire.text.clone(),
                hash,
                dense_embedding: embedding,
                sparse_embedding,
                owner: owner.clone(),
                scope,
                category: None,
                memory_type: None,
                metadata: Value::Object(Default::default()),
                created_at: now,
                updated_at: now,
            };
            storage.insert(collection, &[record])?;
            Ok(ReconcileEvent {
                id,
                event: ReconcileEventKind::Add,
                memory_text: wire.text,
                previous_text: None,
                reason: None,
            })
        }
        ReconcileEventKind::Update => {
            let id = parse_memory_id(&wire.id)?;
            let previous_text = storage.point_get(collection, id)?.map(|r| r.content);
            let embedding = embedder.embed(&wire.text, EmbeddingAction::Update)?;
            let update = MemoryUpdate {
                content: Some(wire.text.clone()),
                ..Default::default()
            };
            storage.update(collection, id, &update, Some(embedding))?;
            Ok(ReconcileEvent {
                id,
                event: ReconcileEventKind::Update,
                memory_text: wire.text,
                previous_text,
                reason: None,
            })
        }
        ReconcileEventKind::Delete => {
            let id = parse_memory_id(&wire.id)?;
            let previous_text = storage.point_get(collection, id)?.map(|r| r.content);
            storage.delete(collection, id)?;
            Ok(ReconcileEvent {
                id,
                event: ReconcileEventKind::Delete,
                memory_text: wire.text,
                previous_text,
                reason: None,
            })
        }
        ReconcileEventKind::None => {
            let id = wire
                .id
                .parse::<u64>()
                .map(MemoryId::from_raw)
                .unwrap_or(MemoryId::from_raw(0));
            Ok(ReconcileEvent {
                id,
                event: ReconcileEventKind::None,
                memory_text: wire.text,
                previous_text: wire.old_memory,
                reason: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_round_trip() {
        for kind in [
            ReconcileEventKind::Add,
            ReconcileEventKind::Update,
            ReconcileEventKind::Delete,
            ReconcileEventKind::None,
        ] {
            let wire = kind.wire_str();
            assert_eq!(ReconcileEventKind::from_wire(wire).unwrap(), kind);
        }
    }

    #[test]
    fn test_from_wire_rejects_unknown() {
        assert!(ReconcileEventKind::from_wire("MAYBE").is_err());
    }

    #[test]
    fn test_identity_filter_none_for_empty_owner() {
        assert!(identity_filter(&Owner::default()).is_none());
    }

    #[test]
    fn test_identity_filter_single_leaf_for_user_only() {
        let owner = Owner::user("u1");
        let filter = identity_filter(&owner).unwrap();
        assert!(matches!(filter, Filter::Leaf { .. }));
    }

    #[test]
    fn test_identity_filter_and_for_multiple_fields() {
        let owner = Owner::agent("u1", "a1");
        let filter = identity_filter(&owner).unwrap();
        assert!(matches!(filter, Filter::And(_)));
    }

    fn record_with(owner: Owner, scope: Scope) -> MemoryRecord {
        MemoryRecord {
            id: MemoryId::from_raw(1),
            content: "test".into(),
            hash: 0,
            dense_embedding: vec![],
            sparse_embedding: None,
            owner,
            scope,
            category: None,
            memory_type: None,
            metadata: Value::Null,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_visibility_filter_always_admits_public() {
        let filter = visibility_filter(&Owner::user("alice"));
        let record = record_with(Owner::user("bob"), Scope::Public);
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_admits_user_group_across_agents() {
        let filter = visibility_filter(&Owner::user("alice"));
        let record = record_with(Owner::agent("alice", "other-agent"), Scope::UserGroup);
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_rejects_user_group_for_different_user() {
        let filter = visibility_filter(&Owner::user("alice"));
        let record = record_with(Owner::user("bob"), Scope::UserGroup);
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_admits_agent_group_across_runs() {
        let owner = Owner::agent("alice", "a1");
        let filter = visibility_filter(&owner);
        let record = record_with(Owner::run("alice", "a1", "r2"), Scope::AgentGroup);
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_rejects_agent_group_for_different_agent() {
        let owner = Owner::agent("alice", "a1");
        let filter = visibility_filter(&owner);
        let record = record_with(Owner::agent("alice", "a2"), Scope::AgentGroup);
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_admits_exact_owner_for_private() {
        let owner = Owner::user("alice");
        let filter = visibility_filter(&owner);
        let record = record_with(Owner::user("alice"), Scope::Private);
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_visibility_filter_rejects_private_for_other_owner() {
        let filter = visibility_filter(&Owner::user("alice"));
        let record = record_with(Owner::user("bob"), Scope::Private);
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_parse_memory_id_rejects_non_numeric() {
        assert!(parse_memory_id("not-a-number").is_err());
    }

    #[test]
    fn test_parse_memory_id_accepts_numeric_string() {
        assert_eq!(parse_memory_id("42").unwrap(), MemoryId::from_raw(42));
    }

    struct FixedEmbedding(u16, f32);
    impl EmbeddingService for FixedEmbedding {
        fn embed(&self, _text: &str, _action: EmbeddingAction) -> Result<crate::types::Embedding> {
            Ok(vec![self.1; self.0 as usize])
        }
        fn dimension(&self) -> u16 {
            self.0
        }
    }

    /// Always returns the same malformed JSON, for both the first call and
    /// the one-retry call `invoke_update_graph` makes on a schema mismatch.
    struct BrokenLlm;
    impl LlmClient for BrokenLlm {
        fn generate(&self, _messages: &[Message], _expected_schema: Option<&str>) -> Result<String> {
            Ok("not json".to_string())
        }
        fn provider(&self) -> crate::llm::Provider {
            crate::llm::Provider::OpenAi
        }
        fn model(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_reconcile_schema_failure_after_retry_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::storage::open_storage(dir.path().join("test.db"), &crate::config::Config::default()).unwrap();
        storage
            .create_collection(&crate::collection::Collection::new("default", 4))
            .unwrap();

        let embedder = FixedEmbedding(4, 0.1);
        let llm = BrokenLlm;
        let id_gen = SnowflakeGenerator::new(crate::snowflake::MachineId::new(1).unwrap());
        let owner = Owner::user("u1");

        let err = reconcile(
            storage.as_ref(),
            &embedder,
            None,
            &llm,
            &id_gen,
            "default",
            &["a brand new fact".to_string()],
            &owner,
            Scope::UserGroup,
            DEFAULT_NEIGHBOR_LIMIT,
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::AgentMemError::Reconcile(_)));

        let all = storage
            .list("default", None, usize::MAX, 0, SortField::Id, SortOrder::Asc)
            .unwrap();
        assert!(all.is_empty());
    }
}
