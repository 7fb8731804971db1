//! Memory Core — the orchestrator (§4.7).
//!
//! [`MemoryCore`] is the stateless façade over everything else: storage is
//! the only durable state, the HNSW indexes are a derived per-collection
//! accelerator kept in memory and rebuilt from storage on open, and the
//! provider handles (embedder, sparse embedder, LLM, reranker) are fixed at
//! construction and never mutated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, instrument, warn};

use crate::collection::Collection;
use crate::config::Config;
use crate::embedding::{EmbeddingAction, EmbeddingService, SparseEmbeddingService};
use crate::error::{self, AgentMemError, NotFoundError, PermissionError, Result};
use crate::extractor::{self, ConversationMessage, ExtractOptions};
use crate::filter::Filter;
use crate::llm::LlmClient;
use crate::memory::{validate_memory_update, validate_new_memory, MemoryRecord, MemoryUpdate, NewMemory};
use crate::planner::{self, PlanDecision, PlanRequest};
use crate::reconciler::{self, ReconcileEvent};
use crate::rerank::RerankService;
use crate::snowflake::{MachineId, SnowflakeGenerator};
use crate::storage::{
    open_storage, HybridWeights, ScoredMemory, SortField, SortOrder, Statistics, StorageEngine,
};
use crate::types::{MemoryId, Owner, Scope};
use crate::vector::HnswIndex;

/// Name of the single collection every `MemoryCore` public operation reads
/// and writes. The storage and vector layers underneath are collection-keyed
/// (mirroring the teacher's per-collective design, and leaving room for a
/// future multi-collection surface), but the spec's orchestrator API never
/// takes a collection argument, so the core always resolves to this one.
pub const DEFAULT_COLLECTION: &str = "default";

/// `M` in "fetch `M * limit` candidates, then rerank down to `limit`" (§4.7).
const RERANK_FETCH_MULTIPLIER: usize = 3;

/// Retry budget for storage-layer calls (§7: "StorageError: retriable, 3 attempts").
const STORAGE_RETRY_ATTEMPTS: u32 = 3;

/// Retry budget for provider calls — embedder/LLM/reranker (§7: "ProviderError: retriable, 2 attempts").
const PROVIDER_RETRY_ATTEMPTS: u32 = 2;

/// Default top-N neighbor count handed to the reconciler (§4.6).
const RECONCILE_NEIGHBOR_LIMIT: usize = reconciler::DEFAULT_NEIGHBOR_LIMIT;

/// One memory mutation produced by [`MemoryCore::add`].
#[derive(Clone, Debug)]
pub struct AddEvent {
    /// The affected record's id.
    pub id: MemoryId,
    /// What happened: `"ADD"`, `"UPDATE"`, `"DELETE"`, or `"NONE"`.
    pub event: String,
    /// The fact/memory text involved.
    pub memory_text: String,
    /// The prior content, for `UPDATE`/`DELETE`/duplicate `NONE`.
    pub previous_text: Option<String>,
}

impl From<ReconcileEvent> for AddEvent {
    fn from(e: ReconcileEvent) -> Self {
        let event = match e.event {
            reconciler::ReconcileEventKind::Add => "ADD",
            reconciler::ReconcileEventKind::Update => "UPDATE",
            reconciler::ReconcileEventKind::Delete => "DELETE",
            reconciler::ReconcileEventKind::None => "NONE",
        };
        Self {
            id: e.id,
            event: event.to_string(),
            memory_text: e.memory_text,
            previous_text: e.previous_text,
        }
    }
}

/// Options accepted by [`MemoryCore::add`].
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// Arbitrary caller-supplied metadata, merged into the stored record.
    pub metadata: Option<serde_json::Value>,
    /// Visibility scope; defaults to `owner.default_scope()` if unset.
    pub scope: Option<Scope>,
    /// Free-form memory-type tag (only meaningful when `infer=false`).
    pub memory_type: Option<crate::memory::MemoryType>,
    /// Free-form category tag (only meaningful when `infer=false`).
    pub category: Option<crate::memory::Category>,
    /// Which conversation roles the Fact Extractor considers (ignored when
    /// `infer=false`).
    pub extract_options: ExtractOptions,
}

/// Options accepted by [`MemoryCore::search`].
#[derive(Clone, Debug, Default)]
pub struct SearchOptions<'a> {
    /// Additional filter ANDed with the identity filter.
    pub filters: Option<&'a Filter>,
    /// Maximum number of results. Defaults to 10.
    pub limit: Option<usize>,
    /// Minimum score threshold; forces the planner's fallback path.
    pub threshold: Option<f32>,
    /// Whether to rerank (requires a configured reranker).
    pub rerank: bool,
}

/// The memory orchestrator.
pub struct MemoryCore {
    storage: Box<dyn StorageEngine>,
    embedder: Box<dyn EmbeddingService>,
    sparse_embedder: Option<Box<dyn SparseEmbeddingService>>,
    llm: Option<Box<dyn LlmClient>>,
    reranker: Option<Box<dyn RerankService>>,
    id_gen: SnowflakeGenerator,
    config: Config,
    vectors: RwLock<HashMap<String, HnswIndex>>,
}

impl std::fmt::Debug for MemoryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vector_count = self.vectors.read().map(|v| v.len()).unwrap_or(0);
        f.debug_struct("MemoryCore")
            .field("config", &self.config)
            .field("vector_indexes", &vector_count)
            .field("has_llm", &self.llm.is_some())
            .field("has_reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

/// Handles a `MemoryCore` is built from, for callers assembling providers
/// directly rather than through `MemoryCore::open`'s config-driven wiring.
pub struct CoreHandles {
    /// Embedding client.
    pub embedder: Box<dyn EmbeddingService>,
    /// Sparse embedding client, if hybrid sparse retrieval is configured.
    pub sparse_embedder: Option<Box<dyn SparseEmbeddingService>>,
    /// LLM client, if fact extraction/reconciliation are configured.
    pub llm: Option<Box<dyn LlmClient>>,
    /// Reranker client, if result reranking is configured.
    pub reranker: Option<Box<dyn RerankService>>,
}

impl MemoryCore {
    /// Opens (or creates) a `MemoryCore` at `path`, wiring providers from
    /// `handles` rather than from the config's provider registry — callers
    /// that want config-driven construction should go through
    /// `crate::registry` and call [`MemoryCore::with_handles`] directly.
    #[instrument(skip(config, handles), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config, handles: CoreHandles) -> Result<Self> {
        config.validate()?;
        info!("opening MemoryCore");

        let storage = open_storage(&path, &config)?;

        if storage.get_collection(DEFAULT_COLLECTION)?.is_none() {
            let dimension = config.vector_store.dense_dimension.size();
            let mut collection = Collection::new(DEFAULT_COLLECTION, dimension)
                .with_distance_metric(config.vector_store.distance_metric);
            if handles.sparse_embedder.is_some() {
                collection = collection.with_hybrid();
            }
            collection.index_params = config.vector_store.hnsw.clone();
            storage.create_collection(&collection)?;
        }

        let vectors = Self::load_all_indexes(&*storage, &config)?;

        info!(collections = vectors.len(), "MemoryCore opened successfully");

        Ok(Self {
            storage,
            embedder: handles.embedder,
            sparse_embedder: handles.sparse_embedder,
            llm: handles.llm,
            reranker: handles.reranker,
            id_gen: SnowflakeGenerator::new(MachineId::default()),
            config,
            vectors: RwLock::new(vectors),
        })
    }

    /// Closes the core, persisting HNSW indexes before flushing storage.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("closing MemoryCore");

        if let Some(hnsw_dir) = self.hnsw_dir() {
            let vectors = self
                .vectors
                .read()
                .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
            for (name, index) in vectors.iter() {
                if let Err(e) = index.save_to_dir(&hnsw_dir, name) {
                    warn!(collection = %name, error = %e, "failed to save HNSW index, will rebuild on next open");
                }
            }
        }

        self.storage.close()?;
        info!("MemoryCore closed successfully");
        Ok(())
    }

    /// Returns the configuration this core was opened with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn hnsw_dir(&self) -> Option<PathBuf> {
        self.storage.path().map(|p| {
            let mut hnsw_path = p.as_os_str().to_owned();
            hnsw_path.push(".hnsw");
            PathBuf::from(hnsw_path)
        })
    }

    fn load_all_indexes(storage: &dyn StorageEngine, config: &Config) -> Result<HashMap<String, HnswIndex>> {
        let collections = storage.list_collections()?;
        let mut vectors = HashMap::with_capacity(collections.len());

        let hnsw_dir = storage.path().map(|p| {
            let mut hnsw_path = p.as_os_str().to_owned();
            hnsw_path.push(".hnsw");
            PathBuf::from(hnsw_path)
        });

        for collection in &collections {
            let records = storage.list(
                &collection.name,
                None,
                usize::MAX,
                0,
                SortField::Id,
                SortOrder::Asc,
            )?;
            let embeddings: Vec<(MemoryId, Vec<f32>)> = records
                .into_iter()
                .filter(|r| !r.dense_embedding.is_empty())
                .map(|r| (r.id, r.dense_embedding))
                .collect();

            let metadata = hnsw_dir
                .as_ref()
                .and_then(|dir| HnswIndex::load_metadata(dir, &collection.name).ok())
                .flatten();

            let index = if embeddings.is_empty() {
                HnswIndex::new(collection.dense_dimension, &config.vector_store.hnsw)
            } else {
                let start = std::time::Instant::now();
                let idx = HnswIndex::rebuild_from_embeddings(
                    collection.dense_dimension,
                    &config.vector_store.hnsw,
                    embeddings,
                )?;
                info!(
                    collection = %collection.name,
                    vectors = idx.active_count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "rebuilt HNSW index from storage"
                );
                idx
            };

            if let Some(meta) = metadata {
                index.restore_deleted_set(&meta.deleted)?;
            }

            vectors.insert(collection.name.clone(), index);
        }

        Ok(vectors)
    }

    fn collection_dimension(&self) -> Result<usize> {
        Ok(self
            .storage
            .get_collection(DEFAULT_COLLECTION)?
            .ok_or_else(|| NotFoundError::collection(DEFAULT_COLLECTION))?
            .dense_dimension)
    }

    /// Adds a memory.
    ///
    /// With `infer=false`, `messages` must be a single-element slice: its
    /// text is embedded and inserted directly, bypassing the Fact Extractor
    /// and Reconciler. With `infer=true`, `messages` is run through the Fact
    /// Extractor then the Reconciler, which may add, update, delete, or
    /// no-op any number of records.
    #[instrument(skip(self, messages, options), fields(infer))]
    pub fn add(
        &self,
        messages: &[ConversationMessage],
        owner: &Owner,
        infer: bool,
        options: AddOptions,
    ) -> Result<Vec<AddEvent>> {
        tracing::info!(infer, "add_requested");
        let scope = options.scope.unwrap_or_else(|| owner.default_scope());

        if !infer {
            let content = messages
                .first()
                .map(|m| m.content.clone())
                .unwrap_or_default();

            let dimension = self.collection_dimension()?;
            let sparse_embedding = match &self.sparse_embedder {
                Some(e) => Some(error::retry(PROVIDER_RETRY_ATTEMPTS, || e.embed_sparse(&content))?),
                None => None,
            };
            let new_memory = NewMemory {
                content,
                owner: owner.clone(),
                scope: Some(scope),
                category: options.category,
                memory_type: options.memory_type,
                metadata: options.metadata.unwrap_or(serde_json::Value::Null),
                dense_embedding: None,
                sparse_embedding,
            };
            validate_new_memory(&new_memory, dimension)?;

            let hash = crate::memory::content_hash(&new_memory.content);

            // P1: identical normalized content for the same identity is a
            // no-op, never a second ADD with a new id.
            if let Some(identity_filter) = reconciler::identity_filter(owner) {
                let existing = error::retry(STORAGE_RETRY_ATTEMPTS, || {
                    self.storage.list(
                        DEFAULT_COLLECTION,
                        Some(&identity_filter),
                        usize::MAX,
                        0,
                        SortField::Id,
                        SortOrder::Asc,
                    )
                })?;
                if let Some(duplicate) = existing.into_iter().find(|r| r.hash == hash) {
                    tracing::info!(id = duplicate.id.as_u64(), "add_completed: duplicate content, no-op");
                    return Ok(vec![AddEvent {
                        id: duplicate.id,
                        event: "NONE".to_string(),
                        memory_text: duplicate.content,
                        previous_text: None,
                    }]);
                }
            }

            let embedding = error::retry(PROVIDER_RETRY_ATTEMPTS, || {
                self.embedder.embed(&new_memory.content, EmbeddingAction::Add)
            })?;
            let now = crate::types::Timestamp::now();
            let id = self.id_gen.next_id();
            let record = MemoryRecord {
                id,
                content: new_memory.content,
                hash,
                dense_embedding: embedding.clone(),
                sparse_embedding: new_memory.sparse_embedding,
                owner: new_memory.owner,
                scope: new_memory.scope.unwrap_or(scope),
                category: new_memory.category,
                memory_type: new_memory.memory_type,
                metadata: new_memory.metadata,
                created_at: now,
                updated_at: now,
            };

            error::retry(STORAGE_RETRY_ATTEMPTS, || self.storage.insert(DEFAULT_COLLECTION, &[record.clone()]))?;
            self.insert_into_index(DEFAULT_COLLECTION, id, &embedding)?;

            tracing::info!("add_completed");
            return Ok(vec![AddEvent {
                id,
                event: "ADD".to_string(),
                memory_text: messages.first().map(|m| m.content.clone()).unwrap_or_default(),
                previous_text: None,
            }]);
        }

        let llm = self.require_llm()?;
        // `extract_facts` degrades LLM/schema failures to an empty fact list
        // itself (logging as it goes) rather than returning `Err`; any error
        // that does surface here is unrelated to extraction and propagates.
        let facts = extractor::extract_facts(llm.as_ref(), messages, &options.extract_options)?;

        let events = reconciler::reconcile(
            self.storage.as_ref(),
            self.embedder.as_ref(),
            self.sparse_embedder.as_deref(),
            llm.as_ref(),
            &self.id_gen,
            DEFAULT_COLLECTION,
            &facts,
            owner,
            scope,
            RECONCILE_NEIGHBOR_LIMIT,
        )?;

        self.sync_index_from_events(&events)?;

        tracing::info!(events = events.len(), "add_completed");
        Ok(events.into_iter().map(AddEvent::from).collect())
    }

    fn require_llm(&self) -> Result<&Box<dyn LlmClient>> {
        self.llm.as_ref().ok_or_else(|| {
            crate::error::ConfigError::missing("llm (required for infer=true add)").into()
        })
    }

    fn insert_into_index(&self, collection: &str, id: MemoryId, embedding: &[f32]) -> Result<()> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
        if let Some(index) = vectors.get(collection) {
            index.insert_memory(id, embedding)?;
        }
        Ok(())
    }

    fn sync_index_from_events(&self, events: &[ReconcileEvent]) -> Result<()> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
        let Some(index) = vectors.get(DEFAULT_COLLECTION) else {
            return Ok(());
        };
        for event in events {
            match event.event {
                reconciler::ReconcileEventKind::Add | reconciler::ReconcileEventKind::Update => {
                    if let Some(record) = self.storage.point_get(DEFAULT_COLLECTION, event.id)? {
                        if !index.contains(event.id) {
                            index.insert_memory(event.id, &record.dense_embedding)?;
                        } else if matches!(event.event, reconciler::ReconcileEventKind::Update) {
                            index.delete_memory(event.id)?;
                            index.insert_memory(event.id, &record.dense_embedding)?;
                        }
                    }
                }
                reconciler::ReconcileEventKind::Delete => {
                    index.delete_memory(event.id)?;
                }
                reconciler::ReconcileEventKind::None => {}
            }
        }
        Ok(())
    }

    /// Composes the I5 visibility filter (owner + scope) with a caller filter.
    fn combined_filter(owner: &Owner, extra: Option<&Filter>) -> Filter {
        let visibility = reconciler::visibility_filter(owner);
        match extra {
            Some(extra) => Filter::And(vec![visibility, extra.clone()]),
            None => visibility,
        }
    }

    /// Searches for memories relevant to `query` (§4.7 "search").
    #[instrument(skip(self, query, options))]
    pub fn search(&self, query: &str, owner: &Owner, options: SearchOptions<'_>) -> Result<Vec<MemoryRecord>> {
        let limit = options.limit.unwrap_or(10);
        let filter = Self::combined_filter(owner, options.filters);

        let sparse_query = match &self.sparse_embedder {
            Some(e) => Some(error::retry(PROVIDER_RETRY_ATTEMPTS, || e.embed_sparse(query))?),
            None => None,
        };

        let capabilities = self.storage.capabilities();
        let plan_request = PlanRequest {
            sparse_requested: sparse_query.is_some(),
            threshold: options.threshold,
            filter: Some(&filter),
        };
        let decision = planner::plan(capabilities, &plan_request);
        if let PlanDecision::Fallback { reason } = &decision {
            tracing::debug!(reason = %reason, "hybrid search using fallback path");
        }

        let fetch_limit = if options.rerank && self.reranker.is_some() {
            limit.saturating_mul(RERANK_FETCH_MULTIPLIER)
        } else {
            limit
        };

        let query_embedding = error::retry(PROVIDER_RETRY_ATTEMPTS, || {
            self.embedder.embed(query, EmbeddingAction::Search)
        })?;
        let mut hits: Vec<ScoredMemory> = error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.hybrid_search(
                DEFAULT_COLLECTION,
                &query_embedding,
                query,
                sparse_query.as_ref(),
                Some(&filter),
                fetch_limit,
                HybridWeights::default(),
            )
        })?;

        if let Some(threshold) = options.threshold {
            hits.retain(|h| h.score >= threshold);
        }

        if options.rerank {
            if let Some(reranker) = &self.reranker {
                let documents: Vec<&str> = hits.iter().map(|h| h.record.content.as_str()).collect();
                match error::retry(PROVIDER_RETRY_ATTEMPTS, || reranker.rerank(query, &documents, limit)) {
                    Ok(reranked) => {
                        let reordered = reranked
                            .into_iter()
                            .filter_map(|r| hits.get(r.index).cloned())
                            .collect();
                        hits = reordered;
                    }
                    Err(err) => {
                        warn!(error = %err, "reranker call failed, degrading to skip-rerank");
                    }
                }
            }
        }

        hits.truncate(limit);
        Ok(hits.into_iter().map(|h| h.record).collect())
    }

    /// Retrieves a single memory by id, enforcing identity ownership.
    #[instrument(skip(self))]
    pub fn get(&self, id: MemoryId, owner: &Owner) -> Result<Option<MemoryRecord>> {
        let record = match error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.point_get(DEFAULT_COLLECTION, id)
        })? {
            Some(record) => record,
            None => return Ok(None),
        };
        self.check_identity(&record, owner, "get")?;
        Ok(Some(record))
    }

    /// Lists memories for `owner`, optionally narrowed by `filters`. Pure
    /// listing, no similarity ranking.
    #[instrument(skip(self, filters))]
    #[allow(clippy::too_many_arguments)]
    pub fn get_all(
        &self,
        owner: &Owner,
        filters: Option<&Filter>,
        limit: usize,
        offset: usize,
        sort_by: SortField,
        order: SortOrder,
    ) -> Result<Vec<MemoryRecord>> {
        let filter = Self::combined_filter(owner, filters);
        error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage
                .list(DEFAULT_COLLECTION, Some(&filter), limit, offset, sort_by, order)
        })
    }

    /// Updates a memory's content/metadata, recomputing the embedding when
    /// content changes (invariant I3).
    #[instrument(skip(self, content, metadata))]
    pub fn update(
        &self,
        id: MemoryId,
        owner: &Owner,
        content: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool> {
        let existing = error::retry(STORAGE_RETRY_ATTEMPTS, || self.storage.point_get(DEFAULT_COLLECTION, id))?
            .ok_or_else(|| NotFoundError::memory(id))?;
        self.check_identity(&existing, owner, "update")?;

        let update = MemoryUpdate {
            content: content.clone(),
            metadata,
            ..Default::default()
        };
        validate_memory_update(&update)?;

        let new_embedding = match &content {
            Some(text) => Some(error::retry(PROVIDER_RETRY_ATTEMPTS, || {
                self.embedder.embed(text, EmbeddingAction::Update)
            })?),
            None => None,
        };

        let updated = error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage
                .update(DEFAULT_COLLECTION, id, &update, new_embedding.clone())
        })?;

        if updated {
            if let Some(embedding) = new_embedding {
                let vectors = self
                    .vectors
                    .read()
                    .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
                if let Some(index) = vectors.get(DEFAULT_COLLECTION) {
                    index.delete_memory(id)?;
                    index.insert_memory(id, &embedding)?;
                }
            }
        }

        Ok(updated)
    }

    /// Deletes a single memory, enforcing identity ownership.
    #[instrument(skip(self))]
    pub fn delete(&self, id: MemoryId, owner: &Owner) -> Result<bool> {
        let existing = match error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.point_get(DEFAULT_COLLECTION, id)
        })? {
            Some(record) => record,
            None => return Ok(false),
        };
        self.check_identity(&existing, owner, "delete")?;

        let vectors = self
            .vectors
            .read()
            .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
        if let Some(index) = vectors.get(DEFAULT_COLLECTION) {
            index.delete_memory(id)?;
        }
        drop(vectors);

        error::retry(STORAGE_RETRY_ATTEMPTS, || self.storage.delete(DEFAULT_COLLECTION, id))
    }

    /// Deletes every memory visible to `owner` (I5): its own records plus any
    /// `AgentGroup`/`UserGroup`/`Public` record `owner`'s scope admits.
    #[instrument(skip(self))]
    pub fn delete_all(&self, owner: &Owner) -> Result<u64> {
        if owner.is_empty() {
            return Err(crate::error::ValidationError::required_field(
                "owner (at least one identity field required for delete_all)",
            )
            .into());
        }
        let filter = reconciler::visibility_filter(owner);

        let victims = error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.list(
                DEFAULT_COLLECTION,
                Some(&filter),
                usize::MAX,
                0,
                SortField::Id,
                SortOrder::Asc,
            )
        })?;

        let count = error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.delete_by_filter(DEFAULT_COLLECTION, &filter)
        })?;

        let vectors = self
            .vectors
            .read()
            .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
        if let Some(index) = vectors.get(DEFAULT_COLLECTION) {
            for record in &victims {
                index.delete_memory(record.id)?;
            }
        }

        Ok(count)
    }

    /// Administrative reset: drops and recreates the default collection.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        self.storage.delete_collection(DEFAULT_COLLECTION)?;

        let dimension = self.config.vector_store.dense_dimension.size();
        let mut collection = Collection::new(DEFAULT_COLLECTION, dimension)
            .with_distance_metric(self.config.vector_store.distance_metric);
        if self.sparse_embedder.is_some() {
            collection = collection.with_hybrid();
        }
        collection.index_params = self.config.vector_store.hnsw.clone();
        self.storage.create_collection(&collection)?;

        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| crate::error::StorageError::corrupted("vector index lock poisoned"))?;
        vectors.insert(
            DEFAULT_COLLECTION.to_string(),
            HnswIndex::new(dimension, &self.config.vector_store.hnsw),
        );

        info!("core reset: default collection dropped and recreated");
        Ok(())
    }

    /// Returns aggregate statistics, optionally scoped to everything visible
    /// to `owner` (I5).
    #[instrument(skip(self))]
    pub fn get_statistics(&self, owner: Option<&Owner>) -> Result<Statistics> {
        let filter = owner.map(reconciler::visibility_filter);
        error::retry(STORAGE_RETRY_ATTEMPTS, || {
            self.storage.get_statistics(DEFAULT_COLLECTION, filter.as_ref())
        })
    }

    /// Verifies `owner` is permitted to act on `record` given its scope (I5):
    /// `Public` admits anyone; `UserGroup` admits a matching `user_id`
    /// regardless of agent/run/actor; `AgentGroup` admits a matching
    /// `agent_id` regardless of run/actor; `Private` requires the full owner
    /// tuple to match exactly.
    fn check_identity(&self, record: &MemoryRecord, owner: &Owner, action: &str) -> Result<()> {
        let visible = match record.scope {
            Scope::Public => true,
            Scope::UserGroup => Self::fields_match(&record.owner.user_id, &owner.user_id),
            Scope::AgentGroup => Self::fields_match(&record.owner.agent_id, &owner.agent_id),
            Scope::Private => record.owner == *owner,
        };

        if visible {
            Ok(())
        } else {
            Err(PermissionError::ScopeViolation {
                identity: format!("{owner:?}"),
                action: action.to_string(),
                scope: record.scope.to_string(),
            }
            .into())
        }
    }

    /// True if both options are present and equal.
    fn fields_match<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
        matches!((a, b), (Some(a), Some(b)) if a == b)
    }
}

// MemoryCore is auto Send + Sync: every boxed trait object field requires
// Send + Sync in its trait bound, and SnowflakeGenerator/Config/RwLock are too.
