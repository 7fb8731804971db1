//! HTTP transport surface (§6): a thin `axum` layer over [`crate::core::MemoryCore`].
//!
//! Every handler bridges the synchronous core into async handlers with
//! `tokio::task::spawn_blocking`, the same pattern the teacher's own
//! comments describe for wrapping a sync store behind an async transport.
//! No business logic lives here — validation, identity enforcement, and
//! retries all happen in `MemoryCore`; this module only does request/
//! response (de)serialization, auth, and error-to-status mapping.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::core::{AddEvent, AddOptions, MemoryCore, SearchOptions};
use crate::error::{AgentMemError, Result};
use crate::extractor::ConversationMessage;
use crate::filter::Filter;
use crate::memory::{Category, MemoryRecord, MemoryType};
use crate::storage::{SortField, SortOrder, Statistics};
use crate::types::{MemoryId, Owner, Scope};

/// Shared handler state.
pub struct AppState {
    core: Arc<MemoryCore>,
    /// Allowed `X-API-Key` values. `None` disables auth entirely (§6: "when
    /// auth is disabled, all requests pass").
    api_keys: Option<HashSet<String>>,
}

impl AppState {
    /// Builds handler state over an already-open core.
    pub fn new(core: Arc<MemoryCore>, api_keys: Option<HashSet<String>>) -> Self {
        Self { core, api_keys }
    }
}

/// Builds the full router, with auth middleware applied to every route
/// except `/system/health`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/memories", post(add_memory).get(list_memories))
        .route("/memories/batch", post(add_memories_batch))
        .route("/memories/search", post(search_memories))
        .route("/memories/{id}", get(get_memory).put(update_memory).delete(delete_memory))
        .route("/system/status", get(system_status))
        .route("/system/delete-all-memories", delete(delete_all_memories))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    Router::new()
        .route("/system/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Binds `addr` and serves [`build_router`]'s routes until the process is
/// killed. A thin convenience wrapper for embedders and integration tests;
/// the CLI (§6) has no `serve` subcommand of its own.
pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state)).await
}

async fn api_key_auth(State(state): State<Arc<AppState>>, headers: HeaderMap, request: axum::extract::Request, next: Next) -> Response {
    let Some(allowed) = &state.api_keys else {
        return next.run(request).await;
    };

    let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if allowed.contains(key) => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "missing or invalid X-API-Key"}))).into_response(),
    }
}

/// Maps a core [`AgentMemError`] onto the §6 HTTP error contract.
struct ApiError(AgentMemError);

impl From<AgentMemError> for ApiError {
    fn from(err: AgentMemError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Wire shape for identity in request bodies/queries.
#[derive(Clone, Debug, Default, Deserialize)]
struct IdentityDto {
    user_id: Option<String>,
    agent_id: Option<String>,
    run_id: Option<String>,
    actor_id: Option<String>,
}

impl From<IdentityDto> for Owner {
    fn from(dto: IdentityDto) -> Self {
        Owner {
            user_id: dto.user_id.map(crate::types::UserId::new),
            agent_id: dto.agent_id.map(crate::types::AgentId::new),
            run_id: dto.run_id.map(crate::types::RunId::new),
            actor_id: dto.actor_id.map(crate::types::ActorId::new),
        }
    }
}

fn parse_scope(s: &str) -> std::result::Result<Scope, ApiError> {
    match s {
        "private" => Ok(Scope::Private),
        "agent_group" => Ok(Scope::AgentGroup),
        "user_group" => Ok(Scope::UserGroup),
        "public" => Ok(Scope::Public),
        other => Err(ApiError(
            crate::error::ValidationError::invalid_field("scope", format!("unknown scope '{other}'")).into(),
        )),
    }
}

#[derive(Serialize)]
struct AddEventDto {
    id: String,
    event: String,
    memory_text: String,
    previous_text: Option<String>,
}

impl From<AddEvent> for AddEventDto {
    fn from(e: AddEvent) -> Self {
        Self {
            id: e.id.as_u64().to_string(),
            event: e.event,
            memory_text: e.memory_text,
            previous_text: e.previous_text,
        }
    }
}

#[derive(Deserialize)]
struct AddMemoryRequest {
    content: String,
    identity: IdentityDto,
    metadata: Option<serde_json::Value>,
    scope: Option<String>,
    #[serde(default)]
    infer: bool,
    #[serde(default)]
    memory_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[instrument(skip(state, request))]
async fn add_memory(State(state): State<Arc<AppState>>, Json(request): Json<AddMemoryRequest>) -> ApiResult<Vec<AddEventDto>> {
    let core = state.core.clone();
    let events = tokio::task::spawn_blocking(move || -> Result<Vec<AddEvent>> {
        let owner: Owner = request.identity.into();
        let scope = request.scope.as_deref().map(parse_scope).transpose().map_err(|e| e.0)?;
        let messages = vec![ConversationMessage::new("user", request.content)];
        let options = AddOptions {
            metadata: request.metadata,
            scope,
            memory_type: request.memory_type.map(MemoryType::new),
            category: request.category.map(Category::new),
            extract_options: Default::default(),
        };
        core.add(&messages, &owner, request.infer, options)
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(events.into_iter().map(AddEventDto::from).collect()))
}

#[derive(Serialize)]
struct BatchResult {
    succeeded: usize,
    failed: usize,
    events: Vec<AddEventDto>,
}

#[instrument(skip(state, requests))]
async fn add_memories_batch(
    State(state): State<Arc<AppState>>,
    Json(requests): Json<Vec<AddMemoryRequest>>,
) -> ApiResult<BatchResult> {
    let core = state.core.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut events = Vec::new();
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for request in requests {
            let owner: Owner = request.identity.into();
            let scope = match request.scope.as_deref().map(parse_scope).transpose() {
                Ok(s) => s,
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };
            let messages = vec![ConversationMessage::new("user", request.content)];
            let options = AddOptions {
                metadata: request.metadata,
                scope,
                memory_type: request.memory_type.map(MemoryType::new),
                category: request.category.map(Category::new),
                extract_options: Default::default(),
            };
            match core.add(&messages, &owner, request.infer, options) {
                Ok(added) => {
                    succeeded += 1;
                    events.extend(added.into_iter().map(AddEventDto::from));
                }
                Err(_) => failed += 1,
            }
        }
        BatchResult { succeeded, failed, events }
    })
    .await
    .map_err(blocking_panicked)?;

    Ok(Json(result))
}

#[derive(Serialize)]
struct MemoryRecordDto {
    id: String,
    content: String,
    owner: IdentityResponseDto,
    scope: String,
    category: Option<String>,
    memory_type: Option<String>,
    metadata: serde_json::Value,
    created_at: i64,
    updated_at: i64,
}

#[derive(Serialize)]
struct IdentityResponseDto {
    user_id: Option<String>,
    agent_id: Option<String>,
    run_id: Option<String>,
    actor_id: Option<String>,
}

impl From<MemoryRecord> for MemoryRecordDto {
    fn from(r: MemoryRecord) -> Self {
        Self {
            id: r.id.as_u64().to_string(),
            content: r.content,
            owner: IdentityResponseDto {
                user_id: r.owner.user_id.map(|v| v.to_string()),
                agent_id: r.owner.agent_id.map(|v| v.to_string()),
                run_id: r.owner.run_id.map(|v| v.to_string()),
                actor_id: r.owner.actor_id.map(|v| v.to_string()),
            },
            scope: r.scope.to_string(),
            category: r.category.map(|c| c.as_str().to_string()),
            memory_type: r.memory_type.map(|m| m.as_str().to_string()),
            metadata: r.metadata,
            created_at: r.created_at.as_millis(),
            updated_at: r.updated_at.as_millis(),
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    user_id: Option<String>,
    agent_id: Option<String>,
    run_id: Option<String>,
    actor_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    order: Option<String>,
}

fn default_limit() -> usize {
    50
}

fn parse_sort_field(s: Option<&str>) -> SortField {
    match s {
        Some("created_at") => SortField::CreatedAt,
        Some("updated_at") => SortField::UpdatedAt,
        _ => SortField::Id,
    }
}

fn parse_sort_order(s: Option<&str>) -> SortOrder {
    match s {
        Some("desc") => SortOrder::Desc,
        _ => SortOrder::Asc,
    }
}

#[instrument(skip(state))]
async fn list_memories(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> ApiResult<Vec<MemoryRecordDto>> {
    let core = state.core.clone();
    let records = tokio::task::spawn_blocking(move || {
        let owner = Owner {
            user_id: query.user_id.map(crate::types::UserId::new),
            agent_id: query.agent_id.map(crate::types::AgentId::new),
            run_id: query.run_id.map(crate::types::RunId::new),
            actor_id: query.actor_id.map(crate::types::ActorId::new),
        };
        core.get_all(
            &owner,
            None,
            query.limit,
            query.offset,
            parse_sort_field(query.sort_by.as_deref()),
            parse_sort_order(query.order.as_deref()),
        )
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(records.into_iter().map(MemoryRecordDto::from).collect()))
}

#[derive(Deserialize)]
struct IdQuery {
    user_id: Option<String>,
    agent_id: Option<String>,
    run_id: Option<String>,
    actor_id: Option<String>,
}

fn parse_memory_id(raw: &str) -> std::result::Result<MemoryId, ApiError> {
    raw.parse::<u64>()
        .map(MemoryId::from_raw)
        .map_err(|_| ApiError(crate::error::NotFoundError::memory(raw).into()))
}

#[instrument(skip(state))]
async fn get_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Option<MemoryRecordDto>> {
    let id = parse_memory_id(&id)?;
    let core = state.core.clone();
    let record = tokio::task::spawn_blocking(move || {
        let owner = Owner {
            user_id: query.user_id.map(crate::types::UserId::new),
            agent_id: query.agent_id.map(crate::types::AgentId::new),
            run_id: query.run_id.map(crate::types::RunId::new),
            actor_id: query.actor_id.map(crate::types::ActorId::new),
        };
        core.get(id, &owner)
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(record.map(MemoryRecordDto::from)))
}

#[derive(Deserialize)]
struct UpdateMemoryRequest {
    content: Option<String>,
    metadata: Option<serde_json::Value>,
    identity: IdentityDto,
}

#[derive(Serialize)]
struct UpdateResult {
    updated: bool,
}

#[instrument(skip(state, request))]
async fn update_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateMemoryRequest>,
) -> ApiResult<UpdateResult> {
    let id = parse_memory_id(&id)?;
    let core = state.core.clone();
    let updated = tokio::task::spawn_blocking(move || {
        let owner: Owner = request.identity.into();
        core.update(id, &owner, request.content, request.metadata)
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(UpdateResult { updated }))
}

#[derive(Serialize)]
struct DeleteResult {
    deleted: bool,
}

#[instrument(skip(state))]
async fn delete_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<IdQuery>,
) -> ApiResult<DeleteResult> {
    let id = parse_memory_id(&id)?;
    let core = state.core.clone();
    let deleted = tokio::task::spawn_blocking(move || {
        let owner = Owner {
            user_id: query.user_id.map(crate::types::UserId::new),
            agent_id: query.agent_id.map(crate::types::AgentId::new),
            run_id: query.run_id.map(crate::types::RunId::new),
            actor_id: query.actor_id.map(crate::types::ActorId::new),
        };
        core.delete(id, &owner)
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(DeleteResult { deleted }))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    identity: IdentityDto,
    #[serde(default)]
    filters: Option<serde_json::Value>,
    #[serde(default = "default_search_limit")]
    limit: usize,
    threshold: Option<f32>,
    #[serde(default)]
    rerank: bool,
}

fn default_search_limit() -> usize {
    10
}

#[instrument(skip(state, request))]
async fn search_memories(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Vec<MemoryRecordDto>> {
    let core = state.core.clone();
    let records = tokio::task::spawn_blocking(move || -> Result<Vec<MemoryRecord>> {
        let owner: Owner = request.identity.into();
        // The §6 surface accepts an opaque `filters` object; this transport
        // doesn't expose the full filter DSL, only identity-scoped search.
        let filter: Option<Filter> = None;
        let _ = request.filters;
        core.search(
            &request.query,
            &owner,
            SearchOptions {
                filters: filter.as_ref(),
                limit: Some(request.limit),
                threshold: request.threshold,
                rerank: request.rerank,
            },
        )
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(records.into_iter().map(MemoryRecordDto::from).collect()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Serialize)]
struct SystemStatusResponse {
    embedder_configured: bool,
    llm_configured: bool,
    reranker_configured: bool,
    sparse_embedder_configured: bool,
    statistics: Statistics,
}

#[instrument(skip(state))]
async fn system_status(State(state): State<Arc<AppState>>) -> ApiResult<SystemStatusResponse> {
    let core = state.core.clone();
    let statistics = tokio::task::spawn_blocking(move || core.get_statistics(None))
        .await
        .map_err(blocking_panicked)??;

    Ok(Json(SystemStatusResponse {
        embedder_configured: true,
        llm_configured: state.core.config().llm.provider.as_str() != "",
        reranker_configured: state.core.config().reranker.is_some(),
        sparse_embedder_configured: state.core.config().sparse_embedder.is_some(),
        statistics,
    }))
}

#[derive(Deserialize)]
struct DeleteAllQuery {
    user_id: Option<String>,
    agent_id: Option<String>,
    run_id: Option<String>,
    actor_id: Option<String>,
}

#[derive(Serialize)]
struct DeleteAllResult {
    deleted: u64,
}

#[instrument(skip(state))]
async fn delete_all_memories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteAllQuery>,
) -> ApiResult<DeleteAllResult> {
    let core = state.core.clone();
    let deleted = tokio::task::spawn_blocking(move || {
        let owner = Owner {
            user_id: query.user_id.map(crate::types::UserId::new),
            agent_id: query.agent_id.map(crate::types::AgentId::new),
            run_id: query.run_id.map(crate::types::RunId::new),
            actor_id: query.actor_id.map(crate::types::ActorId::new),
        };
        core.delete_all(&owner)
    })
    .await
    .map_err(blocking_panicked)??;

    Ok(Json(DeleteAllResult { deleted }))
}

fn blocking_panicked(_: tokio::task::JoinError) -> ApiError {
    ApiError(crate::error::StorageError::corrupted("background task panicked").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope_accepts_known_values() {
        assert_eq!(parse_scope("private").unwrap(), Scope::Private);
        assert_eq!(parse_scope("public").unwrap(), Scope::Public);
    }

    #[test]
    fn test_parse_scope_rejects_unknown_value() {
        assert!(parse_scope("bogus").is_err());
    }

    #[test]
    fn test_parse_memory_id_rejects_non_numeric() {
        assert!(parse_memory_id("not-a-number").is_err());
    }

    #[test]
    fn test_identity_dto_converts_to_owner() {
        let dto = IdentityDto {
            user_id: Some("u1".to_string()),
            agent_id: None,
            run_id: None,
            actor_id: None,
        };
        let owner: Owner = dto.into();
        assert!(owner.user_id.is_some());
        assert!(owner.agent_id.is_none());
    }
}
