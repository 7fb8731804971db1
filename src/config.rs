//! Hierarchical configuration for AgentMem.
//!
//! [`Config`] is the single configuration tree for the whole service: one
//! struct, one loader ([`Config::from_json`] / [`Config::from_file`]), env
//! vars mapped by a documented `AGENTMEM_*` convention (see [`Config::from_env`]).
//! Unknown top-level keys are tolerated and logged as a warning rather than
//! rejected, unless [`Config::strict`] is set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, Result};

/// The full configuration tree.
///
/// Every field has a default, so `Config::default()` produces a usable
/// (if minimal-capability) configuration: in-process HNSW vector storage,
/// no LLM/reranker configured (ingest/reconcile calls that need one will
/// fail at the point of use, not at load time).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage engine and vector index settings.
    pub vector_store: VectorStoreConfig,
    /// LLM client settings (fact extraction, reconciliation).
    pub llm: LlmConfig,
    /// Dense embedding client settings.
    pub embedder: EmbedderConfig,
    /// Sparse embedding client settings, if hybrid sparse retrieval is enabled.
    pub sparse_embedder: Option<SparseEmbedderConfig>,
    /// Reranker client settings, if result reranking is enabled.
    pub reranker: Option<RerankerConfig>,
    /// Knowledge-graph store settings. Not implemented by the core (see
    /// the crate's Non-goals); carried so config files that set it don't
    /// fail to load.
    pub graph_store: Option<GraphStoreConfig>,
    /// Agent-memory collaboration layer settings (adjacent, not read by the core).
    pub agent_memory: AgentMemoryConfig,
    /// Decay-aware "intelligent memory" layer settings (adjacent, not read by the core).
    pub intelligent_memory: IntelligentMemoryConfig,
    /// Memory decay scoring settings (adjacent, not read by the core).
    pub memory_decay: MemoryDecayConfig,
    /// Audit log settings (adjacent; the core emits tracing events, this
    /// section only configures whether/where an external audit sink listens).
    pub audit: AuditConfig,
    /// Telemetry settings (adjacent; no metrics backend is wired by the core).
    pub telemetry: TelemetryConfig,
    /// Structured logging settings.
    pub logging: LoggingConfig,
    /// When true, unknown top-level configuration keys are a hard error
    /// instead of a warning.
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store: VectorStoreConfig::default(),
            llm: LlmConfig::default(),
            embedder: EmbedderConfig::default(),
            sparse_embedder: None,
            reranker: None,
            graph_store: None,
            agent_memory: AgentMemoryConfig::default(),
            intelligent_memory: IntelligentMemoryConfig::default(),
            memory_decay: MemoryDecayConfig::default(),
            audit: AuditConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
            strict: false,
        }
    }
}

impl Config {
    /// Creates a new `Config` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration tree from a JSON document.
    ///
    /// Unknown top-level keys are logged as a warning and ignored unless
    /// the document itself sets `"strict": true`, in which case they are
    /// rejected with a [`ConfigError`].
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| ConfigError::invalid(format!("invalid JSON: {e}")))?;
        Self::from_value(raw)
    }

    /// Loads a configuration tree from a JSON file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    fn from_value(raw: Value) -> Result<Self> {
        let known_keys = known_top_level_keys();
        let strict = raw
            .get("strict")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Value::Object(map) = &raw {
            let unknown: Vec<&String> = map.keys().filter(|k| !known_keys.contains(&k.as_str())).collect();
            if !unknown.is_empty() {
                if strict {
                    return Err(ConfigError::invalid(format!(
                        "unknown configuration keys: {unknown:?}"
                    ))
                    .into());
                }
                warn!(keys = ?unknown, "ignoring unknown configuration keys");
            }
        }

        let config: Config = serde_json::from_value(raw)
            .map_err(|e| ConfigError::invalid(format!("configuration did not match schema: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `vector_store.cache_size_mb` is 0, any
    /// HNSW parameter is 0, a custom dense dimension is out of `1..=4096`,
    /// or an `llm`/`embedder` provider name is empty.
    pub fn validate(&self) -> Result<()> {
        self.vector_store.validate()?;

        if self.llm.provider.trim().is_empty() {
            return Err(ConfigError::missing("llm.provider").into());
        }
        if self.embedder.provider.trim().is_empty() {
            return Err(ConfigError::missing("embedder.provider").into());
        }
        if let Some(sparse) = &self.sparse_embedder {
            if sparse.provider.trim().is_empty() {
                return Err(ConfigError::missing("sparse_embedder.provider").into());
            }
        }
        if let Some(reranker) = &self.reranker {
            if reranker.provider.trim().is_empty() {
                return Err(ConfigError::missing("reranker.provider").into());
            }
        }
        Ok(())
    }
}

fn known_top_level_keys() -> [&'static str; 13] {
    [
        "vector_store",
        "llm",
        "embedder",
        "sparse_embedder",
        "reranker",
        "graph_store",
        "agent_memory",
        "intelligent_memory",
        "memory_decay",
        "audit",
        "telemetry",
        "logging",
        "strict",
    ]
}

/// Storage engine and vector index configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Path to the embedded database file.
    pub path: PathBuf,
    /// Default dense embedding dimension for newly created collections.
    pub dense_dimension: EmbeddingDimension,
    /// Distance metric used for dense vector search.
    pub distance_metric: DistanceMetric,
    /// Cache size in megabytes for the storage engine.
    pub cache_size_mb: usize,
    /// Durability mode for write operations.
    pub sync_mode: SyncMode,
    /// HNSW vector index parameters.
    pub hnsw: HnswConfig,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("agentmem.db"),
            dense_dimension: EmbeddingDimension::D384,
            distance_metric: DistanceMetric::Cosine,
            cache_size_mb: 64,
            sync_mode: SyncMode::Normal,
            hnsw: HnswConfig::default(),
        }
    }
}

impl VectorStoreConfig {
    fn validate(&self) -> Result<()> {
        if self.cache_size_mb == 0 {
            return Err(ConfigError::invalid("vector_store.cache_size_mb must be greater than 0").into());
        }
        if self.hnsw.max_nb_connection == 0 {
            return Err(ConfigError::invalid("vector_store.hnsw.max_nb_connection must be greater than 0").into());
        }
        if self.hnsw.ef_construction == 0 {
            return Err(ConfigError::invalid("vector_store.hnsw.ef_construction must be greater than 0").into());
        }
        if self.hnsw.ef_search == 0 {
            return Err(ConfigError::invalid("vector_store.hnsw.ef_search must be greater than 0").into());
        }
        if let EmbeddingDimension::Custom(dim) = self.dense_dimension {
            if dim == 0 || dim > 4096 {
                return Err(ConfigError::invalid(
                    "vector_store.dense_dimension custom value must be in 1..=4096",
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Embedding vector dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDimension {
    /// 384 dimensions (e.g. all-MiniLM-L6-v2).
    #[default]
    D384,
    /// 768 dimensions (e.g. bge-base-en-v1.5).
    D768,
    /// Custom dimension, must be in `1..=4096`.
    Custom(usize),
}

impl EmbeddingDimension {
    /// Returns the numeric size of this dimension.
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::D384 => 384,
            Self::D768 => 768,
            Self::Custom(n) => *n,
        }
    }
}

/// Distance metric for dense vector search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine distance (0.0 identical, 2.0 opposite).
    #[default]
    Cosine,
    /// Squared Euclidean (L2) distance.
    Euclidean,
    /// Negative dot product.
    DotProduct,
}

/// Durability mode for write operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit. Default and recommended.
    #[default]
    Normal,
    /// Async sync, faster writes, may lose the last few seconds on crash.
    Fast,
    /// Sync every write operation. Slowest, maximum durability.
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode syncs on every write.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }
    /// Returns true if this mode is async (may lose data on crash).
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}

/// HNSW vector index tuning parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum bidirectional connections per node (M parameter).
    pub max_nb_connection: usize,
    /// Candidates tracked during index construction.
    pub ef_construction: usize,
    /// Candidates tracked during search.
    pub ef_search: usize,
    /// Maximum number of layers in the skip-list structure.
    pub max_layer: usize,
    /// Initial pre-allocated capacity (number of vectors).
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layer: 16,
            max_elements: 10_000,
        }
    }
}

/// LLM client configuration (fact extraction, reconciliation).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name, resolved against the closed set in [`crate::llm::Provider`].
    pub provider: String,
    /// Model name; if `None`, the provider's default model is used.
    pub model: Option<String>,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    /// Override endpoint (for self-hosted / OpenAI-compatible providers).
    pub endpoint: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

/// Dense embedding client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Provider name (e.g. "openai", "local").
    pub provider: String,
    /// Model name; if `None`, the provider's default model is used.
    pub model: Option<String>,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    /// Override endpoint.
    pub endpoint: Option<String>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            api_key_env: None,
            endpoint: None,
        }
    }
}

/// Sparse embedding client configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseEmbedderConfig {
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: Option<String>,
}

/// Reranker client configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: Option<String>,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    /// Override endpoint.
    pub endpoint: Option<String>,
}

/// Knowledge-graph store configuration. Parsed but never acted on by the
/// core (see the crate's Non-goals: not a knowledge-graph reasoner).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphStoreConfig {
    /// Provider name.
    pub provider: String,
}

/// Agent-memory collaboration layer settings. Adjacent to the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentMemoryConfig {
    /// Whether the adjacent agent-memory collaboration layer is enabled.
    pub enabled: bool,
}

impl Default for AgentMemoryConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Decay-aware "intelligent memory" layer settings. Adjacent to the core;
/// the core always runs the plain reconcile path regardless of this value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligentMemoryConfig {
    /// Whether the adjacent decay-aware layer is enabled.
    pub enabled: bool,
}

impl Default for IntelligentMemoryConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Memory decay scoring settings. Adjacent to the core; carried but never read.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDecayConfig {
    /// Half-life, in days, for an external decay-scoring layer to apply.
    pub half_life_days: Option<f64>,
}

/// Audit log settings. Adjacent to the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether audit events are emitted (as `tracing` events; see
    /// [`LoggingConfig`] for the sink).
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Telemetry settings. Adjacent to the core; no metrics backend is wired.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether telemetry counters are emitted (as `tracing` events).
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Structured logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum log level.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
        }
    }
}

/// Logging verbosity level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the `tracing`/`EnvFilter`-compatible string for this level.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plain text.
    #[default]
    Plain,
    /// Structured JSON, one event per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_cache_size() {
        let mut config = Config::default();
        config.vector_store.cache_size_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_custom_dimension_out_of_range() {
        let mut config = Config::default();
        config.vector_store.dense_dimension = EmbeddingDimension::Custom(0);
        assert!(config.validate().is_err());

        config.vector_store.dense_dimension = EmbeddingDimension::Custom(5000);
        assert!(config.validate().is_err());

        config.vector_store.dense_dimension = EmbeddingDimension::Custom(1536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_llm_provider() {
        let mut config = Config::default();
        config.llm.provider = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_round_trips_defaults() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        let reloaded = Config::from_json(&json).unwrap();
        assert_eq!(reloaded.embedder.provider, Config::default().embedder.provider);
    }

    #[test]
    fn from_json_tolerates_unknown_keys_by_default() {
        let json = r#"{"not_a_real_section": {"x": 1}}"#;
        assert!(Config::from_json(json).is_ok());
    }

    #[test]
    fn from_json_rejects_unknown_keys_when_strict() {
        let json = r#"{"strict": true, "not_a_real_section": {"x": 1}}"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn embedding_dimension_sizes() {
        assert_eq!(EmbeddingDimension::D384.size(), 384);
        assert_eq!(EmbeddingDimension::D768.size(), 768);
        assert_eq!(EmbeddingDimension::Custom(512).size(), 512);
    }

    #[test]
    fn sync_mode_predicates() {
        assert!(!SyncMode::Normal.is_fast());
        assert!(SyncMode::Fast.is_fast());
        assert!(SyncMode::Paranoid.is_paranoid());
    }

    #[test]
    fn log_level_filter_strings() {
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
    }
}
