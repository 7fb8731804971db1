//! Provider registry: turns configuration into live provider handles.
//!
//! An explicit registration table, not a global mutable registry populated
//! at import time — every `build_*` function here is a pure function of a
//! [`Config`], called once by [`crate::core::MemoryCore::open`]'s
//! convenience constructor. No provider construction has import-time side
//! effects.
//!
//! Embedding is mandatory (every `add`/`search` call needs one); LLM,
//! sparse embedding, and reranking are all optional — their `build_*`
//! functions return `Ok(None)` when the corresponding config section is
//! absent or names the empty provider, letting the caller fail "at the
//! point of use" (§6) rather than at `open()` time.

use std::time::Duration;

use crate::config::{Config, EmbedderConfig, LlmConfig, RerankerConfig, SparseEmbedderConfig};
use crate::embedding::{EmbeddingService, ExternalEmbedding, LocalEmbedding, SparseEmbeddingService};
use crate::error::{ConfigError, Result};
use crate::llm::LlmClient;
use crate::rerank::RerankService;

/// Default request timeout for HTTP providers whose config section has no
/// dedicated timeout field (embedder, sparse embedder, reranker).
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

fn resolve_api_key(api_key_env: Option<&str>) -> Option<String> {
    api_key_env.and_then(|name| match std::env::var(name) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!(env_var = %name, "API key environment variable not set");
            None
        }
    })
}

/// Builds the mandatory dense embedding client from `config.embedder`.
///
/// Unlike `build_llm`/`build_reranker`, this never returns `None` — every
/// core needs an embedder to embed queries and facts. An unresolvable HTTP
/// endpoint or unknown provider name is a hard `ConfigError`; a provider
/// that's constructible but not yet wired up (`"local"`, pre-inference)
/// builds fine and only fails when `embed()` is actually called.
pub fn build_embedder(config: &Config) -> Result<Box<dyn EmbeddingService>> {
    let embedder: &EmbedderConfig = &config.embedder;
    let dimension = config.vector_store.dense_dimension.size() as u16;

    match embedder.provider.as_str() {
        "local" => Ok(Box::new(LocalEmbedding::with_dimension(dimension))),
        "external" => Ok(Box::new(ExternalEmbedding::new(dimension))),
        other => build_http_embedder(other, embedder, dimension),
    }
}

#[cfg(feature = "providers")]
fn build_http_embedder(
    provider: &str,
    embedder: &EmbedderConfig,
    dimension: u16,
) -> Result<Box<dyn EmbeddingService>> {
    use crate::embedding::HttpEmbedding;
    use crate::llm::Provider;

    let known = Provider::from_str(provider);
    let endpoint = embedder
        .endpoint
        .clone()
        .or_else(|| known.map(|p| p.default_endpoint().to_string()))
        .ok_or_else(|| ConfigError::missing("embedder.endpoint"))?;
    let model = embedder
        .model
        .clone()
        .or_else(|| known.map(|p| p.default_model().to_string()))
        .unwrap_or_else(|| provider.to_string());
    let api_key = resolve_api_key(embedder.api_key_env.as_deref());

    Ok(Box::new(HttpEmbedding::new(
        endpoint,
        model,
        api_key,
        dimension,
        DEFAULT_PROVIDER_TIMEOUT,
    )))
}

#[cfg(not(feature = "providers"))]
fn build_http_embedder(
    provider: &str,
    _embedder: &EmbedderConfig,
    _dimension: u16,
) -> Result<Box<dyn EmbeddingService>> {
    Err(ConfigError::invalid(format!(
        "embedder provider '{provider}' requires the `providers` feature"
    ))
    .into())
}

/// Builds the optional sparse embedding client from `config.sparse_embedder`.
///
/// Returns `Ok(None)` when the section is absent, matching hybrid search's
/// graceful dense-only degradation (§4.3/§4.4) when no sparse signal exists.
pub fn build_sparse_embedder(config: &Config) -> Result<Option<Box<dyn SparseEmbeddingService>>> {
    let Some(sparse): Option<&SparseEmbedderConfig> = config.sparse_embedder.as_ref() else {
        return Ok(None);
    };

    match sparse.provider.as_str() {
        "" => Ok(None),
        "local" => Ok(Some(Box::new(crate::embedding::LocalSparseEmbedding::new()))),
        other => Err(ConfigError::unknown_provider("sparse_embedder", other).into()),
    }
}

/// Builds the optional LLM client from `config.llm`.
///
/// Returns `Ok(None)` when `config.llm.provider` is empty, or when the
/// configured provider requires an API key whose environment variable
/// isn't set — both are "not configured" rather than hard errors, so
/// `Config::validate` stays permissive and `MemoryCore::add(infer=true)`
/// is the one that reports the missing LLM, at the point of use.
pub fn build_llm(config: &Config) -> Result<Option<Box<dyn LlmClient>>> {
    let llm: &LlmConfig = &config.llm;
    if llm.provider.is_empty() {
        return Ok(None);
    }
    build_http_llm(llm)
}

#[cfg(feature = "providers")]
fn build_http_llm(llm: &LlmConfig) -> Result<Option<Box<dyn LlmClient>>> {
    use crate::llm::{HttpLlmClient, Provider};

    let Some(provider) = Provider::from_str(&llm.provider) else {
        return Err(ConfigError::unknown_provider("llm", &llm.provider).into());
    };

    if llm.api_key_env.is_some() {
        let api_key = resolve_api_key(llm.api_key_env.as_deref());
        if api_key.is_none() {
            tracing::warn!(provider = %llm.provider, "LLM provider configured but no API key found, LLM calls will fail at point of use");
            return Ok(None);
        }
        let client = HttpLlmClient::new(
            provider,
            llm.model.clone(),
            llm.endpoint.clone(),
            api_key,
            Duration::from_millis(llm.timeout_ms),
        );
        Ok(Some(Box::new(client)))
    } else {
        let client = HttpLlmClient::new(
            provider,
            llm.model.clone(),
            llm.endpoint.clone(),
            None,
            Duration::from_millis(llm.timeout_ms),
        );
        Ok(Some(Box::new(client)))
    }
}

#[cfg(not(feature = "providers"))]
fn build_http_llm(llm: &LlmConfig) -> Result<Option<Box<dyn LlmClient>>> {
    Err(ConfigError::invalid(format!(
        "llm provider '{}' requires the `providers` feature",
        llm.provider
    ))
    .into())
}

/// Builds the optional reranker client from `config.reranker`.
///
/// Returns `Ok(None)` when the section is absent or names the empty
/// provider; `MemoryCore::search` treats the absence as "rerank requested
/// but unavailable" and silently skips reranking (§4's failure model).
pub fn build_reranker(config: &Config) -> Result<Option<Box<dyn RerankService>>> {
    let Some(reranker): Option<&RerankerConfig> = config.reranker.as_ref() else {
        return Ok(None);
    };
    if reranker.provider.is_empty() {
        return Ok(None);
    }
    build_http_reranker(reranker)
}

#[cfg(feature = "providers")]
fn build_http_reranker(reranker: &RerankerConfig) -> Result<Option<Box<dyn RerankService>>> {
    use crate::rerank::HttpReranker;

    let endpoint = reranker
        .endpoint
        .clone()
        .ok_or_else(|| ConfigError::missing("reranker.endpoint"))?;
    let model = reranker.model.clone().unwrap_or_else(|| reranker.provider.clone());
    let api_key = resolve_api_key(reranker.api_key_env.as_deref());

    Ok(Some(Box::new(HttpReranker::new(
        endpoint,
        model,
        api_key,
        DEFAULT_PROVIDER_TIMEOUT,
    ))))
}

#[cfg(not(feature = "providers"))]
fn build_http_reranker(reranker: &RerankerConfig) -> Result<Option<Box<dyn RerankService>>> {
    Err(ConfigError::invalid(format!(
        "reranker provider '{}' requires the `providers` feature",
        reranker.provider
    ))
    .into())
}

/// Builds every provider handle a [`crate::core::MemoryCore`] needs from one
/// `Config`, for callers who want config-driven wiring rather than
/// constructing [`crate::core::CoreHandles`] by hand.
pub fn build_handles(config: &Config) -> Result<crate::core::CoreHandles> {
    Ok(crate::core::CoreHandles {
        embedder: build_embedder(config)?,
        sparse_embedder: build_sparse_embedder(config)?,
        llm: build_llm(config)?,
        reranker: build_reranker(config)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingDimension;

    #[test]
    fn test_build_embedder_local_uses_configured_dimension() {
        let config = Config {
            embedder: EmbedderConfig {
                provider: "local".to_string(),
                ..Default::default()
            },
            vector_store: crate::config::VectorStoreConfig {
                dense_dimension: EmbeddingDimension::Custom(512),
                ..Default::default()
            },
            ..Default::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 512);
    }

    #[test]
    fn test_build_embedder_external() {
        let config = Config {
            embedder: EmbedderConfig {
                provider: "external".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn test_build_sparse_embedder_absent_returns_none() {
        let config = Config::default();
        assert!(build_sparse_embedder(&config).unwrap().is_none());
    }

    #[test]
    fn test_build_sparse_embedder_local() {
        let config = Config {
            sparse_embedder: Some(SparseEmbedderConfig {
                provider: "local".to_string(),
                model: None,
            }),
            ..Default::default()
        };
        assert!(build_sparse_embedder(&config).unwrap().is_some());
    }

    #[test]
    fn test_build_sparse_embedder_unknown_provider_errors() {
        let config = Config {
            sparse_embedder: Some(SparseEmbedderConfig {
                provider: "bogus".to_string(),
                model: None,
            }),
            ..Default::default()
        };
        let err = build_sparse_embedder(&config).unwrap_err();
        assert!(matches!(err, crate::error::AgentMemError::Config(_)));
    }

    #[test]
    fn test_build_llm_empty_provider_returns_none() {
        let config = Config {
            llm: LlmConfig {
                provider: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(build_llm(&config).unwrap().is_none());
    }

    #[test]
    fn test_build_reranker_absent_returns_none() {
        let config = Config::default();
        assert!(build_reranker(&config).unwrap().is_none());
    }

    #[test]
    fn test_build_reranker_empty_provider_returns_none() {
        let config = Config {
            reranker: Some(RerankerConfig {
                provider: String::new(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(build_reranker(&config).unwrap().is_none());
    }
}
