//! Reranker client abstraction.
//!
//! An optional post-retrieval step: given a query and a candidate list,
//! score each candidate's relevance and return them reordered. Used by
//! `crate::core::MemoryCore::search` when `rerank=true` and a reranker is
//! configured (§4's "search" operation, M default 3 — the caller fetches
//! `M * limit` candidates before reranking down to `limit`).

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One reranked candidate: its original index into the input slice, plus
/// the reranker's relevance score (higher is more relevant).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RerankResult {
    /// Index into the `documents` slice passed to `rerank`.
    pub index: usize,
    /// Relevance score assigned by the reranker.
    pub score: f32,
}

/// Reranker client trait.
///
/// Implementations must be `Send + Sync`. A reranker failure degrades to
/// skip-rerank at the call site (§4's failure model) rather than failing
/// the whole search — this trait itself just reports the error, callers
/// decide whether to degrade.
pub trait RerankService: Send + Sync {
    /// Scores `documents` against `query`, returning up to `top_n` results
    /// sorted by descending score.
    fn rerank(&self, query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RerankResult>>;
}

#[cfg(feature = "providers")]
pub use http::HttpReranker;

#[cfg(feature = "providers")]
mod http {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::{RerankResult, RerankService};
    use crate::error::{ProviderError, Result};

    /// HTTP-backed reranker speaking the Cohere-style `/rerank` shape
    /// (`{"model","query","documents","top_n"}` in,
    /// `{"results":[{"index","relevance_score"}]}` out) — the de facto
    /// convention shared by Cohere, Jina, and most self-hosted rerank
    /// servers.
    pub struct HttpReranker {
        agent: ureq::Agent,
        endpoint: String,
        model: String,
        api_key: Option<String>,
    }

    impl HttpReranker {
        /// Creates a new HTTP reranker client.
        pub fn new(
            endpoint: impl Into<String>,
            model: impl Into<String>,
            api_key: Option<String>,
            timeout: Duration,
        ) -> Self {
            let agent = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .build()
                .into();

            Self {
                agent,
                endpoint: endpoint.into(),
                model: model.into(),
                api_key,
            }
        }
    }

    impl RerankService for HttpReranker {
        fn rerank(&self, query: &str, documents: &[&str], top_n: usize) -> Result<Vec<RerankResult>> {
            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let url = format!("{}/rerank", self.endpoint.trim_end_matches('/'));
            let body = RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n,
            };

            let mut req = self.agent.post(&url).header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", &format!("Bearer {key}"));
            }

            let response = req.send_json(&body).map_err(|e| ProviderError::RequestFailed {
                provider: "rerank".to_string(),
                reason: e.to_string(),
            })?;

            let parsed: RerankResponse =
                response
                    .into_body()
                    .read_json()
                    .map_err(|e| ProviderError::RequestFailed {
                        provider: "rerank".to_string(),
                        reason: format!("invalid response body: {e}"),
                    })?;

            let mut results: Vec<RerankResult> = parsed
                .results
                .into_iter()
                .map(|r| RerankResult {
                    index: r.index,
                    score: r.relevance_score,
                })
                .collect();
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            results.truncate(top_n);
            Ok(results)
        }
    }

    #[derive(Serialize)]
    struct RerankRequest<'a> {
        model: &'a str,
        query: &'a str,
        documents: &'a [&'a str],
        top_n: usize,
    }

    #[derive(Deserialize)]
    struct RerankResponse {
        results: Vec<RerankResponseItem>,
    }

    #[derive(Deserialize)]
    struct RerankResponseItem {
        index: usize,
        relevance_score: f32,
    }

}

/// A rerank result set, kept for symmetry with serialized API responses
/// even though callers usually work with `Vec<RerankResult>` directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RerankOutput {
    /// Reranked results, descending by score.
    pub results: Vec<RerankResultOwned>,
}

/// Owned, serializable counterpart to [`RerankResult`] for API/CLI output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerankResultOwned {
    /// Index into the original candidate list.
    pub index: usize,
    /// Relevance score.
    pub score: f32,
}

impl From<RerankResult> for RerankResultOwned {
    fn from(r: RerankResult) -> Self {
        Self {
            index: r.index,
            score: r.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerank_result_owned_conversion() {
        let r = RerankResult { index: 2, score: 0.9 };
        let owned: RerankResultOwned = r.into();
        assert_eq!(owned.index, 2);
        assert_eq!(owned.score, 0.9);
    }
}
