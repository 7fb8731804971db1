//! Hybrid Query Planner (§4.4).
//!
//! `hybrid_search` can be answered two ways: a single engine call that
//! fuses dense + fulltext (+ sparse) internally ("native"), or three
//! separate per-signal calls fused client-side by Reciprocal Rank Fusion
//! ("fallback"). [`plan`] is the pure decision function extracted out of
//! what would otherwise be a conditional buried in the storage layer —
//! both [`crate::storage::RedbStorage::hybrid_search`] and any future
//! native-capable backend feed their signal results through the same
//! [`reciprocal_rank_fusion`], so native-vs-fallback equivalence (same
//! weights, same tie-break) isn't something either path can drift from.

use std::collections::HashMap;

use crate::filter::Filter;
use crate::memory::MemoryRecord;
use crate::storage::{ScoredMemory, StorageCapabilities};
use crate::types::MemoryId;

/// RRF constant, fixed per §4.4 (`score(r) = Σ w_s / (k + rank_s(r))`).
const RRF_K: f32 = 60.0;

/// Which path a hybrid search should take.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanDecision {
    /// Execute as one fused engine call.
    Native,
    /// Execute as three per-signal calls, fused client-side. `reason` is
    /// logged at debug by the caller — never surfaced to the end user,
    /// the public contract is identical either way.
    Fallback {
        /// Why the native path was rejected.
        reason: String,
    },
}

/// The planner's view of a `hybrid_search` call — just enough to decide
/// eligibility, not the full query (no need for the embedding/text itself).
#[derive(Clone, Debug, Default)]
pub struct PlanRequest<'a> {
    /// Whether a sparse signal was requested alongside dense + fulltext.
    pub sparse_requested: bool,
    /// The caller's `threshold` argument, if any.
    pub threshold: Option<f32>,
    /// The filter tree to apply, if any.
    pub filter: Option<&'a Filter>,
}

/// Decides between the native and fallback hybrid search paths.
///
/// Native eligibility (§4.4) requires all of:
///   1. the engine supports the fused primitive (`capabilities.native_hybrid`),
///   2. if sparse is requested, the collection indexes sparse embeddings,
///   3. no `threshold` argument was given,
///   4. every filter leaf targets a column field, not a metadata path.
pub fn plan(capabilities: StorageCapabilities, request: &PlanRequest<'_>) -> PlanDecision {
    if !capabilities.native_hybrid {
        return PlanDecision::Fallback {
            reason: "engine does not support native hybrid fusion".to_string(),
        };
    }
    if request.sparse_requested && !capabilities.supports_sparse {
        return PlanDecision::Fallback {
            reason: "sparse signal requested but collection has no sparse index".to_string(),
        };
    }
    if request.threshold.is_some() {
        return PlanDecision::Fallback {
            reason: "threshold argument forces client-side fusion".to_string(),
        };
    }
    if let Some(filter) = request.filter {
        if !filter.is_all_column_fields() {
            return PlanDecision::Fallback {
                reason: "filter references a metadata path, not a column field".to_string(),
            };
        }
    }
    PlanDecision::Native
}

/// Fuses per-signal result sets by weighted Reciprocal Rank Fusion.
///
/// `signals` is `(hits, weight)` pairs, one per active signal (dense,
/// fulltext, sparse); a signal that wasn't queried is simply omitted
/// rather than passed as an empty vec. Ties broken by descending `id`
/// (newer first), per §4.3's tie-breaking rule.
pub fn reciprocal_rank_fusion(signals: &[(Vec<ScoredMemory>, f32)], k: usize) -> Vec<ScoredMemory> {
    let mut fused: HashMap<MemoryId, (MemoryRecord, f32)> = HashMap::new();

    for (hits, weight) in signals {
        for (rank, hit) in hits.iter().enumerate() {
            let contribution = weight / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(hit.record.id)
                .and_modify(|(_, score)| *score += contribution)
                .or_insert_with(|| (hit.record.clone(), contribution));
        }
    }

    let mut scored: Vec<ScoredMemory> = fused
        .into_values()
        .map(|(record, score)| ScoredMemory { record, score })
        .collect();
    sort_fused(&mut scored);
    scored.truncate(k);
    scored
}

fn sort_fused(scored: &mut [ScoredMemory]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.id.as_u64().cmp(&a.record.id.as_u64()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ColumnField;
    use crate::types::{MemoryId, Owner, Scope, Timestamp};

    fn capabilities(native_hybrid: bool, supports_sparse: bool) -> StorageCapabilities {
        StorageCapabilities {
            native_hybrid,
            supports_sparse,
        }
    }

    #[test]
    fn test_plan_native_when_all_conditions_hold() {
        let caps = capabilities(true, true);
        let request = PlanRequest {
            sparse_requested: true,
            threshold: None,
            filter: None,
        };
        assert_eq!(plan(caps, &request), PlanDecision::Native);
    }

    #[test]
    fn test_plan_fallback_when_engine_lacks_native_hybrid() {
        let caps = capabilities(false, true);
        let request = PlanRequest::default();
        assert!(matches!(plan(caps, &request), PlanDecision::Fallback { .. }));
    }

    #[test]
    fn test_plan_fallback_when_sparse_requested_but_unsupported() {
        let caps = capabilities(true, false);
        let request = PlanRequest {
            sparse_requested: true,
            ..Default::default()
        };
        assert!(matches!(plan(caps, &request), PlanDecision::Fallback { .. }));
    }

    #[test]
    fn test_plan_fallback_when_threshold_given() {
        let caps = capabilities(true, true);
        let request = PlanRequest {
            threshold: Some(0.5),
            ..Default::default()
        };
        assert!(matches!(plan(caps, &request), PlanDecision::Fallback { .. }));
    }

    #[test]
    fn test_plan_native_with_column_only_filter() {
        let caps = capabilities(true, true);
        let filter = Filter::column_eq(ColumnField::Category, "work");
        let request = PlanRequest {
            filter: Some(&filter),
            ..Default::default()
        };
        assert_eq!(plan(caps, &request), PlanDecision::Native);
    }

    #[test]
    fn test_plan_fallback_with_metadata_path_filter() {
        let caps = capabilities(true, true);
        let filter = Filter::metadata_eq("project.name", "acme");
        let request = PlanRequest {
            filter: Some(&filter),
            ..Default::default()
        };
        assert!(matches!(plan(caps, &request), PlanDecision::Fallback { .. }));
    }

    #[test]
    fn test_plan_fallback_with_mixed_and_filter() {
        let caps = capabilities(true, true);
        let filter = Filter::And(vec![
            Filter::column_eq(ColumnField::Category, "work"),
            Filter::metadata_eq("project.name", "acme"),
        ]);
        let request = PlanRequest {
            filter: Some(&filter),
            ..Default::default()
        };
        assert!(matches!(plan(caps, &request), PlanDecision::Fallback { .. }));
    }

    fn sample_record(id: u64) -> MemoryRecord {
        MemoryRecord {
            id: MemoryId::from_raw(id),
            content: "content".to_string(),
            hash: 0,
            dense_embedding: Vec::new(),
            sparse_embedding: None,
            owner: Owner::user("u1"),
            scope: Scope::Private,
            category: None,
            memory_type: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn test_rrf_fuses_and_sorts_by_score_descending() {
        let dense = vec![
            ScoredMemory {
                record: sample_record(1),
                score: 0.9,
            },
            ScoredMemory {
                record: sample_record(2),
                score: 0.5,
            },
        ];
        let fulltext = vec![
            ScoredMemory {
                record: sample_record(2),
                score: 3.0,
            },
            ScoredMemory {
                record: sample_record(1),
                score: 1.0,
            },
        ];

        let fused = reciprocal_rank_fusion(&[(dense, 1.0), (fulltext, 1.0)], 10);
        assert_eq!(fused.len(), 2);
        // Both records appear in both signals at different ranks; id 1 is
        // rank 0 in dense + rank 1 in fulltext, id 2 is rank 1 in dense +
        // rank 0 in fulltext — symmetric, so scores tie and descending id
        // wins the tie-break.
        assert_eq!(fused[0].record.id, MemoryId::from_raw(2));
    }

    #[test]
    fn test_rrf_respects_weights() {
        let dense = vec![ScoredMemory {
            record: sample_record(1),
            score: 0.9,
        }];
        let fulltext = vec![ScoredMemory {
            record: sample_record(2),
            score: 0.9,
        }];

        let fused = reciprocal_rank_fusion(&[(dense, 10.0), (fulltext, 0.1)], 10);
        assert_eq!(fused[0].record.id, MemoryId::from_raw(1));
    }

    #[test]
    fn test_rrf_truncates_to_k() {
        let hits: Vec<ScoredMemory> = (1..=5)
            .map(|i| ScoredMemory {
                record: sample_record(i),
                score: 1.0 / i as f32,
            })
            .collect();
        let fused = reciprocal_rank_fusion(&[(hits, 1.0)], 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_rrf_empty_signals_returns_empty() {
        let fused = reciprocal_rank_fusion(&[], 10);
        assert!(fused.is_empty());
    }
}
