//! The top-k query-plan hook.
//!
//! The host planner detects the shape
//!
//! ```sql
//! SELECT … FROM t [WHERE …] ORDER BY dist_expr [ASC] LIMIT k [OFFSET o]
//! ```
//!
//! and offers it here before falling back to its default executor. The
//! hook never errors the query: anything it cannot serve becomes a
//! [`PlanDecision::FullScan`] carrying the EXPLAIN diagnostic.

use super::ddl;
use crate::error::Result;
use crate::index::IndexKey;
use crate::metric::Metric;
use crate::registry::IndexRegistry;

/// Pre-filters estimated below this selectivity run filter-then-rank on
/// the exact path instead of probing the ANN index.
pub const SELECTIVITY_THRESHOLD: f64 = 0.01;

/// The candidate query shape the host planner hands over.
#[derive(Debug, Clone)]
pub struct QueryShape<'a> {
    /// Table being scanned.
    pub table: &'a str,
    /// The ORDER BY expression, textually.
    pub order_by: &'a str,
    /// True for `ASC` (or no direction, which SQL defaults to `ASC`).
    pub ascending: bool,
    /// `LIMIT k`.
    pub limit: usize,
    /// `OFFSET o` (0 when absent).
    pub offset: usize,
    /// Planner's selectivity estimate for the WHERE clause, as a fraction
    /// of table rows expected to pass; `None` when there is no filter.
    pub prefilter_selectivity: Option<f64>,
}

/// The hook's verdict on one query shape.
#[derive(Debug, Clone)]
pub enum PlanDecision {
    /// Probe the ANN index for `fetch = k + o` candidates, then project.
    IndexProbe {
        /// Index to probe.
        key: IndexKey,
        /// Metric resolved from the expression.
        metric: Metric,
        /// Candidates to request.
        fetch: usize,
    },
    /// Highly selective pre-filter: evaluate the filter first and rank
    /// the survivors exactly with the same kernel.
    FilterThenRank {
        /// Index whose metric/descriptor drives the ranking.
        key: IndexKey,
        /// Metric resolved from the expression.
        metric: Metric,
        /// Final rows wanted (`k + o`).
        fetch: usize,
    },
    /// Not served: the default executor scans with the same kernel. The
    /// diagnostic surfaces in EXPLAIN output; this is not an error.
    FullScan {
        /// Human-readable reason.
        explain: String,
    },
}

/// Plan-rewrite hook bound to one registry.
pub struct PlanHook<'r> {
    registry: &'r IndexRegistry,
}

impl<'r> PlanHook<'r> {
    /// Binds the hook to a registry.
    #[must_use]
    pub fn new(registry: &'r IndexRegistry) -> Self {
        Self { registry }
    }

    /// Decides how to execute a candidate top-k shape.
    ///
    /// # Errors
    ///
    /// Never fails on "cannot serve" conditions (those are
    /// [`PlanDecision::FullScan`]); errors are reserved for genuinely
    /// malformed expression text the host should not have offered.
    pub fn rewrite(&self, shape: &QueryShape<'_>) -> Result<PlanDecision> {
        let Some(call) = ddl::parse_distance_expr(shape.order_by)? else {
            return Ok(self.decline(format!(
                "ORDER BY expression '{}' is not a recognized distance call",
                shape.order_by
            )));
        };

        if !shape.ascending {
            return Ok(self.decline(
                "descending distance order asks for the farthest rows; ANN indexes only \
                 serve nearest"
                    .to_string(),
            ));
        }

        let key = IndexKey::new(shape.table, call.column.clone());
        let Ok(descriptor) = self.registry.descriptor(&key) else {
            return Ok(self.decline(format!("no vector index on {key}; scanning")));
        };

        if descriptor.metric != call.metric {
            return Ok(self.decline(format!(
                "index on {key} uses metric '{}' but the query asks for '{}'",
                descriptor.metric.name(),
                call.metric.name()
            )));
        }

        let fetch = shape.limit.saturating_add(shape.offset);
        if let Some(selectivity) = shape.prefilter_selectivity {
            if selectivity < SELECTIVITY_THRESHOLD {
                return Ok(PlanDecision::FilterThenRank {
                    key,
                    metric: call.metric,
                    fetch,
                });
            }
        }

        Ok(PlanDecision::IndexProbe {
            key,
            metric: call.metric,
            fetch,
        })
    }

    fn decline(&self, explain: String) -> PlanDecision {
        log::debug!("plan hook declined: {explain}");
        PlanDecision::FullScan { explain }
    }
}

/// EXPLAIN helper: one line describing the decision.
#[must_use]
pub fn explain_decision(decision: &PlanDecision) -> String {
    match decision {
        PlanDecision::IndexProbe { key, metric, fetch } => {
            format!("VECTOR INDEX PROBE {key} (metric={}, fetch={fetch})", metric.name())
        }
        PlanDecision::FilterThenRank { key, metric, fetch } => {
            format!(
                "FILTER THEN RANK via {key} (metric={}, fetch={fetch})",
                metric.name()
            )
        }
        PlanDecision::FullScan { explain } => format!("FULL SCAN ({explain})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtensionConfig;
    use crate::index::{HnswParams, IndexDescriptor, IndexKind};
    use crate::persistence::MemoryBackend;
    use crate::quantization::Quantization;
    use std::sync::Arc;

    fn registry_with_index(metric: Metric) -> IndexRegistry {
        let registry =
            IndexRegistry::new(ExtensionConfig::default(), Arc::new(MemoryBackend::new()));
        registry
            .create_index(
                IndexDescriptor {
                    key: IndexKey::new("docs", "embedding"),
                    kind: IndexKind::Hnsw,
                    metric,
                    quantization: Quantization::None,
                    dimension: 4,
                    params: HnswParams::default().with_seed(3),
                },
                0,
            )
            .unwrap();
        registry
    }

    fn shape<'a>(order_by: &'a str, limit: usize, offset: usize) -> QueryShape<'a> {
        QueryShape {
            table: "docs",
            order_by,
            ascending: true,
            limit,
            offset,
            prefilter_selectivity: None,
        }
    }

    #[test]
    fn recognized_shape_probes_the_index() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        let decision = hook
            .rewrite(&shape("distance_cosine(embedding, :q)", 10, 5))
            .unwrap();
        match decision {
            PlanDecision::IndexProbe { key, metric, fetch } => {
                assert_eq!(key, IndexKey::new("docs", "embedding"));
                assert_eq!(metric, Metric::Cosine);
                assert_eq!(fetch, 15);
            }
            other => panic!("expected probe, got {other:?}"),
        }
    }

    #[test]
    fn missing_index_falls_back_with_diagnostic() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        let decision = hook
            .rewrite(&shape("distance_cosine(body, :q)", 10, 0))
            .unwrap();
        match decision {
            PlanDecision::FullScan { explain } => {
                assert!(explain.contains("docs.body"), "{explain}");
            }
            other => panic!("expected full scan, got {other:?}"),
        }
    }

    #[test]
    fn metric_mismatch_declines() {
        let registry = registry_with_index(Metric::L2);
        let hook = PlanHook::new(&registry);
        let decision = hook
            .rewrite(&shape("distance_cosine(embedding, :q)", 10, 0))
            .unwrap();
        assert!(matches!(decision, PlanDecision::FullScan { .. }));
    }

    #[test]
    fn descending_order_declines() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        let mut s = shape("distance_cosine(embedding, :q)", 10, 0);
        s.ascending = false;
        assert!(matches!(
            hook.rewrite(&s).unwrap(),
            PlanDecision::FullScan { .. }
        ));
    }

    #[test]
    fn selective_prefilter_switches_to_filter_then_rank() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        let mut s = shape("distance_cosine(embedding, :q)", 10, 0);
        s.prefilter_selectivity = Some(0.001);
        assert!(matches!(
            hook.rewrite(&s).unwrap(),
            PlanDecision::FilterThenRank { fetch: 10, .. }
        ));

        // A broad filter still probes the index.
        s.prefilter_selectivity = Some(0.5);
        assert!(matches!(
            hook.rewrite(&s).unwrap(),
            PlanDecision::IndexProbe { .. }
        ));
    }

    #[test]
    fn unrecognized_function_declines() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        assert!(matches!(
            hook.rewrite(&shape("lower(embedding, :q)", 10, 0)).unwrap(),
            PlanDecision::FullScan { .. }
        ));
    }

    #[test]
    fn explain_lines() {
        let registry = registry_with_index(Metric::Cosine);
        let hook = PlanHook::new(&registry);
        let probe = hook
            .rewrite(&shape("distance_cosine(embedding, :q)", 3, 0))
            .unwrap();
        assert_eq!(
            explain_decision(&probe),
            "VECTOR INDEX PROBE docs.embedding (metric=cosine, fetch=3)"
        );
        let scan = PlanDecision::FullScan {
            explain: "x".into(),
        };
        assert_eq!(explain_decision(&scan), "FULL SCAN (x)");
    }
}
