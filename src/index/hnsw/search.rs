//! Layer traversal: greedy descent and ef-bounded beam search.
//!
//! Both insert and query share [`search_layer`]. All orderings are on the
//! `(distance, id)` pair so that equal distances resolve identically on
//! every run, a prerequisite for the bit-identical determinism the index
//! guarantees under a fixed seed.

use super::graph::{Graph, QueryVector};
use crate::cancel::{self, CancelToken};
use crate::error::Result;
use crate::quantization::Sq8Calibration;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A candidate node with its distance to the query.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub distance: f32,
    pub id: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Reusable per-operation scratch. Pooled by the index so steady-state
/// searches allocate nothing beyond list growth.
pub(crate) struct SearchContext {
    /// Nodes already expanded or queued this layer.
    pub visited: FxHashSet<u64>,
    /// Min-heap of nodes to expand (closest first).
    pub candidates: BinaryHeap<Reverse<Candidate>>,
    /// Max-heap of the best `ef` results (worst at the root).
    pub results: BinaryHeap<Candidate>,
    /// Sorted ascending output of the last `search_layer` call.
    pub scratch: Vec<Candidate>,
    /// Neighbor-selection output buffer.
    pub selected: Vec<u64>,
    /// Calibration cache for SQ8 distance dispatch.
    pub calib: Option<Arc<Sq8Calibration>>,
}

impl SearchContext {
    pub(crate) fn new() -> Self {
        Self {
            visited: FxHashSet::default(),
            candidates: BinaryHeap::new(),
            results: BinaryHeap::new(),
            scratch: Vec::new(),
            selected: Vec::new(),
            calib: None,
        }
    }

    /// Clears per-layer state. The calibration cache survives; it belongs
    /// to the operation, not the layer.
    pub(crate) fn clear_layer(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
        self.scratch.clear();
    }

    /// Clears everything for return to the pool.
    fn reset(&mut self) {
        self.clear_layer();
        self.selected.clear();
        self.calib = None;
    }
}

/// Lock-protected stack of contexts; acquisition never blocks a search
/// for long since holders release on operation exit.
pub(crate) struct ContextPool {
    pool: Mutex<Vec<SearchContext>>,
}

impl ContextPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(&self) -> SearchContext {
        self.pool.lock().pop().unwrap_or_else(SearchContext::new)
    }

    pub(crate) fn release(&self, mut ctx: SearchContext) {
        ctx.reset();
        let mut pool = self.pool.lock();
        // Bound the pool so a burst of readers does not pin scratch forever.
        if pool.len() < 16 {
            pool.push(ctx);
        }
    }
}

/// One greedy step chain: repeatedly moves to the closest neighbor on
/// `layer` until no neighbor improves on the current `(distance, id)`.
pub(crate) fn greedy_descend(
    graph: &Graph,
    ctx: &mut SearchContext,
    query: &QueryVector<'_>,
    mut current: Candidate,
    layer: u8,
    cancel: Option<&CancelToken>,
) -> Result<Candidate> {
    loop {
        cancel::check(cancel)?;
        let Some(node) = graph.node(current.id) else {
            // The current node vanished under us (concurrent remove);
            // the best-so-far candidate is still a valid answer.
            return Ok(current);
        };
        let mut improved = false;
        for &neighbor in node.neighbors(layer).iter() {
            let Some(neighbor_node) = graph.node(neighbor) else {
                continue;
            };
            let distance = graph.distance(query, &neighbor_node.payload, &mut ctx.calib)?;
            let candidate = Candidate {
                distance,
                id: neighbor,
            };
            if candidate < current {
                current = candidate;
                improved = true;
            }
        }
        if !improved {
            return Ok(current);
        }
    }
}

/// Beam search over one layer.
///
/// Expands from `entries`, keeping a candidate min-heap and a bounded
/// result max-heap of width `ef`. Terminates when the closest unexpanded
/// candidate is worse than the worst retained result. Leaves the results
/// sorted ascending in `ctx.scratch`.
pub(crate) fn search_layer(
    graph: &Graph,
    ctx: &mut SearchContext,
    query: &QueryVector<'_>,
    entries: &[Candidate],
    ef: usize,
    layer: u8,
    cancel: Option<&CancelToken>,
) -> Result<()> {
    ctx.clear_layer();

    for &entry in entries {
        if !ctx.visited.insert(entry.id) {
            continue;
        }
        ctx.candidates.push(Reverse(entry));
        ctx.results.push(entry);
    }
    while ctx.results.len() > ef {
        ctx.results.pop();
    }

    while let Some(Reverse(candidate)) = ctx.candidates.pop() {
        cancel::check(cancel)?;

        if ctx.results.len() >= ef {
            if let Some(worst) = ctx.results.peek() {
                if candidate > *worst {
                    break;
                }
            }
        }

        let Some(node) = graph.node(candidate.id) else {
            continue;
        };

        for &neighbor in node.neighbors(layer).iter() {
            if !ctx.visited.insert(neighbor) {
                continue;
            }
            let Some(neighbor_node) = graph.node(neighbor) else {
                continue;
            };
            let distance = graph.distance(query, &neighbor_node.payload, &mut ctx.calib)?;
            let next = Candidate {
                distance,
                id: neighbor,
            };

            let admit = if ctx.results.len() < ef {
                true
            } else {
                ctx.results.peek().is_some_and(|worst| next < *worst)
            };
            if admit {
                ctx.candidates.push(Reverse(next));
                ctx.results.push(next);
                if ctx.results.len() > ef {
                    ctx.results.pop();
                }
            }
        }
    }

    ctx.scratch.clear();
    while let Some(candidate) = ctx.results.pop() {
        ctx.scratch.push(candidate);
    }
    ctx.scratch.reverse();
    Ok(())
}
