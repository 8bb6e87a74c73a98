//! HNSW insertion: level draw, two-phase placement, neighbor selection,
//! bidirectional wiring with symmetric pruning, and SQ8 sealing.
//!
//! All functions here run under the index writer lock; the graph is still
//! being read concurrently, so every neighbor-list update goes through the
//! publish-by-swap cells and new nodes enter the map only after their own
//! lists are complete.

use super::config::{HnswParams, MAX_LEVEL};
use super::graph::{EntryPoint, Graph, Node, NodePayload};
use super::search::{greedy_descend, search_layer, Candidate, SearchContext};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::quantization::Sq8Calibration;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Draws the layer for a new node: `⌊−ln(u) · (1/ln M)⌋` with `u ∈ (0, 1]`,
/// capped at [`MAX_LEVEL`].
pub(crate) fn random_level(rng: &mut ChaCha8Rng, level_mult: f32) -> u8 {
    let u: f32 = rng.gen_range(f32::EPSILON..=1.0);
    let level = (-u.ln() * level_mult).floor();
    if level >= f32::from(MAX_LEVEL) {
        MAX_LEVEL
    } else {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            level as u8
        }
    }
}

/// Inserts one vector. Duplicate ids are rejected before any state
/// changes.
pub(crate) fn insert(
    graph: &Graph,
    params: &HnswParams,
    ctx: &mut SearchContext,
    rng: &mut ChaCha8Rng,
    id: u64,
    vector: &[f32],
    cancel: Option<&CancelToken>,
) -> Result<()> {
    if graph.nodes.contains_key(&id) {
        return Err(Error::DuplicateId { id });
    }

    let level = random_level(rng, params.level_mult());
    let payload = graph.encode_payload(vector);
    let node = Arc::new(Node::new(id, level, payload));

    let Some(entry) = graph.entry_point() else {
        // First node: publish and become the entry point.
        graph.nodes.insert(id, Arc::clone(&node));
        graph
            .entry
            .store(Some(Arc::new(EntryPoint { id, layer: level })));
        return Ok(());
    };

    let query = graph.query(vector);

    // Phase 1: read-only greedy descent from the top layer down to the
    // layer just above the new node's.
    let entry_node = graph
        .node(entry.id)
        .ok_or_else(|| Error::Corrupt("entry point references a missing node".into()))?;
    let mut current = Candidate {
        distance: graph.distance(&query, &entry_node.payload, &mut ctx.calib)?,
        id: entry.id,
    };
    let mut layer = entry.layer;
    while layer > level {
        current = greedy_descend(graph, ctx, &query, current, layer, cancel)?;
        layer -= 1;
    }

    // Phase 2: beam search per layer, heuristic selection, then wiring.
    let start_layer = level.min(entry.layer);
    let mut selected_per_layer: Vec<Vec<u64>> = vec![Vec::new(); usize::from(start_layer) + 1];
    let mut entries = vec![current];
    for lc in (0..=start_layer).rev() {
        search_layer(
            graph,
            ctx,
            &query,
            &entries,
            params.ef_construction as usize,
            lc,
            cancel,
        )?;
        select_neighbors(graph, ctx, params.m as usize)?;
        node.set_neighbors(lc, ctx.selected.clone());
        selected_per_layer[usize::from(lc)] = ctx.selected.clone();
        // The whole candidate set seeds the next layer down.
        entries.clear();
        entries.extend_from_slice(&ctx.scratch);
    }

    // Publish only after every one of the node's lists is populated, so a
    // reader that sees the id sees the finished node.
    graph.nodes.insert(id, Arc::clone(&node));

    for lc in (0..=start_layer).rev() {
        for &neighbor in &selected_per_layer[usize::from(lc)] {
            link(graph, params, ctx, neighbor, id, lc)?;
        }
    }

    if level > entry.layer {
        graph
            .entry
            .store(Some(Arc::new(EntryPoint { id, layer: level })));
    }
    Ok(())
}

/// Neighbor heuristic over `ctx.scratch` (ascending): admit a candidate
/// only if it is closer to the query than to every already-admitted
/// neighbor, until `m` admits or the candidates run out. Output lands in
/// `ctx.selected`.
fn select_neighbors(graph: &Graph, ctx: &mut SearchContext, m: usize) -> Result<()> {
    // Split borrow: candidates stay readable while the output list and the
    // calibration cache are written.
    let SearchContext {
        ref scratch,
        ref mut selected,
        ref mut calib,
        ..
    } = *ctx;

    selected.clear();
    for candidate in scratch {
        if selected.len() >= m {
            break;
        }
        let Some(candidate_node) = graph.node(candidate.id) else {
            continue;
        };
        let candidate_query = graph.payload_query(&candidate_node.payload)?;
        let cq = candidate_query.as_query();

        let mut dominated = false;
        for &admitted in selected.iter() {
            let Some(admitted_node) = graph.node(admitted) else {
                continue;
            };
            let between = graph.distance(&cq, &admitted_node.payload, calib)?;
            if between < candidate.distance {
                dominated = true;
                break;
            }
        }
        if !dominated {
            selected.push(candidate.id);
        }
    }
    Ok(())
}

/// Adds `to` into `from`'s list on `layer`. When the list exceeds the
/// layer's degree bound the heuristic re-selects it from `from`'s
/// viewpoint, and every pruned peer loses its reverse edge in the same
/// write so mutual membership holds once the writer finishes.
fn link(
    graph: &Graph,
    params: &HnswParams,
    ctx: &mut SearchContext,
    from: u64,
    to: u64,
    layer: u8,
) -> Result<()> {
    let Some(from_node) = graph.node(from) else {
        // Selected a node the same write already pruned away; nothing to do.
        return Ok(());
    };
    if layer > from_node.layer {
        return Err(Error::Corrupt(format!(
            "wiring node {from} on layer {layer} above its top layer {}",
            from_node.layer
        )));
    }

    let current = from_node.neighbors(layer);
    if current.contains(&to) {
        return Ok(());
    }
    let mut list = (*current).clone();
    list.push(to);

    let m_max = params.m_max(layer);
    if list.len() <= m_max {
        from_node.set_neighbors(layer, list);
        return Ok(());
    }

    // Overfull: rank all peers by distance from `from`, re-admit with the
    // heuristic, then drop reverse edges of the evicted peers.
    let from_query = graph.payload_query(&from_node.payload)?;
    let fq = from_query.as_query();

    let mut candidates: Vec<Candidate> = Vec::with_capacity(list.len());
    for &peer in &list {
        let Some(peer_node) = graph.node(peer) else {
            continue;
        };
        let distance = graph.distance(&fq, &peer_node.payload, &mut ctx.calib)?;
        candidates.push(Candidate { distance, id: peer });
    }
    candidates.sort_unstable();

    let mut kept: Vec<u64> = Vec::with_capacity(m_max);
    for candidate in &candidates {
        if kept.len() >= m_max {
            break;
        }
        let Some(candidate_node) = graph.node(candidate.id) else {
            continue;
        };
        let candidate_query = graph.payload_query(&candidate_node.payload)?;
        let cq = candidate_query.as_query();

        let mut dominated = false;
        for &admitted in &kept {
            let Some(admitted_node) = graph.node(admitted) else {
                continue;
            };
            let between = graph.distance(&cq, &admitted_node.payload, &mut ctx.calib)?;
            if between < candidate.distance {
                dominated = true;
                break;
            }
        }
        if !dominated {
            kept.push(candidate.id);
        }
    }

    for &peer in &list {
        if kept.contains(&peer) {
            continue;
        }
        let Some(peer_node) = graph.node(peer) else {
            continue;
        };
        let peer_list = peer_node.neighbors(layer);
        if peer_list.contains(&from) {
            let mut updated = (*peer_list).clone();
            updated.retain(|&v| v != from);
            peer_node.set_neighbors(layer, updated);
        }
    }
    from_node.set_neighbors(layer, kept);
    Ok(())
}

/// Removes a node: strips it from every neighbor list it appears on (its
/// own lists name exactly those peers, by mutuality), deletes it, and
/// re-elects the entry point if needed. Never violates the degree bound.
pub(crate) fn remove(graph: &Graph, id: u64) -> Result<bool> {
    let Some(node) = graph.node(id) else {
        return Ok(false);
    };

    for layer in 0..=node.layer {
        for &peer in node.neighbors(layer).iter() {
            let Some(peer_node) = graph.node(peer) else {
                continue;
            };
            let peer_list = peer_node.neighbors(layer);
            if peer_list.contains(&id) {
                let mut updated = (*peer_list).clone();
                updated.retain(|&v| v != id);
                peer_node.set_neighbors(layer, updated);
            }
        }
    }

    graph.nodes.remove(&id);
    if graph.entry_point().is_some_and(|e| e.id == id) {
        graph.reelect_entry();
    }
    Ok(true)
}

/// Seals SQ8 staging: trains the per-dimension calibration over every
/// staged vector, publishes it, then re-encodes each node. The
/// calibration is visible before any SQ8 payload, so concurrent readers
/// can always resolve the codes they encounter.
pub(crate) fn seal_sq8(graph: &Graph) -> Result<()> {
    if graph.calibration.load().is_some() {
        return Ok(());
    }

    let nodes: Vec<Arc<Node>> = graph
        .nodes
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();

    let calib = Arc::new(Sq8Calibration::train(
        graph.dimension,
        nodes.iter().filter_map(|node| match &node.payload {
            NodePayload::F32(v) => Some(&v[..]),
            _ => None,
        }),
    )?);
    graph.calibration.store(Some(Arc::clone(&calib)));

    for node in nodes {
        if let NodePayload::F32(v) = &node.payload {
            let codes = calib.encode(v).into_boxed_slice();
            let re_encoded = Arc::new(node.with_payload(NodePayload::Sq8(codes)));
            graph.nodes.insert(node.id, re_encoded);
        }
    }
    Ok(())
}
