//! HNSW graph state and the reader/writer publication discipline.
//!
//! The node map is a sharded lock-free map of `id → Arc<Node>`; nodes are
//! inserted only after every neighbor list is populated, so a reader that
//! observes an id always observes its full payload. Each node's per-layer
//! neighbor list sits in an [`ArcSwap`] cell: writers build a fresh
//! immutable `Vec` and swap it in, readers that captured the old list keep
//! traversing it safely. The entry point is one more atomically swapped
//! cell. The only mutex in the index is the writer lock held by the owning
//! [`HnswIndex`](super::HnswIndex); nothing here blocks readers.
//!
//! Neighbor lists reference peers by id only. A reader may hold an id
//! whose node a concurrent writer has already removed; lookups treat the
//! miss as "skip", never as corruption.

use crate::error::{Error, Result};
use crate::metric::{self, Metric};
use crate::quantization::{BinaryQuantizer, Quantization, Sq8Calibration};
use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;

/// The graph entry point: the node with the greatest current layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryPoint {
    /// Node id.
    pub id: u64,
    /// That node's top layer.
    pub layer: u8,
}

/// Stored vector payload, in the index's configured encoding.
#[derive(Debug, Clone)]
pub(crate) enum NodePayload {
    /// Full-precision samples (also the staging form for unsealed SQ8).
    F32(Box<[f32]>),
    /// SQ8 codes, one byte per dimension.
    Sq8(Box<[u8]>),
    /// Packed sign bits.
    Binary(Box<[u8]>),
}

impl NodePayload {
    pub(crate) fn bytes(&self) -> usize {
        match self {
            NodePayload::F32(v) => v.len() * 4,
            NodePayload::Sq8(v) | NodePayload::Binary(v) => v.len(),
        }
    }
}

/// One graph node. The payload and layer are immutable; neighbor lists
/// are replaced wholesale through their cells.
#[derive(Debug)]
pub(crate) struct Node {
    pub id: u64,
    pub layer: u8,
    pub payload: NodePayload,
    links: Box<[ArcSwap<Vec<u64>>]>,
}

impl Node {
    /// Creates a node with empty neighbor lists on layers `0..=layer`.
    pub(crate) fn new(id: u64, layer: u8, payload: NodePayload) -> Self {
        let links = (0..=layer)
            .map(|_| ArcSwap::from_pointee(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            id,
            layer,
            payload,
            links,
        }
    }

    /// Clones a node with a different payload, carrying the current
    /// neighbor lists over (used when SQ8 sealing re-encodes the graph).
    pub(crate) fn with_payload(&self, payload: NodePayload) -> Self {
        let links = self
            .links
            .iter()
            .map(|cell| ArcSwap::new(cell.load_full()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            id: self.id,
            layer: self.layer,
            payload,
            links,
        }
    }

    /// Captures the published neighbor list for a layer.
    ///
    /// Layers above the node's top return an empty list rather than
    /// panicking; callers routinely probe with the search layer.
    pub(crate) fn neighbors(&self, layer: u8) -> Arc<Vec<u64>> {
        match self.links.get(layer as usize) {
            Some(cell) => cell.load_full(),
            None => Arc::new(Vec::new()),
        }
    }

    /// Publishes a new neighbor list for a layer.
    ///
    /// # Panics
    ///
    /// Panics if `layer` exceeds the node's top layer; writers derive the
    /// layer from the node itself.
    pub(crate) fn set_neighbors(&self, layer: u8, list: Vec<u64>) {
        self.links[layer as usize].store(Arc::new(list));
    }

    /// Heap bytes attributable to this node.
    pub(crate) fn memory_bytes(&self) -> u64 {
        let links: usize = self
            .links
            .iter()
            .map(|cell| cell.load().len() * 8 + std::mem::size_of::<ArcSwap<Vec<u64>>>())
            .sum();
        (std::mem::size_of::<Self>() + self.payload.bytes() + links) as u64
    }
}

/// A query in the form the graph can measure against stored payloads.
#[derive(Debug)]
pub(crate) enum QueryVector<'a> {
    /// f32 query, used against both f32 and SQ8 payloads (asymmetric).
    Float(&'a [f32]),
    /// Packed sign bits for Hamming searches against binary payloads.
    Bits(std::borrow::Cow<'a, [u8]>),
}

/// Shared graph state.
pub(crate) struct Graph {
    pub dimension: usize,
    pub metric: Metric,
    pub quantization: Quantization,
    pub nodes: DashMap<u64, Arc<Node>, FxBuildHasher>,
    pub entry: ArcSwapOption<EntryPoint>,
    /// Sealed SQ8 calibration. Published before any node carries an SQ8
    /// payload, so a reader that sees codes always finds it.
    pub calibration: ArcSwapOption<Sq8Calibration>,
}

impl Graph {
    pub(crate) fn new(dimension: usize, metric: Metric, quantization: Quantization) -> Self {
        Self {
            dimension,
            metric,
            quantization,
            nodes: DashMap::with_hasher(FxBuildHasher),
            entry: ArcSwapOption::empty(),
            calibration: ArcSwapOption::empty(),
        }
    }

    /// Builds the query form for this graph's metric.
    pub(crate) fn query<'a>(&self, vector: &'a [f32]) -> QueryVector<'a> {
        match self.metric {
            Metric::Hamming => QueryVector::Bits(BinaryQuantizer::encode(vector).into()),
            _ => QueryVector::Float(vector),
        }
    }

    /// Encodes a vector into the payload form current writes use.
    pub(crate) fn encode_payload(&self, vector: &[f32]) -> NodePayload {
        match self.quantization {
            Quantization::None => NodePayload::F32(vector.into()),
            Quantization::Scalar8 => match self.calibration.load_full() {
                Some(calib) => NodePayload::Sq8(calib.encode(vector).into_boxed_slice()),
                // Still staging: keep f32 until the calibration seals.
                None => NodePayload::F32(vector.into()),
            },
            Quantization::Binary => {
                NodePayload::Binary(BinaryQuantizer::encode(vector).into_boxed_slice())
            }
        }
    }

    /// Distance from a query to a stored payload.
    ///
    /// `calib` caches the calibration across one operation; it reloads on
    /// first contact with an SQ8 payload, which the publication order
    /// guarantees to succeed.
    pub(crate) fn distance(
        &self,
        query: &QueryVector<'_>,
        payload: &NodePayload,
        calib: &mut Option<Arc<Sq8Calibration>>,
    ) -> Result<f32> {
        match (query, payload) {
            (QueryVector::Float(q), NodePayload::F32(v)) => Ok(self.metric.distance(q, v)),
            (QueryVector::Float(q), NodePayload::Sq8(codes)) => {
                if calib.is_none() {
                    *calib = self.calibration.load_full();
                }
                let c = calib
                    .as_ref()
                    .ok_or_else(|| Error::Corrupt("sq8 payload without calibration".into()))?;
                Ok(c.distance(self.metric, q, codes))
            }
            (QueryVector::Bits(q), NodePayload::Binary(bits)) => {
                #[allow(clippy::cast_precision_loss)]
                Ok(metric::hamming(q, bits) as f32)
            }
            _ => Err(Error::Corrupt(
                "query and payload forms disagree".into(),
            )),
        }
    }

    /// Reconstructs a payload into query form, for node-to-node distances
    /// during pruning.
    pub(crate) fn payload_query(&self, payload: &NodePayload) -> Result<OwnedQuery> {
        match payload {
            NodePayload::F32(v) => Ok(OwnedQuery::Float(v.to_vec())),
            NodePayload::Sq8(codes) => {
                let calib = self
                    .calibration
                    .load_full()
                    .ok_or_else(|| Error::Corrupt("sq8 payload without calibration".into()))?;
                Ok(OwnedQuery::Float(calib.decode(codes)))
            }
            NodePayload::Binary(bits) => Ok(OwnedQuery::Bits(bits.to_vec())),
        }
    }

    /// Looks up a node, treating a concurrent removal as absence.
    pub(crate) fn node(&self, id: u64) -> Option<Arc<Node>> {
        self.nodes.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Current entry point.
    pub(crate) fn entry_point(&self) -> Option<EntryPoint> {
        self.entry.load().as_deref().copied()
    }

    /// Re-elects the entry point: greatest layer, ties to the smallest id.
    /// O(n); only runs when the current entry node is removed.
    pub(crate) fn reelect_entry(&self) {
        let mut best: Option<EntryPoint> = None;
        for node in self.nodes.iter() {
            let cand = EntryPoint {
                id: node.id,
                layer: node.layer,
            };
            best = Some(match best {
                None => cand,
                Some(cur) => {
                    if cand.layer > cur.layer || (cand.layer == cur.layer && cand.id < cur.id) {
                        cand
                    } else {
                        cur
                    }
                }
            });
        }
        self.entry.store(best.map(Arc::new));
    }

    /// Verifies the structural invariants over the whole graph: mutual
    /// neighbor membership per layer, degree bounds, no dangling or
    /// duplicate edges, and entry-point consistency. Meaningful only in a
    /// quiesced state (callers hold the writer lock).
    pub(crate) fn check_invariants(&self, params: &crate::index::HnswParams) -> Result<()> {
        let mut max_layer = 0u8;
        for node in self.nodes.iter() {
            max_layer = max_layer.max(node.layer);
            for layer in 0..=node.layer {
                let neighbors = node.neighbors(layer);
                if neighbors.len() > params.m_max(layer) {
                    return Err(Error::Corrupt(format!(
                        "node {} exceeds degree bound on layer {layer}: {} > {}",
                        node.id,
                        neighbors.len(),
                        params.m_max(layer)
                    )));
                }
                for (i, &neighbor) in neighbors.iter().enumerate() {
                    if neighbor == node.id {
                        return Err(Error::Corrupt(format!(
                            "node {} links to itself on layer {layer}",
                            node.id
                        )));
                    }
                    if neighbors[..i].contains(&neighbor) {
                        return Err(Error::Corrupt(format!(
                            "node {} lists neighbor {neighbor} twice on layer {layer}",
                            node.id
                        )));
                    }
                    let Some(peer) = self.node(neighbor) else {
                        return Err(Error::Corrupt(format!(
                            "node {} links to missing node {neighbor} on layer {layer}",
                            node.id
                        )));
                    };
                    if peer.layer < layer {
                        return Err(Error::Corrupt(format!(
                            "node {} links to {neighbor} above its top layer",
                            node.id
                        )));
                    }
                    if !peer.neighbors(layer).contains(&node.id) {
                        return Err(Error::Corrupt(format!(
                            "edge {} → {neighbor} on layer {layer} is not mutual",
                            node.id
                        )));
                    }
                }
            }
        }

        match self.entry_point() {
            None => {
                if !self.nodes.is_empty() {
                    return Err(Error::Corrupt(
                        "non-empty graph without an entry point".into(),
                    ));
                }
            }
            Some(entry) => {
                let Some(node) = self.node(entry.id) else {
                    return Err(Error::Corrupt(format!(
                        "entry point {} is not a node",
                        entry.id
                    )));
                };
                if node.layer != entry.layer || entry.layer != max_layer {
                    return Err(Error::Corrupt(format!(
                        "entry point layer {} disagrees with graph top layer {max_layer}",
                        entry.layer
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total heap bytes held by the graph.
    pub(crate) fn memory_bytes(&self) -> u64 {
        let mut bytes = 0u64;
        for node in self.nodes.iter() {
            // Map entry overhead: key, Arc, shard bookkeeping.
            bytes += node.memory_bytes() + 48;
        }
        if let Some(calib) = self.calibration.load_full() {
            bytes += calib.memory_bytes();
        }
        bytes
    }
}

/// Owned query form produced from a stored payload.
pub(crate) enum OwnedQuery {
    /// Decoded f32 samples.
    Float(Vec<f32>),
    /// Packed bits.
    Bits(Vec<u8>),
}

impl OwnedQuery {
    /// Borrows as a [`QueryVector`].
    pub(crate) fn as_query(&self) -> QueryVector<'_> {
        match self {
            OwnedQuery::Float(v) => QueryVector::Float(v),
            OwnedQuery::Bits(b) => QueryVector::Bits(b.as_slice().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_graph(dim: usize) -> Graph {
        Graph::new(dim, Metric::L2, Quantization::None)
    }

    #[test]
    fn node_publishes_complete_link_array() {
        let node = Node::new(1, 3, NodePayload::F32(vec![0.0; 4].into()));
        for layer in 0..=3 {
            assert!(node.neighbors(layer).is_empty());
        }
        // Probing above the top layer is a harmless empty list.
        assert!(node.neighbors(9).is_empty());
    }

    #[test]
    fn neighbor_swap_preserves_old_readers() {
        let node = Node::new(1, 0, NodePayload::F32(vec![0.0; 2].into()));
        node.set_neighbors(0, vec![2, 3]);
        let captured = node.neighbors(0);
        node.set_neighbors(0, vec![4]);
        // The reader that captured the old list still sees it.
        assert_eq!(*captured, vec![2, 3]);
        assert_eq!(*node.neighbors(0), vec![4]);
    }

    #[test]
    fn entry_reelection_prefers_layer_then_id() {
        let graph = f32_graph(2);
        for (id, layer) in [(5u64, 1u8), (2, 2), (9, 2), (1, 0)] {
            graph.nodes.insert(
                id,
                Arc::new(Node::new(id, layer, NodePayload::F32(vec![0.0; 2].into()))),
            );
        }
        graph.reelect_entry();
        assert_eq!(graph.entry_point(), Some(EntryPoint { id: 2, layer: 2 }));

        graph.nodes.clear();
        graph.reelect_entry();
        assert_eq!(graph.entry_point(), None);
    }

    #[test]
    fn distance_dispatches_by_payload_form() {
        let graph = f32_graph(2);
        let q = graph.query(&[0.0, 0.0]);
        let payload = NodePayload::F32(vec![3.0, 4.0].into());
        let mut calib = None;
        let d = graph.distance(&q, &payload, &mut calib).unwrap();
        assert!((d - 5.0).abs() < 1e-6);

        // Form mismatch is corruption, not a panic.
        let bits = NodePayload::Binary(vec![0xFF].into());
        assert!(graph.distance(&q, &bits, &mut calib).is_err());
    }
}
