//! Binary snapshot codec for HNSW graphs.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! "HNSW"                      4 bytes magic
//! version                     u8  (= 1)
//! dimension                   u16
//! metric, quantization        u8 each
//! m, ef_construction,
//! ef_search                   u16 each
//! topLayer                    u8
//! entryPoint                  u64 (0xFFFF…FFFF if empty)
//! nodeCount                   u32
//! [scalar8 only]              2·D f32 calibration words (min[0..D], max[0..D])
//! — per node, ascending id —
//!   id                        u64
//!   layer                     u8
//!   vector value              per the value codec (header + payload)
//!   for L = 0..=layer:
//!     count                   u16
//!     neighbors[count]        u64
//! crc32                       u32 over all preceding bytes
//! ```
//!
//! Restore validates magic and version, then the checksum, then every
//! structural invariant (mutual neighbor membership per layer, degree
//! bounds, entry-point consistency, payload presence) before anything is
//! published. A snapshot that fails any check is refused whole.

use super::SnapshotError;
use crate::codec;
use crate::error::{Error, Result};
use crate::index::hnsw::graph::{EntryPoint, Graph, Node, NodePayload};
use crate::index::{HnswIndex, IndexDescriptor, VectorIndex};
use crate::metric::Metric;
use crate::quantization::{Quantization, Sq8Calibration};
use std::collections::HashMap;
use std::sync::Arc;

const MAGIC: [u8; 4] = *b"HNSW";
const VERSION: u8 = 1;
const EMPTY_ENTRY: u64 = u64::MAX;

pub(crate) fn encode_snapshot(index: &HnswIndex) -> Result<Vec<u8>> {
    // Scalar8 staging seals now (with however many samples exist) so the
    // snapshot always carries codes plus their calibration.
    index.seal_if_staging()?;

    let graph = index.graph();
    let descriptor = index.descriptor();
    let params = &descriptor.params;

    let mut nodes: Vec<Arc<Node>> = graph
        .nodes
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    nodes.sort_unstable_by_key(|node| node.id);

    let entry = graph.entry_point();
    let top_layer = entry.map_or(0, |e| e.layer);
    let entry_id = entry.map_or(EMPTY_ENTRY, |e| e.id);

    let dimension = u16::try_from(graph.dimension)
        .map_err(|_| Error::Config(format!("dimension {} exceeds u16", graph.dimension)))?;
    let node_count = u32::try_from(nodes.len())
        .map_err(|_| Error::Config(format!("node count {} exceeds u32", nodes.len())))?;

    let mut out = Vec::with_capacity(64 + nodes.len() * (graph.dimension * 4 + 64));
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&dimension.to_le_bytes());
    out.push(graph.metric.code());
    out.push(graph.quantization.code());
    for value in [params.m, params.ef_construction, params.ef_search] {
        let word = u16::try_from(value)
            .map_err(|_| Error::Config(format!("parameter {value} exceeds u16")))?;
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.push(top_layer);
    out.extend_from_slice(&entry_id.to_le_bytes());
    out.extend_from_slice(&node_count.to_le_bytes());

    if graph.quantization == Quantization::Scalar8 && !nodes.is_empty() {
        let calib = graph
            .calibration
            .load_full()
            .ok_or_else(|| Error::Corrupt("sq8 graph unsealed at snapshot time".into()))?;
        out.extend_from_slice(&calib.to_words());
    }

    let max_dim = u32::from(dimension);
    for node in &nodes {
        out.extend_from_slice(&node.id.to_le_bytes());
        out.push(node.layer);
        let value = match &node.payload {
            NodePayload::F32(v) => codec::encode_f32(v, max_dim, false)?,
            NodePayload::Sq8(codes) => {
                codec::encode_quantized(codes, graph.dimension, Quantization::Scalar8, max_dim)?
            }
            NodePayload::Binary(bits) => {
                codec::encode_quantized(bits, graph.dimension, Quantization::Binary, max_dim)?
            }
        };
        out.extend_from_slice(&value);

        for layer in 0..=node.layer {
            let neighbors = node.neighbors(layer);
            let count = u16::try_from(neighbors.len())
                .map_err(|_| Error::Corrupt(format!("degree {} exceeds u16", neighbors.len())))?;
            out.extend_from_slice(&count.to_le_bytes());
            for &neighbor in neighbors.iter() {
                out.extend_from_slice(&neighbor.to_le_bytes());
            }
        }
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());

    log::debug!(
        "snapshot of {}: {} nodes, {} bytes",
        index.descriptor().key,
        nodes.len(),
        out.len()
    );
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(SnapshotError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> std::result::Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, SnapshotError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

struct RawNode {
    id: u64,
    layer: u8,
    payload: NodePayload,
    links: Vec<Vec<u64>>,
}

pub(crate) fn decode_snapshot(descriptor: IndexDescriptor, bytes: &[u8]) -> Result<HnswIndex> {
    decode_inner(descriptor, bytes).map_err(|err| {
        log::error!("snapshot restore failed: {err}");
        Error::Snapshot(err)
    })
}

#[allow(clippy::too_many_lines)]
fn decode_inner(
    descriptor: IndexDescriptor,
    bytes: &[u8],
) -> std::result::Result<HnswIndex, SnapshotError> {
    let mut reader = Reader { bytes, pos: 0 };

    let magic: [u8; 4] = reader
        .take(4)?
        .try_into()
        .expect("take(4) yields 4 bytes");
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    // Checksum next: everything after this is parsed from verified bytes.
    if bytes.len() < 4 {
        return Err(SnapshotError::Truncated(bytes.len()));
    }
    let (content, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes(
        crc_bytes
            .try_into()
            .expect("split_at leaves exactly 4 bytes"),
    );
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(content);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(SnapshotError::ChecksumMismatch { stored, computed });
    }
    // Reparse below against the content slice only.
    reader = Reader {
        bytes: content,
        pos: 5,
    };

    let dimension = usize::from(reader.u16()?);
    let metric_code = reader.u8()?;
    let metric =
        Metric::from_code(metric_code).ok_or(SnapshotError::UnknownMetric(metric_code))?;
    let quant_code = reader.u8()?;
    let quantization = Quantization::from_code(quant_code)
        .ok_or(SnapshotError::UnknownQuantization(quant_code))?;
    let m = u32::from(reader.u16()?);
    let _ef_construction = reader.u16()?;
    let _ef_search = reader.u16()?;
    let top_layer = reader.u8()?;
    let entry_id = reader.u64()?;
    let node_count = reader.u32()? as usize;

    if dimension != descriptor.dimension as usize {
        return Err(SnapshotError::DescriptorMismatch(format!(
            "dimension {dimension} vs descriptor {}",
            descriptor.dimension
        )));
    }
    if metric != descriptor.metric {
        return Err(SnapshotError::DescriptorMismatch(format!(
            "metric {} vs descriptor {}",
            metric.name(),
            descriptor.metric.name()
        )));
    }
    if quantization != descriptor.quantization {
        return Err(SnapshotError::DescriptorMismatch(format!(
            "quantization {} vs descriptor {}",
            quantization.name(),
            descriptor.quantization.name()
        )));
    }
    if m != descriptor.params.m {
        return Err(SnapshotError::DescriptorMismatch(format!(
            "m {m} vs descriptor {}",
            descriptor.params.m
        )));
    }

    let calibration = if quantization == Quantization::Scalar8 && node_count > 0 {
        let words = reader.take(dimension * 8)?;
        Some(Arc::new(
            Sq8Calibration::from_words(dimension, words)
                .map_err(|_| SnapshotError::InvalidGraph("bad calibration words".into()))?,
        ))
    } else {
        None
    };

    // Pass 1: parse node records.
    let mut raw_nodes: Vec<RawNode> = Vec::with_capacity(node_count);
    let mut previous_id: Option<u64> = None;
    for _ in 0..node_count {
        let id = reader.u64()?;
        if previous_id.is_some_and(|prev| prev >= id) {
            return Err(SnapshotError::InvalidGraph(format!(
                "node ids not strictly ascending at {id}"
            )));
        }
        previous_id = Some(id);

        let layer = reader.u8()?;
        if layer > top_layer {
            return Err(SnapshotError::InvalidGraph(format!(
                "node {id} layer {layer} above top layer {top_layer}"
            )));
        }

        let value_start = reader.pos;
        let remaining = &content[value_start..];
        let value = codec::decode(remaining, dimension).map_err(|err| match err {
            Error::Header(header) => SnapshotError::Value(header),
            _ => SnapshotError::InvalidGraph(format!("node {id}: {err}")),
        })?;
        if value.quantization() != quantization {
            return Err(SnapshotError::InvalidGraph(format!(
                "node {id} payload kind {} disagrees with index {}",
                value.quantization().name(),
                quantization.name()
            )));
        }
        let payload = match quantization {
            Quantization::None => {
                let floats = value.floats().map_err(|err| {
                    SnapshotError::InvalidGraph(format!("node {id}: {err}"))
                })?;
                NodePayload::F32(floats.into_owned().into_boxed_slice())
            }
            Quantization::Scalar8 => NodePayload::Sq8(value.payload().into()),
            Quantization::Binary => NodePayload::Binary(value.payload().into()),
        };
        reader.pos = value_start + value.encoded_len();

        let mut links = Vec::with_capacity(usize::from(layer) + 1);
        for _ in 0..=layer {
            let count = usize::from(reader.u16()?);
            let mut neighbors = Vec::with_capacity(count);
            for _ in 0..count {
                neighbors.push(reader.u64()?);
            }
            links.push(neighbors);
        }
        raw_nodes.push(RawNode {
            id,
            layer,
            payload,
            links,
        });
    }

    if reader.pos != content.len() {
        return Err(SnapshotError::InvalidGraph(format!(
            "{} trailing bytes after last node",
            content.len() - reader.pos
        )));
    }

    // Pass 2: structural invariants over the whole graph.
    let by_id: HashMap<u64, &RawNode> = raw_nodes.iter().map(|node| (node.id, node)).collect();
    let max_layer = raw_nodes.iter().map(|n| n.layer).max().unwrap_or(0);
    if max_layer != top_layer {
        return Err(SnapshotError::InvalidGraph(format!(
            "top layer {top_layer} but tallest node has layer {max_layer}"
        )));
    }
    if node_count == 0 {
        if entry_id != EMPTY_ENTRY || top_layer != 0 {
            return Err(SnapshotError::InvalidGraph(
                "empty graph with a non-empty entry point".into(),
            ));
        }
    } else {
        let entry = by_id.get(&entry_id).ok_or_else(|| {
            SnapshotError::InvalidGraph(format!("entry point {entry_id} is not a node"))
        })?;
        if entry.layer != top_layer {
            return Err(SnapshotError::InvalidGraph(format!(
                "entry point layer {} does not match top layer {top_layer}",
                entry.layer
            )));
        }
    }

    let m_max = |layer: u8| -> usize { descriptor.params.m_max(layer) };
    for node in &raw_nodes {
        for (layer, neighbors) in node.links.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let layer = layer as u8;
            if neighbors.len() > m_max(layer) {
                return Err(SnapshotError::InvalidGraph(format!(
                    "node {} exceeds degree bound on layer {layer}: {} > {}",
                    node.id,
                    neighbors.len(),
                    m_max(layer)
                )));
            }
            let mut seen = std::collections::HashSet::with_capacity(neighbors.len());
            for &neighbor in neighbors {
                if neighbor == node.id {
                    return Err(SnapshotError::InvalidGraph(format!(
                        "node {} links to itself on layer {layer}",
                        node.id
                    )));
                }
                if !seen.insert(neighbor) {
                    return Err(SnapshotError::InvalidGraph(format!(
                        "node {} lists neighbor {neighbor} twice on layer {layer}",
                        node.id
                    )));
                }
                let Some(peer) = by_id.get(&neighbor) else {
                    return Err(SnapshotError::InvalidGraph(format!(
                        "node {} links to missing node {neighbor}",
                        node.id
                    )));
                };
                if peer.layer < layer {
                    return Err(SnapshotError::InvalidGraph(format!(
                        "node {} links to {neighbor} on layer {layer}, above that node's top",
                        node.id
                    )));
                }
                if !peer.links[usize::from(layer)].contains(&node.id) {
                    return Err(SnapshotError::InvalidGraph(format!(
                        "edge {} → {neighbor} on layer {layer} is not mutual",
                        node.id
                    )));
                }
            }
        }
    }

    // Everything checked: materialize the graph.
    let graph = Graph::new(dimension, metric, quantization);
    graph.calibration.store(calibration);
    for raw in raw_nodes {
        let node = Node::new(raw.id, raw.layer, raw.payload);
        for (layer, neighbors) in raw.links.into_iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            node.set_neighbors(layer as u8, neighbors);
        }
        graph.nodes.insert(raw.id, Arc::new(node));
    }
    if node_count > 0 {
        graph.entry.store(Some(Arc::new(EntryPoint {
            id: entry_id,
            layer: top_layer,
        })));
    }

    Ok(HnswIndex::from_parts(descriptor, graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{HnswParams, IndexKey, IndexKind, VectorIndex};

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor {
            key: IndexKey::new("docs", "embedding"),
            kind: IndexKind::Hnsw,
            metric: Metric::L2,
            quantization: Quantization::None,
            dimension: 4,
            params: HnswParams::default()
                .with_m(8)
                .with_ef_construction(32)
                .with_seed(9),
        }
    }

    fn populated_index(n: u64) -> HnswIndex {
        let index = HnswIndex::new(descriptor()).unwrap();
        for i in 0..n {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32;
            index
                .add(i + 1, &[x.sin(), x.cos(), (x * 0.5).sin(), 1.0], None)
                .unwrap();
        }
        index
    }

    #[test]
    fn roundtrip_preserves_results() {
        let index = populated_index(300);
        let bytes = index.snapshot_bytes().unwrap();
        let restored = HnswIndex::restore(descriptor(), &bytes).unwrap();

        assert_eq!(index.len(), restored.len());
        for q in 0..10 {
            #[allow(clippy::cast_precision_loss)]
            let f = q as f32;
            let query = [f.sin(), f.cos(), 0.2, 1.0];
            let a = index.search(&query, 10, None, None).unwrap();
            let b = restored.search(&query, 10, None, None).unwrap();
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.id, y.id);
                assert_eq!(x.distance.to_bits(), y.distance.to_bits());
            }
        }
    }

    #[test]
    fn empty_graph_roundtrips() {
        let index = HnswIndex::new(descriptor()).unwrap();
        let bytes = index.snapshot_bytes().unwrap();
        let restored = HnswIndex::restore(descriptor(), &bytes).unwrap();
        assert_eq!(restored.len(), 0);
        assert!(restored.search(&[0.0; 4], 3, None, None).unwrap().is_empty());
    }

    #[test]
    fn corrupt_byte_is_refused() {
        let index = populated_index(50);
        let mut bytes = index.snapshot_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            HnswIndex::restore(descriptor(), &bytes),
            Err(Error::Snapshot(SnapshotError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn truncated_snapshot_is_refused() {
        let index = populated_index(50);
        let bytes = index.snapshot_bytes().unwrap();
        assert!(HnswIndex::restore(descriptor(), &bytes[..bytes.len() / 2]).is_err());
        assert!(HnswIndex::restore(descriptor(), &bytes[..3]).is_err());
    }

    #[test]
    fn wrong_magic_is_refused() {
        let index = populated_index(5);
        let mut bytes = index.snapshot_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            HnswIndex::restore(descriptor(), &bytes),
            Err(Error::Snapshot(SnapshotError::BadMagic(_)))
        ));
    }

    #[test]
    fn descriptor_mismatch_is_refused() {
        let index = populated_index(5);
        let bytes = index.snapshot_bytes().unwrap();
        let mut other = descriptor();
        other.dimension = 8;
        assert!(matches!(
            HnswIndex::restore(other, &bytes),
            Err(Error::Snapshot(SnapshotError::DescriptorMismatch(_)))
        ));
    }
}
