//! Layered proximity-graph index (Hierarchical Navigable Small World).
//!
//! # Concurrency discipline
//!
//! One writer at a time, enforced by the index writer lock. Readers run
//! concurrently with the writer and with each other: they capture the
//! entry-point cell, walk the lock-free node map, and read each node's
//! atomically published neighbor lists. Writers publish with
//! release-store semantics and readers load with acquire, so an observed
//! id always resolves to a fully initialized node.
//!
//! # Determinism
//!
//! Given the same insert/remove sequence and the same `seed`, two indexes
//! are structurally identical and answer every query bit-identically: the
//! level RNG is a seeded ChaCha8 stream and every traversal orders
//! candidates by `(distance, id)`.

mod config;
pub(crate) mod graph;
mod insert;
mod search;

pub use config::{HnswParams, MAX_LEVEL};

use self::graph::Graph;
use self::search::{greedy_descend, search_layer, Candidate, ContextPool, SearchContext};
use crate::cancel::{self, CancelToken};
use crate::codec::validate_finite;
use crate::error::{Error, Result};
use crate::index::{IndexDescriptor, VectorIndex};
use crate::quantization::{Quantization, SQ8_CALIBRATION_SAMPLE};
use crate::topk::SearchHit;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};

struct WriterState {
    rng: ChaCha8Rng,
}

/// HNSW index over caller-assigned u64 ids.
///
/// # Example
///
/// ```rust
/// use simvec::{HnswIndex, HnswParams, IndexDescriptor, IndexKey, IndexKind, Metric, Quantization};
///
/// let descriptor = IndexDescriptor {
///     key: IndexKey::new("docs", "embedding"),
///     kind: IndexKind::Hnsw,
///     metric: Metric::Cosine,
///     quantization: Quantization::None,
///     dimension: 4,
///     params: HnswParams::default().with_seed(42),
/// };
/// let index = HnswIndex::new(descriptor).unwrap();
///
/// use simvec::VectorIndex;
/// index.add(1, &[1.0, 0.0, 0.0, 0.0], None).unwrap();
/// index.add(2, &[0.0, 1.0, 0.0, 0.0], None).unwrap();
///
/// let hits = index.search(&[0.9, 0.1, 0.0, 0.0], 1, None, None).unwrap();
/// assert_eq!(hits[0].id, 1);
/// ```
pub struct HnswIndex {
    descriptor: IndexDescriptor,
    graph: Graph,
    writer: Mutex<WriterState>,
    contexts: ContextPool,
    poisoned: AtomicBool,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("descriptor", &self.descriptor)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

impl HnswIndex {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid descriptor or parameter set.
    pub fn new(descriptor: IndexDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let graph = Graph::new(
            descriptor.dimension as usize,
            descriptor.metric,
            descriptor.quantization,
        );
        Ok(Self::from_parts(descriptor, graph))
    }

    /// Assembles an index around restored graph state (snapshot restore
    /// path; the graph has already been validated).
    pub(crate) fn from_parts(descriptor: IndexDescriptor, graph: Graph) -> Self {
        let seed = descriptor.params.seed.unwrap_or_else(rand::random);
        Self {
            descriptor,
            graph,
            writer: Mutex::new(WriterState {
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
            contexts: ContextPool::new(),
            poisoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    fn dimension(&self) -> usize {
        self.descriptor.dimension as usize
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::Corrupt(
                "index poisoned by an earlier invariant violation".into(),
            ));
        }
        Ok(())
    }

    /// Poisons the index on corruption so later calls fail fast; other
    /// error kinds pass through untouched.
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_corruption() {
                log::error!("hnsw index {}: {err}", self.descriptor.key);
                self.poisoned.store(true, Ordering::Release);
            }
        }
        result
    }

    fn validate_query(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        validate_finite(vector)
    }

    /// Inserts many vectors in one writer-lock acquisition.
    ///
    /// Best-effort semantics: a dimension mismatch on the *first* vector
    /// fails the whole batch; later mismatches, duplicates, and
    /// non-finite vectors are skipped. Returns the ids actually inserted,
    /// in insertion order.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` (first vector), `Cancelled`, or `Corrupt`.
    pub fn insert_batch<I>(&self, vectors: I, cancel: Option<&CancelToken>) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = (u64, Vec<f32>)>,
    {
        self.check_poisoned()?;
        let batch: Vec<(u64, Vec<f32>)> = vectors.into_iter().collect();
        let Some((_, first)) = batch.first() else {
            return Ok(Vec::new());
        };
        if first.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: first.len(),
            });
        }

        let mut inserted = Vec::with_capacity(batch.len());
        let mut writer = self.writer.lock();
        let mut ctx = self.contexts.acquire();
        let result = (|| -> Result<()> {
            for (id, vector) in &batch {
                cancel::check(cancel)?;
                if vector.len() != self.dimension() || validate_finite(vector).is_err() {
                    continue;
                }
                match insert::insert(
                    &self.graph,
                    &self.descriptor.params,
                    &mut ctx,
                    &mut writer.rng,
                    *id,
                    vector,
                    cancel,
                ) {
                    Ok(()) => inserted.push(*id),
                    Err(Error::DuplicateId { .. }) => continue,
                    Err(other) => return Err(other),
                }
                self.maybe_seal()?;
            }
            Ok(())
        })();
        self.contexts.release(ctx);
        self.guard(result)?;
        Ok(inserted)
    }

    /// Point-in-time serialized graph state. Quiesces writers for the
    /// duration; readers are unaffected.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the index is poisoned.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        self.check_poisoned()?;
        let _quiesce = self.writer.lock();
        crate::persistence::encode_snapshot(self)
    }

    /// Restores an index from snapshot bytes, revalidating structure and
    /// every stored vector.
    ///
    /// # Errors
    ///
    /// [`Error::Snapshot`] if the bytes fail checksum, header, or
    /// invariant validation; nothing is partially loaded.
    pub fn restore(descriptor: IndexDescriptor, bytes: &[u8]) -> Result<Self> {
        descriptor.validate()?;
        crate::persistence::decode_snapshot(descriptor, bytes)
    }

    fn maybe_seal(&self) -> Result<()> {
        if self.descriptor.quantization == Quantization::Scalar8
            && self.graph.calibration.load().is_none()
            && self.graph.nodes.len() >= SQ8_CALIBRATION_SAMPLE
        {
            insert::seal_sq8(&self.graph)?;
        }
        Ok(())
    }

    /// Verifies every structural invariant of the graph: mutual neighbor
    /// membership per layer, degree bounds, entry-point consistency.
    /// Quiesces writers for the duration. Intended for host integrity
    /// checks and tests; a failure poisons the index.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] describing the first violation found.
    pub fn check_integrity(&self) -> Result<()> {
        self.check_poisoned()?;
        let _quiesce = self.writer.lock();
        let result = self.graph.check_invariants(&self.descriptor.params);
        self.guard(result)
    }

    /// Seals SQ8 staging with whatever samples exist. Snapshots call this
    /// so the on-disk form always carries codes plus calibration.
    pub(crate) fn seal_if_staging(&self) -> Result<()> {
        if self.descriptor.quantization == Quantization::Scalar8
            && self.graph.calibration.load().is_none()
            && !self.graph.nodes.is_empty()
        {
            insert::seal_sq8(&self.graph)?;
        }
        Ok(())
    }

    fn search_graph(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        let mut ctx = self.contexts.acquire();
        let result = self.search_with_ctx(&mut ctx, query, k, ef_override, cancel);
        self.contexts.release(ctx);
        result
    }

    fn search_with_ctx(
        &self,
        ctx: &mut SearchContext,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        let graph = &self.graph;
        let query = graph.query(query);

        // Capture the entry point. A concurrent remove may be mid-way
        // through re-election, so retry briefly, then fall back to a scan.
        let mut start = None;
        for _ in 0..4 {
            match graph.entry_point() {
                None => break,
                Some(ep) => {
                    if let Some(node) = graph.node(ep.id) {
                        start = Some(node);
                        break;
                    }
                }
            }
        }
        if start.is_none() {
            start = graph
                .nodes
                .iter()
                .map(|entry| std::sync::Arc::clone(entry.value()))
                .max_by(|a, b| a.layer.cmp(&b.layer).then(b.id.cmp(&a.id)));
        }
        let Some(start_node) = start else {
            return Ok(Vec::new());
        };

        let mut current = Candidate {
            distance: graph.distance(&query, &start_node.payload, &mut ctx.calib)?,
            id: start_node.id,
        };
        for layer in (1..=start_node.layer).rev() {
            current = greedy_descend(graph, ctx, &query, current, layer, cancel)?;
        }

        let ef = ef_override
            .unwrap_or(self.descriptor.params.ef_search as usize)
            .max(k);
        search_layer(graph, ctx, &query, &[current], ef, 0, cancel)?;

        Ok(ctx
            .scratch
            .iter()
            .take(k)
            .map(|c| SearchHit {
                id: c.id,
                distance: c.distance,
            })
            .collect())
    }
}

impl VectorIndex for HnswIndex {
    fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn add(&self, id: u64, vector: &[f32], cancel: Option<&CancelToken>) -> Result<()> {
        self.check_poisoned()?;
        self.validate_query(vector)?;

        let mut writer = self.writer.lock();
        let mut ctx = self.contexts.acquire();
        let result = insert::insert(
            &self.graph,
            &self.descriptor.params,
            &mut ctx,
            &mut writer.rng,
            id,
            vector,
            cancel,
        )
        .and_then(|()| self.maybe_seal());
        self.contexts.release(ctx);
        self.guard(result)
    }

    fn remove(&self, id: u64) -> Result<bool> {
        self.check_poisoned()?;
        let _writer = self.writer.lock();
        let result = insert::remove(&self.graph, id);
        self.guard(result)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        self.check_poisoned()?;
        self.validate_query(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let result = self.search_graph(query, k, ef_override, cancel);
        self.guard(result)
    }

    fn len(&self) -> usize {
        self.graph.nodes.len()
    }

    fn memory_bytes(&self) -> u64 {
        self.graph.memory_bytes()
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        self.snapshot_bytes().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexKey, IndexKind};
    use crate::metric::Metric;

    fn descriptor(dim: u32, metric: Metric, seed: u64) -> IndexDescriptor {
        IndexDescriptor {
            key: IndexKey::new("docs", "embedding"),
            kind: IndexKind::Hnsw,
            metric,
            quantization: Quantization::None,
            dimension: dim,
            params: HnswParams::default().with_seed(seed),
        }
    }

    fn small_index(metric: Metric) -> HnswIndex {
        let mut d = descriptor(2, metric, 42);
        d.params = d.params.with_m(4).with_ef_construction(8).with_ef_search(8);
        HnswIndex::new(d).unwrap()
    }

    #[test]
    fn cardinal_directions_cosine() {
        // Four unit vectors at the cardinal directions; the query leans
        // toward +x with a slight +y component.
        let index = small_index(Metric::Cosine);
        index.add(1, &[1.0, 0.0], None).unwrap();
        index.add(2, &[0.0, 1.0], None).unwrap();
        index.add(3, &[-1.0, 0.0], None).unwrap();
        index.add(4, &[0.0, -1.0], None).unwrap();

        let hits = index.search(&[0.9, 0.1], 2, None, None).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn duplicate_id_rejected_without_side_effects() {
        let index = small_index(Metric::L2);
        index.add(1, &[0.0, 0.0], None).unwrap();
        assert!(matches!(
            index.add(1, &[1.0, 1.0], None),
            Err(Error::DuplicateId { id: 1 })
        ));
        assert_eq!(index.len(), 1);
        let hits = index.search(&[1.0, 1.0], 1, None, None).unwrap();
        assert!((hits[0].distance - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn remove_then_search_excludes_id() {
        let index = small_index(Metric::L2);
        for i in 1..=20u64 {
            #[allow(clippy::cast_precision_loss)]
            index.add(i, &[i as f32, 0.0], None).unwrap();
        }
        assert!(index.remove(1).unwrap());
        assert!(!index.remove(1).unwrap());
        let hits = index.search(&[0.0, 0.0], 3, None, None).unwrap();
        assert!(hits.iter().all(|h| h.id != 1));
        assert_eq!(hits[0].id, 2);
        assert_eq!(index.len(), 19);
    }

    #[test]
    fn remove_entry_point_reelects() {
        let index = small_index(Metric::L2);
        for i in 1..=50u64 {
            #[allow(clippy::cast_precision_loss)]
            index.add(i, &[(i % 7) as f32, (i % 11) as f32], None).unwrap();
        }
        // Remove whatever is currently the entry point until the graph is
        // half gone; searches must keep working throughout.
        for _ in 0..25 {
            let entry = index.graph().entry_point().unwrap();
            assert!(index.remove(entry.id).unwrap());
            let hits = index.search(&[3.0, 5.0], 5, None, None).unwrap();
            assert!(!hits.is_empty());
        }
        assert_eq!(index.len(), 25);
    }

    #[test]
    fn empty_and_k_zero() {
        let index = small_index(Metric::L2);
        assert!(index.search(&[0.0, 0.0], 5, None, None).unwrap().is_empty());
        index.add(1, &[0.0, 0.0], None).unwrap();
        assert!(index.search(&[0.0, 0.0], 0, None, None).unwrap().is_empty());
    }

    #[test]
    fn batch_insert_skips_bad_entries() {
        let index = small_index(Metric::L2);
        let inserted = index
            .insert_batch(
                vec![
                    (1, vec![0.0, 0.0]),
                    (2, vec![f32::NAN, 0.0]),
                    (1, vec![1.0, 1.0]),
                    (3, vec![1.0]),
                    (4, vec![2.0, 2.0]),
                ],
                None,
            )
            .unwrap();
        assert_eq!(inserted, vec![1, 4]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn batch_insert_first_dimension_mismatch_is_fatal() {
        let index = small_index(Metric::L2);
        assert!(matches!(
            index.insert_batch(vec![(1, vec![0.0])], None),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn seed_determinism_across_builds() {
        let build = || {
            let index = small_index(Metric::L2);
            for i in 0..200u64 {
                #[allow(clippy::cast_precision_loss)]
                let v = [(i as f32 * 0.37).sin(), (i as f32 * 0.73).cos()];
                index.add(i + 1, &v, None).unwrap();
            }
            index
        };
        let a = build();
        let b = build();
        for q in 0..20 {
            #[allow(clippy::cast_precision_loss)]
            let query = [(q as f32 * 0.11).cos(), (q as f32 * 0.29).sin()];
            let ha = a.search(&query, 5, None, None).unwrap();
            let hb = b.search(&query, 5, None, None).unwrap();
            assert_eq!(ha.len(), hb.len());
            for (x, y) in ha.iter().zip(hb.iter()) {
                assert_eq!(x.id, y.id);
                assert_eq!(x.distance.to_bits(), y.distance.to_bits());
            }
        }
    }

    #[test]
    fn ef_override_widens_search() {
        let index = small_index(Metric::L2);
        for i in 0..100u64 {
            #[allow(clippy::cast_precision_loss)]
            index.add(i + 1, &[(i as f32 * 0.1).sin(), (i as f32 * 0.1).cos()], None).unwrap();
        }
        // Both must return k results; the override only changes effort.
        let narrow = index.search(&[0.0, 1.0], 10, Some(10), None).unwrap();
        let wide = index.search(&[0.0, 1.0], 10, Some(100), None).unwrap();
        assert_eq!(narrow.len(), 10);
        assert_eq!(wide.len(), 10);
    }

    #[test]
    fn cancelled_insert_leaves_index_usable() {
        let index = small_index(Metric::L2);
        for i in 1..=10u64 {
            #[allow(clippy::cast_precision_loss)]
            index.add(i, &[i as f32, 0.0], None).unwrap();
        }
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            index.add(99, &[0.5, 0.5], Some(&token)),
            Err(Error::Cancelled)
        ));
        // Not poisoned: cancellation is not corruption.
        index.add(11, &[11.0, 0.0], None).unwrap();
        assert_eq!(index.len(), 11);
    }
}
