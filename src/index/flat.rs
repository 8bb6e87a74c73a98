//! Flat (exhaustive) index.
//!
//! The correctness oracle and the right choice for small datasets: every
//! query scans all live vectors through the top-k selector, so results are
//! exact by construction.
//!
//! # Layout and concurrency
//!
//! Vectors and ids live in fixed-capacity chunks behind an
//! [`ArcSwap`] snapshot handle. Readers load the handle once and scan
//! without any lock; writers serialize on a mutex, build a new snapshot
//! sharing every untouched chunk, and publish it with a single atomic
//! swap. Appending copies at most one chunk (256 vectors), which keeps
//! insertion O(1) amortized while snapshots stay immutable.
//!
//! Removal only flips a bit in the live mask; storage is reclaimed by
//! [`FlatIndex::compact`].

use crate::cancel::{self, CancelToken};
use crate::codec::validate_finite;
use crate::error::{Error, Result};
use crate::index::{IndexDescriptor, VectorIndex};
use crate::metric::{self, Metric};
use crate::quantization::{BinaryQuantizer, Quantization, Sq8Calibration, SQ8_CALIBRATION_SAMPLE};
use crate::topk::{SearchHit, TopK};
use arc_swap::ArcSwap;
use bitvec::prelude::*;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Vectors per storage chunk. An append rewrites at most this many
/// vectors, bounding the copy-on-write cost of snapshot publication.
const CHUNK_VECTORS: usize = 256;

#[derive(Debug, Clone)]
enum ChunkPayload {
    F32(Vec<f32>),
    Sq8(Vec<u8>),
    Binary(Vec<u8>),
}

impl ChunkPayload {
    fn bytes(&self) -> usize {
        match self {
            ChunkPayload::F32(v) => v.len() * 4,
            ChunkPayload::Sq8(v) | ChunkPayload::Binary(v) => v.len(),
        }
    }
}

#[derive(Debug)]
struct Chunk {
    ids: Vec<u64>,
    payload: ChunkPayload,
}

impl Chunk {
    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug)]
struct FlatSnapshot {
    chunks: Vec<Arc<Chunk>>,
    live: BitVec<u8, Lsb0>,
    live_count: usize,
    total: usize,
    /// Present once SQ8 staging has sealed; `None` payloads stay f32.
    calibration: Option<Arc<Sq8Calibration>>,
}

impl FlatSnapshot {
    fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            live: BitVec::new(),
            live_count: 0,
            total: 0,
            calibration: None,
        }
    }
}

#[derive(Debug, Default)]
struct FlatWriter {
    /// id → global slot, for duplicate rejection and O(1) removal.
    slots: FxHashMap<u64, u32>,
}

/// Brute-force index over a chunked, atomically published snapshot.
pub struct FlatIndex {
    descriptor: IndexDescriptor,
    snapshot: ArcSwap<FlatSnapshot>,
    writer: Mutex<FlatWriter>,
}

impl FlatIndex {
    /// Creates an empty flat index.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid descriptor (bad metric/quantization
    /// pairing, zero dimension).
    pub fn new(descriptor: IndexDescriptor) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            snapshot: ArcSwap::from_pointee(FlatSnapshot::empty()),
            writer: Mutex::new(FlatWriter::default()),
        })
    }

    fn dimension(&self) -> usize {
        self.descriptor.dimension as usize
    }

    /// Stride in payload units (f32 samples or bytes) per vector.
    fn stride(&self, payload: &ChunkPayload) -> usize {
        match payload {
            ChunkPayload::F32(_) => self.dimension(),
            ChunkPayload::Sq8(_) => self.dimension(),
            ChunkPayload::Binary(_) => BinaryQuantizer::packed_len(self.dimension()),
        }
    }

    /// Fraction of stored slots that are tombstoned.
    #[must_use]
    pub fn tombstone_ratio(&self) -> f32 {
        let snap = self.snapshot.load();
        if snap.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (snap.total - snap.live_count) as f32 / snap.total as f32
        }
    }

    /// Rebuilds the snapshot without tombstoned slots, reclaiming their
    /// storage. Ids are preserved; slot order follows insertion order of
    /// the survivors.
    pub fn compact(&self) {
        let mut writer = self.writer.lock();
        let old = self.snapshot.load_full();

        let mut next = FlatSnapshot::empty();
        next.calibration = old.calibration.clone();
        let mut slots = FxHashMap::default();

        for (slot, id, payload) in iter_entries(&old) {
            if !old.live[slot] {
                continue;
            }
            let new_slot = next.total;
            append_raw(&mut next, id, payload);
            slots.insert(id, new_slot as u32);
        }

        writer.slots = slots;
        self.snapshot.store(Arc::new(next));
    }

    fn encode_payload(&self, vector: &[f32], calibration: Option<&Sq8Calibration>) -> RawPayload {
        match (self.descriptor.quantization, calibration) {
            (Quantization::None, _) | (Quantization::Scalar8, None) => {
                RawPayload::F32(vector.to_vec())
            }
            (Quantization::Scalar8, Some(calib)) => RawPayload::Sq8(calib.encode(vector)),
            (Quantization::Binary, _) => RawPayload::Binary(BinaryQuantizer::encode(vector)),
        }
    }

    /// Seals SQ8 staging: trains the calibration over every staged vector
    /// and re-encodes all chunks. Called with the writer lock held.
    fn seal_sq8(&self, snap: &mut FlatSnapshot) -> Result<()> {
        let dim = self.dimension();

        let mut staged: Vec<&[f32]> = Vec::with_capacity(snap.total);
        for chunk in &snap.chunks {
            if let ChunkPayload::F32(data) = &chunk.payload {
                for row in data.chunks_exact(dim) {
                    staged.push(row);
                }
            }
        }
        let calib = Arc::new(Sq8Calibration::train(dim, staged.iter().copied())?);

        let mut chunks = Vec::with_capacity(snap.chunks.len());
        for chunk in &snap.chunks {
            let ChunkPayload::F32(data) = &chunk.payload else {
                // Staging holds f32 only; anything else means the seal ran
                // twice, which the calibration check prevents.
                return Err(Error::Corrupt("sq8 staging contained sealed chunks".into()));
            };
            let mut codes = Vec::with_capacity(chunk.len() * dim);
            let mut scratch = Vec::new();
            for row in data.chunks_exact(dim) {
                calib.encode_into(row, &mut scratch);
                codes.extend_from_slice(&scratch);
            }
            chunks.push(Arc::new(Chunk {
                ids: chunk.ids.clone(),
                payload: ChunkPayload::Sq8(codes),
            }));
        }

        snap.chunks = chunks;
        snap.calibration = Some(calib);
        Ok(())
    }
}

/// Owned payload for one vector, in whatever form the index stores.
enum RawPayload {
    F32(Vec<f32>),
    Sq8(Vec<u8>),
    Binary(Vec<u8>),
}

/// Appends one vector to the snapshot, copying at most the tail chunk.
fn append_raw(snap: &mut FlatSnapshot, id: u64, payload: RawPayload) {
    let reuse_tail = snap
        .chunks
        .last()
        .is_some_and(|chunk| chunk.len() < CHUNK_VECTORS);

    if reuse_tail {
        let tail = snap.chunks.pop().expect("tail chunk checked above");
        let mut ids = tail.ids.clone();
        ids.push(id);
        let new_payload = match (&tail.payload, payload) {
            (ChunkPayload::F32(data), RawPayload::F32(v)) => {
                let mut data = data.clone();
                data.extend_from_slice(&v);
                ChunkPayload::F32(data)
            }
            (ChunkPayload::Sq8(data), RawPayload::Sq8(v)) => {
                let mut data = data.clone();
                data.extend_from_slice(&v);
                ChunkPayload::Sq8(data)
            }
            (ChunkPayload::Binary(data), RawPayload::Binary(v)) => {
                let mut data = data.clone();
                data.extend_from_slice(&v);
                ChunkPayload::Binary(data)
            }
            // A form switch (sq8 sealing) rebuilds every chunk before any
            // append can observe a mix.
            _ => unreachable!("chunk payload form mismatch"),
        };
        snap.chunks.push(Arc::new(Chunk {
            ids,
            payload: new_payload,
        }));
    } else {
        let payload = match payload {
            RawPayload::F32(v) => ChunkPayload::F32(v),
            RawPayload::Sq8(v) => ChunkPayload::Sq8(v),
            RawPayload::Binary(v) => ChunkPayload::Binary(v),
        };
        snap.chunks.push(Arc::new(Chunk {
            ids: vec![id],
            payload,
        }));
    }

    snap.live.push(true);
    snap.live_count += 1;
    snap.total += 1;
}

/// Iterates `(global_slot, id, payload_row)` over every stored entry.
fn iter_entries(snap: &FlatSnapshot) -> impl Iterator<Item = (usize, u64, RawPayload)> + '_ {
    let mut slot = 0usize;
    snap.chunks.iter().flat_map(move |chunk| {
        let base = slot;
        slot += chunk.len();
        (0..chunk.len()).map(move |i| {
            let row = match &chunk.payload {
                ChunkPayload::F32(data) => {
                    let stride = data.len() / chunk.len();
                    RawPayload::F32(data[i * stride..(i + 1) * stride].to_vec())
                }
                ChunkPayload::Sq8(data) => {
                    let stride = data.len() / chunk.len();
                    RawPayload::Sq8(data[i * stride..(i + 1) * stride].to_vec())
                }
                ChunkPayload::Binary(data) => {
                    let stride = data.len() / chunk.len();
                    RawPayload::Binary(data[i * stride..(i + 1) * stride].to_vec())
                }
            };
            (base + i, chunk.ids[i], row)
        })
    })
}

impl VectorIndex for FlatIndex {
    fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    fn add(&self, id: u64, vector: &[f32], cancel: Option<&CancelToken>) -> Result<()> {
        cancel::check(cancel)?;
        if vector.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        validate_finite(vector)?;

        let mut writer = self.writer.lock();
        if writer.slots.contains_key(&id) {
            return Err(Error::DuplicateId { id });
        }

        let old = self.snapshot.load_full();
        let mut next = FlatSnapshot {
            chunks: old.chunks.clone(),
            live: old.live.clone(),
            live_count: old.live_count,
            total: old.total,
            calibration: old.calibration.clone(),
        };

        let payload = self.encode_payload(vector, next.calibration.as_deref());
        let slot = next.total;
        append_raw(&mut next, id, payload);

        if self.descriptor.quantization == Quantization::Scalar8
            && next.calibration.is_none()
            && next.total >= SQ8_CALIBRATION_SAMPLE
        {
            self.seal_sq8(&mut next)?;
        }

        writer.slots.insert(id, slot as u32);
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    fn remove(&self, id: u64) -> Result<bool> {
        let mut writer = self.writer.lock();
        let Some(slot) = writer.slots.remove(&id) else {
            return Ok(false);
        };

        let old = self.snapshot.load_full();
        let mut live = old.live.clone();
        live.set(slot as usize, false);
        let next = FlatSnapshot {
            chunks: old.chunks.clone(),
            live,
            live_count: old.live_count - 1,
            total: old.total,
            calibration: old.calibration.clone(),
        };
        self.snapshot.store(Arc::new(next));
        Ok(true)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        validate_finite(query)?;

        let metric = self.descriptor.metric;
        let query_bits = if metric == Metric::Hamming {
            Some(BinaryQuantizer::encode(query))
        } else {
            None
        };

        let snap = self.snapshot.load_full();
        let mut topk = TopK::new(k);
        let mut slot = 0usize;

        for chunk in &snap.chunks {
            cancel::check(cancel)?;
            let stride = self.stride(&chunk.payload);
            for (i, &id) in chunk.ids.iter().enumerate() {
                if !snap.live[slot + i] {
                    continue;
                }
                let distance = match &chunk.payload {
                    ChunkPayload::F32(data) => {
                        metric.distance(query, &data[i * stride..(i + 1) * stride])
                    }
                    ChunkPayload::Sq8(data) => {
                        let calib = snap
                            .calibration
                            .as_deref()
                            .ok_or_else(|| Error::Corrupt("sq8 chunk without calibration".into()))?;
                        calib.distance(metric, query, &data[i * stride..(i + 1) * stride])
                    }
                    ChunkPayload::Binary(data) => {
                        let bits = query_bits.as_deref().expect("hamming metric validated");
                        #[allow(clippy::cast_precision_loss)]
                        {
                            metric::hamming(bits, &data[i * stride..(i + 1) * stride]) as f32
                        }
                    }
                };
                topk.offer(id, distance);
            }
            slot += chunk.len();
        }

        Ok(topk.into_sorted())
    }

    fn len(&self) -> usize {
        self.snapshot.load().live_count
    }

    fn memory_bytes(&self) -> u64 {
        let snap = self.snapshot.load();
        let mut bytes = 0u64;
        for chunk in &snap.chunks {
            bytes += (chunk.ids.len() * 8) as u64;
            bytes += chunk.payload.bytes() as u64;
        }
        bytes += (snap.live.capacity() / 8) as u64;
        if let Some(calib) = &snap.calibration {
            bytes += calib.memory_bytes();
        }
        // Writer-side slot map: key + value + hash bucket.
        bytes += (self.writer.lock().slots.len() * 16) as u64;
        bytes
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        // Flat indexes are rebuilt from table data by the host's
        // post-commit replay; there is no snapshot form.
        Ok(None)
    }
}
