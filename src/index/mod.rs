//! Index descriptors and the common index interface.

pub mod flat;
pub mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::metric::Metric;
use crate::quantization::Quantization;
use crate::topk::SearchHit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key: one index per (table, column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl IndexKey {
    /// Builds a key from table and column names.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Snapshot blob name for this key: `{table}_{column}.hnsw`.
    #[must_use]
    pub fn snapshot_name(&self) -> String {
        format!("{}_{}.hnsw", self.table, self.column)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Index algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexKind {
    /// Exhaustive scan index; exact, O(n) per query.
    Flat,
    /// Hierarchical navigable small world graph; approximate, sublinear.
    #[default]
    Hnsw,
}

impl IndexKind {
    /// Parses the DDL `USING` clause names.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "flat" => Some(IndexKind::Flat),
            "hnsw" => Some(IndexKind::Hnsw),
            _ => None,
        }
    }

    /// Name used in DDL and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Hnsw => "hnsw",
        }
    }
}

/// Everything needed to (re)construct an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Owning table and column.
    pub key: IndexKey,
    /// Index algorithm.
    pub kind: IndexKind,
    /// Distance metric.
    pub metric: Metric,
    /// Payload quantization.
    pub quantization: Quantization,
    /// Column dimension, frozen at creation.
    pub dimension: u32,
    /// HNSW tuning parameters (defaults are carried even for flat indexes
    /// so a later `USING HNSW` rebuild starts from the same descriptor).
    pub params: HnswParams,
}

impl IndexDescriptor {
    /// Validates metric/quantization pairing and parameter ranges.
    ///
    /// Binary quantization is defined only for the Hamming metric, and the
    /// Hamming metric only for binary-quantized payloads.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the offending combination.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be at least 1".into()));
        }
        match (self.metric, self.quantization) {
            (Metric::Hamming, Quantization::Binary) => {}
            (Metric::Hamming, other) => {
                return Err(Error::Config(format!(
                    "hamming metric requires binary quantization, got '{}'",
                    other.name()
                )));
            }
            (metric, Quantization::Binary) => {
                return Err(Error::Config(format!(
                    "binary quantization supports only the hamming metric, got '{}'",
                    metric.name()
                )));
            }
            _ => {}
        }
        self.params.validate()
    }

    /// Estimated steady-state bytes per stored vector, used for
    /// admission-time budgeting.
    #[must_use]
    pub fn estimated_bytes_per_vector(&self) -> u64 {
        let payload = self.quantization.payload_len(self.dimension as usize) as u64;
        let graph_overhead = match self.kind {
            IndexKind::Flat => 16, // id + live bit + slot bookkeeping
            // id, layer cells and neighbor lists; layer>0 nodes amortize to
            // roughly one extra list.
            IndexKind::Hnsw => 32 + u64::from(self.params.m) * 2 * 8,
        };
        payload + graph_overhead
    }
}

impl std::fmt::Debug for dyn VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

/// Common interface the registry drives. Implementations use interior
/// mutability: writers serialize on an internal lock while searches stay
/// lock-free (§ concurrency discipline).
pub trait VectorIndex: Send + Sync {
    /// The descriptor this index was built from.
    fn descriptor(&self) -> &IndexDescriptor;

    /// Inserts a vector under the caller-supplied id.
    ///
    /// # Errors
    ///
    /// `DuplicateId`, `DimensionMismatch`, `InvalidVector`, `Cancelled`,
    /// or `Corrupt` if the index is poisoned.
    fn add(&self, id: u64, vector: &[f32], cancel: Option<&CancelToken>) -> Result<()>;

    /// Removes a vector. Returns false if the id was not present.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the index is poisoned.
    fn remove(&self, id: u64) -> Result<bool>;

    /// Returns the `k` nearest ids in ascending distance order.
    ///
    /// `ef_override` widens the candidate set for HNSW searches; flat
    /// searches ignore it.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch`, `InvalidVector`, `Cancelled`, or `Corrupt`.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>>;

    /// Number of live vectors.
    fn len(&self) -> usize;

    /// True when no live vectors are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact bytes held in memory (payloads, graph, masks, bookkeeping).
    fn memory_bytes(&self) -> u64;

    /// Serialized point-in-time state, or `None` for kinds that are
    /// rebuilt from table data instead of snapshotted.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the index is poisoned.
    fn snapshot(&self) -> Result<Option<Vec<u8>>>;
}

/// Re-export: hits are the shared result type between indexes and the
/// planner.
pub type SearchResult = SearchHit;

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(metric: Metric, quantization: Quantization) -> IndexDescriptor {
        IndexDescriptor {
            key: IndexKey::new("docs", "embedding"),
            kind: IndexKind::Hnsw,
            metric,
            quantization,
            dimension: 8,
            params: HnswParams::default(),
        }
    }

    #[test]
    fn snapshot_name_layout() {
        let key = IndexKey::new("docs", "embedding");
        assert_eq!(key.snapshot_name(), "docs_embedding.hnsw");
    }

    #[test]
    fn hamming_requires_binary() {
        assert!(descriptor(Metric::Hamming, Quantization::Binary).validate().is_ok());
        assert!(descriptor(Metric::Hamming, Quantization::None).validate().is_err());
        assert!(descriptor(Metric::Cosine, Quantization::Binary).validate().is_err());
        assert!(descriptor(Metric::Cosine, Quantization::Scalar8).validate().is_ok());
    }

    #[test]
    fn descriptor_serializes() {
        let d = descriptor(Metric::Cosine, Quantization::None);
        let bytes = postcard::to_allocvec(&d).unwrap();
        let back: IndexDescriptor = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(d, back);
    }
}
