//! # simvec
//!
//! Vector similarity search for embedded SQL engines.
//!
//! simvec gives a host database vector columns, approximate-nearest-
//! neighbor indexes, and the plan rewrite that turns
//! `ORDER BY distance_cosine(col, :q) LIMIT k` into an index probe. The
//! host keeps parsing, storage, transactions, and recovery; simvec owns
//! everything between the column value and the candidate list:
//!
//! - **Distance kernels**: cosine, Euclidean, dot product, Hamming, with
//!   a width-portable SIMD path and a scalar reference.
//! - **Vector codec**: the validated on-disk form of a column value.
//! - **Quantization**: 8-bit scalar (per-dimension calibration) and
//!   1-bit binary, trading recall for memory.
//! - **Flat index**: exhaustive, exact, lock-free reads.
//! - **HNSW index**: layered proximity graph with single-writer /
//!   many-reader concurrency, deletion, and deterministic seeded builds.
//! - **Snapshot persistence**: checksummed point-in-time graph images.
//! - **Index registry**: per-database ownership, memory budgeting, lazy
//!   loading, LRU eviction.
//! - **SQL providers**: `distance_*` functions, the `VECTOR(D)` type,
//!   vector-index DDL, and the top-k plan hook.
//!
//! ## Example
//!
//! ```rust
//! use simvec::{
//!     ExtensionConfig, IndexDescriptor, IndexKey, IndexKind, IndexRegistry, HnswParams,
//!     MemoryBackend, Metric, Quantization,
//! };
//! use std::sync::Arc;
//!
//! let registry = IndexRegistry::new(
//!     ExtensionConfig::default(),
//!     Arc::new(MemoryBackend::new()),
//! );
//!
//! let key = IndexKey::new("docs", "embedding");
//! registry.create_index(
//!     IndexDescriptor {
//!         key: key.clone(),
//!         kind: IndexKind::Hnsw,
//!         metric: Metric::Cosine,
//!         quantization: Quantization::None,
//!         dimension: 4,
//!         params: HnswParams::default().with_seed(42),
//!     },
//!     0,
//! ).unwrap();
//!
//! registry.on_write_vector(&key, 1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
//! registry.on_write_vector(&key, 2, &[0.0, 1.0, 0.0, 0.0]).unwrap();
//!
//! let hits = registry.search(&key, &[0.9, 0.1, 0.0, 0.0], 1, None, None).unwrap();
//! assert_eq!(hits[0].id, 1);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

/// Cooperative cancellation tokens.
pub mod cancel;

/// On-disk codec for vector column values.
pub mod codec;

/// Extension configuration.
pub mod config;

/// Unified error handling.
pub mod error;

/// Flat and HNSW indexes.
pub mod index;

/// Distance metrics.
pub mod metric;

/// Snapshot persistence and storage backends.
pub mod persistence;

/// Quantization support.
pub mod quantization;

/// The memory-bounded index registry.
pub mod registry;

/// Host SQL surface: functions, types, DDL, plan hook.
pub mod sql;

/// Bounded top-k selection.
pub mod topk;

pub use cancel::CancelToken;
pub use config::ExtensionConfig;
pub use error::{Error, Result};
pub use index::{
    FlatIndex, HnswIndex, HnswParams, IndexDescriptor, IndexKey, IndexKind, VectorIndex,
};
pub use metric::Metric;
pub use persistence::{DirectoryBackend, MemoryBackend, SnapshotError, StorageBackend};
pub use quantization::Quantization;
pub use registry::{IndexRegistry, IndexState, IndexStatus};
pub use sql::{PlanDecision, PlanHook, QueryShape, SqlValue, VectorFunctions, VectorType};
pub use topk::{SearchHit, TopK};

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
