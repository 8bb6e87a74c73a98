//! Distance metrics over vector pairs.
//!
//! Every metric returns a *distance* (smaller means closer) so that
//! `ORDER BY distance(...) ASC LIMIT k` behaves uniformly:
//!
//! - cosine: `1 − (a·b) / (‖a‖‖b‖)`, defined as `1` when either norm is 0;
//! - l2: `√Σ(aᵢ − bᵢ)²` (squared form available for ranking);
//! - dot: `−(a·b)`, negated so ascending order means most similar first;
//! - hamming: popcount of XOR over packed bits.
//!
//! Two implementations exist for the float kernels: a scalar reference in
//! [`scalar`] and a width-portable SIMD path in [`simd`]. Both are
//! deterministic for fixed input; the SIMD path agrees with the reference
//! within `1e-5` absolute plus `1e-5` relative. Neither allocates.

pub mod scalar;
pub mod simd;

use serde::{Deserialize, Serialize};

/// Distance metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Metric {
    /// Cosine distance: `1 − cos(a, b)`. Range [0, 2].
    #[default]
    Cosine,
    /// Euclidean distance (non-squared at the surface).
    L2,
    /// Negated dot product: `−(a·b)`.
    Dot,
    /// Bit-level Hamming distance over packed binary vectors.
    Hamming,
}

impl Metric {
    /// Wire code used by the snapshot format.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::L2 => 1,
            Metric::Dot => 2,
            Metric::Hamming => 3,
        }
    }

    /// Inverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::L2),
            2 => Some(Metric::Dot),
            3 => Some(Metric::Hamming),
            _ => None,
        }
    }

    /// Parses the lowercase names used in DDL `WITH (metric = '…')` options
    /// and in the `distance_<metric>` function family.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cosine" => Some(Metric::Cosine),
            "l2" | "euclidean" => Some(Metric::L2),
            "dot" => Some(Metric::Dot),
            "hamming" => Some(Metric::Hamming),
            _ => None,
        }
    }

    /// Name used in DDL options and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::Dot => "dot",
            Metric::Hamming => "hamming",
        }
    }

    /// Computes the surfaced distance between two float vectors.
    ///
    /// Callers guarantee equal lengths; the kernels assert it.
    /// [`Metric::Hamming`] has no float form and must go through
    /// [`hamming`] on packed bits instead.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => simd::cosine(a, b),
            Metric::L2 => simd::l2_sq(a, b).sqrt(),
            Metric::Dot => -simd::dot(a, b),
            // Bit-packed vectors never reach this path; the index layer
            // routes Hamming through the packed kernel.
            Metric::Hamming => unreachable!("hamming metric requires packed binary vectors"),
        }
    }
}

/// Hamming distance over packed bits: `popcount(a XOR b)`.
///
/// # Panics
///
/// Panics if the slices have different lengths.
#[inline]
#[must_use]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    simd::hamming(a, b)
}
