//! HNSW tuning parameters.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Hard cap on node layers. Keeps a pathological level draw from
/// allocating an absurd link array.
pub const MAX_LEVEL: u8 = 16;

/// HNSW algorithm parameters.
///
/// # Parameter guidelines (from the paper)
///
/// - `m`: 12–48 for high recall, 4–8 for speed
/// - `ef_construction`: higher = better graph quality, slower build
/// - `ef_search`: higher = better recall, slower query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Target connections per node on layers above 0. Layer 0 allows `2m`.
    pub m: u32,

    /// Candidate-set width during insertion.
    pub ef_construction: u32,

    /// Candidate-set width during search (floor; queries may widen it).
    pub ef_search: u32,

    /// RNG seed for level draws. `None` draws a seed from the OS at index
    /// construction, making graph shape non-reproducible.
    pub seed: Option<u64>,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: None,
        }
    }
}

impl HnswParams {
    /// Sets `m`.
    #[must_use]
    pub fn with_m(mut self, m: u32) -> Self {
        self.m = m;
        self
    }

    /// Sets `ef_construction`.
    #[must_use]
    pub fn with_ef_construction(mut self, ef: u32) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Sets `ef_search`.
    #[must_use]
    pub fn with_ef_search(mut self, ef: u32) -> Self {
        self.ef_search = ef;
        self
    }

    /// Sets the seed for deterministic builds.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Degree bound for a layer: `2m` on layer 0, `m` above.
    #[must_use]
    pub fn m_max(&self, layer: u8) -> usize {
        if layer == 0 {
            (self.m as usize) * 2
        } else {
            self.m as usize
        }
    }

    /// Level multiplier `1 / ln(m)`.
    #[must_use]
    pub fn level_mult(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let m = self.m as f32;
        if m > 1.0 {
            1.0 / m.ln()
        } else {
            0.0
        }
    }

    /// Rejects out-of-range parameters.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the offending parameter.
    pub fn validate(&self) -> Result<()> {
        if self.m <= 1 {
            return Err(Error::Config(format!("m must be > 1, got {}", self.m)));
        }
        if self.m > 512 {
            return Err(Error::Config(format!("m must be <= 512, got {}", self.m)));
        }
        if self.ef_construction == 0 {
            return Err(Error::Config("ef_construction must be > 0".into()));
        }
        if self.ef_search == 0 {
            return Err(Error::Config("ef_search must be > 0".into()));
        }
        Ok(())
    }
}
