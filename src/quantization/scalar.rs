//! 8-bit scalar quantization (SQ8).
//!
//! # Algorithm
//!
//! Calibration finds a per-dimension `(min, max)` over a sample of at
//! least [`SQ8_CALIBRATION_SAMPLE`] vectors (or all of them, if fewer).
//! Encoding maps each sample into `[0, 255]` with clamping:
//!
//! ```text
//! q = clamp(round((x − min[d]) / (max[d] − min[d]) × 255), 0, 255)
//! x ≈ min[d] + q × (max[d] − min[d]) / 255
//! ```
//!
//! Distances are asymmetric: the query stays in f32 while database codes
//! decode on the fly inside the accumulation loop, preserving the
//! mathematical form of cosine / L2 / dot without materializing a decoded
//! vector per candidate.
//!
//! A calibration is sealed once built (it never adapts to later inserts)
//! and serializes as `2·D` little-endian f32 words (`min[0..D]` then
//! `max[0..D]`) alongside the index.

use crate::error::{Error, Result};
use crate::metric::Metric;

/// Calibration sample size: indexes stage raw vectors until this many have
/// been collected (or the dataset is exhausted) before sealing.
pub const SQ8_CALIBRATION_SAMPLE: usize = 1024;

/// Sealed per-dimension calibration for SQ8 encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Sq8Calibration {
    min: Box<[f32]>,
    // Precomputed (max - min) / 255 per dimension; zero for flat dimensions.
    scale: Box<[f32]>,
    max: Box<[f32]>,
}

impl Sq8Calibration {
    /// Builds a calibration from sample vectors.
    ///
    /// Every sample must have `dimension` entries; dimensions where all
    /// samples agree get a zero range and always encode to 0.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] if a sample has the wrong length;
    /// [`Error::InvalidVector`] if the sample set is empty.
    pub fn train<'a, I>(dimension: usize, samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut min = vec![f32::MAX; dimension];
        let mut max = vec![f32::MIN; dimension];
        let mut seen = 0usize;

        for sample in samples {
            if sample.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: sample.len(),
                });
            }
            for (d, &val) in sample.iter().enumerate() {
                if val < min[d] {
                    min[d] = val;
                }
                if val > max[d] {
                    max[d] = val;
                }
            }
            seen += 1;
        }

        if seen == 0 {
            return Err(Error::InvalidVector(
                "cannot calibrate from an empty sample".into(),
            ));
        }

        let scale = min
            .iter()
            .zip(max.iter())
            .map(|(&lo, &hi)| {
                let range = hi - lo;
                if range > 0.0 {
                    range / 255.0
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            min: min.into_boxed_slice(),
            scale,
            max: max.into_boxed_slice(),
        })
    }

    /// Number of dimensions this calibration covers.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    /// Encodes one vector into `out` (cleared first). Out-of-range samples
    /// clamp to the calibrated range.
    ///
    /// # Panics
    ///
    /// Panics if `vector` has the wrong dimension.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        assert_eq!(vector.len(), self.dimension(), "dimension mismatch");
        out.clear();
        out.reserve(vector.len());
        for (d, &val) in vector.iter().enumerate() {
            if self.scale[d] == 0.0 {
                out.push(0);
                continue;
            }
            let norm = (val - self.min[d]) / self.scale[d];
            out.push(norm.round().clamp(0.0, 255.0) as u8);
        }
    }

    /// Encodes one vector into a fresh buffer.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(vector, &mut out);
        out
    }

    /// Reconstructs the approximate f32 value of one dimension.
    #[inline]
    #[must_use]
    pub fn decode_sample(&self, d: usize, code: u8) -> f32 {
        self.min[d] + f32::from(code) * self.scale[d]
    }

    /// Decodes a full code vector.
    ///
    /// # Panics
    ///
    /// Panics if `codes` has the wrong dimension.
    #[must_use]
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        assert_eq!(codes.len(), self.dimension(), "dimension mismatch");
        codes
            .iter()
            .enumerate()
            .map(|(d, &q)| self.decode_sample(d, q))
            .collect()
    }

    /// Asymmetric distance between an f32 query and a code vector,
    /// decode-on-the-fly with no allocation.
    ///
    /// # Panics
    ///
    /// Panics if lengths disagree with the calibration, or if `metric` is
    /// [`Metric::Hamming`] (which has no SQ8 form).
    #[must_use]
    pub fn distance(&self, metric: Metric, query: &[f32], codes: &[u8]) -> f32 {
        assert_eq!(query.len(), self.dimension(), "dimension mismatch");
        assert_eq!(codes.len(), self.dimension(), "dimension mismatch");
        match metric {
            Metric::L2 => self.l2_sq(query, codes).sqrt(),
            Metric::Dot => -self.dot(query, codes),
            Metric::Cosine => self.cosine(query, codes),
            Metric::Hamming => unreachable!("hamming metric is not defined for sq8 codes"),
        }
    }

    /// Squared L2 in ranking form (no square root), for index interiors.
    #[must_use]
    pub fn l2_sq(&self, query: &[f32], codes: &[u8]) -> f32 {
        let mut sum = 0.0;
        for (d, (&q, &c)) in query.iter().zip(codes.iter()).enumerate() {
            let diff = q - self.decode_sample(d, c);
            sum += diff * diff;
        }
        sum
    }

    fn dot(&self, query: &[f32], codes: &[u8]) -> f32 {
        let mut sum = 0.0;
        for (d, (&q, &c)) in query.iter().zip(codes.iter()).enumerate() {
            sum += q * self.decode_sample(d, c);
        }
        sum
    }

    fn cosine(&self, query: &[f32], codes: &[u8]) -> f32 {
        let mut dot = 0.0;
        let mut qq = 0.0;
        let mut xx = 0.0;
        for (d, (&q, &c)) in query.iter().zip(codes.iter()).enumerate() {
            let x = self.decode_sample(d, c);
            dot += q * x;
            qq += q * q;
            xx += x * x;
        }
        if qq > 0.0 && xx > 0.0 {
            1.0 - dot / (qq.sqrt() * xx.sqrt())
        } else {
            1.0
        }
    }

    /// Serializes as `2·D` little-endian f32 words: all minima, then all
    /// maxima.
    #[must_use]
    pub fn to_words(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.dimension() * 8);
        for &lo in self.min.iter() {
            out.extend_from_slice(&lo.to_le_bytes());
        }
        for &hi in self.max.iter() {
            out.extend_from_slice(&hi.to_le_bytes());
        }
        out
    }

    /// Deserializes from the [`to_words`](Self::to_words) form.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidVector`] if the buffer is not exactly `2·D` words.
    pub fn from_words(dimension: usize, words: &[u8]) -> Result<Self> {
        if words.len() != dimension * 8 {
            return Err(Error::InvalidVector(format!(
                "calibration length {} does not match dimension {dimension}",
                words.len()
            )));
        }
        let mut floats = Vec::with_capacity(dimension * 2);
        for chunk in words.chunks_exact(4) {
            let bytes: [u8; 4] = chunk.try_into().expect("chunks_exact guarantees 4 bytes");
            floats.push(f32::from_le_bytes(bytes));
        }
        let (min, max) = floats.split_at(dimension);

        let scale = min
            .iter()
            .zip(max.iter())
            .map(|(&lo, &hi)| {
                let range = hi - lo;
                if range > 0.0 {
                    range / 255.0
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            min: min.into(),
            scale,
            max: max.into(),
        })
    }

    /// Heap bytes held by the calibration.
    #[must_use]
    pub fn memory_bytes(&self) -> u64 {
        (self.min.len() * 4 * 3) as u64
    }
}
