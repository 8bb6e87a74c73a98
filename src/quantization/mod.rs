//! Lossy vector re-encodings trading recall for memory.
//!
//! Two quantizers are provided:
//!
//! - [`Sq8Calibration`]: 8-bit scalar quantization with per-dimension
//!   min/max calibration and asymmetric distance computation (the query
//!   stays in f32, database codes decode on the fly);
//! - [`BinaryQuantizer`]: 1-bit sign quantization with Hamming distance
//!   over packed bits.

pub mod binary;
pub mod scalar;

pub use binary::BinaryQuantizer;
pub use scalar::{Sq8Calibration, SQ8_CALIBRATION_SAMPLE};

use serde::{Deserialize, Serialize};

/// Quantization kind attached to a column value or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quantization {
    /// Full-precision f32 samples.
    #[default]
    None,
    /// 8-bit scalar quantization with per-dimension calibration.
    Scalar8,
    /// 1-bit sign quantization, Hamming metric only.
    Binary,
}

impl Quantization {
    /// Wire code stored in the value-header flag bits and the snapshot.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Quantization::None => 0,
            Quantization::Scalar8 => 1,
            Quantization::Binary => 2,
        }
    }

    /// Inverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Quantization::None),
            1 => Some(Quantization::Scalar8),
            2 => Some(Quantization::Binary),
            _ => None,
        }
    }

    /// Parses the names accepted by DDL `WITH (quantization = '…')`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Quantization::None),
            "scalar8" | "sq8" => Some(Quantization::Scalar8),
            "binary" => Some(Quantization::Binary),
            _ => None,
        }
    }

    /// Name used in DDL options and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Quantization::None => "none",
            Quantization::Scalar8 => "scalar8",
            Quantization::Binary => "binary",
        }
    }

    /// Payload bytes for one vector of `dimension` samples.
    #[must_use]
    pub const fn payload_len(self, dimension: usize) -> usize {
        match self {
            Quantization::None => dimension * 4,
            Quantization::Scalar8 => dimension,
            Quantization::Binary => dimension.div_ceil(8),
        }
    }
}
