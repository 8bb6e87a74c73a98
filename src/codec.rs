//! On-disk codec for vector column values.
//!
//! Every stored vector is a fixed 12-byte header followed by the payload:
//!
//! ```text
//! offset 0   magic     "VEC\0"
//! offset 4   version   u8  (currently 1)
//! offset 5   flags     u8  (bits 0..1 quantization, bit 2 pre-normalized,
//!                           bits 3..7 reserved = 0)
//! offset 6   dimension u16 (little-endian)
//! offset 8   reserved  u32 (0)
//! offset 12  payload   none:    D × 4 bytes f32 LE
//!                      scalar8: D bytes
//!                      binary:  ⌈D/8⌉ bytes
//! ```
//!
//! The same encoding carries vectors inside the graph snapshot, so a
//! snapshot restore revalidates every stored value for free.
//!
//! Decoding validates each header field and reports a distinct
//! [`HeaderError`] per failure. Encoding rejects NaN and ±∞ samples and
//! dimensions beyond the configured limit. Float payloads expose a
//! zero-copy view when the byte alignment allows it, and fall back to a
//! copying decode otherwise.

use crate::error::{Error, Result};
use crate::quantization::Quantization;
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use thiserror::Error;

/// Magic bytes at offset 0: `"VEC\0"`.
pub const MAGIC: [u8; 4] = *b"VEC\0";

/// Current format version.
pub const VERSION: u8 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 12;

/// Flag bit 2: the stored vector is already L2-normalized.
pub const FLAG_NORMALIZED: u8 = 1 << 2;

const FLAG_QUANT_MASK: u8 = 0b0000_0011;
const FLAG_RESERVED_MASK: u8 = 0b1111_1000;

/// Errors produced while decoding a value header. Each decode failure has
/// its own variant so hosts can distinguish a wrong-column write from a
/// truncated page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The magic bytes are not `"VEC\0"`.
    #[error("bad magic: expected \"VEC\\0\", got {0:?}")]
    BadMagic([u8; 4]),

    /// The format version is newer than this reader understands.
    #[error("unsupported value format version: {0}")]
    UnsupportedVersion(u8),

    /// Reserved flag bits (3..7) are set.
    #[error("reserved flag bits set: {0:#010b}")]
    ReservedFlags(u8),

    /// The quantization code in bits 0..1 is not a known kind.
    #[error("unknown quantization code: {0}")]
    UnknownQuantization(u8),

    /// The reserved word at offset 8 is non-zero.
    #[error("reserved header word is non-zero: {0:#x}")]
    ReservedWord(u32),

    /// The declared dimension does not match the column's dimension.
    #[error("declared dimension {declared} does not match column dimension {expected}")]
    DimensionMismatch {
        /// Dimension stored in the header.
        declared: u16,
        /// Dimension the column requires.
        expected: u16,
    },

    /// The buffer is shorter than the header plus the declared payload.
    #[error("truncated value: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required by the header.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
}

/// The fixed value header as a POD struct, castable straight from bytes.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct VectorHeader {
    /// Magic bytes `"VEC\0"`.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u8,
    /// Quantization + normalization flags.
    pub flags: u8,
    /// Declared dimension.
    pub dimension: u16,
    /// Reserved, must be zero.
    pub reserved: u32,
}

const _: () = assert!(std::mem::size_of::<VectorHeader>() == HEADER_LEN);
const _: () = assert!(std::mem::align_of::<VectorHeader>() == 4);

impl VectorHeader {
    /// Builds a header for a payload of `dimension` samples.
    #[must_use]
    pub fn new(dimension: u16, quantization: Quantization, normalized: bool) -> Self {
        let mut flags = quantization.code();
        if normalized {
            flags |= FLAG_NORMALIZED;
        }
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            dimension,
            reserved: 0,
        }
    }

    /// Quantization kind encoded in the flag bits.
    ///
    /// # Errors
    ///
    /// [`HeaderError::UnknownQuantization`] for an unassigned code.
    pub fn quantization(&self) -> std::result::Result<Quantization, HeaderError> {
        let code = self.flags & FLAG_QUANT_MASK;
        Quantization::from_code(code).ok_or(HeaderError::UnknownQuantization(code))
    }

    /// True if the pre-normalized flag is set.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.flags & FLAG_NORMALIZED != 0
    }

    /// Payload length implied by the header.
    ///
    /// # Errors
    ///
    /// [`HeaderError::UnknownQuantization`] for an unassigned code.
    pub fn payload_len(&self) -> std::result::Result<usize, HeaderError> {
        Ok(self.quantization()?.payload_len(self.dimension as usize))
    }

    fn validate(&self, expected_dim: u16) -> std::result::Result<(), HeaderError> {
        if self.magic != MAGIC {
            return Err(HeaderError::BadMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(HeaderError::UnsupportedVersion(self.version));
        }
        if self.flags & FLAG_RESERVED_MASK != 0 {
            return Err(HeaderError::ReservedFlags(self.flags));
        }
        self.quantization()?;
        if self.reserved != 0 {
            return Err(HeaderError::ReservedWord(self.reserved));
        }
        if self.dimension != expected_dim {
            return Err(HeaderError::DimensionMismatch {
                declared: self.dimension,
                expected: expected_dim,
            });
        }
        Ok(())
    }

    /// Serializes the header into its 12-byte little-endian form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4] = self.version;
        out[5] = self.flags;
        out[6..8].copy_from_slice(&self.dimension.to_le_bytes());
        out[8..12].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: bytes[4],
            flags: bytes[5],
            dimension: u16::from_le_bytes([bytes[6], bytes[7]]),
            reserved: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// A decoded view over an encoded vector value. Borrows the input buffer.
#[derive(Debug, Clone)]
pub struct VectorRef<'a> {
    header: VectorHeader,
    payload: &'a [u8],
}

impl<'a> VectorRef<'a> {
    /// The validated header.
    #[must_use]
    pub fn header(&self) -> &VectorHeader {
        &self.header
    }

    /// The raw payload bytes (without the header).
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Quantization kind of the payload.
    #[must_use]
    pub fn quantization(&self) -> Quantization {
        // Validated during decode.
        self.header
            .quantization()
            .expect("quantization validated at decode")
    }

    /// Declared dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.header.dimension as usize
    }

    /// Total encoded length (header plus payload), useful when values are
    /// laid out back to back as in the graph snapshot.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Float view over a `Quantization::None` payload.
    ///
    /// Zero-copy when the payload happens to be 4-byte aligned, otherwise a
    /// copying decode into an owned buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidVector`] if the payload is not float-encoded.
    pub fn floats(&self) -> Result<Cow<'a, [f32]>> {
        if self.quantization() != Quantization::None {
            return Err(Error::InvalidVector(
                "payload is quantized; no float view available".into(),
            ));
        }
        match bytemuck::try_cast_slice::<u8, f32>(self.payload) {
            Ok(view) => Ok(Cow::Borrowed(view)),
            Err(_) => {
                // Misaligned within the host page; copy sample by sample.
                let mut out = Vec::with_capacity(self.dimension());
                for chunk in self.payload.chunks_exact(4) {
                    let bytes: [u8; 4] =
                        chunk.try_into().expect("chunks_exact guarantees 4 bytes");
                    out.push(f32::from_le_bytes(bytes));
                }
                Ok(Cow::Owned(out))
            }
        }
    }
}

/// Rejects vectors containing NaN or infinite samples, and empty vectors.
///
/// # Errors
///
/// [`Error::InvalidVector`] naming the first offending sample.
pub fn validate_finite(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::InvalidVector("empty vector".into()));
    }
    for (i, &val) in vector.iter().enumerate() {
        if val.is_nan() {
            return Err(Error::InvalidVector(format!("NaN at index {i}")));
        }
        if val.is_infinite() {
            return Err(Error::InvalidVector(format!("infinity at index {i}")));
        }
    }
    Ok(())
}

/// Encodes a float vector into its on-disk form.
///
/// # Errors
///
/// - [`Error::InvalidVector`] for NaN/±∞ samples or an empty input;
/// - [`Error::DimensionMismatch`] if the length exceeds `max_dimensions`
///   or the u16 header field.
pub fn encode_f32(vector: &[f32], max_dimensions: u32, normalized: bool) -> Result<Vec<u8>> {
    validate_finite(vector)?;
    let dim = check_dimension(vector.len(), max_dimensions)?;

    let mut out = Vec::with_capacity(HEADER_LEN + vector.len() * 4);
    out.extend_from_slice(&VectorHeader::new(dim, Quantization::None, normalized).to_bytes());
    for &val in vector {
        out.extend_from_slice(&val.to_le_bytes());
    }
    Ok(out)
}

/// Encodes an already-quantized payload.
///
/// # Errors
///
/// - [`Error::DimensionMismatch`] if `dimension` exceeds the limit;
/// - [`Error::InvalidVector`] if the payload length disagrees with the
///   quantization kind.
pub fn encode_quantized(
    payload: &[u8],
    dimension: usize,
    quantization: Quantization,
    max_dimensions: u32,
) -> Result<Vec<u8>> {
    let dim = check_dimension(dimension, max_dimensions)?;
    let expected = quantization.payload_len(dimension);
    if payload.len() != expected {
        return Err(Error::InvalidVector(format!(
            "quantized payload length {} does not match dimension {dimension}",
            payload.len()
        )));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&VectorHeader::new(dim, quantization, false).to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes and validates an encoded value against the column dimension.
///
/// # Errors
///
/// A [`HeaderError`] (wrapped in [`Error::Header`]) naming the exact
/// validation failure.
pub fn decode(bytes: &[u8], expected_dim: usize) -> Result<VectorRef<'_>> {
    let header = VectorHeader::from_bytes(bytes).map_err(Error::Header)?;
    let expected_dim_u16 =
        u16::try_from(expected_dim).map_err(|_| Error::DimensionMismatch {
            expected: expected_dim,
            actual: header.dimension as usize,
        })?;
    header.validate(expected_dim_u16).map_err(Error::Header)?;

    let payload_len = header.payload_len().map_err(Error::Header)?;
    let total = HEADER_LEN + payload_len;
    if bytes.len() < total {
        return Err(Error::Header(HeaderError::Truncated {
            expected: total,
            actual: bytes.len(),
        }));
    }
    Ok(VectorRef {
        header,
        payload: &bytes[HEADER_LEN..total],
    })
}

/// Decodes a self-described value, trusting the dimension its own header
/// declares. Used by provider functions, where no column dimension is in
/// scope; column writes go through [`decode`] instead.
///
/// # Errors
///
/// A [`HeaderError`] for any header or length failure.
pub fn decode_any(bytes: &[u8]) -> Result<VectorRef<'_>> {
    let header = VectorHeader::from_bytes(bytes).map_err(Error::Header)?;
    decode(bytes, header.dimension as usize)
}

fn check_dimension(dim: usize, max_dimensions: u32) -> Result<u16> {
    if dim == 0 || dim > max_dimensions as usize {
        return Err(Error::DimensionMismatch {
            expected: max_dimensions as usize,
            actual: dim,
        });
    }
    u16::try_from(dim).map_err(|_| Error::DimensionMismatch {
        expected: u16::MAX as usize,
        actual: dim,
    })
}
