//! The `VECTOR(D)` column type provider.

use super::ddl;
use super::value::{self, SqlValue};
use crate::codec;
use crate::error::{Error, Result};

/// Type-extension capability record: the host offers every unknown column
/// type declaration to [`accept_type`](VectorType::accept_type); a
/// `Some` return binds the column to vector semantics.
#[derive(Debug, Clone)]
pub struct VectorType {
    max_dimensions: u32,
}

impl VectorType {
    /// Creates a provider enforcing the configured dimension limit.
    #[must_use]
    pub fn new(max_dimensions: u32) -> Self {
        Self { max_dimensions }
    }

    /// Offers a column type declaration.
    ///
    /// Returns `None` for declarations that are not `VECTOR(D)` shaped
    /// (the host keeps looking elsewhere).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a `VECTOR(D)` declaration whose dimension is
    /// zero or above the configured limit.
    pub fn accept_type(&self, declaration: &str) -> Result<Option<VectorColumn>> {
        let Some(dimension) = ddl::parse_vector_type(declaration)? else {
            return Ok(None);
        };
        if dimension > self.max_dimensions {
            return Err(Error::Config(format!(
                "dimension {dimension} exceeds max_dimensions {}",
                self.max_dimensions
            )));
        }
        Ok(Some(VectorColumn {
            dimension,
            max_dimensions: self.max_dimensions,
        }))
    }
}

/// A bound vector column: validates and canonicalizes every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorColumn {
    /// Declared dimension, frozen at DDL time.
    pub dimension: u32,
    max_dimensions: u32,
}

impl VectorColumn {
    /// Validates a bind-time write and returns the canonical encoded byte
    /// form the storage layer persists.
    ///
    /// Accepted inputs: an already-encoded vector ([`SqlValue::Vector`] /
    /// [`SqlValue::Bytes`]), or a JSON float array as [`SqlValue::Text`].
    ///
    /// # Errors
    ///
    /// `DimensionMismatch`, `InvalidVector`, or `Header`, all rejected
    /// at the boundary with the row write untouched.
    pub fn encode_write(&self, value: &SqlValue) -> Result<Vec<u8>> {
        match value {
            SqlValue::Vector(bytes) | SqlValue::Bytes(bytes) => {
                // Revalidate against the column even for pre-encoded input.
                codec::decode(bytes, self.dimension as usize)?;
                Ok(bytes.clone())
            }
            SqlValue::Text(text) => {
                let floats = value::parse_json_vector(text)?;
                self.encode_floats(&floats)
            }
            other => Err(Error::InvalidVector(format!(
                "cannot bind {} to a VECTOR({}) column",
                other.type_name(),
                self.dimension
            ))),
        }
    }

    /// Encodes a float slice for this column.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` or `InvalidVector`.
    pub fn encode_floats(&self, floats: &[f32]) -> Result<Vec<u8>> {
        if floats.len() != self.dimension as usize {
            return Err(Error::DimensionMismatch {
                expected: self.dimension as usize,
                actual: floats.len(),
            });
        }
        codec::encode_f32(floats, self.max_dimensions, false)
    }
}
