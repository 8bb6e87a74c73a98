//! The value union crossing the host SQL boundary.

use crate::codec::{self, VectorRef};
use crate::error::{Error, Result};

/// Dynamic SQL value, as handed to provider functions by the host.
///
/// Vector-typed columns arrive as [`SqlValue::Vector`] carrying the
/// encoded byte form; hosts that have not bound the value to a vector
/// column yet may also pass raw [`SqlValue::Bytes`] or a JSON
/// [`SqlValue::Text`] array, which the provider functions coerce.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An encoded vector value (header + payload).
    Vector(Vec<u8>),
}

impl SqlValue {
    /// Short type name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Vector(_) => "vector",
        }
    }
}

/// Parses a strict JSON float array: `[f0, f1, …]`, nothing else.
///
/// # Errors
///
/// [`Error::InvalidVector`] for malformed JSON, non-array JSON, or
/// non-finite entries.
pub fn parse_json_vector(text: &str) -> Result<Vec<f32>> {
    let values: Vec<f64> = serde_json::from_str(text)
        .map_err(|err| Error::InvalidVector(format!("not a JSON float array: {err}")))?;
    #[allow(clippy::cast_possible_truncation)]
    let floats: Vec<f32> = values.into_iter().map(|v| v as f32).collect();
    codec::validate_finite(&floats)?;
    Ok(floats)
}

/// Renders a float vector as the JSON array text form.
#[must_use]
pub fn to_json_vector(vector: &[f32]) -> String {
    // Vec<f32> serializes as a plain JSON array; shortest-roundtrip float
    // formatting comes with serde_json.
    serde_json::to_string(vector).expect("float slice always serializes")
}

/// Decodes any vector-bearing value into its encoded byte view.
///
/// # Errors
///
/// [`Error::InvalidVector`] for values of the wrong type,
/// [`Error::Header`] for malformed encodings.
pub(crate) fn decode_vector_value(value: &SqlValue) -> Result<VectorRef<'_>> {
    match value {
        SqlValue::Vector(bytes) | SqlValue::Bytes(bytes) => codec::decode_any(bytes),
        other => Err(Error::InvalidVector(format!(
            "expected a vector value, got {}",
            other.type_name()
        ))),
    }
}

/// Coerces a value into f32 samples: encoded vectors, raw encoded bytes,
/// or JSON text.
///
/// # Errors
///
/// [`Error::InvalidVector`] when the value cannot be coerced (including
/// quantized payloads, which have no float form here).
pub(crate) fn coerce_floats(value: &SqlValue) -> Result<Vec<f32>> {
    match value {
        SqlValue::Text(text) => parse_json_vector(text),
        SqlValue::Vector(_) | SqlValue::Bytes(_) => {
            let decoded = decode_vector_value(value)?;
            Ok(decoded.floats()?.into_owned())
        }
        other => Err(Error::InvalidVector(format!(
            "expected a vector value, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let floats = parse_json_vector("[1.0, -2.5, 3]").unwrap();
        assert_eq!(floats, vec![1.0, -2.5, 3.0]);
        let text = to_json_vector(&floats);
        assert_eq!(parse_json_vector(&text).unwrap(), floats);
    }

    #[test]
    fn json_rejects_non_arrays() {
        assert!(parse_json_vector("3.5").is_err());
        assert!(parse_json_vector("{\"a\": 1}").is_err());
        assert!(parse_json_vector("[1, \"two\"]").is_err());
        assert!(parse_json_vector("[[1]]").is_err());
        assert!(parse_json_vector("[]").is_err());
    }

    #[test]
    fn coerce_from_encoded_bytes() {
        let encoded = crate::codec::encode_f32(&[0.5, 1.5], 16, false).unwrap();
        let floats = coerce_floats(&SqlValue::Bytes(encoded)).unwrap();
        assert_eq!(floats, vec![0.5, 1.5]);
    }

    #[test]
    fn coerce_rejects_scalars() {
        assert!(coerce_floats(&SqlValue::I64(3)).is_err());
        assert!(coerce_floats(&SqlValue::Null).is_err());
    }
}
