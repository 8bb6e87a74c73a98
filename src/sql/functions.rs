//! The SQL function provider.
//!
//! A capability record the host planner registers once: `names()` lists
//! what this provider answers for, `invoke()` dispatches by name over the
//! [`SqlValue`] union. The executor resolves the function a single time
//! and then calls the kernel directly; nothing here sits on the per-row
//! hot path of an index probe.

use super::value::{self, SqlValue};
use crate::codec;
use crate::error::{Error, Result};
use crate::metric::{self, Metric};
use crate::quantization::Quantization;

/// Names served by [`VectorFunctions`].
const FUNCTION_NAMES: &[&str] = &[
    "distance_cosine",
    "distance_l2",
    "distance_dot",
    "distance_hamming",
    "vector_from_json",
    "vector_to_json",
    "vector_normalize",
    "vector_dimensions",
];

/// Scalar-function provider for the host SQL layer.
#[derive(Debug, Clone)]
pub struct VectorFunctions {
    max_dimensions: u32,
}

impl VectorFunctions {
    /// Creates a provider enforcing the configured dimension limit.
    #[must_use]
    pub fn new(max_dimensions: u32) -> Self {
        Self { max_dimensions }
    }

    /// The function names this provider serves.
    #[must_use]
    pub fn names(&self) -> &'static [&'static str] {
        FUNCTION_NAMES
    }

    /// Dispatches a call by name.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for unknown names or wrong arity;
    /// - [`Error::InvalidVector`] / [`Error::Header`] /
    ///   [`Error::DimensionMismatch`] for bad arguments.
    pub fn invoke(&self, name: &str, args: &[SqlValue]) -> Result<SqlValue> {
        match name {
            "distance_cosine" => self.distance(Metric::Cosine, args),
            "distance_l2" => self.distance(Metric::L2, args),
            "distance_dot" => self.distance(Metric::Dot, args),
            "distance_hamming" => self.hamming(args),
            "vector_from_json" => self.from_json(args),
            "vector_to_json" => self.to_json(args),
            "vector_normalize" => self.normalize(args),
            "vector_dimensions" => self.dimensions(args),
            other => Err(Error::Config(format!("unknown function: '{other}'"))),
        }
    }

    fn expect_arity(name: &str, args: &[SqlValue], arity: usize) -> Result<()> {
        if args.len() == arity {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "{name} expects {arity} argument(s), got {}",
                args.len()
            )))
        }
    }

    fn distance(&self, metric: Metric, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("distance function", args, 2)?;
        let a = value::coerce_floats(&args[0])?;
        let b = value::coerce_floats(&args[1])?;
        if a.len() != b.len() {
            return Err(Error::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(SqlValue::F64(f64::from(metric.distance(&a, &b))))
    }

    fn hamming(&self, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("distance_hamming", args, 2)?;
        let a = value::decode_vector_value(&args[0])?;
        let b = value::decode_vector_value(&args[1])?;
        if a.quantization() != Quantization::Binary || b.quantization() != Quantization::Binary {
            return Err(Error::InvalidVector(
                "distance_hamming requires bit-packed binary vectors".into(),
            ));
        }
        if a.dimension() != b.dimension() {
            return Err(Error::DimensionMismatch {
                expected: a.dimension(),
                actual: b.dimension(),
            });
        }
        let distance = metric::hamming(a.payload(), b.payload());
        Ok(SqlValue::I64(i64::from(distance)))
    }

    fn from_json(&self, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("vector_from_json", args, 1)?;
        let SqlValue::Text(text) = &args[0] else {
            return Err(Error::InvalidVector(format!(
                "vector_from_json expects text, got {}",
                args[0].type_name()
            )));
        };
        let floats = value::parse_json_vector(text)?;
        let encoded = codec::encode_f32(&floats, self.max_dimensions, false)?;
        Ok(SqlValue::Vector(encoded))
    }

    fn to_json(&self, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("vector_to_json", args, 1)?;
        let floats = value::coerce_floats(&args[0])?;
        Ok(SqlValue::Text(value::to_json_vector(&floats)))
    }

    fn normalize(&self, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("vector_normalize", args, 1)?;
        let mut floats = value::coerce_floats(&args[0])?;
        let norm_sq: f32 = floats.iter().map(|x| x * x).sum();
        let normalized = if norm_sq > 0.0 {
            let inv = norm_sq.sqrt().recip();
            for x in &mut floats {
                *x *= inv;
            }
            true
        } else {
            // The zero vector has no direction; return it unchanged and
            // unflagged.
            false
        };
        let encoded = codec::encode_f32(&floats, self.max_dimensions, normalized)?;
        Ok(SqlValue::Vector(encoded))
    }

    fn dimensions(&self, args: &[SqlValue]) -> Result<SqlValue> {
        Self::expect_arity("vector_dimensions", args, 1)?;
        let decoded = value::decode_vector_value(&args[0])?;
        Ok(SqlValue::I64(decoded.dimension() as i64))
    }
}
