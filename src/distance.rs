//! Distance metrics.
//!
//! Three kernels over equal-length `f32` slices, all oriented so that a
//! smaller value means a closer match:
//!
//! - `l2`: Euclidean distance, non-negative.
//! - `cosine`: `1 − cos(a, b)` clamped to `[0, 2]`; defined as `1.0` when
//!   either operand has zero norm so no `NaN` can escape.
//! - `dot`: negated inner product, turning maximum-inner-product search
//!   into distance minimization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::simd::{dot_product, l2_squared};

/// Distance metric attached to an index or collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    L2,
    Cosine,
    Dot,
}

impl Metric {
    /// Canonical lowercase name, as stored in file headers.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
        }
    }

    /// Distance between `a` and `b` under this metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2(a, b),
            Metric::Cosine => cosine(a, b),
            Metric::Dot => dot(a, b),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "l2" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            "dot" => Ok(Metric::Dot),
            other => Err(Error::InvalidArgument(format!(
                "unknown metric '{other}', expected one of: l2, cosine, dot"
            ))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Euclidean distance ‖a − b‖.
#[inline]
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    l2_squared(a, b).sqrt()
}

/// Cosine distance `1 − cos(a, b)`, clamped to `[0, 2]`.
///
/// Returns `1.0` when either operand has zero norm.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot_ab = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let sim = (dot_ab / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - sim
}

/// Negated inner product `−⟨a, b⟩`.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    -dot_product(a, b)
}
