//! Numeric primitives for putting raw source values onto the canonical `[0, 1]` scale.
//!
//! All functions are total: invalid input is clipped or falls back to a boundary value,
//! they never fail.

use serde::{Deserialize, Serialize};

/// Affine map of `n` from the range `[a, b]` onto `[c, d]`.
///
/// With `cap` set, the result is clipped to `[min(c, d), max(c, d)]`.  If both ranges are
/// degenerate (`a == b` and `c == d`), `n` is returned unchanged.  If only the source range
/// is degenerate, the new lower bound `c` is returned.
pub fn linear_rescale(n: f64, (a, b): (f64, f64), (c, d): (f64, f64), cap: bool) -> f64 {
    let delta_old = b - a;
    let delta_new = d - c;

    if delta_old == 0.0 && delta_new == 0.0 {
        return n;
    }

    let normalized = if delta_old == 0.0 {
        c
    } else {
        delta_new * (n - a) / delta_old + c
    };

    if cap {
        normalized.clamp(c.min(d), c.max(d))
    } else {
        normalized
    }
}

/// `log10(n)`, falling back to `log10(fallback)` outside of the logarithm's domain.
fn log10_or(n: f64, fallback: f64) -> f64 {
    if n > 0.0 {
        n.log10()
    } else {
        fallback.log10()
    }
}

/// Range arguments of [`pvalue_linear`].
///
/// `range_min` is the least significant p-value (mapped to `out_min`), `range_max` the
/// most significant one (mapped to `out_max`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvalueRange {
    pub range_min: f64,
    pub range_max: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl Default for PvalueRange {
    fn default() -> Self {
        Self {
            range_min: 1.0,
            range_max: 1e-10,
            out_min: 0.0,
            out_max: 1.0,
        }
    }
}

impl PvalueRange {
    /// Range `[range_min, range_max]` mapped onto `[0, 1]`.
    pub fn new(range_min: f64, range_max: f64) -> Self {
        Self {
            range_min,
            range_max,
            ..Default::default()
        }
    }

    /// Replace the output range.
    pub fn with_out(self, out_min: f64, out_max: f64) -> Self {
        Self {
            out_min,
            out_max,
            ..self
        }
    }
}

/// Map a p-value linearly in log10 space onto the output range, capped.
///
/// Smaller p-values (closer to `range_max`) yield larger outputs.  Zero, negative or NaN
/// p-values are treated as `range_max`.
pub fn pvalue_linear(p: f64, range: PvalueRange) -> f64 {
    let min_score = log10_or(range.range_min, range.range_max);
    let max_score = log10_or(range.range_max, range.range_max);
    let score = log10_or(p, range.range_max);

    linear_rescale(
        score,
        (min_score, max_score),
        (range.out_min, range.out_max),
        true,
    )
}

/// Per-source renormalisation of an already `[0, 1]` score onto `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataNormaliser {
    /// Lower bound of the new range.
    pub min: f64,
    /// Upper bound of the new range.
    pub max: f64,
    /// Lower bound of the incoming range.
    #[serde(default)]
    pub old_min: f64,
    /// Upper bound of the incoming range.
    #[serde(default = "default_old_max")]
    pub old_max: f64,
}

fn default_old_max() -> f64 {
    1.0
}

impl DataNormaliser {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            old_min: 0.0,
            old_max: 1.0,
        }
    }

    /// Rescale `value`, capped to the new range.
    pub fn apply(&self, value: f64) -> f64 {
        linear_rescale(
            value,
            (self.old_min, self.old_max),
            (self.min, self.max),
            true,
        )
    }
}
