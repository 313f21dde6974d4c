use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TilingError;

/// Resolution multiplier applied by an enhance operator.
///
/// Dimension law: an `n` pixel extent becomes `round(n * scale)`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Scale(f64);

impl Scale {
    pub fn new(factor: f64) -> Result<Self, TilingError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(TilingError::invalid(format!(
                "scale must be a finite number >= 1, got {factor}"
            )));
        }
        Ok(Self(factor))
    }

    /// Integral scale; `factor` must be at least 1. Use [`Scale::new`] for
    /// values that are not known to be valid.
    pub fn integer(factor: u32) -> Self {
        debug_assert!(factor >= 1, "integer scale must be >= 1, got {factor}");
        Self(factor.max(1) as f64)
    }

    pub fn factor(self) -> f64 {
        self.0
    }

    /// Integral factor, if the scale has no fractional part.
    pub fn as_integer(self) -> Option<u32> {
        (self.0.fract() == 0.0 && self.0 <= u32::MAX as f64).then_some(self.0 as u32)
    }

    /// Scaled extent of `n` pixels.
    #[inline]
    pub fn apply(self, n: u32) -> u32 {
        (n as f64 * self.0).round() as u32
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::integer(4)
    }
}

impl TryFrom<f64> for Scale {
    type Error = TilingError;

    fn try_from(v: f64) -> Result<Self, Self::Error> {
        Scale::new(v)
    }
}

impl From<Scale> for f64 {
    fn from(s: Scale) -> f64 {
        s.0
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_integer() {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Scale {
    type Err = TilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['x', 'X']);
        let v: f64 = trimmed
            .parse()
            .map_err(|_| TilingError::invalid(format!("'{s}' is not a scale factor")))?;
        Scale::new(v)
    }
}
