//! Statistical sampling tolerance
//!
//! Decides how much data is "enough" for an estimate to be reported as
//! confident. A [`SamplingTolerance`] is a (margin of error, confidence level)
//! pair; [`required_sample_size`] maps it to a minimum sample count, and
//! [`Sufficiency`] is the resulting tag carried on every estimate the engine
//! reports.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CONFIDENCE_LEVEL, DEFAULT_MARGIN_OF_ERROR};
use crate::error::{AuguryError, Result};

/// Margin of error / confidence level pair governing sample sufficiency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingTolerance {
    /// Maximum expected difference between the population parameter and the
    /// sample estimate. Zero means the full population is required.
    pub margin_of_error: f64,
    /// Probability, in (0, 1), that the population parameter lies within the
    /// margin of error of the sample estimate.
    pub confidence_level: f64,
}

impl Default for SamplingTolerance {
    fn default() -> Self {
        Self {
            margin_of_error: DEFAULT_MARGIN_OF_ERROR,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

impl SamplingTolerance {
    pub fn new(margin_of_error: f64, confidence_level: f64) -> Result<Self> {
        let tolerance = Self {
            margin_of_error,
            confidence_level,
        };
        tolerance.validate()?;
        Ok(tolerance)
    }

    /// Margin of error must be non-negative, confidence level strictly in (0, 1).
    pub fn validate(&self) -> Result<()> {
        if !self.margin_of_error.is_finite() || self.margin_of_error < 0.0 {
            return Err(AuguryError::ValidationError(format!(
                "sample margin of error must be >= 0, got {}",
                self.margin_of_error
            )));
        }
        if !self.confidence_level.is_finite()
            || self.confidence_level <= 0.0
            || self.confidence_level >= 1.0
        {
            return Err(AuguryError::ValidationError(format!(
                "sample confidence level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}

/// Whether an estimate was computed from a sufficient sample.
///
/// A provisional estimate is still reported, never silently upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sufficiency {
    Confident,
    Provisional,
}

/// Standard normal CDF via the Abramowitz & Stegun error-function approximation.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Two-sided z-score for a confidence level, solved by bisection on the CDF.
pub fn z_score(confidence_level: f64) -> f64 {
    let target = 1.0 - (1.0 - confidence_level) / 2.0;
    let mut lo = 0.0_f64;
    let mut hi = 10.0_f64;
    for _ in 0..128 {
        let mid = 0.5 * (lo + hi);
        if normal_cdf(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Minimum sample size for a confident estimate.
///
/// For a positive margin of error this is Cochran's formula at maximum
/// variance (p = 0.5): a deterministic function of the two tolerance
/// parameters alone, which may well exceed the rows that exist. A zero margin
/// of error degenerates to "the full population".
pub fn required_sample_size(population: usize, tolerance: &SamplingTolerance) -> usize {
    if tolerance.margin_of_error <= 0.0 {
        return population;
    }
    let z = z_score(tolerance.confidence_level);
    let e = tolerance.margin_of_error;
    let n0 = z * z * 0.25 / (e * e);
    (n0.ceil() as usize).max(1)
}

/// Tag an estimate computed from `observed` of `population` rows.
pub fn classify(observed: usize, population: usize, tolerance: &SamplingTolerance) -> Sufficiency {
    if observed >= required_sample_size(population, tolerance) {
        Sufficiency::Confident
    } else {
        Sufficiency::Provisional
    }
}
