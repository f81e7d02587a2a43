//! Standard normal helpers shared by the population densities and the
//! residual error models.
//!
//! All functions operate in log-space where it matters for numerical stability.

use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

// ln(2π) = ln(2) + ln(π) ≈ 1.8378770664093453
pub(crate) const LOG_2PI: f64 = 1.8378770664093453_f64;

/// Log of the probability density function of the normal distribution.
///
/// # Formula
/// ```text
/// log(φ(x; μ, σ)) = -0.5 * ln(2π) - ln(σ) - (x - μ)² / (2σ²)
/// ```
///
/// # Parameters
/// - `obs`: Observed value
/// - `pred`: Predicted value (mean)
/// - `sigma`: Standard deviation
#[inline(always)]
pub fn lognormpdf(obs: f64, pred: f64, sigma: f64) -> f64 {
    let diff = obs - pred;
    -0.5 * LOG_2PI - sigma.ln() - (diff * diff) / (2.0 * sigma * sigma)
}

/// Log of the standard normal density.
#[inline(always)]
pub fn log_std_normal_pdf(z: f64) -> f64 {
    -0.5 * LOG_2PI - 0.5 * z * z
}

/// Cumulative distribution function Φ(z) of the standard normal distribution.
#[inline(always)]
pub fn std_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

/// Log of Φ(z).
///
/// # Numerical Stability
/// For z < -37 the CDF underflows, so the asymptotic expansion
/// `log(Φ(z)) ≈ log(φ(z)) - log(-z)` is used instead.
#[inline(always)]
pub fn log_std_normal_cdf(z: f64) -> f64 {
    if z < -37.0 {
        return log_std_normal_pdf(z) - (-z).ln();
    }
    std_normal_cdf(z).ln()
}

/// Quantile function Φ⁻¹(p) of the standard normal distribution.
///
/// Returns `-inf` for `p = 0` and `+inf` for `p = 1`.
#[inline(always)]
pub fn std_normal_quantile(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Inverse Mills ratio φ(z) / Φ(z), evaluated in log-space.
#[inline(always)]
pub fn inverse_mills_ratio(z: f64) -> f64 {
    (log_std_normal_pdf(z) - log_std_normal_cdf(z)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lognormpdf_standard_normal() {
        let result = lognormpdf(0.0, 0.0, 1.0);
        assert!((result - (-0.5 * LOG_2PI)).abs() < 1e-12);
        assert!((log_std_normal_pdf(1.3) - lognormpdf(1.3, 0.0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_cdf_reference_values() {
        assert!((std_normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert_relative_eq!(std_normal_cdf(1.96), 0.9750021048517795, epsilon = 1e-10);
        assert_relative_eq!(std_normal_cdf(-1.0), 0.15865525393145707, epsilon = 1e-10);
    }

    #[test]
    fn test_log_cdf_extreme_tail_is_finite() {
        let value = log_std_normal_cdf(-40.0);
        assert!(value.is_finite());
        assert!(value < -800.0);
        // Continuity across the switch to the asymptotic expansion
        let left = log_std_normal_cdf(-37.0 - 1e-9);
        let right = log_std_normal_cdf(-37.0 + 1e-9);
        assert_relative_eq!(left, right, max_relative = 1e-3);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        for z in [-3.0, -0.5, 0.0, 0.7, 2.5] {
            assert_relative_eq!(std_normal_quantile(std_normal_cdf(z)), z, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_inverse_mills_ratio() {
        // φ(0) / Φ(0) = 2 / sqrt(2π)
        assert_relative_eq!(
            inverse_mills_ratio(0.0),
            2.0 / (2.0 * std::f64::consts::PI).sqrt(),
            epsilon = 1e-12
        );
        // Approaches -z in the lower tail
        assert_relative_eq!(inverse_mills_ratio(-50.0), 50.0, max_relative = 1e-3);
    }
}
