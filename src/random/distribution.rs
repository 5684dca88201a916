use crate::error::{DomainError, Result};
use crate::math::special::{
    inverse_normal_cdf, inverse_regularized_incomplete_beta, normal_cdf,
    regularized_incomplete_beta,
};

use super::SynthRng;

/// A named sampling distribution.
///
/// Continuous variants are sampled by inverting their CDF with a single
/// uniform draw, so every sample consumes exactly one value from the
/// generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Integers in the inclusive range `[lo, hi]`.
    UniformInt { lo: i64, hi: i64 },
    /// Reals in `[lo, hi)`.
    UniformReal { lo: f64, hi: f64 },
    /// Gaussian with the given mean and standard deviation.
    Normal { mean: f64, std_dev: f64 },
    /// `exp(N(mu, sigma))`.
    LogNormal { mu: f64, sigma: f64 },
    /// Beta distribution on `[0, 1]`.
    Beta { alpha: f64, beta: f64 },
}

impl Distribution {
    /// Checks the distribution parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] for empty ranges or non-positive scale parameters.
    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str| -> Result<()> {
            Err(DomainError::InvalidStatistics(format!("{what} in {self:?}")).into())
        };
        match *self {
            Self::UniformInt { lo, hi } if hi < lo => invalid("empty integer range"),
            Self::UniformReal { lo, hi } if !(lo.is_finite() && hi.is_finite() && lo <= hi) => {
                invalid("empty real range")
            }
            Self::Normal { mean, std_dev } if !(mean.is_finite() && std_dev > 0.0) => {
                invalid("non-positive standard deviation")
            }
            Self::LogNormal { mu, sigma } if !(mu.is_finite() && sigma > 0.0) => {
                invalid("non-positive sigma")
            }
            Self::Beta { alpha, beta } if !(alpha > 0.0 && beta > 0.0) => {
                invalid("non-positive shape parameter")
            }
            _ => Ok(()),
        }
    }

    /// Draws one sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid.
    pub fn sample(&self, rng: &mut SynthRng) -> Result<f64> {
        self.validate()?;
        match *self {
            #[allow(clippy::cast_precision_loss)]
            Self::UniformInt { lo, hi } => Ok(rng.gen_range_i64(lo, hi) as f64),
            Self::UniformReal { lo, hi } => Ok(rng.gen_range_f64(lo, hi)),
            Self::Normal { mean, std_dev } => {
                Ok(mean + std_dev * inverse_normal_cdf(rng.gen_open01())?)
            }
            Self::LogNormal { mu, sigma } => {
                Ok((mu + sigma * inverse_normal_cdf(rng.gen_open01())?).exp())
            }
            Self::Beta { alpha, beta } => {
                inverse_regularized_incomplete_beta(alpha, beta, rng.gen_open01())
            }
        }
    }

    /// Cumulative distribution function evaluated at `x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid.
    pub fn cdf(&self, x: f64) -> Result<f64> {
        self.validate()?;
        Ok(match *self {
            #[allow(clippy::cast_precision_loss)]
            Self::UniformInt { lo, hi } => {
                let k = x.floor();
                ((k - lo as f64 + 1.0) / (hi - lo + 1) as f64).clamp(0.0, 1.0)
            }
            Self::UniformReal { lo, hi } => {
                if hi > lo {
                    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
                } else if x >= lo {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Normal { mean, std_dev } => normal_cdf((x - mean) / std_dev),
            Self::LogNormal { mu, sigma } => {
                if x <= 0.0 {
                    0.0
                } else {
                    normal_cdf((x.ln() - mu) / sigma)
                }
            }
            Self::Beta { alpha, beta } => {
                regularized_incomplete_beta(alpha, beta, x.clamp(0.0, 1.0))?
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mean_of(dist: Distribution, n: usize, seed: u64) -> f64 {
        let mut rng = SynthRng::new(seed);
        #[allow(clippy::cast_precision_loss)]
        let count = n as f64;
        (0..n).map(|_| dist.sample(&mut rng).unwrap()).sum::<f64>() / count
    }

    #[test]
    fn normal_sample_mean() {
        let m = mean_of(Distribution::Normal { mean: 3.0, std_dev: 2.0 }, 20_000, 11);
        assert!((m - 3.0).abs() < 0.1, "mean {m}");
    }

    #[test]
    fn lognormal_sample_mean() {
        let (mu, sigma) = (1.0, 0.3);
        let expected = (mu + sigma * sigma / 2.0_f64).exp();
        let m = mean_of(Distribution::LogNormal { mu, sigma }, 20_000, 5);
        assert!((m - expected).abs() / expected < 0.02, "mean {m} vs {expected}");
    }

    #[test]
    fn beta_sample_mean() {
        let m = mean_of(Distribution::Beta { alpha: 2.0, beta: 6.0 }, 5_000, 8);
        assert!((m - 0.25).abs() < 0.02, "mean {m}");
    }

    #[test]
    fn uniform_int_stays_in_range() {
        let mut rng = SynthRng::new(1);
        let dist = Distribution::UniformInt { lo: -2, hi: 2 };
        for _ in 0..500 {
            let v = dist.sample(&mut rng).unwrap();
            assert!((-2.0..=2.0).contains(&v));
            assert_relative_eq!(v, v.round());
        }
    }

    #[test]
    fn cdf_values() {
        let d = Distribution::LogNormal { mu: 0.0, sigma: 1.0 };
        assert_relative_eq!(d.cdf(1.0).unwrap(), 0.5, max_relative = 1e-12);
        assert!(d.cdf(-1.0).unwrap().abs() < 1e-16);
        let b = Distribution::Beta { alpha: 2.0, beta: 3.0 };
        assert_relative_eq!(b.cdf(0.5).unwrap(), 0.6875, max_relative = 1e-12);
        let u = Distribution::UniformInt { lo: 1, hi: 4 };
        assert_relative_eq!(u.cdf(2.0).unwrap(), 0.5);
    }

    #[test]
    fn invalid_parameters_are_domain_errors() {
        let mut rng = SynthRng::new(0);
        assert!(Distribution::Normal { mean: 0.0, std_dev: -1.0 }.sample(&mut rng).is_err());
        assert!(Distribution::Beta { alpha: 0.0, beta: 1.0 }.sample(&mut rng).is_err());
        assert!(Distribution::UniformInt { lo: 3, hi: 1 }.validate().is_err());
    }

    #[test]
    fn sampling_is_deterministic() {
        let d = Distribution::LogNormal { mu: 2.0, sigma: 0.2 };
        let mut a = SynthRng::new(42);
        let mut b = SynthRng::new(42);
        for _ in 0..50 {
            assert_eq!(d.sample(&mut a).unwrap().to_bits(), d.sample(&mut b).unwrap().to_bits());
        }
    }
}
