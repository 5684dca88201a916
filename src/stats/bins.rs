use crate::error::{DomainError, Result};
use crate::random::SynthRng;

/// A target histogram paired with a running actual histogram.
///
/// Targets are normalized to sum to one. Actual values are raw weights
/// (grain counts, voxel volumes or boundary areas) whose sum is tracked in
/// `total`, so the actual frequency of a bin is `actual[i] / total`.
///
/// The error of the histogram is the sum of squared per-bin deviations
/// between actual frequency and target frequency.
#[derive(Debug, Clone)]
pub struct DistributionBins {
    name: &'static str,
    target: Vec<f64>,
    cumulative: Vec<f64>,
    actual: Vec<f64>,
    total: f64,
}

impl DistributionBins {
    /// Creates bins from an unnormalized target histogram.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidHistogram`] if the histogram is empty,
    /// holds a negative or non-finite value, or sums to zero.
    pub fn new(name: &'static str, target: &[f64]) -> Result<Self> {
        if target.is_empty() {
            return Err(DomainError::InvalidHistogram {
                name,
                reason: "no bins".into(),
            }
            .into());
        }
        if let Some(bad) = target.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(DomainError::InvalidHistogram {
                name,
                reason: format!("bin value {bad} is negative or not finite"),
            }
            .into());
        }
        let sum: f64 = target.iter().sum();
        if sum <= 0.0 {
            return Err(DomainError::InvalidHistogram {
                name,
                reason: "bins sum to zero".into(),
            }
            .into());
        }

        let target: Vec<f64> = target.iter().map(|v| v / sum).collect();
        let mut running = 0.0;
        let cumulative = target
            .iter()
            .map(|v| {
                running += v;
                running
            })
            .collect();

        Ok(Self {
            name,
            actual: vec![0.0; target.len()],
            target,
            cumulative,
            total: 0.0,
        })
    }

    /// Histogram name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.target.len()
    }

    /// Returns `true` if there are no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Normalized target frequency of a bin.
    #[must_use]
    pub fn target(&self, bin: usize) -> f64 {
        self.target[bin]
    }

    /// All normalized target frequencies.
    #[must_use]
    pub fn targets(&self) -> &[f64] {
        &self.target
    }

    /// Raw actual weight of a bin.
    #[must_use]
    pub fn actual(&self, bin: usize) -> f64 {
        self.actual[bin]
    }

    /// Sum of all actual weights.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Actual frequency of a bin (zero while the histogram is empty).
    #[must_use]
    pub fn fraction(&self, bin: usize) -> f64 {
        if self.total > 0.0 {
            self.actual[bin] / self.total
        } else {
            0.0
        }
    }

    /// Signed deviation `fraction - target` of a bin.
    #[must_use]
    pub fn deviation(&self, bin: usize) -> f64 {
        self.fraction(bin) - self.target[bin]
    }

    /// Adds `weight` to a bin.
    pub fn add(&mut self, bin: usize, weight: f64) {
        self.actual[bin] += weight;
        self.total += weight;
    }

    /// Removes `weight` from a bin.
    pub fn remove(&mut self, bin: usize, weight: f64) {
        self.actual[bin] -= weight;
        self.total -= weight;
        if self.actual[bin].abs() < 1e-9 {
            self.actual[bin] = 0.0;
        }
        if self.total.abs() < 1e-9 {
            self.total = 0.0;
        }
    }

    /// Resets every actual weight to zero.
    pub fn clear(&mut self) {
        self.actual.iter_mut().for_each(|v| *v = 0.0);
        self.total = 0.0;
    }

    /// Sum of squared deviations over all bins.
    #[must_use]
    pub fn error(&self) -> f64 {
        (0..self.len()).map(|i| self.deviation(i).powi(2)).sum()
    }

    /// Error the histogram would have after applying `changes`
    /// (pairs of bin index and signed weight delta), without mutating it.
    #[must_use]
    pub fn error_with(&self, changes: &[(usize, f64)]) -> f64 {
        self.error() + self.error_delta(changes)
    }

    /// Change in [`error`](Self::error) caused by `changes`.
    ///
    /// When the changes leave the total weight unchanged only the touched
    /// bins are evaluated; otherwise every bin is recomputed.
    #[must_use]
    pub fn error_delta(&self, changes: &[(usize, f64)]) -> f64 {
        let merged = merge_changes(changes);
        if merged.is_empty() {
            return 0.0;
        }
        let delta_total: f64 = merged.iter().map(|(_, d)| d).sum();

        if delta_total.abs() < 1e-12 && self.total > 0.0 {
            let t = self.total;
            merged
                .iter()
                .map(|&(bin, d)| {
                    let before = self.actual[bin] / t - self.target[bin];
                    let after = (self.actual[bin] + d) / t - self.target[bin];
                    after * after - before * before
                })
                .sum()
        } else {
            let new_total = self.total + delta_total;
            let mut after = 0.0;
            let mut cursor = 0;
            for bin in 0..self.len() {
                let mut value = self.actual[bin];
                if cursor < merged.len() && merged[cursor].0 == bin {
                    value += merged[cursor].1;
                    cursor += 1;
                }
                let fraction = if new_total > 0.0 { value / new_total } else { 0.0 };
                after += (fraction - self.target[bin]).powi(2);
            }
            after - self.error()
        }
    }

    /// Draws a bin index with probability proportional to its target.
    pub fn sample_bin(&self, rng: &mut SynthRng) -> usize {
        let u = rng.gen_f64();
        self.cumulative
            .iter()
            .position(|&c| u < c)
            .unwrap_or(self.len() - 1)
    }

    /// Pearson chi-squared statistic of the actual histogram against the
    /// target, treating the actual weights as observed counts. Bins with
    /// zero target are skipped.
    #[must_use]
    pub fn chi_squared(&self) -> f64 {
        self.target
            .iter()
            .zip(&self.actual)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, a)| {
                let expected = t * self.total;
                (a - expected).powi(2) / expected
            })
            .sum()
    }
}

/// Sorts changes by bin and sums duplicates.
fn merge_changes(changes: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|(bin, _)| *bin);
    let mut merged: Vec<(usize, f64)> = Vec::with_capacity(sorted.len());
    for (bin, d) in sorted {
        match merged.last_mut() {
            Some(last) if last.0 == bin => last.1 += d,
            _ => merged.push((bin, d)),
        }
    }
    merged
}
