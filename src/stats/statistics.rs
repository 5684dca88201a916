//! Target statistics consumed once at the start of a synthesis run.

use std::f64::consts::FRAC_PI_2;

use crate::crystal::{CrystalStructure, EulerBinning};
use crate::error::{DomainError, Result};
use crate::random::Distribution;
use crate::shape::ShapeClass;

use super::DistributionBins;

/// Euler box used to bin principal-axis orientations.
pub const AXIS_ODF_RANGES: [f64; 3] = [FRAC_PI_2, FRAC_PI_2, FRAC_PI_2];

/// Source of target statistics for a synthesis run.
///
/// Implementations typically read persisted statistics; the in-memory
/// [`MicrostructureStatistics`] record implements it directly.
pub trait StatisticsProvider {
    /// Crystal class of the primary phase.
    fn crystal_structure(&self) -> CrystalStructure;

    /// Size, shape and axis statistics of the primary phase.
    fn primary_phase(&self) -> &PhaseStatistics;

    /// Volume-weighted orientation histogram over the reduced Euler box.
    fn odf(&self) -> &[f64];

    /// Misorientation-angle histogram over `[0, max_misorientation]`.
    fn mdf(&self) -> &[f64];

    /// Neighbor-count histogram; bin `k` counts grains with `k` neighbors.
    fn neighbor_distribution(&self) -> &[f64];

    /// Secondary-phase statistics, when precipitates are requested.
    fn precipitates(&self) -> Option<&PrecipitateStatistics>;
}

/// Parameters of a beta distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaParams {
    /// Creates beta parameters.
    #[must_use]
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// The corresponding sampling distribution.
    #[must_use]
    pub fn distribution(&self) -> Distribution {
        Distribution::Beta {
            alpha: self.alpha,
            beta: self.beta,
        }
    }
}

/// Lognormal equivalent-diameter distribution, truncated to
/// `[min_diameter, max_diameter]` and binned in steps of `bin_step`.
///
/// `mu` and `sigma` are the mean and standard deviation of `ln(diameter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeDistribution {
    pub mu: f64,
    pub sigma: f64,
    pub min_diameter: f64,
    pub max_diameter: f64,
    pub bin_step: f64,
}

impl SizeDistribution {
    /// Checks the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] for non-positive diameters, an empty range,
    /// a non-positive bin step or a non-positive sigma.
    pub fn validate(&self) -> Result<()> {
        if self.min_diameter.is_nan() || self.min_diameter <= 0.0 {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "min_diameter",
                value: self.min_diameter,
                min: 0.0,
                max: f64::INFINITY,
            }
            .into());
        }
        if !self.max_diameter.is_finite() || self.max_diameter <= self.min_diameter {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "max_diameter",
                value: self.max_diameter,
                min: self.min_diameter,
                max: f64::INFINITY,
            }
            .into());
        }
        if self.bin_step.is_nan() || self.bin_step <= 0.0 {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "bin_step",
                value: self.bin_step,
                min: 0.0,
                max: self.max_diameter - self.min_diameter,
            }
            .into());
        }
        self.distribution().validate()
    }

    /// Sampling distribution before truncation.
    #[must_use]
    pub fn distribution(&self) -> Distribution {
        Distribution::LogNormal {
            mu: self.mu,
            sigma: self.sigma,
        }
    }

    /// Number of size bins.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        let span = (self.max_diameter - self.min_diameter) / self.bin_step;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bins = (span - 1e-9).ceil().max(1.0) as usize;
        bins
    }

    /// Bin holding `diameter`; out-of-range values go to the edge bins.
    #[must_use]
    pub fn bin_of(&self, diameter: f64) -> usize {
        let offset = ((diameter - self.min_diameter) / self.bin_step).floor().max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bin = offset as usize;
        bin.min(self.bin_count() - 1)
    }

    /// Lower and upper diameter of a bin.
    #[must_use]
    pub fn bin_bounds(&self, bin: usize) -> (f64, f64) {
        #[allow(clippy::cast_precision_loss)]
        let lo = self.min_diameter + bin as f64 * self.bin_step;
        (lo, (lo + self.bin_step).min(self.max_diameter))
    }

    /// Target size histogram from the truncated lognormal CDF.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidHistogram`] if the truncated range
    /// carries no probability mass.
    pub fn target_histogram(&self) -> Result<Vec<f64>> {
        self.validate()?;
        let dist = self.distribution();
        let mut histogram = Vec::with_capacity(self.bin_count());
        for bin in 0..self.bin_count() {
            let (lo, hi) = self.bin_bounds(bin);
            histogram.push((dist.cdf(hi)? - dist.cdf(lo)?).max(0.0));
        }
        if histogram.iter().sum::<f64>() <= 0.0 {
            return Err(DomainError::InvalidHistogram {
                name: "size distribution",
                reason: "no probability mass between min and max diameter".into(),
            }
            .into());
        }
        Ok(histogram)
    }
}

/// Per-size-bin beta distributions of the shape ratios.
///
/// Entry `i` applies to size bin `i`; bins past the end reuse the last
/// entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDistributions {
    pub b_over_a: Vec<BetaParams>,
    pub c_over_a: Vec<BetaParams>,
    pub shape_factor: Vec<BetaParams>,
}

impl ShapeDistributions {
    /// The same distributions for every size bin.
    #[must_use]
    pub fn uniform_over_bins(b_over_a: BetaParams, c_over_a: BetaParams, shape_factor: BetaParams) -> Self {
        Self {
            b_over_a: vec![b_over_a],
            c_over_a: vec![c_over_a],
            shape_factor: vec![shape_factor],
        }
    }

    fn pick(list: &[BetaParams], bin: usize) -> BetaParams {
        list[bin.min(list.len() - 1)]
    }

    /// `b/a` distribution for a size bin.
    #[must_use]
    pub fn b_over_a(&self, bin: usize) -> BetaParams {
        Self::pick(&self.b_over_a, bin)
    }

    /// `c/a` distribution for a size bin.
    #[must_use]
    pub fn c_over_a(&self, bin: usize) -> BetaParams {
        Self::pick(&self.c_over_a, bin)
    }

    /// Shape-factor distribution for a size bin.
    #[must_use]
    pub fn shape_factor(&self, bin: usize) -> BetaParams {
        Self::pick(&self.shape_factor, bin)
    }

    /// Checks that every list is non-empty with positive parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStatistics`] otherwise.
    pub fn validate(&self) -> Result<()> {
        for (name, list) in [
            ("b/a", &self.b_over_a),
            ("c/a", &self.c_over_a),
            ("shape factor", &self.shape_factor),
        ] {
            if list.is_empty() {
                return Err(DomainError::InvalidStatistics(format!(
                    "{name} distribution has no bins"
                ))
                .into());
            }
            for params in list {
                params.distribution().validate()?;
            }
        }
        Ok(())
    }
}

/// Statistics of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStatistics {
    /// Phase identity written into the voxel grid.
    pub phase: u8,
    pub shape_class: ShapeClass,
    pub size: SizeDistribution,
    pub shapes: ShapeDistributions,
    /// Principal-axis orientation histogram over [`AXIS_ODF_RANGES`]
    /// (length must be a cube number).
    pub axis_odf: Vec<f64>,
}

impl PhaseStatistics {
    /// Checks every distribution of the phase.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] describing the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        if self.phase == 0 {
            return Err(DomainError::InvalidStatistics("phase 0 is reserved".into()).into());
        }
        self.size.target_histogram()?;
        self.shapes.validate()?;
        EulerBinning::from_histogram_len("axis odf", self.axis_odf.len(), AXIS_ODF_RANGES)?;
        DistributionBins::new("axis odf", &self.axis_odf)?;
        Ok(())
    }
}

/// Secondary-phase statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipitateStatistics {
    pub phase: PhaseStatistics,
    /// Target fraction of the host structure's volume.
    pub volume_fraction: f64,
}

/// In-memory statistics record.
#[derive(Debug, Clone, PartialEq)]
pub struct MicrostructureStatistics {
    pub crystal_structure: CrystalStructure,
    pub primary: PhaseStatistics,
    pub odf: Vec<f64>,
    pub mdf: Vec<f64>,
    pub neighbor_distribution: Vec<f64>,
    pub precipitates: Option<PrecipitateStatistics>,
}

impl MicrostructureStatistics {
    /// Equiaxed ellipsoidal grains with random texture.
    ///
    /// `mu`/`sigma` parameterize `ln(diameter)`; the diameter range spans
    /// three sigma either side of the median.
    #[must_use]
    pub fn equiaxed(crystal_structure: CrystalStructure, mu: f64, sigma: f64) -> Self {
        let min_diameter = (mu - 3.0 * sigma).exp();
        let max_diameter = (mu + 3.0 * sigma).exp();
        let bin_step = (max_diameter - min_diameter) / 10.0;
        Self {
            crystal_structure,
            primary: PhaseStatistics {
                phase: 1,
                shape_class: ShapeClass::Ellipsoid,
                size: SizeDistribution {
                    mu,
                    sigma,
                    min_diameter,
                    max_diameter,
                    bin_step,
                },
                shapes: ShapeDistributions::uniform_over_bins(
                    BetaParams::new(15.0, 1.5),
                    BetaParams::new(12.0, 2.0),
                    BetaParams::new(10.0, 1.0),
                ),
                axis_odf: vec![1.0; 216],
            },
            odf: vec![1.0; 216],
            mdf: mackenzie_like(crystal_structure, 18),
            neighbor_distribution: gaussian_bins(13.0, 4.0, 30),
            precipitates: None,
        }
    }

    /// Adds a precipitate population of small equiaxed particles.
    #[must_use]
    pub fn with_precipitates(mut self, mu: f64, sigma: f64, volume_fraction: f64) -> Self {
        let mut phase = Self::equiaxed(self.crystal_structure, mu, sigma).primary;
        phase.phase = 2;
        self.precipitates = Some(PrecipitateStatistics {
            phase,
            volume_fraction,
        });
        self
    }

    /// Checks every histogram and parameter before any sampling.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] describing the first invalid input.
    pub fn validate(&self) -> Result<()> {
        validate_provider(self)
    }
}

impl StatisticsProvider for MicrostructureStatistics {
    fn crystal_structure(&self) -> CrystalStructure {
        self.crystal_structure
    }

    fn primary_phase(&self) -> &PhaseStatistics {
        &self.primary
    }

    fn odf(&self) -> &[f64] {
        &self.odf
    }

    fn mdf(&self) -> &[f64] {
        &self.mdf
    }

    fn neighbor_distribution(&self) -> &[f64] {
        &self.neighbor_distribution
    }

    fn precipitates(&self) -> Option<&PrecipitateStatistics> {
        self.precipitates.as_ref()
    }
}

/// Validates everything a provider supplies.
///
/// # Errors
///
/// Returns [`DomainError`] describing the first invalid input.
pub(crate) fn validate_provider<P: StatisticsProvider + ?Sized>(provider: &P) -> Result<()> {
    provider.primary_phase().validate()?;
    let crystal = provider.crystal_structure();
    EulerBinning::from_histogram_len("odf", provider.odf().len(), crystal.euler_ranges())?;
    DistributionBins::new("odf", provider.odf())?;
    DistributionBins::new("mdf", provider.mdf())?;
    DistributionBins::new("neighbor distribution", provider.neighbor_distribution())?;
    if let Some(precipitates) = provider.precipitates() {
        precipitates.phase.validate()?;
        let f = precipitates.volume_fraction;
        if f.is_nan() || f <= 0.0 || f >= 1.0 {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "precipitate volume_fraction",
                value: f,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
    }
    Ok(())
}

/// Discretized normal density over `0..bins`.
fn gaussian_bins(mean: f64, std_dev: f64, bins: usize) -> Vec<f64> {
    (0..bins)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let z = (k as f64 - mean) / std_dev;
            (-0.5 * z * z).exp()
        })
        .collect()
}

/// Rough random-texture misorientation shape: rising like `(1 - cos)`
/// and tapering near the maximum angle.
fn mackenzie_like(crystal: CrystalStructure, bins: usize) -> Vec<f64> {
    let max = crystal.max_misorientation();
    (0..bins)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let center = (k as f64 + 0.5) / bins as f64 * max;
            let rise = 1.0 - center.cos();
            let taper = (1.0 - center / max).sqrt();
            rise * taper + 1e-3
        })
        .collect()
}
