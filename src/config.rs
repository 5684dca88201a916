//! Run configuration and presets.
//!
//! [`SynthesisConfig`] bundles the domain, seed and per-stage settings of a
//! synthesis run. Statistics are supplied separately through a
//! [`StatisticsProvider`](crate::stats::StatisticsProvider).
//!
//! # Example
//!
//! ```
//! use microsynth::config::{Seed, SynthesisConfig};
//!
//! let config = SynthesisConfig::quick()
//!     .with_seed(Seed::Fixed(7))
//!     .with_parallel(false);
//! assert!(config.validate().is_ok());
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DomainError, Result};

/// Source of the master random seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// A fixed seed; runs are reproducible.
    Fixed(u64),
    /// Derive the seed from the wall clock at run start.
    FromTime,
}

impl Default for Seed {
    fn default() -> Self {
        Self::Fixed(0x5eed)
    }
}

impl Seed {
    /// Resolves the sentinel into a concrete seed.
    #[must_use]
    pub fn resolve(self) -> u64 {
        match self {
            Self::Fixed(seed) => seed,
            Self::FromTime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| {
                    #[allow(clippy::cast_possible_truncation)]
                    let nanos = d.as_nanos() as u64;
                    nanos
                }),
        }
    }
}

/// What the grain sampler should aim for.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FillTarget {
    /// Sample until the cumulative grain volume covers the domain.
    #[default]
    DomainVolume,
    /// Sample exactly this many grains.
    GrainCount(usize),
}

/// Voxel domain extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainConfig {
    /// Voxel counts along x, y, z.
    pub dims: [usize; 3],
    /// Physical voxel edge lengths along x, y, z.
    pub spacing: [f64; 3],
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            dims: [128, 128, 128],
            spacing: [1.0; 3],
        }
    }
}

/// Packing engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PackingConfig {
    /// Weight of the fill error term.
    pub fill_weight: f64,
    /// Weight of the size-distribution error term.
    pub size_weight: f64,
    /// Weight of the neighborhood error term.
    pub neighborhood_weight: f64,
    /// Maximum outer iterations of one optimization run.
    pub max_iterations: usize,
    /// Combined error at which optimization stops.
    pub tolerance: f64,
    /// Fill error band inside which swaps are preferred over add/remove.
    pub fill_tolerance: f64,
    /// Positions tried per candidate before insertion gives up.
    pub relocation_retries: usize,
    /// Trial positions ranked by overlap once the domain is half full.
    pub trial_positions: usize,
    /// Initial proximity factor for counting neighbors before rasterization.
    pub contact_factor: f64,
    /// Optimize, rasterize and recalibrate this many extra times.
    pub feedback_rounds: usize,
    /// Hard cap on grains drawn from the sampler in one run.
    pub max_candidates: usize,
    /// Largest overlap with any placed grain a trial position may have,
    /// as a fraction in `[0, 1]` of the smaller grain's diameter. `1.0`
    /// accepts any position.
    pub overlap_allowed: f64,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            fill_weight: 1.0,
            size_weight: 1.0,
            neighborhood_weight: 1.0,
            max_iterations: 20_000,
            tolerance: 1e-4,
            fill_tolerance: 0.01,
            relocation_retries: 8,
            trial_positions: 16,
            contact_factor: 1.1,
            feedback_rounds: 1,
            max_candidates: 1_000_000,
            overlap_allowed: 1.0,
        }
    }
}

impl PackingConfig {
    /// Sets the three error weights.
    #[must_use]
    pub fn with_weights(mut self, fill: f64, size: f64, neighborhood: f64) -> Self {
        self.fill_weight = fill;
        self.size_weight = size;
        self.neighborhood_weight = neighborhood;
        self
    }

    /// Sets the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the candidate cap.
    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    /// Sets the overlap allowance for trial positions.
    #[must_use]
    pub fn with_overlap_allowed(mut self, overlap_allowed: f64) -> Self {
        self.overlap_allowed = overlap_allowed;
        self
    }

    /// Sets the number of recalibration rounds.
    #[must_use]
    pub fn with_feedback_rounds(mut self, rounds: usize) -> Self {
        self.feedback_rounds = rounds;
        self
    }

    fn validate(&self) -> Result<()> {
        for (parameter, value) in [
            ("packing fill_weight", self.fill_weight),
            ("packing size_weight", self.size_weight),
            ("packing neighborhood_weight", self.neighborhood_weight),
            ("packing tolerance", self.tolerance),
            ("packing fill_tolerance", self.fill_tolerance),
        ] {
            non_negative(parameter, value)?;
        }
        if self.contact_factor.is_nan() || self.contact_factor <= 0.0 {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "packing contact_factor",
                value: self.contact_factor,
                min: 0.0,
                max: f64::INFINITY,
            }
            .into());
        }
        let overlap = self.overlap_allowed;
        if overlap.is_nan() || !(0.0..=1.0).contains(&overlap) {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "packing overlap_allowed",
                value: overlap,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        if self.relocation_retries == 0 || self.trial_positions == 0 || self.max_candidates == 0 {
            return Err(DomainError::InvalidConfiguration(
                "relocation_retries, trial_positions and max_candidates must be positive".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// Crystallography assigner settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CrystallographyConfig {
    /// Maximum Monte-Carlo iterations.
    pub max_iterations: usize,
    /// Combined error at which refinement stops.
    pub tolerance: f64,
    /// Weight of the ODF error term.
    pub odf_weight: f64,
    /// Weight of the MDF error term.
    pub mdf_weight: f64,
    /// Probability that an iteration redraws one orientation from the ODF
    /// instead of swapping two.
    pub resample_probability: f64,
}

impl Default for CrystallographyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            tolerance: 1e-6,
            odf_weight: 1.0,
            mdf_weight: 1.0,
            resample_probability: 0.0,
        }
    }
}

impl CrystallographyConfig {
    /// Sets the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the resample move probability.
    #[must_use]
    pub fn with_resample_probability(mut self, probability: f64) -> Self {
        self.resample_probability = probability;
        self
    }

    fn validate(&self) -> Result<()> {
        non_negative("crystallography tolerance", self.tolerance)?;
        non_negative("crystallography odf_weight", self.odf_weight)?;
        non_negative("crystallography mdf_weight", self.mdf_weight)?;
        let p = self.resample_probability;
        if p.is_nan() || !(0.0..=1.0).contains(&p) {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "resample_probability",
                value: p,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        Ok(())
    }
}

/// Where precipitate centers may be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Any voxel of the host structure.
    #[default]
    Uniform,
    /// Only voxels on a grain boundary.
    Boundary,
}

/// Precipitate inserter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipitateConfig {
    pub placement: PlacementPolicy,
    /// Packing settings for the precipitate population; the neighborhood
    /// weight is ignored.
    pub packing: PackingConfig,
}

impl Default for PrecipitateConfig {
    fn default() -> Self {
        Self {
            placement: PlacementPolicy::default(),
            packing: PackingConfig {
                max_iterations: 2_000,
                feedback_rounds: 0,
                ..PackingConfig::default()
            },
        }
    }
}

impl PrecipitateConfig {
    /// Sets the placement policy.
    #[must_use]
    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }
}

/// Complete configuration of one synthesis run.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    pub domain: DomainConfig,
    pub target: FillTarget,
    pub seed: Seed,
    pub packing: PackingConfig,
    pub crystallography: CrystallographyConfig,
    pub precipitates: PrecipitateConfig,
    /// Whether read-only sub-steps may use rayon.
    pub parallel: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            domain: DomainConfig::default(),
            target: FillTarget::default(),
            seed: Seed::default(),
            packing: PackingConfig::default(),
            crystallography: CrystallographyConfig::default(),
            precipitates: PrecipitateConfig::default(),
            parallel: true,
        }
    }
}

impl SynthesisConfig {
    /// Small domain and short budgets for tests and previews.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            domain: DomainConfig {
                dims: [32, 32, 32],
                spacing: [1.0; 3],
            },
            target: FillTarget::DomainVolume,
            seed: Seed::default(),
            packing: PackingConfig {
                max_iterations: 400,
                trial_positions: 8,
                max_candidates: 20_000,
                ..PackingConfig::default()
            },
            crystallography: CrystallographyConfig {
                max_iterations: 2_000,
                ..CrystallographyConfig::default()
            },
            precipitates: PrecipitateConfig {
                placement: PlacementPolicy::Uniform,
                packing: PackingConfig {
                    max_iterations: 200,
                    trial_positions: 4,
                    feedback_rounds: 0,
                    max_candidates: 20_000,
                    ..PackingConfig::default()
                },
            },
            parallel: true,
        }
    }

    /// Sets the voxel domain.
    #[must_use]
    pub fn with_domain(mut self, dims: [usize; 3], spacing: [f64; 3]) -> Self {
        self.domain = DomainConfig { dims, spacing };
        self
    }

    /// Sets the sampling target.
    #[must_use]
    pub fn with_target(mut self, target: FillTarget) -> Self {
        self.target = target;
        self
    }

    /// Sets the seed.
    #[must_use]
    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Replaces the packing settings.
    #[must_use]
    pub fn with_packing(mut self, packing: PackingConfig) -> Self {
        self.packing = packing;
        self
    }

    /// Replaces the crystallography settings.
    #[must_use]
    pub fn with_crystallography(mut self, crystallography: CrystallographyConfig) -> Self {
        self.crystallography = crystallography;
        self
    }

    /// Replaces the precipitate settings.
    #[must_use]
    pub fn with_precipitates(mut self, precipitates: PrecipitateConfig) -> Self {
        self.precipitates = precipitates;
        self
    }

    /// Enables or disables parallel evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] for an empty domain, non-positive spacing,
    /// negative weights or tolerances, a zero grain-count target, or zero
    /// retry bounds.
    pub fn validate(&self) -> Result<()> {
        if self.domain.dims.contains(&0) {
            return Err(DomainError::InvalidConfiguration(format!(
                "domain dims {:?} contain a zero extent",
                self.domain.dims
            ))
            .into());
        }
        for value in self.domain.spacing {
            if !value.is_finite() || value <= 0.0 {
                return Err(DomainError::ParameterOutOfRange {
                    parameter: "domain spacing",
                    value,
                    min: 0.0,
                    max: f64::INFINITY,
                }
                .into());
            }
        }
        if self.target == FillTarget::GrainCount(0) {
            return Err(DomainError::InvalidConfiguration("grain count target is zero".into()).into());
        }
        self.packing.validate()?;
        self.crystallography.validate()?;
        self.precipitates.packing.validate()
    }
}

fn non_negative(parameter: &'static str, value: f64) -> Result<()> {
    if value.is_nan() || value < 0.0 {
        return Err(DomainError::ParameterOutOfRange {
            parameter,
            value,
            min: 0.0,
            max: f64::INFINITY,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(SynthesisConfig::default().validate().is_ok());
        assert!(SynthesisConfig::quick().validate().is_ok());
    }

    #[test]
    fn fixed_seed_resolves_to_itself() {
        assert_eq!(Seed::Fixed(42).resolve(), 42);
    }

    #[test]
    fn rejects_empty_domain() {
        let config = SynthesisConfig::quick().with_domain([0, 10, 10], [1.0; 3]);
        assert!(config.validate().is_err());
        let config = SynthesisConfig::quick().with_domain([10, 10, 10], [1.0, -1.0, 1.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_weights() {
        let packing = PackingConfig::default().with_weights(1.0, -0.5, 1.0);
        assert!(SynthesisConfig::quick().with_packing(packing).validate().is_err());
    }

    #[test]
    fn rejects_overlap_allowance_outside_unit_interval() {
        for overlap in [-0.1, 1.5, f64::NAN] {
            let packing = PackingConfig::default().with_overlap_allowed(overlap);
            assert!(SynthesisConfig::quick().with_packing(packing).validate().is_err());
        }
        let packing = PackingConfig::default().with_overlap_allowed(0.0);
        assert!(SynthesisConfig::quick().with_packing(packing).validate().is_ok());
    }

    #[test]
    fn rejects_bad_resample_probability() {
        let crystal = CrystallographyConfig::default().with_resample_probability(1.5);
        assert!(SynthesisConfig::quick()
            .with_crystallography(crystal)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_zero_grain_count() {
        let config = SynthesisConfig::quick().with_target(FillTarget::GrainCount(0));
        assert!(config.validate().is_err());
    }
}
