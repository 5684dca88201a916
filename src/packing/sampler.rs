use tracing::{debug, warn};

use crate::crystal::{EulerBinning, Orientation};
use crate::error::{ExhaustionError, Result, SynthError};
use crate::grain::{Grain, GrainId};
use crate::math::Point3;
use crate::random::SynthRng;
use crate::shape::ShapeClass;
use crate::stats::{DistributionBins, PhaseStatistics, AXIS_ODF_RANGES};

/// Redraws of an out-of-range diameter before clamping.
const DIAMETER_ATTEMPTS: usize = 1_000;

/// Redraws of `c/a` exceeding `b/a` before falling back to `b/a`.
const RATIO_ATTEMPTS: usize = 100;

/// Smallest axis ratio or shape factor a grain may carry.
const MIN_RATIO: f64 = 0.05;

/// Candidates produced by [`GenerateGrains::execute`].
#[derive(Debug, Clone, Default)]
pub struct SampledGrains {
    /// Candidates in sampling order, all inactive.
    pub grains: Vec<Grain>,
    /// Cumulative equivalent-sphere volume.
    pub volume: f64,
    /// The candidate cap was reached before the target.
    pub under_filled: bool,
}

/// Draws candidate grains from one phase's statistics.
///
/// The generator keeps a count of every candidate it has produced; once
/// the cap is reached further draws fail with
/// [`ExhaustionError::CandidatesExhausted`]. The same generator feeds the
/// initial sample and every replacement drawn during optimization.
#[derive(Debug, Clone)]
pub struct GenerateGrains<'a> {
    phase: &'a PhaseStatistics,
    axis_bins: DistributionBins,
    axis_binning: EulerBinning,
    max_candidates: usize,
    drawn: usize,
}

impl<'a> GenerateGrains<'a> {
    /// Creates a generator for `phase` capped at `max_candidates` draws.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`](crate::error::DomainError) if the phase
    /// statistics are invalid.
    pub fn new(phase: &'a PhaseStatistics, max_candidates: usize) -> Result<Self> {
        phase.validate()?;
        Ok(Self {
            phase,
            axis_bins: DistributionBins::new("axis odf", &phase.axis_odf)?,
            axis_binning: EulerBinning::from_histogram_len(
                "axis odf",
                phase.axis_odf.len(),
                AXIS_ODF_RANGES,
            )?,
            max_candidates,
            drawn: 0,
        })
    }

    /// Statistics the generator draws from.
    #[must_use]
    pub fn phase(&self) -> &PhaseStatistics {
        self.phase
    }

    /// Candidates drawn so far.
    #[must_use]
    pub fn drawn(&self) -> usize {
        self.drawn
    }

    /// Returns `true` once the cap has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.drawn >= self.max_candidates
    }

    /// Samples candidates until their cumulative volume reaches
    /// `target_volume` or the cap is hit.
    ///
    /// The last grain may overshoot the target by at most its own volume.
    ///
    /// # Errors
    ///
    /// Returns an error only for numerical failures while sampling.
    pub fn execute(&mut self, target_volume: f64, rng: &mut SynthRng) -> Result<SampledGrains> {
        let mut sampled = SampledGrains::default();
        while sampled.volume < target_volume {
            match self.sample_one(rng) {
                Ok(grain) => {
                    sampled.volume += grain.volume();
                    sampled.grains.push(grain);
                }
                Err(SynthError::Exhaustion(_)) => {
                    sampled.under_filled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.log_sample(&sampled, target_volume);
        Ok(sampled)
    }

    /// Samples exactly `count` candidates, or fewer if the cap is hit.
    ///
    /// # Errors
    ///
    /// Returns an error only for numerical failures while sampling.
    pub fn execute_count(&mut self, count: usize, rng: &mut SynthRng) -> Result<SampledGrains> {
        let mut sampled = SampledGrains::default();
        for _ in 0..count {
            match self.sample_one(rng) {
                Ok(grain) => {
                    sampled.volume += grain.volume();
                    sampled.grains.push(grain);
                }
                Err(SynthError::Exhaustion(_)) => {
                    sampled.under_filled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.log_sample(&sampled, f64::NAN);
        Ok(sampled)
    }

    fn log_sample(&self, sampled: &SampledGrains, target_volume: f64) {
        if sampled.under_filled {
            warn!(
                cap = self.max_candidates,
                sampled = sampled.grains.len(),
                volume = sampled.volume,
                target_volume,
                "candidate cap reached before the sampling target"
            );
        } else {
            debug!(
                sampled = sampled.grains.len(),
                volume = sampled.volume,
                target_volume,
                "sampled candidate grains"
            );
        }
    }

    /// Draws one inactive candidate grain centered at the origin.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustionError::CandidatesExhausted`] once the cap is
    /// reached.
    pub fn sample_one(&mut self, rng: &mut SynthRng) -> Result<Grain> {
        if self.is_exhausted() {
            return Err(ExhaustionError::CandidatesExhausted {
                cap: self.max_candidates,
            }
            .into());
        }
        self.drawn += 1;

        let size = &self.phase.size;
        let diameter = self.sample_diameter(rng)?;
        let size_bin = size.bin_of(diameter);

        let shapes = &self.phase.shapes;
        let b_over_a = shapes
            .b_over_a(size_bin)
            .distribution()
            .sample(rng)?
            .clamp(MIN_RATIO, 1.0);
        let c_dist = shapes.c_over_a(size_bin).distribution();
        let mut c_over_a = c_dist.sample(rng)?.clamp(MIN_RATIO, 1.0);
        let mut attempts = 1;
        while c_over_a > b_over_a && attempts < RATIO_ATTEMPTS {
            c_over_a = c_dist.sample(rng)?.clamp(MIN_RATIO, 1.0);
            attempts += 1;
        }
        let c_over_a = c_over_a.min(b_over_a);

        let shape = self.phase.shape_class;
        let shape_factor = match shape {
            ShapeClass::Ellipsoid => 1.0,
            _ => shapes
                .shape_factor(size_bin)
                .distribution()
                .sample(rng)?
                .clamp(MIN_RATIO, 1.0),
        };

        let volume = std::f64::consts::PI / 6.0 * diameter.powi(3);
        let abc = volume / shape.volume_coefficient(shape_factor)?;
        let a = (abc / (b_over_a * c_over_a)).cbrt();

        let axis_bin = self.axis_bins.sample_bin(rng);
        let axes = self.axis_binning.sample_in_bin(axis_bin, rng);

        Ok(Grain {
            id: GrainId::NONE,
            centroid: Point3::origin(),
            equivalent_diameter: diameter,
            radii: [a, a * b_over_a, a * c_over_a],
            axes,
            shape,
            shape_factor,
            orientation: Orientation::identity(),
            phase: self.phase.phase,
            size_bin,
            neighbors: Vec::new(),
            active: false,
        })
    }

    fn sample_diameter(&self, rng: &mut SynthRng) -> Result<f64> {
        let size = &self.phase.size;
        let dist = size.distribution();
        let mut diameter = dist.sample(rng)?;
        for _ in 1..DIAMETER_ATTEMPTS {
            if (size.min_diameter..=size.max_diameter).contains(&diameter) {
                return Ok(diameter);
            }
            diameter = dist.sample(rng)?;
        }
        Ok(diameter.clamp(size.min_diameter, size.max_diameter))
    }
}
