use std::fmt;

use crate::crystal::CrystallographyReport;
use crate::packing::PackingReport;
use crate::precipitate::PrecipitateReport;
use crate::voxel::{GapFillReport, RasterReport};

/// A target that a completed run did not meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Cumulative sampled grain volume.
    SampledVolume,
    /// Requested number of sampled grains.
    GrainCount,
    /// Placed volume over domain volume after packing.
    FillFraction,
    /// Precipitate volume over host volume.
    PrecipitateFraction,
    /// Candidate precipitate centers ran out.
    PrecipitateSeeds,
    /// The run was cancelled before its optimizers finished.
    Cancelled,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SampledVolume => "sampled volume",
            Self::GrainCount => "grain count",
            Self::FillFraction => "fill fraction",
            Self::PrecipitateFraction => "precipitate fraction",
            Self::PrecipitateSeeds => "precipitate seeds",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How far a metric missed its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    pub metric: Metric,
    pub target: f64,
    pub achieved: f64,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: achieved {} of target {}",
            self.metric, self.achieved, self.target
        )
    }
}

/// Everything measured during a run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Resolved master seed.
    pub seed: u64,
    /// Grains sampled for the initial packing.
    pub sampled: usize,
    /// One report per optimization round.
    pub packing: Vec<PackingReport>,
    /// Final proximity factor after recalibration.
    pub contact_factor: f64,
    pub raster: RasterReport,
    pub gap_fill: GapFillReport,
    pub crystallography: CrystallographyReport,
    pub precipitates: Option<PrecipitateReport>,
    /// Size-histogram error of the final grains.
    pub size_error: f64,
    /// Pearson statistic of the final size histogram.
    pub size_chi_squared: f64,
    /// Neighbor-count error measured on the voxel grid, over interior grains.
    pub neighborhood_error: f64,
    /// Pearson statistic of the final neighbor-count histogram.
    pub neighborhood_chi_squared: f64,
    /// Grains counted in the neighbor-count histogram.
    pub measured_neighborhoods: usize,
    /// ODF error of the final orientations, voxel-weighted.
    pub odf_error: f64,
    /// Pearson statistic of the final ODF histogram.
    pub odf_chi_squared: f64,
    pub shortfalls: Vec<Shortfall>,
    pub cancelled: bool,
}

impl Diagnostics {
    /// Returns `true` if every target was met.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shortfalls.is_empty()
    }

    /// Shortfall recorded for `metric`, if any.
    #[must_use]
    pub fn shortfall(&self, metric: Metric) -> Option<&Shortfall> {
        self.shortfalls.iter().find(|s| s.metric == metric)
    }

    pub(crate) fn record(&mut self, metric: Metric, target: f64, achieved: f64) {
        self.shortfalls.push(Shortfall {
            metric,
            target,
            achieved,
        });
    }
}
