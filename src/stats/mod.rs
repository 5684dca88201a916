mod bins;
mod statistics;

pub use bins::DistributionBins;
pub use statistics::{
    BetaParams, MicrostructureStatistics, PhaseStatistics, PrecipitateStatistics,
    ShapeDistributions, SizeDistribution, StatisticsProvider, AXIS_ODF_RANGES,
};

pub(crate) use statistics::validate_provider;
