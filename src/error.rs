use thiserror::Error;

/// Top-level error type for the microstructure synthesis engine.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Numerical(#[from] NumericalError),

    #[error(transparent)]
    Exhaustion(#[from] ExhaustionError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Malformed or out-of-range statistics and configuration input.
///
/// Always fatal: raised before any sampling begins.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("parameter {parameter} = {value} is out of range [{min}, {max}]")]
    ParameterOutOfRange {
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("histogram {name} is invalid: {reason}")]
    InvalidHistogram { name: &'static str, reason: String },

    #[error("invalid statistics: {0}")]
    InvalidStatistics(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// A special function was evaluated outside its mathematical domain.
#[derive(Debug, Error)]
pub enum NumericalError {
    #[error("{function} is undefined for {argument}")]
    OutOfDomain {
        function: &'static str,
        argument: String,
    },

    #[error("{function} failed to converge after {iterations} iterations")]
    NoConvergence {
        function: &'static str,
        iterations: usize,
    },
}

/// A bounded generator ran out of attempts.
#[derive(Debug, Error)]
pub enum ExhaustionError {
    #[error("all {total} seed indices have been consumed")]
    SeedsExhausted { total: usize },

    #[error("candidate cap of {cap} grains reached")]
    CandidatesExhausted { cap: usize },
}

/// The requested structure cannot be built geometrically.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("no active grains available to fill {unassigned} unassigned voxels")]
    NoActiveGrains { unassigned: usize },

    #[error("voxel domain is empty")]
    EmptyDomain,
}

/// Convenience type alias for results using [`SynthError`].
pub type Result<T> = std::result::Result<T, SynthError>;
