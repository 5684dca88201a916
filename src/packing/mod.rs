//! Grain sampling and greedy packing.

mod engine;
mod placement;
mod sampler;

pub use engine::{PackOutcome, PackingEngine, PackingErrors, PackingReport, StopReason};
pub use placement::{Placement, SeedPlacement, UniformPlacement};
pub use sampler::{GenerateGrains, SampledGrains};
