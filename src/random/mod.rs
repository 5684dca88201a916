mod distribution;
mod rng;
mod seeds;

pub use distribution::Distribution;
pub use rng::SynthRng;
pub use seeds::SeedSampler;
