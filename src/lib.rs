//! Synthetic 3D polycrystalline microstructure generation.
//!
//! Grains are sampled from target size and shape statistics, packed into a
//! box by a greedy insert/remove/swap search, rasterized onto a
//! voxel grid, and given crystal orientations that match a target
//! orientation and misorientation distribution. Secondary-phase
//! precipitates can be inserted into the finished host structure.
//!
//! ```no_run
//! use microsynth::{CrystalStructure, MicrostructureStatistics, Synthesize, SynthesisConfig};
//!
//! let stats = MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 2.0, 0.2);
//! let result = Synthesize::new(SynthesisConfig::quick()).execute(&stats)?;
//! println!("{} grains", result.grains.len());
//! # Ok::<(), microsynth::SynthError>(())
//! ```

pub mod config;
pub mod crystal;
pub mod error;
pub mod grain;
pub mod math;
pub mod neighbors;
pub mod packing;
pub mod pipeline;
pub mod precipitate;
pub mod random;
pub mod shape;
pub mod stats;
pub mod voxel;

pub use config::SynthesisConfig;
pub use crystal::CrystalStructure;
pub use error::{Result, SynthError};
pub use pipeline::{CancelToken, Diagnostics, SynthesisResult, Synthesize};
pub use stats::{MicrostructureStatistics, StatisticsProvider};
