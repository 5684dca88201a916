mod gaps;
mod grid;
mod raster;

pub use gaps::{FillGaps, GapFillReport};
pub use grid::VoxelGrid;
pub use raster::{AssignVoxels, RasterReport};

pub(crate) use raster::grain_claims;
