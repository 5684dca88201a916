use crate::error::Result;
use crate::math::{Point3, Vector3};
use crate::random::{SeedSampler, SynthRng};
use crate::voxel::VoxelGrid;

/// Source of trial centroid positions for the packing engine.
pub trait Placement {
    /// Proposes the next trial position.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustionError::SeedsExhausted`](crate::error::ExhaustionError)
    /// when a finite position pool has been used up.
    fn propose(&mut self, rng: &mut SynthRng) -> Result<Point3>;
}

/// Positions drawn uniformly in the box `[0, extent)`.
#[derive(Debug, Clone, Copy)]
pub struct UniformPlacement {
    extent: Vector3,
}

impl UniformPlacement {
    /// Creates a placement over `[0, extent)`.
    #[must_use]
    pub fn new(extent: Vector3) -> Self {
        Self { extent }
    }

    /// Creates a placement covering a voxel grid.
    #[must_use]
    pub fn for_grid(grid: &VoxelGrid) -> Self {
        Self::new(grid.extent())
    }
}

impl Placement for UniformPlacement {
    fn propose(&mut self, rng: &mut SynthRng) -> Result<Point3> {
        Ok(Point3::new(
            rng.gen_range_f64(0.0, self.extent.x),
            rng.gen_range_f64(0.0, self.extent.y),
            rng.gen_range_f64(0.0, self.extent.z),
        ))
    }
}

/// Positions at voxel centers drawn without replacement from a candidate
/// voxel list.
#[derive(Debug)]
pub struct SeedPlacement<'g> {
    grid: &'g VoxelGrid,
    seeds: SeedSampler,
}

impl<'g> SeedPlacement<'g> {
    /// Creates a placement drawing from `candidates` (voxel indices of
    /// `grid`).
    #[must_use]
    pub fn new(grid: &'g VoxelGrid, candidates: Vec<usize>) -> Self {
        Self {
            grid,
            seeds: SeedSampler::from_candidates(candidates),
        }
    }

    /// Candidate voxels not yet used.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.seeds.remaining()
    }
}

impl Placement for SeedPlacement<'_> {
    fn propose(&mut self, rng: &mut SynthRng) -> Result<Point3> {
        let index = self.seeds.draw(rng)?;
        Ok(self.grid.voxel_center(index))
    }
}
