use std::ops::RangeInclusive;

use crate::error::{DomainError, GeometryError, Result};
use crate::grain::GrainId;
use crate::math::{Point3, Vector3};

/// Dense voxel grid of `nx * ny * nz` cells.
///
/// Cell `(i, j, k)` has linear index `i + j * nx + k * nx * ny` and its
/// center sits at `((i + 0.5) * dx, (j + 0.5) * dy, (k + 0.5) * dz)`.
/// Each cell carries a primary grain identity, a phase and a secondary
/// (precipitate) identity.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    dims: [usize; 3],
    spacing: [f64; 3],
    grain_ids: Vec<GrainId>,
    phases: Vec<u8>,
    precipitate_ids: Vec<GrainId>,
}

impl VoxelGrid {
    /// Creates an unassigned grid.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::EmptyDomain`] if any extent is zero and
    /// [`DomainError::ParameterOutOfRange`] if any spacing is not positive.
    pub fn new(dims: [usize; 3], spacing: [f64; 3]) -> Result<Self> {
        if dims.contains(&0) {
            return Err(GeometryError::EmptyDomain.into());
        }
        if let Some(&bad) = spacing.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "spacing",
                value: bad,
                min: 0.0,
                max: f64::INFINITY,
            }
            .into());
        }
        let total = dims[0] * dims[1] * dims[2];
        Ok(Self {
            dims,
            spacing,
            grain_ids: vec![GrainId::NONE; total],
            phases: vec![0; total],
            precipitate_ids: vec![GrainId::NONE; total],
        })
    }

    /// Number of cells along each axis.
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Physical size of a cell along each axis.
    #[must_use]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// Total number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grain_ids.len()
    }

    /// Returns `true` if the grid holds no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grain_ids.is_empty()
    }

    /// Physical volume of one cell.
    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// Physical size of the whole domain.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn extent(&self) -> Vector3 {
        Vector3::new(
            self.dims[0] as f64 * self.spacing[0],
            self.dims[1] as f64 * self.spacing[1],
            self.dims[2] as f64 * self.spacing[2],
        )
    }

    /// Physical volume of the whole domain.
    #[must_use]
    pub fn domain_volume(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let cells = self.len() as f64;
        cells * self.voxel_volume()
    }

    /// Converts `(i, j, k)` to a linear index.
    #[inline]
    #[must_use]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims[0] + k * self.dims[0] * self.dims[1]
    }

    /// Converts a linear index back to `(i, j, k)`.
    #[inline]
    #[must_use]
    pub fn ijk(&self, index: usize) -> [usize; 3] {
        let plane = self.dims[0] * self.dims[1];
        [index % self.dims[0], (index % plane) / self.dims[0], index / plane]
    }

    /// Physical center of a cell.
    #[must_use]
    pub fn voxel_center(&self, index: usize) -> Point3 {
        let [i, j, k] = self.ijk(index);
        self.center_of(i, j, k)
    }

    /// Physical center of cell `(i, j, k)`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center_of(&self, i: usize, j: usize, k: usize) -> Point3 {
        Point3::new(
            (i as f64 + 0.5) * self.spacing[0],
            (j as f64 + 0.5) * self.spacing[1],
            (k as f64 + 0.5) * self.spacing[2],
        )
    }

    /// Cell containing a physical point, if inside the domain.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn index_of_point(&self, point: &Point3) -> Option<usize> {
        let mut ijk = [0usize; 3];
        for axis in 0..3 {
            let cell = (point[axis] / self.spacing[axis]).floor();
            if cell.is_nan() || cell < 0.0 || cell >= self.dims[axis] as f64 {
                return None;
            }
            ijk[axis] = cell as usize;
        }
        Some(self.index(ijk[0], ijk[1], ijk[2]))
    }

    /// Cell index ranges covering the axis-aligned box of half-width
    /// `radius` around `center`, clamped to the grid. `None` if the box
    /// misses the domain entirely.
    #[must_use]
    pub fn cell_ranges(&self, center: &Point3, radius: f64) -> Option<[RangeInclusive<usize>; 3]> {
        let mut ranges = [0..=0, 0..=0, 0..=0];
        for axis in 0..3 {
            let s = self.spacing[axis];
            let lo = ((center[axis] - radius) / s - 0.5).floor();
            let hi = ((center[axis] + radius) / s - 0.5).ceil();
            #[allow(clippy::cast_precision_loss)]
            let max = (self.dims[axis] - 1) as f64;
            if hi < 0.0 || lo > max {
                return None;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let range = (lo.max(0.0) as usize)..=(hi.min(max) as usize);
            ranges[axis] = range;
        }
        Some(ranges)
    }

    /// Linear indices of the up to six face-adjacent cells.
    #[must_use]
    pub fn face_neighbors(&self, index: usize) -> [Option<usize>; 6] {
        let [i, j, k] = self.ijk(index);
        let [nx, ny, nz] = self.dims;
        let sj = nx;
        let sk = nx * ny;
        [
            (i > 0).then(|| index - 1),
            (i + 1 < nx).then(|| index + 1),
            (j > 0).then(|| index - sj),
            (j + 1 < ny).then(|| index + sj),
            (k > 0).then(|| index - sk),
            (k + 1 < nz).then(|| index + sk),
        ]
    }

    /// Returns `true` if the cell lies on the outer face of the domain.
    #[must_use]
    pub fn is_domain_surface(&self, index: usize) -> bool {
        let [i, j, k] = self.ijk(index);
        let [nx, ny, nz] = self.dims;
        i == 0 || j == 0 || k == 0 || i + 1 == nx || j + 1 == ny || k + 1 == nz
    }

    /// Returns `true` if a face neighbor holds a different grain identity.
    #[must_use]
    pub fn is_grain_boundary(&self, index: usize) -> bool {
        let id = self.grain_ids[index];
        self.face_neighbors(index)
            .iter()
            .flatten()
            .any(|&n| self.grain_ids[n] != id)
    }

    /// Primary grain identity of a cell.
    #[inline]
    #[must_use]
    pub fn grain_id(&self, index: usize) -> GrainId {
        self.grain_ids[index]
    }

    /// Sets the primary grain identity of a cell.
    #[inline]
    pub fn set_grain_id(&mut self, index: usize, id: GrainId) {
        self.grain_ids[index] = id;
    }

    /// All primary grain identities.
    #[must_use]
    pub fn grain_ids(&self) -> &[GrainId] {
        &self.grain_ids
    }

    /// Phase of a cell.
    #[inline]
    #[must_use]
    pub fn phase(&self, index: usize) -> u8 {
        self.phases[index]
    }

    /// Sets the phase of a cell.
    #[inline]
    pub fn set_phase(&mut self, index: usize, phase: u8) {
        self.phases[index] = phase;
    }

    /// All phases.
    #[must_use]
    pub fn phases(&self) -> &[u8] {
        &self.phases
    }

    /// Secondary (precipitate) identity of a cell.
    #[inline]
    #[must_use]
    pub fn precipitate_id(&self, index: usize) -> GrainId {
        self.precipitate_ids[index]
    }

    /// Sets the secondary (precipitate) identity of a cell.
    #[inline]
    pub fn set_precipitate_id(&mut self, index: usize, id: GrainId) {
        self.precipitate_ids[index] = id;
    }

    /// All secondary identities.
    #[must_use]
    pub fn precipitate_ids(&self) -> &[GrainId] {
        &self.precipitate_ids
    }

    /// Resets every primary identity to unassigned.
    pub fn clear_grain_ids(&mut self) {
        self.grain_ids.fill(GrainId::NONE);
    }

    /// Resets every secondary identity to unassigned.
    pub fn clear_precipitate_ids(&mut self) {
        self.precipitate_ids.fill(GrainId::NONE);
    }

    /// Number of cells whose primary identity is unassigned.
    #[must_use]
    pub fn count_unassigned(&self) -> usize {
        self.grain_ids.iter().filter(|id| id.is_none()).count()
    }

    /// Number of cells owned by each primary identity, indexed by identity.
    #[must_use]
    pub fn voxel_counts(&self, id_bound: usize) -> Vec<usize> {
        let bound = self
            .grain_ids
            .iter()
            .map(|id| id.index() + 1)
            .max()
            .unwrap_or(0)
            .max(id_bound);
        let mut counts = vec![0; bound];
        for id in &self.grain_ids {
            counts[id.index()] += 1;
        }
        counts
    }
}
