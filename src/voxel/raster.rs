use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::grain::{Grain, GrainId, GrainStore};

use super::VoxelGrid;

/// Grains evaluated per parallel batch before committing.
const BATCH_SIZE: usize = 64;

/// Summary of a rasterization pass.
#[derive(Debug, Clone, Default)]
pub struct RasterReport {
    /// Cells owned by some grain after rasterization.
    pub assigned: usize,
    /// Cells still unassigned.
    pub unassigned: usize,
    /// Active grains that ended up owning no cell.
    pub vanished: Vec<GrainId>,
}

/// Converts active grain geometry into per-voxel grain identities.
///
/// Grains are evaluated in ascending identity order. A cell already held
/// by another grain changes hands only if the new grain's normalized
/// distance is strictly smaller, so equal claims stay with the lower
/// identity. Claims may be evaluated in parallel; they are always committed
/// sequentially in identity order.
pub struct AssignVoxels {
    parallel: bool,
}

impl Default for AssignVoxels {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignVoxels {
    /// Creates a new `AssignVoxels` operation.
    #[must_use]
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Enables or disables parallel claim evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Executes the rasterization, overwriting every primary identity in
    /// `grid`.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature matches the other stages.
    pub fn execute(&self, store: &GrainStore, grid: &mut VoxelGrid) -> Result<RasterReport> {
        grid.clear_grain_ids();
        let mut best = vec![f64::INFINITY; grid.len()];
        let grains: Vec<&Grain> = store.active().collect();

        for batch in grains.chunks(BATCH_SIZE) {
            let claims: Vec<Vec<(usize, f64)>> = if self.parallel {
                batch.par_iter().map(|g| grain_claims(g, grid)).collect()
            } else {
                batch.iter().map(|g| grain_claims(g, grid)).collect()
            };
            for (grain, cells) in batch.iter().zip(claims) {
                for (index, distance) in cells {
                    if distance < best[index] {
                        best[index] = distance;
                        grid.set_grain_id(index, grain.id);
                        grid.set_phase(index, grain.phase);
                    }
                }
            }
        }

        let counts = grid.voxel_counts(store.id_bound());
        let vanished: Vec<GrainId> = grains
            .iter()
            .filter(|g| counts[g.id.index()] == 0)
            .map(|g| g.id)
            .collect();
        let unassigned = counts[0];
        let report = RasterReport {
            assigned: grid.len() - unassigned,
            unassigned,
            vanished,
        };
        debug!(
            grains = grains.len(),
            assigned = report.assigned,
            unassigned = report.unassigned,
            vanished = report.vanished.len(),
            "rasterized grains"
        );
        Ok(report)
    }
}

/// Every cell whose center lies inside `grain`, with its normalized
/// distance from the grain center.
pub(crate) fn grain_claims(grain: &Grain, grid: &VoxelGrid) -> Vec<(usize, f64)> {
    let Some([ri, rj, rk]) = grid.cell_ranges(&grain.centroid, grain.bounding_radius()) else {
        return Vec::new();
    };
    let inverse_axes = grain.axes.rotation().inverse();
    let mut claims = Vec::new();
    for k in rk {
        for j in rj.clone() {
            for i in ri.clone() {
                let center = grid.center_of(i, j, k);
                let distance = grain.normalized_distance_with(&inverse_axes, &center);
                if distance <= 1.0 {
                    claims.push((grid.index(i, j, k), distance));
                }
            }
        }
    }
    claims
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crystal::Orientation;
    use crate::math::Point3;
    use crate::shape::ShapeClass;
    use std::f64::consts::PI;

    pub(crate) fn ellipsoid(center: Point3, radii: [f64; 3]) -> Grain {
        Grain {
            id: GrainId::NONE,
            centroid: center,
            equivalent_diameter: 2.0 * (radii[0] * radii[1] * radii[2]).cbrt(),
            radii,
            axes: Orientation::identity(),
            shape: ShapeClass::Ellipsoid,
            shape_factor: 1.0,
            orientation: Orientation::identity(),
            phase: 1,
            size_bin: 0,
            neighbors: Vec::new(),
            active: false,
        }
    }

    fn activate(store: &mut GrainStore, grain: Grain) -> GrainId {
        let id = store.insert(grain);
        store.set_active(id, true);
        id
    }

    #[test]
    fn single_ellipsoid_volume_matches_analytic() {
        let mut grid = VoxelGrid::new([100, 100, 100], [1.0; 3]).unwrap();
        let mut store = GrainStore::new();
        activate(&mut store, ellipsoid(Point3::new(50.0, 50.0, 50.0), [10.0, 5.0, 5.0]));

        let report = AssignVoxels::new().execute(&store, &mut grid).unwrap();
        let analytic = 4.0 / 3.0 * PI * 10.0 * 5.0 * 5.0;
        #[allow(clippy::cast_precision_loss)]
        let measured = report.assigned as f64;
        assert!(
            (measured - analytic).abs() / analytic < 0.02,
            "measured {measured}, analytic {analytic}"
        );
    }

    #[test]
    fn rotated_ellipsoid_keeps_volume() {
        let mut grid = VoxelGrid::new([60, 60, 60], [1.0; 3]).unwrap();
        let mut store = GrainStore::new();
        let mut g = ellipsoid(Point3::new(30.0, 30.0, 30.0), [12.0, 6.0, 4.0]);
        g.axes = Orientation::from_euler(0.4, 1.1, 2.0);
        activate(&mut store, g);
        let report = AssignVoxels::new().execute(&store, &mut grid).unwrap();
        let analytic = 4.0 / 3.0 * PI * 12.0 * 6.0 * 4.0;
        #[allow(clippy::cast_precision_loss)]
        let measured = report.assigned as f64;
        assert!((measured - analytic).abs() / analytic < 0.03);
    }

    #[test]
    fn tighter_claim_wins_conflict() {
        let mut grid = VoxelGrid::new([40, 20, 20], [1.0; 3]).unwrap();
        let mut store = GrainStore::new();
        let left = activate(&mut store, ellipsoid(Point3::new(15.0, 10.0, 10.0), [6.0; 3]));
        let right = activate(&mut store, ellipsoid(Point3::new(24.0, 10.0, 10.0), [6.0; 3]));
        AssignVoxels::new().execute(&store, &mut grid).unwrap();

        // Cells nearer to one center go to that grain.
        assert_eq!(grid.grain_id(grid.index(17, 10, 10)), left);
        assert_eq!(grid.grain_id(grid.index(21, 10, 10)), right);
    }

    #[test]
    fn equal_claims_stay_with_lower_identity() {
        let mut grid = VoxelGrid::new([20, 20, 20], [1.0; 3]).unwrap();
        let mut store = GrainStore::new();
        let first = activate(&mut store, ellipsoid(Point3::new(10.0, 10.0, 10.0), [4.0; 3]));
        let second = activate(&mut store, ellipsoid(Point3::new(10.0, 10.0, 10.0), [4.0; 3]));
        let report = AssignVoxels::new().execute(&store, &mut grid).unwrap();
        assert_eq!(grid.grain_id(grid.index(10, 10, 10)), first);
        assert_eq!(report.vanished, vec![second]);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut store = GrainStore::new();
        for n in 0..150u32 {
            let x = f64::from(n % 10) * 3.0 + 1.5;
            let y = f64::from((n / 10) % 5) * 4.0 + 2.0;
            let z = f64::from(n / 50) * 6.0 + 3.0;
            activate(&mut store, ellipsoid(Point3::new(x, y, z), [3.0, 2.5, 2.0]));
        }
        let mut a = VoxelGrid::new([30, 20, 18], [1.0; 3]).unwrap();
        let mut b = a.clone();
        AssignVoxels::new().with_parallel(true).execute(&store, &mut a).unwrap();
        AssignVoxels::new().with_parallel(false).execute(&store, &mut b).unwrap();
        assert_eq!(a.grain_ids(), b.grain_ids());
    }
}
