//! Grain adjacency derived from the labeled voxel grid.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::grain::{GrainId, GrainStore};
use crate::voxel::VoxelGrid;

/// Undirected grain adjacency with shared-boundary face counts.
#[derive(Debug, Clone, Default)]
pub struct NeighborGraph {
    shared_faces: BTreeMap<(GrainId, GrainId), usize>,
    adjacency: Vec<Vec<GrainId>>,
    surface: Vec<bool>,
}

impl NeighborGraph {
    fn key(a: GrainId, b: GrainId) -> (GrainId, GrainId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Neighbors of a grain, ascending.
    #[must_use]
    pub fn neighbors(&self, id: GrainId) -> &[GrainId] {
        self.adjacency.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct neighbors of a grain.
    #[must_use]
    pub fn neighbor_count(&self, id: GrainId) -> usize {
        self.neighbors(id).len()
    }

    /// Number of voxel faces shared by two grains (zero if not adjacent).
    #[must_use]
    pub fn shared_faces(&self, a: GrainId, b: GrainId) -> usize {
        self.shared_faces.get(&Self::key(a, b)).copied().unwrap_or(0)
    }

    /// Number of adjacent grain pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.shared_faces.len()
    }

    /// Adjacent pairs `(low, high)` with their shared face counts, in
    /// ascending order.
    pub fn pairs(&self) -> impl Iterator<Item = (GrainId, GrainId, usize)> + '_ {
        self.shared_faces.iter().map(|(&(a, b), &n)| (a, b, n))
    }

    /// Returns `true` if the grain touches the outer face of the domain.
    #[must_use]
    pub fn is_surface_grain(&self, id: GrainId) -> bool {
        self.surface.get(id.index()).copied().unwrap_or(false)
    }

    /// Histogram of neighbor counts over `ids`; counts at or beyond the
    /// last bin are accumulated into it.
    #[must_use]
    pub fn neighbor_histogram(&self, ids: &[GrainId], bins: usize) -> Vec<usize> {
        let mut histogram = vec![0; bins];
        if bins == 0 {
            return histogram;
        }
        for &id in ids {
            histogram[self.neighbor_count(id).min(bins - 1)] += 1;
        }
        histogram
    }

    /// Mean neighbor count over `ids`.
    #[must_use]
    pub fn mean_neighbor_count(&self, ids: &[GrainId]) -> f64 {
        if ids.is_empty() {
            return 0.0;
        }
        let sum: usize = ids.iter().map(|&id| self.neighbor_count(id)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f64 / ids.len() as f64;
        mean
    }
}

/// Builds the [`NeighborGraph`] of a labeled grid and writes each grain's
/// neighbor list back into the store.
pub struct FindNeighbors {
    parallel: bool,
}

impl Default for FindNeighbors {
    fn default() -> Self {
        Self::new()
    }
}

impl FindNeighbors {
    /// Creates a new `FindNeighbors` operation.
    #[must_use]
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Enables or disables parallel slab scanning.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Executes the scan.
    ///
    /// Each voxel is compared with its `+x`, `+y` and `+z` neighbors so
    /// every shared face is visited once. Pairs involving an unassigned
    /// cell are ignored.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature matches the other stages.
    pub fn execute(&self, grid: &VoxelGrid, store: &mut GrainStore) -> Result<NeighborGraph> {
        let [_, _, nz] = grid.dims();
        let slabs: Vec<HashMap<(GrainId, GrainId), usize>> = if self.parallel {
            (0..nz).into_par_iter().map(|k| scan_slab(grid, k)).collect()
        } else {
            (0..nz).map(|k| scan_slab(grid, k)).collect()
        };

        let mut shared_faces = BTreeMap::new();
        for slab in slabs {
            for (key, n) in slab {
                *shared_faces.entry(key).or_insert(0) += n;
            }
        }

        let bound = store.id_bound().max(
            grid.grain_ids()
                .iter()
                .map(|id| id.index() + 1)
                .max()
                .unwrap_or(0),
        );
        let mut adjacency = vec![Vec::new(); bound];
        for &(a, b) in shared_faces.keys() {
            adjacency[a.index()].push(b);
            adjacency[b.index()].push(a);
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }

        let mut surface = vec![false; bound];
        for index in 0..grid.len() {
            if grid.is_domain_surface(index) {
                surface[grid.grain_id(index).index()] = true;
            }
        }

        for grain in store.active_mut() {
            grain.neighbors = adjacency[grain.id.index()].clone();
        }

        debug!(pairs = shared_faces.len(), "built neighbor graph");
        Ok(NeighborGraph {
            shared_faces,
            adjacency,
            surface,
        })
    }
}

fn scan_slab(grid: &VoxelGrid, k: usize) -> HashMap<(GrainId, GrainId), usize> {
    let [nx, ny, nz] = grid.dims();
    let mut faces = HashMap::new();
    let mut record = |a: GrainId, b: GrainId| {
        if a != b && !a.is_none() && !b.is_none() {
            *faces.entry(NeighborGraph::key(a, b)).or_insert(0) += 1;
        }
    };
    for j in 0..ny {
        for i in 0..nx {
            let index = grid.index(i, j, k);
            let id = grid.grain_id(index);
            if i + 1 < nx {
                record(id, grid.grain_id(index + 1));
            }
            if j + 1 < ny {
                record(id, grid.grain_id(index + nx));
            }
            if k + 1 < nz {
                record(id, grid.grain_id(index + nx * ny));
            }
        }
    }
    faces
}
