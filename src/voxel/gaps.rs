use rayon::prelude::*;
use tracing::debug;

use crate::error::{GeometryError, Result};
use crate::grain::{GrainId, GrainStore};

use super::VoxelGrid;

/// Summary of a gap-filling run.
#[derive(Debug, Clone, Default)]
pub struct GapFillReport {
    /// Cells that were unassigned before filling.
    pub filled: usize,
    /// Number of snapshot passes performed.
    pub passes: usize,
    /// Cells seeded from grain centroids because nothing was claimed.
    pub seeded: usize,
}

/// Assigns every unassigned cell to the majority identity of its occupied
/// face neighbors.
///
/// Each pass decides all pending cells against the grid as it stood at the
/// start of the pass, then applies the decisions. Cells with no occupied
/// neighbor wait for a later pass. Majority ties go to the lowest identity.
pub struct FillGaps {
    parallel: bool,
}

impl Default for FillGaps {
    fn default() -> Self {
        Self::new()
    }
}

impl FillGaps {
    /// Creates a new `FillGaps` operation.
    #[must_use]
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Enables or disables parallel evaluation of each pass.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Executes gap filling until no cell is unassigned.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::NoActiveGrains`] if unassigned cells remain
    /// and `store` holds no active grain.
    pub fn execute(&self, store: &GrainStore, grid: &mut VoxelGrid) -> Result<GapFillReport> {
        let mut pending: Vec<usize> = (0..grid.len())
            .filter(|&i| grid.grain_id(i).is_none())
            .collect();
        let mut report = GapFillReport {
            filled: pending.len(),
            ..GapFillReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        if store.active_count() == 0 {
            return Err(GeometryError::NoActiveGrains {
                unassigned: pending.len(),
            }
            .into());
        }

        if pending.len() == grid.len() {
            report.seeded = seed_centroids(store, grid);
            pending.retain(|&i| grid.grain_id(i).is_none());
        }

        while !pending.is_empty() {
            report.passes += 1;
            let decisions: Vec<Option<GrainId>> = if self.parallel {
                pending.par_iter().map(|&i| majority_neighbor(grid, i)).collect()
            } else {
                pending.iter().map(|&i| majority_neighbor(grid, i)).collect()
            };

            let before = pending.len();
            let mut still_pending = Vec::with_capacity(before);
            for (&index, decision) in pending.iter().zip(decisions) {
                match decision {
                    Some(id) => grid.set_grain_id(index, id),
                    None => still_pending.push(index),
                }
            }
            pending = still_pending;

            // Unreachable for a connected grid with at least one owner.
            if pending.len() == before {
                return Err(GeometryError::NoActiveGrains {
                    unassigned: pending.len(),
                }
                .into());
            }
        }

        for index in 0..grid.len() {
            if let Some(grain) = store.get(grid.grain_id(index)) {
                grid.set_phase(index, grain.phase);
            }
        }

        debug!(
            filled = report.filled,
            passes = report.passes,
            seeded = report.seeded,
            "filled gaps"
        );
        Ok(report)
    }
}

/// Seeds each active grain's centroid cell, lowest identity first.
fn seed_centroids(store: &GrainStore, grid: &mut VoxelGrid) -> usize {
    let mut seeded = 0;
    for grain in store.active() {
        if let Some(index) = grid.index_of_point(&grain.centroid) {
            if grid.grain_id(index).is_none() {
                grid.set_grain_id(index, grain.id);
                seeded += 1;
            }
        }
    }
    seeded
}

/// Most frequent non-zero identity among the face neighbors of a cell.
fn majority_neighbor(grid: &VoxelGrid, index: usize) -> Option<GrainId> {
    let mut tally: [(GrainId, u8); 6] = [(GrainId::NONE, 0); 6];
    let mut used = 0;
    for neighbor in grid.face_neighbors(index).into_iter().flatten() {
        let id = grid.grain_id(neighbor);
        if id.is_none() {
            continue;
        }
        match tally[..used].iter_mut().find(|(t, _)| *t == id) {
            Some(entry) => entry.1 += 1,
            None => {
                tally[used] = (id, 1);
                used += 1;
            }
        }
    }
    tally[..used]
        .iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(id, _)| *id)
}
