//! Secondary-phase particles inside the host grain structure.

use tracing::{info, warn};

use crate::config::{PlacementPolicy, PrecipitateConfig};
use crate::crystal::{CrystalStructure, EulerBinning};
use crate::error::Result;
use crate::grain::{GrainId, GrainStore};
use crate::packing::{GenerateGrains, PackingEngine, SeedPlacement};
use crate::pipeline::CancelToken;
use crate::random::SynthRng;
use crate::stats::{DistributionBins, PrecipitateStatistics};
use crate::voxel::{grain_claims, VoxelGrid};

/// Outcome of [`InsertPrecipitates::execute`].
#[derive(Debug, Clone, Default)]
pub struct PrecipitateReport {
    /// Requested fraction of the host volume.
    pub target_fraction: f64,
    /// Precipitate voxels over host voxels.
    pub achieved_fraction: f64,
    /// Precipitates placed.
    pub placed: usize,
    /// Precipitates that ended up owning no voxel.
    pub vanished: usize,
    /// Candidate centers ran out before every precipitate was placed.
    pub seeds_exhausted: bool,
    /// The candidate cap was reached before the volume target.
    pub under_filled: bool,
}

/// Packs and rasterizes a precipitate population.
///
/// Centers are drawn without replacement from host voxels (every voxel
/// owned by a grain, or only grain-boundary voxels under
/// [`PlacementPolicy::Boundary`]). Precipitates only claim voxels that
/// already belong to a host grain and write into the secondary identity
/// field and the phase field, never the primary identity.
pub struct InsertPrecipitates<'a> {
    statistics: &'a PrecipitateStatistics,
    config: PrecipitateConfig,
    parallel: bool,
    cancel: CancelToken,
}

impl<'a> InsertPrecipitates<'a> {
    /// Creates a new `InsertPrecipitates` operation.
    #[must_use]
    pub fn new(statistics: &'a PrecipitateStatistics) -> Self {
        Self {
            statistics,
            config: PrecipitateConfig::default(),
            parallel: true,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the placement and packing settings.
    #[must_use]
    pub fn with_config(mut self, config: PrecipitateConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables parallel evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the cancel token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes the insertion and returns the precipitate store.
    ///
    /// Orientations are drawn from `odf` binned for `structure`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`](crate::error::DomainError) for malformed
    /// statistics. Running out of centers or candidates is reported in the
    /// [`PrecipitateReport`] instead.
    pub fn execute(
        &self,
        grid: &mut VoxelGrid,
        structure: CrystalStructure,
        odf: &[f64],
        rng: &mut SynthRng,
    ) -> Result<(GrainStore, PrecipitateReport)> {
        let phase = &self.statistics.phase;
        let mut report = PrecipitateReport {
            target_fraction: self.statistics.volume_fraction,
            ..PrecipitateReport::default()
        };
        grid.clear_precipitate_ids();

        let host: Vec<usize> = (0..grid.len())
            .filter(|&i| !grid.grain_id(i).is_none())
            .collect();
        if host.is_empty() {
            warn!("no host voxels for precipitates");
            return Ok((GrainStore::new(), report));
        }
        #[allow(clippy::cast_precision_loss)]
        let host_volume = host.len() as f64 * grid.voxel_volume();
        let target_volume = self.statistics.volume_fraction * host_volume;

        let seeds: Vec<usize> = match self.config.placement {
            PlacementPolicy::Uniform => host.clone(),
            PlacementPolicy::Boundary => host
                .iter()
                .copied()
                .filter(|&i| grid.is_grain_boundary(i))
                .collect(),
        };

        let mut packing = self.config.packing.clone();
        packing.neighborhood_weight = 0.0;
        let fill_tolerance = packing.fill_tolerance;
        let mut generate = GenerateGrains::new(phase, packing.max_candidates)?;
        let sampled = generate.execute(target_volume, rng)?;
        report.under_filled = sampled.under_filled;
        let mut engine = PackingEngine::new(
            packing,
            target_volume,
            &phase.size.target_histogram()?,
            &[1.0],
        )?
        .with_parallel(self.parallel);

        let mut placement = SeedPlacement::new(grid, seeds);
        let outcome = engine.pack(sampled.grains, &mut placement, rng)?;
        report.seeds_exhausted = outcome.positions_exhausted;
        if !outcome.positions_exhausted {
            let packed = engine.optimize(&mut generate, &mut placement, rng, &self.cancel)?;
            report.seeds_exhausted = placement.remaining() == 0 && packed.errors_after.fill > fill_tolerance;
        }

        let mut store = engine.into_store();
        rasterize(&store, grid);
        let counts = precipitate_counts(grid, store.id_bound());
        let vanished: Vec<GrainId> = store
            .active()
            .filter(|p| counts[p.id.index()] == 0)
            .map(|p| p.id)
            .collect();
        report.vanished = vanished.len();
        for id in vanished {
            store.release(id);
        }
        store.purge_inactive();
        orient(&mut store, structure, odf, rng)?;

        report.placed = store.active_count();
        let claimed: usize = counts.iter().skip(1).sum();
        #[allow(clippy::cast_precision_loss)]
        let achieved = claimed as f64 / host.len() as f64;
        report.achieved_fraction = achieved;
        if report.seeds_exhausted {
            warn!(
                target = report.target_fraction,
                achieved = report.achieved_fraction,
                "precipitate centers exhausted"
            );
        }
        info!(
            placed = report.placed,
            target = report.target_fraction,
            achieved = report.achieved_fraction,
            "precipitates inserted"
        );
        Ok((store, report))
    }
}

/// Claims host voxels in ascending precipitate order; a tighter claim
/// takes a voxel from an earlier precipitate.
fn rasterize(store: &GrainStore, grid: &mut VoxelGrid) {
    let mut best = vec![f64::INFINITY; grid.len()];
    for precipitate in store.active() {
        for (index, distance) in grain_claims(precipitate, grid) {
            if grid.grain_id(index).is_none() || distance >= best[index] {
                continue;
            }
            best[index] = distance;
            grid.set_precipitate_id(index, precipitate.id);
            grid.set_phase(index, precipitate.phase);
        }
    }
}

fn orient(
    store: &mut GrainStore,
    structure: CrystalStructure,
    odf: &[f64],
    rng: &mut SynthRng,
) -> Result<()> {
    let binning = EulerBinning::from_histogram_len("odf", odf.len(), structure.euler_ranges())?;
    let bins = DistributionBins::new("odf", odf)?;
    for precipitate in store.active_mut() {
        precipitate.orientation = binning.sample_in_bin(bins.sample_bin(rng), rng);
    }
    Ok(())
}

fn precipitate_counts(grid: &VoxelGrid, id_bound: usize) -> Vec<usize> {
    let mut counts = vec![0; id_bound.max(1)];
    for id in grid.precipitate_ids() {
        if let Some(count) = counts.get_mut(id.index()) {
            *count += 1;
        }
    }
    counts
}
