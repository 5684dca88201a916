//! End-to-end synthesis.

mod cancel;
mod diagnostics;

pub use cancel::CancelToken;
pub use diagnostics::{Diagnostics, Metric, Shortfall};

use tracing::{info, warn};

use crate::config::{FillTarget, SynthesisConfig};
use crate::crystal::{CrystalStructure, EulerBinning, MatchCrystallography};
use crate::error::Result;
use crate::grain::{Grain, GrainId, GrainStore};
use crate::neighbors::{FindNeighbors, NeighborGraph};
use crate::packing::{GenerateGrains, PackingEngine, UniformPlacement};
use crate::precipitate::InsertPrecipitates;
use crate::random::SynthRng;
use crate::stats::{validate_provider, DistributionBins, PrecipitateStatistics, StatisticsProvider};
use crate::voxel::{AssignVoxels, FillGaps, VoxelGrid};

/// Relative miss of the precipitate volume fraction that is still accepted.
const PRECIPITATE_FRACTION_TOLERANCE: f64 = 0.25;

/// Output of a synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Labeled voxel grid: primary and precipitate identities plus phases.
    pub grid: VoxelGrid,
    /// Final grains, ascending by identity.
    pub grains: Vec<Grain>,
    /// Final precipitates, ascending by identity.
    pub precipitates: Vec<Grain>,
    pub crystal_structure: CrystalStructure,
    pub diagnostics: Diagnostics,
}

impl SynthesisResult {
    /// Grain with the given identity.
    #[must_use]
    pub fn grain(&self, id: GrainId) -> Option<&Grain> {
        lookup(&self.grains, id)
    }

    /// Precipitate with the given identity.
    #[must_use]
    pub fn precipitate(&self, id: GrainId) -> Option<&Grain> {
        lookup(&self.precipitates, id)
    }

    /// Bunge Euler angles of every grain.
    #[must_use]
    pub fn euler_table(&self) -> Vec<(GrainId, [f64; 3])> {
        self.grains
            .iter()
            .map(|g| (g.id, g.orientation.euler()))
            .collect()
    }

    /// Euler angles per voxel; precipitate voxels carry the precipitate's
    /// orientation.
    #[must_use]
    pub fn voxel_eulers(&self) -> Vec<[f64; 3]> {
        (0..self.grid.len())
            .map(|index| {
                let precipitate = self.grid.precipitate_id(index);
                let owner = if precipitate.is_none() {
                    self.grain(self.grid.grain_id(index))
                } else {
                    self.precipitate(precipitate)
                };
                owner.map_or([0.0; 3], |g| g.orientation.euler())
            })
            .collect()
    }
}

fn lookup(grains: &[Grain], id: GrainId) -> Option<&Grain> {
    grains
        .binary_search_by_key(&id, |g| g.id)
        .ok()
        .map(|i| &grains[i])
}

/// Runs the whole synthesis: sample, pack, rasterize, fill gaps, build the
/// neighbor graph, assign orientations and insert precipitates.
///
/// Statistics and configuration are validated before any sampling. Missed
/// targets (under-filled sampling, unmet fill, exhausted precipitate
/// centers, cancellation) do not fail the run; they are listed in
/// [`Diagnostics::shortfalls`].
pub struct Synthesize {
    config: SynthesisConfig,
    cancel: CancelToken,
}

impl Synthesize {
    /// Creates a new `Synthesize` operation.
    #[must_use]
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the cancel token polled by the optimization loops.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes the run.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`](crate::error::DomainError) for invalid
    /// statistics or configuration and
    /// [`GeometryError`](crate::error::GeometryError) if no grain
    /// survives to fill the grid.
    pub fn execute<P: StatisticsProvider + ?Sized>(&self, provider: &P) -> Result<SynthesisResult> {
        let config = &self.config;
        config.validate()?;
        validate_provider(provider)?;

        let seed = config.seed.resolve();
        let mut root = SynthRng::new(seed);
        let mut packing_rng = root.fork();
        let mut crystal_rng = root.fork();
        let mut precipitate_rng = root.fork();
        let parallel = config.parallel;
        let mut diagnostics = Diagnostics {
            seed,
            ..Diagnostics::default()
        };

        let mut grid = VoxelGrid::new(config.domain.dims, config.domain.spacing)?;
        let domain_volume = grid.domain_volume();
        let primary = provider.primary_phase();
        let size_target = primary.size.target_histogram()?;
        info!(
            seed,
            dims = ?config.domain.dims,
            domain_volume,
            "starting synthesis"
        );

        let mut store = self.pack(provider, &mut grid, &size_target, &mut packing_rng, &mut diagnostics)?;
        store.purge_inactive();
        diagnostics.raster = AssignVoxels::new()
            .with_parallel(parallel)
            .execute(&store, &mut grid)?;
        // With nothing claimed, gap filling seeds from the centroids of the
        // grains that would otherwise be dropped here.
        if diagnostics.raster.assigned > 0 {
            for id in &diagnostics.raster.vanished {
                store.set_active(*id, false);
            }
            store.purge_inactive();
        }
        diagnostics.gap_fill = FillGaps::new().with_parallel(parallel).execute(&store, &mut grid)?;
        let owned = grid.voxel_counts(store.id_bound());
        let unowned: Vec<GrainId> = store
            .active()
            .filter(|g| owned[g.id.index()] == 0)
            .map(|g| g.id)
            .collect();
        for id in unowned {
            store.set_active(id, false);
        }
        store.purge_inactive();
        let graph = FindNeighbors::new()
            .with_parallel(parallel)
            .execute(&grid, &mut store)?;

        let structure = provider.crystal_structure();
        let counts = grid.voxel_counts(store.id_bound());
        diagnostics.crystallography =
            MatchCrystallography::new(structure, provider.odf(), provider.mdf())
                .with_config(config.crystallography.clone())
                .with_cancel(self.cancel.clone())
                .execute(&mut store, &graph, &counts, &mut crystal_rng)?;

        measure(&mut diagnostics, &store, &graph, &counts, &size_target, provider)?;

        let precipitates = match provider.precipitates() {
            Some(statistics) => self.insert_precipitates(
                statistics,
                &mut grid,
                structure,
                provider.odf(),
                &mut precipitate_rng,
                &mut diagnostics,
            )?,
            None => Vec::new(),
        };

        diagnostics.cancelled = self.cancel.is_cancelled();
        if diagnostics.cancelled {
            diagnostics.record(Metric::Cancelled, 1.0, 0.0);
        }
        for shortfall in &diagnostics.shortfalls {
            warn!(%shortfall, "target missed");
        }

        let grains: Vec<Grain> = store.active().cloned().collect();
        info!(
            grains = grains.len(),
            precipitates = precipitates.len(),
            size_error = diagnostics.size_error,
            neighborhood_error = diagnostics.neighborhood_error,
            complete = diagnostics.is_complete(),
            "synthesis finished"
        );
        Ok(SynthesisResult {
            grid,
            grains,
            precipitates,
            crystal_structure: structure,
            diagnostics,
        })
    }

    /// Samples and packs the primary grains, running the feedback rounds.
    fn pack<P: StatisticsProvider + ?Sized>(
        &self,
        provider: &P,
        grid: &mut VoxelGrid,
        size_target: &[f64],
        packing_rng: &mut SynthRng,
        diagnostics: &mut Diagnostics,
    ) -> Result<GrainStore> {
        let config = &self.config;
        let domain_volume = grid.domain_volume();
        let primary = provider.primary_phase();
        let mut generate = GenerateGrains::new(primary, config.packing.max_candidates)?;
        let sampled = match config.target {
            FillTarget::DomainVolume => {
                let sampled = generate.execute(domain_volume, packing_rng)?;
                if sampled.under_filled {
                    diagnostics.record(Metric::SampledVolume, domain_volume, sampled.volume);
                }
                sampled
            }
            FillTarget::GrainCount(count) => {
                let sampled = generate.execute_count(count, packing_rng)?;
                if sampled.under_filled {
                    #[allow(clippy::cast_precision_loss)]
                    let (target, achieved) = (count as f64, sampled.grains.len() as f64);
                    diagnostics.record(Metric::GrainCount, target, achieved);
                }
                sampled
            }
        };
        diagnostics.sampled = sampled.grains.len();

        let parallel = config.parallel;
        let mut engine = PackingEngine::new(
            config.packing.clone(),
            domain_volume,
            size_target,
            provider.neighbor_distribution(),
        )?
        .with_parallel(parallel);
        let mut placement = UniformPlacement::for_grid(grid);
        engine.pack(sampled.grains, &mut placement, packing_rng)?;
        diagnostics.packing.push(engine.optimize(
            &mut generate,
            &mut placement,
            packing_rng,
            &self.cancel,
        )?);

        for round in 0..config.packing.feedback_rounds {
            if self.cancel.is_cancelled() || engine.store().active_count() == 0 {
                break;
            }
            let mut trial = engine.store().clone();
            AssignVoxels::new()
                .with_parallel(parallel)
                .execute(&trial, grid)?;
            FillGaps::new().with_parallel(parallel).execute(&trial, grid)?;
            let graph = FindNeighbors::new()
                .with_parallel(parallel)
                .execute(grid, &mut trial)?;
            let measured = graph.mean_neighbor_count(&trial.active_ids());
            let factor = engine.calibrate_contact_factor(measured);
            info!(round, measured, contact_factor = factor, "feedback round");
            diagnostics.packing.push(engine.optimize(
                &mut generate,
                &mut placement,
                packing_rng,
                &self.cancel,
            )?);
        }
        diagnostics.contact_factor = engine.contact_factor();
        if let Some(last) = diagnostics.packing.last() {
            if last.errors_after.fill > config.packing.fill_tolerance {
                let achieved = last.fill_fraction;
                diagnostics.record(Metric::FillFraction, 1.0, achieved);
            }
        }

        Ok(engine.into_store())
    }

    fn insert_precipitates(
        &self,
        statistics: &PrecipitateStatistics,
        grid: &mut VoxelGrid,
        structure: CrystalStructure,
        odf: &[f64],
        rng: &mut SynthRng,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<Grain>> {
        let (placed, report) = InsertPrecipitates::new(statistics)
            .with_config(self.config.precipitates.clone())
            .with_parallel(self.config.parallel)
            .with_cancel(self.cancel.clone())
            .execute(grid, structure, odf, rng)?;
        if report.seeds_exhausted {
            diagnostics.record(
                Metric::PrecipitateSeeds,
                report.target_fraction,
                report.achieved_fraction,
            );
        }
        let miss = (report.achieved_fraction - report.target_fraction).abs();
        if miss > PRECIPITATE_FRACTION_TOLERANCE * report.target_fraction {
            diagnostics.record(
                Metric::PrecipitateFraction,
                report.target_fraction,
                report.achieved_fraction,
            );
        }
        let precipitates = placed.active().cloned().collect();
        diagnostics.precipitates = Some(report);
        Ok(precipitates)
    }
}

/// Measures the final size and neighbor-count histograms.
/// Final histogram errors of the primary grains.
///
/// Neighbor counts are taken over interior grains only, since grains cut by
/// the domain boundary lose neighbors; with no interior grain every grain
/// counts. ODF weights are voxel counts scaled to sum to the grain count.
fn measure<P: StatisticsProvider + ?Sized>(
    diagnostics: &mut Diagnostics,
    store: &GrainStore,
    graph: &NeighborGraph,
    voxel_counts: &[usize],
    size_target: &[f64],
    provider: &P,
) -> Result<()> {
    let mut sizes = DistributionBins::new("size distribution", size_target)?;
    let mut neighbors =
        DistributionBins::new("neighbor distribution", provider.neighbor_distribution())?;
    let mut odf = DistributionBins::new("odf", provider.odf())?;
    let binning = EulerBinning::from_histogram_len(
        "odf",
        provider.odf().len(),
        provider.crystal_structure().euler_ranges(),
    )?;

    let interior: Vec<GrainId> = store
        .active()
        .filter(|g| !graph.is_surface_grain(g.id))
        .map(|g| g.id)
        .collect();
    let counted: Vec<GrainId> = if interior.is_empty() {
        store.active().map(|g| g.id).collect()
    } else {
        interior
    };
    for &id in &counted {
        neighbors.add(graph.neighbor_count(id).min(neighbors.len() - 1), 1.0);
    }

    #[allow(clippy::cast_precision_loss)]
    let owned: f64 = store.active().map(|g| voxel_counts[g.id.index()] as f64).sum();
    #[allow(clippy::cast_precision_loss)]
    let scale = if owned > 0.0 { store.active_count() as f64 / owned } else { 0.0 };
    for grain in store.active() {
        sizes.add(grain.size_bin.min(sizes.len() - 1), 1.0);
        #[allow(clippy::cast_precision_loss)]
        let weight = voxel_counts[grain.id.index()] as f64 * scale;
        odf.add(binning.bin_of(&grain.orientation), weight);
    }

    diagnostics.size_error = sizes.error();
    diagnostics.size_chi_squared = sizes.chi_squared();
    diagnostics.neighborhood_error = neighbors.error();
    diagnostics.neighborhood_chi_squared = neighbors.chi_squared();
    diagnostics.measured_neighborhoods = counted.len();
    diagnostics.odf_error = odf.error();
    diagnostics.odf_chi_squared = odf.chi_squared();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Seed;
    use crate::error::SynthError;
    use crate::stats::MicrostructureStatistics;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn statistics() -> MicrostructureStatistics {
        MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 1.8, 0.15)
    }

    fn config() -> SynthesisConfig {
        SynthesisConfig::quick()
            .with_domain([24, 24, 24], [1.0; 3])
            .with_seed(Seed::Fixed(2024))
    }

    #[test]
    fn every_voxel_ends_up_owned() {
        init_tracing();
        let result = Synthesize::new(config()).execute(&statistics()).unwrap();
        assert_eq!(result.grid.count_unassigned(), 0);
        assert!(result.grid.grain_ids().iter().all(|id| !id.is_none()));
        assert!(!result.grains.is_empty());
        for id in result.grid.grain_ids() {
            assert!(result.grain(*id).is_some(), "voxel owned by unknown grain {id}");
        }
        assert!(result.grid.phases().iter().all(|&p| p == 1));
    }

    #[test]
    fn same_seed_same_structure() {
        let run = || {
            Synthesize::new(config().with_parallel(false))
                .execute(&statistics())
                .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.grid.grain_ids(), b.grid.grain_ids());
        assert_eq!(a.euler_table(), b.euler_table());
        let centroids = |r: &SynthesisResult| r.grains.iter().map(|g| g.centroid).collect::<Vec<_>>();
        assert_eq!(centroids(&a), centroids(&b));
    }

    #[test]
    fn parallel_matches_sequential() {
        let stats = statistics();
        let sequential = Synthesize::new(config().with_parallel(false))
            .execute(&stats)
            .unwrap();
        let parallel = Synthesize::new(config().with_parallel(true))
            .execute(&stats)
            .unwrap();
        assert_eq!(sequential.grid.grain_ids(), parallel.grid.grain_ids());
        assert_eq!(sequential.euler_table(), parallel.euler_table());
    }

    #[test]
    fn accepted_moves_never_increase_error() {
        let result = Synthesize::new(config()).execute(&statistics()).unwrap();
        let diagnostics = &result.diagnostics;
        assert_eq!(
            diagnostics.packing.len(),
            1 + config().packing.feedback_rounds
        );
        for report in &diagnostics.packing {
            assert!(report.error_trace.windows(2).all(|w| w[1] <= w[0]));
        }
        let trace = &diagnostics.crystallography.error_trace;
        assert!(trace.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn voxel_orientations_follow_owners() {
        let result = Synthesize::new(config()).execute(&statistics()).unwrap();
        let eulers = result.voxel_eulers();
        assert_eq!(eulers.len(), result.grid.len());
        let index = result.grid.len() / 2;
        let owner = result.grain(result.grid.grain_id(index)).unwrap();
        assert_eq!(eulers[index], owner.orientation.euler());
    }

    #[test]
    fn precipitates_stay_in_host_structure() {
        let stats = statistics().with_precipitates(0.6, 0.1, 0.05);
        let result = Synthesize::new(config()).execute(&stats).unwrap();
        assert!(!result.precipitates.is_empty());
        let mut precipitate_voxels = 0;
        for index in 0..result.grid.len() {
            let id = result.grid.precipitate_id(index);
            if id.is_none() {
                continue;
            }
            precipitate_voxels += 1;
            assert!(!result.grid.grain_id(index).is_none());
            assert_eq!(result.grid.phase(index), 2);
            assert!(result.precipitate(id).is_some());
        }
        assert!(precipitate_voxels > 0);
        assert!(result.diagnostics.precipitates.is_some());
    }

    #[test]
    fn cancelled_run_returns_partial_structure() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Synthesize::new(config())
            .with_cancel(cancel)
            .execute(&statistics())
            .unwrap();
        assert!(result.diagnostics.cancelled);
        assert!(result.diagnostics.shortfall(Metric::Cancelled).is_some());
        assert_eq!(result.grid.count_unassigned(), 0);
        assert_eq!(result.diagnostics.crystallography.iterations, 0);
    }

    #[test]
    fn invalid_statistics_fail_before_sampling() {
        let mut stats = statistics();
        stats.primary.size.min_diameter = -2.0;
        let err = Synthesize::new(config()).execute(&stats).unwrap_err();
        assert!(matches!(err, SynthError::Domain(_)));

        let mut stats = statistics();
        stats.odf = vec![1.0; 7];
        let err = Synthesize::new(config()).execute(&stats).unwrap_err();
        assert!(matches!(err, SynthError::Domain(_)));
    }

    #[test]
    fn candidate_cap_is_reported_not_fatal() {
        let mut packing = config().packing;
        packing.max_candidates = 4;
        let result = Synthesize::new(config().with_packing(packing))
            .execute(&statistics())
            .unwrap();
        assert!(result.diagnostics.shortfall(Metric::SampledVolume).is_some());
        assert!(result.diagnostics.shortfall(Metric::FillFraction).is_some());
        assert_eq!(result.grid.count_unassigned(), 0);
    }

    #[test]
    fn size_histogram_tracks_target() {
        init_tracing();
        let stats = MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 2.0, 0.2);
        let config = SynthesisConfig::quick()
            .with_domain([40, 40, 40], [1.0; 3])
            .with_target(FillTarget::GrainCount(300))
            .with_seed(Seed::Fixed(99));
        let result = Synthesize::new(config).execute(&stats).unwrap();
        let diagnostics = &result.diagnostics;
        assert!(result.grains.len() > 200);
        // Ten size bins; generous bound on the Pearson statistic.
        assert!(
            diagnostics.size_chi_squared < 60.0,
            "chi-squared {}",
            diagnostics.size_chi_squared
        );
        assert!(diagnostics.size_error < 0.05);
        assert!(diagnostics.measured_neighborhoods > 0);
        assert!(diagnostics.measured_neighborhoods <= result.grains.len());
        assert!(diagnostics.odf_chi_squared.is_finite());
    }

    #[test]
    fn sub_voxel_grains_still_fill_the_grid() {
        init_tracing();
        let stats = MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 0.5_f64.ln(), 0.05);
        for seed in 0..20 {
            let config = SynthesisConfig::quick()
                .with_domain([10, 10, 10], [1.0; 3])
                .with_target(FillTarget::GrainCount(3))
                .with_seed(Seed::Fixed(seed));
            let result = Synthesize::new(config).execute(&stats).unwrap();
            assert_eq!(result.grid.count_unassigned(), 0, "seed {seed}");
            assert!(!result.grains.is_empty(), "seed {seed}");
            for id in result.grid.grain_ids() {
                assert!(result.grain(*id).is_some(), "seed {seed}: unknown grain {id}");
            }
            let bound = result.grains.iter().map(|g| g.id.index() + 1).max().unwrap_or(0);
            let counts = result.grid.voxel_counts(bound);
            for grain in &result.grains {
                assert!(counts[grain.id.index()] > 0, "seed {seed}: {} owns nothing", grain.id);
            }
        }
    }

    /// Pearson statistic per degree of freedom.
    fn reduced(chi_squared: f64, target: &[f64]) -> f64 {
        let bins = target.iter().filter(|&&t| t > 0.0).count();
        #[allow(clippy::cast_precision_loss)]
        let dof = bins.saturating_sub(1).max(1) as f64;
        chi_squared / dof
    }

    #[test]
    #[ignore = "release-sized run; use `cargo test --release -- --ignored`"]
    fn large_run_converges_to_target_histograms() {
        init_tracing();
        let stats = MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 1.5, 0.15);
        let config = SynthesisConfig::default()
            .with_domain([72, 72, 72], [1.0; 3])
            .with_seed(Seed::Fixed(7));
        let result = Synthesize::new(config).execute(&stats).unwrap();
        let diagnostics = &result.diagnostics;
        assert!(result.grains.len() >= 5_000, "{} grains", result.grains.len());
        assert!(diagnostics.measured_neighborhoods < result.grains.len());

        let size_target = stats.primary.size.target_histogram().unwrap();
        let size = reduced(diagnostics.size_chi_squared, &size_target);
        let odf = reduced(diagnostics.odf_chi_squared, &stats.odf);
        let neighbors = reduced(diagnostics.neighborhood_chi_squared, &stats.neighbor_distribution);
        // Sizes are drawn from the target and orientations are optimized
        // directly, so both sit near one per degree of freedom. Neighbor
        // counts only follow the target through the proximity proxy, which is
        // calibrated on the mean; the measured spread stays narrower than the
        // target's.
        assert!(size < 3.0, "size chi-squared per bin {size}");
        assert!(odf < 3.0, "odf chi-squared per bin {odf}");
        assert!(neighbors < 50.0, "neighbor chi-squared per bin {neighbors}");

        // Surface grains pull the mean over all grains below the target's.
        #[allow(clippy::cast_precision_loss)]
        let mean = result.grains.iter().map(|g| g.neighbor_count() as f64).sum::<f64>()
            / result.grains.len() as f64;
        assert!((mean - 13.0).abs() < 4.0, "mean neighbor count {mean}");
    }
}
