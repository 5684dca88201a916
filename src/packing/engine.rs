use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PackingConfig;
use crate::error::{GeometryError, Result, SynthError};
use crate::grain::{Grain, GrainId, GrainStore};
use crate::math::Point3;
use crate::pipeline::CancelToken;
use crate::random::SynthRng;
use crate::stats::DistributionBins;

use super::{GenerateGrains, Placement};

/// Error terms of the packing state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackingErrors {
    /// `|placed - domain| / domain`.
    pub fill: f64,
    /// Squared deviation of the size histogram.
    pub size: f64,
    /// Squared deviation of the neighbor-count histogram.
    pub neighborhood: f64,
    /// Weighted sum of the three terms.
    pub combined: f64,
}

/// Why an optimization run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Combined error fell to the tolerance.
    #[default]
    Converged,
    /// The iteration budget ran out.
    Budget,
    /// Every active grain was tried since the last accepted move.
    Stalled,
    /// The cancel token fired.
    Cancelled,
}

/// Outcome of [`PackingEngine::optimize`].
#[derive(Debug, Clone, Default)]
pub struct PackingReport {
    pub iterations: usize,
    pub added: usize,
    pub removed: usize,
    pub swapped: usize,
    pub errors_before: PackingErrors,
    pub errors_after: PackingErrors,
    pub stop: StopReason,
    /// The candidate generator ran dry during the run.
    pub candidate_cap_reached: bool,
    /// Placed volume over domain volume at the end of the run.
    pub fill_fraction: f64,
    /// Combined error at the start and after every accepted move.
    pub error_trace: Vec<f64>,
}

impl PackingReport {
    /// The search stalled with the fill target unmet and no candidates left.
    #[must_use]
    pub fn is_partially_filled(&self, fill_tolerance: f64) -> bool {
        self.stop == StopReason::Stalled
            && self.candidate_cap_reached
            && self.errors_after.fill > fill_tolerance
    }
}

/// Outcome of [`PackingEngine::pack`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOutcome {
    /// Candidates committed.
    pub placed: usize,
    /// The placement ran out of positions before every candidate was placed.
    pub positions_exhausted: bool,
}

enum Move {
    Add,
    Remove,
    Swap,
}

/// Greedy packing of grains into a domain.
///
/// The engine owns a [`GrainStore`] and keeps three running error terms:
/// fill, size histogram and neighbor-count histogram. Until rasterization
/// two grains count as neighbors when their centroids are closer than
/// `contact_factor * (r_i + r_j)`, with `r` the equivalent radius.
///
/// Every optimization move is evaluated without mutation first and
/// committed only if the combined error strictly decreases; rejected swaps
/// restore the previous state exactly.
#[derive(Debug, Clone)]
pub struct PackingEngine {
    config: PackingConfig,
    domain_volume: f64,
    parallel: bool,
    store: GrainStore,
    size_bins: DistributionBins,
    neighbor_bins: DistributionBins,
    placed_volume: f64,
    contact_factor: f64,
    proxy: Vec<usize>,
}

impl PackingEngine {
    /// Creates an empty engine.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::EmptyDomain`] for a non-positive domain
    /// volume and [`DomainError`](crate::error::DomainError) for malformed
    /// target histograms.
    pub fn new(
        config: PackingConfig,
        domain_volume: f64,
        size_target: &[f64],
        neighbor_target: &[f64],
    ) -> Result<Self> {
        if domain_volume.is_nan() || domain_volume <= 0.0 {
            return Err(GeometryError::EmptyDomain.into());
        }
        Ok(Self {
            contact_factor: config.contact_factor,
            config,
            domain_volume,
            parallel: true,
            store: GrainStore::new(),
            size_bins: DistributionBins::new("size distribution", size_target)?,
            neighbor_bins: DistributionBins::new("neighbor distribution", neighbor_target)?,
            placed_volume: 0.0,
            proxy: Vec::new(),
        })
    }

    /// Enables or disables parallel trial evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Grains held by the engine.
    #[must_use]
    pub fn store(&self) -> &GrainStore {
        &self.store
    }

    /// Consumes the engine, returning its grains.
    #[must_use]
    pub fn into_store(self) -> GrainStore {
        self.store
    }

    /// Domain volume the fill error is measured against.
    #[must_use]
    pub fn domain_volume(&self) -> f64 {
        self.domain_volume
    }

    /// Cumulative equivalent volume of active grains.
    #[must_use]
    pub fn placed_volume(&self) -> f64 {
        self.placed_volume
    }

    /// Current neighbor proximity factor.
    #[must_use]
    pub fn contact_factor(&self) -> f64 {
        self.contact_factor
    }

    /// Running size histogram.
    #[must_use]
    pub fn size_bins(&self) -> &DistributionBins {
        &self.size_bins
    }

    /// Running proximity neighbor-count histogram.
    #[must_use]
    pub fn neighbor_bins(&self) -> &DistributionBins {
        &self.neighbor_bins
    }

    /// Proximity neighbor count of an active grain.
    #[must_use]
    pub fn proxy_neighbor_count(&self, id: GrainId) -> usize {
        self.proxy.get(id.index()).copied().unwrap_or(0)
    }

    /// Mean proximity neighbor count over active grains.
    #[must_use]
    pub fn mean_proxy_neighbor_count(&self) -> f64 {
        let count = self.store.active_count();
        if count == 0 {
            return 0.0;
        }
        let sum: usize = self.store.active().map(|g| self.proxy[g.id.index()]).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f64 / count as f64;
        mean
    }

    /// Current error terms.
    #[must_use]
    pub fn errors(&self) -> PackingErrors {
        self.compose(
            self.fill_error(self.placed_volume),
            self.size_bins.error(),
            self.neighbor_bins.error(),
        )
    }

    fn compose(&self, fill: f64, size: f64, neighborhood: f64) -> PackingErrors {
        PackingErrors {
            fill,
            size,
            neighborhood,
            combined: self.config.fill_weight * fill
                + self.config.size_weight * size
                + self.config.neighborhood_weight * neighborhood,
        }
    }

    fn fill_error(&self, volume: f64) -> f64 {
        (volume - self.domain_volume).abs() / self.domain_volume
    }

    fn size_bin(&self, grain: &Grain) -> usize {
        grain.size_bin.min(self.size_bins.len() - 1)
    }

    fn neighbor_bin(&self, count: usize) -> usize {
        count.min(self.neighbor_bins.len() - 1)
    }

    /// Active grains in proximity contact with a sphere at `centroid`.
    fn contacts(&self, centroid: &Point3, radius: f64, exclude: GrainId) -> Vec<GrainId> {
        self.store
            .active()
            .filter(|g| g.id != exclude)
            .filter(|g| {
                (g.centroid - centroid).norm()
                    < self.contact_factor * (radius + g.equivalent_radius())
            })
            .map(|g| g.id)
            .collect()
    }

    /// Sum of pairwise penetration depths of a sphere at `centroid`.
    fn overlap(&self, centroid: &Point3, radius: f64) -> f64 {
        self.store
            .active()
            .map(|g| (radius + g.equivalent_radius() - (g.centroid - centroid).norm()).max(0.0))
            .sum()
    }

    /// Largest overlap of a sphere at `centroid` with any placed grain, as a
    /// fraction of the smaller diameter, capped at one.
    fn max_overlap_fraction(&self, centroid: &Point3, radius: f64) -> f64 {
        self.store
            .active()
            .map(|g| {
                let other = g.equivalent_radius();
                let depth = radius + other - (g.centroid - centroid).norm();
                (depth / (2.0 * radius.min(other))).clamp(0.0, 1.0)
            })
            .fold(0.0, f64::max)
    }

    /// Error terms after adding `grain` at its current centroid, without
    /// committing.
    #[must_use]
    pub fn cost_check_add(&self, grain: &Grain) -> PackingErrors {
        self.cost_at(grain, &grain.centroid)
    }

    fn cost_at(&self, grain: &Grain, centroid: &Point3) -> PackingErrors {
        let contacts = self.contacts(centroid, grain.equivalent_radius(), GrainId::NONE);
        let mut changes = Vec::with_capacity(2 * contacts.len() + 1);
        for id in &contacts {
            let count = self.proxy[id.index()];
            changes.push((self.neighbor_bin(count), -1.0));
            changes.push((self.neighbor_bin(count + 1), 1.0));
        }
        changes.push((self.neighbor_bin(contacts.len()), 1.0));
        self.compose(
            self.fill_error(self.placed_volume + grain.volume()),
            self.size_bins.error_with(&[(self.size_bin(grain), 1.0)]),
            self.neighbor_bins.error_with(&changes),
        )
    }

    /// Error terms after removing an active grain, without committing.
    ///
    /// Returns `None` if `id` is not an active grain.
    #[must_use]
    pub fn cost_check_remove(&self, id: GrainId) -> Option<PackingErrors> {
        let grain = self.store.get(id).filter(|g| g.active)?;
        let contacts = self.contacts(&grain.centroid, grain.equivalent_radius(), id);
        let mut changes = Vec::with_capacity(2 * contacts.len() + 1);
        for other in &contacts {
            let count = self.proxy[other.index()];
            changes.push((self.neighbor_bin(count), -1.0));
            changes.push((self.neighbor_bin(count.saturating_sub(1)), 1.0));
        }
        changes.push((self.neighbor_bin(self.proxy[id.index()]), -1.0));
        Some(self.compose(
            self.fill_error(self.placed_volume - grain.volume()),
            self.size_bins.error_with(&[(self.size_bin(grain), -1.0)]),
            self.neighbor_bins.error_with(&changes),
        ))
    }

    /// Records a stored, active grain in the running totals.
    fn attach(&mut self, id: GrainId) {
        let Some(grain) = self.store.get(id) else {
            return;
        };
        let (centroid, radius, volume) = (grain.centroid, grain.equivalent_radius(), grain.volume());
        let size_bin = self.size_bin(grain);
        let contacts = self.contacts(&centroid, radius, id);
        if self.proxy.len() < self.store.id_bound() {
            self.proxy.resize(self.store.id_bound(), 0);
        }
        for other in &contacts {
            let count = self.proxy[other.index()];
            self.neighbor_bins.remove(self.neighbor_bin(count), 1.0);
            self.neighbor_bins.add(self.neighbor_bin(count + 1), 1.0);
            self.proxy[other.index()] = count + 1;
        }
        self.proxy[id.index()] = contacts.len();
        self.neighbor_bins.add(self.neighbor_bin(contacts.len()), 1.0);
        self.size_bins.add(size_bin, 1.0);
        self.placed_volume += volume;
    }

    /// Reverses [`attach`](Self::attach) for an active grain.
    fn detach(&mut self, id: GrainId) {
        let Some(grain) = self.store.get(id) else {
            return;
        };
        let (centroid, radius, volume) = (grain.centroid, grain.equivalent_radius(), grain.volume());
        let size_bin = self.size_bin(grain);
        let contacts = self.contacts(&centroid, radius, id);
        for other in &contacts {
            let count = self.proxy[other.index()];
            self.neighbor_bins.remove(self.neighbor_bin(count), 1.0);
            self.neighbor_bins.add(self.neighbor_bin(count.saturating_sub(1)), 1.0);
            self.proxy[other.index()] = count.saturating_sub(1);
        }
        self.neighbor_bins.remove(self.neighbor_bin(self.proxy[id.index()]), 1.0);
        self.proxy[id.index()] = 0;
        self.size_bins.remove(size_bin, 1.0);
        self.placed_volume -= volume;
    }

    /// Commits `grain` at its current centroid and returns its identity.
    pub fn add_grain(&mut self, grain: Grain) -> GrainId {
        let id = self.store.insert(grain);
        self.store.set_active(id, true);
        self.attach(id);
        id
    }

    /// Removes an active grain, returning it and freeing its identity.
    pub fn remove_grain(&mut self, id: GrainId) -> Option<Grain> {
        if !self.store.get(id).is_some_and(|g| g.active) {
            return None;
        }
        self.detach(id);
        let mut grain = self.store.release(id)?;
        grain.active = false;
        Some(grain)
    }

    /// Puts a removed grain back under its own identity.
    fn restore_grain(&mut self, grain: Grain) {
        let id = grain.id;
        if self.store.restore(grain) {
            self.store.set_active(id, true);
            self.attach(id);
        }
    }

    /// Up to `keep` trial positions for `grain`, best first.
    ///
    /// Positions are taken as proposed until half of the domain is filled.
    /// After that `trial_positions` candidates are ranked by overlap with
    /// the placed grains (ties by proposal order).
    fn trial_order(
        &self,
        grain: &Grain,
        keep: usize,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<Vec<Point3>> {
        let ranked = self.placed_volume > 0.5 * self.domain_volume && self.config.trial_positions > 1;
        let wanted = if ranked {
            self.config.trial_positions.max(keep)
        } else {
            keep
        };
        let mut positions = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match placement.propose(rng) {
                Ok(p) => positions.push(p),
                Err(SynthError::Exhaustion(e)) if positions.is_empty() => return Err(e.into()),
                Err(SynthError::Exhaustion(_)) => break,
                Err(e) => return Err(e),
            }
        }
        if !ranked {
            return Ok(positions);
        }
        let radius = grain.equivalent_radius();
        let overlaps: Vec<f64> = if self.parallel {
            positions.par_iter().map(|p| self.overlap(p, radius)).collect()
        } else {
            positions.iter().map(|p| self.overlap(p, radius)).collect()
        };
        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.sort_by(|&a, &b| overlaps[a].total_cmp(&overlaps[b]).then(a.cmp(&b)));
        order.truncate(keep);
        Ok(order.into_iter().map(|i| positions[i]).collect())
    }

    /// First trial position within the overlap allowance whose combined
    /// error passes `accept`.
    fn find_position(
        &self,
        grain: &Grain,
        accept: impl Fn(f64) -> bool,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<Option<Point3>> {
        let retries = self.config.relocation_retries;
        let allowed = self.config.overlap_allowed;
        let radius = grain.equivalent_radius();
        for position in self.trial_order(grain, retries, placement, rng)? {
            if allowed < 1.0 && self.max_overlap_fraction(&position, radius) > allowed {
                continue;
            }
            if accept(self.cost_at(grain, &position).combined) {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Places `grain` if some trial position does not increase the combined
    /// error.
    ///
    /// Up to `relocation_retries` positions are tried; positions overlapping
    /// a placed grain by more than `overlap_allowed` are skipped. Returns the
    /// new identity, or `None` if every position was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustionError::SeedsExhausted`](crate::error::ExhaustionError)
    /// if the placement has no positions left.
    pub fn insert_grain(
        &mut self,
        mut grain: Grain,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<Option<GrainId>> {
        let current = self.errors().combined;
        match self.find_position(&grain, |after| after <= current, placement, rng)? {
            Some(position) => {
                grain.centroid = position;
                Ok(Some(self.add_grain(grain)))
            }
            None => Ok(None),
        }
    }

    /// Commits every candidate at its best trial position.
    ///
    /// This builds the starting configuration for [`optimize`](Self::optimize);
    /// neither the cost check nor the overlap allowance is applied.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than running out of positions.
    pub fn pack(
        &mut self,
        candidates: Vec<Grain>,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<PackOutcome> {
        let mut outcome = PackOutcome::default();
        for mut grain in candidates {
            let position = match self.trial_order(&grain, 1, placement, rng) {
                Ok(positions) => positions.first().copied(),
                Err(SynthError::Exhaustion(_)) => None,
                Err(e) => return Err(e),
            };
            let Some(position) = position else {
                outcome.positions_exhausted = true;
                break;
            };
            grain.centroid = position;
            self.add_grain(grain);
            outcome.placed += 1;
        }
        let errors = self.errors();
        debug!(
            placed = outcome.placed,
            fill = errors.fill,
            size = errors.size,
            neighborhood = errors.neighborhood,
            "initial packing"
        );
        Ok(outcome)
    }

    /// Active grain with the largest positive contribution to the size and
    /// neighborhood errors, skipping `tried`. Ties go to the lowest identity.
    fn worst_grain(&self, tried: &BTreeSet<GrainId>) -> Option<GrainId> {
        let mut worst: Option<(GrainId, f64)> = None;
        for grain in self.store.active() {
            if tried.contains(&grain.id) {
                continue;
            }
            let size = self.size_bins.deviation(self.size_bin(grain)).max(0.0);
            let neighborhood = self
                .neighbor_bins
                .deviation(self.neighbor_bin(self.proxy[grain.id.index()]))
                .max(0.0);
            let score = self.config.size_weight * size + self.config.neighborhood_weight * neighborhood;
            if worst.is_none_or(|(_, best)| score > best) {
                worst = Some((grain.id, score));
            }
        }
        worst.map(|(id, _)| id)
    }

    /// Draws a candidate; `None` once the generator is exhausted.
    fn draw(generate: &mut GenerateGrains<'_>, rng: &mut SynthRng) -> Result<Option<Grain>> {
        match generate.sample_one(rng) {
            Ok(grain) => Ok(Some(grain)),
            Err(SynthError::Exhaustion(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_add(
        &mut self,
        generate: &mut GenerateGrains<'_>,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<Option<Move>> {
        let Some(grain) = Self::draw(generate, rng)? else {
            return Ok(None);
        };
        let current = self.errors().combined;
        match self.find_position(&grain, |after| after < current, placement, rng) {
            Ok(Some(position)) => {
                let mut grain = grain;
                grain.centroid = position;
                self.add_grain(grain);
                Ok(Some(Move::Add))
            }
            Ok(None) | Err(SynthError::Exhaustion(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_remove(&mut self, id: GrainId) -> Option<Move> {
        let current = self.errors().combined;
        let after = self.cost_check_remove(id)?;
        if after.combined < current {
            self.remove_grain(id);
            Some(Move::Remove)
        } else {
            None
        }
    }

    fn try_swap(
        &mut self,
        id: GrainId,
        generate: &mut GenerateGrains<'_>,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
    ) -> Result<Option<Move>> {
        let Some(mut replacement) = Self::draw(generate, rng)? else {
            return Ok(None);
        };
        let before = self.errors().combined;
        let snapshot = self.placed_volume;
        let Some(original) = self.remove_grain(id) else {
            return Ok(None);
        };
        let position = match self.find_position(&replacement, |after| after < before, placement, rng) {
            Ok(position) => position,
            Err(SynthError::Exhaustion(_)) => None,
            Err(e) => {
                self.restore_grain(original);
                self.placed_volume = snapshot;
                return Err(e);
            }
        };
        if let Some(position) = position {
            replacement.centroid = position;
            self.add_grain(replacement);
            Ok(Some(Move::Swap))
        } else {
            self.restore_grain(original);
            self.placed_volume = snapshot;
            Ok(None)
        }
    }

    /// Greedy local search over add, remove and swap moves.
    ///
    /// Each outer iteration adds a fresh candidate while the domain is
    /// under-filled beyond `fill_tolerance`, removes the worst grain while
    /// it is over-filled, and otherwise swaps the worst grain for a fresh
    /// candidate. A move is committed only if the combined error strictly
    /// decreases. Grains whose moves were rejected are skipped until some
    /// move is accepted; once every grain has been tried the run stalls.
    ///
    /// # Errors
    ///
    /// Returns an error for numerical failures while sampling.
    pub fn optimize(
        &mut self,
        generate: &mut GenerateGrains<'_>,
        placement: &mut dyn Placement,
        rng: &mut SynthRng,
        cancel: &CancelToken,
    ) -> Result<PackingReport> {
        let errors_before = self.errors();
        let mut report = PackingReport {
            errors_before,
            error_trace: vec![errors_before.combined],
            ..PackingReport::default()
        };
        let mut tried = BTreeSet::new();

        report.stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.errors().combined <= self.config.tolerance {
                break StopReason::Converged;
            }
            if report.iterations >= self.config.max_iterations {
                break StopReason::Budget;
            }
            report.iterations += 1;

            let signed_fill = (self.placed_volume - self.domain_volume) / self.domain_volume;
            let mut accepted = None;
            if signed_fill < -self.config.fill_tolerance {
                accepted = self.try_add(generate, placement, rng)?;
            }
            if accepted.is_none() {
                let Some(worst) = self.worst_grain(&tried) else {
                    break StopReason::Stalled;
                };
                tried.insert(worst);
                if signed_fill > self.config.fill_tolerance {
                    accepted = self.try_remove(worst);
                }
                if accepted.is_none() {
                    accepted = self.try_swap(worst, generate, placement, rng)?;
                }
            }

            if let Some(kind) = accepted {
                match kind {
                    Move::Add => report.added += 1,
                    Move::Remove => report.removed += 1,
                    Move::Swap => report.swapped += 1,
                }
                tried.clear();
                report.error_trace.push(self.errors().combined);
            }
        };

        report.errors_after = self.errors();
        report.candidate_cap_reached = generate.is_exhausted();
        report.fill_fraction = self.placed_volume / self.domain_volume;
        if report.is_partially_filled(self.config.fill_tolerance) {
            warn!(
                fill_fraction = report.fill_fraction,
                cap_reached = report.candidate_cap_reached,
                "packing stalled before the domain was filled"
            );
        }
        info!(
            iterations = report.iterations,
            added = report.added,
            removed = report.removed,
            swapped = report.swapped,
            before = report.errors_before.combined,
            after = report.errors_after.combined,
            stop = ?report.stop,
            "packing optimization finished"
        );
        Ok(report)
    }

    /// Sets the proximity factor and recounts every proximity neighbor.
    pub fn set_contact_factor(&mut self, contact_factor: f64) {
        self.contact_factor = contact_factor;
        self.rebuild_neighbors();
    }

    /// Rescales the proximity factor so the proximity mean neighbor count
    /// tracks `measured_mean`, the mean from the real neighbor graph.
    ///
    /// Neighbor counts grow roughly with the cube of the factor, so the
    /// factor is scaled by the cube root of the ratio, limited to a factor
    /// of two per call. Returns the new factor.
    pub fn calibrate_contact_factor(&mut self, measured_mean: f64) -> f64 {
        let proxy_mean = self.mean_proxy_neighbor_count();
        if proxy_mean > 0.0 && measured_mean > 0.0 {
            let scale = (measured_mean / proxy_mean).cbrt().clamp(0.5, 2.0);
            self.set_contact_factor(self.contact_factor * scale);
            debug!(
                proxy_mean,
                measured_mean,
                contact_factor = self.contact_factor,
                "recalibrated contact factor"
            );
        }
        self.contact_factor
    }

    fn rebuild_neighbors(&mut self) {
        let grains: Vec<&Grain> = self.store.active().collect();
        let count_for = |grain: &Grain| {
            grains
                .iter()
                .filter(|other| other.id != grain.id)
                .filter(|other| {
                    (other.centroid - grain.centroid).norm()
                        < self.contact_factor * (grain.equivalent_radius() + other.equivalent_radius())
                })
                .count()
        };
        let counts: Vec<(GrainId, usize)> = if self.parallel {
            grains.par_iter().map(|g| (g.id, count_for(g))).collect()
        } else {
            grains.iter().map(|g| (g.id, count_for(g))).collect()
        };
        self.proxy = vec![0; self.store.id_bound()];
        self.neighbor_bins.clear();
        for (id, count) in counts {
            self.proxy[id.index()] = count;
            self.neighbor_bins.add(self.neighbor_bin(count), 1.0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crystal::CrystalStructure;
    use crate::math::Vector3;
    use crate::packing::UniformPlacement;
    use crate::stats::MicrostructureStatistics;
    use approx::assert_relative_eq;

    const EDGE: f64 = 40.0;

    fn stats() -> MicrostructureStatistics {
        MicrostructureStatistics::equiaxed(CrystalStructure::Cubic, 2.0, 0.2)
    }

    fn engine(stats: &MicrostructureStatistics, config: PackingConfig) -> PackingEngine {
        PackingEngine::new(
            config,
            EDGE.powi(3),
            &stats.primary.size.target_histogram().unwrap(),
            &stats.neighbor_distribution,
        )
        .unwrap()
        .with_parallel(false)
    }

    fn placement() -> UniformPlacement {
        UniformPlacement::new(Vector3::new(EDGE, EDGE, EDGE))
    }

    /// Proposes the same point every time and counts the proposals.
    struct FixedPlacement {
        point: Point3,
        proposals: usize,
    }

    impl FixedPlacement {
        fn at(x: f64, y: f64, z: f64) -> Self {
            Self {
                point: Point3::new(x, y, z),
                proposals: 0,
            }
        }
    }

    impl Placement for FixedPlacement {
        fn propose(&mut self, _rng: &mut SynthRng) -> Result<Point3> {
            self.proposals += 1;
            Ok(self.point)
        }
    }

    #[test]
    fn insert_grain_accepts_when_error_does_not_grow() {
        let stats = stats();
        let mut engine = engine(&stats, PackingConfig::default().with_weights(1.0, 0.0, 0.0));
        let mut generate = GenerateGrains::new(&stats.primary, 10).unwrap();
        let mut rng = SynthRng::new(5);
        let before = engine.errors().combined;
        let mut place = FixedPlacement::at(20.0, 20.0, 20.0);

        let grain = generate.sample_one(&mut rng).unwrap();
        let id = engine.insert_grain(grain, &mut place, &mut rng).unwrap().unwrap();
        assert_eq!(place.proposals, 1);
        assert_eq!(engine.store().active_count(), 1);
        assert_eq!(engine.store().get(id).unwrap().centroid, place.point);
        assert!(engine.errors().combined <= before);
    }

    #[test]
    fn insert_grain_gives_up_after_relocation_retries() {
        let stats = stats();
        let mut config = PackingConfig::default().with_weights(1.0, 0.0, 0.0);
        config.relocation_retries = 5;
        config.trial_positions = 1;
        let mut engine = engine(&stats, config);
        let mut generate = GenerateGrains::new(&stats.primary, 5_000).unwrap();
        let mut rng = SynthRng::new(6);
        let sampled = generate.execute(1.2 * EDGE.powi(3), &mut rng).unwrap();
        engine.pack(sampled.grains, &mut placement(), &mut rng).unwrap();
        assert!(engine.placed_volume() > engine.domain_volume());

        let before = engine.errors();
        let count = engine.store().active_count();
        let mut place = FixedPlacement::at(20.0, 20.0, 20.0);
        let grain = generate.sample_one(&mut rng).unwrap();
        assert!(engine.insert_grain(grain, &mut place, &mut rng).unwrap().is_none());
        assert_eq!(place.proposals, 5);
        assert_eq!(engine.store().active_count(), count);
        assert_eq!(engine.errors(), before);
    }

    #[test]
    fn overlap_allowance_rejects_crowded_positions() {
        let stats = stats();
        let mut generate = GenerateGrains::new(&stats.primary, 10).unwrap();
        let mut rng = SynthRng::new(12);
        let mut first = generate.sample_one(&mut rng).unwrap();
        first.centroid = Point3::new(20.0, 20.0, 20.0);
        let second = generate.sample_one(&mut rng).unwrap();

        let config = PackingConfig::default()
            .with_weights(1.0, 0.0, 0.0)
            .with_overlap_allowed(0.2);
        let mut strict = engine(&stats, config);
        strict.add_grain(first.clone());
        let mut crowded = FixedPlacement::at(20.0, 20.0, 20.0);
        assert!(strict
            .insert_grain(second.clone(), &mut crowded, &mut rng)
            .unwrap()
            .is_none());
        assert_eq!(crowded.proposals, strict.config.relocation_retries);
        let mut clear = FixedPlacement::at(2.0, 2.0, 2.0);
        assert!(strict
            .insert_grain(second.clone(), &mut clear, &mut rng)
            .unwrap()
            .is_some());

        let mut lenient = engine(&stats, PackingConfig::default().with_weights(1.0, 0.0, 0.0));
        lenient.add_grain(first);
        let mut crowded = FixedPlacement::at(20.0, 20.0, 20.0);
        assert!(lenient
            .insert_grain(second, &mut crowded, &mut rng)
            .unwrap()
            .is_some());
    }

    #[test]
    fn add_matches_cost_check_and_remove_reverses_it() {
        let stats = stats();
        let mut engine = engine(&stats, PackingConfig::default());
        let mut generate = GenerateGrains::new(&stats.primary, 1_000).unwrap();
        let mut rng = SynthRng::new(3);
        let mut place = placement();
        let sampled = generate.execute(0.5 * EDGE.powi(3), &mut rng).unwrap();
        engine
            .pack(sampled.grains, &mut place, &mut rng)
            .unwrap();

        let before = engine.errors();
        let mut grain = generate.sample_one(&mut rng).unwrap();
        grain.centroid = Point3::new(20.0, 20.0, 20.0);
        let predicted = engine.cost_check_add(&grain);
        let id = engine.add_grain(grain);
        let after = engine.errors();
        assert_relative_eq!(predicted.combined, after.combined, epsilon = 1e-12);

        let predicted_removal = engine.cost_check_remove(id).unwrap();
        engine.remove_grain(id).unwrap();
        assert_relative_eq!(predicted_removal.combined, before.combined, epsilon = 1e-9);
        assert_relative_eq!(engine.errors().combined, before.combined, epsilon = 1e-9);
        assert!(engine.cost_check_remove(id).is_none());
    }

    #[test]
    fn proximity_counts_are_symmetric() {
        let stats = stats();
        let mut engine = engine(&stats, PackingConfig::default());
        let mut generate = GenerateGrains::new(&stats.primary, 1_000).unwrap();
        let mut rng = SynthRng::new(8);
        let sampled = generate.execute(EDGE.powi(3), &mut rng).unwrap();
        engine
            .pack(sampled.grains, &mut placement(), &mut rng)
            .unwrap();
        let incremental: Vec<usize> = engine
            .store()
            .active()
            .map(|g| engine.proxy_neighbor_count(g.id))
            .collect();
        let factor = engine.contact_factor();
        engine.set_contact_factor(factor);
        let rebuilt: Vec<usize> = engine
            .store()
            .active()
            .map(|g| engine.proxy_neighbor_count(g.id))
            .collect();
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn optimization_never_increases_error() {
        let stats = stats();
        let config = PackingConfig::default()
            .with_weights(1.0, 0.1, 0.1)
            .with_max_iterations(300);
        let mut engine = engine(&stats, config);
        let mut generate = GenerateGrains::new(&stats.primary, 5_000).unwrap();
        let mut rng = SynthRng::new(21);
        let mut place = placement();
        let sampled = generate.execute(0.8 * EDGE.powi(3), &mut rng).unwrap();
        let cancel = CancelToken::new();
        engine.pack(sampled.grains, &mut place, &mut rng).unwrap();

        let report = engine.optimize(&mut generate, &mut place, &mut rng, &cancel).unwrap();
        assert!(report.error_trace.windows(2).all(|w| w[1] <= w[0]));
        assert!(report.errors_after.combined <= report.errors_before.combined);
        assert!(report.errors_after.fill < report.errors_before.fill);
        assert_eq!(report.error_trace.len(), 1 + report.added + report.removed + report.swapped);
    }

    #[test]
    fn cancelled_run_stops_immediately() {
        let stats = stats();
        let mut engine = engine(&stats, PackingConfig::default());
        let mut generate = GenerateGrains::new(&stats.primary, 100).unwrap();
        let mut rng = SynthRng::new(1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = engine
            .optimize(&mut generate, &mut placement(), &mut rng, &cancel)
            .unwrap();
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn exhausted_generator_reports_partial_fill() {
        let stats = stats();
        let mut engine = engine(&stats, PackingConfig::default());
        let mut generate = GenerateGrains::new(&stats.primary, 5).unwrap();
        let mut rng = SynthRng::new(4);
        let cancel = CancelToken::new();
        let mut place = placement();
        let sampled = generate.execute(EDGE.powi(3), &mut rng).unwrap();
        assert!(sampled.under_filled);
        engine.pack(sampled.grains, &mut place, &mut rng).unwrap();
        let report = engine.optimize(&mut generate, &mut place, &mut rng, &cancel).unwrap();
        assert!(report.candidate_cap_reached);
        assert!(report.is_partially_filled(0.01));
        assert!(report.fill_fraction < 0.5);
    }

    #[test]
    fn parallel_ranking_matches_sequential() {
        let stats = stats();
        let run = |parallel: bool| {
            let mut engine = engine(&stats, PackingConfig::default()).with_parallel(parallel);
            let mut generate = GenerateGrains::new(&stats.primary, 2_000).unwrap();
            let mut rng = SynthRng::new(77);
            let sampled = generate.execute(EDGE.powi(3), &mut rng).unwrap();
            engine
                .pack(sampled.grains, &mut placement(), &mut rng)
                .unwrap();
            engine
                .store()
                .active()
                .map(|g| (g.id, g.centroid))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn rejects_empty_domain() {
        let stats = stats();
        assert!(PackingEngine::new(
            PackingConfig::default(),
            0.0,
            &stats.primary.size.target_histogram().unwrap(),
            &stats.neighbor_distribution,
        )
        .is_err());
    }
}
