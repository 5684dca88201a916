use crate::error::{ExhaustionError, Result};

use super::SynthRng;

/// Default number of random attempts before falling back to a scan.
const DEFAULT_MAX_ATTEMPTS: usize = 64;

/// Draws indices without replacement.
///
/// Random draws that hit an already-consumed index are discarded and
/// retried. After `max_attempts` misses the sampler scans forward from the
/// last random position, so every unconsumed index stays eligible until the
/// pool is empty.
#[derive(Debug, Clone)]
pub struct SeedSampler {
    candidates: Vec<usize>,
    taken: Vec<bool>,
    remaining: usize,
    max_attempts: usize,
}

impl SeedSampler {
    /// Samples from `0..total`.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self::from_candidates((0..total).collect())
    }

    /// Samples from an explicit candidate list.
    #[must_use]
    pub fn from_candidates(candidates: Vec<usize>) -> Self {
        let remaining = candidates.len();
        Self {
            taken: vec![false; remaining],
            candidates,
            remaining,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the number of random attempts per draw.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Number of indices not yet drawn.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Draws the next unconsumed index.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustionError::SeedsExhausted`] once every candidate has
    /// been drawn.
    pub fn draw(&mut self, rng: &mut SynthRng) -> Result<usize> {
        let total = self.candidates.len();
        if self.remaining == 0 {
            return Err(ExhaustionError::SeedsExhausted { total }.into());
        }

        let mut pos = 0;
        for _ in 0..self.max_attempts {
            pos = rng.gen_index(total);
            if !self.taken[pos] {
                return Ok(self.take(pos));
            }
        }

        for offset in 1..=total {
            let slot = (pos + offset) % total;
            if !self.taken[slot] {
                return Ok(self.take(slot));
            }
        }
        Err(ExhaustionError::SeedsExhausted { total }.into())
    }

    fn take(&mut self, pos: usize) -> usize {
        self.taken[pos] = true;
        self.remaining -= 1;
        self.candidates[pos]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::SynthError;

    #[test]
    fn draws_every_index_once() {
        let mut rng = SynthRng::new(4);
        let mut sampler = SeedSampler::new(50).with_max_attempts(2);
        let mut drawn: Vec<usize> = (0..50).map(|_| sampler.draw(&mut rng).unwrap()).collect();
        drawn.sort_unstable();
        assert_eq!(drawn, (0..50).collect::<Vec<_>>());
        assert_eq!(sampler.remaining(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut rng = SynthRng::new(4);
        let mut sampler = SeedSampler::from_candidates(vec![10, 20]);
        sampler.draw(&mut rng).unwrap();
        sampler.draw(&mut rng).unwrap();
        let err = sampler.draw(&mut rng).unwrap_err();
        assert!(matches!(
            err,
            SynthError::Exhaustion(ExhaustionError::SeedsExhausted { total: 2 })
        ));
    }

    #[test]
    fn candidate_values_are_returned() {
        let mut rng = SynthRng::new(9);
        let mut sampler = SeedSampler::from_candidates(vec![7, 70, 700]);
        let mut got: Vec<usize> = (0..3).map(|_| sampler.draw(&mut rng).unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![7, 70, 700]);
    }
}
