//! Deterministic random number generation.
//!
//! A single [`SynthRng`] value is created per synthesis run and threaded by
//! `&mut` reference through every sampling call. Each pipeline stage draws
//! from its own stream derived with [`SynthRng::fork`]; parallel sections
//! only evaluate, never draw, so results do not depend on thread
//! scheduling.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Golden-ratio increment used to derive forked stream seeds.
const STREAM_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seeded PCG generator with reproducible forked streams.
#[derive(Debug, Clone)]
pub struct SynthRng {
    master_seed: u64,
    stream: u64,
    rng: Pcg64,
}

impl SynthRng {
    /// Creates a generator from a master seed.
    #[must_use]
    pub fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            stream: 0,
            rng: Pcg64::seed_from_u64(master_seed),
        }
    }

    /// Returns the master seed.
    #[must_use]
    pub const fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derives the next independent generator.
    ///
    /// The derived stream depends only on the master seed and on how many
    /// forks were taken before.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        self.stream += 1;
        let seed = self
            .master_seed
            .wrapping_add(self.stream.wrapping_mul(STREAM_INCREMENT));
        Self {
            master_seed: self.master_seed,
            stream: self.stream,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Uniform `f64` in `[0, 1)`.
    pub fn gen_f64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Uniform `f64` in the open interval `(0, 1)`, safe for inverse CDFs.
    pub fn gen_open01(&mut self) -> f64 {
        loop {
            let u = self.gen_f64();
            if u > 0.0 {
                return u;
            }
        }
    }

    /// Uniform `f64` in `[lo, hi)`.
    pub fn gen_range_f64(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.gen_f64()
    }

    /// Uniform integer in the inclusive range `[lo, hi]`.
    ///
    /// Returns `lo` when the range is empty.
    pub fn gen_range_i64(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform index in `[0, n)`. Returns 0 when `n == 0`.
    pub fn gen_index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.gen_range(0..n)
    }

    /// Bernoulli trial with success probability `p`.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.gen_f64() < p
    }
}
