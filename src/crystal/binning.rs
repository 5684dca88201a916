use crate::error::{DomainError, Result};
use crate::random::SynthRng;

use super::Orientation;

/// Regular binning of a reduced Euler box `[0, r1) x [0, r2) x [0, r3)`.
///
/// Bin `(i, j, k)` has linear index `i + j * d1 + k * d1 * d2`. Angles
/// outside the box are wrapped into it by the box period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerBinning {
    dims: [usize; 3],
    ranges: [f64; 3],
}

impl EulerBinning {
    /// Creates a binning with explicit per-angle bin counts.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidHistogram`] if any dimension is zero or
    /// any range is not positive.
    pub fn new(dims: [usize; 3], ranges: [f64; 3]) -> Result<Self> {
        if dims.contains(&0) || ranges.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(DomainError::InvalidHistogram {
                name: "euler binning",
                reason: format!("dims {dims:?} ranges {ranges:?}"),
            }
            .into());
        }
        Ok(Self { dims, ranges })
    }

    /// Infers a cubic `n x n x n` binning from a histogram length.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidHistogram`] if `len` is not a perfect cube.
    pub fn from_histogram_len(name: &'static str, len: usize, ranges: [f64; 3]) -> Result<Self> {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let n = (len as f64).cbrt().round() as usize;
        if n == 0 || n * n * n != len {
            return Err(DomainError::InvalidHistogram {
                name,
                reason: format!("{len} bins is not a cube number"),
            }
            .into());
        }
        Self::new([n, n, n], ranges)
    }

    /// Total number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns `true` if there are no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bin index of an orientation.
    #[must_use]
    pub fn bin_of(&self, orientation: &Orientation) -> usize {
        let euler = orientation.euler();
        let mut index = 0;
        let mut stride = 1;
        for axis in 0..3 {
            let range = self.ranges[axis];
            let wrapped = euler[axis].rem_euclid(range);
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let cell = ((wrapped / range * self.dims[axis] as f64) as usize).min(self.dims[axis] - 1);
            index += cell * stride;
            stride *= self.dims[axis];
        }
        index
    }

    /// Draws an orientation uniformly inside a bin.
    pub fn sample_in_bin(&self, bin: usize, rng: &mut SynthRng) -> Orientation {
        let mut rest = bin;
        let mut euler = [0.0; 3];
        for axis in 0..3 {
            let cell = rest % self.dims[axis];
            rest /= self.dims[axis];
            #[allow(clippy::cast_precision_loss)]
            let width = self.ranges[axis] / self.dims[axis] as f64;
            #[allow(clippy::cast_precision_loss)]
            let lo = cell as f64 * width;
            euler[axis] = rng.gen_range_f64(lo, lo + width);
        }
        Orientation::from_euler(euler[0], euler[1], euler[2])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn infers_cube_dims() {
        let b = EulerBinning::from_histogram_len("odf", 216, [FRAC_PI_2; 3]).unwrap();
        assert_eq!(b.len(), 216);
        assert!(EulerBinning::from_histogram_len("odf", 100, [FRAC_PI_2; 3]).is_err());
    }

    #[test]
    fn samples_land_in_their_bin() {
        let b = EulerBinning::new([4, 3, 5], [FRAC_PI_2, 1.0, 2.0]).unwrap();
        let mut rng = SynthRng::new(2);
        for bin in 0..b.len() {
            let o = b.sample_in_bin(bin, &mut rng);
            assert_eq!(b.bin_of(&o), bin);
        }
    }

    #[test]
    fn angles_wrap_into_the_box() {
        let b = EulerBinning::new([2, 2, 2], [1.0, 1.0, 1.0]).unwrap();
        let inside = Orientation::from_euler(0.25, 0.75, 0.25);
        let shifted = Orientation::from_euler(2.25, -0.25, 5.25);
        assert_eq!(b.bin_of(&inside), b.bin_of(&shifted));
    }
}
