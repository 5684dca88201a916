use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, FRAC_PI_3, FRAC_PI_6};

use nalgebra::Quaternion;

use crate::math::UnitQuaternion;

/// Crystal class of the material, selecting the proper-rotation symmetry
/// group used for misorientation and the reduced Euler box used for ODF
/// binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrystalStructure {
    /// Cubic `m-3m` (24 proper rotations).
    #[default]
    Cubic,
    /// Hexagonal `6/mmm` (12 proper rotations).
    Hexagonal,
}

impl CrystalStructure {
    /// Proper rotations of the point group as unit quaternions.
    #[must_use]
    pub fn symmetry_operators(self) -> Vec<UnitQuaternion> {
        let q = |w: f64, x: f64, y: f64, z: f64| {
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
        };
        match self {
            Self::Cubic => {
                let c = FRAC_1_SQRT_2;
                let mut ops = vec![
                    q(1.0, 0.0, 0.0, 0.0),
                    // 2-fold about <100>
                    q(0.0, 1.0, 0.0, 0.0),
                    q(0.0, 0.0, 1.0, 0.0),
                    q(0.0, 0.0, 0.0, 1.0),
                    // 4-fold about <100>
                    q(c, c, 0.0, 0.0),
                    q(c, -c, 0.0, 0.0),
                    q(c, 0.0, c, 0.0),
                    q(c, 0.0, -c, 0.0),
                    q(c, 0.0, 0.0, c),
                    q(c, 0.0, 0.0, -c),
                    // 2-fold about <110>
                    q(0.0, c, c, 0.0),
                    q(0.0, c, -c, 0.0),
                    q(0.0, c, 0.0, c),
                    q(0.0, c, 0.0, -c),
                    q(0.0, 0.0, c, c),
                    q(0.0, 0.0, c, -c),
                ];
                // 3-fold about <111>
                for sx in [0.5, -0.5] {
                    for sy in [0.5, -0.5] {
                        for sz in [0.5, -0.5] {
                            ops.push(q(0.5, sx, sy, sz));
                        }
                    }
                }
                ops
            }
            Self::Hexagonal => {
                let mut ops = Vec::with_capacity(12);
                for k in 0..6 {
                    let half = f64::from(k) * FRAC_PI_6;
                    ops.push(q(half.cos(), 0.0, 0.0, half.sin()));
                }
                for k in 0..6 {
                    let theta = f64::from(k) * FRAC_PI_6;
                    ops.push(q(0.0, theta.cos(), theta.sin(), 0.0));
                }
                ops
            }
        }
    }

    /// Upper bounds of the reduced Euler box `(phi1, Phi, phi2)` used for
    /// ODF binning.
    #[must_use]
    pub fn euler_ranges(self) -> [f64; 3] {
        match self {
            Self::Cubic => [FRAC_PI_2, FRAC_PI_2, FRAC_PI_2],
            Self::Hexagonal => [FRAC_PI_2, FRAC_PI_2, FRAC_PI_3],
        }
    }

    /// Largest possible disorientation angle in radians.
    #[must_use]
    pub fn max_misorientation(self) -> f64 {
        match self {
            Self::Cubic => 62.8_f64.to_radians(),
            Self::Hexagonal => 93.8_f64.to_radians(),
        }
    }

    /// Minimum rotation angle relating two orientations under this
    /// symmetry group (the disorientation angle), in radians.
    #[must_use]
    pub fn misorientation(self, a: &UnitQuaternion, b: &UnitQuaternion) -> f64 {
        misorientation_with(&self.symmetry_operators(), a, b)
    }
}

/// Disorientation angle using a precomputed operator list.
///
/// The angle of `S1 * d * S2` equals the angle of `S2 * S1 * d`, so a
/// one-sided search over the group is sufficient.
#[must_use]
pub fn misorientation_with(ops: &[UnitQuaternion], a: &UnitQuaternion, b: &UnitQuaternion) -> f64 {
    let delta = a.inverse() * b;
    let best_w = ops
        .iter()
        .map(|s| (s * delta).w.abs())
        .fold(0.0_f64, f64::max);
    2.0 * best_w.min(1.0).acos()
}
