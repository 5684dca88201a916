//! Grain shape families.
//!
//! Every shape is expressed in the grain's principal-axis frame with
//! coordinates already divided by the semi-axis radii `(a, b, c)`. A point
//! lies inside the shape iff its normalized distance is at most one, and
//! the enclosed volume is `volume_coefficient * a * b * c`.

use std::f64::consts::PI;

use crate::error::{DomainError, Result};
use crate::math::special::gamma;

/// Superellipsoid exponent bounds.
const MIN_EXPONENT: f64 = 2.0;
const MAX_EXPONENT: f64 = 10.0;

/// Shape family selected by the statistics input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapeClass {
    /// `x^2 + y^2 + z^2 <= 1`; the shape factor is ignored.
    #[default]
    Ellipsoid,
    /// `|x|^n + |y|^n + |z|^n <= 1` with `n = 2 / shape_factor`.
    Superellipsoid,
    /// Unit cube truncated by the octahedron `|x| + |y| + |z| <= 2 + shape_factor`.
    CubeOctahedron,
    /// Cylinder whose axis is the principal `a` axis.
    Cylinder,
}

impl ShapeClass {
    /// Checks that `shape_factor` is usable for this class.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ParameterOutOfRange`] unless `0 < shape_factor <= 1`.
    pub fn validate_shape_factor(self, shape_factor: f64) -> Result<()> {
        if self != Self::Ellipsoid && !(shape_factor > 0.0 && shape_factor <= 1.0) {
            return Err(DomainError::ParameterOutOfRange {
                parameter: "shape_factor",
                value: shape_factor,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        Ok(())
    }

    fn exponent(shape_factor: f64) -> f64 {
        (2.0 / shape_factor).clamp(MIN_EXPONENT, MAX_EXPONENT)
    }

    /// Normalized distance of a point given in radius-scaled principal
    /// coordinates. Inside iff the result is `<= 1`.
    #[must_use]
    pub fn normalized_distance(self, local: [f64; 3], shape_factor: f64) -> f64 {
        let [x, y, z] = local.map(f64::abs);
        match self {
            Self::Ellipsoid => (x * x + y * y + z * z).sqrt(),
            Self::Superellipsoid => {
                let n = Self::exponent(shape_factor);
                (x.powf(n) + y.powf(n) + z.powf(n)).powf(1.0 / n)
            }
            Self::CubeOctahedron => {
                let s = 2.0 + shape_factor.clamp(0.0, 1.0);
                x.max(y).max(z).max((x + y + z) / s)
            }
            Self::Cylinder => x.max((y * y + z * z).sqrt()),
        }
    }

    /// Volume of the unit shape, so that `V = coefficient * a * b * c`.
    ///
    /// # Errors
    ///
    /// Returns an error if the gamma function is evaluated out of range.
    pub fn volume_coefficient(self, shape_factor: f64) -> Result<f64> {
        Ok(match self {
            Self::Ellipsoid => 4.0 / 3.0 * PI,
            Self::Superellipsoid => {
                let n = Self::exponent(shape_factor);
                8.0 * gamma(1.0 + 1.0 / n)?.powi(3) / gamma(1.0 + 3.0 / n)?
            }
            Self::CubeOctahedron => {
                // Cube [-1, 1]^3 minus eight corner tetrahedra of leg 3 - s.
                let s = 2.0 + shape_factor.clamp(0.0, 1.0);
                8.0 - 8.0 * (3.0 - s).powi(3) / 6.0
            }
            Self::Cylinder => 2.0 * PI,
        })
    }

    /// Factor applied to the largest radius to bound the shape in any
    /// direction.
    #[must_use]
    pub fn reach(self) -> f64 {
        match self {
            Self::Ellipsoid => 1.0,
            Self::Cylinder => std::f64::consts::SQRT_2,
            Self::Superellipsoid | Self::CubeOctahedron => 3.0_f64.sqrt(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Monte-Carlo-free volume check on a fine lattice over `[-1.5, 1.5]^3`.
    fn lattice_volume(shape: ShapeClass, factor: f64) -> f64 {
        let n = 90;
        #[allow(clippy::cast_precision_loss)]
        let h = 3.0 / n as f64;
        let mut inside = 0usize;
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    #[allow(clippy::cast_precision_loss)]
                    let p = [
                        -1.5 + (i as f64 + 0.5) * h,
                        -1.5 + (j as f64 + 0.5) * h,
                        -1.5 + (k as f64 + 0.5) * h,
                    ];
                    if shape.normalized_distance(p, factor) <= 1.0 {
                        inside += 1;
                    }
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let v = inside as f64 * h * h * h;
        v
    }

    #[test]
    fn superellipsoid_with_unit_factor_is_ellipsoid() {
        let e = ShapeClass::Ellipsoid.volume_coefficient(1.0).unwrap();
        let s = ShapeClass::Superellipsoid.volume_coefficient(1.0).unwrap();
        assert_relative_eq!(e, s, max_relative = 1e-10);
    }

    #[test]
    fn coefficients_match_lattice_volume() {
        for (shape, factor) in [
            (ShapeClass::Ellipsoid, 1.0),
            (ShapeClass::Superellipsoid, 0.5),
            (ShapeClass::CubeOctahedron, 0.4),
            (ShapeClass::Cylinder, 1.0),
        ] {
            let analytic = shape.volume_coefficient(factor).unwrap();
            let measured = lattice_volume(shape, factor);
            assert!(
                (analytic - measured).abs() / analytic < 0.02,
                "{shape:?}: analytic {analytic}, measured {measured}"
            );
        }
    }

    #[test]
    fn full_cube_octahedron_is_cube() {
        assert_relative_eq!(ShapeClass::CubeOctahedron.volume_coefficient(1.0).unwrap(), 8.0);
    }

    #[test]
    fn shape_factor_validation() {
        assert!(ShapeClass::Superellipsoid.validate_shape_factor(0.0).is_err());
        assert!(ShapeClass::Cylinder.validate_shape_factor(1.5).is_err());
        assert!(ShapeClass::Ellipsoid.validate_shape_factor(7.0).is_ok());
    }
}
