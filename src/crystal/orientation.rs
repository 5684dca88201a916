use crate::math::{Rotation3, UnitQuaternion, Vector3};

/// A crystallographic or geometric orientation stored as Bunge (ZXZ)
/// Euler angles `(phi1, Phi, phi2)` in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    euler: [f64; 3],
}

impl Orientation {
    /// Creates an orientation from Bunge Euler angles.
    #[must_use]
    pub fn from_euler(phi1: f64, big_phi: f64, phi2: f64) -> Self {
        Self {
            euler: [phi1, big_phi, phi2],
        }
    }

    /// The identity orientation.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Euler angles `(phi1, Phi, phi2)`.
    #[must_use]
    pub fn euler(&self) -> [f64; 3] {
        self.euler
    }

    /// Unit quaternion `Rz(phi1) * Rx(Phi) * Rz(phi2)`.
    #[must_use]
    pub fn quaternion(&self) -> UnitQuaternion {
        let [phi1, big_phi, phi2] = self.euler;
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), phi1)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), big_phi)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), phi2)
    }

    /// Rotation matrix whose columns are the rotated frame axes.
    #[must_use]
    pub fn rotation(&self) -> Rotation3 {
        self.quaternion().to_rotation_matrix()
    }
}
