use std::f64::consts::PI;
use std::fmt;

use crate::crystal::Orientation;
use crate::math::{Point3, Rotation3};
use crate::shape::ShapeClass;

/// Identity of a grain. `GrainId::NONE` (zero) marks an unassigned voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GrainId(u32);

impl GrainId {
    /// The reserved "unassigned" identity.
    pub const NONE: Self = Self(0);

    /// Wraps a raw identity.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw integer identity.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Identity as a vector index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for [`GrainId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A grain (or precipitate) descriptor.
///
/// Grains own no voxels; ownership is read from the voxel grid.
#[derive(Debug, Clone)]
pub struct Grain {
    /// Identity, assigned by the [`GrainStore`](super::GrainStore).
    pub id: GrainId,
    /// Center in physical coordinates.
    pub centroid: Point3,
    /// Equivalent-sphere diameter in physical units.
    pub equivalent_diameter: f64,
    /// Semi-axis radii `(a, b, c)` with `a >= b >= c`.
    pub radii: [f64; 3],
    /// Orientation of the principal axes; columns of its rotation are the
    /// `a`, `b`, `c` directions.
    pub axes: Orientation,
    /// Shape family of the grain.
    pub shape: ShapeClass,
    /// Family-specific shape factor in `(0, 1]`.
    pub shape_factor: f64,
    /// Crystallographic orientation.
    pub orientation: Orientation,
    /// Phase identity.
    pub phase: u8,
    /// Size-distribution bin the diameter falls in.
    pub size_bin: usize,
    /// Identities of face-adjacent grains, ascending.
    pub neighbors: Vec<GrainId>,
    /// `false` while only sampled, `true` once packed into the structure.
    pub active: bool,
}

impl Grain {
    /// Equivalent-sphere volume `pi/6 * d^3`.
    #[must_use]
    pub fn volume(&self) -> f64 {
        PI / 6.0 * self.equivalent_diameter.powi(3)
    }

    /// Equivalent-sphere radius.
    #[must_use]
    pub fn equivalent_radius(&self) -> f64 {
        self.equivalent_diameter / 2.0
    }

    /// Radius of a sphere around the centroid that encloses the shape.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        self.radii[0] * self.shape.reach()
    }

    /// Number of neighbors recorded on the grain.
    #[must_use]
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Normalized shape distance of `point` using a precomputed inverse
    /// axis rotation; inside iff `<= 1`.
    #[must_use]
    pub fn normalized_distance_with(&self, inverse_axes: &Rotation3, point: &Point3) -> f64 {
        let local = inverse_axes * (point - self.centroid);
        self.shape.normalized_distance(
            [
                local.x / self.radii[0],
                local.y / self.radii[1],
                local.z / self.radii[2],
            ],
            self.shape_factor,
        )
    }

    /// Normalized shape distance of `point` from the grain center.
    #[must_use]
    pub fn normalized_distance(&self, point: &Point3) -> f64 {
        self.normalized_distance_with(&self.axes.rotation().inverse(), point)
    }
}
