pub mod special;

/// 3D point type.
pub type Point3 = nalgebra::Point3<f64>;

/// 3D vector type.
pub type Vector3 = nalgebra::Vector3<f64>;

/// 3x3 rotation matrix type.
pub type Rotation3 = nalgebra::Rotation3<f64>;

/// Unit quaternion type used for crystal orientations.
pub type UnitQuaternion = nalgebra::UnitQuaternion<f64>;
