//! Conversions between engine units and Rapier (SI) units
//!
//! The engine measures lengths in units of 2.5cm; Rapier works in meters.
//! Normals and rotations are unit-free and only change representation.

use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude as rapier;

/// Meters per engine length unit.
// TODO: read the ratio from the engine's world scale once it exposes one
pub const LENGTH_SCALE: f32 = 0.025;

/// Convert an engine length to a Rapier length
#[inline]
pub fn to_foreign_length(x: f32) -> f32 {
    x * LENGTH_SCALE
}

/// Convert a Rapier length to an engine length
#[inline]
pub fn from_foreign_length(x: f32) -> f32 {
    x / LENGTH_SCALE
}

/// Convert an engine vector (position, extent, velocity) to Rapier
#[inline]
pub fn to_foreign_vector(v: [f32; 3]) -> rapier::Vector<f32> {
    rapier::Vector::new(
        to_foreign_length(v[0]),
        to_foreign_length(v[1]),
        to_foreign_length(v[2]),
    )
}

/// Convert a Rapier vector back to engine units
#[inline]
pub fn from_foreign_vector(v: &rapier::Vector<f32>) -> [f32; 3] {
    [
        from_foreign_length(v.x),
        from_foreign_length(v.y),
        from_foreign_length(v.z),
    ]
}

/// Convert an engine position to a Rapier point
#[inline]
pub fn to_foreign_point(p: [f32; 3]) -> rapier::Point<f32> {
    rapier::Point::from(to_foreign_vector(p))
}

/// Convert a Rapier point back to engine units
#[inline]
pub fn from_foreign_point(p: &rapier::Point<f32>) -> [f32; 3] {
    from_foreign_vector(&p.coords)
}

/// Convert a direction to Rapier. The result is unit length and never scaled.
///
/// A zero (or non-finite) input yields +Y.
pub fn to_foreign_normal(n: [f32; 3]) -> rapier::Vector<f32> {
    let v = rapier::Vector::new(n[0], n[1], n[2]);
    let len = v.norm();
    if len > f32::EPSILON && len.is_finite() {
        v / len
    } else {
        rapier::Vector::y()
    }
}

/// Convert a Rapier direction back to the engine
pub fn from_foreign_normal(n: &rapier::Vector<f32>) -> [f32; 3] {
    let len = n.norm();
    if len > f32::EPSILON && len.is_finite() {
        [n.x / len, n.y / len, n.z / len]
    } else {
        [0.0, 1.0, 0.0]
    }
}

/// Convert an engine quaternion (x, y, z, w) to Rapier
#[inline]
pub fn to_foreign_rotation(q: [f32; 4]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

/// Convert a Rapier rotation to an engine quaternion (x, y, z, w)
#[inline]
pub fn from_foreign_rotation(q: &UnitQuaternion<f32>) -> [f32; 4] {
    [q.i, q.j, q.k, q.w]
}

/// Build a Rapier isometry from an engine position and rotation
pub fn to_foreign_isometry(position: [f32; 3], rotation: [f32; 4]) -> rapier::Isometry<f32> {
    rapier::Isometry::from_parts(
        rapier::Translation::from(to_foreign_vector(position)),
        to_foreign_rotation(rotation),
    )
}
