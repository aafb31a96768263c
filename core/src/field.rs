//! Forward magnetic field models for a uniformly magnetized rectangular magnet.
//!
//! This module computes the magnetic flux density produced by the tracked magnet at an arbitrary
//! sensor location. Two models are provided:
//!
//! - [`cuboid_field`]: the analytic closed-form field of a uniformly magnetized rectangular
//!   block, following R. Engel-Herbert and T. Hesjedal, _Calculation of the magnetic stray field
//!   of a uniaxial magnetic domain_, J. Appl. Phys. 97, 074504 (2005). This is the primary model:
//!   jaw-tracking distances (5-15 mm) are comparable to the magnet size (5 x 5 x 2 mm), so
//!   near-field fidelity matters.
//! - [`dipole_field`]: the point-dipole approximation. Only valid a few magnet-lengths away; kept
//!   as a documented simplification and used to cross-check the cuboid solution in the far field.
//!
//! Both functions are deterministic, side-effect free, and return a bounded result for every
//! input: observation points inside (or within numerical reach of) the magnet volume are clamped
//! to the block's bounding sphere before evaluation rather than being allowed to diverge. Whether
//! a point is interior can be checked separately with [`is_interior`].
//!
//! The closed form is derived for magnetization along +z; an arbitrary magnetization vector is
//! handled by superposing the three axis-aligned contributions under cyclic coordinate
//! permutations (cyclic permutations are proper rotations, so the z-form applies unchanged).

use nalgebra::Vector3;

use crate::{MagnetModel, VACUUM_PERMEABILITY};

/// Floor for the logarithm arguments in the closed form. The `ln(v + r)` terms vanish only on
/// the zero-measure edge lines of the block; clamping keeps the result finite there.
const LOG_FLOOR: f64 = 1e-12;

/// Returns true when the sensor position falls inside the magnet volume (inclusive of faces).
pub fn is_interior(
    magnet: &MagnetModel,
    magnet_position: &Vector3<f64>,
    sensor_position: &Vector3<f64>,
) -> bool {
    let relative = sensor_position - magnet_position;
    let half = 0.5 * magnet.dimensions;
    relative.x.abs() <= half.x && relative.y.abs() <= half.y && relative.z.abs() <= half.z
}

/// Magnetic flux density (tesla) of a uniformly magnetized rectangular magnet.
///
/// `magnet_position` is the block's center and `sensor_position` the observation point, both in
/// the same reference frame. The magnetization direction is fixed by `magnet.magnetization`;
/// only the translation varies during tracking.
///
/// Observation points closer to the magnet center than its bounding-sphere radius are clamped
/// onto that sphere (along the observation direction, or +z when the point coincides with the
/// center) so the returned vector is always finite. Callers that need to distinguish interior
/// queries should use [`is_interior`].
pub fn cuboid_field(
    magnet: &MagnetModel,
    magnet_position: &Vector3<f64>,
    sensor_position: &Vector3<f64>,
) -> Vector3<f64> {
    let relative = clamp_to_bounding_sphere(magnet, &(sensor_position - magnet_position));
    let half = 0.5 * magnet.dimensions;

    let mut h = Vector3::zeros();
    // Superpose the three axis-aligned magnetization components. Each cyclic permutation maps
    // the magnetized axis onto z, evaluates the z-form, and maps the result back.
    if magnet.magnetization.z != 0.0 {
        h += h_field_z_magnetized(magnet.magnetization.z, &half, &relative);
    }
    if magnet.magnetization.x != 0.0 {
        // (x, y, z) -> (y, z, x): magnetized axis x becomes the local z.
        let permuted_half = Vector3::new(half.y, half.z, half.x);
        let permuted_point = Vector3::new(relative.y, relative.z, relative.x);
        let local = h_field_z_magnetized(magnet.magnetization.x, &permuted_half, &permuted_point);
        h += Vector3::new(local.z, local.x, local.y);
    }
    if magnet.magnetization.y != 0.0 {
        // (x, y, z) -> (z, x, y): magnetized axis y becomes the local z.
        let permuted_half = Vector3::new(half.z, half.x, half.y);
        let permuted_point = Vector3::new(relative.z, relative.x, relative.y);
        let local = h_field_z_magnetized(magnet.magnetization.y, &permuted_half, &permuted_point);
        h += Vector3::new(local.y, local.z, local.x);
    }
    VACUUM_PERMEABILITY * h
}

/// Point-dipole flux density (tesla) with the magnet's total moment concentrated at its center.
///
/// Documented simplification: accurate only beyond a few magnet-lengths. The same
/// bounding-sphere clamp as [`cuboid_field`] keeps the result finite everywhere.
pub fn dipole_field(
    magnet: &MagnetModel,
    magnet_position: &Vector3<f64>,
    sensor_position: &Vector3<f64>,
) -> Vector3<f64> {
    let relative = clamp_to_bounding_sphere(magnet, &(sensor_position - magnet_position));
    let moment = magnet.moment();
    let distance = relative.norm();
    let unit = relative / distance;
    (VACUUM_PERMEABILITY / (4.0 * std::f64::consts::PI))
        * (3.0 * unit * moment.dot(&unit) - moment)
        / distance.powi(3)
}

/// Push observation points out of the singular region: anything closer to the magnet center
/// than the bounding-sphere radius is evaluated on the sphere instead.
fn clamp_to_bounding_sphere(magnet: &MagnetModel, relative: &Vector3<f64>) -> Vector3<f64> {
    let radius = magnet.bounding_radius();
    let distance = relative.norm();
    if distance >= radius {
        return *relative;
    }
    if distance < 1e-12 {
        // Observation at the exact center has no direction; evaluate above the top face.
        return Vector3::new(0.0, 0.0, radius);
    }
    relative * (radius / distance)
}

/// H field (A/m) of a block magnetized along +z with the given magnetization magnitude,
/// half-dimensions, and observation point relative to the block center.
///
/// Closed form via the equivalent surface-charge model: the two z faces carry charge density
/// ±M, and the field is a signed sum over the eight corner terms. The vertical component uses
/// the atan2 solid-angle form, which stays on the correct branch on both sides of each face.
fn h_field_z_magnetized(
    magnetization: f64,
    half: &Vector3<f64>,
    point: &Vector3<f64>,
) -> Vector3<f64> {
    let u = [point.x - half.x, point.x + half.x];
    let v = [point.y - half.y, point.y + half.y];
    let w = [point.z - half.z, point.z + half.z];
    let signs = [-1.0, 1.0];

    let mut hx = 0.0;
    let mut hy = 0.0;
    let mut hz = 0.0;
    for i in 0..2 {
        for j in 0..2 {
            for k in 0..2 {
                let sign = signs[i] * signs[j] * signs[k];
                let r = (u[i] * u[i] + v[j] * v[j] + w[k] * w[k]).sqrt();
                hx += sign * (v[j] + r).max(LOG_FLOOR).ln();
                hy += sign * (u[i] + r).max(LOG_FLOOR).ln();
                hz -= sign * f64::atan2(u[i] * v[j], w[k] * r);
            }
        }
    }
    (magnetization / (4.0 * std::f64::consts::PI)) * Vector3::new(hx, hy, hz)
}
