//! Intersection solvers and angle helpers.
//!
//! Everything here is a pure function of its arguments.

#![allow(non_snake_case)]
use nalgebra::{Vector2, Vector3};

use crate::error::IntersectionError;
use crate::{Float, lit};

/// Maximum number of Newton-Raphson iterations per seed.
const NEWTON_MAX_ITER: usize = 10;
/// Convergence on the helix phase, micron level at typical radii.
const NEWTON_TOLERANCE: f64 = 1e-6;
/// Derivative magnitude below which a Newton step is abandoned.
const NEWTON_MIN_DERIVATIVE: f64 = 1e-8;
/// Slack on the tile acceptance in phi (rad) and z (cm).
const ACCEPTANCE_TOLERANCE: f64 = 1e-4;
/// Maximum distance between the converged point and the tile plane.
const PLANE_RESIDUAL: f64 = 0.05;
/// Below this `|n.v|` a line is considered parallel to a plane.
const PARALLEL_THRESHOLD: f64 = 1e-6;

/// Wrap `phi` into `[0, 2pi)`.
pub fn normalize_angle<F: Float>(phi: F) -> F {
    let two_pi = F::two_pi();
    let mut phi = phi % two_pi;
    if phi < F::zero() {
        phi += two_pi;
    }
    if phi >= two_pi {
        phi -= two_pi;
    }
    phi
}

/// Check whether `phi` lies in `[min, max]`, where the range may wrap around `2pi`
/// (`min > max` after normalization, e.g. `[350°, 10°]`).
pub fn phi_in_range<F: Float>(phi: F, min: F, max: F) -> bool {
    let phi = normalize_angle(phi);
    let min = normalize_angle(min);
    let max = normalize_angle(max);
    if min < max {
        phi >= min && phi <= max
    } else {
        phi >= min || phi <= max
    }
}

/// Signed difference `a - b` wrapped into `[-pi, pi)`.
pub fn delta_phi<F: Float>(a: F, b: F) -> F {
    let d = normalize_angle(a - b);
    if d >= F::pi() { d - F::two_pi() } else { d }
}

/// Intersect the line `origin + t * direction` with the plane `(p - plane_point).plane_normal = 0`.
///
/// # Errors
/// [`IntersectionError::Parallel`] if `|plane_normal . direction| < 1e-6`.
pub fn line_plane_intersection<F: Float>(
    origin: &Vector3<F>,
    direction: &Vector3<F>,
    plane_point: &Vector3<F>,
    plane_normal: &Vector3<F>,
) -> Result<Vector3<F>, IntersectionError> {
    let denom = plane_normal.dot(direction);
    if denom.abs() < lit(PARALLEL_THRESHOLD) {
        return Err(IntersectionError::Parallel);
    }

    let t = plane_normal.dot(&(plane_point - origin)) / denom;
    Ok(origin + direction * t)
}

/// Intersect a helix with a tile plane.
///
/// The helix is parameterized by its phase `t` around the transverse circle center:
/// `p(t) = (X0 + R cos t, Y0 + R sin t, rz_slope * rho(t) + rz_intercept)`,
/// where `rho(t)` is the transverse radius of the point.
/// Substituting into the plane equation leaves the scalar equation
/// `nx R cos t + ny R sin t + nz rz_slope rho(t) + C = 0`,
/// with `C = nx (X0 - x0) + ny (Y0 - y0) + nz (rz_intercept - z0)`,
/// which is solved with Newton-Raphson.
///
/// The equation usually has two roots on a turn, so three seeds spaced by `2pi/3` are tried,
/// starting with the phase facing the tile center.
/// The seeds are phases around the circle center and not azimuths around the beam axis,
/// which only coincide for circles centered on the axis.
/// A converged root is accepted only if its azimuth is in `[phi_min, phi_max]`,
/// its z in `[z_min, z_max]` (both with a `1e-4` slack), and it lies within `0.05` of the plane.
///
/// # Errors
/// [`IntersectionError::NoSolution`] if no seed yields an accepted root.
#[allow(clippy::too_many_arguments)]
pub fn helix_plane_intersection<F: Float>(
    phi_min: F,
    phi_max: F,
    z_min: F,
    z_max: F,
    R: F,
    X0: F,
    Y0: F,
    rz_intercept: F,
    rz_slope: F,
    plane_point: &Vector3<F>,
    plane_normal: &Vector3<F>,
) -> Result<Vector3<F>, IntersectionError> {
    let n = plane_normal;
    let C = n.x * (X0 - plane_point.x) + n.y * (Y0 - plane_point.y) + n.z * (rz_intercept - plane_point.z);

    let rho = |t: F| {
        let x = X0 + R * t.cos();
        let y = Y0 + R * t.sin();
        (x * x + y * y).sqrt()
    };
    let f = |t: F| n.x * R * t.cos() + n.y * R * t.sin() + n.z * rz_slope * rho(t) + C;
    let df = |t: F| {
        -n.x * R * t.sin()
            + n.y * R * t.cos()
            + n.z * R * rz_slope * (Y0 * t.cos() - X0 * t.sin()) / rho(t)
    };

    let slack: F = lit(ACCEPTANCE_TOLERANCE);
    let accept = |point: &Vector3<F>| {
        let phi_ok = phi_in_range(point.y.atan2(point.x), phi_min - slack, phi_max + slack);
        let z_ok = point.z >= z_min - slack && point.z <= z_max + slack;
        let plane_ok = n.dot(&(point - plane_point)).abs() <= lit(PLANE_RESIDUAL);
        phi_ok && z_ok && plane_ok
    };

    let solve_from = |seed: F| -> Option<Vector3<F>> {
        let mut t = seed;
        for _ in 0..NEWTON_MAX_ITER {
            let dft = df(t);
            if dft.abs() < lit(NEWTON_MIN_DERIVATIVE) {
                return None;
            }
            let t_new = t - f(t) / dft;

            let x = X0 + R * t_new.cos();
            let y = Y0 + R * t_new.sin();
            let z = rz_slope * (x * x + y * y).sqrt() + rz_intercept;
            let candidate = Vector3::new(x, y, z);

            if (t_new - t).abs() < lit(NEWTON_TOLERANCE) && accept(&candidate) {
                return Some(candidate);
            }
            t = t_new;
        }
        None
    };

    let t_center = (plane_point.y - Y0).atan2(plane_point.x - X0);
    let delta = F::two_pi() / lit(3.);
    (0..3)
        .map(|i| t_center + delta * lit(i as f64))
        .find_map(solve_from)
        .ok_or(IntersectionError::NoSolution)
}

/// Intersect the transverse line `y = slope * x + intercept` with the trace of a tile plane,
/// i.e. the line through `(x0, y0)` with normal `(normal_x, normal_y)`.
///
/// A tile with `normal_y == 0` is vertical and handled separately: the result has `x == x0`.
///
/// # Errors
/// [`IntersectionError::Parallel`] if `normal_x + normal_y * slope == 0`.
pub fn line_line_intersection<F: Float>(
    slope: F,
    intercept: F,
    x0: F,
    y0: F,
    normal_x: F,
    normal_y: F,
) -> Result<Vector2<F>, IntersectionError> {
    if normal_y == F::zero() {
        return Ok(Vector2::new(x0, slope * x0 + intercept));
    }

    let denom = normal_x + normal_y * slope;
    if denom == F::zero() {
        return Err(IntersectionError::Parallel);
    }

    let x = (normal_x * x0 + normal_y * y0 - normal_y * intercept) / denom;
    Ok(Vector2::new(x, slope * x + intercept))
}
