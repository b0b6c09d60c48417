//! Transverse circle/line fits, r-z line fit and circle intersections.
//!
//! Degenerate input (too few points, collinear points for a circle) produces non-finite
//! parameters rather than an error; callers check [`nalgebra::ComplexField::is_finite`].

#![allow(non_snake_case)]
use nalgebra::{Vector2, Vector3};

use crate::{Float, lit};

/// Maximum Newton iterations on the Taubin characteristic polynomial.
const TAUBIN_MAX_ITER: usize = 99;

/// Least-squares fit of `(u, v)` pairs to `v = slope * u + intercept`.
fn linear_fit<F: Float>(points: impl Iterator<Item = (F, F)>) -> (F, F) {
    let mut n = F::zero();
    let (mut su, mut sv, mut suu, mut suv) = (F::zero(), F::zero(), F::zero(), F::zero());
    for (u, v) in points {
        n += F::one();
        su += u;
        sv += v;
        suu += u * u;
        suv += u * v;
    }
    let denom = n * suu - su * su;
    let slope = (n * suv - su * sv) / denom;
    let intercept = (sv - slope * su) / n;
    (slope, intercept)
}

/// Fit `z = slope * r + intercept`, with `r` the transverse radius of each point.
pub fn line_fit_rz<F: Float>(points: &[Vector3<F>]) -> (F, F) {
    linear_fit(points.iter().map(|p| ((p.x * p.x + p.y * p.y).sqrt(), p.z)))
}

/// Fit the transverse projection to `y = slope * x + intercept`.
pub fn line_fit_xy<F: Float>(points: &[Vector3<F>]) -> (F, F) {
    linear_fit(points.iter().map(|p| (p.x, p.y)))
}

/// Taubin algebraic circle fit of the transverse projection.
///
/// Returns `(R, X0, Y0)`. Exact for points lying on a circle.
pub fn circle_fit_taubin<F: Float>(points: &[Vector3<F>]) -> (F, F, F) {
    let n: F = lit(points.len() as f64);
    let mean_x = points.iter().fold(F::zero(), |acc, p| acc + p.x) / n;
    let mean_y = points.iter().fold(F::zero(), |acc, p| acc + p.y) / n;

    let (mut Mxx, mut Myy, mut Mxy, mut Mxz, mut Myz, mut Mzz) =
        (F::zero(), F::zero(), F::zero(), F::zero(), F::zero(), F::zero());
    for p in points {
        let Xi = p.x - mean_x;
        let Yi = p.y - mean_y;
        let Zi = Xi * Xi + Yi * Yi;
        Mxy += Xi * Yi;
        Mxx += Xi * Xi;
        Myy += Yi * Yi;
        Mxz += Xi * Zi;
        Myz += Yi * Zi;
        Mzz += Zi * Zi;
    }
    Mxx /= n;
    Myy /= n;
    Mxy /= n;
    Mxz /= n;
    Myz /= n;
    Mzz /= n;

    // coefficients of the characteristic polynomial
    let Mz = Mxx + Myy;
    let cov_xy = Mxx * Myy - Mxy * Mxy;
    let var_z = Mzz - Mz * Mz;
    let A3: F = Mz * lit(4.);
    let A2 = -Mz * Mz * lit(3.) - Mzz;
    let A1 = var_z * Mz + cov_xy * Mz * lit(4.) - Mxz * Mxz - Myz * Myz;
    let A0 = Mxz * (Mxz * Myy - Myz * Mxy) + Myz * (Myz * Mxx - Mxz * Mxy) - var_z * cov_xy;
    let A22 = A2 + A2;
    let A33 = A3 + A3 + A3;

    // Newton from x = 0 is guaranteed to converge to the right root
    let mut x = F::zero();
    let mut y = A0;
    for _ in 0..TAUBIN_MAX_ITER {
        let Dy = A1 + x * (A22 + A33 * x);
        let x_new = x - y / Dy;
        if x_new == x || !x_new.is_finite() {
            break;
        }
        let y_new = A0 + x_new * (A1 + x_new * (A2 + x_new * A3));
        if y_new.abs() >= y.abs() {
            break;
        }
        x = x_new;
        y = y_new;
    }

    let det = x * x - x * Mz + cov_xy;
    let two: F = lit(2.);
    let X_center = (Mxz * (Myy - x) - Myz * Mxy) / det / two;
    let Y_center = (Myz * (Mxx - x) - Mxz * Mxy) / det / two;

    let R = (X_center * X_center + Y_center * Y_center + Mz).sqrt();
    (R, X_center + mean_x, Y_center + mean_y)
}

/// Intersect the circle of radius `r` centered on the beam axis with the line
/// `y = slope * x + intercept`.
///
/// Returns both solutions, or `None` if the line misses the circle.
pub fn line_circle_intersection<F: Float>(
    r: F,
    slope: F,
    intercept: F,
) -> Option<[Vector2<F>; 2]> {
    let a = F::one() + slope * slope;
    let b = slope * intercept * lit(2.);
    let c = intercept * intercept - r * r;
    let discriminant = b * b - a * c * lit(4.);
    if discriminant < F::zero() || !discriminant.is_finite() {
        return None;
    }

    let sqrt = discriminant.sqrt();
    let two_a = a * lit(2.);
    let x_plus = (-b + sqrt) / two_a;
    let x_minus = (-b - sqrt) / two_a;
    Some([
        Vector2::new(x_plus, slope * x_plus + intercept),
        Vector2::new(x_minus, slope * x_minus + intercept),
    ])
}

/// Intersect the circle of radius `r` centered on the beam axis with the circle of radius `R`
/// centered at `(X0, Y0)`.
///
/// Returns both solutions (equal when the circles touch), or `None` if they do not cross
/// or are concentric.
pub fn circle_circle_intersection<F: Float>(r: F, R: F, X0: F, Y0: F) -> Option<[Vector2<F>; 2]> {
    let d2 = X0 * X0 + Y0 * Y0;
    let d = d2.sqrt();
    if !d.is_finite() || !R.is_finite() || d == F::zero() {
        return None;
    }
    if d > r + R || d < (r - R).abs() {
        return None;
    }

    // distance from the origin to the chord, along the line of centers
    let a = (r * r - R * R + d2) / (d * lit(2.));
    let h = (r * r - a * a).max(F::zero()).sqrt();
    let ux = X0 / d;
    let uy = Y0 / d;
    let (px, py) = (ux * a, uy * a);
    Some([
        Vector2::new(px - uy * h, py + ux * h),
        Vector2::new(px + uy * h, py - ux * h),
    ])
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn rz_line() {
        let points = [
            Vector3::new(3., 4., 7.),
            Vector3::new(0., 10., 16.),
            Vector3::new(-12., 0., 20.),
        ];
        // r = 5, 10, 12
        let (slope, intercept) = line_fit_rz(&points[..2]);
        assert_abs_diff_eq!(slope, 1.8, epsilon = 1e-12);
        assert_abs_diff_eq!(intercept, -2., epsilon = 1e-12);

        let exact = [
            Vector3::new(3., 4., 7.),
            Vector3::new(0., 10., 17.),
            Vector3::new(-12., 0., 21.),
        ];
        let (slope, intercept) = line_fit_rz(&exact);
        assert_abs_diff_eq!(slope, 2., epsilon = 1e-12);
        assert_abs_diff_eq!(intercept, -3., epsilon = 1e-12);
        let (slope, _) = line_fit_rz(&points);
        assert!(slope < 2.);
    }

    #[test]
    fn xy_line() {
        let points: Vec<Vector3<f64>> = (1..6)
            .map(|i| Vector3::new(i as f64, 0.5 * i as f64 - 1., 0.))
            .collect();
        let (slope, intercept) = line_fit_xy(&points);
        assert_abs_diff_eq!(slope, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(intercept, -1., epsilon = 1e-12);

        let (slope, _) = line_fit_xy(&points[..1]);
        assert!(!slope.is_finite());
    }

    #[test]
    fn taubin_exact_circle() {
        let (R, X0, Y0) = (80., 12., -70.);
        let points: Vec<Vector3<f64>> = [0.3, 0.9, 1.4, 2.0]
            .iter()
            .map(|t: &f64| Vector3::new(X0 + R * t.cos(), Y0 + R * t.sin(), 0.))
            .collect();
        let (fit_R, fit_X0, fit_Y0) = circle_fit_taubin(&points);
        assert_abs_diff_eq!(fit_R, R, epsilon = 1e-6);
        assert_abs_diff_eq!(fit_X0, X0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit_Y0, Y0, epsilon = 1e-6);
    }

    #[test]
    fn taubin_collinear_is_not_finite() {
        let points: Vec<Vector3<f64>> = (0..4).map(|i| Vector3::new(i as f64, 2. * i as f64, 0.)).collect();
        let (R, _, _) = circle_fit_taubin(&points);
        assert!(!R.is_finite() || R > 1e6);
    }

    #[test]
    fn line_circle() {
        let [plus, minus] = line_circle_intersection(5., 0., 3.).unwrap();
        assert_abs_diff_eq!(plus, Vector2::new(4., 3.), epsilon = 1e-12);
        assert_abs_diff_eq!(minus, Vector2::new(-4., 3.), epsilon = 1e-12);
        assert!(line_circle_intersection(5., 0., 6.).is_none());
    }

    #[test]
    fn circle_circle() {
        // circle through the origin, centered at (80, 0)
        let solutions = circle_circle_intersection(85., 80., 80., 0.).unwrap();
        for s in solutions {
            assert_abs_diff_eq!(s.norm(), 85., epsilon = 1e-9);
            assert_abs_diff_eq!((s - Vector2::new(80., 0.)).norm(), 80., epsilon = 1e-9);
        }
        assert!(solutions[0].y > 0. && solutions[1].y < 0.);

        // concentric and disjoint circles
        assert!(circle_circle_intersection(85., 80., 0., 0.).is_none());
        assert!(circle_circle_intersection(85., 10., 20., 0.).is_none());
        assert!(circle_circle_intersection(85., f64::NAN, 20., 0.).is_none());
    }
}
