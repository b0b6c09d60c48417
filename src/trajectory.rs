//! Fitted trajectory models used to project seeds onto strip tiles.
//!
//! The transverse projection is either a straight line (zero field) or a circle (helix),
//! and z is linear in the transverse radius in both cases.

#![allow(non_snake_case)]
use nalgebra::{Vector2, Vector3};

use crate::error::IntersectionError;
use crate::fit::{
    circle_circle_intersection, circle_fit_taubin, line_circle_intersection, line_fit_rz,
    line_fit_xy,
};
use crate::geometry::{
    delta_phi, helix_plane_intersection, line_line_intersection, line_plane_intersection,
};
use crate::layer::Tile;
use crate::{Float, lit};

/// Slack on the tile z bounds.
const Z_TOLERANCE: f64 = 1e-4;

/// Longitudinal model `z = slope * r + intercept`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RzLine<F: Float> {
    /// `dz/dr`.
    pub slope: F,
    /// z at `r = 0`.
    pub intercept: F,
}

impl<F: Float> RzLine<F> {
    /// z at transverse radius `r`.
    pub fn z(&self, r: F) -> F {
        self.slope * r + self.intercept
    }
}

/// Transverse trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transverse<F: Float> {
    /// Zero-field straight line `y = slope * x + intercept`.
    Line {
        /// `dy/dx`.
        slope: F,
        /// y at `x = 0`.
        intercept: F,
    },
    /// Circle of radius `R` centered at `(X0, Y0)`.
    Circle {
        /// Radius.
        R: F,
        /// Center x.
        X0: F,
        /// Center y.
        Y0: F,
    },
}

/// Full trajectory model of a seed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackModel<F: Float> {
    /// Transverse projection.
    pub transverse: Transverse<F>,
    /// Longitudinal projection.
    pub rz: RzLine<F>,
}

impl<F: Float> TrackModel<F> {
    /// Fit a straight-line model: transverse line to `xy_points`, r-z line to `rz_points`.
    pub fn fit_line(xy_points: &[Vector3<F>], rz_points: &[Vector3<F>]) -> Self {
        let (slope, intercept) = line_fit_xy(xy_points);
        Self {
            transverse: Transverse::Line { slope, intercept },
            rz: Self::fit_rz(rz_points),
        }
    }

    /// Fit a helix model: transverse circle to `xy_points`, r-z line to `rz_points`.
    pub fn fit_helix(xy_points: &[Vector3<F>], rz_points: &[Vector3<F>]) -> Self {
        let (R, X0, Y0) = circle_fit_taubin(xy_points);
        Self {
            transverse: Transverse::Circle { R, X0, Y0 },
            rz: Self::fit_rz(rz_points),
        }
    }

    fn fit_rz(points: &[Vector3<F>]) -> RzLine<F> {
        let (slope, intercept) = line_fit_rz(points);
        RzLine { slope, intercept }
    }

    /// Whether all parameters are finite.
    pub fn is_finite(&self) -> bool {
        let transverse = match self.transverse {
            Transverse::Line { slope, intercept } => slope.is_finite() && intercept.is_finite(),
            Transverse::Circle { R, X0, Y0 } => R.is_finite() && X0.is_finite() && Y0.is_finite(),
        };
        transverse && self.rz.slope.is_finite() && self.rz.intercept.is_finite()
    }

    /// Both transverse crossings with the cylinder of `radius`, if any.
    pub fn cylinder_crossings(&self, radius: F) -> Option<[Vector2<F>; 2]> {
        match self.transverse {
            Transverse::Line { slope, intercept } => line_circle_intersection(radius, slope, intercept),
            Transverse::Circle { R, X0, Y0 } => circle_circle_intersection(radius, R, X0, Y0),
        }
    }

    /// Crossing with the cylinder of `radius` whose azimuth is closest to `reference_phi`,
    /// as a 3-D point.
    pub fn project_to_cylinder(&self, radius: F, reference_phi: F) -> Option<Vector3<F>> {
        let [plus, minus] = self.cylinder_crossings(radius)?;
        let phi_plus = plus.y.atan2(plus.x);
        let phi_minus = minus.y.atan2(minus.x);
        let phi = if delta_phi(reference_phi, phi_plus).abs() < delta_phi(reference_phi, phi_minus).abs() {
            phi_plus
        } else {
            phi_minus
        };
        Some(Vector3::new(
            radius * phi.cos(),
            radius * phi.sin(),
            self.rz.z(radius),
        ))
    }

    /// Precise intersection with the plane of `tile`.
    ///
    /// # Errors
    /// - [`IntersectionError::Parallel`] if the straight line does not cross the tile plane.
    /// - [`IntersectionError::NoSolution`] if the intersection falls outside the tile z range,
    ///   or if the helix solver finds no root inside the tile acceptance.
    pub fn intersect_tile(&self, tile: &Tile<F>) -> Result<Vector3<F>, IntersectionError> {
        let center = tile.center();
        let normal = tile.normal();
        let (z_min, z_max) = tile.z_range();

        match self.transverse {
            Transverse::Line { slope, intercept } => {
                // point where the transverse line crosses the trace of the tile plane
                let p = line_line_intersection(slope, intercept, center.x, center.y, normal.x, normal.y)?;
                let r = p.norm();
                let origin = Vector3::new(p.x, p.y, self.rz.z(r));

                // local direction, parameterized by x
                let dr_dx = (p.x + p.y * slope) / r;
                let direction = Vector3::new(F::one(), slope, self.rz.slope * dr_dx).normalize();

                let intersection = line_plane_intersection(&origin, &direction, center, normal)?;
                if !tile.contains_z(intersection.z, lit(Z_TOLERANCE)) {
                    return Err(IntersectionError::NoSolution);
                }
                Ok(intersection)
            }
            Transverse::Circle { R, X0, Y0 } => {
                let (phi_min, phi_max) = tile.phi_range();
                helix_plane_intersection(
                    phi_min,
                    phi_max,
                    z_min,
                    z_max,
                    R,
                    X0,
                    Y0,
                    self.rz.intercept,
                    self.rz.slope,
                    center,
                    normal,
                )
            }
        }
    }
}
