//! Analytic propagation of track states in a uniform solenoidal field.
//!
//! States are propagated along their transverse path length `s`:
//! the transverse projection is a circle of signed curvature
//! `omega = -q * Bz * k / pT` (`k = 0.299792458e-2 GeV/(T cm)`), degenerating to a straight
//! line for neutral tracks or a zero field, and z advances by `s * pz / pT`.

use std::cmp::Ordering;

use nalgebra::{Vector2, Vector3};

use crate::error::PropagationError;
use crate::fit::circle_circle_intersection;
use crate::geometry::delta_phi;
use crate::{Float, lit};

/// Curvature per unit field and charge, in GeV / (T cm).
const CURVATURE_CONSTANT: f64 = 0.299792458e-2;
/// Below this curvature (1/cm) a trajectory is propagated as a straight line.
const STRAIGHT_CURVATURE: f64 = 1e-12;

/// Position and momentum of a charged track at some point of its trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackState<F: Float> {
    /// Position.
    pub position: Vector3<F>,
    /// Momentum.
    pub momentum: Vector3<F>,
    /// Charge in units of `e`.
    pub charge: i8,
}

impl<F: Float> TrackState<F> {
    /// Create a state.
    pub fn new(position: Vector3<F>, momentum: Vector3<F>, charge: i8) -> Self {
        Self {
            position,
            momentum,
            charge,
        }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> F {
        self.momentum.xy().norm()
    }

    /// Azimuth of the momentum.
    pub fn phi(&self) -> F {
        self.momentum.y.atan2(self.momentum.x)
    }
}

/// Propagator for a uniform field along the beam axis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Propagator<F: Float> {
    bz: F,
}

impl<F: Float> Propagator<F> {
    /// Propagator in a field of `bz` Tesla.
    pub fn new(bz: F) -> Self {
        Self { bz }
    }

    /// Propagator without magnetic field.
    pub fn zero_field() -> Self {
        Self { bz: F::zero() }
    }

    /// Field along the beam axis.
    pub fn bz(&self) -> F {
        self.bz
    }

    /// Signed transverse curvature of a state, or zero for straight propagation.
    fn curvature(&self, state: &TrackState<F>) -> F {
        let omega = -self.bz * lit(f64::from(state.charge) * CURVATURE_CONSTANT) / state.pt();
        if omega.abs() < lit(STRAIGHT_CURVATURE) {
            F::zero()
        } else {
            omega
        }
    }

    fn check(state: &TrackState<F>) -> Result<(), PropagationError> {
        let pt = state.pt();
        if pt == F::zero() || !pt.is_finite() || !state.position.iter().all(|x| x.is_finite()) {
            return Err(PropagationError::Degenerate);
        }
        Ok(())
    }

    /// Center of the transverse circle of a curved state.
    fn center(state: &TrackState<F>, omega: F) -> Vector2<F> {
        let phi0 = state.phi();
        Vector2::new(
            state.position.x - phi0.sin() / omega,
            state.position.y + phi0.cos() / omega,
        )
    }

    /// Transverse path length from `state` to a point on its transverse circle.
    fn path_to(state: &TrackState<F>, omega: F, center: &Vector2<F>, point: &Vector2<F>) -> F {
        let phi = (omega * (point.x - center.x)).atan2(-omega * (point.y - center.y));
        delta_phi(phi, state.phi()) / omega
    }

    /// State after a transverse path length `s` (negative to go backwards).
    ///
    /// # Errors
    /// [`PropagationError::Degenerate`] for states without transverse momentum.
    pub fn step(&self, state: &TrackState<F>, s: F) -> Result<TrackState<F>, PropagationError> {
        Self::check(state)?;
        let pt = state.pt();
        let phi0 = state.phi();
        let omega = self.curvature(state);
        let p0 = &state.position;

        let (x, y, phi) = if omega == F::zero() {
            (p0.x + s * phi0.cos(), p0.y + s * phi0.sin(), phi0)
        } else {
            let phi = phi0 + omega * s;
            (
                p0.x + (phi.sin() - phi0.sin()) / omega,
                p0.y - (phi.cos() - phi0.cos()) / omega,
                phi,
            )
        };
        let z = p0.z + s * state.momentum.z / pt;

        Ok(TrackState {
            position: Vector3::new(x, y, z),
            momentum: Vector3::new(pt * phi.cos(), pt * phi.sin(), state.momentum.z),
            charge: state.charge,
        })
    }

    /// Propagate to the cylinder of `radius` around the beam axis.
    ///
    /// The closest crossing ahead of the state is preferred; if the trajectory only crossed
    /// the cylinder behind the state, the closest crossing behind is used.
    ///
    /// # Errors
    /// - [`PropagationError::Unreachable`] if the trajectory never reaches `radius`.
    /// - [`PropagationError::Degenerate`] for states without transverse momentum.
    pub fn to_cylinder(
        &self,
        state: &TrackState<F>,
        radius: F,
    ) -> Result<TrackState<F>, PropagationError> {
        Self::check(state)?;
        let omega = self.curvature(state);

        let paths: [F; 2] = if omega == F::zero() {
            // p0 + s u with |u| = 1 on the circle
            let phi0 = state.phi();
            let u = Vector2::new(phi0.cos(), phi0.sin());
            let p0 = state.position.xy();
            let b = p0.dot(&u);
            let discriminant = b * b - p0.norm_squared() + radius * radius;
            if discriminant < F::zero() {
                return Err(PropagationError::Unreachable);
            }
            let sqrt = discriminant.sqrt();
            [-b + sqrt, -b - sqrt]
        } else {
            let center = Self::center(state, omega);
            let rho = F::one() / omega.abs();
            let crossings = circle_circle_intersection(radius, rho, center.x, center.y)
                .ok_or(PropagationError::Unreachable)?;
            crossings.map(|p| Self::path_to(state, omega, &center, &p))
        };

        let s = paths
            .into_iter()
            .min_by(|a, b| {
                let behind = (*a < F::zero()).cmp(&(*b < F::zero()));
                behind.then(a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal))
            })
            .ok_or(PropagationError::Unreachable)?;
        self.step(state, s)
    }

    /// Propagate to the point of closest approach to `point`.
    ///
    /// For curved tracks the approach is computed in the transverse plane, on the nearest turn,
    /// and z follows the helix pitch. Straight tracks use the full 3-D closest approach.
    ///
    /// # Errors
    /// [`PropagationError::Degenerate`] for states without transverse momentum, or when `point`
    /// sits on the axis of the helix.
    pub fn to_point(
        &self,
        state: &TrackState<F>,
        point: &Vector3<F>,
    ) -> Result<TrackState<F>, PropagationError> {
        Self::check(state)?;
        let omega = self.curvature(state);

        let s = if omega == F::zero() {
            let p = state.momentum.norm();
            let t = (point - state.position).dot(&state.momentum) / p;
            t * state.pt() / p
        } else {
            let center = Self::center(state, omega);
            let v = point.xy() - center;
            let distance = v.norm();
            if distance == F::zero() {
                return Err(PropagationError::Degenerate);
            }
            let closest = center + v * (F::one() / (omega.abs() * distance));
            Self::path_to(state, omega, &center, &closest)
        };
        self.step(state, s)
    }
}
