//! Two-track vertexing and invariant observables of two-body decay candidates.
//!
//! [`PairFinder`] selects tracks with [`PairCuts`], loops over all pairs,
//! finds the points of closest approach and produces one [`CandidateRecord`] per
//! accepted pair.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use log::{debug, trace};
use nalgebra::Vector3;
use serde::Serialize;

use crate::detector::{ClusterKey, Subsystem};
use crate::extrapolation::{Propagator, TrackState};
use crate::{Float, lit};

/// Charged pion mass in GeV.
pub const PION_MASS: f64 = 0.13957;
/// Pseudorapidity of a momentum along the beam axis.
const BEAM_AXIS_ETA: f64 = 1e10;
/// Relative tolerance on `|u x v|^2` below which two directions are parallel.
const PARALLEL_TOLERANCE: f64 = 1e-12;

/// A fitted track, as produced by the track fit.
#[derive(Clone, Debug)]
pub struct ReconstructedTrack<F: Float> {
    /// Track id.
    pub id: usize,
    /// Reference position of the fitted state.
    pub position: Vector3<F>,
    /// Momentum at the reference position.
    pub momentum: Vector3<F>,
    /// Charge in units of `e`.
    pub charge: i8,
    /// Fit quality (chi2 / ndf), lower is better.
    pub quality: F,
    /// Vertex the track is associated to.
    pub vertex_id: Option<usize>,
    cluster_keys: BTreeSet<ClusterKey>,
    state_keys: BTreeSet<ClusterKey>,
}

impl<F: Float> ReconstructedTrack<F> {
    /// Track without clusters, vertex or quality.
    pub fn new(id: usize, position: Vector3<F>, momentum: Vector3<F>, charge: i8) -> Self {
        Self {
            id,
            position,
            momentum,
            charge,
            quality: F::zero(),
            vertex_id: None,
            cluster_keys: BTreeSet::new(),
            state_keys: BTreeSet::new(),
        }
    }

    /// Set the fit quality.
    pub fn with_quality(mut self, quality: F) -> Self {
        self.quality = quality;
        self
    }

    /// Associate to a vertex.
    pub fn with_vertex(mut self, vertex_id: usize) -> Self {
        self.vertex_id = Some(vertex_id);
        self
    }

    /// Set the clusters of the track.
    pub fn with_clusters(mut self, keys: impl IntoIterator<Item = ClusterKey>) -> Self {
        self.cluster_keys = keys.into_iter().collect();
        self
    }

    /// Set the clusters that carry a fitted state.
    pub fn with_states(mut self, keys: impl IntoIterator<Item = ClusterKey>) -> Self {
        self.state_keys = keys.into_iter().collect();
        self
    }

    /// Transverse momentum.
    pub fn pt(&self) -> F {
        self.momentum.xy().norm()
    }

    /// Azimuth of the momentum.
    pub fn phi(&self) -> F {
        self.momentum.y.atan2(self.momentum.x)
    }

    /// Pseudorapidity of the momentum.
    pub fn eta(&self) -> F {
        pseudorapidity(&self.momentum)
    }

    /// Fitted state at the reference position.
    pub fn state(&self) -> TrackState<F> {
        TrackState::new(self.position, self.momentum, self.charge)
    }

    /// Number of clusters in `subsystem`.
    pub fn n_clusters(&self, subsystem: Subsystem) -> usize {
        self.cluster_keys.iter().filter(|k| k.subsystem() == subsystem).count()
    }

    /// Number of fitted states in `subsystem`.
    pub fn n_states(&self, subsystem: Subsystem) -> usize {
        self.state_keys.iter().filter(|k| k.subsystem() == subsystem).count()
    }

    /// Number of MVTX and INTT clusters.
    pub fn n_silicon_clusters(&self) -> usize {
        self.cluster_keys.iter().filter(|k| k.subsystem().is_silicon()).count()
    }
}

/// Vertex positions by id.
#[derive(Clone, Debug, Default)]
pub struct VertexMap<F: Float> {
    vertices: HashMap<usize, Vector3<F>>,
}

impl<F: Float> VertexMap<F> {
    /// Empty map.
    pub fn new() -> Self {
        Self {
            vertices: HashMap::new(),
        }
    }

    /// Store a vertex.
    pub fn insert(&mut self, id: usize, position: Vector3<F>) {
        self.vertices.insert(id, position);
    }

    /// Position of a vertex. Unknown or missing vertices are at the origin.
    pub fn position(&self, id: Option<usize>) -> Vector3<F> {
        id.and_then(|id| self.vertices.get(&id))
            .copied()
            .unwrap_or_else(Vector3::zeros)
    }
}

/// Distance of closest approach of a track to its vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackDca<F: Float> {
    /// Signed transverse component, along `p x z`.
    pub xy: F,
    /// Longitudinal component.
    pub z: F,
}

/// DCA of a straight track at `position` with `momentum` relative to `vertex`.
///
/// The transverse component is the projection of the displacement onto the
/// transverse direction perpendicular to the momentum.
pub fn dca_to_vertex<F: Float>(
    position: &Vector3<F>,
    momentum: &Vector3<F>,
    vertex: &Vector3<F>,
) -> TrackDca<F> {
    let relative = position - vertex;
    let outer = momentum.cross(&Vector3::z()).xy();
    let norm = outer.norm();
    let xy = if norm > F::zero() {
        relative.xy().dot(&outer) / norm
    } else {
        relative.xy().norm()
    };
    TrackDca { xy, z: relative.z }
}

/// Points of closest approach of two tracks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairPca<F: Float> {
    /// Point on the first track.
    pub pca1: Vector3<F>,
    /// Point on the second track.
    pub pca2: Vector3<F>,
    /// Distance between the two points.
    pub dca: F,
}

/// Closest approach of the straight lines `pos1 + s mom1` and `pos2 + t mom2`.
///
/// For parallel lines the second reference point is kept and projected onto the first line.
pub fn pca_two_tracks<F: Float>(
    pos1: &Vector3<F>,
    mom1: &Vector3<F>,
    pos2: &Vector3<F>,
    mom2: &Vector3<F>,
) -> PairPca<F> {
    let w0 = pos1 - pos2;
    let a = mom1.dot(mom1);
    let b = mom1.dot(mom2);
    let c = mom2.dot(mom2);
    let d = mom1.dot(&w0);
    let e = mom2.dot(&w0);
    let denom = a * c - b * b;

    let (pca1, pca2) = if denom <= a * c * lit(PARALLEL_TOLERANCE) {
        let s = -d / a;
        (pos1 + mom1 * s, *pos2)
    } else {
        let s = (b * e - c * d) / denom;
        let t = (a * e - b * d) / denom;
        (pos1 + mom1 * s, pos2 + mom2 * t)
    };
    PairPca {
        pca1,
        pca2,
        dca: (pca1 - pca2).norm(),
    }
}

/// Pseudorapidity of a momentum, `+-1e10` along the beam axis and 0 for a null vector.
pub fn pseudorapidity<F: Float>(momentum: &Vector3<F>) -> F {
    let pt = momentum.xy().norm();
    if pt > F::zero() {
        (momentum.z / pt).asinh()
    } else if momentum.z == F::zero() {
        F::zero()
    } else if momentum.z > F::zero() {
        lit(BEAM_AXIS_ETA)
    } else {
        lit(-BEAM_AXIS_ETA)
    }
}

/// Invariant observables of a pair of daughters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairKinematics<F: Float> {
    /// Invariant mass.
    pub mass: F,
    /// Transverse momentum of the pair.
    pub pt: F,
    /// Azimuth of the pair momentum.
    pub phi: F,
    /// Rapidity.
    pub rapidity: F,
    /// Pseudorapidity.
    pub pseudorapidity: F,
}

impl<F: Float> PairKinematics<F> {
    /// Combine two daughters of mass `daughter_mass`.
    pub fn from_momenta(mom1: &Vector3<F>, mom2: &Vector3<F>, daughter_mass: F) -> Self {
        let m2 = daughter_mass * daughter_mass;
        let energy = (mom1.norm_squared() + m2).sqrt() + (mom2.norm_squared() + m2).sqrt();
        let p = mom1 + mom2;
        let mass = (energy * energy - p.norm_squared()).max(F::zero()).sqrt();
        let half: F = lit(0.5);
        Self {
            mass,
            pt: p.xy().norm(),
            phi: p.y.atan2(p.x),
            rapidity: half * ((energy + p.z) / (energy - p.z)).ln(),
            pseudorapidity: pseudorapidity(&p),
        }
    }
}

/// Acceptance cuts on tracks and pairs.
#[derive(Clone, Copy, Debug)]
pub struct PairCuts<F: Float> {
    /// Mass hypothesis of the daughters.
    pub decay_mass: F,
    /// Maximum track fit quality.
    pub quality_cut: F,
    /// Minimum track transverse momentum.
    pub track_pt_cut: F,
    /// Minimum pair transverse momentum.
    pub invariant_pt_cut: F,
    /// Maximum distance between the two tracks at closest approach.
    pub pair_dca_cut: F,
    /// Maximum transverse and longitudinal DCA of a track to its vertex.
    pub track_dca_cut: F,
    /// Require at least one MVTX cluster per track.
    pub require_silicon: bool,
    /// Only combine tracks of opposite charge.
    pub opposite_charge: bool,
    /// Number of times the PCA is recomputed after propagating to it. Ignored without field.
    pub refine_iterations: usize,
}

impl<F: Float> Default for PairCuts<F> {
    fn default() -> Self {
        Self {
            decay_mass: lit(PION_MASS),
            quality_cut: lit(1000.),
            track_pt_cut: lit(0.2),
            invariant_pt_cut: lit(0.1),
            pair_dca_cut: lit(0.05),
            track_dca_cut: lit(0.01),
            require_silicon: true,
            opposite_charge: true,
            refine_iterations: 1,
        }
    }
}

impl<F: Float> PairCuts<F> {
    /// Set the daughter mass hypothesis (e.g. 0.1057 for muons, 0.000511 for electrons).
    pub fn with_decay_mass(mut self, mass: F) -> Self {
        self.decay_mass = mass;
        self
    }

    /// Set the maximum fit quality.
    pub fn with_quality_cut(mut self, cut: F) -> Self {
        self.quality_cut = cut;
        self
    }

    /// Set the minimum track pT.
    pub fn with_track_pt_cut(mut self, cut: F) -> Self {
        self.track_pt_cut = cut;
        self
    }

    /// Set the minimum pair pT.
    pub fn with_invariant_pt_cut(mut self, cut: F) -> Self {
        self.invariant_pt_cut = cut;
        self
    }

    /// Set the maximum pair DCA.
    pub fn with_pair_dca_cut(mut self, cut: F) -> Self {
        self.pair_dca_cut = cut;
        self
    }

    /// Set the maximum track DCA to the vertex.
    pub fn with_track_dca_cut(mut self, cut: F) -> Self {
        self.track_dca_cut = cut;
        self
    }

    /// Require MVTX clusters on both tracks.
    pub fn with_require_silicon(mut self, require: bool) -> Self {
        self.require_silicon = require;
        self
    }

    /// Only pair tracks of opposite charge.
    pub fn with_opposite_charge(mut self, opposite: bool) -> Self {
        self.opposite_charge = opposite;
        self
    }

    /// Set the number of PCA refinements.
    pub fn with_refine_iterations(mut self, n: usize) -> Self {
        self.refine_iterations = n;
        self
    }

    /// Decide whether a single track enters the pairing.
    pub fn keep_track(&self, track: &ReconstructedTrack<F>, dca: &TrackDca<F>) -> bool {
        if track.quality > self.quality_cut || track.pt() < self.track_pt_cut {
            return false;
        }
        if self.require_silicon && track.n_clusters(Subsystem::Mvtx) == 0 {
            return false;
        }
        dca.xy.abs() <= self.track_dca_cut && dca.z.abs() <= self.track_dca_cut
    }
}

/// One accepted pair, flattened for tabular output.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateRecord<F> {
    pub run: i32,
    pub event: i32,

    pub id1: usize,
    pub x1: F,
    pub y1: F,
    pub z1: F,
    pub px1: F,
    pub py1: F,
    pub pz1: F,
    pub dca_xy1: F,
    pub dca_z1: F,
    pub phi1: F,
    pub eta1: F,
    pub charge1: i8,
    pub quality1: F,
    pub tpc_clusters1: usize,
    pub pca_rel1_x: F,
    pub pca_rel1_y: F,
    pub pca_rel1_z: F,

    pub id2: usize,
    pub x2: F,
    pub y2: F,
    pub z2: F,
    pub px2: F,
    pub py2: F,
    pub pz2: F,
    pub dca_xy2: F,
    pub dca_z2: F,
    pub phi2: F,
    pub eta2: F,
    pub charge2: i8,
    pub quality2: F,
    pub tpc_clusters2: usize,
    pub pca_rel2_x: F,
    pub pca_rel2_y: F,
    pub pca_rel2_z: F,

    pub pair_dca: F,
    pub invariant_mass: F,
    pub invariant_pt: F,
    pub invariant_phi: F,
    pub rapidity: F,
    pub pseudorapidity: F,

    pub projected_pos1_x: F,
    pub projected_pos1_y: F,
    pub projected_pos1_z: F,
    pub projected_pos2_x: F,
    pub projected_pos2_y: F,
    pub projected_pos2_z: F,
    pub projected_mom1_x: F,
    pub projected_mom1_y: F,
    pub projected_mom1_z: F,
    pub projected_mom2_x: F,
    pub projected_mom2_y: F,
    pub projected_mom2_z: F,

    pub pca_rel1_x_proj: F,
    pub pca_rel1_y_proj: F,
    pub pca_rel1_z_proj: F,
    pub pca_rel2_x_proj: F,
    pub pca_rel2_y_proj: F,
    pub pca_rel2_z_proj: F,
    pub pair_dca_proj: F,

    pub silicon_clusters1: usize,
    pub mvtx_clusters1: usize,
    pub mvtx_states1: usize,
    pub intt_clusters1: usize,
    pub intt_states1: usize,
    pub silicon_clusters2: usize,
    pub mvtx_clusters2: usize,
    pub mvtx_states2: usize,
    pub intt_clusters2: usize,
    pub intt_states2: usize,
}

/// A track that passed the single-track cuts.
struct Selected<'t, F: Float> {
    track: &'t ReconstructedTrack<F>,
    vertex: Vector3<F>,
    dca: TrackDca<F>,
}

/// Finds decay candidates among the tracks of an event.
#[derive(Clone, Copy, Debug)]
pub struct PairFinder<F: Float> {
    propagator: Propagator<F>,
    cuts: PairCuts<F>,
}

impl<F: Float> PairFinder<F> {
    /// Create a finder propagating with `propagator`.
    pub fn new(propagator: Propagator<F>, cuts: PairCuts<F>) -> Self {
        Self { propagator, cuts }
    }

    /// The cuts in use.
    pub fn cuts(&self) -> &PairCuts<F> {
        &self.cuts
    }

    fn select<'t>(
        &self,
        tracks: &'t [ReconstructedTrack<F>],
        vertices: &VertexMap<F>,
    ) -> Vec<Selected<'t, F>> {
        tracks
            .iter()
            .filter_map(|track| {
                let vertex = vertices.position(track.vertex_id);
                let dca = dca_to_vertex(&track.position, &track.momentum, &vertex);
                if self.cuts.keep_track(track, &dca) {
                    Some(Selected { track, vertex, dca })
                } else {
                    trace!("Track {} rejected: {:?}.", track.id, dca);
                    None
                }
            })
            .collect()
    }

    /// Evaluate all pairs of accepted tracks, in track order.
    pub fn find_candidates(
        &self,
        tracks: &[ReconstructedTrack<F>],
        vertices: &VertexMap<F>,
        run: i32,
        event: i32,
    ) -> Vec<CandidateRecord<F>> {
        let selected = self.select(tracks, vertices);
        let records = selected
            .iter()
            .tuple_combinations()
            .filter_map(|(first, second)| self.evaluate(first, second, run, event))
            .collect_vec();
        debug!(
            "{} of {} tracks selected, {} candidates.",
            selected.len(),
            tracks.len(),
            records.len()
        );
        records
    }

    /// Evaluate one pair, `None` if it fails the pair cuts.
    fn evaluate(
        &self,
        first: &Selected<'_, F>,
        second: &Selected<'_, F>,
        run: i32,
        event: i32,
    ) -> Option<CandidateRecord<F>> {
        let (track1, track2) = (first.track, second.track);
        if self.cuts.opposite_charge && track1.charge == track2.charge {
            return None;
        }

        let pca = pca_two_tracks(
            &track1.position,
            &track1.momentum,
            &track2.position,
            &track2.momentum,
        );
        if pca.dca > self.cuts.pair_dca_cut {
            trace!("Pair ({}, {}) rejected: dca {:?}.", track1.id, track2.id, pca.dca);
            return None;
        }

        let (state1, state2, refined) = self.refine(track1, track2, pca);

        let kinematics = PairKinematics::from_momenta(
            &state1.momentum,
            &state2.momentum,
            self.cuts.decay_mass,
        );
        if kinematics.pt < self.cuts.invariant_pt_cut {
            trace!("Pair ({}, {}) rejected: pt {:?}.", track1.id, track2.id, kinematics.pt);
            return None;
        }

        let (pos1, mom1) = self.project(track1, pca.pca1.xy().norm());
        let (pos2, mom2) = self.project(track2, pca.pca2.xy().norm());

        let pca_rel1 = pca.pca1 - first.vertex;
        let pca_rel2 = pca.pca2 - second.vertex;
        let pca_rel1_proj = refined.pca1 - first.vertex;
        let pca_rel2_proj = refined.pca2 - second.vertex;

        Some(CandidateRecord {
            run,
            event,

            id1: track1.id,
            x1: track1.position.x,
            y1: track1.position.y,
            z1: track1.position.z,
            px1: track1.momentum.x,
            py1: track1.momentum.y,
            pz1: track1.momentum.z,
            dca_xy1: first.dca.xy,
            dca_z1: first.dca.z,
            phi1: track1.phi(),
            eta1: track1.eta(),
            charge1: track1.charge,
            quality1: track1.quality,
            tpc_clusters1: track1.n_clusters(Subsystem::Tpc),
            pca_rel1_x: pca_rel1.x,
            pca_rel1_y: pca_rel1.y,
            pca_rel1_z: pca_rel1.z,

            id2: track2.id,
            x2: track2.position.x,
            y2: track2.position.y,
            z2: track2.position.z,
            px2: track2.momentum.x,
            py2: track2.momentum.y,
            pz2: track2.momentum.z,
            dca_xy2: second.dca.xy,
            dca_z2: second.dca.z,
            phi2: track2.phi(),
            eta2: track2.eta(),
            charge2: track2.charge,
            quality2: track2.quality,
            tpc_clusters2: track2.n_clusters(Subsystem::Tpc),
            pca_rel2_x: pca_rel2.x,
            pca_rel2_y: pca_rel2.y,
            pca_rel2_z: pca_rel2.z,

            pair_dca: pca.dca,
            invariant_mass: kinematics.mass,
            invariant_pt: kinematics.pt,
            invariant_phi: kinematics.phi,
            rapidity: kinematics.rapidity,
            pseudorapidity: kinematics.pseudorapidity,

            projected_pos1_x: pos1.x,
            projected_pos1_y: pos1.y,
            projected_pos1_z: pos1.z,
            projected_pos2_x: pos2.x,
            projected_pos2_y: pos2.y,
            projected_pos2_z: pos2.z,
            projected_mom1_x: mom1.x,
            projected_mom1_y: mom1.y,
            projected_mom1_z: mom1.z,
            projected_mom2_x: mom2.x,
            projected_mom2_y: mom2.y,
            projected_mom2_z: mom2.z,

            pca_rel1_x_proj: pca_rel1_proj.x,
            pca_rel1_y_proj: pca_rel1_proj.y,
            pca_rel1_z_proj: pca_rel1_proj.z,
            pca_rel2_x_proj: pca_rel2_proj.x,
            pca_rel2_y_proj: pca_rel2_proj.y,
            pca_rel2_z_proj: pca_rel2_proj.z,
            pair_dca_proj: refined.dca,

            silicon_clusters1: track1.n_silicon_clusters(),
            mvtx_clusters1: track1.n_clusters(Subsystem::Mvtx),
            mvtx_states1: track1.n_states(Subsystem::Mvtx),
            intt_clusters1: track1.n_clusters(Subsystem::Intt),
            intt_states1: track1.n_states(Subsystem::Intt),
            silicon_clusters2: track2.n_silicon_clusters(),
            mvtx_clusters2: track2.n_clusters(Subsystem::Mvtx),
            mvtx_states2: track2.n_states(Subsystem::Mvtx),
            intt_clusters2: track2.n_clusters(Subsystem::Intt),
            intt_states2: track2.n_states(Subsystem::Intt),
        })
    }

    /// Propagate both tracks to their PCAs and recompute the closest approach.
    ///
    /// Without field the straight-line result is already exact and returned unchanged.
    fn refine(
        &self,
        track1: &ReconstructedTrack<F>,
        track2: &ReconstructedTrack<F>,
        mut pca: PairPca<F>,
    ) -> (TrackState<F>, TrackState<F>, PairPca<F>) {
        let mut state1 = track1.state();
        let mut state2 = track2.state();
        if self.propagator.bz() == F::zero() {
            return (state1, state2, pca);
        }

        for _ in 0..self.cuts.refine_iterations {
            let propagated = self
                .propagator
                .to_point(&state1, &pca.pca1)
                .and_then(|s1| self.propagator.to_point(&state2, &pca.pca2).map(|s2| (s1, s2)));
            match propagated {
                Ok((s1, s2)) => {
                    state1 = s1;
                    state2 = s2;
                    pca = pca_two_tracks(
                        &state1.position,
                        &state1.momentum,
                        &state2.position,
                        &state2.momentum,
                    );
                }
                Err(e) => {
                    trace!("Pair ({}, {}) not refined: {e}.", track1.id, track2.id);
                    break;
                }
            }
        }
        (state1, state2, pca)
    }

    /// Position and momentum on the cylinder of `radius`, NaN if not reachable.
    fn project(&self, track: &ReconstructedTrack<F>, radius: F) -> (Vector3<F>, Vector3<F>) {
        match self.propagator.to_cylinder(&track.state(), radius) {
            Ok(state) => (state.position, state.momentum),
            Err(e) => {
                trace!("Track {} not projected to r = {:?}: {e}.", track.id, radius);
                let nan = Vector3::repeat(lit(f64::NAN));
                (nan, nan)
            }
        }
    }
}

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    impl<F: Float> PairFinder<F> {
        /// Evaluate all pairs of accepted tracks in parallel.
        ///
        /// The result is identical to [`find_candidates`](PairFinder::find_candidates()), in the same order.
        pub fn find_candidates_par(
            &self,
            tracks: &[ReconstructedTrack<F>],
            vertices: &VertexMap<F>,
            run: i32,
            event: i32,
        ) -> Vec<CandidateRecord<F>> {
            let selected = self.select(tracks, vertices);
            let pairs = selected.iter().tuple_combinations().collect_vec();
            debug!("Evaluating {} pairs in parallel.", pairs.len());
            pairs
                .par_iter()
                .filter_map(|(first, second)| self.evaluate(first, second, run, event))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::Rng;

    use super::*;
    use crate::detector::HitSetKey;

    fn mvtx_key(layer: u8) -> ClusterKey {
        ClusterKey::new(HitSetKey::new(Subsystem::Mvtx, layer), 0)
    }

    fn track(id: usize, position: Vector3<f64>, momentum: Vector3<f64>, charge: i8) -> ReconstructedTrack<f64> {
        ReconstructedTrack::new(id, position, momentum, charge)
            .with_quality(2.)
            .with_clusters((0..3).map(mvtx_key))
            .with_states((0..2).map(mvtx_key))
    }

    #[test]
    fn coincident_antiparallel_pions() {
        let position = Vector3::new(0.5, -0.2, 1.);
        let p = Vector3::new(0.3, 0.4, 0.);
        let pca = pca_two_tracks(&position, &p, &position, &(-p));
        assert_abs_diff_eq!(pca.dca, 0.);
        assert_abs_diff_eq!(pca.pca1, position);
        assert_abs_diff_eq!(pca.pca2, position);

        let kinematics = PairKinematics::from_momenta(&p, &(-p), PION_MASS);
        let energy = (0.25f64 + PION_MASS * PION_MASS).sqrt();
        assert_relative_eq!(kinematics.mass, 2. * energy, max_relative = 1e-6);
        assert_abs_diff_eq!(kinematics.pt, 0.);
        assert_abs_diff_eq!(kinematics.rapidity, 0.);
        assert_abs_diff_eq!(kinematics.pseudorapidity, 0.);
    }

    #[test]
    fn pair_kinematics_formulas() {
        let mom1 = Vector3::new(1., 0., 0.5);
        let mom2 = Vector3::new(0., 1., 0.5);
        let kinematics = PairKinematics::from_momenta(&mom1, &mom2, PION_MASS);

        let e1 = (1.25 + PION_MASS * PION_MASS).sqrt();
        let energy = 2. * e1;
        let mass = (energy * energy - 3.).sqrt();
        assert_relative_eq!(kinematics.mass, mass, max_relative = 1e-12);
        assert_relative_eq!(kinematics.pt, 2f64.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(kinematics.phi, std::f64::consts::FRAC_PI_4, max_relative = 1e-12);
        assert_relative_eq!(
            kinematics.rapidity,
            0.5 * ((energy + 1.) / (energy - 1.)).ln(),
            max_relative = 1e-12
        );
        assert_relative_eq!(
            kinematics.pseudorapidity,
            (1. / 2f64.sqrt()).asinh(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn pseudorapidity_on_axis() {
        assert_eq!(pseudorapidity(&Vector3::new(0., 0., 2.)), 1e10);
        assert_eq!(pseudorapidity(&Vector3::new(0., 0., -2.)), -1e10);
        assert_eq!(pseudorapidity(&Vector3::<f64>::zeros()), 0.);
    }

    #[test]
    fn skew_lines_closest_approach() {
        // x axis at z = 0 and y axis at z = 1
        let pca = pca_two_tracks(
            &Vector3::new(-3., 0., 0.),
            &Vector3::new(2., 0., 0.),
            &Vector3::new(0., 5., 1.),
            &Vector3::new(0., -1., 0.),
        );
        assert_abs_diff_eq!(pca.pca1, Vector3::new(0., 0., 0.), epsilon = 1e-12);
        assert_abs_diff_eq!(pca.pca2, Vector3::new(0., 0., 1.), epsilon = 1e-12);
        assert_abs_diff_eq!(pca.dca, 1., epsilon = 1e-12);

        // parallel lines keep the second point
        let pca = pca_two_tracks(
            &Vector3::new(0., 0., 0.),
            &Vector3::new(1., 0., 0.),
            &Vector3::new(4., 2., 0.),
            &Vector3::new(3., 0., 0.),
        );
        assert_abs_diff_eq!(pca.pca1, Vector3::new(4., 0., 0.), epsilon = 1e-12);
        assert_abs_diff_eq!(pca.dca, 2., epsilon = 1e-12);
    }

    #[test]
    fn random_pca_is_minimal() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let mut v = || Vector3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
            );
            let (p1, u, p2, w) = (v(), v(), v(), v());
            if u.cross(&w).norm() < 0.1 * u.norm() * w.norm() {
                continue;
            }
            let pca = pca_two_tracks(&p1, &u, &p2, &w);
            // the connecting segment is perpendicular to both lines
            let segment = pca.pca2 - pca.pca1;
            assert_abs_diff_eq!(segment.dot(&u), 0., epsilon = 1e-8);
            assert_abs_diff_eq!(segment.dot(&w), 0., epsilon = 1e-8);
        }
    }

    #[test]
    fn track_dca_components() {
        let vertex = Vector3::new(0., 0., 1.);
        // moving along x, displaced by -0.3 in y: p x z = (0, -1, 0)
        let dca = dca_to_vertex(&Vector3::new(5., -0.3, 1.2), &Vector3::new(1., 0., 0.), &vertex);
        assert_abs_diff_eq!(dca.xy, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(dca.z, 0.2, epsilon = 1e-12);

        let vertices = VertexMap::<f64>::new();
        assert_eq!(vertices.position(Some(4)), Vector3::zeros());
    }

    #[test]
    fn track_cuts() {
        let cuts = PairCuts::<f64>::default();
        let good = track(0, Vector3::zeros(), Vector3::new(1., 0., 0.), 1);
        let dca = TrackDca { xy: 0.005, z: -0.005 };
        assert!(cuts.keep_track(&good, &dca));
        assert!(!cuts.keep_track(&good, &TrackDca { xy: 0.02, z: 0. }));
        assert!(!cuts.keep_track(&good.clone().with_quality(2000.), &dca));
        assert!(!cuts.keep_track(&good.clone().with_clusters([]), &dca));
        assert!(cuts.with_require_silicon(false).keep_track(&good.clone().with_clusters([]), &dca));

        let soft = track(1, Vector3::zeros(), Vector3::new(0.1, 0., 0.), 1);
        assert!(!cuts.keep_track(&soft, &dca));
    }

    /// Opposite-charge tracks from a common point at the origin, plus a same-charge partner.
    fn event() -> Vec<ReconstructedTrack<f64>> {
        vec![
            track(0, Vector3::new(0.001, 0., 0.), Vector3::new(1., 0.5, 0.2), 1),
            track(1, Vector3::new(0., 0.001, 0.), Vector3::new(0.5, 1., -0.1), -1),
            track(2, Vector3::new(0., 0., 0.002), Vector3::new(-0.7, 0.4, 0.), 1),
            track(3, Vector3::new(0., 0., 0.), Vector3::new(0.05, 0., 0.), -1),
        ]
    }

    #[test]
    fn finds_opposite_charge_pairs() {
        let finder = PairFinder::new(Propagator::zero_field(), PairCuts::default());
        let candidates = finder.find_candidates(&event(), &VertexMap::new(), 7, 42);

        // track 3 fails the pT cut, (0, 2) have the same charge
        let pairs = candidates.iter().map(|c| (c.id1, c.id2)).collect_vec();
        assert_eq!(pairs, vec![(0, 1), (1, 2)]);

        let first = &candidates[0];
        assert_eq!((first.run, first.event), (7, 42));
        assert!(first.pair_dca <= 0.05);
        assert_abs_diff_eq!(first.pair_dca_proj, first.pair_dca);
        assert_eq!(first.mvtx_clusters1, 3);
        assert_eq!(first.mvtx_states2, 2);
        assert_eq!(first.silicon_clusters1, 3);
        assert_eq!(first.tpc_clusters1, 0);

        let expected = PairKinematics::from_momenta(
            &Vector3::new(1., 0.5, 0.2),
            &Vector3::new(0.5, 1., -0.1),
            PION_MASS,
        );
        assert_relative_eq!(first.invariant_mass, expected.mass, max_relative = 1e-12);
        assert_relative_eq!(first.invariant_pt, expected.pt, max_relative = 1e-12);

        // projections land on the cylinder through each track's own PCA
        let r1 = (first.pca_rel1_x.powi(2) + first.pca_rel1_y.powi(2)).sqrt();
        let projected = (first.projected_pos1_x.powi(2) + first.projected_pos1_y.powi(2)).sqrt();
        assert_abs_diff_eq!(projected, r1, epsilon = 1e-9);
    }

    #[test]
    fn pair_cuts_reject() {
        let cuts = PairCuts::default().with_pair_dca_cut(1e-6);
        let finder = PairFinder::new(Propagator::zero_field(), cuts);
        assert!(finder.find_candidates(&event(), &VertexMap::new(), 0, 0).is_empty());

        let cuts = PairCuts::default().with_invariant_pt_cut(10.);
        let finder = PairFinder::new(Propagator::zero_field(), cuts);
        assert!(finder.find_candidates(&event(), &VertexMap::new(), 0, 0).is_empty());

        let cuts = PairCuts::default().with_opposite_charge(false);
        let finder = PairFinder::new(Propagator::zero_field(), cuts);
        assert_eq!(finder.find_candidates(&event(), &VertexMap::new(), 0, 0).len(), 3);
    }

    #[test]
    fn refinement_in_field() {
        let finder = PairFinder::new(Propagator::new(1.4), PairCuts::default());
        let candidates = finder.find_candidates(&event(), &VertexMap::new(), 0, 0);
        assert_eq!(candidates.len(), 2);
        for candidate in &candidates {
            assert!(candidate.pair_dca_proj.is_finite());
            assert!(candidate.invariant_mass > 2. * PION_MASS);
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_serial() {
        let finder = PairFinder::new(Propagator::zero_field(), PairCuts::default());
        let tracks = event();
        assert_eq!(
            finder.find_candidates(&tracks, &VertexMap::new(), 1, 2),
            finder.find_candidates_par(&tracks, &VertexMap::new(), 1, 2)
        );
    }
}
