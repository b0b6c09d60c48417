#![warn(missing_docs)]

//! Geometric track extrapolation and cross-detector cluster matching for a
//! cylindrical tracking detector (silicon + TPC + micromegas-like strip layers),
//! plus the pair kinematics used to reconstruct two-body decays downstream.
//!
//! Nothing here fits tracks statistically or loads geometry from disk. The crate takes
//! already-reconstructed seeds, clusters and an immutable description of the strip tiles,
//! and answers two questions:
//! which strip cluster belongs to which track, and what the invariant observables of a
//! candidate track pair are.
//!
//! ## Interface
//! - [`MicromegasTpcMatcher`] projects every seed onto the strip layers and returns the
//!   associations it found, as an [`EventMatches`]. Nothing is mutated until the caller
//!   commits them with [`apply_associations`].
//! - [`PairFinder`] loops over track pairs, applies the acceptance cuts and produces
//!   one [`CandidateRecord`] per accepted pair.
//!   With the `parallel` feature, [`PairFinder::find_candidates_par`] does the same in parallel.
//!
//! Both are configured once per run through builder-style structs:
//! ```rust
//! # use trkmatch::MatcherConfig;
//! let config = MatcherConfig::<f64>::default()
//!     .with_zero_field(true)
//!     .with_search_windows(vec![0.5, 13.0], vec![26.0, 0.5]);
//! ```
//!
//! ## Units
//! Lengths are in centimeters, momenta in GeV/c, masses in GeV/c², magnetic fields in Tesla
//! and angles in radians.
//!
//! ## Failure model
//! Per-track and per-layer misses (too few clusters, unreachable layer, no tile, solver
//! non-convergence, nothing inside the search window) are expected and only counted in
//! [`MatchStats`]. Structural problems such as missing inputs or an inconsistent geometry are
//! reported as [`TrackingError`].

pub mod cluster;
pub mod detector;
pub mod error;
pub mod extrapolation;
pub mod fit;
pub mod geometry;
pub mod kinematics;
pub mod layer;
pub mod matching;
pub mod output;
pub mod track;
pub mod trajectory;

pub use error::{IntersectionError, PropagationError, TrackingError};
pub use kinematics::{CandidateRecord, PairCuts, PairFinder, ReconstructedTrack, VertexMap};
pub use matching::{
    Association, EventInput, EventInputBuilder, EventMatches, LayerSkip, MatchStats,
    MatcherConfig, MicromegasTpcMatcher, TrackSkip, apply_associations,
};

/// A generic float trait such that all algorithms are generic over `f32`/`f64`.
///
/// This trait is automatically implemented for all types implementing the supertraits.
/// Particularly, this includes `f32` and `f64`.
/// [`num_traits::Float`] is not a supertrait as the need to specify the provider of the redundant definitions of the basic math functions would clutter the code.
pub trait Float: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}

impl<F> Float for F where F: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}

/// Convert an `f64` constant into the working precision.
#[inline]
pub(crate) fn lit<F: Float>(value: f64) -> F {
    nalgebra::convert(value)
}
