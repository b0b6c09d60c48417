//! Error types.
//!
//! Only [`TrackingError`] ever reaches the caller of an event-level operation.
//! [`IntersectionError`] and [`PropagationError`] describe why a single candidate
//! was dropped and are absorbed by the matcher and the pair finder.

use thiserror::Error;

/// Failure of one of the pure intersection solvers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectionError {
    /// The line does not cross the plane (or the other line) at a single point.
    #[error("line is parallel to the plane")]
    Parallel,

    /// No root converged inside the tile acceptance.
    #[error("no intersection found inside the tile acceptance")]
    NoSolution,
}

/// Failure to extrapolate a track state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationError {
    /// The trajectory never reaches the requested radius.
    #[error("target radius is not reachable by the trajectory")]
    Unreachable,

    /// The state cannot be propagated (zero transverse momentum, non-finite parameters).
    #[error("degenerate track state")]
    Degenerate,
}

/// Structural failures that abort an event or the whole run.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// A required input container was not provided.
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    /// The strip geometry does not have the configured number of layers.
    #[error("inconsistent number of strip layers: expected {expected}, found {found}")]
    InconsistentLayerCount {
        /// Number of layers the configuration expects.
        expected: usize,
        /// Number of layers in the geometry.
        found: usize,
    },

    /// The search windows do not provide one entry per strip layer.
    #[error("search windows need one entry per layer: {n_layers} layers, {rphi} r-phi and {z} z windows")]
    InvalidSearchWindows {
        /// Number of strip layers.
        n_layers: usize,
        /// Number of r-phi windows.
        rphi: usize,
        /// Number of z windows.
        z: usize,
    },

    /// Multi-pass reconstruction is enabled but no iteration map was given.
    #[error("cluster iteration map missing while running pass {0}")]
    MissingIterationMap(u32),

    /// Writing the output table failed.
    #[error("unable to write candidate table: {0}")]
    Output(#[from] csv::Error),

    /// File operation on the output failed.
    #[error("unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackingError {
    /// Whether the error invalidates the whole run rather than a single event.
    pub fn is_run_abort(&self) -> bool {
        !matches!(self, TrackingError::MissingIterationMap(_))
    }
}
