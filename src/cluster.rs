//! Cluster containers and the global-position service.

use std::collections::{BTreeMap, HashMap};

use nalgebra::{Vector2, Vector3};

use crate::Float;
use crate::detector::{ClusterKey, HitSetKey};

/// A single measurement in the local frame of its sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster<F: Float> {
    /// Local position: `x` along r-phi, `y` along z.
    pub local: Vector2<F>,
}

impl<F: Float> Cluster<F> {
    /// Create a cluster from its local coordinates.
    pub fn new(local_x: F, local_y: F) -> Self {
        Self {
            local: Vector2::new(local_x, local_y),
        }
    }
}

/// All clusters of an event, ordered by key.
#[derive(Clone, Debug, Default)]
pub struct ClusterContainer<F: Float> {
    clusters: BTreeMap<ClusterKey, Cluster<F>>,
}

impl<F: Float> ClusterContainer<F> {
    /// Empty container.
    pub fn new() -> Self {
        Self {
            clusters: BTreeMap::new(),
        }
    }

    /// Add or replace a cluster.
    pub fn insert(&mut self, key: ClusterKey, cluster: Cluster<F>) {
        self.clusters.insert(key, cluster);
    }

    /// Look up a cluster by key.
    pub fn find(&self, key: ClusterKey) -> Option<&Cluster<F>> {
        self.clusters.get(&key)
    }

    /// Clusters of one sensor unit, in ascending key order.
    pub fn in_hitset(
        &self,
        hitset: HitSetKey,
    ) -> impl Iterator<Item = (ClusterKey, &Cluster<F>)> + '_ {
        let first = ClusterKey::new(hitset, 0);
        let last = ClusterKey::new(hitset, u32::MAX);
        self.clusters.range(first..=last).map(|(k, c)| (*k, c))
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether there are no clusters.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl<F: Float> FromIterator<(ClusterKey, Cluster<F>)> for ClusterContainer<F> {
    fn from_iter<T: IntoIterator<Item = (ClusterKey, Cluster<F>)>>(iter: T) -> Self {
        Self {
            clusters: iter.into_iter().collect(),
        }
    }
}

/// Reconstruction pass in which each cluster was used.
///
/// Clusters that are not listed belong to pass 0.
#[derive(Clone, Debug, Default)]
pub struct IterationMap {
    iterations: HashMap<ClusterKey, u32>,
}

impl IterationMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pass of a cluster.
    pub fn insert(&mut self, key: ClusterKey, iteration: u32) {
        self.iterations.insert(key, iteration);
    }

    /// Pass of a cluster.
    pub fn iteration(&self, key: ClusterKey) -> u32 {
        self.iterations.get(&key).copied().unwrap_or(0)
    }
}

/// Distortion-corrected global positions.
///
/// `crossing` is the bunch crossing of the track, which shifts TPC clusters along z.
/// Returns `None` if the cluster cannot be placed.
pub trait GlobalPositions<F: Float> {
    /// Global position of `cluster`.
    fn global_position(
        &self,
        key: ClusterKey,
        cluster: &Cluster<F>,
        crossing: i16,
    ) -> Option<Vector3<F>>;
}

/// Global positions stored per cluster, e.g. precomputed by the host framework.
///
/// A per-crossing drift offset can be set to model the timing correction of TPC clusters:
/// their z is moved towards the membrane by `crossing * drift_per_crossing`.
#[derive(Clone, Debug, Default)]
pub struct GlobalPositionMap<F: Float> {
    positions: HashMap<ClusterKey, Vector3<F>>,
    drift_per_crossing: F,
}

impl<F: Float> GlobalPositionMap<F> {
    /// Empty map without crossing correction.
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            drift_per_crossing: F::zero(),
        }
    }

    /// Set the z shift per bunch crossing applied to TPC clusters.
    pub fn with_drift_per_crossing(mut self, drift: F) -> Self {
        self.drift_per_crossing = drift;
        self
    }

    /// Store the position of a cluster.
    pub fn insert(&mut self, key: ClusterKey, position: Vector3<F>) {
        self.positions.insert(key, position);
    }
}

impl<F: Float> GlobalPositions<F> for GlobalPositionMap<F> {
    fn global_position(
        &self,
        key: ClusterKey,
        _cluster: &Cluster<F>,
        crossing: i16,
    ) -> Option<Vector3<F>> {
        let mut position = *self.positions.get(&key)?;
        if key.subsystem() == crate::detector::Subsystem::Tpc && crossing != 0 {
            let shift = self.drift_per_crossing * crate::lit(f64::from(crossing));
            if position.z >= F::zero() {
                position.z -= shift;
            } else {
                position.z += shift;
            }
        }
        Some(position)
    }
}
