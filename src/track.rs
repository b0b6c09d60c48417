//! Track seeds: partial trajectories confined to one subsystem, and their combinations.

use std::collections::BTreeSet;

use crate::Float;
use crate::detector::{ClusterKey, Subsystem};

/// A track segment with its cluster keys and seed-level kinematics.
#[derive(Clone, Debug, Default)]
pub struct TrackSeed<F: Float> {
    cluster_keys: BTreeSet<ClusterKey>,
    /// Charge in units of `e`.
    pub charge: i8,
    /// Transverse momentum.
    pub pt: F,
    /// Azimuth of the momentum.
    pub phi: F,
    /// Bunch crossing, `None` when it could not be determined.
    pub crossing: Option<i16>,
}

impl<F: Float> TrackSeed<F> {
    /// Seed with the given clusters and no kinematics.
    pub fn from_keys(keys: impl IntoIterator<Item = ClusterKey>) -> Self {
        Self {
            cluster_keys: keys.into_iter().collect(),
            charge: 0,
            pt: F::zero(),
            phi: F::zero(),
            crossing: Some(0),
        }
    }

    /// Set the crossing.
    pub fn with_crossing(mut self, crossing: Option<i16>) -> Self {
        self.crossing = crossing;
        self
    }

    /// Cluster keys, ascending.
    pub fn cluster_keys(&self) -> impl Iterator<Item = ClusterKey> + '_ {
        self.cluster_keys.iter().copied()
    }

    /// Number of clusters.
    pub fn size_cluster_keys(&self) -> usize {
        self.cluster_keys.len()
    }

    /// Add a cluster. Returns `false` if it was already present.
    pub fn insert_cluster_key(&mut self, key: ClusterKey) -> bool {
        self.cluster_keys.insert(key)
    }

    /// Whether a cluster of `subsystem` on `layer` is already attached.
    pub fn has_cluster_on(&self, subsystem: Subsystem, layer: u8) -> bool {
        self.cluster_keys
            .iter()
            .any(|k| k.subsystem() == subsystem && k.layer() == layer)
    }
}

/// Seeds of one kind (TPC, silicon), indexable by id. Entries can be empty.
#[derive(Clone, Debug, Default)]
pub struct SeedContainer<F: Float> {
    seeds: Vec<Option<TrackSeed<F>>>,
}

impl<F: Float> SeedContainer<F> {
    /// Empty container.
    pub fn new() -> Self {
        Self { seeds: Vec::new() }
    }

    /// Append a seed and return its id.
    pub fn push(&mut self, seed: TrackSeed<F>) -> usize {
        self.seeds.push(Some(seed));
        self.seeds.len() - 1
    }

    /// Seed by id.
    pub fn get(&self, id: usize) -> Option<&TrackSeed<F>> {
        self.seeds.get(id).and_then(Option::as_ref)
    }

    /// Mutable seed by id.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut TrackSeed<F>> {
        self.seeds.get_mut(id).and_then(Option::as_mut)
    }

    /// Number of slots, including empty ones.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

impl<F: Float> FromIterator<TrackSeed<F>> for SeedContainer<F> {
    fn from_iter<T: IntoIterator<Item = TrackSeed<F>>>(iter: T) -> Self {
        Self {
            seeds: iter.into_iter().map(Some).collect(),
        }
    }
}

/// A full seed formed by matching a TPC seed with a silicon seed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SvtxSeed {
    /// Index in the TPC seed container.
    pub tpc_seed: Option<usize>,
    /// Index in the silicon seed container.
    pub silicon_seed: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{HitSetKey, SegmentationType};

    #[test]
    fn seed_keys_are_unique() {
        let key = ClusterKey::new(HitSetKey::new(Subsystem::Tpc, 40), 3);
        let mut seed = TrackSeed::<f64>::from_keys([key]);
        assert!(!seed.insert_cluster_key(key));
        assert_eq!(seed.size_cluster_keys(), 1);

        let mm = ClusterKey::new(HitSetKey::micromegas(55, SegmentationType::Phi, 2), 0);
        assert!(seed.insert_cluster_key(mm));
        assert!(seed.has_cluster_on(Subsystem::Micromegas, 55));
        assert!(!seed.has_cluster_on(Subsystem::Micromegas, 56));
    }

    #[test]
    fn container_slots() {
        let mut container = SeedContainer::<f64>::new();
        let id = container.push(TrackSeed::default());
        assert_eq!(id, 0);
        assert!(container.get(0).is_some());
        assert!(container.get(1).is_none());
        container.get_mut(0).unwrap().charge = -1;
        assert_eq!(container.get(0).unwrap().charge, -1);
    }
}
