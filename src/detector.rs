//! Cluster and hit-set key encoding.
//!
//! A [`HitSetKey`] identifies one sensor unit (a silicon stave, a TPC sector, a strip tile):
//! - bits 24..31: subsystem id,
//! - bits 16..23: layer,
//! - for strip tiles, bit 8 is the segmentation type and bits 0..7 the tile id.
//!
//! A [`ClusterKey`] is the hit-set key in the upper 32 bits and the cluster index in the
//! lower 32 bits, so sorting cluster keys groups them by subsystem, then layer, then tile.

use std::fmt;

const TRKR_ID_SHIFT: u32 = 24;
const LAYER_SHIFT: u32 = 16;
const SEGMENTATION_SHIFT: u32 = 8;
const TILE_SHIFT: u32 = 0;
const CLUSTER_SHIFT: u32 = 32;

/// Tracking subsystem encoded in a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Monolithic active pixel vertex detector.
    Mvtx,
    /// Intermediate silicon strip tracker.
    Intt,
    /// Time projection chamber.
    Tpc,
    /// Micromegas strip layers outside the TPC.
    Micromegas,
    /// Any other detector id.
    Other(u8),
}

impl Subsystem {
    /// Numeric id as stored in the keys.
    pub fn id(self) -> u8 {
        match self {
            Subsystem::Mvtx => 0,
            Subsystem::Intt => 1,
            Subsystem::Tpc => 2,
            Subsystem::Micromegas => 3,
            Subsystem::Other(id) => id,
        }
    }

    /// Decode a numeric id.
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Subsystem::Mvtx,
            1 => Subsystem::Intt,
            2 => Subsystem::Tpc,
            3 => Subsystem::Micromegas,
            other => Subsystem::Other(other),
        }
    }

    /// MVTX and INTT.
    pub fn is_silicon(self) -> bool {
        matches!(self, Subsystem::Mvtx | Subsystem::Intt)
    }
}

/// Which local coordinate a strip tile measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SegmentationType {
    /// Strips along z, measuring r-phi (local x).
    #[default]
    Phi,
    /// Strips along phi, measuring z (local y).
    Z,
}

impl SegmentationType {
    fn bit(self) -> u32 {
        match self {
            SegmentationType::Phi => 0,
            SegmentationType::Z => 1,
        }
    }
}

/// Key of a sensor unit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HitSetKey(u32);

impl HitSetKey {
    /// Generic key from subsystem and layer.
    pub fn new(subsystem: Subsystem, layer: u8) -> Self {
        Self((u32::from(subsystem.id()) << TRKR_ID_SHIFT) | (u32::from(layer) << LAYER_SHIFT))
    }

    /// Key of a strip tile.
    pub fn micromegas(layer: u8, segmentation: SegmentationType, tile: u8) -> Self {
        let base = Self::new(Subsystem::Micromegas, layer).0;
        Self(base | (segmentation.bit() << SEGMENTATION_SHIFT) | (u32::from(tile) << TILE_SHIFT))
    }

    /// Raw value.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Subsystem.
    pub fn subsystem(self) -> Subsystem {
        Subsystem::from_id((self.0 >> TRKR_ID_SHIFT) as u8)
    }

    /// Layer.
    pub fn layer(self) -> u8 {
        (self.0 >> LAYER_SHIFT) as u8
    }

    /// Tile id, only meaningful for strip tiles.
    pub fn tile(self) -> u8 {
        (self.0 >> TILE_SHIFT) as u8
    }

    /// Segmentation type, only meaningful for strip tiles.
    pub fn segmentation(self) -> SegmentationType {
        if (self.0 >> SEGMENTATION_SHIFT) & 1 == 1 {
            SegmentationType::Z
        } else {
            SegmentationType::Phi
        }
    }
}

impl fmt::Debug for HitSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HitSetKey({:?}, layer {})", self.subsystem(), self.layer())
    }
}

/// Unique key of a cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterKey(u64);

impl ClusterKey {
    /// Compose a key from its hit set and cluster index.
    pub fn new(hitset: HitSetKey, index: u32) -> Self {
        Self((u64::from(hitset.raw()) << CLUSTER_SHIFT) | u64::from(index))
    }

    /// Raw value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Hit set the cluster belongs to.
    pub fn hitset(self) -> HitSetKey {
        HitSetKey((self.0 >> CLUSTER_SHIFT) as u32)
    }

    /// Index inside the hit set.
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// Subsystem.
    pub fn subsystem(self) -> Subsystem {
        self.hitset().subsystem()
    }

    /// Layer.
    pub fn layer(self) -> u8 {
        self.hitset().layer()
    }
}

impl From<u64> for ClusterKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterKey({:?}, layer {}, #{})",
            self.subsystem(),
            self.layer(),
            self.index()
        )
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micromegas_key() {
        let hitset = HitSetKey::micromegas(55, SegmentationType::Z, 7);
        assert_eq!(hitset.subsystem(), Subsystem::Micromegas);
        assert_eq!(hitset.layer(), 55);
        assert_eq!(hitset.segmentation(), SegmentationType::Z);
        assert_eq!(hitset.tile(), 7);

        let key = ClusterKey::new(hitset, 12);
        assert_eq!(key.hitset(), hitset);
        assert_eq!(key.index(), 12);
        assert_eq!(key.layer(), 55);
    }

    #[test]
    fn keys_sort_by_subsystem_then_layer() {
        let mvtx = ClusterKey::new(HitSetKey::new(Subsystem::Mvtx, 2), 100);
        let intt = ClusterKey::new(HitSetKey::new(Subsystem::Intt, 3), 0);
        let tpc_inner = ClusterKey::new(HitSetKey::new(Subsystem::Tpc, 7), 5);
        let tpc_outer = ClusterKey::new(HitSetKey::new(Subsystem::Tpc, 54), 0);
        assert!(mvtx < intt && intt < tpc_inner && tpc_inner < tpc_outer);
    }

    #[test]
    fn subsystem_ids() {
        for id in 0..=255u8 {
            assert_eq!(Subsystem::from_id(id).id(), id);
        }
        assert!(Subsystem::Intt.is_silicon());
        assert!(!Subsystem::Tpc.is_silicon());
        assert_eq!(Subsystem::from_id(9), Subsystem::Other(9));
    }
}
