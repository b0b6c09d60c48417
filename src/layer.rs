//! Strip-detector layers and their planar tiles.
//!
//! A tile is a bounded plane with its own local frame:
//! local `x` runs along increasing phi, local `y` along the beam axis (projected on the plane),
//! and the third local coordinate is the signed distance along the outward normal.

use nalgebra::{Vector2, Vector3};

use crate::Float;
use crate::detector::{HitSetKey, SegmentationType};
use crate::geometry::phi_in_range;

/// A planar tile.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile<F: Float> {
    center: Vector3<F>,
    normal: Vector3<F>,
    axis_x: Vector3<F>,
    axis_y: Vector3<F>,
    phi_range: (F, F),
    z_range: (F, F),
}

impl<F: Float> Tile<F> {
    /// Create a tile from its center, outward normal and acceptance.
    ///
    /// `normal` must not be parallel to the beam axis.
    pub fn new(center: Vector3<F>, normal: Vector3<F>, phi_range: (F, F), z_range: (F, F)) -> Self {
        let normal = normal.normalize();
        let beam = Vector3::z();
        let axis_y = (beam - normal * normal.dot(&beam)).normalize();
        let axis_x = axis_y.cross(&normal);
        Self {
            center,
            normal,
            axis_x,
            axis_y,
            phi_range,
            z_range,
        }
    }

    /// Tile tangent to a cylinder of `radius`, centered at `(phi_center, z_center)`.
    pub fn cylindrical(radius: F, phi_center: F, phi_size: F, z_center: F, z_size: F) -> Self {
        let half: F = crate::lit(0.5);
        let normal = Vector3::new(phi_center.cos(), phi_center.sin(), F::zero());
        let center = Vector3::new(normal.x * radius, normal.y * radius, z_center);
        Self::new(
            center,
            normal,
            (phi_center - phi_size * half, phi_center + phi_size * half),
            (z_center - z_size * half, z_center + z_size * half),
        )
    }

    /// World position of the local origin.
    pub fn center(&self) -> &Vector3<F> {
        &self.center
    }

    /// Unit outward normal.
    pub fn normal(&self) -> &Vector3<F> {
        &self.normal
    }

    /// Azimuthal acceptance `(min, max)`; `min > max` after normalization means it wraps.
    pub fn phi_range(&self) -> (F, F) {
        self.phi_range
    }

    /// Longitudinal acceptance `(min, max)`.
    pub fn z_range(&self) -> (F, F) {
        self.z_range
    }

    /// Whether `z` is inside the tile, with a slack `tolerance` on both sides.
    pub fn contains_z(&self, z: F, tolerance: F) -> bool {
        z >= self.z_range.0 - tolerance && z <= self.z_range.1 + tolerance
    }

    /// Whether a world point falls in the tile acceptance as seen from the beam axis.
    pub fn contains_cylindrical(&self, point: &Vector3<F>) -> bool {
        phi_in_range(point.y.atan2(point.x), self.phi_range.0, self.phi_range.1)
            && self.contains_z(point.z, F::zero())
    }

    /// Local coordinates `(x, y, distance to plane)` of a world point.
    pub fn local_from_world(&self, point: &Vector3<F>) -> Vector3<F> {
        let d = point - self.center;
        Vector3::new(d.dot(&self.axis_x), d.dot(&self.axis_y), d.dot(&self.normal))
    }

    /// World position of an in-plane local point.
    pub fn world_from_local(&self, local: &Vector2<F>) -> Vector3<F> {
        self.center + self.axis_x * local.x + self.axis_y * local.y
    }
}

/// One strip layer: a set of tiles at a common nominal radius.
#[derive(Clone, Debug)]
pub struct StripLayer<F: Float> {
    id: u8,
    radius: F,
    segmentation: SegmentationType,
    tiles: Vec<Tile<F>>,
}

impl<F: Float> StripLayer<F> {
    /// Create a layer. Tile ids are the indices in `tiles`.
    pub fn new(id: u8, radius: F, segmentation: SegmentationType, tiles: Vec<Tile<F>>) -> Self {
        Self {
            id,
            radius,
            segmentation,
            tiles,
        }
    }

    /// Layer of identical cylindrical tiles centered at `centers = [(phi, z)]`.
    pub fn with_cylindrical_tiles(
        id: u8,
        radius: F,
        segmentation: SegmentationType,
        centers: &[(F, F)],
        phi_size: F,
        z_size: F,
    ) -> Self {
        let tiles = centers
            .iter()
            .map(|&(phi, z)| Tile::cylindrical(radius, phi, phi_size, z, z_size))
            .collect();
        Self::new(id, radius, segmentation, tiles)
    }

    /// Layer id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Nominal radius.
    pub fn radius(&self) -> F {
        self.radius
    }

    /// Measured axis of the strips.
    pub fn segmentation(&self) -> SegmentationType {
        self.segmentation
    }

    /// All tiles.
    pub fn tiles(&self) -> &[Tile<F>] {
        &self.tiles
    }

    /// Tile by id.
    pub fn tile(&self, tile_id: usize) -> Option<&Tile<F>> {
        self.tiles.get(tile_id)
    }

    /// Id of the first tile whose acceptance contains a point on the layer cylinder.
    pub fn find_tile_cylindrical(&self, point: &Vector3<F>) -> Option<usize> {
        self.tiles.iter().position(|t| t.contains_cylindrical(point))
    }

    /// Hit-set key of a tile, used to look up its clusters.
    ///
    /// `None` for tile ids that do not fit the 8-bit tile field of the key.
    pub fn hitset(&self, tile_id: usize) -> Option<HitSetKey> {
        let tile = u8::try_from(tile_id).ok()?;
        Some(HitSetKey::micromegas(self.id, self.segmentation, tile))
    }
}

/// All strip layers, read-only for the whole run.
#[derive(Clone, Debug, Default)]
pub struct StripGeometry<F: Float> {
    layers: Vec<StripLayer<F>>,
}

impl<F: Float> StripGeometry<F> {
    /// Create the geometry. Layers are kept in increasing id order.
    pub fn new(mut layers: Vec<StripLayer<F>>) -> Self {
        layers.sort_by_key(|l| l.id);
        Self { layers }
    }

    /// Number of layers.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Id of the innermost layer.
    pub fn first_layer(&self) -> Option<u8> {
        self.layers.first().map(|l| l.id)
    }

    /// Layer by id.
    pub fn layer(&self, id: u8) -> Option<&StripLayer<F>> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Layers in increasing id order.
    pub fn layers(&self) -> impl Iterator<Item = &StripLayer<F>> {
        self.layers.iter()
    }
}
