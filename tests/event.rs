use approx::assert_abs_diff_eq;
use log::LevelFilter;
use nalgebra::{Vector2, Vector3};
use simplelog::{Config, TestLogger};
use trkmatch::cluster::{Cluster, ClusterContainer, GlobalPositionMap, IterationMap};
use trkmatch::detector::{ClusterKey, HitSetKey, SegmentationType, Subsystem};
use trkmatch::extrapolation::Propagator;
use trkmatch::layer::{StripGeometry, StripLayer};
use trkmatch::output::{CandidateWriter, MassHistogram};
use trkmatch::track::{SeedContainer, SvtxSeed, TrackSeed};
use trkmatch::trajectory::{RzLine, TrackModel, Transverse};
use trkmatch::{
    EventInput, LayerSkip, MatcherConfig, MicromegasTpcMatcher, PairCuts, PairFinder,
    ReconstructedTrack, VertexMap, apply_associations,
};

/// Circle of radius 80 through the origin, centered at (80, 0), with z = r.
const R: f64 = 80.;

fn on_circle(r: f64) -> Vector3<f64> {
    let x = r * r / (2. * R);
    Vector3::new(x, (r * r - x * x).sqrt(), r)
}

fn crossing_phi(r: f64) -> f64 {
    (r / (2. * R)).acos()
}

fn exact_model() -> TrackModel<f64> {
    TrackModel {
        transverse: Transverse::Circle {
            R,
            X0: R,
            Y0: 0.,
        },
        rz: RzLine {
            slope: 1.,
            intercept: 0.,
        },
    }
}

struct Event {
    geometry: StripGeometry<f64>,
    clusters: ClusterContainer<f64>,
    positions: GlobalPositionMap<f64>,
    tpc_seeds: SeedContainer<f64>,
    silicon_seeds: SeedContainer<f64>,
    svtx: Vec<SvtxSeed>,
}

impl Event {
    /// One silicon seed with three MVTX and two INTT clusters on the circle, and strip tiles
    /// centered on the predicted crossings at r = 85 and r = 90.
    fn new() -> Self {
        let geometry = StripGeometry::new(vec![
            StripLayer::with_cylindrical_tiles(
                55,
                85.,
                SegmentationType::Phi,
                &[(crossing_phi(85.) - 1., 85.), (crossing_phi(85.), 85.)],
                0.3,
                40.,
            ),
            StripLayer::with_cylindrical_tiles(
                56,
                90.,
                SegmentationType::Z,
                &[(crossing_phi(90.), 90.)],
                0.3,
                40.,
            ),
        ]);

        let mut clusters = ClusterContainer::new();
        let mut positions = GlobalPositionMap::new();
        let mut keys = Vec::new();
        for (subsystem, layer, r) in [
            (Subsystem::Mvtx, 0, 3.),
            (Subsystem::Mvtx, 1, 4.),
            (Subsystem::Mvtx, 2, 5.),
            (Subsystem::Intt, 3, 8.),
            (Subsystem::Intt, 4, 10.),
        ] {
            let key = ClusterKey::new(HitSetKey::new(subsystem, layer), 0);
            clusters.insert(key, Cluster::new(0., 0.));
            positions.insert(key, on_circle(r));
            keys.push(key);
        }

        let mut tpc_seeds = SeedContainer::new();
        tpc_seeds.push(TrackSeed::default());
        let mut silicon_seeds = SeedContainer::new();
        silicon_seeds.push(TrackSeed::from_keys(keys));

        Self {
            geometry,
            clusters,
            positions,
            tpc_seeds,
            silicon_seeds,
            svtx: vec![SvtxSeed {
                tpc_seed: Some(0),
                silicon_seed: Some(0),
            }],
        }
    }

    fn expected_local(&self, layer: u8, tile: usize) -> Vector2<f64> {
        let tile = self.geometry.layer(layer).unwrap().tile(tile).unwrap();
        let point = exact_model().intersect_tile(tile).unwrap();
        tile.local_from_world(&point).xy()
    }

    fn add_strip_cluster(&mut self, layer: u8, tile: usize, index: u32, local: Vector2<f64>) -> ClusterKey {
        let hitset = self.geometry.layer(layer).unwrap().hitset(tile).unwrap();
        let key = ClusterKey::new(hitset, index);
        self.clusters.insert(key, Cluster::new(local.x, local.y));
        key
    }
}

fn init_logger() {
    let _ = TestLogger::init(LevelFilter::Trace, Config::default());
}

#[test]
fn silicon_seed_matches_strip_clusters() {
    init_logger();
    let mut event = Event::new();
    let inner = event.expected_local(55, 1);
    let outer = event.expected_local(56, 0);
    let inner_key = event.add_strip_cluster(55, 1, 0, inner);
    let outer_key = event.add_strip_cluster(56, 0, 0, outer);
    // same tile position on the wrong tile
    event.add_strip_cluster(55, 0, 0, inner);

    let config = MatcherConfig::default().with_silicon(true).with_test_windows(true);
    let matcher = MicromegasTpcMatcher::new(&config, &event.geometry).unwrap();
    let input = EventInput::builder()
        .with_svtx_seeds(&event.svtx)
        .with_tpc_seeds(&event.tpc_seeds)
        .with_silicon_seeds(&event.silicon_seeds)
        .with_clusters(&event.clusters)
        .with_positions(&event.positions)
        .build()
        .unwrap();
    let matches = matcher.process_event(&input).unwrap();

    assert_eq!(matches.associations.len(), 2);
    let first = &matches.associations[0];
    assert_eq!((first.layer, first.tile, first.cluster_key), (55, 1, inner_key));
    assert_abs_diff_eq!(first.drphi, 0., epsilon = 1e-4);
    assert_abs_diff_eq!(first.dz, 0., epsilon = 1e-4);
    let second = &matches.associations[1];
    assert_eq!((second.layer, second.cluster_key), (56, outer_key));
    assert_abs_diff_eq!(second.drphi, 0., epsilon = 1e-4);
    assert_abs_diff_eq!(second.dz, 0., epsilon = 1e-4);

    assert_eq!(apply_associations(&mut event.tpc_seeds, &matches.associations), 2);
    let seed = event.tpc_seeds.get(0).unwrap();
    assert!(seed.has_cluster_on(Subsystem::Micromegas, 55));
    assert!(seed.has_cluster_on(Subsystem::Micromegas, 56));
}

#[test]
fn tpc_seed_matches_in_helix_mode() {
    init_logger();
    let mut event = Event::new();
    let keys: Vec<ClusterKey> = (40..48)
        .enumerate()
        .map(|(i, layer)| {
            let key = ClusterKey::new(HitSetKey::new(Subsystem::Tpc, layer), 0);
            event.clusters.insert(key, Cluster::new(0., 0.));
            event.positions.insert(key, on_circle(30. + 5. * i as f64));
            key
        })
        .collect();
    event.tpc_seeds = [TrackSeed::from_keys(keys)].into_iter().collect();
    event.svtx[0].silicon_seed = None;

    let inner = event.expected_local(55, 1);
    let outer = event.expected_local(56, 0);
    let inner_key = event.add_strip_cluster(55, 1, 0, inner);
    let outer_key = event.add_strip_cluster(56, 0, 0, outer + Vector2::new(0.5, 0.));

    let config = MatcherConfig::default();
    let matcher = MicromegasTpcMatcher::new(&config, &event.geometry).unwrap();
    let input = EventInput::builder()
        .with_svtx_seeds(&event.svtx)
        .with_tpc_seeds(&event.tpc_seeds)
        .with_silicon_seeds(&event.silicon_seeds)
        .with_clusters(&event.clusters)
        .with_positions(&event.positions)
        .build()
        .unwrap();
    let matches = matcher.process_event(&input).unwrap();

    assert_eq!(matches.stats.projected, 1);
    assert_eq!(matches.associations.len(), 2);
    let first = &matches.associations[0];
    assert_eq!((first.layer, first.tile, first.cluster_key), (55, 1, inner_key));
    assert_abs_diff_eq!(first.drphi, 0., epsilon = 1e-4);
    assert_abs_diff_eq!(first.dz, 0., epsilon = 1e-4);
    let second = &matches.associations[1];
    assert_eq!((second.layer, second.cluster_key), (56, outer_key));
    assert_abs_diff_eq!(second.drphi, -0.5, epsilon = 1e-4);
    assert_abs_diff_eq!(second.dz, 0., epsilon = 1e-4);
}

#[test]
fn later_pass_ignores_used_clusters() {
    init_logger();
    let mut event = Event::new();
    let inner = event.expected_local(55, 1);
    let used = event.add_strip_cluster(55, 1, 0, inner);
    let free = event.add_strip_cluster(55, 1, 1, inner + Vector2::new(0.1, 0.));

    let mut iterations = IterationMap::new();
    iterations.insert(used, 1);

    let config = MatcherConfig::default().with_silicon(true).with_iteration(1);
    let matcher = MicromegasTpcMatcher::new(&config, &event.geometry).unwrap();
    let input = EventInput::builder()
        .with_svtx_seeds(&event.svtx)
        .with_tpc_seeds(&event.tpc_seeds)
        .with_silicon_seeds(&event.silicon_seeds)
        .with_clusters(&event.clusters)
        .with_positions(&event.positions)
        .with_iteration_map(&iterations)
        .build()
        .unwrap();
    let matches = matcher.process_event(&input).unwrap();

    assert_eq!(matches.associations.len(), 1);
    assert_eq!(matches.associations[0].cluster_key, free);
    assert_abs_diff_eq!(matches.associations[0].drphi, -0.1, epsilon = 1e-4);
    assert_eq!(matches.stats.layer_skips(LayerSkip::NoCandidate), 1);
}

#[test]
fn concentric_circle_never_reaches_layer() {
    let model = TrackModel {
        transverse: Transverse::Circle {
            R: 80.,
            X0: 0.,
            Y0: 0.,
        },
        rz: RzLine {
            slope: 1.,
            intercept: 0.,
        },
    };
    assert!(model.project_to_cylinder(85., 0.).is_none());
    assert!(exact_model().project_to_cylinder(85., 1.).is_some());
}

#[test]
fn pair_candidates_to_table() {
    init_logger();
    let mvtx = ClusterKey::new(HitSetKey::new(Subsystem::Mvtx, 0), 0);
    let vertex = Vector3::new(0.01, -0.01, 0.5);
    let mut vertices = VertexMap::new();
    vertices.insert(0, vertex);

    let tracks = [
        (Vector3::new(0.6, 0.2, 0.1), 1),
        (Vector3::new(0.3, -0.5, 0.2), -1),
    ]
    .iter()
    .enumerate()
    .map(|(id, (momentum, charge))| {
        ReconstructedTrack::new(id, vertex, *momentum, *charge)
            .with_vertex(0)
            .with_quality(3.)
            .with_clusters([mvtx])
    })
    .collect::<Vec<_>>();

    let finder = PairFinder::new(Propagator::new(1.4), PairCuts::default());
    let candidates = finder.find_candidates(&tracks, &vertices, 1, 1);
    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_abs_diff_eq!(candidate.pair_dca, 0., epsilon = 1e-9);
    assert_abs_diff_eq!(candidate.pca_rel1_x, 0., epsilon = 1e-9);
    assert_abs_diff_eq!(candidate.dca_xy1, 0., epsilon = 1e-12);

    let mut histogram = MassHistogram::default();
    histogram.fill_candidates(&candidates);
    assert_eq!(histogram.entries(), 1);

    let mut writer = CandidateWriter::new(Vec::new());
    writer.write_all(&candidates).unwrap();
    writer.flush().unwrap();
    let table = String::from_utf8(writer.into_inner().unwrap()).unwrap();
    assert_eq!(table.lines().count(), 2);
}
