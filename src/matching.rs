//! Matching of strip-detector clusters to TPC seeds, and main interface.

use itertools::Itertools;
use log::{debug, info, trace};
use nalgebra::{Vector2, Vector3};

use crate::Float;
use crate::cluster::{Cluster, ClusterContainer, GlobalPositions, IterationMap};
use crate::detector::{ClusterKey, SegmentationType, Subsystem};
use crate::error::TrackingError;
use crate::layer::{StripGeometry, StripLayer};
use crate::track::{SeedContainer, SvtxSeed, TrackSeed};
use crate::trajectory::{TrackModel, Transverse};

/// Best cluster of a tile for a projected point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterCandidate<F: Float> {
    /// Cluster key.
    pub key: ClusterKey,
    /// Residual along local x (r-phi), projection minus cluster.
    pub drphi: F,
    /// Residual along local y (z), projection minus cluster.
    pub dz: F,
}

/// Find the cluster closest to `projection` along the measured axis of the tile.
///
/// Clusters farther than the window of the orthogonal axis are rejected first
/// (`z_window` for phi strips, `rphi_window` for z strips).
/// Clusters already used in an earlier pass (`iteration > 0`) are ignored.
/// On exact ties the first cluster in iteration order wins, so feeding clusters in ascending key
/// order makes the lowest key win.
///
/// # Example:
/// ```
/// # use nalgebra::Vector2;
/// # use trkmatch::cluster::Cluster;
/// # use trkmatch::detector::{ClusterKey, SegmentationType};
/// # use trkmatch::matching::find_best_cluster;
/// let clusters = [
///     (ClusterKey::from(1), Cluster::new(0.3, 0.)),
///     (ClusterKey::from(2), Cluster::new(-0.1, 5.)),
/// ];
/// let best = find_best_cluster(
///     clusters.iter().map(|(k, c)| (*k, c)),
///     &Vector2::new(0., 0.),
///     SegmentationType::Phi,
///     1.,
///     10.,
///     None,
/// )
/// .unwrap();
/// assert_eq!(best.key, ClusterKey::from(2));
/// ```
pub fn find_best_cluster<'c, F: Float>(
    clusters: impl Iterator<Item = (ClusterKey, &'c Cluster<F>)>,
    projection: &Vector2<F>,
    segmentation: SegmentationType,
    rphi_window: F,
    z_window: F,
    iteration_map: Option<&IterationMap>,
) -> Option<ClusterCandidate<F>> {
    clusters
        .filter(|(key, _)| iteration_map.is_none_or(|map| map.iteration(*key) == 0))
        .map(|(key, cluster)| ClusterCandidate {
            key,
            drphi: projection.x - cluster.local.x,
            dz: projection.y - cluster.local.y,
        })
        .filter(|c| match segmentation {
            SegmentationType::Phi => c.dz.abs() <= z_window,
            SegmentationType::Z => c.drphi.abs() <= rphi_window,
        })
        .min_by(|a, b| {
            let measured = |c: &ClusterCandidate<F>| match segmentation {
                SegmentationType::Phi => c.drphi.abs(),
                SegmentationType::Z => c.dz.abs(),
            };
            measured(a)
                .partial_cmp(&measured(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Run configuration of the matcher.
///
/// Built once per run with `with_*` functions and shared by reference.
#[derive(Clone, Debug)]
pub struct MatcherConfig<F: Float> {
    /// r-phi search window per strip layer, innermost first.
    rphi_search_win: Vec<F>,
    /// z search window per strip layer, innermost first.
    z_search_win: Vec<F>,
    /// First TPC layer used in the fit.
    min_tpc_layer: u8,
    /// One past the last TPC layer used in the fit.
    max_tpc_layer: u8,
    /// Expected number of strip layers.
    n_layers: usize,
    /// Fit the silicon clusters instead of the TPC ones.
    use_silicon: bool,
    /// Straight-line trajectories.
    zero_field: bool,
    /// Require a silicon seed with a known bunch crossing.
    pp_mode: bool,
    /// Reconstruction pass; passes after the first need the cluster iteration map.
    n_iteration: u32,
    /// Circle fits below this radius cannot come from the vertex.
    min_circle_radius: F,
    /// Minimum number of clusters in the fitted subsystem.
    min_fit_clusters: usize,
    /// Log every cluster inside both windows.
    test_windows: bool,
}

impl<F: Float> Default for MatcherConfig<F> {
    fn default() -> Self {
        Self {
            rphi_search_win: vec![crate::lit(0.25), crate::lit(13.0)],
            z_search_win: vec![crate::lit(26.0), crate::lit(0.25)],
            min_tpc_layer: 38,
            max_tpc_layer: 55,
            n_layers: 2,
            use_silicon: false,
            zero_field: false,
            pp_mode: false,
            n_iteration: 0,
            min_circle_radius: crate::lit(40.0),
            min_fit_clusters: 3,
            test_windows: false,
        }
    }
}

impl<F: Float> MatcherConfig<F> {
    /// Set the r-phi and z search windows, one entry per strip layer.
    pub fn with_search_windows(mut self, rphi: Vec<F>, z: Vec<F>) -> Self {
        self.n_layers = rphi.len();
        self.rphi_search_win = rphi;
        self.z_search_win = z;
        self
    }

    /// Set the range `[min, max)` of TPC layers used in the fit.
    pub fn with_tpc_layers(mut self, min: u8, max: u8) -> Self {
        self.min_tpc_layer = min;
        self.max_tpc_layer = max;
        self
    }

    /// Fit silicon clusters instead of TPC clusters.
    pub fn with_silicon(mut self, use_silicon: bool) -> Self {
        self.use_silicon = use_silicon;
        self
    }

    /// Straight-line (`true`) or helical (`false`) trajectories.
    pub fn with_zero_field(mut self, zero_field: bool) -> Self {
        self.zero_field = zero_field;
        self
    }

    /// Require a silicon seed with a defined crossing.
    pub fn with_pp_mode(mut self, pp_mode: bool) -> Self {
        self.pp_mode = pp_mode;
        self
    }

    /// Set the reconstruction pass.
    pub fn with_iteration(mut self, n_iteration: u32) -> Self {
        self.n_iteration = n_iteration;
        self
    }

    /// Set the minimum accepted circle radius.
    pub fn with_min_circle_radius(mut self, radius: F) -> Self {
        self.min_circle_radius = radius;
        self
    }

    /// Set the minimum number of clusters required for the fit.
    pub fn with_min_fit_clusters(mut self, n: usize) -> Self {
        self.min_fit_clusters = n;
        self
    }

    /// Log every candidate inside both search windows.
    pub fn with_test_windows(mut self, test_windows: bool) -> Self {
        self.test_windows = test_windows;
        self
    }

    /// r-phi search window of the `index`-th strip layer.
    pub fn rphi_search_win(&self, index: usize) -> Option<F> {
        self.rphi_search_win.get(index).copied()
    }

    /// z search window of the `index`-th strip layer.
    pub fn z_search_win(&self, index: usize) -> Option<F> {
        self.z_search_win.get(index).copied()
    }
}

/// Inputs of one event. Build with [`EventInput::builder`].
#[derive(Clone, Copy)]
pub struct EventInput<'a, F: Float> {
    svtx_seeds: &'a [SvtxSeed],
    tpc_seeds: &'a SeedContainer<F>,
    silicon_seeds: &'a SeedContainer<F>,
    clusters: &'a ClusterContainer<F>,
    positions: &'a dyn GlobalPositions<F>,
    iteration_map: Option<&'a IterationMap>,
}

impl<'a, F: Float> EventInput<'a, F> {
    /// Start collecting the inputs of an event.
    pub fn builder() -> EventInputBuilder<'a, F> {
        EventInputBuilder::default()
    }
}

/// Collects the containers of an event. All but the iteration map are required.
pub struct EventInputBuilder<'a, F: Float> {
    svtx_seeds: Option<&'a [SvtxSeed]>,
    tpc_seeds: Option<&'a SeedContainer<F>>,
    silicon_seeds: Option<&'a SeedContainer<F>>,
    clusters: Option<&'a ClusterContainer<F>>,
    positions: Option<&'a dyn GlobalPositions<F>>,
    iteration_map: Option<&'a IterationMap>,
}

impl<F: Float> Default for EventInputBuilder<'_, F> {
    fn default() -> Self {
        Self {
            svtx_seeds: None,
            tpc_seeds: None,
            silicon_seeds: None,
            clusters: None,
            positions: None,
            iteration_map: None,
        }
    }
}

impl<'a, F: Float> EventInputBuilder<'a, F> {
    /// Full seeds.
    pub fn with_svtx_seeds(mut self, seeds: &'a [SvtxSeed]) -> Self {
        self.svtx_seeds = Some(seeds);
        self
    }

    /// TPC seeds.
    pub fn with_tpc_seeds(mut self, seeds: &'a SeedContainer<F>) -> Self {
        self.tpc_seeds = Some(seeds);
        self
    }

    /// Silicon seeds.
    pub fn with_silicon_seeds(mut self, seeds: &'a SeedContainer<F>) -> Self {
        self.silicon_seeds = Some(seeds);
        self
    }

    /// All clusters of the event.
    pub fn with_clusters(mut self, clusters: &'a ClusterContainer<F>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    /// Global-position service.
    pub fn with_positions(mut self, positions: &'a dyn GlobalPositions<F>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Cluster iteration map, needed after the first pass.
    pub fn with_iteration_map(mut self, map: &'a IterationMap) -> Self {
        self.iteration_map = Some(map);
        self
    }

    /// Check that all required containers are present.
    pub fn build(self) -> Result<EventInput<'a, F>, TrackingError> {
        Ok(EventInput {
            svtx_seeds: self.svtx_seeds.ok_or(TrackingError::MissingInput("svtx seeds"))?,
            tpc_seeds: self.tpc_seeds.ok_or(TrackingError::MissingInput("tpc seeds"))?,
            silicon_seeds: self
                .silicon_seeds
                .ok_or(TrackingError::MissingInput("silicon seeds"))?,
            clusters: self.clusters.ok_or(TrackingError::MissingInput("clusters"))?,
            positions: self
                .positions
                .ok_or(TrackingError::MissingInput("global positions"))?,
            iteration_map: self.iteration_map,
        })
    }
}

/// Why a seed was not projected at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackSkip {
    /// pp mode and no silicon seed.
    NoSiliconSeed,
    /// pp mode and the crossing is undefined.
    UndefinedCrossing,
    /// The TPC seed does not exist.
    MissingTpcSeed,
    /// Strip clusters are already attached.
    AlreadyMatched,
    /// Not enough clusters in the fitted subsystem.
    InsufficientClusters,
    /// Fit failed or the circle is too small to come from the vertex.
    RejectedFit,
}

/// Why a seed got no cluster on a strip layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerSkip {
    /// The trajectory does not reach the layer radius.
    NoCrossing,
    /// No tile contains the cylinder crossing.
    NoTile,
    /// The planar refinement failed or left the tile.
    NoIntersection,
    /// The tile has no cluster passing the orthogonal window.
    NoCandidate,
    /// The best cluster is outside the search window.
    OutsideWindow,
}

/// Counters of an event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchStats {
    /// Seeds looked at.
    pub seeds: usize,
    /// Seeds that were projected onto the strip layers.
    pub projected: usize,
    /// Associations found.
    pub matched: usize,
    track_skips: [usize; 6],
    layer_skips: [usize; 5],
}

impl MatchStats {
    fn skip_track(&mut self, reason: TrackSkip) {
        self.track_skips[reason as usize] += 1;
    }

    fn skip_layer(&mut self, reason: LayerSkip) {
        self.layer_skips[reason as usize] += 1;
    }

    /// Number of seeds skipped for `reason`.
    pub fn track_skips(&self, reason: TrackSkip) -> usize {
        self.track_skips[reason as usize]
    }

    /// Number of (seed, layer) pairs skipped for `reason`.
    pub fn layer_skips(&self, reason: LayerSkip) -> usize {
        self.layer_skips[reason as usize]
    }
}

/// A strip cluster to attach to a TPC seed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Association<F: Float> {
    /// Index of the full seed.
    pub seed_id: usize,
    /// Index of the TPC seed receiving the cluster.
    pub tpc_seed: usize,
    /// Strip layer.
    pub layer: u8,
    /// Tile in the layer.
    pub tile: usize,
    /// Matched cluster.
    pub cluster_key: ClusterKey,
    /// Residual along r-phi.
    pub drphi: F,
    /// Residual along z.
    pub dz: F,
}

/// Result of matching one event.
#[derive(Clone, Debug, Default)]
pub struct EventMatches<F: Float> {
    /// Associations, by seed then layer.
    pub associations: Vec<Association<F>>,
    /// Counters.
    pub stats: MatchStats,
}

/// Clusters of a seed, sorted by subsystem.
#[derive(Default)]
struct SeedClusters<F: Float> {
    tpc: Vec<Vector3<F>>,
    mvtx: Vec<Vector3<F>>,
    silicon: Vec<Vector3<F>>,
    has_strips: bool,
}

/// Matches strip-detector clusters to TPC seeds.
///
/// For every seed, the fitted trajectory is propagated to each strip layer,
/// the crossing tile is found, the intersection with the tile plane refined,
/// and the closest cluster of the tile within the search windows is associated.
#[derive(Clone, Copy, Debug)]
pub struct MicromegasTpcMatcher<'a, F: Float> {
    config: &'a MatcherConfig<F>,
    geometry: &'a StripGeometry<F>,
}

impl<'a, F: Float> MicromegasTpcMatcher<'a, F> {
    /// Create a matcher for a run.
    ///
    /// # Errors
    /// - [`TrackingError::InconsistentLayerCount`] if the geometry does not have the configured number of layers.
    /// - [`TrackingError::InvalidSearchWindows`] if the windows do not match the layers.
    pub fn new(
        config: &'a MatcherConfig<F>,
        geometry: &'a StripGeometry<F>,
    ) -> Result<Self, TrackingError> {
        if geometry.n_layers() != config.n_layers {
            return Err(TrackingError::InconsistentLayerCount {
                expected: config.n_layers,
                found: geometry.n_layers(),
            });
        }
        if config.rphi_search_win.len() != config.n_layers
            || config.z_search_win.len() != config.n_layers
        {
            return Err(TrackingError::InvalidSearchWindows {
                n_layers: config.n_layers,
                rphi: config.rphi_search_win.len(),
                z: config.z_search_win.len(),
            });
        }

        for (i, layer) in geometry.layers().enumerate() {
            info!(
                "Strip layer {} at r = {:?}: rphi_search_win {:?}, z_search_win {:?}.",
                layer.id(),
                layer.radius(),
                config.rphi_search_win[i],
                config.z_search_win[i]
            );
        }
        info!(
            "use_silicon: {}, zero_field: {}, pp_mode: {}, TPC layers [{}, {}).",
            config.use_silicon,
            config.zero_field,
            config.pp_mode,
            config.min_tpc_layer,
            config.max_tpc_layer
        );

        Ok(Self { config, geometry })
    }

    /// Match all seeds of an event.
    ///
    /// Seeds are processed in container order and layers from the innermost outwards.
    /// Nothing is attached to the seeds; use [`apply_associations`] to commit the result.
    ///
    /// # Errors
    /// [`TrackingError::MissingIterationMap`] if running a later pass without iteration map.
    pub fn process_event(&self, event: &EventInput<'_, F>) -> Result<EventMatches<F>, TrackingError> {
        if self.config.n_iteration > 0 && event.iteration_map.is_none() {
            return Err(TrackingError::MissingIterationMap(self.config.n_iteration));
        }

        let mut matches = EventMatches::default();
        for (seed_id, svtx) in event.svtx_seeds.iter().enumerate() {
            matches.stats.seeds += 1;
            match self.match_seed(event, seed_id, svtx, &mut matches) {
                Ok(()) => matches.stats.projected += 1,
                Err(reason) => {
                    trace!("Seed {seed_id} skipped: {reason:?}.");
                    matches.stats.skip_track(reason);
                }
            }
        }
        matches.stats.matched = matches.associations.len();

        debug!(
            "{} seeds, {} projected, {} strip clusters matched.",
            matches.stats.seeds, matches.stats.projected, matches.stats.matched
        );
        Ok(matches)
    }

    fn match_seed(
        &self,
        event: &EventInput<'_, F>,
        seed_id: usize,
        svtx: &SvtxSeed,
        matches: &mut EventMatches<F>,
    ) -> Result<(), TrackSkip> {
        let silicon_seed = svtx.silicon_seed.and_then(|id| event.silicon_seeds.get(id));

        let crossing = if self.config.pp_mode {
            silicon_seed
                .ok_or(TrackSkip::NoSiliconSeed)?
                .crossing
                .ok_or(TrackSkip::UndefinedCrossing)?
        } else {
            0
        };

        let tpc_id = svtx.tpc_seed.ok_or(TrackSkip::MissingTpcSeed)?;
        let tpc_seed = event.tpc_seeds.get(tpc_id).ok_or(TrackSkip::MissingTpcSeed)?;
        trace!(
            "Seed {seed_id}: TPC seed {tpc_id}, crossing {crossing}, {} clusters, phi {:?}.",
            tpc_seed.size_cluster_keys(),
            tpc_seed.phi
        );

        let clusters = self.gather(event, [Some(tpc_seed), silicon_seed], crossing);
        if clusters.has_strips {
            return Err(TrackSkip::AlreadyMatched);
        }

        let (fit_points, rz_points) = if self.config.use_silicon {
            (&clusters.silicon, &clusters.mvtx)
        } else {
            (&clusters.tpc, &clusters.tpc)
        };
        if rz_points.len() < self.config.min_fit_clusters {
            return Err(TrackSkip::InsufficientClusters);
        }

        let model = if self.config.zero_field {
            TrackModel::fit_line(fit_points, rz_points)
        } else {
            TrackModel::fit_helix(fit_points, rz_points)
        };
        if !model.is_finite() {
            return Err(TrackSkip::RejectedFit);
        }
        if let Transverse::Circle { R: radius, .. } = model.transverse {
            if radius < self.config.min_circle_radius {
                return Err(TrackSkip::RejectedFit);
            }
        }
        trace!("Seed {seed_id} model: {model:?}.");

        // the last fitted cluster decides between the two crossings
        let last_phi = fit_points
            .last()
            .map(|p| p.y.atan2(p.x))
            .unwrap_or(tpc_seed.phi);

        for (index, layer) in self.geometry.layers().enumerate() {
            match self.match_layer(event, &model, last_phi, index, layer) {
                Ok((tile, candidate)) => {
                    trace!(
                        "Seed {seed_id}: layer {} cluster {:?} drphi {:?} dz {:?}.",
                        layer.id(),
                        candidate.key,
                        candidate.drphi,
                        candidate.dz
                    );
                    matches.associations.push(Association {
                        seed_id,
                        tpc_seed: tpc_id,
                        layer: layer.id(),
                        tile,
                        cluster_key: candidate.key,
                        drphi: candidate.drphi,
                        dz: candidate.dz,
                    });
                }
                Err(reason) => {
                    trace!("Seed {seed_id}: layer {} skipped: {reason:?}.", layer.id());
                    matches.stats.skip_layer(reason);
                }
            }
        }
        Ok(())
    }

    /// Global positions of the clusters of `seeds`, split by subsystem.
    fn gather<const N: usize>(
        &self,
        event: &EventInput<'_, F>,
        seeds: [Option<&TrackSeed<F>>; N],
        crossing: i16,
    ) -> SeedClusters<F> {
        let mut out = SeedClusters::default();
        let keys = seeds.into_iter().flatten().flat_map(|s| s.cluster_keys()).collect_vec();

        for key in keys {
            let subsystem = key.subsystem();
            if subsystem == Subsystem::Micromegas {
                out.has_strips = true;
                continue;
            }
            if subsystem == Subsystem::Tpc
                && !(self.config.min_tpc_layer..self.config.max_tpc_layer).contains(&key.layer())
            {
                continue;
            }

            let Some(position) = event
                .clusters
                .find(key)
                .and_then(|c| event.positions.global_position(key, c, crossing))
            else {
                continue;
            };
            match subsystem {
                Subsystem::Tpc => out.tpc.push(position),
                Subsystem::Mvtx => {
                    out.mvtx.push(position);
                    out.silicon.push(position);
                }
                Subsystem::Intt => out.silicon.push(position),
                Subsystem::Micromegas | Subsystem::Other(_) => {}
            }
        }
        out
    }

    fn match_layer(
        &self,
        event: &EventInput<'_, F>,
        model: &TrackModel<F>,
        last_phi: F,
        index: usize,
        layer: &StripLayer<F>,
    ) -> Result<(usize, ClusterCandidate<F>), LayerSkip> {
        let crossing = model
            .project_to_cylinder(layer.radius(), last_phi)
            .ok_or(LayerSkip::NoCrossing)?;

        let tile_id = layer
            .find_tile_cylindrical(&crossing)
            .ok_or(LayerSkip::NoTile)?;
        let tile = layer.tile(tile_id).ok_or(LayerSkip::NoTile)?;

        let intersection = model.intersect_tile(tile).map_err(|e| {
            trace!("Tile {tile_id} of layer {}: {e}.", layer.id());
            LayerSkip::NoIntersection
        })?;
        let local = tile.local_from_world(&intersection).xy();

        let (Some(rphi_win), Some(z_win)) =
            (self.config.rphi_search_win(index), self.config.z_search_win(index))
        else {
            return Err(LayerSkip::OutsideWindow);
        };
        let hitset = layer.hitset(tile_id).ok_or(LayerSkip::NoTile)?;
        let candidates = event.clusters.in_hitset(hitset);

        let candidates = candidates.inspect(|(key, cluster)| {
            if self.config.test_windows {
                self.log_test_window(layer.id(), *key, cluster, &local, &intersection, rphi_win, z_win);
            }
        });

        let best = find_best_cluster(
            candidates,
            &local,
            layer.segmentation(),
            rphi_win,
            z_win,
            event.iteration_map,
        )
        .ok_or(LayerSkip::NoCandidate)?;

        if best.drphi.abs() < rphi_win && best.dz.abs() < z_win {
            Ok((tile_id, best))
        } else {
            Err(LayerSkip::OutsideWindow)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_test_window(
        &self,
        layer: u8,
        key: ClusterKey,
        cluster: &Cluster<F>,
        local: &Vector2<F>,
        projection: &Vector3<F>,
        rphi_win: F,
        z_win: F,
    ) {
        let drphi = local.x - cluster.local.x;
        let dz = local.y - cluster.local.y;
        if drphi.abs() < rphi_win && dz.abs() < z_win {
            let r = projection.xy().norm();
            trace!(
                "Candidate in windows: layer {layer} drphi {drphi:?} dz {dz:?} cluster {key} rphi_proj {:?} z_proj {:?}",
                r * projection.y.atan2(projection.x),
                projection.z
            );
        }
    }
}

/// Commit associations to the TPC seeds.
///
/// An association is refused if its seed is gone or already holds a strip cluster on the same
/// layer. Returns the number of clusters attached.
pub fn apply_associations<F: Float>(
    tpc_seeds: &mut SeedContainer<F>,
    associations: &[Association<F>],
) -> usize {
    let mut applied = 0;
    for association in associations {
        let Some(seed) = tpc_seeds.get_mut(association.tpc_seed) else {
            debug!("TPC seed {} vanished, association dropped.", association.tpc_seed);
            continue;
        };
        if seed.has_cluster_on(Subsystem::Micromegas, association.layer) {
            debug!(
                "TPC seed {} already has a cluster on layer {}.",
                association.tpc_seed, association.layer
            );
            continue;
        }
        if seed.insert_cluster_key(association.cluster_key) {
            applied += 1;
        }
    }
    applied
}
