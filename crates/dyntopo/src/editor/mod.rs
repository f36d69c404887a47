//! Brush-driven topology update.
//!
//! One call runs up to three passes in a fixed order: collapse short edges,
//! split long edges, dissolve valence 3/4 vertices. Each queue pass drains
//! its candidates until it is empty, its step budget is spent or the time
//! limit passes. Afterwards the touched leaves are re-split if they grew past
//! the leaf limit and bounds are refreshed.

mod cleanup;
mod collapse;
mod split;

use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::attributes::AttributeStore;
use crate::log::ChangeLog;
use crate::queue::{collapse_len_sq, BrushRegion, LengthStats};
use crate::tree::{DyntopoTree, NodeFlags, NodeId};
use crate::types::{DyntopoConfig, TopologyUpdate, UpdateMode, UpdateStats};
use collapse::{resolve_deleted, DeletedVerts};

/// Step budget for a collapse pass. Meshes whose short edges are far below
/// the limit get more steps.
pub(crate) fn collapse_steps(config: &DyntopoConfig, stats: LengthStats) -> usize {
    let mut ratio = 1.0;
    let avg = stats.avg();
    let min_len = config.min_edge_len();
    if stats.count > 0 && avg > 0.0 && min_len > 0.0 {
        let emax = if stats.max == 0.0 { 0.0001 } else { stats.max };
        let (lo, hi) = config.collapse_ratio_band;
        ratio = (avg / (min_len * 0.5 + emax * 0.5)).clamp(lo, hi);
    }
    (config.max_iterations as f32 * ratio) as usize
}

/// Step budget for a subdivide pass. Skinny edges well past the limit
/// throttle splitting so the brush does not thrash.
pub(crate) fn subdivide_steps(config: &DyntopoConfig, stats: LengthStats) -> usize {
    let mut ratio = 1.0;
    let avg = stats.avg();
    if stats.count > 0 && avg > 0.0 {
        let emin = if stats.min == 0.0 { 0.0001 } else { stats.min };
        let (lo, hi) = config.subdivide_ratio_band;
        ratio = ((config.max_edge_len() * 0.5 + emin * 0.5) / avg).clamp(lo, hi);
    }
    (config.max_iterations as f32 * ratio) as usize
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Remesh the brush region. Returns whether the topology changed.
    ///
    /// Collecting long edges also smooths vertices tangentially (see
    /// `smooth_factor`), which moves and logs them even when no edge is split,
    /// collapsed or dissolved and this returns false.
    pub fn update_topology(&mut self, update: &TopologyUpdate) -> bool {
        self.update_topology_with_stats(update).modified()
    }

    /// Like [`Self::update_topology`], with per-pass counters.
    pub fn update_topology_with_stats(&mut self, update: &TopologyUpdate) -> UpdateStats {
        trace!("update_topology: START");
        let mut stats = UpdateStats::default();
        if !(update.radius > 0.0) || !update.center.is_finite() {
            debug!(
                "update_topology: empty brush (radius {}, center {})",
                update.radius, update.center
            );
            return stats;
        }

        let region = BrushRegion::from_update(update);
        if update.mode.contains(UpdateMode::COLLAPSE) {
            self.collapse_short_edges(&region, &mut stats);
        }
        if update.mode.contains(UpdateMode::SUBDIVIDE) {
            self.subdivide_long_edges(&region, &mut stats);
        }
        if update.mode.contains(UpdateMode::CLEANUP) {
            stats.vertices_dissolved += self.cleanup_valence_3_4(&region);
        }

        self.finish_topology_update(update, &stats);
        debug!(
            "update_topology: split {}, collapsed {}, dissolved {}, exhausted {}",
            stats.edges_split, stats.edges_collapsed, stats.vertices_dissolved, stats.budget_exhausted
        );
        stats
    }

    fn pass_deadline(&self) -> Option<Instant> {
        self.config
            .time_limit_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms))
    }

    fn collapse_short_edges(&mut self, region: &BrushRegion, stats: &mut UpdateStats) {
        let mut queue = self.short_edge_queue_create(region);
        let max_steps = collapse_steps(&self.config, queue.stats());
        let deadline = self.pass_deadline();
        let min_len = self.config.min_edge_len();
        let min_len_sq = min_len * min_len;
        let weighted = self.config.valence_weighted_edges;
        let mut deleted = DeletedVerts::new();

        let mut step = 0;
        while !queue.is_empty() {
            if step > max_steps || deadline.is_some_and(|d| Instant::now() >= d) {
                stats.budget_exhausted = true;
                break;
            }
            step += 1;
            let Some(candidate) = queue.pop() else {
                break;
            };

            let (Some(v1), Some(v2)) = (
                resolve_deleted(&deleted, candidate.v[0]),
                resolve_deleted(&deleted, candidate.v[1]),
            ) else {
                continue;
            };
            if v1 == v2 {
                continue;
            }
            let Some(e) = self.mesh.edge_between(v1, v2) else {
                continue;
            };
            if collapse_len_sq(&self.mesh, v1, v2, weighted) >= min_len_sq {
                continue;
            }
            // Vertices left behind by an earlier edit without a leaf
            if self.locate_vertex(v1).is_none() || self.locate_vertex(v2).is_none() {
                continue;
            }
            if self.collapse_edge(e, v1, v2, &mut deleted) {
                stats.edges_collapsed += 1;
            }
        }
        debug!(
            "collapse_short_edges: {} collapsed in {} of {} steps, {} left",
            stats.edges_collapsed,
            step,
            max_steps,
            queue.len()
        );
    }

    fn subdivide_long_edges(&mut self, region: &BrushRegion, stats: &mut UpdateStats) {
        let mut queue = self.long_edge_queue_create(region);
        let max_steps = subdivide_steps(&self.config, queue.stats());
        let deadline = self.pass_deadline();

        let mut step = 0;
        while !queue.is_empty() {
            if step > max_steps || deadline.is_some_and(|d| Instant::now() >= d) {
                stats.budget_exhausted = true;
                break;
            }
            step += 1;
            let Some(candidate) = queue.pop() else {
                break;
            };

            let [v1, v2] = candidate.v;
            let Some(e) = self.mesh.edge_between(v1, v2) else {
                continue;
            };
            if self.locate_vertex(v1).is_none() || self.locate_vertex(v2).is_none() {
                continue;
            }
            if self.split_edge(e, &mut queue, region) {
                stats.edges_split += 1;
            }
        }
        debug!(
            "subdivide_long_edges: {} split in {} of {} steps, {} left",
            stats.edges_split,
            step,
            max_steps,
            queue.len()
        );
    }

    /// Clear the topology flag of the leaves that were processed and keep
    /// them within the leaf limit.
    ///
    /// Leaves stay flagged when a pass ran out of budget so the next call
    /// picks up the remaining work. Leaves created by re-splitting start
    /// flagged as well.
    fn finish_topology_update(&mut self, update: &TopologyUpdate, stats: &UpdateStats) {
        let modified = stats.modified();
        let keep_flag = stats.budget_exhausted;

        // Splitting appends nodes; only the ones present now are visited
        let total = self.nodes.len();
        for i in 0..total {
            let node = &mut self.nodes[i];
            if modified {
                if !node.wants_topology_pass() {
                    continue;
                }
                if !keep_flag {
                    node.flags.remove(NodeFlags::UPDATE_TOPOLOGY);
                }
                if update.update_bounding_volumes {
                    if let Err(err) = self.ensure_leaf_limit(NodeId(i as u32)) {
                        warn!("finish_topology_update: {}", err);
                    }
                }
            } else if node.is_leaf() && !keep_flag {
                node.flags.remove(NodeFlags::UPDATE_TOPOLOGY);
            }
        }

        if modified && update.update_bounding_volumes {
            self.update_bounds();
        }

        if cfg!(debug_assertions) {
            if let Err(err) = self.verify() {
                error!("update_topology: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeLayers;
    use crate::log::{LogEntry, RecordingLog};
    use crate::mesh::tests::quad;
    use crate::mesh::{Mesh, VertId};
    use crate::tree::tests::{build_with, grid, octahedron};
    use glam::Vec3;

    fn no_smoothing(detail_size: f32, detail_range: f32) -> DyntopoConfig {
        DyntopoConfig {
            detail_size,
            detail_range,
            smooth_factor: 0.0,
            ..Default::default()
        }
    }

    fn positions(mesh: &Mesh) -> Vec<Vec3> {
        mesh.vertices().map(|(_, v)| v.co).collect()
    }

    fn assert_clean(tree: &DyntopoTree<AttributeLayers, RecordingLog>) {
        tree.verify().unwrap();
        for (_, edge) in tree.mesh().edges() {
            assert!(!edge.is_wire());
        }
        for (_, face) in tree.mesh().faces() {
            let [a, b, c] = face.v;
            assert!(a != b && b != c && a != c);
        }
    }

    /// Every leaf box is refreshed and encloses the leaf's vertices.
    fn assert_bounds_fresh(tree: &DyntopoTree<AttributeLayers, RecordingLog>) {
        for leaf in tree.leaves() {
            let node = tree.node(leaf).unwrap();
            assert!(!node.flags.contains(NodeFlags::UPDATE_BB));
            for &v in node.unique_verts().iter().chain(node.other_verts()) {
                assert!(node.bounds.contains_point(tree.mesh().co(v)));
            }
        }
    }

    #[test]
    fn test_single_triangle_subdivides_longest_edge() {
        let mesh = Mesh::from_triangles(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[[0, 1, 2]]).unwrap();
        let config = DyntopoConfig {
            detail_size: 1.2,
            ..Default::default()
        };
        let mut tree = build_with(mesh, config);
        assert_eq!(tree.leaf_count(), 1);

        let update = TopologyUpdate::sphere(UpdateMode::SUBDIVIDE, Vec3::new(0.3, 0.3, 0.0), 10.0);
        let stats = tree.update_topology_with_stats(&update);
        assert!(stats.modified());
        assert_eq!(stats.edges_split, 1);
        assert!(!stats.budget_exhausted);
        assert_eq!(tree.mesh().face_count(), 2);
        assert_eq!(tree.mesh().vert_count(), 4);

        let mid = VertId(3);
        for (_, face) in tree.mesh().faces() {
            assert!(face.v.contains(&mid));
        }
        assert_clean(&tree);
    }

    #[test]
    fn test_zero_radius_is_a_no_op() {
        let mut tree = build_with(grid(2), no_smoothing(0.5, 0.4));
        let before = positions(tree.mesh());
        let update = TopologyUpdate::sphere(UpdateMode::default(), Vec3::ONE, 0.0);
        assert!(!tree.update_topology(&update));
        assert_eq!(positions(tree.mesh()), before);
        assert!(tree.change_log().is_empty());
        // Flags are left for the next real call
        assert!(tree.nodes()[0].flags.contains(NodeFlags::UPDATE_TOPOLOGY));
    }

    #[test]
    fn test_edges_within_band_are_left_alone() {
        // Unit sides and sqrt(2) diagonals all sit inside [0.8, 2.0]
        let mut tree = build_with(grid(2), DyntopoConfig {
            detail_size: 2.0,
            detail_range: 0.4,
            ..Default::default()
        });
        let before = positions(tree.mesh());
        let update = TopologyUpdate::sphere(UpdateMode::default(), Vec3::new(1.0, 1.0, 0.0), 10.0);
        let stats = tree.update_topology_with_stats(&update);
        assert_eq!(stats, UpdateStats::default());
        assert_eq!(tree.mesh().face_count(), 8);
        assert_eq!(positions(tree.mesh()), before);
        assert!(tree.change_log().is_empty());
        assert!(!tree.nodes()[0].flags.contains(NodeFlags::UPDATE_TOPOLOGY));
    }

    #[test]
    fn test_passes_keep_tree_consistent() {
        let config = DyntopoConfig {
            leaf_limit: 8,
            ..no_smoothing(0.6, 0.4)
        };
        let mut tree = build_with(grid(4), config);
        let center = Vec3::new(2.0, 2.0, 0.0);

        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(UpdateMode::SUBDIVIDE, center, 10.0));
        assert!(stats.edges_split > 0);
        assert_clean(&tree);
        assert_bounds_fresh(&tree);
        assert!(tree.leaf_count() > 1);
        let faces_after_split = tree.mesh().face_count();
        assert!(faces_after_split > 32);

        // Coarsen back with a larger detail size
        tree.set_detail_size(1.5, 0.6).unwrap();
        tree.mark_topology_dirty_in_sphere(center, 10.0);
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(UpdateMode::COLLAPSE, center, 10.0));
        assert!(stats.edges_collapsed > 0);
        assert!(tree.mesh().face_count() < faces_after_split);
        assert_clean(&tree);
        assert_bounds_fresh(&tree);

        tree.mark_topology_dirty_in_sphere(center, 10.0);
        tree.update_topology(&TopologyUpdate::sphere(UpdateMode::CLEANUP, center, 10.0));
        assert_clean(&tree);
        assert_bounds_fresh(&tree);

        tree.after_stroke();
        assert_clean(&tree);
        assert_bounds_fresh(&tree);
    }

    #[test]
    fn test_split_then_collapse_restores_face_count() {
        // Only the diagonal is longer than 1.2; only its halves are shorter
        // than 0.744
        let mut tree = build_with(quad(), no_smoothing(1.2, 0.62));
        let center = Vec3::new(0.5, 0.5, 0.0);

        assert!(tree.update_topology(&TopologyUpdate::sphere(UpdateMode::SUBDIVIDE, center, 5.0)));
        assert_eq!(tree.mesh().face_count(), 4);
        assert_eq!(tree.mesh().vert_count(), 5);

        tree.mark_topology_dirty(NodeId::ROOT).unwrap();
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(UpdateMode::COLLAPSE, center, 5.0));
        assert_eq!(stats.edges_collapsed, 1);
        assert_eq!(tree.mesh().face_count(), 2);
        assert_eq!(tree.mesh().vert_count(), 4);
        assert_clean(&tree);
    }

    #[test]
    fn test_fully_masked_region_is_untouched() {
        let mut mesh = grid(2);
        let verts: Vec<VertId> = mesh.vertices().map(|(v, _)| v).collect();
        for v in verts {
            mesh.set_mask(v, 1.0);
        }
        let mut tree = build_with(mesh, DyntopoConfig {
            detail_size: 0.4,
            ..Default::default()
        });
        let before = positions(tree.mesh());
        let update = TopologyUpdate::sphere(
            UpdateMode::all(),
            Vec3::new(1.0, 1.0, 0.0),
            10.0,
        );
        assert!(!tree.update_topology(&update));
        assert_eq!(tree.mesh().face_count(), 8);
        assert_eq!(positions(tree.mesh()), before);
        assert_eq!(
            tree.change_log().count_where(|e| matches!(e, LogEntry::VertexModified { .. })),
            0
        );
    }

    #[test]
    fn test_step_budget_keeps_leaf_dirty() {
        let config = DyntopoConfig {
            max_iterations: 1,
            ..no_smoothing(0.4, 0.4)
        };
        let mut tree = build_with(grid(2), config);
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(
            UpdateMode::SUBDIVIDE,
            Vec3::new(1.0, 1.0, 0.0),
            10.0,
        ));
        assert!(stats.budget_exhausted);
        assert!(stats.edges_split >= 1);
        assert!(tree.nodes()[0].flags.contains(NodeFlags::UPDATE_TOPOLOGY));
        assert_clean(&tree);
    }

    #[test]
    fn test_time_limit_stops_pass() {
        let config = DyntopoConfig {
            time_limit_ms: Some(0),
            ..no_smoothing(0.4, 0.4)
        };
        let mut tree = build_with(grid(2), config);
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(
            UpdateMode::SUBDIVIDE,
            Vec3::new(1.0, 1.0, 0.0),
            10.0,
        ));
        assert!(stats.budget_exhausted);
        assert_eq!(stats.edges_split, 0);
        assert!(tree.nodes()[0].flags.contains(NodeFlags::UPDATE_TOPOLOGY));
    }

    #[test]
    fn test_smoothing_alone_is_not_a_topology_change() {
        let config = DyntopoConfig {
            detail_size: 0.3,
            time_limit_ms: Some(0),
            ..Default::default()
        };
        let mut tree = build_with(octahedron(), config);
        let before = positions(tree.mesh());
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(
            UpdateMode::SUBDIVIDE,
            Vec3::ZERO,
            10.0,
        ));
        assert!(!stats.modified());
        assert!(stats.budget_exhausted);
        assert_eq!(tree.mesh().face_count(), 8);
        assert_ne!(positions(tree.mesh()), before);
        assert!(tree.change_log().count_where(|e| matches!(e, LogEntry::VertexModified { .. })) > 0);
    }

    #[test]
    fn test_cleanup_mode_through_update() {
        let mut tree = build_with(octahedron(), DyntopoConfig::default());
        let stats = tree.update_topology_with_stats(&TopologyUpdate::sphere(UpdateMode::CLEANUP, Vec3::Z, 0.5));
        assert_eq!(stats.vertices_dissolved, 1);
        assert_eq!(tree.mesh().face_count(), 6);
        assert_clean(&tree);
    }

    #[test]
    fn test_collapse_steps_band() {
        let config = DyntopoConfig::default();
        assert_eq!(collapse_steps(&config, LengthStats::default()), 4096);
        // Tiny edges relative to the limit hit the lower clamp
        let tiny = LengthStats {
            total: 0.02,
            count: 2,
            min: 0.01,
            max: 0.01,
        };
        assert_eq!(collapse_steps(&config, tiny), 1024);
    }

    #[test]
    fn test_subdivide_steps_band() {
        let config = DyntopoConfig::default();
        assert_eq!(subdivide_steps(&config, LengthStats::default()), 4096);
        // Very long edges throttle splitting down to the lower clamp
        let long = LengthStats {
            total: 100.0,
            count: 1,
            min: 0.0,
            max: 100.0,
        };
        assert_eq!(subdivide_steps(&config, long), (4096.0_f32 * 0.05) as usize);
    }
}
