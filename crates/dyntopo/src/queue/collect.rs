//! Candidate collection.
//!
//! Each dirty leaf is scanned on the rayon pool against the immutable mesh,
//! producing a private list of edges. The lists are merged into one
//! [`EdgeQueue`] on the calling thread. Long edges pull in neighboring edges
//! that are notably longer still, spreading subdivision evenly around the
//! brush instead of along a single edge strip.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, trace};

use super::{collapse_len_sq, split_len_sq, BrushRegion, EdgeQueue};
use crate::attributes::AttributeStore;
use crate::log::ChangeLog;
use crate::mesh::{EdgeId, FaceId, Mesh, VertId};
use crate::tree::{DyntopoTree, Node, NodeFlags, NodeId};

/// Part of the normal component removed from the smoothing offset
const NORMAL_DAMPING: f32 = 0.99;

/// Parameters of the long-edge ring expansion.
#[derive(Debug, Clone, Copy)]
struct Expansion {
    limit_len: f32,
    threshold: f32,
    generation_scale: f32,
    frontface_depth_start: u32,
    weighted: bool,
}

/// Where the expansion reports edges.
trait EdgeSink {
    fn seen(&self, mesh: &Mesh, e: EdgeId) -> bool;
    fn record(&mut self, mesh: &Mesh, e: EdgeId, len_sq: f32);
}

/// Per-task collection state.
#[derive(Debug, Default)]
struct TaskSink {
    tagged: HashSet<EdgeId>,
    edges: Vec<EdgeId>,
}

impl EdgeSink for TaskSink {
    fn seen(&self, _mesh: &Mesh, e: EdgeId) -> bool {
        self.tagged.contains(&e)
    }

    fn record(&mut self, _mesh: &Mesh, e: EdgeId, _len_sq: f32) {
        if self.tagged.insert(e) {
            self.edges.push(e);
        }
    }
}

/// Inserts straight into the queue; used when re-adding faces during a pass.
struct QueueSink<'q> {
    queue: &'q mut EdgeQueue,
    visited: HashSet<EdgeId>,
}

impl EdgeSink for QueueSink<'_> {
    fn seen(&self, mesh: &Mesh, e: EdgeId) -> bool {
        self.visited.contains(&e)
            || mesh
                .edge(e)
                .is_some_and(|edge| self.queue.contains(edge.v[0], edge.v[1]))
    }

    fn record(&mut self, mesh: &Mesh, e: EdgeId, len_sq: f32) {
        self.visited.insert(e);
        self.queue.insert(mesh, e, -len_sq);
    }
}

impl Expansion {
    /// Record `e`, reached from face `via`, then walk the other faces of `e`
    /// and follow their edges that are longer than both `len_sq` scaled by
    /// the threshold and the grown limit.
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        mesh: &Mesh,
        region: &BrushRegion,
        sink: &mut impl EdgeSink,
        e: EdgeId,
        via: FaceId,
        len_sq: f32,
        limit_len: f32,
        depth: u32,
    ) {
        if sink.seen(mesh, e) {
            return;
        }
        let Some(edge) = mesh.edge(e) else {
            return;
        };
        let others: Vec<FaceId> = edge.faces().iter().copied().filter(|&f| f != via).collect();

        if depth > self.frontface_depth_start && region.use_frontface {
            let facing = others.first().copied().unwrap_or(via);
            if mesh.face(facing).is_some_and(|face| !region.is_front_facing(face.no)) {
                return;
            }
        }

        sink.record(mesh, e, len_sq);

        if edge.faces().len() < 2 {
            return;
        }
        let len_sq_cmp = len_sq * self.threshold;
        let limit_len = limit_len * self.generation_scale;
        let limit_len_sq = limit_len * limit_len;

        for f in others {
            let Some(face) = mesh.face(f) else {
                continue;
            };
            for adjacent in face.e {
                if adjacent == e {
                    continue;
                }
                let Some(adj) = mesh.edge(adjacent) else {
                    continue;
                };
                let len_sq_other = split_len_sq(mesh, adj.v[0], adj.v[1], self.weighted);
                if len_sq_other > len_sq_cmp.max(limit_len_sq) {
                    self.expand(mesh, region, sink, adjacent, f, len_sq_other, limit_len, depth + 1);
                }
            }
        }
    }
}

/// Output of scanning one leaf for long edges.
#[derive(Debug, Default)]
struct LongTask {
    edges: Vec<EdgeId>,
    /// Distinct vertices of faces that produced a candidate
    nudge: Vec<VertId>,
}

fn collect_long_in_leaf(
    mesh: &Mesh,
    node: &Node,
    region: &BrushRegion,
    expansion: &Expansion,
) -> LongTask {
    let mut sink = TaskSink::default();
    let mut nudge = HashSet::new();
    let limit_len_sq = expansion.limit_len * expansion.limit_len;

    for &f in node.faces() {
        let Some(face) = mesh.face(f) else {
            continue;
        };
        if !region.is_front_facing(face.no) {
            continue;
        }
        let Some(tri) = mesh.face_positions(f) else {
            continue;
        };
        if !region.tri_in_range(tri) {
            continue;
        }

        let mut produced = false;
        for e in face.e {
            let Some(edge) = mesh.edge(e) else {
                continue;
            };
            let len_sq = split_len_sq(mesh, edge.v[0], edge.v[1], expansion.weighted);
            if len_sq > limit_len_sq {
                produced = true;
                expansion.expand(mesh, region, &mut sink, e, f, len_sq, expansion.limit_len, 0);
            }
        }
        if produced {
            nudge.extend(face.v);
        }
    }

    LongTask {
        edges: sink.edges,
        nudge: nudge.into_iter().collect(),
    }
}

fn collect_short_in_leaf(
    mesh: &Mesh,
    node: &Node,
    region: &BrushRegion,
    limit_len_sq: f32,
    weighted: bool,
) -> Vec<EdgeId> {
    let mut sink = TaskSink::default();
    for &f in node.faces() {
        let Some(face) = mesh.face(f) else {
            continue;
        };
        if !region.is_front_facing(face.no) {
            continue;
        }
        let Some(tri) = mesh.face_positions(f) else {
            continue;
        };
        if !region.tri_in_range(tri) {
            continue;
        }
        for e in face.e {
            let Some(edge) = mesh.edge(e) else {
                continue;
            };
            let len_sq = collapse_len_sq(mesh, edge.v[0], edge.v[1], weighted);
            if len_sq < limit_len_sq {
                sink.record(mesh, e, len_sq);
            }
        }
    }
    sink.edges
}

/// Averaged neighbor offset of `v` with the normal component mostly removed.
fn tangential_offset(mesh: &Mesh, v: VertId) -> Option<Vec3> {
    let vert = mesh.vertex(v)?;
    let mut sum = Vec3::ZERO;
    let mut count = 0;
    for n in mesh.vert_neighbors(v) {
        let tan = mesh.co(n) - vert.co;
        let d = tan.dot(vert.no);
        sum += tan - vert.no * (d * NORMAL_DAMPING);
        count += 1;
    }
    (count > 0).then(|| sum / count as f32)
}

/// Add `delta` to the float stored in `cell`. A concurrent writer wins the
/// race and this update is dropped.
fn cas_add(cell: &AtomicU32, delta: f32) {
    let old = cell.load(Ordering::Relaxed);
    let new = (f32::from_bits(old) + delta).to_bits();
    let _ = cell.compare_exchange(old, new, Ordering::Relaxed, Ordering::Relaxed);
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    fn expansion(&self) -> Expansion {
        Expansion {
            limit_len: self.config.max_edge_len(),
            threshold: self.config.even_edge_len_threshold,
            generation_scale: self.config.even_generation_scale,
            frontface_depth_start: self.config.frontface_depth_start,
            weighted: self.config.valence_weighted_edges,
        }
    }

    pub(crate) fn dirty_leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.wants_topology_pass())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Queue every edge longer than the maximum edge length (plus the even
    /// subdivision ring around each) in the brush region, longest first.
    pub(crate) fn long_edge_queue_create(&mut self, region: &BrushRegion) -> EdgeQueue {
        trace!("long_edge_queue_create: START");
        let expansion = self.expansion();
        let leaves = self.dirty_leaves();

        let mesh = &self.mesh;
        let nodes = &self.nodes;
        let tasks: Vec<LongTask> = leaves
            .par_iter()
            .map(|&ni| collect_long_in_leaf(mesh, &nodes[ni.index()], region, &expansion))
            .collect();

        let mut queue = EdgeQueue::new();
        for task in &tasks {
            for &e in &task.edges {
                let Some(edge) = self.mesh.edge(e) else {
                    continue;
                };
                let len_sq = split_len_sq(&self.mesh, edge.v[0], edge.v[1], expansion.weighted);
                queue.insert(&self.mesh, e, -len_sq);
            }
        }

        if self.config.smooth_factor > 0.0 {
            self.apply_tangential_smoothing(&tasks);
        }

        debug!(
            "long_edge_queue_create: {} candidates from {} leaves",
            queue.len(),
            leaves.len()
        );
        queue
    }

    /// Queue every edge shorter than the minimum edge length in the brush
    /// region, shortest first.
    pub(crate) fn short_edge_queue_create(&self, region: &BrushRegion) -> EdgeQueue {
        trace!("short_edge_queue_create: START");
        let min_len = self.config.min_edge_len();
        let limit_len_sq = min_len * min_len;
        let weighted = self.config.valence_weighted_edges;
        let leaves = self.dirty_leaves();

        let mesh = &self.mesh;
        let nodes = &self.nodes;
        let tasks: Vec<Vec<EdgeId>> = leaves
            .par_iter()
            .map(|&ni| collect_short_in_leaf(mesh, &nodes[ni.index()], region, limit_len_sq, weighted))
            .collect();

        let mut queue = EdgeQueue::new();
        for e in tasks.into_iter().flatten() {
            let Some(edge) = self.mesh.edge(e) else {
                continue;
            };
            let len_sq = collapse_len_sq(&self.mesh, edge.v[0], edge.v[1], weighted);
            queue.insert(&self.mesh, e, len_sq);
        }

        debug!(
            "short_edge_queue_create: {} candidates from {} leaves",
            queue.len(),
            leaves.len()
        );
        queue
    }

    /// Queue long edges of a face created during the subdivide pass.
    ///
    /// The face itself skips the front-face test; the ring expansion applies
    /// it from the first step.
    pub(crate) fn long_edge_queue_face_add(
        &self,
        queue: &mut EdgeQueue,
        region: &BrushRegion,
        f: FaceId,
    ) {
        let Some(face) = self.mesh.face(f) else {
            return;
        };
        let Some(tri) = self.mesh.face_positions(f) else {
            return;
        };
        if !region.tri_in_range(tri) {
            return;
        }

        let expansion = self.expansion();
        let limit_len_sq = expansion.limit_len * expansion.limit_len;
        let mut sink = QueueSink {
            queue,
            visited: HashSet::new(),
        };
        for e in face.e {
            let Some(edge) = self.mesh.edge(e) else {
                continue;
            };
            let len_sq = split_len_sq(&self.mesh, edge.v[0], edge.v[1], expansion.weighted);
            if len_sq > limit_len_sq {
                expansion.expand(
                    &self.mesh,
                    region,
                    &mut sink,
                    e,
                    f,
                    len_sq,
                    expansion.limit_len,
                    expansion.frontface_depth_start + 1,
                );
            }
        }
    }

    /// Nudge vertices that fed the long-edge queue along their tangent plane.
    ///
    /// Offsets are computed in parallel from the unmodified mesh and
    /// accumulated in shared atomic cells, then written back serially.
    fn apply_tangential_smoothing(&mut self, tasks: &[LongTask]) {
        let mut index_of = HashMap::new();
        let mut verts = Vec::new();
        for &v in tasks.iter().flat_map(|task| &task.nudge) {
            let Some(vert) = self.mesh.vertex(v) else {
                continue;
            };
            if vert.mask >= 1.0 || vert.is_hidden() || index_of.contains_key(&v) {
                continue;
            }
            index_of.insert(v, verts.len());
            verts.push(v);
        }
        if verts.is_empty() {
            return;
        }

        let cells: Vec<[AtomicU32; 3]> = verts
            .iter()
            .map(|&v| {
                let co = self.mesh.co(v);
                [co.x, co.y, co.z].map(|c| AtomicU32::new(c.to_bits()))
            })
            .collect();

        let factor = self.config.smooth_factor;
        let mesh = &self.mesh;
        tasks.par_iter().for_each(|task| {
            for v in &task.nudge {
                let Some(&i) = index_of.get(v) else {
                    continue;
                };
                let Some(offset) = tangential_offset(mesh, *v) else {
                    continue;
                };
                for (axis, cell) in cells[i].iter().enumerate() {
                    cas_add(cell, offset[axis] * factor);
                }
            }
        });

        let dirty = NodeFlags::UPDATE_BB | NodeFlags::UPDATE_NORMALS | NodeFlags::UPDATE_DRAW_BUFFERS;
        for (v, cell) in verts.into_iter().zip(&cells) {
            let co = Vec3::from_array(cell.each_ref().map(|c| f32::from_bits(c.load(Ordering::Relaxed))));
            if co == self.mesh.co(v) || !co.is_finite() {
                continue;
            }
            self.log.vertex_before_modify(&self.mesh, v);
            self.mesh.set_position(v, co);
            let touched: Vec<NodeId> = self
                .mesh
                .vert_faces(v)
                .into_iter()
                .filter_map(|f| self.mesh.face(f)?.node)
                .collect();
            for ni in touched {
                self.mark_node(ni, dirty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BrushRegion;
    use crate::tree::tests::{build_with, grid};
    use crate::types::{DyntopoConfig, TopologyUpdate, UpdateMode};

    fn config(detail_size: f32) -> DyntopoConfig {
        DyntopoConfig {
            detail_size,
            smooth_factor: 0.0,
            ..Default::default()
        }
    }

    fn region(center: Vec3, radius: f32) -> BrushRegion {
        BrushRegion::from_update(&TopologyUpdate::sphere(UpdateMode::SUBDIVIDE, center, radius))
    }

    #[test]
    fn test_long_queue_collects_every_edge_in_range() {
        let mut tree = build_with(grid(2), config(0.5));
        let mut queue = tree.long_edge_queue_create(&region(Vec3::new(1.0, 1.0, 0.0), 10.0));
        // 2x2 grid: 12 axis edges and 4 diagonals
        assert_eq!(queue.len(), 16);
        // Diagonals come first
        let first = queue.pop().unwrap();
        assert!((first.priority + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_long_queue_respects_radius_and_dirty_flags() {
        let mut tree = build_with(grid(4), config(0.5));
        let queue = tree.long_edge_queue_create(&region(Vec3::new(-5.0, -5.0, 0.0), 0.5));
        assert!(queue.is_empty());

        tree.nodes[0].flags.remove(NodeFlags::UPDATE_TOPOLOGY);
        let queue = tree.long_edge_queue_create(&region(Vec3::new(2.0, 2.0, 0.0), 10.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ring_expansion_reaches_longer_neighbors() {
        // Brush touches only the two faces around the corner vertex
        let mut tree = build_with(grid(3), config(0.9));
        let mut queue = tree.long_edge_queue_create(&region(Vec3::ZERO, 0.1));
        // Diagonal 1 - 6 lies outside the brush but is longer than 1.2x the
        // edge 1 - 5 it was reached through
        assert!(queue.contains(VertId(1), VertId(6)));
        assert!(!queue.contains(VertId(2), VertId(3)));
        while let Some(candidate) = queue.pop() {
            assert!(candidate.priority < -0.81);
        }
    }

    /// Face 0 looks up at +Z. Faces 1 and 2 fold under it and look down.
    /// Edge 0-1 is long; the folded edges 0-3 and 1-3 are longer still.
    fn folded_strip() -> Mesh {
        let positions = [
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.5, 1.0, 0.0),
            Vec3::new(0.5, 2.0, -0.5),
            Vec3::new(2.0, 1.5, -0.5),
        ];
        Mesh::from_triangles(&positions, &[[0, 1, 2], [1, 0, 3], [1, 3, 4]]).unwrap()
    }

    fn viewed_from_above(use_frontface: bool) -> BrushRegion {
        BrushRegion::from_update(&TopologyUpdate {
            view_normal: Some(Vec3::Z),
            use_frontface,
            ..TopologyUpdate::sphere(UpdateMode::SUBDIVIDE, Vec3::new(0.5, 0.5, 0.0), 10.0)
        })
    }

    #[test]
    fn test_ring_expansion_stops_at_back_faces() {
        let pruned = DyntopoConfig {
            frontface_depth_start: 0,
            ..config(0.9)
        };
        let mut tree = build_with(folded_strip(), pruned);
        let queue = tree.long_edge_queue_create(&viewed_from_above(true));
        // Only the edges of the front face survive
        assert_eq!(queue.len(), 3);
        assert!(queue.contains(VertId(0), VertId(1)));
        assert!(!queue.contains(VertId(0), VertId(3)));
        assert!(!queue.contains(VertId(1), VertId(3)));
    }

    #[test]
    fn test_ring_expansion_crosses_back_faces_before_depth_start() {
        let shallow = DyntopoConfig {
            frontface_depth_start: 5,
            ..config(0.9)
        };
        let mut tree = build_with(folded_strip(), shallow);
        let queue = tree.long_edge_queue_create(&viewed_from_above(true));
        // The folded ring is reached through edge 0-1, but faces 1 and 2
        // contribute nothing of their own
        assert_eq!(queue.len(), 5);
        assert!(queue.contains(VertId(0), VertId(3)));
        assert!(queue.contains(VertId(1), VertId(3)));
        assert!(!queue.contains(VertId(3), VertId(4)));

        let mut tree = build_with(folded_strip(), config(0.9));
        let queue = tree.long_edge_queue_create(&viewed_from_above(false));
        // Without the front-face test every face is scanned
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn test_short_queue_orders_shortest_first() {
        let mut mesh = grid(2);
        mesh.set_position(VertId(4), Vec3::new(0.9, 0.9, 0.0));
        let tree = build_with(mesh, config(1.0));
        // No edge is shorter than 0.4
        let queue = tree.short_edge_queue_create(&region(Vec3::new(1.0, 1.0, 0.0), 10.0));
        assert!(queue.is_empty());

        let mut mesh = grid(2);
        mesh.set_position(VertId(4), Vec3::new(0.2, 0.2, 0.0));
        let tree = build_with(mesh, config(1.0));
        let mut queue = tree.short_edge_queue_create(&region(Vec3::new(1.0, 1.0, 0.0), 10.0));
        let first = queue.pop().unwrap();
        assert!(first.v.contains(&VertId(4)) && first.v.contains(&VertId(0)));
        assert!((first.priority - 0.08).abs() < 1e-6);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_face_add_inserts_long_edges_of_new_face() {
        let tree = build_with(grid(1), config(0.5));
        let mut queue = EdgeQueue::new();
        let f = tree.mesh().faces().next().map(|(f, _)| f).unwrap();
        tree.long_edge_queue_face_add(&mut queue, &region(Vec3::ZERO, 10.0), f);
        assert!(queue.len() >= 3);
    }

    #[test]
    fn test_smoothing_moves_only_unmasked_vertices_tangentially() {
        let mut mesh = grid(2);
        mesh.set_mask(VertId(0), 1.0);
        let cfg = DyntopoConfig {
            detail_size: 0.5,
            smooth_factor: 0.05,
            ..Default::default()
        };
        let mut tree = build_with(mesh, cfg);
        // Pull the center off its symmetric spot so it has a net offset
        tree.mesh_mut().set_position(VertId(4), Vec3::new(1.3, 1.0, 0.0));
        tree.long_edge_queue_create(&region(Vec3::new(1.0, 1.0, 0.0), 10.0));

        assert_eq!(tree.mesh().co(VertId(0)), Vec3::ZERO);
        let center = tree.mesh().co(VertId(4));
        assert!(center.x < 1.3);
        assert_eq!(center.z, 0.0);
        assert!(!tree.change_log().is_empty());
    }
}
