//! Bounding-volume hierarchy over the mesh faces.
//!
//! Leaves own a disjoint set of faces. Every vertex used by a leaf's faces is
//! either *unique* to that leaf (the leaf owns it) or *other* (owned by a
//! different leaf). The owning leaf of each element is also tagged on the mesh
//! element itself so lookups are O(1) in both directions.
//!
//! ```text
//!              [0] internal
//!             /            \
//!     [1] leaf              [2] internal
//!     faces {..}           /            \
//!     unique {..}     [3] leaf        [4] leaf
//!     other {..}
//! ```
//!
//! Node 0 is always the root. Child indices are plain `NodeId`s into the node
//! vector; joining subtrees compacts the vector and rewrites every tag.

mod build;
mod maintenance;
mod ownership;
mod raycast;
mod verify;

pub use raycast::{ray_triangle_intersection, NearestHit, RayHit, TriangleHit};

use std::collections::HashSet;

use bitflags::bitflags;
use glam::Vec3;

use crate::attributes::{AttributeLayers, AttributeStore};
use crate::error::DyntopoError;
use crate::log::{ChangeLog, NullLog};
use crate::mesh::{FaceId, Mesh, VertId};
use crate::spatial::Aabb;
use crate::types::DyntopoConfig;

/// Type-safe node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Pending work and state for one node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u16 {
        const UPDATE_NORMALS = 1 << 0;
        const UPDATE_BB = 1 << 1;
        const UPDATE_ORIGINAL_BB = 1 << 2;
        /// Leaf takes part in the next topology pass
        const UPDATE_TOPOLOGY = 1 << 3;
        /// Triangulation cache is stale
        const UPDATE_TRIS = 1 << 4;
        const UPDATE_DRAW_BUFFERS = 1 << 5;
        /// Every face of the leaf is hidden
        const FULLY_HIDDEN = 1 << 6;
    }
}

/// Flags a freshly partitioned leaf starts with.
pub(crate) const LEAF_REBUILT: NodeFlags = NodeFlags::UPDATE_NORMALS
    .union(NodeFlags::UPDATE_TOPOLOGY)
    .union(NodeFlags::UPDATE_TRIS)
    .union(NodeFlags::UPDATE_DRAW_BUFFERS);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal { children: [NodeId; 2] },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub bounds: Aabb,
    /// Bounds at the start of the current stroke
    pub orig_bounds: Aabb,
    pub flags: NodeFlags,
    pub(crate) faces: HashSet<FaceId>,
    pub(crate) unique_verts: HashSet<VertId>,
    pub(crate) other_verts: HashSet<VertId>,
}

impl Node {
    pub(crate) fn leaf() -> Self {
        Self {
            kind: NodeKind::Leaf,
            bounds: Aabb::empty(),
            orig_bounds: Aabb::empty(),
            flags: NodeFlags::empty(),
            faces: HashSet::new(),
            unique_verts: HashSet::new(),
            other_verts: HashSet::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub fn children(&self) -> Option<[NodeId; 2]> {
        match self.kind {
            NodeKind::Leaf => None,
            NodeKind::Internal { children } => Some(children),
        }
    }

    pub fn faces(&self) -> &HashSet<FaceId> {
        &self.faces
    }

    pub fn unique_verts(&self) -> &HashSet<VertId> {
        &self.unique_verts
    }

    pub fn other_verts(&self) -> &HashSet<VertId> {
        &self.other_verts
    }

    pub fn is_fully_hidden(&self) -> bool {
        self.flags.contains(NodeFlags::FULLY_HIDDEN)
    }

    /// Leaf is dirty for topology and has visible faces.
    pub(crate) fn wants_topology_pass(&self) -> bool {
        self.is_leaf()
            && self.flags.contains(NodeFlags::UPDATE_TOPOLOGY)
            && !self.flags.contains(NodeFlags::FULLY_HIDDEN)
    }
}

/// Dynamic-topology tree owning the mesh and its collaborators.
///
/// `A` receives attribute interpolation requests and `L` receives undo
/// records for every element the engine touches.
#[derive(Debug)]
pub struct DyntopoTree<A: AttributeStore = AttributeLayers, L: ChangeLog = NullLog> {
    pub(crate) mesh: Mesh,
    pub(crate) attrs: A,
    pub(crate) log: L,
    pub(crate) nodes: Vec<Node>,
    pub(crate) config: DyntopoConfig,
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Direct mesh access. Position edits made here are not logged; call
    /// [`Self::set_vertex_position`] for tracked edits or refresh bounds
    /// afterwards with [`Self::update_bounds`].
    pub fn mesh_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    pub fn attributes(&self) -> &A {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut A {
        &mut self.attrs
    }

    pub fn change_log(&self) -> &L {
        &self.log
    }

    pub fn change_log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    pub fn config(&self) -> &DyntopoConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_parts(self) -> (Mesh, A, L) {
        (self.mesh, self.attrs, self.log)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, DyntopoError> {
        self.nodes.get(id.index()).ok_or(DyntopoError::UnknownNode(id))
    }

    fn leaf(&self, id: NodeId) -> Result<&Node, DyntopoError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            Ok(node)
        } else {
            Err(DyntopoError::NotALeaf(id))
        }
    }

    pub(crate) fn node_mut_opt(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Ids of all leaves, in node order.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| NodeId(i as u32))
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn node_faces(&self, id: NodeId) -> Result<&HashSet<FaceId>, DyntopoError> {
        Ok(&self.leaf(id)?.faces)
    }

    pub fn node_unique_vertices(&self, id: NodeId) -> Result<&HashSet<VertId>, DyntopoError> {
        Ok(&self.leaf(id)?.unique_verts)
    }

    pub fn node_other_vertices(&self, id: NodeId) -> Result<&HashSet<VertId>, DyntopoError> {
        Ok(&self.leaf(id)?.other_verts)
    }

    /// Leaf owning `v`, if the vertex is tracked.
    pub fn locate_vertex(&self, v: VertId) -> Option<NodeId> {
        self.mesh.vertex(v)?.node
    }

    /// Leaf owning `f`.
    pub fn locate_face(&self, f: FaceId) -> Option<NodeId> {
        self.mesh.face(f)?.node
    }

    /// Include `id` in the next topology pass.
    pub fn mark_topology_dirty(&mut self, id: NodeId) -> Result<(), DyntopoError> {
        self.leaf(id)?;
        self.nodes[id.index()].flags |= NodeFlags::UPDATE_TOPOLOGY;
        Ok(())
    }

    /// Mark every leaf whose bounds touch the sphere. Returns how many were
    /// marked.
    pub fn mark_topology_dirty_in_sphere(&mut self, center: Vec3, radius: f32) -> usize {
        let mut marked = 0;
        for node in self.nodes.iter_mut().filter(|n| n.is_leaf()) {
            if node.bounds.intersects_sphere(center, radius) {
                node.flags |= NodeFlags::UPDATE_TOPOLOGY;
                marked += 1;
            }
        }
        marked
    }

    /// Move a vertex, logging the old state and flagging affected leaves.
    pub fn set_vertex_position(&mut self, v: VertId, co: Vec3) {
        if self.mesh.vertex(v).is_none() {
            return;
        }
        self.log.vertex_before_modify(&self.mesh, v);
        self.mesh.set_position(v, co);

        let dirty = NodeFlags::UPDATE_BB
            | NodeFlags::UPDATE_NORMALS
            | NodeFlags::UPDATE_DRAW_BUFFERS;
        let owner = self.mesh.vertex(v).and_then(|vert| vert.node);
        let face_nodes: Vec<NodeId> = self
            .mesh
            .vert_faces(v)
            .into_iter()
            .filter_map(|f| self.mesh.face(f).and_then(|face| face.node))
            .chain(owner)
            .collect();
        for ni in face_nodes {
            if let Some(node) = self.node_mut_opt(ni) {
                node.flags |= dirty;
            }
        }
    }

    /// Change a vertex mask, logging the old value.
    pub fn set_vertex_mask(&mut self, v: VertId, mask: f32) {
        if self.mesh.vertex(v).is_none() {
            return;
        }
        self.log.vertex_before_modify(&self.mesh, v);
        self.mesh.set_mask(v, mask);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::log::RecordingLog;

    /// Flat `n x n` quad grid in the XY plane with unit spacing, two
    /// triangles per cell, facing +Z.
    pub(crate) fn grid(n: usize) -> Mesh {
        let mut positions = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                positions.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let row = (n + 1) as u32;
        let mut tris = Vec::new();
        for y in 0..n as u32 {
            for x in 0..n as u32 {
                let a = y * row + x;
                let b = a + 1;
                let c = a + row + 1;
                let d = a + row;
                tris.push([a, b, c]);
                tris.push([a, c, d]);
            }
        }
        Mesh::from_triangles(&positions, &tris).unwrap()
    }

    /// Regular octahedron of radius 1 (closed, every vertex valence 4).
    pub(crate) fn octahedron() -> Mesh {
        let positions = [
            Vec3::X,
            Vec3::Y,
            Vec3::NEG_X,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        let tris = [
            [0, 1, 4],
            [1, 2, 4],
            [2, 3, 4],
            [3, 0, 4],
            [1, 0, 5],
            [2, 1, 5],
            [3, 2, 5],
            [0, 3, 5],
        ];
        Mesh::from_triangles(&positions, &tris).unwrap()
    }

    pub(crate) fn build_with(mesh: Mesh, config: DyntopoConfig) -> DyntopoTree<AttributeLayers, RecordingLog> {
        DyntopoTree::build(mesh, AttributeLayers::new(), RecordingLog::new(), config).unwrap()
    }

    #[test]
    fn test_leaf_accessors_reject_internal_nodes() {
        let config = DyntopoConfig {
            leaf_limit: 4,
            ..Default::default()
        };
        let tree = build_with(grid(4), config);
        assert!(!tree.node(NodeId::ROOT).unwrap().is_leaf());
        assert_eq!(
            tree.node_faces(NodeId::ROOT).unwrap_err(),
            DyntopoError::NotALeaf(NodeId::ROOT)
        );
        assert_eq!(
            tree.node_faces(NodeId(999)).unwrap_err(),
            DyntopoError::UnknownNode(NodeId(999))
        );
    }

    #[test]
    fn test_locate_matches_node_sets() {
        let config = DyntopoConfig {
            leaf_limit: 8,
            ..Default::default()
        };
        let tree = build_with(grid(4), config);
        for leaf in tree.leaves() {
            for &f in tree.node_faces(leaf).unwrap() {
                assert_eq!(tree.locate_face(f), Some(leaf));
            }
            for &v in tree.node_unique_vertices(leaf).unwrap() {
                assert_eq!(tree.locate_vertex(v), Some(leaf));
            }
        }
    }

    #[test]
    fn test_mark_topology_dirty_in_sphere() {
        let config = DyntopoConfig {
            leaf_limit: 4,
            ..Default::default()
        };
        let mut tree = build_with(grid(4), config);
        let leaves: Vec<NodeId> = tree.leaves().collect();
        for &leaf in &leaves {
            tree.nodes[leaf.index()].flags.remove(NodeFlags::UPDATE_TOPOLOGY);
        }
        let marked = tree.mark_topology_dirty_in_sphere(Vec3::new(0.5, 0.5, 0.0), 0.25);
        assert!(marked >= 1);
        assert!(marked < leaves.len());
        assert!(tree.mark_topology_dirty(NodeId::ROOT).is_err());
    }

    #[test]
    fn test_set_vertex_position_logs_and_flags() {
        let mut tree = build_with(grid(2), DyntopoConfig::default());
        tree.nodes[0].flags = NodeFlags::empty();
        tree.set_vertex_position(VertId(4), Vec3::new(1.0, 1.0, 0.5));

        assert_eq!(tree.mesh().co(VertId(4)), Vec3::new(1.0, 1.0, 0.5));
        assert_eq!(tree.change_log().len(), 1);
        assert!(tree.nodes[0].flags.contains(NodeFlags::UPDATE_BB));
    }
}
