//! Tree construction and leaf splitting.
//!
//! A leaf is split at the midpoint of the widest axis of its face-centroid
//! bounding box. Faces whose centroid lies below the midpoint go left. When
//! one side would come out empty (coincident centroids, NaN midpoint) the
//! faces are split in half by id instead, so each child always receives at
//! least one face.

use glam::Vec3;
use tracing::{debug, info, trace, warn};

use super::{DyntopoTree, Node, NodeFlags, NodeId, NodeKind, LEAF_REBUILT};
use crate::attributes::AttributeStore;
use crate::error::DyntopoError;
use crate::log::ChangeLog;
use crate::mesh::{FaceId, Mesh};
use crate::spatial::Aabb;
use crate::types::DyntopoConfig;

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Partition every face of `mesh` into a tree whose leaves hold at most
    /// `config.leaf_limit` faces (within `config.max_build_depth`).
    ///
    /// All leaves start flagged for a topology pass.
    pub fn build(
        mut mesh: Mesh,
        attrs: A,
        log: L,
        config: DyntopoConfig,
    ) -> Result<Self, DyntopoError> {
        trace!("build: START");
        config.validate()?;

        // Tags from a previous tree are meaningless here
        let verts: Vec<_> = mesh.vertices().map(|(v, _)| v).collect();
        for v in verts {
            if let Some(vert) = mesh.vertex_mut(v) {
                vert.node = None;
            }
        }
        let faces: Vec<FaceId> = mesh.faces().map(|(f, _)| f).collect();
        for &f in &faces {
            if let Some(face) = mesh.face_mut(f) {
                face.node = Some(NodeId::ROOT);
            }
        }

        let mut root = Node::leaf();
        root.faces = faces.into_iter().collect();

        let mut tree = Self {
            mesh,
            attrs,
            log,
            nodes: vec![root],
            config,
        };
        let max_depth = tree.config.max_build_depth;
        tree.split_leaf(NodeId::ROOT, 0, max_depth);
        tree.update_bounds();
        for node in &mut tree.nodes {
            node.orig_bounds = node.bounds;
        }

        info!(
            "build: {} faces, {} vertices into {} nodes ({} leaves)",
            tree.mesh.face_count(),
            tree.mesh.vert_count(),
            tree.nodes.len(),
            tree.leaf_count()
        );
        Ok(tree)
    }

    /// Split leaf `ni` until its descendants fit the leaf limit or `depth`
    /// reaches `max_depth`. Vertex ownership inside the subtree is
    /// re-derived.
    pub(crate) fn split_leaf(&mut self, ni: NodeId, depth: u32, max_depth: u32) {
        let face_count = self.nodes[ni.index()].faces.len();
        if face_count <= self.config.leaf_limit || depth >= max_depth {
            if face_count > self.config.leaf_limit {
                debug!(
                    "split_leaf: depth cap {} reached with {} faces in {:?}",
                    max_depth, face_count, ni
                );
            }
            self.finalize_leaf(ni);
            return;
        }

        let node = &mut self.nodes[ni.index()];
        let mut faces: Vec<FaceId> = node.faces.drain().collect();
        let released: Vec<_> = node.unique_verts.drain().collect();
        node.other_verts.clear();
        faces.sort_unstable();
        for &v in &released {
            if let Some(vert) = self.mesh.vertex_mut(v) {
                vert.node = None;
            }
        }

        let (left, right) = partition_faces(&self.mesh, &faces);

        let children = [NodeId(self.nodes.len() as u32), NodeId(self.nodes.len() as u32 + 1)];
        for (child, side) in children.iter().zip([left, right]) {
            let mut node = Node::leaf();
            for &f in &side {
                if let Some(face) = self.mesh.face_mut(f) {
                    face.node = Some(*child);
                }
            }
            node.faces = side.into_iter().collect();
            self.nodes.push(node);
        }

        let node = &mut self.nodes[ni.index()];
        node.kind = NodeKind::Internal { children };
        node.flags = NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB;

        for child in children {
            self.split_leaf(child, depth + 1, max_depth);
        }

        // Vertices only referenced from leaves outside this subtree
        for v in released {
            if self.mesh.vertex(v).is_some_and(|vert| vert.node.is_none()) {
                self.vert_relink(v);
            }
        }

        // Bounds of the new internal node come from its children
        let mut bounds = Aabb::empty();
        for child in children {
            bounds.include_aabb(&self.nodes[child.index()].bounds);
        }
        self.nodes[ni.index()].bounds = bounds;
    }

    /// Claim vertices of a leaf's faces and compute its bounds.
    fn finalize_leaf(&mut self, ni: NodeId) {
        let mut faces: Vec<FaceId> = self.nodes[ni.index()].faces.iter().copied().collect();
        faces.sort_unstable();

        let mut bounds = Aabb::empty();
        let mut all_hidden = !faces.is_empty();
        for f in faces {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            all_hidden &= face.is_hidden();
            for v in face.v {
                bounds.include_point(self.mesh.co(v));
                self.ensure_vert_in_node(ni, v);
            }
        }

        let node = &mut self.nodes[ni.index()];
        node.kind = NodeKind::Leaf;
        node.bounds = bounds;
        node.orig_bounds = bounds;
        node.flags = LEAF_REBUILT;
        node.flags.set(NodeFlags::FULLY_HIDDEN, all_hidden);
        trace!(
            "finalize_leaf: {:?} with {} faces, {} unique, {} other",
            ni,
            node.faces.len(),
            node.unique_verts.len(),
            node.other_verts.len()
        );
    }
}

/// Split sorted `faces` in two around the widest centroid axis.
fn partition_faces(mesh: &Mesh, faces: &[FaceId]) -> (Vec<FaceId>, Vec<FaceId>) {
    let centroids: Vec<Vec3> = faces.iter().map(|&f| mesh.face_centroid(f)).collect();
    let centroid_bounds = Aabb::from_points(centroids.iter().copied());
    let axis = centroid_bounds.widest_axis();
    let mid = centroid_bounds.center()[axis];

    let (left, right): (Vec<_>, Vec<_>) = faces
        .iter()
        .zip(&centroids)
        .partition(|(_, c)| c[axis] < mid);

    if left.is_empty() || right.is_empty() {
        warn!(
            "partition_faces: degenerate split of {} faces on axis {}, halving by id",
            faces.len(),
            axis
        );
        let half = faces.len() / 2;
        return (faces[..half].to_vec(), faces[half..].to_vec());
    }

    (
        left.into_iter().map(|(&f, _)| f).collect(),
        right.into_iter().map(|(&f, _)| f).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;
    use crate::mesh::VertId;
    use crate::tree::tests::{build_with, grid};

    #[test]
    fn test_single_triangle_is_one_leaf() {
        let mesh =
            Mesh::from_triangles(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[[0, 1, 2]]).unwrap();
        let tree = build_with(mesh, DyntopoConfig::default());
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.node_faces(NodeId::ROOT).unwrap().len(), 1);
        assert_eq!(tree.node_unique_vertices(NodeId::ROOT).unwrap().len(), 3);
        assert!(tree.node_other_vertices(NodeId::ROOT).unwrap().is_empty());
        assert!(tree.nodes()[0].flags.contains(NodeFlags::UPDATE_TOPOLOGY));
    }

    #[test]
    fn test_empty_mesh_yields_empty_leaf() {
        let tree = build_with(Mesh::new(), DyntopoConfig::default());
        assert_eq!(tree.nodes().len(), 1);
        assert!(tree.nodes()[0].is_leaf());
        assert!(tree.nodes()[0].faces().is_empty());
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn test_build_respects_leaf_limit() {
        let config = DyntopoConfig {
            leaf_limit: 5,
            ..Default::default()
        };
        let tree = build_with(grid(6), config);
        let mut total = 0;
        for leaf in tree.leaves() {
            let faces = tree.node_faces(leaf).unwrap().len();
            assert!(faces <= 5);
            assert!(faces >= 1);
            total += faces;
        }
        assert_eq!(total, 72);
        tree.verify().unwrap();
    }

    #[test]
    fn test_build_depth_cap() {
        let config = DyntopoConfig {
            leaf_limit: 1,
            max_build_depth: 1,
            ..Default::default()
        };
        let tree = build_with(grid(4), config);
        assert_eq!(tree.nodes().len(), 3);
        tree.verify().unwrap();
    }

    #[test]
    fn test_coincident_centroids_fall_back_to_halving() {
        // Two triangles sharing a centroid at the origin
        let positions = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(2.0, -1.0, 0.0),
            Vec3::new(-1.0, 2.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-2.0, 1.0, 0.0),
            Vec3::new(1.0, -2.0, 0.0),
        ];
        let mesh = Mesh::from_triangles(&positions, &[[0, 1, 2], [3, 4, 5]]).unwrap();
        let config = DyntopoConfig {
            leaf_limit: 1,
            ..Default::default()
        };
        let tree = build_with(mesh, config);
        assert_eq!(tree.leaf_count(), 2);
        for leaf in tree.leaves() {
            assert_eq!(tree.node_faces(leaf).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_shared_vertices_are_other_in_second_leaf() {
        let config = DyntopoConfig {
            leaf_limit: 1,
            ..Default::default()
        };
        let tree = build_with(quad(), config);
        assert_eq!(tree.leaf_count(), 2);
        let total_unique: usize = tree
            .leaves()
            .map(|l| tree.node_unique_vertices(l).unwrap().len())
            .sum();
        let total_other: usize = tree
            .leaves()
            .map(|l| tree.node_other_vertices(l).unwrap().len())
            .sum();
        assert_eq!(total_unique, 4);
        // The diagonal (0, 2) is shared
        assert_eq!(total_other, 2);
        let owner = tree.locate_vertex(VertId(0)).unwrap();
        assert!(tree.node_unique_vertices(owner).unwrap().contains(&VertId(0)));
    }

    #[test]
    fn test_bounds_enclose_leaf_vertices() {
        let config = DyntopoConfig {
            leaf_limit: 4,
            ..Default::default()
        };
        let tree = build_with(grid(4), config);
        for leaf in tree.leaves() {
            let node = tree.node(leaf).unwrap();
            for v in node.unique_verts().iter().chain(node.other_verts()) {
                assert!(node.bounds.contains_point(tree.mesh().co(*v)));
            }
        }
        let root = tree.node(NodeId::ROOT).unwrap();
        assert_eq!(root.bounds.min, Vec3::ZERO);
        assert_eq!(root.bounds.max, Vec3::new(4.0, 4.0, 0.0));
    }
}
