//! Element creation and removal that keeps leaf sets, mesh tags and the
//! change log consistent.

use glam::Vec3;
use tracing::{error, warn};

use super::{DyntopoTree, NodeFlags, NodeId};
use crate::attributes::{corner_index, AttrDomain, AttributeStore};
use crate::log::ChangeLog;
use crate::mesh::{ElemFlags, FaceId, VertId};

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    pub(crate) fn mark_node(&mut self, ni: NodeId, flags: NodeFlags) {
        if let Some(node) = self.node_mut_opt(ni) {
            node.flags |= flags;
        }
    }

    /// Create a vertex owned by leaf `ni`.
    pub(crate) fn vert_create(
        &mut self,
        ni: NodeId,
        co: Vec3,
        no: Vec3,
        mask: f32,
        flags: ElemFlags,
    ) -> VertId {
        let v = self.mesh.add_vertex(co, no);
        if let Some(vert) = self.mesh.vertex_mut(v) {
            vert.flags = flags;
            vert.mask = mask;
            vert.orig_mask = mask;
            vert.node = Some(ni);
        }
        self.attrs.set_default(AttrDomain::Vertex, v.0);

        if let Some(node) = self.node_mut_opt(ni) {
            node.unique_verts.insert(v);
            node.flags |=
                NodeFlags::UPDATE_DRAW_BUFFERS | NodeFlags::UPDATE_BB | NodeFlags::UPDATE_TRIS;
        }
        self.log.vertex_added(&self.mesh, v);
        v
    }

    /// Create a face in leaf `ni`.
    ///
    /// Face flags and face attributes come from `example`. Corner data is left
    /// to the caller. With `ensure_verts`, untracked vertices become unique to
    /// `ni` and vertices owned elsewhere are recorded as other vertices.
    /// Callers must check the face does not exist yet.
    pub(crate) fn face_create(
        &mut self,
        ni: NodeId,
        verts: [VertId; 3],
        example: Option<FaceId>,
        ensure_verts: bool,
    ) -> FaceId {
        let f = self.mesh.add_face(verts);
        let example_flags = example
            .and_then(|ex| self.mesh.face(ex))
            .map_or(ElemFlags::empty(), |face| face.flags);
        if let Some(face) = self.mesh.face_mut(f) {
            face.flags = example_flags;
            face.node = Some(ni);
        }
        match example {
            Some(ex) => self.attrs.copy(AttrDomain::Face, f.0, ex.0),
            None => self.attrs.set_default(AttrDomain::Face, f.0),
        }

        if let Some(node) = self.node_mut_opt(ni) {
            node.faces.insert(f);
            node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS
                | NodeFlags::UPDATE_NORMALS
                | NodeFlags::UPDATE_TRIS;
            node.flags.remove(NodeFlags::FULLY_HIDDEN);
        }
        self.log.face_added(&self.mesh, f);

        if ensure_verts {
            for v in verts {
                self.ensure_vert_in_node(ni, v);
            }
        }
        f
    }

    /// Make sure leaf `ni` lists `v`, claiming it if nothing owns it.
    pub(crate) fn ensure_vert_in_node(&mut self, ni: NodeId, v: VertId) {
        let owner = self.mesh.vertex(v).and_then(|vert| vert.node);
        match owner {
            None => {
                if let Some(vert) = self.mesh.vertex_mut(v) {
                    vert.node = Some(ni);
                }
                if let Some(node) = self.node_mut_opt(ni) {
                    node.unique_verts.insert(v);
                    node.other_verts.remove(&v);
                    node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS
                        | NodeFlags::UPDATE_BB
                        | NodeFlags::UPDATE_TRIS;
                }
            }
            Some(owner) if owner != ni => {
                if let Some(node) = self.node_mut_opt(ni) {
                    if node.other_verts.insert(v) {
                        node.flags |= NodeFlags::UPDATE_BB;
                    }
                }
            }
            Some(_) => {}
        }
    }

    /// Number of faces of `v` in leaf `ni`, counting no further than `max`.
    pub(crate) fn node_vert_use_count_at_most(&self, ni: NodeId, v: VertId, max: usize) -> usize {
        let mut count = 0;
        for f in self.mesh.vert_faces(v) {
            if self.mesh.face(f).and_then(|face| face.node) == Some(ni) {
                count += 1;
                if count == max {
                    break;
                }
            }
        }
        count
    }

    /// A leaf other than the owner that has a face using `v`.
    pub(crate) fn vert_other_node_find(&self, v: VertId) -> Option<NodeId> {
        let current = self.mesh.vertex(v)?.node;
        self.mesh
            .vert_faces(v)
            .into_iter()
            .filter_map(|f| self.mesh.face(f)?.node)
            .find(|&n| Some(n) != current)
    }

    pub(crate) fn vert_ownership_transfer(&mut self, new_owner: NodeId, v: VertId) {
        let current = self.mesh.vertex(v).and_then(|vert| vert.node);
        if let Some(current) = current {
            debug_assert_ne!(current, new_owner);
            if let Some(node) = self.node_mut_opt(current) {
                node.unique_verts.remove(&v);
                node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS | NodeFlags::UPDATE_BB;
            }
        }
        if let Some(vert) = self.mesh.vertex_mut(v) {
            vert.node = Some(new_owner);
        }
        if let Some(node) = self.node_mut_opt(new_owner) {
            node.unique_verts.insert(v);
            node.other_verts.remove(&v);
            node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS | NodeFlags::UPDATE_BB;
        }
    }

    /// Detach `v` from its owner and from every leaf using it.
    pub(crate) fn vert_remove(&mut self, v: VertId) {
        let owner = self.mesh.vertex(v).and_then(|vert| vert.node);
        if let Some(owner) = owner {
            if let Some(node) = self.node_mut_opt(owner) {
                node.unique_verts.remove(&v);
            }
        }
        if let Some(vert) = self.mesh.vertex_mut(v) {
            vert.node = None;
        }

        let mut prev = None;
        for f in self.mesh.vert_faces(v) {
            let Some(ni) = self.mesh.face(f).and_then(|face| face.node) else {
                continue;
            };
            // Neighboring faces usually share a leaf
            if prev == Some(ni) {
                continue;
            }
            prev = Some(ni);
            if let Some(node) = self.node_mut_opt(ni) {
                node.other_verts.remove(&v);
                node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS
                    | NodeFlags::UPDATE_BB
                    | NodeFlags::UPDATE_TRIS;
            }
        }
    }

    /// Detach `f` from its leaf, handing off vertices only it referenced.
    /// The face stays in the mesh.
    pub(crate) fn face_remove(&mut self, f: FaceId) {
        let Some(face) = self.mesh.face(f) else {
            warn!("face_remove: stale face {:?}", f);
            return;
        };
        let verts = face.v;
        let Some(ni) = face.node else {
            error!("face_remove: face {:?} has no owning leaf", f);
            return;
        };

        for v in verts {
            if self.node_vert_use_count_at_most(ni, v, 2) != 1 {
                continue;
            }
            let unique_here = self
                .nodes
                .get(ni.index())
                .is_some_and(|node| node.unique_verts.contains(&v));
            if unique_here {
                if let Some(new_node) = self.vert_other_node_find(v) {
                    self.vert_ownership_transfer(new_node, v);
                }
            } else if let Some(node) = self.node_mut_opt(ni) {
                node.other_verts.remove(&v);
            }
        }

        if let Some(node) = self.node_mut_opt(ni) {
            node.faces.remove(&f);
            node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS
                | NodeFlags::UPDATE_NORMALS
                | NodeFlags::UPDATE_TRIS;
        }
        if let Some(face) = self.mesh.face_mut(f) {
            face.node = None;
        }
        self.log.face_removed(&self.mesh, f);
    }

    pub(crate) fn face_kill(&mut self, f: FaceId) {
        self.face_remove(f);
        self.mesh.kill_face(f);
    }

    /// Attach an untracked vertex to the leaves of its faces; the first leaf
    /// found becomes the owner.
    pub(crate) fn vert_relink(&mut self, v: VertId) {
        for f in self.mesh.vert_faces(v) {
            if let Some(ni) = self.mesh.face(f).and_then(|face| face.node) {
                self.ensure_vert_in_node(ni, v);
            }
        }
    }

    /// Hand `v` to a leaf that actually uses it if its owner no longer does.
    pub(crate) fn fix_vert_owner(&mut self, v: VertId) {
        let Some(vert) = self.mesh.vertex(v) else {
            return;
        };
        let Some(owner) = vert.node else {
            self.vert_relink(v);
            return;
        };
        let face_nodes: Vec<NodeId> = self
            .mesh
            .vert_faces(v)
            .into_iter()
            .filter_map(|f| self.mesh.face(f)?.node)
            .collect();
        if face_nodes.is_empty() || face_nodes.contains(&owner) {
            return;
        }
        self.vert_ownership_transfer(face_nodes[0], v);
    }

    /// Copy corner data of `src` slot onto corner `slot` of `dst`.
    pub(crate) fn copy_corner(&mut self, dst: FaceId, slot: usize, src: FaceId, src_slot: usize) {
        self.attrs.copy(
            AttrDomain::Corner,
            corner_index(dst, slot),
            corner_index(src, src_slot),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogEntry;
    use crate::mesh::tests::quad;
    use crate::tree::tests::build_with;
    use crate::types::DyntopoConfig;

    #[test]
    fn test_vert_create_is_unique_and_logged() {
        let mut tree = build_with(quad(), DyntopoConfig::default());
        let v = tree.vert_create(NodeId::ROOT, Vec3::ONE, Vec3::Z, 0.25, ElemFlags::empty());
        assert!(tree.nodes[0].unique_verts.contains(&v));
        assert_eq!(tree.locate_vertex(v), Some(NodeId::ROOT));
        assert_eq!(tree.mesh().vertex(v).unwrap().mask, 0.25);
        assert!(matches!(
            tree.change_log().entries().last(),
            Some(LogEntry::VertexAdded { .. })
        ));
    }

    #[test]
    fn test_face_kill_keeps_partition() {
        let mut tree = build_with(quad(), DyntopoConfig::default());
        let f = tree.mesh().face_exists([VertId(0), VertId(1), VertId(2)]).unwrap();
        tree.face_kill(f);
        assert_eq!(tree.nodes[0].faces.len(), 1);
        assert!(!tree.nodes[0].faces.contains(&f));
        assert_eq!(tree.mesh().face_count(), 1);
        assert!(tree.change_log().count_where(|e| matches!(e, LogEntry::FaceRemoved { .. })) == 1);
    }

    #[test]
    fn test_vert_remove_detaches_from_all_sets() {
        let mut tree = build_with(quad(), DyntopoConfig::default());
        tree.vert_remove(VertId(0));
        assert!(!tree.nodes[0].unique_verts.contains(&VertId(0)));
        assert!(!tree.nodes[0].other_verts.contains(&VertId(0)));
        assert_eq!(tree.locate_vertex(VertId(0)), None);
    }

    #[test]
    fn test_face_create_with_ensure_verts_claims_untracked() {
        let mut tree = build_with(quad(), DyntopoConfig::default());
        let v = tree.mesh.add_vertex(Vec3::new(2.0, 0.0, 0.0), Vec3::Z);
        let f = tree.face_create(NodeId::ROOT, [VertId(1), v, VertId(2)], None, true);
        assert_eq!(tree.locate_face(f), Some(NodeId::ROOT));
        assert_eq!(tree.locate_vertex(v), Some(NodeId::ROOT));
        assert!(tree.verify().is_ok());
    }
}
