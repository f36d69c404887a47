//! Edge collapse.
//!
//! The endpoint with the lower mask is merged into the other one. Faces on
//! the edge disappear, the remaining faces of the deleted vertex are rebuilt
//! around the survivor, and any face that would duplicate an existing one is
//! dropped together with its twin so no flaps are left behind.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::attributes::{corner_index, AttrDomain, AttributeStore};
use crate::log::ChangeLog;
use crate::mesh::{EdgeId, ElemFlags, FaceId, VertId};
use crate::tree::{DyntopoTree, NodeFlags};

/// Deleted vertex -> the vertex it was merged into, or `None` when it was
/// removed outright.
pub(crate) type DeletedVerts = HashMap<VertId, Option<VertId>>;

/// Follow merges until a live vertex is reached.
pub(crate) fn resolve_deleted(deleted: &DeletedVerts, mut v: VertId) -> Option<VertId> {
    while let Some(&next) = deleted.get(&v) {
        v = next?;
    }
    Some(v)
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Collapse `e` (between `v1` and `v2`). Returns false when the edge is
    /// kept, which happens for seam edges whose endpoints do not both sit on
    /// a seam line.
    pub(crate) fn collapse_edge(
        &mut self,
        e: EdgeId,
        v1: VertId,
        v2: VertId,
        deleted: &mut DeletedVerts,
    ) -> bool {
        let Some(edge) = self.mesh.edge(e) else {
            warn!("collapse_edge: stale edge {:?}", e);
            return false;
        };
        if edge.flags.contains(ElemFlags::SEAM)
            && (self.mesh.seam_edge_count(v1) < 2 || self.mesh.seam_edge_count(v2) < 2)
        {
            return false;
        }
        let (Some(a), Some(b)) = (self.mesh.vertex(v1), self.mesh.vertex(v2)) else {
            warn!("collapse_edge: edge {:?} has a dead endpoint", e);
            return false;
        };
        let (v_del, v_conn) = if a.mask < b.mask { (v1, v2) } else { (v2, v1) };

        let mut ring: Vec<VertId> = self.mesh.vert_neighbors(v_del).collect();
        ring.extend(self.mesh.vert_neighbors(v_conn));

        self.vert_remove(v_del);
        let mut conn_alive = true;

        // Faces on the edge go first; their other edges inherit each other's
        // flags so seams survive the merge
        for f in self.mesh.edge(e).map(|edge| edge.faces().to_vec()).unwrap_or_default() {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            let face_edges = face.e;
            let eflag = face_edges
                .iter()
                .filter(|&&fe| fe != e)
                .filter_map(|&fe| self.mesh.edge(fe))
                .fold(ElemFlags::empty(), |acc, edge| acc | edge.flags)
                - ElemFlags::HIDDEN;
            for fe in face_edges {
                if let Some(edge) = self.mesh.edge_mut(fe) {
                    edge.flags |= eflag;
                }
            }
            if self.kill_face_and_orphans(f, v_del, v_conn, deleted) {
                conn_alive = false;
            }
        }
        self.mesh.kill_edge(e);

        self.snap_corners(v_del, v_conn);

        let mut doomed: Vec<FaceId> = Vec::new();
        for f in self.mesh.vert_faces(v_del) {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            let Some(s) = face.slot_of(v_del) else {
                continue;
            };
            let (s1, s2) = ((s + 1) % 3, (s + 2) % 3);
            let (va, vb) = (face.v[s1], face.v[s2]);
            let node = face.node;

            if !conn_alive {
                // Nothing left to rebuild around
            } else if let Some(existing) = self.mesh.face_exists([v_conn, va, vb]) {
                if !doomed.contains(&existing) {
                    doomed.push(existing);
                }
            } else if let Some(ni) = node {
                let f2 = self.face_create(ni, [v_conn, va, vb], Some(f), false);

                let old_flags = self
                    .mesh
                    .edge_between(v_del, va)
                    .and_then(|old| self.mesh.edge(old))
                    .map_or(ElemFlags::empty(), |edge| edge.flags - ElemFlags::HIDDEN);
                if let Some(new_edge) = self
                    .mesh
                    .edge_between(v_conn, va)
                    .and_then(|ne| self.mesh.edge_mut(ne))
                {
                    new_edge.flags |= old_flags;
                }

                self.copy_corner(f2, 0, f, s);
                self.copy_corner(f2, 1, f, s1);
                self.copy_corner(f2, 2, f, s2);
                self.ensure_vert_in_node(ni, v_conn);
            } else {
                warn!("collapse_edge: face {:?} has no leaf", f);
            }
            if !doomed.contains(&f) {
                doomed.push(f);
            }
        }

        for f in doomed {
            if self.kill_face_and_orphans(f, v_del, v_conn, deleted) {
                conn_alive = false;
            }
        }

        if conn_alive {
            self.merge_into_survivor(v_conn, v_del);
        }

        self.log.vertex_removed(&self.mesh, v_del);
        deleted.insert(v_del, conn_alive.then_some(v_conn));
        self.mesh.kill_vertex(v_del);

        for v in ring {
            if v != v_del {
                self.fix_vert_owner(v);
            }
        }
        trace!("collapse_edge: {:?} merged into {:?}", v_del, v_conn);
        true
    }

    /// Kill `f`, then any of its edges left without faces and any of its
    /// vertices (other than `v_del`) left without edges. Returns whether
    /// `v_conn` was among the removed vertices.
    fn kill_face_and_orphans(
        &mut self,
        f: FaceId,
        v_del: VertId,
        v_conn: VertId,
        deleted: &mut DeletedVerts,
    ) -> bool {
        let Some(face) = self.mesh.face(f) else {
            return false;
        };
        let (verts, edges) = (face.v, face.e);
        self.face_kill(f);

        for fe in edges {
            if self.mesh.edge(fe).is_some_and(|edge| edge.is_wire()) {
                self.mesh.kill_edge(fe);
            }
        }

        let mut conn_removed = false;
        for v in verts {
            if v == v_del || self.mesh.vertex(v).is_none() || self.mesh.valence(v) > 0 {
                continue;
            }
            self.vert_remove(v);
            self.log.vertex_removed(&self.mesh, v);
            conn_removed |= v == v_conn;
            deleted.insert(v, None);
            self.mesh.kill_vertex(v);
        }
        conn_removed
    }

    /// Average the corner data around both endpoints and write it back to
    /// every one of those corners.
    fn snap_corners(&mut self, v_del: VertId, v_conn: VertId) {
        let mut corners = Vec::new();
        for v in [v_del, v_conn] {
            for f in self.mesh.vert_faces(v) {
                if let Some(slot) = self.mesh.face(f).and_then(|face| face.slot_of(v)) {
                    corners.push(corner_index(f, slot));
                }
            }
        }
        let Some((&first, rest)) = corners.split_first() else {
            return;
        };
        let w = 1.0 / corners.len() as f32;
        let sources: Vec<(u32, f32)> = corners.iter().map(|&c| (c, w)).collect();
        self.attrs.interpolate(AttrDomain::Corner, first, &sources);
        for &c in rest {
            self.attrs.copy(AttrDomain::Corner, c, first);
        }
    }

    fn merge_into_survivor(&mut self, v_conn: VertId, v_del: VertId) {
        let (Some(conn), Some(del)) = (self.mesh.vertex(v_conn), self.mesh.vertex(v_del)) else {
            return;
        };
        let co = (conn.co + del.co) * 0.5;
        let no = (conn.no + del.no).normalize_or(conn.no);

        self.log.vertex_before_modify(&self.mesh, v_conn);
        let boundary = self.mesh.is_boundary_vert(v_conn);
        if let Some(vert) = self.mesh.vertex_mut(v_conn) {
            vert.co = co;
            vert.no = no;
            if boundary {
                vert.flags |= ElemFlags::BOUNDARY;
            }
        }

        let touched: Vec<_> = self
            .mesh
            .vert_faces(v_conn)
            .into_iter()
            .filter_map(|f| self.mesh.face(f)?.node)
            .collect();
        for ni in touched {
            self.mark_node(
                ni,
                NodeFlags::UPDATE_DRAW_BUFFERS
                    | NodeFlags::UPDATE_NORMALS
                    | NodeFlags::UPDATE_BB
                    | NodeFlags::UPDATE_TRIS,
            );
        }
    }
}
