//! Valence 3/4 vertex dissolve.
//!
//! A vertex with three or four edges whose faces form a closed fan is
//! removed and the hole is refilled with one or two triangles over the ring.
//! Anything irregular (open fans, non-manifold spokes, repeated ring
//! vertices, refill faces that already exist) is left alone.
//!
//! ```text
//!     r2 ------- r1          r2 ------- r1
//!      | \     / |            | \       |
//!      |   \ /   |    ->      |   \     |
//!      |    v    |            |     \   |
//!      |   / \   |            |       \ |
//!     r3 ------- r0          r3 ------- r0
//! ```

use tracing::{debug, trace};

use crate::attributes::{corner_index, AttrDomain, AttributeStore};
use crate::log::ChangeLog;
use crate::mesh::{FaceId, Mesh, VertId};
use crate::queue::BrushRegion;
use crate::tree::{DyntopoTree, NodeId};

/// A closed triangle fan around one vertex.
#[derive(Debug)]
struct Fan {
    /// Ring vertices in winding order
    ring: Vec<VertId>,
    /// `faces[i]` is `(v, ring[i], ring[i + 1])`
    faces: Vec<FaceId>,
    /// Corner of `ring[i]` in `faces[i]`
    corners: Vec<u32>,
}

impl Fan {
    /// Walk the faces around `v`, or `None` when they do not form a closed
    /// manifold fan.
    fn walk(mesh: &Mesh, v: VertId) -> Option<Self> {
        let valence = mesh.valence(v);
        let all_faces = mesh.vert_faces(v);
        if all_faces.len() != valence {
            return None;
        }

        let f0 = *all_faces.first()?;
        let face = mesh.face(f0)?;
        let s = face.slot_of(v)?;
        let mut ring = vec![face.v[(s + 1) % 3], face.v[(s + 2) % 3]];
        let mut faces = vec![f0];
        let mut corners = vec![corner_index(f0, (s + 1) % 3)];

        for i in 1..valence {
            let r = ring[i];
            let (f, t) = all_faces.iter().find_map(|&f| {
                let face = mesh.face(f)?;
                let t = face.slot_of(v)?;
                (face.v[(t + 1) % 3] == r).then_some((f, t))
            })?;
            if faces.contains(&f) {
                return None;
            }
            let next = mesh.face(f)?.v[(t + 2) % 3];
            faces.push(f);
            corners.push(corner_index(f, (t + 1) % 3));
            if i + 1 < valence {
                if ring.contains(&next) {
                    return None;
                }
                ring.push(next);
            } else if next != ring[0] {
                return None;
            }
        }

        let manifold_spokes = ring.iter().all(|&r| {
            mesh.edge_between(v, r)
                .and_then(|e| mesh.edge(e))
                .is_some_and(|edge| edge.faces().len() == 2)
        });
        manifold_spokes.then_some(Self {
            ring,
            faces,
            corners,
        })
    }

    /// Triangles filling the ring, as indices into `ring`. `None` when no
    /// refill avoids existing geometry.
    fn refill(&self, mesh: &Mesh) -> Option<Vec<[usize; 3]>> {
        let tris: Vec<[usize; 3]> = match self.ring.len() {
            3 => vec![[0, 1, 2]],
            4 => {
                let r = &self.ring;
                match (mesh.edge_between(r[0], r[2]), mesh.edge_between(r[1], r[3])) {
                    (None, _) => vec![[0, 1, 2], [0, 2, 3]],
                    (Some(_), None) => vec![[1, 2, 3], [1, 3, 0]],
                    (Some(_), Some(_)) => return None,
                }
            }
            _ => return None,
        };
        let exists = tris
            .iter()
            .any(|t| mesh.face_exists(t.map(|i| self.ring[i])).is_some());
        (!exists).then_some(tris)
    }
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Dissolve valence 3/4 vertices of dirty leaves near the brush.
    /// Returns the number of vertices removed.
    pub(crate) fn cleanup_valence_3_4(&mut self, region: &BrushRegion) -> usize {
        trace!("cleanup_valence_3_4: START");
        let scale = self.config.cleanup_radius_scale;
        let mut dissolved = 0;

        for ni in self.dirty_leaves() {
            let mut candidates: Vec<VertId> = self.nodes[ni.index()]
                .unique_verts
                .iter()
                .copied()
                .filter(|&v| region.vert_in_range(self.mesh.co(v), scale))
                .collect();
            candidates.sort_unstable();

            for v in candidates {
                if self.dissolve_vertex(ni, v) {
                    dissolved += 1;
                }
            }
        }

        debug!("cleanup_valence_3_4: dissolved {} vertices", dissolved);
        dissolved
    }

    fn dissolve_vertex(&mut self, ni: NodeId, v: VertId) -> bool {
        // Earlier dissolves may have moved or removed it
        if self.locate_vertex(v) != Some(ni) {
            return false;
        }
        let Some(vert) = self.mesh.vertex(v) else {
            return false;
        };
        if vert.is_hidden() || vert.mask >= 1.0 || !(3..=4).contains(&self.mesh.valence(v)) {
            return false;
        }
        let Some(fan) = Fan::walk(&self.mesh, v) else {
            return false;
        };
        let Some(tris) = fan.refill(&self.mesh) else {
            return false;
        };

        let example = fan.faces[0];
        let mut used = vec![false; fan.ring.len()];
        let mut created = Vec::with_capacity(tris.len());
        for tri in &tris {
            let f = self.face_create(ni, tri.map(|i| fan.ring[i]), Some(example), true);
            for (slot, &i) in tri.iter().enumerate() {
                if used[i] {
                    self.attrs.copy(AttrDomain::Corner, corner_index(f, slot), fan.corners[i]);
                }
                used[i] = true;
            }
            created.push(f);
        }
        // First uses take the fan corner itself; the fan dies right after
        let mut taken = vec![false; fan.ring.len()];
        for (&f, tri) in created.iter().zip(&tris) {
            for (slot, &i) in tri.iter().enumerate() {
                if !taken[i] {
                    self.attrs
                        .swap(AttrDomain::Corner, corner_index(f, slot), fan.corners[i]);
                    taken[i] = true;
                }
            }
        }

        self.vert_remove(v);
        self.log.vertex_removed(&self.mesh, v);
        for &f in &fan.faces {
            self.face_kill(f);
        }
        self.mesh.kill_vertex(v);

        for &r in &fan.ring {
            self.fix_vert_owner(r);
        }
        trace!("dissolve_vertex: {:?} (valence {})", v, fan.ring.len());
        true
    }
}
