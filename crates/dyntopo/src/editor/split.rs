//! Edge split.
//!
//! ```text
//!          opp                    opp
//!          /\                     /|\
//!         /  \                   / | \
//!        /    \       ->        /  |  \
//!       /      \               /   |   \
//!     v1 ------ v2           v1 - mid - v2
//! ```

use tracing::{error, trace, warn};

use crate::attributes::{corner_index, AttrDomain, AttributeStore};
use crate::log::ChangeLog;
use crate::mesh::{EdgeId, ElemFlags, FaceId};
use crate::queue::{BrushRegion, EdgeQueue};
use crate::tree::DyntopoTree;

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Split `e` at its midpoint, replacing each incident triangle by two.
    ///
    /// The new faces are offered back to `queue`. Returns false when the edge
    /// could not be split.
    pub(crate) fn split_edge(
        &mut self,
        e: EdgeId,
        queue: &mut EdgeQueue,
        region: &BrushRegion,
    ) -> bool {
        let Some(edge) = self.mesh.edge(e) else {
            warn!("split_edge: stale edge {:?}", e);
            return false;
        };
        let [v1, v2] = edge.v;
        let edge_flags = edge.flags - ElemFlags::HIDDEN;
        let faces: Vec<FaceId> = edge.faces().to_vec();
        let (Some(a), Some(b)) = (self.mesh.vertex(v1), self.mesh.vertex(v2)) else {
            warn!("split_edge: edge {:?} has a dead endpoint", e);
            return false;
        };
        let Some(node_index) = a.node else {
            warn!("split_edge: endpoint {:?} has no leaf", v1);
            return false;
        };

        let co = (a.co + b.co) * 0.5;
        let no = (a.no + b.no).normalize_or(a.no);
        let mask = 0.5 * (a.mask + b.mask);
        let mut flags = (a.flags | b.flags) - ElemFlags::HIDDEN - ElemFlags::BOUNDARY;
        if a.flags.contains(ElemFlags::BOUNDARY) && b.flags.contains(ElemFlags::BOUNDARY) {
            flags |= ElemFlags::BOUNDARY;
        }

        let mid = self.vert_create(node_index, co, no, mask, flags);
        self.attrs
            .interpolate(AttrDomain::Vertex, mid.0, &[(v1.0, 0.5), (v2.0, 0.5)]);

        for (x, y) in [(v1, mid), (mid, v2)] {
            let half = self.mesh.ensure_edge(x, y);
            if let Some(half) = self.mesh.edge_mut(half) {
                half.flags = edge_flags;
            }
        }

        let mut new_faces = Vec::with_capacity(faces.len() * 2);
        for (i, f) in faces.into_iter().enumerate() {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            let Some(ni) = face.node else {
                error!("split_edge: face {:?} has no leaf", f);
                continue;
            };
            // Slot of whichever endpoint comes first in this face's winding
            let Some(k) = (0..3).find(|&k| {
                let (x, y) = (face.v[k], face.v[(k + 1) % 3]);
                (x == v1 && y == v2) || (x == v2 && y == v1)
            }) else {
                error!("split_edge: face {:?} does not use edge {:?}", f, e);
                continue;
            };
            let (first_v, second_v, opp) = (face.v[k], face.v[(k + 1) % 3], face.v[(k + 2) % 3]);
            let (k1, k2) = ((k + 1) % 3, (k + 2) % 3);

            if i == 0 && ni != node_index {
                self.vert_ownership_transfer(ni, mid);
            }

            let mid_sources = [(corner_index(f, k), 0.5), (corner_index(f, k1), 0.5)];

            let f_first = self.face_create(ni, [first_v, mid, opp], Some(f), false);
            self.copy_corner(f_first, 0, f, k);
            self.attrs
                .interpolate(AttrDomain::Corner, corner_index(f_first, 1), &mid_sources);
            self.copy_corner(f_first, 2, f, k2);

            let f_second = self.face_create(ni, [mid, second_v, opp], Some(f), false);
            self.attrs
                .interpolate(AttrDomain::Corner, corner_index(f_second, 0), &mid_sources);
            self.copy_corner(f_second, 1, f, k1);
            self.copy_corner(f_second, 2, f, k2);

            self.face_kill(f);
            self.ensure_vert_in_node(ni, mid);
            new_faces.extend([f_first, f_second]);
        }

        self.mesh.kill_edge(e);
        trace!("split_edge: {:?} -> {:?}, {} new faces", e, mid, new_faces.len());

        for f in new_faces {
            self.long_edge_queue_face_add(queue, region, f);
        }
        true
    }
}
