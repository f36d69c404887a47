//! Consistency checks between the mesh tags and the leaf sets.

use std::collections::HashSet;

use super::{DyntopoTree, NodeFlags, NodeId, NodeKind};
use crate::attributes::AttributeStore;
use crate::error::DyntopoError;
use crate::log::ChangeLog;
use crate::mesh::VertId;

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Check every partition and ownership invariant of the tree.
    ///
    /// Walks the whole mesh, so this is meant for tests and debug builds.
    pub fn verify(&self) -> Result<(), DyntopoError> {
        let violations = self.collect_violations();
        match violations.first() {
            None => Ok(()),
            Some(first) => Err(DyntopoError::InvariantViolation {
                count: violations.len(),
                first: first.clone(),
            }),
        }
    }

    fn collect_violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mesh = &self.mesh;

        for (f, face) in mesh.faces() {
            let [a, b, c] = face.v;
            if a == b || b == c || a == c {
                out.push(format!("face {f:?} is degenerate"));
            }
            let Some(ni) = face.node else {
                out.push(format!("face {f:?} has no leaf"));
                continue;
            };
            let Some(node) = self.nodes.get(ni.index()).filter(|n| n.is_leaf()) else {
                out.push(format!("face {f:?} tagged with non-leaf {ni:?}"));
                continue;
            };
            if !node.faces.contains(&f) {
                out.push(format!("face {f:?} missing from {ni:?}"));
            }
            for v in face.v {
                let unique = node.unique_verts.contains(&v);
                let other = node.other_verts.contains(&v);
                if unique == other {
                    out.push(format!(
                        "vertex {v:?} of face {f:?} is unique={unique} other={other} in {ni:?}"
                    ));
                }
            }
        }

        for (e, edge) in mesh.edges() {
            if edge.is_wire() {
                out.push(format!("edge {e:?} has no faces"));
            }
        }

        let mut tracked = 0;
        for (v, vert) in mesh.vertices() {
            let Some(owner) = vert.node else {
                continue;
            };
            tracked += 1;
            let Some(node) = self.nodes.get(owner.index()).filter(|n| n.is_leaf()) else {
                out.push(format!("vertex {v:?} owned by non-leaf {owner:?}"));
                continue;
            };
            if !node.unique_verts.contains(&v) {
                out.push(format!("vertex {v:?} missing from unique set of {owner:?}"));
            }
            if node.other_verts.contains(&v) {
                out.push(format!("vertex {v:?} is also other in its owner {owner:?}"));
            }
            let faces = mesh.vert_faces(v);
            let used_by_owner = faces
                .iter()
                .any(|&f| mesh.face(f).and_then(|face| face.node) == Some(owner));
            if !faces.is_empty() && !used_by_owner {
                out.push(format!("vertex {v:?} owned by {owner:?} which has none of its faces"));
            }
        }

        let mut face_total = 0;
        let mut unique_total = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            let ni = NodeId(i as u32);
            match node.kind {
                NodeKind::Internal { children } => {
                    if !(node.faces.is_empty()
                        && node.unique_verts.is_empty()
                        && node.other_verts.is_empty())
                    {
                        out.push(format!("internal node {ni:?} holds elements"));
                    }
                    for child in children {
                        if child.index() >= self.nodes.len() || child.index() <= i {
                            out.push(format!("internal node {ni:?} has bad child {child:?}"));
                        }
                    }
                }
                NodeKind::Leaf => {
                    face_total += node.faces.len();
                    unique_total += node.unique_verts.len();
                    for &f in &node.faces {
                        if mesh.face(f).and_then(|face| face.node) != Some(ni) {
                            out.push(format!("{ni:?} lists face {f:?} it does not own"));
                        }
                    }
                    for &v in &node.unique_verts {
                        if mesh.vertex(v).and_then(|vert| vert.node) != Some(ni) {
                            out.push(format!("{ni:?} lists unique vertex {v:?} it does not own"));
                        }
                    }
                    let live_other: HashSet<VertId> = node
                        .other_verts
                        .iter()
                        .copied()
                        .filter(|&v| mesh.vertex(v).is_some())
                        .collect();
                    if live_other.len() != node.other_verts.len() {
                        out.push(format!("{ni:?} lists dead other vertices"));
                    }
                    // Leaves awaiting a bounds refresh may hold stale boxes
                    if !node.flags.contains(NodeFlags::UPDATE_BB) {
                        let outside = node
                            .unique_verts
                            .iter()
                            .chain(&node.other_verts)
                            .filter_map(|&v| mesh.vertex(v))
                            .filter(|vert| !node.bounds.contains_point(vert.co))
                            .count();
                        if outside > 0 {
                            out.push(format!("{ni:?} bounds miss {outside} of its vertices"));
                        }
                    }
                }
            }
        }

        if face_total != mesh.face_count() {
            out.push(format!(
                "leaves hold {face_total} faces, mesh has {}",
                mesh.face_count()
            ));
        }
        if unique_total != tracked {
            out.push(format!(
                "leaves hold {unique_total} unique vertices, {tracked} are tracked"
            ));
        }

        out
    }
}
