//! Tree upkeep between and after topology passes: leaf-limit enforcement,
//! subtree joining, bounds and normal refresh, stroke snapshots.

use std::collections::HashSet;

use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use super::{DyntopoTree, Node, NodeFlags, NodeId, NodeKind};
use crate::attributes::AttributeStore;
use crate::error::DyntopoError;
use crate::log::ChangeLog;
use crate::mesh::{FaceId, VertId};
use crate::spatial::Aabb;

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Split `leaf` if it holds more than `leaf_limit` faces. Returns whether
    /// a split happened.
    pub fn ensure_leaf_limit(&mut self, leaf: NodeId) -> Result<bool, DyntopoError> {
        let count = self.leaf(leaf)?.faces.len();
        if count <= self.config.leaf_limit {
            return Ok(false);
        }
        debug!(
            "ensure_leaf_limit: splitting {:?} ({} faces > {})",
            leaf, count, self.config.leaf_limit
        );
        let max_depth = self.config.max_split_depth;
        self.split_leaf(leaf, 0, max_depth);
        Ok(true)
    }

    /// Merge every non-root subtree holding fewer than half the leaf limit
    /// into a single leaf, then compact the node vector.
    ///
    /// Node ids are not stable across this call.
    pub fn join_small_subtrees(&mut self) -> usize {
        trace!("join_small_subtrees: START");
        let counts = self.subtree_face_counts();
        let threshold = self.config.leaf_limit - self.config.leaf_limit / 2;

        let mut deleted = vec![false; self.nodes.len()];
        let mut joined = 0;
        let mut stack = vec![(NodeId::ROOT, true)];
        while let Some((ni, is_root)) = stack.pop() {
            let Some(children) = self.nodes[ni.index()].children() else {
                continue;
            };
            if !is_root && counts[ni.index()] < threshold {
                self.join_subtree(ni, &mut deleted);
                joined += 1;
            } else {
                stack.push((children[0], false));
                stack.push((children[1], false));
            }
        }

        if joined > 0 {
            self.compact_nodes(&deleted);
            info!(
                "join_small_subtrees: joined {} subtrees, {} nodes remain",
                joined,
                self.nodes.len()
            );
        }
        joined
    }

    fn subtree_face_counts(&self) -> Vec<usize> {
        fn count(nodes: &[Node], ni: NodeId, out: &mut [usize]) -> usize {
            let node = &nodes[ni.index()];
            let total = match node.kind {
                NodeKind::Leaf => node.faces.len(),
                NodeKind::Internal { children } => {
                    count(nodes, children[0], out) + count(nodes, children[1], out)
                }
            };
            out[ni.index()] = total;
            total
        }
        let mut out = vec![0; self.nodes.len()];
        if !self.nodes.is_empty() {
            count(&self.nodes, NodeId::ROOT, &mut out);
        }
        out
    }

    /// Turn internal node `ni` into a leaf holding its whole subtree.
    fn join_subtree(&mut self, ni: NodeId, deleted: &mut [bool]) {
        let mut faces = HashSet::new();
        let mut unique = HashSet::new();
        let mut stack = match self.nodes[ni.index()].children() {
            Some(children) => children.to_vec(),
            None => return,
        };
        while let Some(child) = stack.pop() {
            deleted[child.index()] = true;
            let node = &mut self.nodes[child.index()];
            match node.kind {
                NodeKind::Leaf => {
                    faces.extend(node.faces.drain());
                    unique.extend(node.unique_verts.drain());
                    node.other_verts.clear();
                }
                NodeKind::Internal { children } => stack.extend(children),
            }
        }

        for &f in &faces {
            if let Some(face) = self.mesh.face_mut(f) {
                face.node = Some(ni);
            }
        }
        for &v in &unique {
            if let Some(vert) = self.mesh.vertex_mut(v) {
                vert.node = Some(ni);
            }
        }
        let mut other = HashSet::new();
        let mut bounds = Aabb::empty();
        for &f in &faces {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            for v in face.v {
                bounds.include_point(self.mesh.co(v));
                if !unique.contains(&v) {
                    other.insert(v);
                }
            }
        }

        let node = &mut self.nodes[ni.index()];
        node.kind = NodeKind::Leaf;
        node.faces = faces;
        node.unique_verts = unique;
        node.other_verts = other;
        node.bounds = bounds;
        node.orig_bounds = bounds;
        node.flags |= NodeFlags::UPDATE_NORMALS
            | NodeFlags::UPDATE_BB
            | NodeFlags::UPDATE_TRIS
            | NodeFlags::UPDATE_DRAW_BUFFERS;
        node.flags.remove(NodeFlags::FULLY_HIDDEN);
    }

    /// Drop deleted nodes, remap child ids and rewrite every ownership tag.
    fn compact_nodes(&mut self, deleted: &[bool]) {
        let mut map = vec![None; self.nodes.len()];
        let mut next = 0u32;
        for (i, &dead) in deleted.iter().enumerate() {
            if !dead {
                map[i] = Some(NodeId(next));
                next += 1;
            }
        }

        let old = std::mem::take(&mut self.nodes);
        self.nodes = old
            .into_iter()
            .zip(deleted)
            .filter(|(_, dead)| !**dead)
            .map(|(mut node, _)| {
                if let NodeKind::Internal { children } = node.kind {
                    let remapped = children.map(|c| map[c.index()].unwrap_or(c));
                    node.kind = NodeKind::Internal { children: remapped };
                }
                node
            })
            .collect();

        for i in 0..self.nodes.len() {
            let ni = NodeId(i as u32);
            if !self.nodes[i].is_leaf() {
                continue;
            }
            let faces: Vec<FaceId> = self.nodes[i].faces.iter().copied().collect();
            for f in faces {
                if let Some(face) = self.mesh.face_mut(f) {
                    face.node = Some(ni);
                }
            }
            let unique: Vec<VertId> = self.nodes[i].unique_verts.iter().copied().collect();
            for v in unique {
                if let Some(vert) = self.mesh.vertex_mut(v) {
                    vert.node = Some(ni);
                }
            }
        }

        // Orphaned other vertices become unique where they are found
        for i in 0..self.nodes.len() {
            let orphans: Vec<VertId> = self.nodes[i]
                .other_verts
                .iter()
                .copied()
                .filter(|&v| self.mesh.vertex(v).is_some_and(|vert| vert.node.is_none()))
                .collect();
            for v in orphans {
                let node = &mut self.nodes[i];
                node.other_verts.remove(&v);
                node.unique_verts.insert(v);
                if let Some(vert) = self.mesh.vertex_mut(v) {
                    vert.node = Some(NodeId(i as u32));
                }
            }
        }
    }

    /// Maintenance after a stroke: join underfull subtrees, refresh all
    /// bounds, then re-split overflowing leaves.
    pub fn after_stroke(&mut self) {
        trace!("after_stroke: START");
        self.join_small_subtrees();
        for node in &mut self.nodes {
            if node.is_leaf() {
                node.flags |= NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB;
            }
        }
        self.update_bounds();

        let leaves: Vec<NodeId> = self.leaves().collect();
        for leaf in leaves {
            if let Err(err) = self.ensure_leaf_limit(leaf) {
                warn!("after_stroke: {}", err);
            }
        }
        self.update_bounds();
        debug!("after_stroke: {} nodes, {} leaves", self.nodes.len(), self.leaf_count());
    }

    /// Recompute bounds of flagged leaves from their vertices and of every
    /// internal node from its children.
    pub fn update_bounds(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        self.update_bounds_recursive(NodeId::ROOT);
    }

    fn update_bounds_recursive(&mut self, ni: NodeId) -> (Aabb, Aabb) {
        let flags = self.nodes[ni.index()].flags;
        match self.nodes[ni.index()].kind {
            NodeKind::Leaf => {
                if flags.contains(NodeFlags::UPDATE_BB) {
                    let node = &self.nodes[ni.index()];
                    let bounds = Aabb::from_points(
                        node.unique_verts
                            .iter()
                            .chain(&node.other_verts)
                            .filter_map(|&v| self.mesh.vertex(v).map(|vert| vert.co)),
                    );
                    self.nodes[ni.index()].bounds = bounds;
                }
            }
            NodeKind::Internal { children } => {
                let (b0, o0) = self.update_bounds_recursive(children[0]);
                let (b1, o1) = self.update_bounds_recursive(children[1]);
                let node = &mut self.nodes[ni.index()];
                let mut bounds = b0;
                bounds.include_aabb(&b1);
                node.bounds = bounds;
                if flags.contains(NodeFlags::UPDATE_ORIGINAL_BB) {
                    let mut orig = o0;
                    orig.include_aabb(&o1);
                    node.orig_bounds = orig;
                }
            }
        }
        let node = &mut self.nodes[ni.index()];
        if flags.contains(NodeFlags::UPDATE_ORIGINAL_BB) && node.is_leaf() {
            node.orig_bounds = node.bounds;
        }
        if flags.contains(NodeFlags::UPDATE_BB) {
            node.flags |= NodeFlags::UPDATE_DRAW_BUFFERS;
        }
        node.flags
            .remove(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB);
        (node.bounds, node.orig_bounds)
    }

    /// Recompute face and vertex normals of leaves flagged for it.
    pub fn update_normals(&mut self) {
        let mut faces: HashSet<FaceId> = HashSet::new();
        let mut verts: HashSet<VertId> = HashSet::new();
        for node in &mut self.nodes {
            if !(node.is_leaf() && node.flags.contains(NodeFlags::UPDATE_NORMALS)) {
                continue;
            }
            faces.extend(node.faces.iter().copied());
            verts.extend(node.unique_verts.iter().copied());
            verts.extend(node.other_verts.iter().copied());
            node.flags.remove(NodeFlags::UPDATE_NORMALS);
        }
        if faces.is_empty() && verts.is_empty() {
            return;
        }

        let mesh = &self.mesh;
        let face_normals: Vec<(FaceId, Vec3)> = faces
            .into_par_iter()
            .filter_map(|f| Some((f, mesh.calc_face_normal(mesh.face(f)?.v))))
            .collect();
        for (f, no) in face_normals {
            if let Some(face) = self.mesh.face_mut(f) {
                face.no = no;
            }
        }

        let mesh = &self.mesh;
        let vert_normals: Vec<(VertId, Vec3)> = verts
            .into_par_iter()
            .filter_map(|v| Some((v, mesh.calc_vert_normal(v)?)))
            .collect();
        trace!("update_normals: {} vertex normals", vert_normals.len());
        for (v, no) in vert_normals {
            if let Some(vert) = self.mesh.vertex_mut(v) {
                vert.no = no;
            }
        }
    }

    /// Refresh the fully-hidden flag of every leaf.
    pub fn update_visibility(&mut self) {
        for node in &mut self.nodes {
            if !node.is_leaf() {
                continue;
            }
            let hidden = !node.faces.is_empty()
                && node
                    .faces
                    .iter()
                    .all(|&f| self.mesh.face(f).is_none_or(|face| face.is_hidden()));
            node.flags.set(NodeFlags::FULLY_HIDDEN, hidden);
        }
    }

    /// Snapshot positions, normals, masks and bounds as the stroke's
    /// original state.
    pub fn begin_stroke(&mut self) {
        let verts: Vec<VertId> = self.mesh.vertices().map(|(v, _)| v).collect();
        for v in verts {
            if let Some(vert) = self.mesh.vertex_mut(v) {
                vert.orig_co = vert.co;
                vert.orig_no = vert.no;
                vert.orig_mask = vert.mask;
            }
        }
        for node in &mut self.nodes {
            node.orig_bounds = node.bounds;
        }
    }

    /// Set the target edge length band: edges above `detail_size` split,
    /// edges below `detail_size * detail_range` collapse.
    pub fn set_detail_size(&mut self, detail_size: f32, detail_range: f32) -> Result<(), DyntopoError> {
        let mut config = self.config.clone();
        config.detail_size = detail_size;
        config.detail_range = detail_range;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Recompute the boundary flag of every vertex.
    pub fn recalc_boundary(&mut self) {
        self.mesh.recalc_boundary();
    }
}
