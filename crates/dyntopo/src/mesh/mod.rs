//! Editable triangle mesh with arena storage and integer handles.
//!
//! Vertices, edges and faces live in slot arenas. Removing an element frees
//! its slot for reuse, so handles are only stable while the element lives.
//! Adjacency is explicit: each vertex lists its edges, each edge lists its
//! faces, and a pair map resolves "is there an edge between a and b" in O(1).
//!
//! ```text
//!        v2
//!        /\
//!    e2 /  \ e1        face.v = [v0, v1, v2]
//!      /    \          face.e = [e0 (v0-v1), e1 (v1-v2), e2 (v2-v0)]
//!     /______\
//!   v0   e0   v1
//! ```

mod query;

use std::collections::HashMap;

use bitflags::bitflags;
use glam::Vec3;

use crate::error::DyntopoError;
use crate::tree::NodeId;

/// Type-safe vertex identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertId(pub u32);

/// Type-safe edge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

/// Type-safe face identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaceId(pub u32);

bitflags! {
    /// Per-element flags shared by vertices, edges and faces.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ElemFlags: u8 {
        const HIDDEN = 1 << 0;
        /// Vertex lies on an open boundary
        const BOUNDARY = 1 << 1;
        /// Edge is a UV/attribute seam
        const SEAM = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub co: Vec3,
    pub no: Vec3,
    pub flags: ElemFlags,
    /// Position at the start of the current stroke
    pub orig_co: Vec3,
    /// Normal at the start of the current stroke
    pub orig_no: Vec3,
    /// Paint mask in [0, 1]; 1 means fully protected
    pub mask: f32,
    /// Mask at the start of the current stroke
    pub orig_mask: f32,
    /// Owning leaf
    pub node: Option<NodeId>,
    pub(crate) edges: Vec<EdgeId>,
}

impl Vertex {
    fn new(co: Vec3, no: Vec3) -> Self {
        Self {
            co,
            no,
            flags: ElemFlags::empty(),
            orig_co: co,
            orig_no: no,
            mask: 0.0,
            orig_mask: 0.0,
            node: None,
            edges: Vec::new(),
        }
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(ElemFlags::HIDDEN)
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub v: [VertId; 2],
    pub flags: ElemFlags,
    pub(crate) faces: Vec<FaceId>,
}

impl Edge {
    pub fn faces(&self) -> &[FaceId] {
        &self.faces
    }

    pub fn other_vert(&self, v: VertId) -> VertId {
        if self.v[0] == v { self.v[1] } else { self.v[0] }
    }

    pub fn is_wire(&self) -> bool {
        self.faces.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Face {
    pub v: [VertId; 3],
    pub e: [EdgeId; 3],
    pub no: Vec3,
    pub flags: ElemFlags,
    /// Owning leaf
    pub node: Option<NodeId>,
}

impl Face {
    /// Slot (0..3) holding `v`.
    pub fn slot_of(&self, v: VertId) -> Option<usize> {
        self.v.iter().position(|&x| x == v)
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(ElemFlags::HIDDEN)
    }
}

/// Slot arena with a free list.
#[derive(Debug, Clone)]
struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> u32 {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            index
        } else {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u32
        }
    }

    fn remove(&mut self, index: u32) -> Option<T> {
        let value = self.slots.get_mut(index as usize)?.take()?;
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }

    fn get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize)?.as_ref()
    }

    fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|value| (i as u32, value)))
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Triangle mesh graph.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    verts: Arena<Vertex>,
    edges: Arena<Edge>,
    faces: Arena<Face>,
    edge_map: HashMap<(VertId, VertId), EdgeId>,
}

fn edge_key(a: VertId, b: VertId) -> (VertId, VertId) {
    if a < b { (a, b) } else { (b, a) }
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from indexed triangles.
    ///
    /// Normals are computed from the geometry and boundary flags are set.
    pub fn from_triangles(positions: &[Vec3], triangles: &[[u32; 3]]) -> Result<Self, DyntopoError> {
        let mut mesh = Mesh::new();
        for (i, &co) in positions.iter().enumerate() {
            if !co.is_finite() {
                return Err(DyntopoError::NonFinitePosition(VertId(i as u32)));
            }
            mesh.add_vertex(co, Vec3::ZERO);
        }

        for (triangle, tri) in triangles.iter().enumerate() {
            for &vertex in tri {
                if vertex as usize >= positions.len() {
                    return Err(DyntopoError::VertexOutOfRange {
                        triangle,
                        vertex,
                        count: positions.len(),
                    });
                }
            }
            let v = tri.map(VertId);
            if v[0] == v[1] || v[1] == v[2] || v[0] == v[2] {
                return Err(DyntopoError::DegenerateTriangle { triangle });
            }
            if mesh.face_exists(v).is_some() {
                return Err(DyntopoError::DuplicateTriangle { triangle });
            }
            mesh.add_face(v);
        }

        mesh.recalc_normals();
        mesh.recalc_boundary();
        for vert in mesh.verts.slots.iter_mut().flatten() {
            vert.orig_co = vert.co;
            vert.orig_no = vert.no;
        }
        Ok(mesh)
    }

    pub fn vert_count(&self) -> usize {
        self.verts.live
    }

    pub fn edge_count(&self) -> usize {
        self.edges.live
    }

    pub fn face_count(&self) -> usize {
        self.faces.live
    }

    /// Number of vertex slots (live or free).
    pub fn vert_capacity(&self) -> usize {
        self.verts.capacity()
    }

    /// Number of face slots (live or free).
    pub fn face_capacity(&self) -> usize {
        self.faces.capacity()
    }

    pub fn vertex(&self, v: VertId) -> Option<&Vertex> {
        self.verts.get(v.0)
    }

    pub fn vertex_mut(&mut self, v: VertId) -> Option<&mut Vertex> {
        self.verts.get_mut(v.0)
    }

    pub fn edge(&self, e: EdgeId) -> Option<&Edge> {
        self.edges.get(e.0)
    }

    pub fn edge_mut(&mut self, e: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(e.0)
    }

    pub fn face(&self, f: FaceId) -> Option<&Face> {
        self.faces.get(f.0)
    }

    pub fn face_mut(&mut self, f: FaceId) -> Option<&mut Face> {
        self.faces.get_mut(f.0)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertId, &Vertex)> {
        self.verts.iter().map(|(i, v)| (VertId(i), v))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().map(|(i, e)| (EdgeId(i), e))
    }

    pub fn faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces.iter().map(|(i, f)| (FaceId(i), f))
    }

    /// Position of a live vertex, or `Vec3::ZERO` for a stale handle.
    pub fn co(&self, v: VertId) -> Vec3 {
        self.vertex(v).map(|vert| vert.co).unwrap_or(Vec3::ZERO)
    }

    pub fn set_position(&mut self, v: VertId, co: Vec3) {
        if let Some(vert) = self.vertex_mut(v) {
            vert.co = co;
        }
    }

    pub fn set_mask(&mut self, v: VertId, mask: f32) {
        if let Some(vert) = self.vertex_mut(v) {
            vert.mask = mask.clamp(0.0, 1.0);
        }
    }

    pub fn set_vertex_hidden(&mut self, v: VertId, hidden: bool) {
        if let Some(vert) = self.vertex_mut(v) {
            vert.flags.set(ElemFlags::HIDDEN, hidden);
        }
    }

    pub fn set_face_hidden(&mut self, f: FaceId, hidden: bool) {
        if let Some(face) = self.face_mut(f) {
            face.flags.set(ElemFlags::HIDDEN, hidden);
        }
    }

    pub fn set_edge_seam(&mut self, a: VertId, b: VertId, seam: bool) -> bool {
        let Some(e) = self.edge_between(a, b) else {
            return false;
        };
        if let Some(edge) = self.edge_mut(e) {
            edge.flags.set(ElemFlags::SEAM, seam);
        }
        true
    }

    pub fn edge_between(&self, a: VertId, b: VertId) -> Option<EdgeId> {
        self.edge_map.get(&edge_key(a, b)).copied()
    }

    /// Existing face over the three vertices, in either winding.
    pub fn face_exists(&self, v: [VertId; 3]) -> Option<FaceId> {
        let e = self.edge_between(v[0], v[1])?;
        self.edge(e)?
            .faces
            .iter()
            .copied()
            .find(|&f| self.face(f).is_some_and(|face| face.v.contains(&v[2])))
    }

    pub fn add_vertex(&mut self, co: Vec3, no: Vec3) -> VertId {
        VertId(self.verts.insert(Vertex::new(co, no)))
    }

    /// Edge between `a` and `b`, created if missing.
    pub fn ensure_edge(&mut self, a: VertId, b: VertId) -> EdgeId {
        if let Some(e) = self.edge_between(a, b) {
            return e;
        }
        let e = EdgeId(self.edges.insert(Edge {
            v: [a, b],
            flags: ElemFlags::empty(),
            faces: Vec::new(),
        }));
        self.edge_map.insert(edge_key(a, b), e);
        for v in [a, b] {
            if let Some(vert) = self.verts.get_mut(v.0) {
                vert.edges.push(e);
            }
        }
        e
    }

    /// Create a triangle, reusing existing edges.
    ///
    /// Callers must check that the face does not already exist and that the
    /// three vertices are distinct and live.
    pub fn add_face(&mut self, v: [VertId; 3]) -> FaceId {
        debug_assert!(v[0] != v[1] && v[1] != v[2] && v[0] != v[2]);
        debug_assert!(self.face_exists(v).is_none());

        let e = [
            self.ensure_edge(v[0], v[1]),
            self.ensure_edge(v[1], v[2]),
            self.ensure_edge(v[2], v[0]),
        ];
        let no = self.calc_face_normal(v);
        let f = FaceId(self.faces.insert(Face {
            v,
            e,
            no,
            flags: ElemFlags::empty(),
            node: None,
        }));
        for edge in e {
            if let Some(edge) = self.edges.get_mut(edge.0) {
                edge.faces.push(f);
            }
        }
        f
    }

    /// Remove a face. Its edges stay, possibly as wire edges.
    pub fn kill_face(&mut self, f: FaceId) -> Option<Face> {
        let face = self.faces.remove(f.0)?;
        for e in face.e {
            if let Some(edge) = self.edges.get_mut(e.0) {
                edge.faces.retain(|&x| x != f);
            }
        }
        Some(face)
    }

    /// Remove an edge and every face using it.
    pub fn kill_edge(&mut self, e: EdgeId) -> Option<Edge> {
        let faces = self.edge(e)?.faces.clone();
        for f in faces {
            self.kill_face(f);
        }
        let edge = self.edges.remove(e.0)?;
        self.edge_map.remove(&edge_key(edge.v[0], edge.v[1]));
        for v in edge.v {
            if let Some(vert) = self.verts.get_mut(v.0) {
                vert.edges.retain(|&x| x != e);
            }
        }
        Some(edge)
    }

    /// Remove a vertex and everything attached to it.
    pub fn kill_vertex(&mut self, v: VertId) -> Option<Vertex> {
        let edges = self.vertex(v)?.edges.clone();
        for e in edges {
            self.kill_edge(e);
        }
        self.verts.remove(v.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Unit quad split along the (0, 2) diagonal, facing +Z.
    pub(crate) fn quad() -> Mesh {
        let positions = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        Mesh::from_triangles(&positions, &[[0, 1, 2], [0, 2, 3]]).unwrap()
    }

    #[test]
    fn test_from_triangles_builds_adjacency() {
        let mesh = quad();
        assert_eq!(mesh.vert_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.edge_count(), 5);

        let diagonal = mesh.edge_between(VertId(2), VertId(0)).unwrap();
        assert_eq!(mesh.edge(diagonal).unwrap().faces().len(), 2);
        assert!(mesh.face_exists([VertId(2), VertId(3), VertId(0)]).is_some());
        assert!(mesh.face_exists([VertId(1), VertId(3), VertId(0)]).is_none());
    }

    #[test]
    fn test_from_triangles_rejects_bad_input() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        assert_eq!(
            Mesh::from_triangles(&positions, &[[0, 1, 5]]).unwrap_err(),
            DyntopoError::VertexOutOfRange {
                triangle: 0,
                vertex: 5,
                count: 3
            }
        );
        assert_eq!(
            Mesh::from_triangles(&positions, &[[0, 1, 1]]).unwrap_err(),
            DyntopoError::DegenerateTriangle { triangle: 0 }
        );
        assert_eq!(
            Mesh::from_triangles(&positions, &[[0, 1, 2], [1, 2, 0]]).unwrap_err(),
            DyntopoError::DuplicateTriangle { triangle: 1 }
        );
        let nan = [Vec3::ZERO, Vec3::X, Vec3::new(f32::NAN, 0.0, 0.0)];
        assert!(matches!(
            Mesh::from_triangles(&nan, &[[0, 1, 2]]),
            Err(DyntopoError::NonFinitePosition(VertId(2)))
        ));
    }

    #[test]
    fn test_kill_face_leaves_wire_edges() {
        let mut mesh = quad();
        let f = mesh.face_exists([VertId(0), VertId(1), VertId(2)]).unwrap();
        mesh.kill_face(f);
        assert_eq!(mesh.face_count(), 1);
        let e = mesh.edge_between(VertId(0), VertId(1)).unwrap();
        assert!(mesh.edge(e).unwrap().is_wire());
    }

    #[test]
    fn test_kill_vertex_removes_incident_elements() {
        let mut mesh = quad();
        mesh.kill_vertex(VertId(1));
        assert_eq!(mesh.vert_count(), 3);
        assert_eq!(mesh.face_count(), 1);
        assert!(mesh.edge_between(VertId(0), VertId(1)).is_none());
        assert!(mesh.vertex(VertId(1)).is_none());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut mesh = quad();
        mesh.kill_vertex(VertId(3));
        let v = mesh.add_vertex(Vec3::ONE, Vec3::Z);
        assert_eq!(v, VertId(3));
        assert_eq!(mesh.vert_capacity(), 4);
    }
}
