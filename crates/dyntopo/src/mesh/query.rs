//! Adjacency queries and normal computation.

use glam::Vec3;

use super::{EdgeId, ElemFlags, FaceId, Mesh, VertId};

impl Mesh {
    /// Faces using `v`, each listed once.
    pub fn vert_faces(&self, v: VertId) -> Vec<FaceId> {
        let mut faces = Vec::new();
        let Some(vert) = self.vertex(v) else {
            return faces;
        };
        for &e in &vert.edges {
            if let Some(edge) = self.edge(e) {
                for &f in &edge.faces {
                    if !faces.contains(&f) {
                        faces.push(f);
                    }
                }
            }
        }
        faces
    }

    /// Number of edges incident to `v`.
    pub fn valence(&self, v: VertId) -> usize {
        self.vertex(v).map_or(0, |vert| vert.edges.len())
    }

    /// Vertices connected to `v` by an edge.
    pub fn vert_neighbors(&self, v: VertId) -> impl Iterator<Item = VertId> + '_ {
        self.vertex(v)
            .into_iter()
            .flat_map(|vert| vert.edges.iter())
            .filter_map(move |&e| self.edge(e).map(|edge| edge.other_vert(v)))
    }

    /// Whether any edge of `v` has exactly one face.
    pub fn is_boundary_vert(&self, v: VertId) -> bool {
        self.vertex(v).is_some_and(|vert| {
            vert.edges
                .iter()
                .any(|&e| self.edge(e).is_some_and(|edge| edge.faces.len() == 1))
        })
    }

    pub fn seam_edge_count(&self, v: VertId) -> usize {
        self.vertex(v).map_or(0, |vert| {
            vert.edges
                .iter()
                .filter(|&&e| {
                    self.edge(e)
                        .is_some_and(|edge| edge.flags.contains(ElemFlags::SEAM))
                })
                .count()
        })
    }

    pub fn edge_len_sq(&self, e: EdgeId) -> f32 {
        self.edge(e)
            .map_or(0.0, |edge| self.co(edge.v[0]).distance_squared(self.co(edge.v[1])))
    }

    pub fn face_positions(&self, f: FaceId) -> Option<[Vec3; 3]> {
        let face = self.face(f)?;
        Some(face.v.map(|v| self.co(v)))
    }

    pub fn face_centroid(&self, f: FaceId) -> Vec3 {
        self.face_positions(f)
            .map_or(Vec3::ZERO, |[a, b, c]| (a + b + c) / 3.0)
    }

    pub(crate) fn calc_face_normal(&self, v: [VertId; 3]) -> Vec3 {
        let [a, b, c] = v.map(|v| self.co(v));
        (b - a).cross(c - a).normalize_or_zero()
    }

    pub fn update_face_normal(&mut self, f: FaceId) {
        let Some(face) = self.face(f) else {
            return;
        };
        let no = self.calc_face_normal(face.v);
        if let Some(face) = self.face_mut(f) {
            face.no = no;
        }
    }

    /// Average of adjacent face normals; keeps the old normal for loose verts.
    pub fn calc_vert_normal(&self, v: VertId) -> Option<Vec3> {
        let sum: Vec3 = self
            .vert_faces(v)
            .into_iter()
            .filter_map(|f| self.face(f).map(|face| face.no))
            .sum();
        let no = sum.normalize_or_zero();
        (no != Vec3::ZERO).then_some(no)
    }

    pub fn update_vert_normal(&mut self, v: VertId) {
        if let Some(no) = self.calc_vert_normal(v) {
            if let Some(vert) = self.vertex_mut(v) {
                vert.no = no;
            }
        }
    }

    pub fn recalc_normals(&mut self) {
        let faces: Vec<FaceId> = self.faces().map(|(f, _)| f).collect();
        for f in faces {
            self.update_face_normal(f);
        }
        let verts: Vec<VertId> = self.vertices().map(|(v, _)| v).collect();
        for v in verts {
            self.update_vert_normal(v);
        }
    }

    /// Recompute the boundary flag of every vertex.
    pub fn recalc_boundary(&mut self) {
        let verts: Vec<(VertId, bool)> = self
            .vertices()
            .map(|(v, _)| (v, self.is_boundary_vert(v)))
            .collect();
        for (v, boundary) in verts {
            if let Some(vert) = self.vertex_mut(v) {
                vert.flags.set(ElemFlags::BOUNDARY, boundary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::quad;
    use super::*;

    #[test]
    fn test_vert_faces_and_valence() {
        let mesh = quad();
        assert_eq!(mesh.vert_faces(VertId(0)).len(), 2);
        assert_eq!(mesh.vert_faces(VertId(1)).len(), 1);
        assert_eq!(mesh.valence(VertId(0)), 3);
        assert_eq!(mesh.valence(VertId(3)), 2);
    }

    #[test]
    fn test_quad_is_open_boundary() {
        let mesh = quad();
        for (v, vert) in mesh.vertices() {
            assert!(mesh.is_boundary_vert(v));
            assert!(vert.flags.contains(ElemFlags::BOUNDARY));
        }
    }

    #[test]
    fn test_normals_face_up() {
        let mesh = quad();
        for (_, face) in mesh.faces() {
            assert!((face.no - Vec3::Z).length() < 1e-6);
        }
        for (_, vert) in mesh.vertices() {
            assert!((vert.no - Vec3::Z).length() < 1e-6);
        }
    }

    #[test]
    fn test_seam_edge_count() {
        let mut mesh = quad();
        assert!(mesh.set_edge_seam(VertId(0), VertId(2), true));
        assert_eq!(mesh.seam_edge_count(VertId(0)), 1);
        assert_eq!(mesh.seam_edge_count(VertId(1)), 0);
    }
}
