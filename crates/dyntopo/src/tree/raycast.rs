//! Ray queries against the tree.
//!
//! Ray-triangle tests use the Moller-Trumbore algorithm. Nodes are culled by
//! their bounding boxes (original boxes when querying original coordinates)
//! and visited nearest-entry first.

use glam::Vec3;

use super::{DyntopoTree, NodeId, NodeKind};
use crate::attributes::AttributeStore;
use crate::error::DyntopoError;
use crate::log::ChangeLog;
use crate::mesh::{FaceId, Mesh, VertId};

/// Epsilon for floating point comparisons in ray intersection
const EPSILON: f32 = 1e-6;

/// Result of a ray-triangle intersection test
#[derive(Debug, Clone, Copy)]
pub struct TriangleHit {
    /// Distance along the ray to the intersection point
    pub t: f32,
    /// Barycentric coordinate u (weight for vertex 1)
    pub u: f32,
    /// Barycentric coordinate v (weight for vertex 2)
    pub v: f32,
}

/// Closest surface hit along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance along the ray
    pub depth: f32,
    pub face: FaceId,
    /// Vertex of the hit triangle closest to the ray start
    pub nearest_vertex: VertId,
    /// Face normal, or the averaged original vertex normals for
    /// original-coordinate queries
    pub normal: Vec3,
}

/// Closest approach between a ray and the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestHit {
    pub face: FaceId,
    /// Squared distance between the ray and the triangle
    pub dist_sq: f32,
    /// Ray parameter of the closest approach
    pub depth: f32,
}

/// Moller-Trumbore ray-triangle intersection algorithm.
///
/// Returns the hit distance and barycentric coordinates if the ray intersects
/// the triangle. Hits behind the ray origin are rejected.
pub fn ray_triangle_intersection(
    ray_origin: Vec3,
    ray_dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<TriangleHit> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let pvec = ray_dir.cross(edge2);
    let det = edge1.dot(pvec);

    // Ray parallel to the triangle plane
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let tvec = ray_origin - v0;

    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let qvec = tvec.cross(edge1);
    let v = ray_dir.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(qvec) * inv_det;
    if t < EPSILON {
        return None;
    }

    Some(TriangleHit { t, u, v })
}

/// Squared distance between the ray `origin + t * dir` (t >= 0, `dir`
/// normalized) and segment `a`-`b`, with the ray parameter at closest
/// approach.
fn ray_segment_dist_sq(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let seg = b - a;
    let w = origin - a;
    let seg_len_sq = seg.length_squared();
    let d = dir.dot(seg);
    let e = dir.dot(w);
    let f = seg.dot(w);
    let denom = seg_len_sq - d * d;

    let mut s = if denom > EPSILON && seg_len_sq > EPSILON {
        ((f - d * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = d * s - e;
    if t < 0.0 {
        t = 0.0;
        s = if seg_len_sq > EPSILON {
            (f / seg_len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
    let p_ray = origin + dir * t;
    let p_seg = a + seg * s;
    (p_ray.distance_squared(p_seg), t)
}

fn tri_positions(mesh: &Mesh, f: FaceId, use_original: bool) -> Option<[Vec3; 3]> {
    let face = mesh.face(f)?;
    let mut out = [Vec3::ZERO; 3];
    for (slot, &v) in face.v.iter().enumerate() {
        let vert = mesh.vertex(v)?;
        out[slot] = if use_original { vert.orig_co } else { vert.co };
    }
    Some(out)
}

impl<A: AttributeStore, L: ChangeLog> DyntopoTree<A, L> {
    /// Closest visible hit along the ray.
    pub fn raycast(&self, ray_start: Vec3, ray_dir: Vec3, use_original: bool) -> Option<RayHit> {
        let dir = ray_dir.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }

        let mut best: Option<RayHit> = None;
        let mut stack = vec![NodeId::ROOT];
        while let Some(ni) = stack.pop() {
            let Some(node) = self.nodes.get(ni.index()) else {
                continue;
            };
            if node.is_fully_hidden() {
                continue;
            }
            let bounds = if use_original { &node.orig_bounds } else { &node.bounds };
            let Some(entry) = bounds.ray_entry(ray_start, dir) else {
                continue;
            };
            let max_depth = best.map_or(f32::INFINITY, |hit| hit.depth);
            if entry > max_depth {
                continue;
            }
            match node.kind {
                NodeKind::Internal { children } => stack.extend(children),
                NodeKind::Leaf => {
                    if let Ok(Some(hit)) =
                        self.raycast_node(ni, ray_start, dir, use_original, max_depth)
                    {
                        best = Some(hit);
                    }
                }
            }
        }
        best
    }

    /// Closest hit among the faces of one leaf that is nearer than
    /// `max_depth`.
    pub fn raycast_node(
        &self,
        leaf: NodeId,
        ray_start: Vec3,
        ray_dir: Vec3,
        use_original: bool,
        max_depth: f32,
    ) -> Result<Option<RayHit>, DyntopoError> {
        let node = self.leaf(leaf)?;
        let mut best: Option<RayHit> = None;
        let mut depth = max_depth;

        for &f in &node.faces {
            let Some(face) = self.mesh.face(f) else {
                continue;
            };
            if face.is_hidden() {
                continue;
            }
            let Some([a, b, c]) = tri_positions(&self.mesh, f, use_original) else {
                continue;
            };
            let Some(hit) = ray_triangle_intersection(ray_start, ray_dir, a, b, c) else {
                continue;
            };
            if hit.t >= depth {
                continue;
            }
            depth = hit.t;

            let positions = [a, b, c];
            let nearest = (0..3)
                .min_by(|&i, &j| {
                    positions[i]
                        .distance_squared(ray_start)
                        .total_cmp(&positions[j].distance_squared(ray_start))
                })
                .unwrap_or(0);
            let normal = if use_original {
                face.v
                    .iter()
                    .filter_map(|&v| self.mesh.vertex(v).map(|vert| vert.orig_no))
                    .sum::<Vec3>()
                    .normalize_or_zero()
            } else {
                face.no
            };
            best = Some(RayHit {
                depth: hit.t,
                face: f,
                nearest_vertex: face.v[nearest],
                normal,
            });
        }
        Ok(best)
    }

    /// Length of the longest edge of the triangle under the ray, used to
    /// sample detail size from the surface.
    pub fn raycast_detail(&self, ray_start: Vec3, ray_dir: Vec3) -> Option<f32> {
        let hit = self.raycast(ray_start, ray_dir, false)?;
        let [a, b, c] = self.mesh.face_positions(hit.face)?;
        let max_sq = a
            .distance_squared(b)
            .max(b.distance_squared(c))
            .max(c.distance_squared(a));
        Some(max_sq.sqrt())
    }

    /// Visible face passing closest to the ray.
    pub fn nearest_to_ray(
        &self,
        ray_start: Vec3,
        ray_dir: Vec3,
        use_original: bool,
    ) -> Option<NearestHit> {
        let dir = ray_dir.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }

        let mut best: Option<NearestHit> = None;
        for leaf in self.leaves() {
            let node = &self.nodes[leaf.index()];
            if node.is_fully_hidden() {
                continue;
            }
            for &f in &node.faces {
                if self.mesh.face(f).is_none_or(|face| face.is_hidden()) {
                    continue;
                }
                let Some([a, b, c]) = tri_positions(&self.mesh, f, use_original) else {
                    continue;
                };
                let (dist_sq, depth) = match ray_triangle_intersection(ray_start, dir, a, b, c) {
                    Some(hit) => (0.0, hit.t),
                    None => [(a, b), (b, c), (c, a)]
                        .into_iter()
                        .map(|(p, q)| ray_segment_dist_sq(ray_start, dir, p, q))
                        .min_by(|x, y| x.0.total_cmp(&y.0))
                        .unwrap_or((f32::INFINITY, 0.0)),
                };
                let better = match best {
                    None => true,
                    Some(prev) => {
                        dist_sq < prev.dist_sq || (dist_sq == prev.dist_sq && depth < prev.depth)
                    }
                };
                if better {
                    best = Some(NearestHit {
                        face: f,
                        dist_sq,
                        depth,
                    });
                }
            }
        }
        best
    }
}
