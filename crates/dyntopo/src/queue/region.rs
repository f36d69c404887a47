//! Brush region tests used while collecting candidates.

use glam::Vec3;

use crate::types::TopologyUpdate;

/// Where a topology pass may look for work.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BrushRegion {
    pub center: Vec3,
    pub radius: f32,
    pub radius_sq: f32,
    /// Normalized view direction, if one was given
    pub view_normal: Option<Vec3>,
    pub use_frontface: bool,
    pub use_projected: bool,
}

impl BrushRegion {
    pub fn from_update(update: &TopologyUpdate) -> Self {
        let view_normal = update
            .view_normal
            .map(Vec3::normalize_or_zero)
            .filter(|n| *n != Vec3::ZERO);
        Self {
            center: update.center,
            radius: update.radius,
            radius_sq: update.radius * update.radius,
            view_normal,
            use_frontface: update.use_frontface && view_normal.is_some(),
            use_projected: update.use_projected && view_normal.is_some(),
        }
    }

    /// Whether a face with normal `no` passes the front-face test.
    /// Always true when the test is off.
    pub fn is_front_facing(&self, no: Vec3) -> bool {
        match self.view_normal {
            Some(view) if self.use_frontface => no.dot(view) >= 0.0,
            _ => true,
        }
    }

    /// Whether the triangle touches the brush.
    pub fn tri_in_range(&self, tri: [Vec3; 3]) -> bool {
        match self.view_normal {
            Some(view) if self.use_projected => self.tri_in_circle(tri, view),
            _ => self.tri_in_sphere(tri),
        }
    }

    /// Sphere test sampling the corners, edge midpoints and centroid.
    fn tri_in_sphere(&self, [a, b, c]: [Vec3; 3]) -> bool {
        let samples = [
            a,
            b,
            c,
            (a + b) * 0.5,
            (b + c) * 0.5,
            (c + a) * 0.5,
            (a + b + c) / 3.0,
        ];
        let dist_sq = samples
            .iter()
            .map(|p| p.distance_squared(self.center))
            .fold(f32::INFINITY, f32::min);
        dist_sq <= self.radius_sq
    }

    /// Circle test in the plane orthogonal to the view direction.
    fn tri_in_circle(&self, tri: [Vec3; 3], view: Vec3) -> bool {
        let [a, b, c] = tri.map(|p| project_to_plane(p, view));
        let center = project_to_plane(self.center, view);
        let closest = closest_point_on_triangle(center, a, b, c);
        closest.distance_squared(center) <= self.radius_sq
    }

    /// Whether a vertex lies within `scale` times the brush radius.
    pub fn vert_in_range(&self, co: Vec3, scale: f32) -> bool {
        let limit = self.radius * scale;
        let (co, center) = match self.view_normal {
            Some(view) if self.use_projected => {
                (project_to_plane(co, view), project_to_plane(self.center, view))
            }
            _ => (co, self.center),
        };
        co.distance_squared(center) < limit * limit
    }
}

/// Project onto the plane through the origin with unit normal `n`.
fn project_to_plane(p: Vec3, n: Vec3) -> Vec3 {
    p - n * p.dot(n)
}

/// Closest point to `p` on triangle `abc` (Ericson, Real-Time Collision
/// Detection 5.1.5).
pub(crate) fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}
