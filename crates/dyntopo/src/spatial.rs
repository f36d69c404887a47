//! Axis-aligned bounding boxes for tree nodes and face centroids.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
///
/// An "empty" box has `min > max` on every axis and absorbs the first point
/// included into it.
#[derive(
    Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
#[repr(C)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.include_point(p);
        }
        bounds
    }

    pub fn include_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn include_aabb(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index of the widest axis (0 = X, 1 = Y, 2 = Z). Ties and empty boxes
    /// resolve to the lowest axis.
    pub fn widest_axis(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Whether `inner` lies inside this box, with a small tolerance.
    pub fn contains_aabb(&self, inner: &Aabb, tolerance: f32) -> bool {
        inner.is_empty()
            || ((inner.min + Vec3::splat(tolerance)).cmpge(self.min).all()
                && (inner.max - Vec3::splat(tolerance)).cmple(self.max).all())
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if self.is_empty() {
            return false;
        }
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }

    /// Slab test. Returns the entry distance along the ray, clamped to zero
    /// when the origin is inside the box.
    pub fn ray_entry(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let inv = dir.recip();
        let t1 = (self.min - origin) * inv;
        let t2 = (self.max - origin) * inv;
        // NaN from 0 * inf on a slab boundary is treated as "inside that slab"
        let tmin = t1.min(t2);
        let tmax = t1.max(t2);
        let enter = [tmin.x, tmin.y, tmin.z]
            .into_iter()
            .filter(|t| !t.is_nan())
            .fold(f32::NEG_INFINITY, f32::max);
        let exit = [tmax.x, tmax.y, tmax.z]
            .into_iter()
            .filter(|t| !t.is_nan())
            .fold(f32::INFINITY, f32::min);
        if exit < enter.max(0.0) {
            return None;
        }
        Some(enter.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_absorbs_first_point() {
        let mut bounds = Aabb::empty();
        assert!(bounds.is_empty());
        bounds.include_point(Vec3::new(1.0, 2.0, 3.0));
        assert!(!bounds.is_empty());
        assert_eq!(bounds.min, bounds.max);
    }

    #[test]
    fn test_widest_axis() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 5.0, 2.0));
        assert_eq!(bounds.widest_axis(), 1);
        assert_eq!(Aabb::empty().widest_axis(), 0);
        let flat = Aabb::new(Vec3::ONE, Vec3::ONE);
        assert_eq!(flat.widest_axis(), 0);
    }

    #[test]
    fn test_intersects_sphere() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(bounds.intersects_sphere(Vec3::new(1.5, 0.5, 0.5), 0.6));
        assert!(!bounds.intersects_sphere(Vec3::new(3.0, 0.5, 0.5), 0.6));
        assert!(!Aabb::empty().intersects_sphere(Vec3::ZERO, 100.0));
    }

    #[test]
    fn test_ray_entry() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let t = bounds
            .ray_entry(Vec3::new(0.5, 0.5, 3.0), Vec3::new(0.0, 0.0, -1.0))
            .unwrap();
        assert!((t - 2.0).abs() < 1e-6);
        assert!(bounds
            .ray_entry(Vec3::new(0.5, 0.5, 3.0), Vec3::new(0.0, 0.0, 1.0))
            .is_none());
        assert_eq!(
            bounds.ray_entry(Vec3::splat(0.5), Vec3::X),
            Some(0.0)
        );
    }

    #[test]
    fn test_contains_aabb() {
        let outer = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let inner = Aabb::new(Vec3::splat(0.25), Vec3::splat(0.75));
        assert!(outer.contains_aabb(&inner, 0.0));
        assert!(!inner.contains_aabb(&outer, 0.0));
    }
}
