use crate::{Interval, Ray, Vec3};

/// Axis-aligned bounding box stored as two corner points.
///
/// Used for world-space object bounds (uploaded as `min`/`max` uniforms),
/// BVH node bounds, and host-side picking.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning two arbitrary corner points.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest box containing every point; `EMPTY` for no points.
    pub fn enclosing<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| acc.including(p))
    }

    pub fn including(&self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn surrounding(a: &Aabb, b: &Aabb) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Grows the box by `delta` on every side.
    pub fn padded(&self, delta: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(delta),
            max: self.max + Vec3::splat(delta),
        }
    }

    /// Surface-area proxy `xy + yz + xz` (half the true surface area).
    ///
    /// Shared by the SAH cost and by the draw-order sort, so it only has
    /// to rank boxes consistently.
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.extent();
        e.x * e.y + e.y * e.z + e.x * e.z
    }

    pub fn contains_point(&self, p: Vec3, eps: f32) -> bool {
        p.cmpge(self.min - Vec3::splat(eps)).all() && p.cmple(self.max + Vec3::splat(eps)).all()
    }

    /// The 8 corner points, in binary order (x fastest).
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Slab test returning the raw `(tNear, tFar)` pair.
    ///
    /// `inv_dir` is the componentwise reciprocal of the ray direction. The
    /// pair is returned even on a miss (`tNear > tFar`).
    pub fn slab(&self, origin: Vec3, inv_dir: Vec3) -> Interval {
        let t_min = (self.min - origin) * inv_dir;
        let t_max = (self.max - origin) * inv_dir;
        let t1 = t_min.min(t_max);
        let t2 = t_min.max(t_max);
        Interval::new(t1.max_element(), t2.min_element())
    }

    /// Traversal box test against the running closest hit `t`.
    ///
    /// Accepts when the slab is not entirely behind the origin and its near
    /// side is no farther than both its far side and `t`.
    pub fn hit_before(&self, origin: Vec3, inv_dir: Vec3, t: f32) -> bool {
        let range = self.slab(origin, inv_dir);
        !(range.min < 0.0 && range.max < 0.0) && range.min <= range.max.min(t)
    }

    /// Host picking test: nearest entry distance in front of the origin.
    pub fn pick(&self, ray: &Ray) -> Option<f32> {
        let range = self.slab(ray.origin, ray.direction.recip());
        if range.min > 0.0 && range.min < range.max {
            Some(range.min)
        } else {
            None
        }
    }

    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// The canonical unit domain `[-1, 1]^3` most primitives are defined in.
    pub const UNIT: Aabb = Aabb {
        min: Vec3::splat(-1.0),
        max: Vec3::splat(1.0),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_enclosing() {
        let aabb = Aabb::enclosing([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 3.0, 0.5)]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(Aabb::enclosing(std::iter::empty::<Vec3>()).is_empty());
    }

    #[test]
    fn test_aabb_area_proxy() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        // 1*2 + 2*3 + 1*3
        assert!((aabb.area() - 11.0).abs() < 0.001);
        assert_eq!(Aabb::EMPTY.area(), 0.0);
    }

    #[test]
    fn test_aabb_slab_hit() {
        let aabb = Aabb::UNIT;
        let origin = Vec3::new(0.0, 0.0, 5.0);
        let dir = Vec3::new(0.0, 0.0, -1.0);
        let range = aabb.slab(origin, dir.recip());

        assert!((range.min - 4.0).abs() < 0.001);
        assert!((range.max - 6.0).abs() < 0.001);
        assert!(aabb.hit_before(origin, dir.recip(), f32::INFINITY));
        // A closer hit already found prunes the box
        assert!(!aabb.hit_before(origin, dir.recip(), 3.0));
    }

    #[test]
    fn test_aabb_behind_origin() {
        let aabb = Aabb::UNIT;
        let origin = Vec3::new(0.0, 0.0, 5.0);
        let dir = Vec3::new(0.0, 0.0, 1.0);

        assert!(!aabb.hit_before(origin, dir.recip(), f32::INFINITY));
        assert!(aabb.pick(&Ray::new(origin, dir)).is_none());
    }

    #[test]
    fn test_aabb_pick_from_inside_misses() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(Aabb::UNIT.pick(&ray).is_none());

        let outside = Ray::new(Vec3::new(-3.0, 0.0, 0.0), Vec3::X);
        let t = Aabb::UNIT.pick(&outside).unwrap_or(-1.0);
        assert!((t - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_aabb_corners_cover_box() {
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let rebuilt = Aabb::enclosing(aabb.corners());
        assert_eq!(rebuilt, aabb);
    }
}
