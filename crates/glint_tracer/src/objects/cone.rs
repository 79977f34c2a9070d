use glam::{Mat4, Vec2, Vec3, Vec4};

use super::LocalShape;
use crate::emit::Namespace;
use crate::error::TracerResult;
use crate::library::SurfaceHit;
use crate::uniforms::{UniformBlock, UniformKind, UniformLayout};
use glint_math::Aabb;

/// Capped cone along y, from `radius` at the bottom to `top_radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub center: Vec3,
    pub radius: f32,
    pub top_radius: f32,
    pub half_height: f32,
}

impl Cone {
    pub fn new(center: Vec3, radius: f32, top_radius: f32, half_height: f32) -> Self {
        Self {
            center,
            radius,
            top_radius,
            half_height,
        }
    }

    /// Canonical cone spans y in `[0, 1]`.
    pub(super) fn object_transformation(&self) -> Mat4 {
        let (r, h, c) = (self.radius, self.half_height, self.center);
        Mat4::from_cols(
            Vec4::new(r, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 * h, 0.0, 0.0),
            Vec4::new(0.0, 0.0, r, 0.0),
            Vec4::new(c.x, c.y - h, c.z, 1.0),
        )
    }

    fn top_ratio(&self) -> f32 {
        if self.radius == 0.0 {
            0.0
        } else {
            self.top_radius / self.radius
        }
    }
}

fn cone_hit(rd: Vec3, t: f32, normal: Vec3) -> Option<SurfaceHit> {
    Some(SurfaceHit::new(t, normal, Vec2::ZERO, rd.dot(normal) > 0.0))
}

fn dot2(v: Vec3) -> f32 {
    v.dot(v)
}

impl LocalShape for Cone {
    fn tag(&self) -> &'static str {
        "Cone"
    }

    fn canonical_bounds(&self) -> Aabb {
        Aabb::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::ONE)
    }

    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectUnitCone({ro}, {rd}, {}.x)", ns.uniform("topCone"))
    }

    fn push_uniforms(&self, ns: &Namespace, layout: &mut UniformLayout) {
        layout.push(ns.name("topCone"), UniformKind::Vec4);
    }

    fn write_uniforms(&self, ns: &Namespace, block: &mut UniformBlock<'_>) -> TracerResult<()> {
        block.set_float(&ns.name("topCone"), self.top_ratio())
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, _two_sided: bool) -> Option<SurfaceHit> {
        let rb = self.top_ratio();
        let ob = ro - Vec3::Y;
        if ro.y < 0.0 {
            if dot2(ro * rd.y - rd * ro.y) < rd.y * rd.y && -ro.y / rd.y > 0.0 {
                return cone_hit(rd, -ro.y / rd.y, Vec3::NEG_Y);
            }
        } else if ro.y > 1.0
            && dot2(ob * rd.y - rd * ob.y) < rb * rb * rd.y * rd.y
            && -ob.y / rd.y > 0.0
        {
            return cone_hit(rd, -ob.y / rd.y, Vec3::Y);
        }

        let rr = 1.0 - rb;
        let hy = 1.0 + rr * rr;
        let k2 = 1.0 - rd.y * rd.y * hy;
        let k1 = rd.dot(ro) - ro.y * rd.y * hy + rr * rd.y;
        let k0 = ro.dot(ro) - ro.y * ro.y * hy + rr * ro.y * 2.0 - 1.0;
        let h = k1 * k1 - k2 * k0;
        if h < 0.0 {
            return None;
        }
        let s = h.sqrt();
        for t in [(-k1 - s) / k2, (-k1 + s) / k2] {
            let y = ro.y + t * rd.y;
            if y > 0.0 && y < 1.0 && t > 0.0 {
                let n = (ro + t * rd + Vec3::new(0.0, rr - hy * y, 0.0)).normalize();
                return cone_hit(rd, t, n);
            }
        }

        let t_base = -ro.y / rd.y;
        if t_base > 0.0 && dot2(ro * rd.y - rd * ro.y) < rd.y * rd.y {
            return cone_hit(rd, t_base, Vec3::NEG_Y);
        }
        let t_top = -ob.y / rd.y;
        if t_top > 0.0 && dot2(ob * rd.y - rd * ob.y) < rb * rb * rd.y * rd.y {
            return cone_hit(rd, t_top, Vec3::Y);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transformation_spans_height() {
        let cone = Cone::new(Vec3::new(0.0, 1.0, 0.0), 0.5, 0.25, 0.5);
        let m = cone.object_transformation();
        assert!((m.transform_point3(Vec3::ZERO).y - 0.5).abs() < 1e-6);
        assert!((m.transform_point3(Vec3::Y).y - 1.5).abs() < 1e-6);
        assert!((cone.top_ratio() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_base_and_side() {
        let cone = Cone::new(Vec3::ZERO, 1.0, 0.0, 0.5);
        let base = cone.hit_local(Vec3::new(0.2, -2.0, 0.0), Vec3::Y, false).unwrap();
        assert!((base.t - 2.0).abs() < 1e-5);
        assert_eq!(base.normal, Vec3::NEG_Y);
        // At y = 0.5 a pointed cone has radius 0.5
        let side = cone.hit_local(Vec3::new(3.0, 0.5, 0.0), Vec3::NEG_X, false).unwrap();
        assert!((side.t - 2.5).abs() < 1e-4);
        assert!(side.normal.x > 0.0 && side.normal.y > 0.0);
    }
}
