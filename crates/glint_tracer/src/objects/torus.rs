use glam::{Mat4, Vec2, Vec3, Vec4};

use super::LocalShape;
use crate::emit::Namespace;
use crate::error::TracerResult;
use crate::library::SurfaceHit;
use crate::uniforms::{UniformBlock, UniformKind, UniformLayout};
use glint_math::Aabb;

/// Torus in the object's xy plane around z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Torus {
    pub center: Vec3,
    pub major_radius: f32,
    pub minor_radius: f32,
}

impl Torus {
    pub fn new(center: Vec3, major_radius: f32, minor_radius: f32) -> Self {
        Self {
            center,
            major_radius,
            minor_radius,
        }
    }

    pub(super) fn object_transformation(&self) -> Mat4 {
        Mat4::from_translation(self.center)
    }

    fn shape(&self) -> Vec2 {
        Vec2::new(self.major_radius, self.minor_radius)
    }
}

fn torus_surface(p: Vec3, tor: Vec2) -> (Vec3, Vec2) {
    let n = (p * (p.dot(p) - tor.y * tor.y - tor.x * tor.x * Vec3::new(1.0, 1.0, -1.0))).normalize();
    let uv = Vec2::new(0.8 * p.x.atan2(p.y), p.z.atan2(p.truncate().length() - tor.x));
    (n, uv)
}

/// Analytic quartic solve, root-for-root with `intersectUnitTorus`.
fn intersect_torus(ro: Vec3, rd: Vec3, tor: Vec2) -> Option<f32> {
    let mut po = 1.0;
    let ra2_major = tor.x * tor.x;
    let ra2_minor = tor.y * tor.y;
    let m = ro.dot(ro);
    let n = ro.dot(rd);

    let reach = tor.x + tor.y;
    if n * n - m + reach * reach < 0.0 {
        return None;
    }

    let k = (m - ra2_minor - ra2_major) / 2.0;
    let mut k3 = n;
    let mut k2 = n * n + ra2_major * rd.z * rd.z + k;
    let mut k1 = k * n + ra2_major * ro.z * rd.z;
    let mut k0 = k * k + ra2_major * ro.z * ro.z - ra2_major * ra2_minor;

    if (k3 * (k3 * k3 - k2) + k1).abs() < 0.01 {
        po = -1.0;
        std::mem::swap(&mut k1, &mut k3);
        k0 = 1.0 / k0;
        k1 *= k0;
        k2 *= k0;
        k3 *= k0;
    }

    let c2 = (2.0 * k2 - 3.0 * k3 * k3) / 3.0;
    let c1 = (k3 * (k3 * k3 - k2) + k1) * 2.0;
    let c0 = (k3 * (k3 * (-3.0 * k3 * k3 + 4.0 * k2) - 8.0 * k1) + 4.0 * k0) / 3.0;
    let q = c2 * c2 + c0;
    let r = 3.0 * c0 * c2 - c2 * c2 * c2 - c1 * c1;
    let h = r * r - q * q * q;
    let z = if h < 0.0 {
        let sq = q.sqrt();
        2.0 * sq * ((r / (sq * q)).clamp(-1.0, 1.0).acos() / 3.0).cos()
    } else {
        let sq = (h.sqrt() + r.abs()).powf(1.0 / 3.0);
        r.signum() * (sq + q / sq).abs()
    };
    let z = c2 - z;

    let mut d1 = z - 3.0 * c2;
    let mut d2 = z * z - 3.0 * c0;
    if d1.abs() < 1.0e-4 {
        if d2 < 0.0 {
            return None;
        }
        d2 = d2.sqrt();
    } else {
        if d1 < 0.0 {
            return None;
        }
        d1 = (d1 / 2.0).sqrt();
        d2 = c1 / d1;
    }

    let mut result = f32::INFINITY;
    for (offset, h) in [(-d1, d1 * d1 - z + d2), (d1, d1 * d1 - z - d2)] {
        if h <= 0.0 {
            continue;
        }
        let h = h.sqrt();
        for t in [offset - h - k3, offset + h - k3] {
            let t = if po < 0.0 { 2.0 / t } else { t };
            if t > 0.0 {
                result = result.min(t);
            }
        }
    }
    result.is_finite().then_some(result)
}

impl LocalShape for Torus {
    fn tag(&self) -> &'static str {
        "Torus"
    }

    fn canonical_bounds(&self) -> Aabb {
        let reach = self.major_radius + self.minor_radius;
        let extent = Vec3::new(reach, reach, self.minor_radius);
        Aabb::new(-extent, extent)
    }

    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectUnitTorus({ro}, {rd}, {}.xy)", ns.uniform("torusShape"))
    }

    fn push_uniforms(&self, ns: &Namespace, layout: &mut UniformLayout) {
        layout.push(ns.name("torusShape"), UniformKind::Vec4);
    }

    fn write_uniforms(&self, ns: &Namespace, block: &mut UniformBlock<'_>) -> TracerResult<()> {
        let tor = self.shape();
        block.set_vec4(&ns.name("torusShape"), Vec4::new(tor.x, tor.y, 0.0, 0.0))
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, _two_sided: bool) -> Option<SurfaceHit> {
        let tor = self.shape();
        let t = intersect_torus(ro, rd, tor)?;
        let (normal, uv) = torus_surface(ro + rd * t, tor);
        Some(SurfaceHit::new(t, normal, uv, rd.dot(normal) > 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_hits() {
        let torus = Torus::new(Vec3::ZERO, 1.0, 0.25);
        // Down the z axis through the hole
        assert!(torus.hit_local(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, false).is_none());
        // Through the tube at x = 1
        let hit = torus.hit_local(Vec3::new(1.0, 0.0, 5.0), Vec3::NEG_Z, false).unwrap();
        assert!((hit.t - 4.75).abs() < 1e-2);
        assert!(hit.normal.z > 0.9);
        // Along x from outside, hits the outer rim first
        let rim = torus.hit_local(Vec3::new(5.0, 0.0, 0.0), Vec3::NEG_X, false).unwrap();
        assert!((rim.t - 3.75).abs() < 1e-2);
    }

    #[test]
    fn test_bounds_hug_the_ring() {
        let torus = Torus::new(Vec3::ZERO, 2.0, 0.5);
        let bounds = torus.canonical_bounds();
        assert_eq!(bounds.max, Vec3::new(2.5, 2.5, 0.5));
    }
}
