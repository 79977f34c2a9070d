use glam::{Mat4, Vec3};

use super::LocalShape;
use crate::emit::Namespace;
use crate::library::{sphere_uv, SurfaceHit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    pub(super) fn object_transformation(&self) -> Mat4 {
        Mat4::from_translation(self.center) * Mat4::from_scale(Vec3::splat(self.radius))
    }
}

impl LocalShape for Sphere {
    fn tag(&self) -> &'static str {
        "Sphere"
    }

    fn wgsl_hit(&self, _ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectUnitSphere({ro}, {rd})")
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, _two_sided: bool) -> Option<SurfaceHit> {
        let b = ro.dot(rd);
        let c = ro.dot(ro) - 1.0;
        let h = b * b - c;
        if h < 0.0 {
            return None;
        }
        let s = h.sqrt();
        let (t1, t2) = (-b - s, -b + s);
        let t = if t1 > 0.0 { t1.min(t2) } else { t2 };
        if t <= 0.0 {
            return None;
        }
        let p = ro + rd * t;
        Some(SurfaceHit::new(t, p, sphere_uv(p), t == t2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_and_inside() {
        let sphere = Sphere::new(Vec3::ZERO, 1.0);
        let hit = sphere.hit_local(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, false).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-5);
        assert!(!hit.inside);
        let exit = sphere.hit_local(Vec3::ZERO, Vec3::X, false).unwrap();
        assert!((exit.t - 1.0).abs() < 1e-5);
        assert!(exit.inside);
        assert!(sphere.hit_local(Vec3::new(0.0, 2.0, 3.0), Vec3::NEG_Z, false).is_none());
    }
}
