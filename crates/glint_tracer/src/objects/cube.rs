use glam::{Mat4, Vec3};

use super::LocalShape;
use crate::emit::Namespace;
use crate::library::{intersect_cube, normal_for_box, SurfaceHit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cube {
    pub min: Vec3,
    pub max: Vec3,
}

impl Cube {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub(super) fn object_transformation(&self) -> Mat4 {
        Mat4::from_translation((self.min + self.max) * 0.5)
            * Mat4::from_scale((self.max - self.min) * 0.5)
    }
}

impl LocalShape for Cube {
    fn tag(&self) -> &'static str {
        "Cube"
    }

    fn wgsl_hit(&self, _ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectUnitCube({ro}, {rd})")
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, _two_sided: bool) -> Option<SurfaceHit> {
        let range = intersect_cube(ro, rd, Vec3::NEG_ONE, Vec3::ONE);
        if range.x > range.y {
            return None;
        }
        let (t, inside) = if range.x <= 0.0 {
            if range.y <= 0.0 {
                return None;
            }
            (range.y, true)
        } else {
            (range.x, false)
        };
        let (normal, uv) = normal_for_box(ro + rd * t, Vec3::NEG_ONE, Vec3::ONE);
        Some(SurfaceHit::new(t, normal, uv, inside))
    }
}
