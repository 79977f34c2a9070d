use glam::{Mat4, Vec2, Vec3};

use super::LocalShape;
use crate::emit::Namespace;
use crate::library::{SurfaceHit, EPSILON};

/// Capped cylinder along y. `half_height` is measured from the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cylinder {
    pub center: Vec3,
    pub radius: f32,
    pub half_height: f32,
}

impl Cylinder {
    pub fn new(center: Vec3, radius: f32, half_height: f32) -> Self {
        Self {
            center,
            radius,
            half_height,
        }
    }

    pub(super) fn object_transformation(&self) -> Mat4 {
        Mat4::from_translation(self.center)
            * Mat4::from_scale(Vec3::new(self.radius, self.half_height, self.radius))
    }
}

fn surface(ro: Vec3, rd: Vec3, t: f32) -> SurfaceHit {
    let p = ro + rd * t;
    let (normal, uv) = if p.y > 1.0 - EPSILON {
        (Vec3::Y, Vec2::new(p.x, 1.0 - p.z))
    } else if p.y < -1.0 + EPSILON {
        (Vec3::NEG_Y, Vec2::new(1.0 - p.x, 1.0 - p.z))
    } else {
        (
            Vec3::new(p.x, 0.0, p.z),
            Vec2::new(0.5 + p.z.atan2(p.x) / std::f32::consts::TAU, p.y + 0.5),
        )
    };
    SurfaceHit::new(t, normal, uv, rd.dot(normal) > 0.0)
}

fn cap_side(y: f32) -> f32 {
    if y >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

impl LocalShape for Cylinder {
    fn tag(&self) -> &'static str {
        "Cylinder"
    }

    fn wgsl_hit(&self, _ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectUnitCylinder({ro}, {rd})")
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, _two_sided: bool) -> Option<SurfaceHit> {
        let k2 = 1.0 - rd.y * rd.y;
        // Parallel to the axis the side quadratic degenerates; only the caps can be hit
        if k2 < EPSILON {
            if ro.x * ro.x + ro.z * ro.z >= 1.0 {
                return None;
            }
            let near = cap_side(-rd.y);
            return [near, -near]
                .into_iter()
                .map(|cap| (cap - ro.y) / rd.y)
                .find(|&t| t > 0.0)
                .map(|t| surface(ro, rd, t));
        }
        let k1 = ro.dot(rd) - ro.y * rd.y;
        let k0 = ro.dot(ro) - ro.y * ro.y - 1.0;
        let h = k1 * k1 - k2 * k0;
        if h < 0.0 {
            return None;
        }
        let h = h.sqrt();
        for side in [-h, h] {
            let t = (-k1 + side) / k2;
            let y = ro.y + t * rd.y;
            if y > -1.0 && y < 1.0 && t > 0.0 {
                return Some(surface(ro, rd, t));
            }
            let t = (cap_side(y) - ro.y) / rd.y;
            if (k1 + k2 * t).abs() < h && t > 0.0 {
                return Some(surface(ro, rd, t));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_and_cap() {
        let cylinder = Cylinder::new(Vec3::ZERO, 1.0, 1.0);
        let side = cylinder.hit_local(Vec3::new(3.0, 0.2, 0.0), Vec3::NEG_X, false).unwrap();
        assert!((side.t - 2.0).abs() < 1e-5);
        assert!((side.normal - Vec3::X).length() < 1e-5);
        let cap = cylinder.hit_local(Vec3::new(0.3, 4.0, 0.0), Vec3::NEG_Y, false).unwrap();
        assert!((cap.t - 3.0).abs() < 1e-5);
        assert_eq!(cap.normal, Vec3::Y);
        assert!(cylinder.hit_local(Vec3::new(3.0, 1.5, 0.0), Vec3::NEG_X, false).is_none());
    }

    #[test]
    fn test_axis_parallel_rays() {
        let cylinder = Cylinder::new(Vec3::ZERO, 1.0, 1.0);
        let up = cylinder.hit_local(Vec3::new(0.3, -4.0, 0.2), Vec3::Y, false).unwrap();
        assert!((up.t - 3.0).abs() < 1e-5);
        assert_eq!(up.normal, Vec3::NEG_Y);
        // From inside, the far cap
        let inside = cylinder.hit_local(Vec3::new(0.0, 0.5, 0.0), Vec3::Y, false).unwrap();
        assert!((inside.t - 0.5).abs() < 1e-5);
        assert!(inside.inside);
        assert!(cylinder.hit_local(Vec3::new(1.5, 4.0, 0.0), Vec3::NEG_Y, false).is_none());
        assert!(cylinder.hit_local(Vec3::new(0.0, 4.0, 0.0), Vec3::Y, false).is_none());
    }
}
