use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::LocalShape;
use crate::emit::{float, vec3, Namespace};
use crate::library::{intersect_cube, normal_for_box, sphere_uv, SurfaceHit};
use glint_math::Aabb;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Member {
    Cube { min: Vec3, max: Vec3 },
    Sphere { center: Vec3, radius: f32 },
}

/// Boxes and spheres sharing one material and one intersect function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composite {
    pub members: Vec<Member>,
}

impl Composite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cube(&mut self, min: Vec3, max: Vec3) {
        self.members.push(Member::Cube {
            min: min.min(max),
            max: min.max(max),
        });
    }

    pub fn add_sphere(&mut self, center: Vec3, radius: f32) {
        self.members.push(Member::Sphere { center, radius });
    }

    fn function_name(ns: &Namespace) -> String {
        format!("intersectComposite{}", ns.id)
    }
}

fn fold_cube(ro: Vec3, rd: Vec3, min: Vec3, max: Vec3, two_sided: bool, best: SurfaceHit) -> SurfaceHit {
    let range = intersect_cube(ro, rd, min, max);
    if range.x > range.y {
        return best;
    }
    let (t, inside) = if range.x <= 0.0 {
        if !two_sided || range.y <= 0.0 {
            return best;
        }
        (range.y, true)
    } else {
        (range.x, false)
    };
    if t >= best.t {
        return best;
    }
    let (normal, uv) = normal_for_box(ro + rd * t, min, max);
    SurfaceHit::new(t, normal, uv, inside)
}

fn fold_sphere(ro: Vec3, rd: Vec3, center: Vec3, radius: f32, two_sided: bool, best: SurfaceHit) -> SurfaceHit {
    let to_sphere = ro - center;
    let b = to_sphere.dot(rd);
    let c = to_sphere.dot(to_sphere) - radius * radius;
    let h = b * b - c;
    if h < 0.0 {
        return best;
    }
    let s = h.sqrt();
    let (t, inside) = if -b - s <= 0.0 {
        if !two_sided {
            return best;
        }
        (-b + s, true)
    } else {
        (-b - s, false)
    };
    if t <= 0.0 || t >= best.t {
        return best;
    }
    let n = (ro + rd * t - center) / radius;
    SurfaceHit::new(t, n, sphere_uv(n), inside)
}

impl LocalShape for Composite {
    fn tag(&self) -> &'static str {
        "Composite"
    }

    fn canonical_bounds(&self) -> Aabb {
        let bounds = self.members.iter().fold(Aabb::EMPTY, |acc, member| {
            let b = match *member {
                Member::Cube { min, max } => Aabb::new(min, max),
                Member::Sphere { center, radius } => Aabb::new(center, center).padded(radius),
            };
            Aabb::surrounding(&acc, &b)
        });
        if bounds.is_empty() {
            return Aabb::new(Vec3::ZERO, Vec3::ZERO);
        }
        bounds.padded(0.01)
    }

    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("{}({ro}, {rd})", Self::function_name(ns))
    }

    fn wgsl_global(&self, ns: &Namespace, two_sided: bool) -> String {
        let folds: String = self
            .members
            .iter()
            .map(|member| match *member {
                Member::Cube { min, max } => format!(
                    "    best = compositeCube(ro, rd, {}, {}, {two_sided}, best);\n",
                    vec3(min),
                    vec3(max)
                ),
                Member::Sphere { center, radius } => format!(
                    "    best = compositeSphere(ro, rd, {}, {}, {two_sided}, best);\n",
                    vec3(center),
                    float(radius)
                ),
            })
            .collect();
        format!(
            "fn {name}(ro: vec3<f32>, rd: vec3<f32>) -> SurfaceHit {{
    var best = SurfaceHit(INFINITY, vec3<f32>(0.0), vec2<f32>(0.0), false);
{folds}    if (best.t >= INFINITY) {{
        return missHit();
    }}
    return best;
}}
",
            name = Self::function_name(ns)
        )
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, two_sided: bool) -> Option<SurfaceHit> {
        let miss = SurfaceHit::new(f32::INFINITY, Vec3::ZERO, Vec2::ZERO, false);
        let best = self.members.iter().fold(miss, |best, member| match *member {
            Member::Cube { min, max } => fold_cube(ro, rd, min, max, two_sided, best),
            Member::Sphere { center, radius } => fold_sphere(ro, rd, center, radius, two_sided, best),
        });
        best.t.is_finite().then_some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> Composite {
        let mut composite = Composite::new();
        composite.add_cube(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        composite.add_sphere(Vec3::new(0.0, 1.5, 0.0), 0.5);
        composite
    }

    #[test]
    fn test_bounds_and_nearest_member() {
        let composite = stack();
        let bounds = composite.canonical_bounds();
        assert!((bounds.max.y - 2.01).abs() < 1e-5);
        assert!((bounds.min.x + 1.01).abs() < 1e-5);

        let top = composite.hit_local(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, false).unwrap();
        assert!((top.t - 3.0).abs() < 1e-5);
        let side = composite.hit_local(Vec3::new(0.0, 0.5, 5.0), Vec3::NEG_Z, false).unwrap();
        assert!((side.t - 4.0).abs() < 1e-5);
        assert_eq!(side.normal, Vec3::Z);
    }

    #[test]
    fn test_inside_only_when_two_sided() {
        let composite = stack();
        let origin = Vec3::new(0.0, 0.5, 0.0);
        assert!(composite.hit_local(origin, Vec3::X, false).is_none());
        let exit = composite.hit_local(origin, Vec3::X, true).unwrap();
        assert!(exit.inside);
    }

    #[test]
    fn test_global_function_folds_members() {
        let ns = Namespace::new("Composite", 9);
        let code = stack().wgsl_global(&ns, false);
        assert!(code.starts_with("fn intersectComposite9("));
        assert_eq!(code.matches("best = composite").count(), 2);
        assert!(code.contains("compositeSphere(ro, rd, vec3<f32>(0.0, 1.5, 0.0), 0.5, false, best)"));
    }
}
