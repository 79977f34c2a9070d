//! Sphere-traced signed distance fields.

use std::sync::Arc;

use glam::Vec3;
use glint_math::Aabb;

use super::LocalShape;
use crate::emit::Namespace;
use crate::library::{sphere_uv, SurfaceHit};

/// Host-side scalar field of an object-space position.
pub type SdfField = Arc<dyn Fn(Vec3) -> f32 + Send + Sync>;

const STEPS: u32 = 32;
const MAX_DISTANCE: f32 = 20.0;
const PLANCK: f32 = 0.001;
/// Accept the last sample when the budget runs out this close to a surface
const SOFT_PLANCK: f32 = 0.05;
const STEP_SCALE: f32 = 0.9;
const NORMAL_EPS: f32 = 0.01;

#[derive(Clone)]
pub struct SdfShape {
    /// WGSL expression in `pos`
    pub code: String,
    /// Helper functions the expression calls
    pub global: String,
    /// Half-extent of the field's domain, before the 1.5 margin
    pub size: Vec3,
    pub host: Option<SdfField>,
}

impl std::fmt::Debug for SdfShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdfShape")
            .field("code", &self.code)
            .field("size", &self.size)
            .field("host", &self.host.is_some())
            .finish()
    }
}

impl SdfShape {
    pub fn new(code: impl Into<String>, size: Vec3) -> Self {
        Self {
            code: code.into(),
            global: String::new(),
            size,
            host: None,
        }
    }

    pub fn with_global(mut self, global: impl Into<String>) -> Self {
        self.global = global.into();
        self
    }

    pub fn with_host(mut self, field: SdfField) -> Self {
        self.host = Some(field);
        self
    }

    /// A sphere of `radius` at the origin, with a matching host field.
    pub fn sphere(radius: f32) -> Self {
        Self::new(format!("length(pos) - {}", crate::emit::float(radius)), Vec3::splat(radius))
            .with_host(Arc::new(move |p: Vec3| p.length() - radius))
    }

    fn gradient(field: &SdfField, p: Vec3) -> Vec3 {
        let (ex, ey, ez) = (
            Vec3::X * NORMAL_EPS,
            Vec3::Y * NORMAL_EPS,
            Vec3::Z * NORMAL_EPS,
        );
        Vec3::new(
            field(p + ex) - field(p - ex),
            field(p + ey) - field(p - ey),
            field(p + ez) - field(p - ez),
        )
        .normalize_or_zero()
    }
}

impl LocalShape for SdfShape {
    fn tag(&self) -> &'static str {
        "SDF"
    }

    fn canonical_bounds(&self) -> Aabb {
        Aabb::new(-1.5 * self.size, 1.5 * self.size)
    }

    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("{}({ro}, {rd})", ns.name("intersect"))
    }

    fn wgsl_global(&self, ns: &Namespace, two_sided: bool) -> String {
        let field = ns.name("field");
        let distance = if two_sided { "abs(sdf)" } else { "sdf" };
        let inside = if two_sided { "sdf < 0.0" } else { "false" };
        let f = |p: &str| format!("{field}({p})");
        let mut out = String::new();
        if !self.global.trim().is_empty() {
            out.push_str(self.global.trim());
            out.push_str("\n\n");
        }
        out.push_str(&format!(
            "fn {field}(pos: vec3<f32>) -> f32 {{
    return {code};
}}

fn {surface}(p: vec3<f32>, t: f32, sdf: f32) -> SurfaceHit {{
    let eps = vec2<f32>({eps}, 0.0);
    let n = normalize(vec3<f32>(
        {xp} - {xm},
        {yp} - {ym},
        {zp} - {zm}));
    return SurfaceHit(t, n, sphereUv(n), {inside});
}}

fn {intersect}(origin: vec3<f32>, ray: vec3<f32>) -> SurfaceHit {{
    var t = 0.0;
    var dist = 0.0;
    var sdf = 0.0;
    for (var i = 0; i < {steps}; i++) {{
        sdf = {field}(origin + t * ray);
        dist = {distance} * {scale};
        if (dist < {planck}) {{
            return {surface}(origin + t * ray, t, sdf);
        }}
        t += dist;
        if (t >= {max}) {{
            break;
        }}
    }}
    if (dist < {soft}) {{
        return {surface}(origin + t * ray, t, sdf);
    }}
    return missHit();
}}",
            code = self.code,
            surface = ns.name("surface"),
            intersect = ns.name("intersect"),
            eps = crate::emit::float(NORMAL_EPS),
            xp = f("p + eps.xyy"),
            xm = f("p - eps.xyy"),
            yp = f("p + eps.yxy"),
            ym = f("p - eps.yxy"),
            zp = f("p + eps.yyx"),
            zm = f("p - eps.yyx"),
            steps = STEPS,
            scale = crate::emit::float(STEP_SCALE),
            planck = crate::emit::float(PLANCK),
            max = crate::emit::float(MAX_DISTANCE),
            soft = crate::emit::float(SOFT_PLANCK),
        ));
        out
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, two_sided: bool) -> Option<SurfaceHit> {
        let field = self.host.as_ref()?;
        let surface = |t: f32, sdf: f32| {
            let n = Self::gradient(field, ro + rd * t);
            SurfaceHit::new(t, n, sphere_uv(n), two_sided && sdf < 0.0)
        };
        let mut t = 0.0;
        let mut dist = 0.0;
        let mut sdf = 0.0;
        for _ in 0..STEPS {
            sdf = field(ro + rd * t);
            dist = if two_sided { sdf.abs() } else { sdf } * STEP_SCALE;
            if dist < PLANCK {
                return Some(surface(t, sdf));
            }
            t += dist;
            if t >= MAX_DISTANCE {
                break;
            }
        }
        (dist < SOFT_PLANCK).then(|| surface(t, sdf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_trace_matches_analytic() {
        let sdf = SdfShape::sphere(0.8);
        let hit = sdf.hit_local(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, false).unwrap();
        assert!((hit.t - 2.2).abs() < 2e-3, "t = {}", hit.t);
        assert!((hit.normal - Vec3::Z).length() < 1e-2);
        assert!(!hit.inside);
        assert!(sdf.hit_local(Vec3::new(0.0, 2.0, 3.0), Vec3::NEG_Z, false).is_none());
    }

    #[test]
    fn test_two_sided_reports_inside() {
        let sdf = SdfShape::sphere(1.0);
        // One-sided marching from inside stops at once on the negative distance
        let hit = sdf.hit_local(Vec3::ZERO, Vec3::X, false).unwrap();
        assert_eq!(hit.t, 0.0);
        let hit = sdf.hit_local(Vec3::new(0.3, 0.0, 0.0), Vec3::X, true).unwrap();
        assert!((hit.t - 0.7).abs() < 2e-3);
        assert!(hit.inside);
    }

    #[test]
    fn test_without_host_field_is_empty() {
        let sdf = SdfShape::new("length(pos) - 1.0", Vec3::ONE);
        assert!(sdf.hit_local(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, false).is_none());
        assert!((sdf.canonical_bounds().max - Vec3::splat(1.5)).length() < 1e-6);
    }

    #[test]
    fn test_emitted_functions() {
        let sdf = SdfShape::sphere(1.0).with_global("fn helper() -> f32 { return 1.0; }");
        let ns = Namespace::new("SDF", 9);
        let code = sdf.wgsl_global(&ns, true);
        assert!(code.starts_with("fn helper()"));
        assert!(code.contains("fn fieldSDF9(pos: vec3<f32>) -> f32 {\n    return length(pos) - 1.0;"));
        assert!(code.contains("dist = abs(sdf) * 0.9;"));
        assert!(code.contains("fieldSDF9(p + eps.yyx)"));
        assert!(!sdf.wgsl_global(&ns, false).contains("abs(sdf)"));
        assert_eq!(sdf.wgsl_hit(&ns, "a", "b"), "intersectSDF9(a, b)");
    }
}
