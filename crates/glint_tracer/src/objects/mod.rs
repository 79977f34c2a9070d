//! The scene object model.
//!
//! Every object carries the same three-part transform and answers the same
//! questions: its world bounds, its uniforms, and the code it contributes
//! to the intersection pass, the shade chain and the shadow function.
//! Analytic primitives are written against a canonical object-space domain
//! through [`LocalShape`]; terrain, volumes and lights are emitted by hand.

mod composite;
mod cone;
mod cube;
mod cylinder;
mod mesh;
mod sdf;
mod sphere;
mod terrain;
mod torus;
mod volume;

pub use composite::{Composite, Member};
pub use cone::Cone;
pub use cube::Cube;
pub use cylinder::Cylinder;
pub use mesh::MeshShape;
pub use sdf::{SdfField, SdfShape};
pub use sphere::Sphere;
pub use terrain::{TerrainImages, TerrainMap};
pub use torus::Torus;
pub use volume::{Density, Volume};

use glam::{Mat4, Vec2, Vec3, Vec4};
use glint_math::{shear_matrix, skew_matrix, Aabb, Mat4Ext, Ray};

use crate::emit::Namespace;
use crate::error::TracerResult;
use crate::library::SurfaceHit;
use crate::light::{BoundLight, Light};
use crate::material::{Closure, Material, MaterialId, ShadeContext};
use crate::uniforms::{UniformBlock, UniformKind, UniformLayout};

/// A primitive defined in a canonical object-space domain.
///
/// The generated code carries the ray into object space with the inverse
/// world transform, calls [`LocalShape::wgsl_hit`], and carries the result
/// back. [`LocalShape::hit_local`] is the host mirror used by the CPU
/// reference.
pub trait LocalShape {
    fn tag(&self) -> &'static str;

    /// Object-space box containing every intersectable point.
    fn canonical_bounds(&self) -> Aabb {
        Aabb::UNIT
    }

    /// A `SurfaceHit` expression for a normalized object-space ray.
    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String;

    fn hit_local(&self, ro: Vec3, rd: Vec3, two_sided: bool) -> Option<SurfaceHit>;

    /// Helper functions emitted once per object.
    fn wgsl_global(&self, _ns: &Namespace, _two_sided: bool) -> String {
        String::new()
    }

    fn push_uniforms(&self, _ns: &Namespace, _layout: &mut UniformLayout) {}

    fn write_uniforms(&self, _ns: &Namespace, _block: &mut UniformBlock<'_>) -> TracerResult<()> {
        Ok(())
    }
}

/// Import-time, user-editable and drag-preview parts of a world transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Edited by translate/rotate/scale/shear/skew
    pub transformation: Mat4,
    /// Baked at creation, never edited
    pub object_transformation: Mat4,
    pub temporary_translation: Vec3,
}

impl Transform {
    pub fn new(object_transformation: Mat4) -> Self {
        Self {
            transformation: Mat4::IDENTITY,
            object_transformation,
            temporary_translation: Vec3::ZERO,
        }
    }

    /// `T(temporary) * transformation * object_transformation`
    pub fn world(&self) -> Mat4 {
        Mat4::from_translation(self.temporary_translation)
            * self.transformation
            * self.object_transformation
    }

    fn apply(&mut self, m: Mat4) {
        self.transformation *= m;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

pub enum Shape {
    Sphere(Sphere),
    Cylinder(Cylinder),
    Cone(Cone),
    Torus(Torus),
    Cube(Cube),
    Composite(Composite),
    Mesh(MeshShape),
    Sdf(SdfShape),
    Terrain(TerrainMap),
    Volume(Volume),
    Light(Light),
}

impl Shape {
    pub fn tag(&self) -> &'static str {
        match self {
            Shape::Terrain(_) => "TerrainMap",
            Shape::Volume(_) => "Volume",
            Shape::Light(_) => "Light",
            other => other.local().map_or("Object", |s| s.tag()),
        }
    }

    pub fn local(&self) -> Option<&dyn LocalShape> {
        match self {
            Shape::Sphere(s) => Some(s),
            Shape::Cylinder(s) => Some(s),
            Shape::Cone(s) => Some(s),
            Shape::Torus(s) => Some(s),
            Shape::Cube(s) => Some(s),
            Shape::Composite(s) => Some(s),
            Shape::Mesh(s) => Some(s),
            Shape::Sdf(s) => Some(s),
            Shape::Terrain(_) | Shape::Volume(_) | Shape::Light(_) => None,
        }
    }

    /// The object transformation a freshly created shape starts with.
    fn object_transformation(&self) -> Mat4 {
        match self {
            Shape::Sphere(s) => s.object_transformation(),
            Shape::Cylinder(s) => s.object_transformation(),
            Shape::Cone(s) => s.object_transformation(),
            Shape::Torus(s) => s.object_transformation(),
            Shape::Cube(s) => s.object_transformation(),
            Shape::Mesh(s) => s.object_transformation,
            _ => Mat4::IDENTITY,
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self, Shape::Light(_))
    }

    pub fn is_volume(&self) -> bool {
        matches!(self, Shape::Volume(_))
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A surface hit carried back to world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldHit {
    /// Distance in units of the (unnormalized) query ray
    pub t: f32,
    pub normal: Vec3,
    /// Object-space normal, used for tangent frames
    pub local_normal: Vec3,
    pub uv: Vec2,
    pub inside: bool,
}

#[derive(Debug)]
pub struct TracerObject {
    id: u32,
    pub material: Option<MaterialId>,
    pub transform: Transform,
    pub shape: Shape,
}

impl TracerObject {
    pub fn new(id: u32, shape: Shape, material: Option<MaterialId>) -> Self {
        Self {
            id,
            material,
            transform: Transform::new(shape.object_transformation()),
            shape,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.shape.tag(), self.id)
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.transform.world()
    }

    // Editing. Lights move their position; everything else composes into
    // `transformation` in the object's local frame.

    pub fn translate(&mut self, delta: Vec3) {
        match &mut self.shape {
            Shape::Light(light) => light.translate(delta),
            _ => self.transform.apply(Mat4::from_translation(delta)),
        }
    }

    pub fn rotate_x(&mut self, degrees: f32) {
        self.transform.apply(Mat4::from_rotation_x(degrees.to_radians()));
    }

    pub fn rotate_y(&mut self, degrees: f32) {
        self.transform.apply(Mat4::from_rotation_y(degrees.to_radians()));
    }

    pub fn rotate_z(&mut self, degrees: f32) {
        self.transform.apply(Mat4::from_rotation_z(degrees.to_radians()));
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.transform.apply(Mat4::from_scale(factors));
    }

    pub fn shear(&mut self, xy: f32, xz: f32, yx: f32, yz: f32, zx: f32, zy: f32) {
        self.transform.apply(shear_matrix(xy, xz, yx, yz, zx, zy));
    }

    /// Angles in degrees.
    pub fn skew(&mut self, xy: f32, xz: f32, yz: f32) {
        self.transform
            .apply(skew_matrix(xy.to_radians(), xz.to_radians(), yz.to_radians()));
    }

    pub fn set_temporary_translation(&mut self, delta: Vec3) {
        self.transform.temporary_translation = delta;
    }

    pub fn bake_temporary_translation(&mut self) {
        let delta = std::mem::take(&mut self.transform.temporary_translation);
        self.translate_world(delta);
    }

    pub fn reset_transformation(&mut self) {
        self.transform.transformation = Mat4::IDENTITY;
        self.transform.temporary_translation = Vec3::ZERO;
    }

    fn translate_world(&mut self, delta: Vec3) {
        match &mut self.shape {
            Shape::Light(light) => light.translate(delta),
            _ => {
                self.transform.transformation =
                    Mat4::from_translation(delta) * self.transform.transformation
            }
        }
    }

    /// The light as uploaded, including any drag preview.
    pub fn light(&self) -> Option<Light> {
        match &self.shape {
            Shape::Light(light) => {
                let mut light = *light;
                if light.kind == crate::light::LightKind::Point {
                    light.translate(self.transform.temporary_translation);
                }
                Some(light)
            }
            _ => None,
        }
    }

    pub fn canonical_bounds(&self) -> Aabb {
        match &self.shape {
            Shape::Volume(v) => v.canonical_bounds(),
            Shape::Terrain(t) => t.bounds(),
            Shape::Light(l) => Aabb::UNIT.padded(l.size - 1.0),
            other => other.local().map_or(Aabb::UNIT, |s| s.canonical_bounds()),
        }
    }

    /// World-space box from the 8 transformed canonical corners.
    pub fn bounds(&self) -> Aabb {
        match &self.shape {
            Shape::Terrain(t) => t.bounds(),
            Shape::Light(_) => {
                let light = self.light().unwrap_or_default();
                Aabb::new(light.position, light.position).padded(light.size)
            }
            _ => self.world_matrix().transform_aabb(&self.canonical_bounds()),
        }
    }

    pub fn area(&self) -> f32 {
        match &self.shape {
            Shape::Light(_) => 0.0,
            _ => self.bounds().area(),
        }
    }

    /// Host picking against the world box.
    pub fn pick(&self, ray: &Ray) -> Option<f32> {
        self.bounds().pick(ray)
    }

    /// Whether back faces report hits for this object.
    pub fn two_sided(&self, material: Option<&Material>) -> bool {
        let closure = material.is_some_and(|m| m.closure.is_two_sided());
        match &self.shape {
            Shape::Mesh(m) => closure || !m.cull,
            _ => closure,
        }
    }

    // ---- uniforms ----

    pub fn push_uniforms(&self, layout: &mut UniformLayout) {
        let ns = self.namespace();
        match &self.shape {
            Shape::Light(light) => light.push_uniforms(&ns, layout),
            Shape::Terrain(_) => {}
            shape => {
                layout.push(ns.name("transform"), UniformKind::Mat4);
                layout.push(ns.name("transformInv"), UniformKind::Mat4);
                layout.push(ns.name("min"), UniformKind::Vec4);
                layout.push(ns.name("max"), UniformKind::Vec4);
                if let Some(local) = shape.local() {
                    local.push_uniforms(&ns, layout);
                }
            }
        }
    }

    /// Object uniforms; lights are written by the scene, which knows the
    /// effective intensity.
    pub fn write_uniforms(&self, block: &mut UniformBlock<'_>) -> TracerResult<()> {
        let ns = self.namespace();
        match &self.shape {
            Shape::Light(_) | Shape::Terrain(_) => Ok(()),
            shape => {
                let world = self.world_matrix();
                let bounds = self.bounds();
                block.set_mat4(&ns.name("transform"), world)?;
                block.set_mat4(&ns.name("transformInv"), world.inverse())?;
                block.set_vec3(&ns.name("min"), bounds.min)?;
                block.set_vec3(&ns.name("max"), bounds.max)?;
                match shape.local() {
                    Some(local) => local.write_uniforms(&ns, block),
                    None => Ok(()),
                }
            }
        }
    }

    // ---- code emission ----

    /// Per-object helper functions.
    pub fn wgsl_global(&self, material: Option<&Material>) -> String {
        let ns = self.namespace();
        match &self.shape {
            Shape::Terrain(t) => t.wgsl_global(&ns),
            Shape::Volume(v) => v.wgsl_global(&ns),
            Shape::Light(_) => String::new(),
            shape => shape
                .local()
                .map_or(String::new(), |s| s.wgsl_global(&ns, self.two_sided(material))),
        }
    }

    /// Object-space intersection folded into the running closest `t`.
    ///
    /// Declares `surf<Tag><id>` and `normal<Tag><id>` for the shade branch.
    pub fn wgsl_intersect(&self) -> String {
        let ns = self.namespace();
        match &self.shape {
            Shape::Terrain(t) => t.wgsl_intersect(&ns),
            Shape::Volume(_) | Shape::Light(_) => String::new(),
            shape => match shape.local() {
                Some(local) => transformed_intersect(&ns, local),
                None => String::new(),
            },
        }
    }

    /// This object's `else if` in the closest-hit chain.
    pub fn wgsl_shade(&self, material: &Material, ctx: &ShadeContext<'_>) -> String {
        let ns = self.namespace();
        let body = material.wgsl_shade(ctx);
        match &self.shape {
            Shape::Terrain(t) => t.wgsl_shade(&ns, &body),
            Shape::Volume(_) | Shape::Light(_) => String::new(),
            _ => {
                let surf = ns.name("surf");
                format!(
                    "    }} else if (t == {surf}.t) {{
        normal = {normal};
        normal2 = {surf}.normal;
        uv = {surf}.uv;
        inside = {surf}.inside;
{body}",
                    normal = ns.name("normal"),
                )
            }
        }
    }

    /// Occlusion test inside `shadow(origin, ray)`.
    pub fn wgsl_shadow(&self, material: Option<&Material>) -> String {
        let ns = self.namespace();
        match &self.shape {
            Shape::Terrain(t) => t.wgsl_shadow(&ns),
            Shape::Volume(v) => v.wgsl_shadow(&ns),
            Shape::Light(_) => String::new(),
            _ => {
                let intersect = self.wgsl_intersect();
                let surf = ns.name("surf");
                let test = format!("{surf}.t > 0.0 && {surf}.t < 1.0");
                match material {
                    Some(m) if m.closure == Closure::Bubble => format!(
                        "{intersect}
    if ({test}) {{
        let nray{id} = ray / lray;
        var n{id} = {normal};
        if (dot(nray{id}, n{id}) > 0.0) {{
            n{id} = -n{id};
        }}
        shadowIntensity *= 1.0 - fresnel(nray{id}, n{id}, {ior}, 1.0);
    }}",
                        id = ns.id,
                        normal = ns.name("normal"),
                        ior = crate::emit::float(m.ior),
                    ),
                    _ => format!("{intersect}\n    if ({test}) {{\n        return 0.0;\n    }}"),
                }
            }
        }
    }

    /// Volume marching inside the bounce loop.
    pub fn wgsl_volume(&self, lights: &[BoundLight]) -> String {
        match &self.shape {
            Shape::Volume(v) => v.wgsl_march(&self.namespace(), lights),
            _ => String::new(),
        }
    }

    // ---- host mirror ----

    /// Closest surface hit nearer than `t_max`, in units of `ray`.
    pub fn hit(&self, origin: Vec3, ray: Vec3, t_max: f32, two_sided: bool) -> Option<WorldHit> {
        match &self.shape {
            Shape::Terrain(t) => t.hit(origin, ray, t_max),
            Shape::Volume(_) | Shape::Light(_) => None,
            shape => {
                let local = shape.local()?;
                if !self.bounds().hit_before(origin, ray.recip(), t_max) {
                    return None;
                }
                let world = self.world_matrix();
                let inv = world.inverse();
                let lray = ray.length();
                let ro = inv.transform_point3(origin);
                let rd = inv.transform_vector3(ray / lray).normalize();
                let hit = local.hit_local(ro, rd, two_sided)?;
                if hit.t <= 0.0 {
                    return None;
                }
                let world_hit = world.transform_point3(ro + rd * hit.t);
                let normal = (inv.transpose() * Vec4::from((hit.normal, 0.0)))
                    .truncate()
                    .normalize_or_zero();
                Some(WorldHit {
                    t: origin.distance(world_hit) / lray,
                    normal,
                    local_normal: hit.normal,
                    uv: hit.uv,
                    inside: hit.inside,
                })
            }
        }
    }

    /// Host mirror of the shadow contribution: the factor this object
    /// applies to a shadow ray spanning `ray` (t in `(0, 1)`).
    pub fn shadow_factor(&self, origin: Vec3, ray: Vec3, material: Option<&Material>) -> f32 {
        match &self.shape {
            Shape::Terrain(t) => {
                if t.occludes(origin, ray) {
                    0.0
                } else {
                    1.0
                }
            }
            Shape::Volume(v) => v.shadow_transmittance(&self.world_matrix().inverse(), origin, ray),
            Shape::Light(_) => 1.0,
            _ => {
                let two_sided = self.two_sided(material);
                match self.hit(origin, ray, f32::INFINITY, two_sided) {
                    Some(hit) if hit.t > 0.0 && hit.t < 1.0 => match material {
                        Some(m) if m.closure == Closure::Bubble => {
                            let nray = ray.normalize();
                            let n = if nray.dot(hit.normal) > 0.0 { -hit.normal } else { hit.normal };
                            1.0 - crate::library::fresnel(nray, n, m.ior, 1.0)
                        }
                        _ => 0.0,
                    },
                    _ => 1.0,
                }
            }
        }
    }
}

/// Intersection through the object's inverse transform.
fn transformed_intersect(ns: &Namespace, local: &dyn LocalShape) -> String {
    let id = ns.id;
    let surf = ns.name("surf");
    let normal = ns.name("normal");
    let transform = ns.uniform("transform");
    let inv = ns.uniform("transformInv");
    let ro = format!("Torigin{}{id}", ns.tag);
    let rd = format!("Tray{}{id}", ns.tag);
    format!(
        "    var {surf} = missHit();
    var {normal} = vec3<f32>(0.0);
    if (intersectBox(origin, 1.0 / ray, {min}.xyz, {max}.xyz, t)) {{
        let {ro} = ({inv} * vec4<f32>(origin, 1.0)).xyz;
        let {rd} = normalize(({inv} * vec4<f32>(ray / lray, 0.0)).xyz);
        {surf} = {hit};
        if ({surf}.t > 0.0) {{
            let Thit{tag}{id} = ({transform} * vec4<f32>({ro} + {rd} * {surf}.t, 1.0)).xyz;
            {normal} = normalize((transpose({inv}) * vec4<f32>({surf}.normal, 0.0)).xyz);
            {surf}.t = distance(origin, Thit{tag}{id}) / lray;
            if ({surf}.t < t) {{
                t = {surf}.t;
            }}
        }}
    }}",
        min = ns.uniform("min"),
        max = ns.uniform("max"),
        hit = local.wgsl_hit(ns, &ro, &rd),
        tag = ns.tag,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_transform(rng: &mut StdRng, object: &mut TracerObject) {
        object.translate(Vec3::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0), 0.5));
        object.rotate_x(rng.gen_range(0.0..90.0));
        object.rotate_y(rng.gen_range(0.0..90.0));
        object.scale(Vec3::new(rng.gen_range(0.5..2.0), rng.gen_range(0.5..2.0), 1.0));
        object.shear(rng.gen_range(0.0..0.5), 0.0, 0.0, 0.2, 0.0, 0.0);
    }

    #[test]
    fn test_world_bounds_contain_surface_points() {
        let mut rng = StdRng::seed_from_u64(7);
        let shapes = || {
            vec![
                Shape::Sphere(Sphere::new(Vec3::new(0.5, 0.0, 0.0), 0.7)),
                Shape::Cube(Cube::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.5, 2.0, 0.3))),
                Shape::Cylinder(Cylinder::new(Vec3::ZERO, 0.4, 0.8)),
                Shape::Cone(Cone::new(Vec3::ZERO, 0.5, 0.2, 0.6)),
                Shape::Torus(Torus::new(Vec3::ZERO, 0.6, 0.2)),
            ]
        };
        for round in 0..20 {
            for (i, shape) in shapes().into_iter().enumerate() {
                let mut object = TracerObject::new(i as u32 + 1, shape, None);
                random_transform(&mut rng, &mut object);
                let bounds = object.bounds();
                let world = object.world_matrix();
                let inv = world.inverse();
                let local = object.shape.local().unwrap();
                // Rays from outside the canonical box towards random interior points
                for _ in 0..50 {
                    let target = Vec3::new(
                        rng.gen_range(-0.5..0.5),
                        rng.gen_range(0.0..0.9),
                        rng.gen_range(-0.2..0.2),
                    );
                    let ro = Vec3::new(4.0, 3.0, 5.0);
                    let rd = (target - ro).normalize();
                    if let Some(hit) = local.hit_local(ro, rd, false) {
                        let p = world.transform_point3(ro + rd * hit.t);
                        assert!(
                            bounds.contains_point(p, 1.0e-3),
                            "round {round}: {:?} point {p} outside {bounds:?}",
                            object.shape
                        );
                    }
                }
                assert!(inv.is_finite());
            }
        }
    }

    fn compound_shapes() -> Vec<Shape> {
        let mut composite = Composite::new();
        composite.add_cube(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.2, 0.4, 0.1));
        composite.add_sphere(Vec3::new(0.6, 0.3, 0.0), 0.35);

        let mut mesh = glint_core::Mesh::icosphere(2);
        mesh.bake_transform(Mat4::from_translation(Vec3::new(1.0, 0.5, 0.0)) * Mat4::from_scale(Vec3::splat(0.5)));
        let mut mesh = MeshShape::new(mesh, true, false);
        mesh.prepare(&mut crate::emit::IdAllocator::new(), false);

        vec![
            Shape::Composite(composite),
            Shape::Mesh(mesh),
            Shape::Sdf(SdfShape::sphere(0.6)),
            Shape::Volume(Volume::voxel(glint_core::VoxelGrid::blobs(3))),
        ]
    }

    #[test]
    fn test_compound_bounds_contain_surface_points() {
        let mut rng = StdRng::seed_from_u64(11);
        for round in 0..10 {
            for (i, shape) in compound_shapes().into_iter().enumerate() {
                let mut object = TracerObject::new(i as u32 + 1, shape, None);
                random_transform(&mut rng, &mut object);
                let bounds = object.bounds();
                let world = object.world_matrix();
                let canonical = object.canonical_bounds();
                let extent = canonical.extent();
                let mut hits = 0;
                for _ in 0..40 {
                    let inner = Vec3::new(rng.gen(), rng.gen(), rng.gen());
                    let p = match object.shape.local() {
                        Some(local) => {
                            let target = canonical.min + extent * (0.25 + 0.5 * inner);
                            let ro = canonical.centroid() + extent * Vec3::new(1.5, 1.2, 1.7);
                            let rd = (target - ro).normalize();
                            match local.hit_local(ro, rd, false) {
                                Some(hit) => world.transform_point3(ro + rd * hit.t),
                                None => continue,
                            }
                        }
                        // Volumes scatter anywhere inside [0, size]
                        None => world.transform_point3(canonical.min + extent * inner),
                    };
                    hits += 1;
                    assert!(
                        bounds.contains_point(p, 1.0e-3),
                        "round {round}: {:?} point {p} outside {bounds:?}",
                        object.shape
                    );
                }
                assert!(hits > 0, "{:?}", object.shape);
            }
        }
    }

    #[test]
    fn test_vertical_shadow_through_cylinder_cap() {
        let object = TracerObject::new(1, Shape::Cylinder(Cylinder::new(Vec3::ZERO, 0.4, 0.8)), None);
        // Point light straight above a point under the cylinder
        let from_below = object.shadow_factor(Vec3::new(0.1, -2.0, 0.0), Vec3::new(0.0, 5.0, 0.0), None);
        assert_eq!(from_below, 0.0);
        // Straight-down sun onto a point of the ground beneath it
        let sun = object.shadow_factor(Vec3::new(-0.2, -1.0, 0.1), Vec3::Y * 1.0e4, None);
        assert_eq!(sun, 0.0);
        let hit = object
            .hit(Vec3::new(0.1, 3.0, 0.0), Vec3::NEG_Y, f32::INFINITY, false)
            .unwrap();
        assert!((hit.t - 2.2).abs() < 1e-4);
        assert!((hit.normal - Vec3::Y).length() < 1e-4);
        let beside = object.shadow_factor(Vec3::new(0.5, -2.0, 0.0), Vec3::new(0.0, 5.0, 0.0), None);
        assert_eq!(beside, 1.0);
    }

    #[test]
    fn test_edits_leave_object_transformation() {
        let mut object = TracerObject::new(1, Shape::Sphere(Sphere::new(Vec3::ONE, 2.0)), None);
        let baked = object.transform.object_transformation;
        object.translate(Vec3::X);
        object.rotate_z(30.0);
        object.scale(Vec3::splat(2.0));
        assert_eq!(object.transform.object_transformation, baked);
        object.reset_transformation();
        assert_eq!(object.world_matrix(), baked);
    }

    #[test]
    fn test_temporary_translation() {
        let mut object = TracerObject::new(1, Shape::Sphere(Sphere::new(Vec3::ZERO, 1.0)), None);
        object.scale(Vec3::splat(2.0));
        object.set_temporary_translation(Vec3::new(0.0, 3.0, 0.0));
        assert!((object.bounds().centroid() - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
        object.bake_temporary_translation();
        assert_eq!(object.transform.temporary_translation, Vec3::ZERO);
        // Baking moves in world units even after a scale
        assert!((object.bounds().centroid() - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
        assert!((object.bounds().max.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_light_translate_moves_position() {
        let mut object = TracerObject::new(4, Shape::Light(Light::point(Vec3::ZERO, 1.0)), None);
        object.translate(Vec3::Y);
        object.set_temporary_translation(Vec3::X);
        assert_eq!(object.light().map(|l| l.position), Some(Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(object.area(), 0.0);
        assert!(object.wgsl_intersect().is_empty());
    }

    #[test]
    fn test_host_hit_through_transform() {
        let mut object = TracerObject::new(1, Shape::Sphere(Sphere::new(Vec3::ZERO, 1.0)), None);
        object.scale(Vec3::new(2.0, 1.0, 1.0));
        let hit = object
            .hit(Vec3::new(5.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0), f32::INFINITY, false)
            .unwrap();
        // Surface at x = 2, three units away along a ray of length 2
        assert!((hit.t - 1.5).abs() < 1e-4);
        assert!((hit.normal - Vec3::X).length() < 1e-4);
        assert!(object
            .hit(Vec3::new(5.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0), 1.0, false)
            .is_none());
    }

    #[test]
    fn test_intersect_code_is_namespaced() {
        let object = TracerObject::new(12, Shape::Sphere(Sphere::new(Vec3::ZERO, 1.0)), None);
        let code = object.wgsl_intersect();
        assert!(code.contains("var surfSphere12 = missHit();"));
        assert!(code.contains("u.transformInvSphere12"));
        assert!(code.contains("intersectUnitSphere(ToriginSphere12, TraySphere12)"));
        let shadow = object.wgsl_shadow(None);
        assert!(shadow.contains("return 0.0;"));

        let mut layout = UniformLayout::new();
        object.push_uniforms(&mut layout);
        let names: Vec<&str> = layout.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["transformSphere12", "transformInvSphere12", "minSphere12", "maxSphere12"]);
    }

    #[test]
    fn test_bubble_shadow_attenuates() {
        let bubble = Material::new("b", Closure::Bubble, Vec3::ONE);
        let object = TracerObject::new(2, Shape::Sphere(Sphere::new(Vec3::ZERO, 0.5)), None);
        assert!(object.wgsl_shadow(Some(&bubble)).contains("shadowIntensity *= 1.0 - fresnel("));
        let f = object.shadow_factor(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -6.0), Some(&bubble));
        assert!(f > 0.9 && f < 1.0);
        let opaque = object.shadow_factor(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -6.0), None);
        assert_eq!(opaque, 0.0);
        // Shadow ray ending before the sphere
        let short = object.shadow_factor(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -1.0), None);
        assert_eq!(short, 1.0);
    }
}
