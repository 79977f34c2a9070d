//! Procedural shader synthesis.
//!
//! A prepared [`Scene`] becomes one WGSL program: the bindings and uniform
//! struct, every object's helper functions, the shared library, the shadow
//! function, the bounce integrator and the entry points. Each object
//! contributes straight-line code under its own namespace, so the program
//! is specialized to exactly one object/material/light configuration.

use crate::emit::{float, Namespace, ProgramBuilder, Section};
use crate::library;
use crate::light::BoundLight;
use crate::material::{Material, ShadeContext};
use crate::objects::Shape;
use crate::scene::Scene;
use crate::uniforms::UniformLayout;

/// A data buffer and the `@group(1)` slot its texture binds at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub id: u32,
    pub slot: u32,
}

/// An image (`imgTex<id>`) at a `@group(2)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    pub id: u32,
    pub slot: u32,
}

/// A volume's 3D texture (`voxTex<object>`) at a `@group(2)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelBinding {
    pub object: u32,
    pub slot: u32,
}

/// A synthesized program and everything needed to bind it.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub source: String,
    pub layout: UniformLayout,
    pub buffers: Vec<BufferBinding>,
    pub images: Vec<ImageBinding>,
    pub voxels: Vec<VoxelBinding>,
    /// Scene structure counter the program was built from
    pub structure: u64,
}

/// Build missing hierarchies, then synthesize.
pub fn synthesize(scene: &mut Scene) -> ShaderProgram {
    scene.prepare();
    synthesize_prepared(scene)
}

/// Synthesize a scene whose meshes are already prepared.
pub fn synthesize_prepared(scene: &Scene) -> ShaderProgram {
    let layout = scene.uniform_layout();
    let lights = scene.lights();
    let mut program = ProgramBuilder::new();

    let (bindings, buffers, images, voxels) = bindings(scene, &layout);
    program.push(Section::Bindings, bindings);
    for buffer in scene.buffers() {
        program.push(Section::Bindings, buffer.wgsl_function());
    }

    let default_material = Material::default();
    let ordered = scene.ordered_objects();
    for object in &ordered {
        program.push(Section::ObjectFunctions, object.wgsl_global(scene.object_material(object)));
    }
    let mut used: Vec<usize> = ordered.iter().filter_map(|o| o.material).collect();
    used.sort_unstable();
    used.dedup();
    for id in used {
        if let Some(material) = scene.material(id) {
            program.push(Section::ObjectFunctions, material.wgsl_global(&Scene::material_namespace(id)));
        }
    }

    program.push(Section::Library, library::SOURCE);
    program.push(Section::Shadow, shadow_function(scene));
    program.push(Section::Integrator, integrator_function(scene, &lights, &default_material));
    program.push(Section::Entry, ENTRY);

    let source = program.finish();
    log::info!(
        "Synthesized program: {} bytes, {} objects, {} buffers bound, {} images, {} voxel grids",
        source.len(),
        ordered.len(),
        buffers.len(),
        images.len(),
        voxels.len()
    );
    ShaderProgram {
        source,
        layout,
        buffers,
        images,
        voxels,
        structure: scene.structure(),
    }
}

type Bindings = (String, Vec<BufferBinding>, Vec<ImageBinding>, Vec<VoxelBinding>);

fn bindings(scene: &Scene, layout: &UniformLayout) -> Bindings {
    let mut out = layout.wgsl_struct();
    out.push_str(
        "

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var accumTex: texture_2d<f32>;
@group(0) @binding(2) var bufSampler: sampler;
@group(0) @binding(3) var imageSampler: sampler;
",
    );

    let mut buffers = Vec::new();
    for buffer in scene.buffers() {
        let slot = buffers.len() as u32;
        if let Some(decl) = buffer.wgsl_binding(slot) {
            out.push_str(&decl);
            out.push('\n');
            buffers.push(BufferBinding { id: buffer.id(), slot });
        }
    }

    let images: Vec<ImageBinding> = scene
        .used_images()
        .into_iter()
        .enumerate()
        .map(|(slot, id)| ImageBinding { id, slot: slot as u32 })
        .collect();
    for image in &images {
        out.push_str(&format!(
            "@group(2) @binding({}) var imgTex{}: texture_2d<f32>;\n",
            image.slot, image.id
        ));
    }
    let voxels: Vec<VoxelBinding> = scene
        .voxel_grids()
        .into_iter()
        .enumerate()
        .map(|(i, (object, _))| VoxelBinding {
            object,
            slot: (images.len() + i) as u32,
        })
        .collect();
    for voxel in &voxels {
        out.push_str(&format!(
            "@group(2) @binding({}) var voxTex{}: texture_3d<f32>;\n",
            voxel.slot, voxel.object
        ));
    }
    (out, buffers, images, voxels)
}

fn shadow_function(scene: &Scene) -> String {
    let body: Vec<String> = scene
        .ordered_objects()
        .into_iter()
        .map(|o| o.wgsl_shadow(scene.object_material(o)))
        .filter(|s| !s.trim().is_empty())
        .collect();
    format!(
        "fn shadow(origin: vec3<f32>, ray: vec3<f32>) -> f32 {{
    var t = INFINITY;
    let lray = length(ray);
    var shadowIntensity = 1.0;
{}
    return shadowIntensity;
}}",
        body.join("\n")
    )
}

fn join(parts: impl IntoIterator<Item = String>) -> String {
    parts
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn integrator_function(scene: &Scene, lights: &[BoundLight], default_material: &Material) -> String {
    let ordered = scene.ordered_objects();
    let background = &scene.background;
    let background_ctx = ShadeContext {
        object: background.namespace(),
        material: Namespace::new("Material", 0),
        transformed: false,
        lights,
    };
    let to_sun = lights.first().map_or("vec3<f32>(0.0, 1.0, 0.0)".to_string(), |l| {
        l.light.wgsl_to_light_normal(&l.ns, "hit")
    });

    let setups = join(lights.iter().map(|l| l.light.wgsl_setup(&l.ns)));
    let intersects = join(ordered.iter().map(|o| o.wgsl_intersect()));
    let volumes = join(ordered.iter().map(|o| o.wgsl_volume(lights)));
    let caustics = join(lights.iter().map(|l| l.light.wgsl_caustic(&l.ns)));
    let escape = join(lights.iter().map(|l| l.light.wgsl_escape_caustic(&l.ns)));
    let shades = join(ordered.iter().filter(|o| !o.shape.is_light() && !o.shape.is_volume()).map(|o| {
        let material = scene.object_material(o).unwrap_or(default_material);
        o.wgsl_shade(material, &scene.shade_context(o, lights))
    }));
    let bounces = scene.bounces;

    format!(
        "fn calculateColor(eye: vec3<f32>, initialRay: vec3<f32>) -> vec3<f32> {{
    var origin = eye;
    var ray = initialRay;
{setups}
    var colorMask = vec3<f32>(1.0);
    var accumulatedColor = vec3<f32>(0.0);
    var extinctionColor = vec3<f32>(0.0);
    var emissiveExtinctionColor = vec3<f32>(0.0);
    var iorA = 1.0;
    var lightUp1 = false;
    var lightUp2 = false;
    var reducebounce = 0;
    for (var bounce = 0; bounce < {bounces}; bounce++) {{
        if (reducebounce + bounce >= {bounces}) {{
            break;
        }}
        let lray = length(ray);
        var t = INFINITY;
{background_intersect}
{intersects}
        let hit = origin + ray * t;
        var surfaceColor = vec3<f32>(0.75);
        var uv = vec2<f32>(0.0);
        var normal = vec3<f32>(0.0);
        var normal2 = vec3<f32>(0.0);
        var inside = false;
{volumes}
        accumulatedColor += colorMask * emissiveExtinctionColor;
        colorMask *= exp(-t * extinctionColor);
{atmosphere}
{caustics}
        if (t == INFINITY) {{
{escape}
{sky}
            break;
{background_shade}
{shades}
        }}
        if (colorMask.x + colorMask.y + colorMask.z < EPSILON) {{
            break;
        }}
    }}
    return accumulatedColor * {exposure};
}}",
        background_intersect = background.wgsl_intersect(),
        atmosphere = background.wgsl_atmosphere(&to_sun),
        sky = background.wgsl_sky(),
        background_shade = background.wgsl_shade(&background_ctx),
        exposure = float(scene.camera.exposure),
    )
}

/// Full-screen quad whose corner rays are interpolated per fragment, and
/// the blend of the new sample into the previous accumulation.
const ENTRY: &str = "struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) initialRay: vec3<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
    );
    let p = corners[index];
    let percent = p * 0.5 + vec2<f32>(0.5);
    var out: VertexOutput;
    out.position = vec4<f32>(p, 0.0, 1.0);
    out.initialRay = mix(
        mix(u.ray00.xyz, u.ray01.xyz, percent.y),
        mix(u.ray10.xyz, u.ray11.xyz, percent.y),
        percent.x,
    );
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    fragCoord = in.position.xyz;
    let previous = textureLoad(accumTex, vec2<i32>(in.position.xy), 0).rgb;
    let color = calculateColor(u.eye.xyz, in.initialRay);
    return vec4<f32>(mix(color, previous, u.textureWeight.x), 1.0);
}";

/// Objects whose code lands in the program, for diagnostics.
pub fn describe(scene: &Scene) -> Vec<String> {
    scene
        .ordered_objects()
        .into_iter()
        .map(|o| match &o.shape {
            Shape::Light(l) => format!("{} ({:?} light)", o.namespace().name(""), l.kind),
            shape => format!("{} ({shape:?})", o.namespace().name("")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Background, BackgroundPreset};
    use crate::light::Light;
    use crate::material::Closure;
    use crate::objects::Volume;
    use glam::Vec3;
    use glint_core::{Mesh, VoxelGrid};

    fn basic_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_sphere(Vec3::ZERO, 1.0, 0);
        scene.add_light(Light::point(Vec3::new(2.0, 2.0, 2.0), 0.5));
        scene
    }

    #[test]
    fn test_sections_in_order() {
        let mut scene = basic_scene();
        let program = synthesize(&mut scene);
        let src = &program.source;
        let positions: Vec<usize> = Section::ALL
            .iter()
            .map(|s| src.find(s.banner()).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        let functions = src.find(Section::ObjectFunctions.banner()).unwrap();
        assert!(src.find("struct Uniforms").unwrap() < functions);
        assert!(src.find("fn shadow(").unwrap() < src.find("fn calculateColor(").unwrap());
        assert!(src.find("fn calculateColor(").unwrap() < src.find("fn fs_main(").unwrap());
    }

    #[test]
    fn test_object_identifiers_are_unique() {
        let mut scene = Scene::new();
        for i in 0..4 {
            scene.add_sphere(Vec3::new(i as f32, 0.0, 0.0), 0.3, 0);
        }
        let program = synthesize(&mut scene);
        for id in 1..=4 {
            // Once in the integrator and once in the shadow function
            let decl = format!("var surfSphere{id} = missHit();");
            assert_eq!(program.source.matches(&decl).count(), 2, "{decl}");
            let branch = format!("}} else if (t == surfSphere{id}.t) {{");
            assert_eq!(program.source.matches(&branch).count(), 1);
        }
    }

    #[test]
    fn test_light_blocks_per_light() {
        let mut scene = basic_scene();
        scene.add_light(Light::point(Vec3::new(-2.0, 2.0, 2.0), 0.5));
        let program = synthesize(&mut scene);
        assert!(program.source.contains("let lightLight2 = u.ulightLight2.xyz"));
        assert!(program.source.contains("let lightLight3 = u.ulightLight3.xyz"));
        assert!(program.source.contains("shadowIntensity2"));
        assert!(program.source.contains("shadowIntensity3"));
        assert!(program.layout.field("ulightLight3").is_some());
    }

    #[test]
    fn test_mesh_buffers_bind_in_order() {
        let mut scene = Scene::new();
        scene.add_mesh(Mesh::icosphere(1), true, true, 0);
        let program = synthesize(&mut scene);
        let slots: Vec<u32> = program.buffers.iter().map(|b| b.slot).collect();
        assert_eq!(slots, (0..program.buffers.len() as u32).collect::<Vec<_>>());
        let first = program.buffers[0];
        assert!(program
            .source
            .contains(&format!("@group(1) @binding(0) var texBuf{}: texture_2d<f32>;", first.id)));
        assert!(program.source.contains("fn intersectModel1("));
        assert!(program.source.contains("fn sampleTexBuf1(index: i32, offset: i32)"));
    }

    #[test]
    fn test_background_branches() {
        let mut scene = basic_scene();
        scene.background = Background::new(BackgroundPreset::GroundPlane);
        let program = synthesize(&mut scene);
        let src = &program.source;
        let escape = src.find("if (t == INFINITY) {").unwrap();
        let ground = src.find("} else if (t == tGround) {").unwrap();
        let sphere = src.find("} else if (t == surfSphere1.t) {").unwrap();
        assert!(escape < ground && ground < sphere);
        assert!(src.contains("accumulatedColor += colorMask * vec3<f32>(0.8, 0.9, 1.0) * 1.0;"));
    }

    #[test]
    fn test_bounce_count_literal() {
        let mut scene = basic_scene();
        scene.bounces = 3;
        let program = synthesize(&mut scene);
        assert!(program.source.contains("for (var bounce = 0; bounce < 3; bounce++)"));
        assert!(program.source.contains("if (reducebounce + bounce >= 3)"));
    }

    #[test]
    fn test_volume_and_images_bind_group_two() {
        let mut scene = basic_scene();
        let image = scene.add_image(glint_core::Texture::placeholder());
        let id = scene.add_material(
            Material::new("tex", Closure::Diffuse, Vec3::ONE)
                .with_color(crate::material::ColorSource::Texture(image)),
        );
        scene.add_cube(Vec3::splat(-2.0), Vec3::new(2.0, -1.5, 2.0), id);
        let volume = scene.add_volume(Volume::voxel(VoxelGrid::blobs(2)));
        let program = synthesize(&mut scene);
        assert_eq!(program.images, vec![ImageBinding { id: image, slot: 0 }]);
        assert_eq!(program.voxels, vec![VoxelBinding { object: volume, slot: 1 }]);
        assert!(program
            .source
            .contains(&format!("@group(2) @binding(1) var voxTex{volume}: texture_3d<f32>;")));
        assert!(program.source.contains(&format!("densityVolume{volume}(")));
    }

    #[test]
    fn test_atmosphere_uses_first_light() {
        let mut scene = basic_scene();
        scene.background = Background::new(BackgroundPreset::GroundPlane);
        scene.background.atmosphere = true;
        let program = synthesize(&mut scene);
        assert!(program.source.contains("let toSun = normalize(lightLight2 - hit);"));
        assert!(program.layout.field("sunBackground0").is_some());
    }

    #[test]
    fn test_describe_lists_objects() {
        let scene = basic_scene();
        let names = describe(&scene);
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("Sphere1"));
    }
}
