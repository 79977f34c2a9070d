//! Named demo scenes for the CLI and the integration checks.

use glam::Vec3;
use glint_core::terrain::{SyntheticLayer, SyntheticTileSource};
use glint_core::{Mesh, TerrainMosaic, VoxelGrid};
use glint_math::Camera;

use crate::background::{Background, BackgroundPreset};
use crate::error::{TracerError, TracerResult};
use crate::light::Light;
use crate::material::{Closure, Material};
use crate::objects::{Composite, Volume};
use crate::scene::Scene;

pub const NAMES: [&str; 7] = ["sphere", "shadow", "cornell", "glass", "mesh", "volume", "terrain"];

pub fn demo(name: &str) -> TracerResult<Scene> {
    match name {
        "sphere" => Ok(sphere()),
        "shadow" => Ok(shadow()),
        "cornell" => Ok(cornell()),
        "glass" => Ok(glass()),
        "mesh" => Ok(mesh()),
        "volume" => Ok(volume()),
        "terrain" => terrain(),
        other => Err(TracerError::Invalid(format!(
            "unknown demo '{other}', expected one of {}",
            NAMES.join(", ")
        ))),
    }
}

/// White unit sphere at the origin lit by one point light at (2, 2, 2).
pub fn sphere() -> Scene {
    let mut scene = Scene::new();
    scene.background = Background::new(BackgroundPreset::None);
    scene.camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0);
    let white = scene.add_material(Material::new("white", Closure::Diffuse, Vec3::ONE));
    scene.add_sphere(Vec3::ZERO, 1.0, white);
    let mut light = Light::point(Vec3::new(2.0, 2.0, 2.0), 0.5);
    light.size = 0.0;
    scene.add_light(light);
    scene
}

/// The sphere scene with a box blocking the light from the front pole.
pub fn shadow() -> Scene {
    let mut scene = sphere();
    let grey = scene.add_material(Material::new("grey", Closure::Diffuse, Vec3::splat(0.5)));
    scene.add_cube(Vec3::new(0.8, 0.8, 1.3), Vec3::new(1.2, 1.2, 1.7), grey);
    scene
}

pub fn cornell() -> Scene {
    let mut scene = Scene::new();
    scene.background = Background::new(BackgroundPreset::CornellRedGreen);
    scene.camera = Camera::new(Vec3::new(0.0, 0.0, 2.4), Vec3::ZERO, 1.0);
    let mirror = scene.add_material(Material::new("mirror", Closure::Mirror, Vec3::ONE));
    let white = scene.add_material(Material::new("white", Closure::Diffuse, Vec3::splat(0.8)));
    let mut lamp = Material::new("lamp", Closure::Emissive, Vec3::ONE);
    lamp.intensity = 4.0;
    let lamp = scene.add_material(lamp);
    scene.add_sphere(Vec3::new(-0.45, -0.7, -0.3), 0.3, mirror);
    scene.add_cube(Vec3::new(0.1, -1.0, -0.2), Vec3::new(0.6, -0.3, 0.3), white);
    scene.add_cube(Vec3::new(-0.25, 0.98, -0.25), Vec3::new(0.25, 1.0, 0.25), lamp);
    let mut light = Light::point(Vec3::new(0.0, 0.8, 0.0), 0.5);
    light.size = 0.1;
    scene.add_light(light);
    scene
}

/// Dielectrics on the ground plane under a caustic-casting sun.
pub fn glass() -> Scene {
    let mut scene = Scene::new();
    scene.background = Background::new(BackgroundPreset::GroundPlane);
    scene.camera = Camera::new(Vec3::new(0.0, 0.6, 3.2), Vec3::new(0.0, -0.4, 0.0), 1.0);

    let mut glass = Material::new("glass", Closure::Glass, Vec3::new(0.7, 0.9, 1.0));
    glass.ior = 1.5;
    glass.concentration = 0.5;
    let glass = scene.add_material(glass);
    let mut bubble = Material::new("bubble", Closure::Bubble, Vec3::ONE);
    bubble.iridescent = true;
    bubble.film_width = 400.0;
    let bubble = scene.add_material(bubble);
    let mut smooth = Material::new("red", Closure::Smooth, Vec3::new(0.8, 0.2, 0.2));
    smooth.ior = 1.3;
    let smooth = scene.add_material(smooth);

    scene.add_sphere(Vec3::new(-0.6, -0.5, 0.0), 0.5, glass);
    scene.add_sphere(Vec3::new(0.4, -0.6, 0.5), 0.4, bubble);
    let mut pillar = Composite::new();
    pillar.add_cube(Vec3::new(0.5, -1.0, -0.8), Vec3::new(0.9, -0.2, -0.4));
    pillar.add_sphere(Vec3::new(0.7, -0.05, -0.6), 0.2);
    scene.add_composite(pillar, smooth);
    scene.add_torus(Vec3::new(-0.2, -0.9, 0.8), 0.3, 0.08, glass);

    let mut sun = Light::directional(Vec3::new(0.4, 1.0, 0.3), 0.5, 0.05);
    sun.caustic = 0.2;
    scene.add_light(sun);
    scene
}

/// A glossy icosphere through the mesh buffers and traversal.
pub fn mesh() -> Scene {
    let mut scene = Scene::new();
    scene.background = Background::new(BackgroundPreset::GroundPlane);
    scene.camera = Camera::new(Vec3::new(0.0, 0.3, 3.0), Vec3::ZERO, 1.0);
    let mut copper = Material::new("copper", Closure::Glossy, Vec3::new(0.95, 0.64, 0.54));
    copper.glossiness = 0.3;
    let copper = scene.add_material(copper);
    let id = scene.add_mesh(Mesh::icosphere(3), true, false, copper);
    if let Some(object) = scene.object_mut(id) {
        object.translate(Vec3::new(0.0, -0.2, 0.0));
        object.scale(Vec3::splat(0.8));
    }
    let white = scene.add_material(Material::new("white", Closure::Diffuse, Vec3::splat(0.8)));
    scene.add_cylinder(Vec3::new(1.1, -0.6, -0.4), 0.25, 0.4, white);
    scene.add_cone(Vec3::new(-1.1, -0.6, -0.4), 0.3, 0.05, 0.4, white);
    scene.add_light(Light::point(Vec3::new(1.5, 2.0, 2.0), 0.5));
    scene
}

/// Voxel blobs scattering a point light.
pub fn volume() -> Scene {
    let mut scene = Scene::new();
    scene.background = Background::new(BackgroundPreset::GroundPlane);
    scene.camera = Camera::new(Vec3::new(0.0, 0.5, 3.5), Vec3::ZERO, 1.0);
    let mut cloud = Volume::voxel(VoxelGrid::blobs(7));
    cloud.g = 0.3;
    let id = scene.add_volume(cloud);
    if let Some(object) = scene.object_mut(id) {
        object.translate(Vec3::new(-1.0, -1.0, -1.0));
        object.scale(Vec3::splat(1.0 / 12.0));
    }
    scene.add_light(Light::point(Vec3::new(1.0, 2.5, 1.5), 0.5));
    scene
}

/// Synthetic hills under an atmospheric sky.
pub fn terrain() -> TracerResult<Scene> {
    let mosaic = TerrainMosaic::generate(
        &SyntheticTileSource::new(SyntheticLayer::Elevation),
        &SyntheticTileSource::new(SyntheticLayer::Imagery),
        46.5,
        7.9,
        12,
        3,
    )?;
    let mut scene = Scene::new();
    let mut background = Background::new(BackgroundPreset::None);
    background.atmosphere = true;
    background.ground_height = -300.0;
    scene.background = background;
    scene.camera = Camera::new(Vec3::new(0.0, 900.0, 4000.0), Vec3::new(0.0, 0.0, 0.0), 1.0);
    scene.camera.far = 1.0e5;
    scene.add_terrain(mosaic, 1000.0, 1.0, None);
    scene.add_light(Light::directional(Vec3::new(0.3, 0.4, -1.0), 1.0, 0.0));
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::HostTracer;
    use crate::library::EPSILON;
    use crate::synth::synthesize;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_every_demo_synthesizes() {
        for name in NAMES {
            let mut scene = demo(name).unwrap();
            let program = synthesize(&mut scene);
            assert!(program.source.contains("fn calculateColor"), "{name}");
            assert!(program.source.contains("@fragment"), "{name}");
        }
        assert!(demo("teapot").is_err());
    }

    #[test]
    fn test_sphere_demo_direct_light() {
        let mut scene = sphere();
        scene.bounces = 1;
        let tracer = HostTracer::new(&scene);
        assert!((tracer.closest_t(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z) - 2.0).abs() < 1e-4);
        let mut rng = StdRng::seed_from_u64(3);
        let radiance = tracer.radiance(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, &mut rng);
        let to_light = (Vec3::new(2.0, 2.0, 2.0) - Vec3::Z).normalize();
        let expected = to_light.dot(Vec3::Z);
        assert!((radiance.x - expected).abs() < 1e-4, "{radiance}");
    }

    #[test]
    fn test_shadow_demo_blocks_light() {
        let mut scene = shadow();
        scene.bounces = 1;
        let tracer = HostTracer::new(&scene);
        let hit = Vec3::Z;
        assert_eq!(tracer.shadow(hit + Vec3::Z * EPSILON, Vec3::new(2.0, 2.0, 2.0) - hit), 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let radiance = tracer.radiance(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, &mut rng);
        assert!(radiance.length() < 1e-6);
    }

    #[test]
    fn test_mesh_demo_binds_buffers() {
        let mut scene = mesh();
        let program = synthesize(&mut scene);
        assert!(!program.buffers.is_empty());
        assert!(program.source.contains("@group(1) @binding(0)"));
        assert!(program.source.contains("fn intersectModel"));
    }

    #[test]
    fn test_terrain_demo_registers_rasters() {
        let scene = terrain().unwrap();
        assert_eq!(scene.used_images().len(), 3);
        assert!(scene.background.atmosphere);
    }
}
