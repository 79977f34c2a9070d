//! Progressive integration: the frame-accumulation contract shared by the
//! GPU driver, and a CPU reference of the synthesized bounce loop.
//!
//! The reference walks the same objects in the same order as the
//! synthesized program, through the host mirrors of every intersection,
//! closure and medium. It draws its random numbers from a per-pixel
//! `StdRng` instead of the shader's hash, so images match the GPU in
//! expectation rather than bit for bit.

use glam::{Vec2, Vec3};
use glint_math::Camera;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use crate::background::BackgroundHit;
use crate::config::RenderConfig;
use crate::emit::INFINITY;
use crate::error::{TracerError, TracerResult};
use crate::library::{
    cosine_weighted_direction, fresnel, iridescence, ray_dist_point, refraction,
    uniformly_random_vector, EPSILON,
};
use crate::light::{BoundLight, LightKind, LightSample};
use crate::material::{Closure, ImageRegistry, Material};
use crate::objects::{Shape, TracerObject, WorldHit};
use crate::scene::Scene;
use crate::uniforms::FrameUniforms;

/// Linear RGB pixels, row 0 at the top.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
}

impl ImageBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::ZERO; (width * height) as usize],
        }
    }

    /// From tightly packed RGBA floats, as read back from the GPU.
    pub fn from_rgba_f32(width: u32, height: u32, data: &[f32]) -> TracerResult<Self> {
        let count = (width * height) as usize;
        if data.len() < count * 4 {
            return Err(TracerError::Invalid(format!(
                "{} floats for a {width}x{height} RGBA image",
                data.len()
            )));
        }
        let pixels = data
            .chunks_exact(4)
            .take(count)
            .map(|p| Vec3::new(p[0], p[1], p[2]))
            .collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Vec3> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    pub fn mean(&self) -> Vec3 {
        if self.pixels.is_empty() {
            return Vec3::ZERO;
        }
        self.pixels.iter().copied().sum::<Vec3>() / self.pixels.len() as f32
    }

    /// Clamped 8-bit RGBA with `1 / gamma` encoding.
    pub fn to_rgba8(&self, gamma: f32) -> Vec<u8> {
        let inv = if gamma > 0.0 { 1.0 / gamma } else { 1.0 };
        self.pixels
            .iter()
            .flat_map(|p| {
                let c = p.max(Vec3::ZERO).powf(inv).min(Vec3::ONE) * 255.0;
                [c.x.round() as u8, c.y.round() as u8, c.z.round() as u8, 255]
            })
            .collect()
    }
}

/// Sample counting, blend weight, per-frame seeds and the ping-pong index.
#[derive(Debug, Clone)]
pub struct Progressive {
    seed: u64,
    frame: u64,
    sample_count: u32,
    front: usize,
    revision: Option<u64>,
}

/// Step of `timeSinceStart` per frame.
const TIME_STEP: f32 = 1.618034;

impl Progressive {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frame: 0,
            sample_count: 0,
            front: 0,
            revision: None,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Weight of the previous accumulation: `n / (n + 1)`.
    pub fn texture_weight(&self) -> f32 {
        let n = self.sample_count as f32;
        n / (n + 1.0)
    }

    pub fn time_since_start(&self) -> f32 {
        (self.frame as f32 * TIME_STEP) % 100.0
    }

    /// Index of the texture holding the current accumulation.
    pub fn front(&self) -> usize {
        self.front
    }

    pub fn back(&self) -> usize {
        1 - self.front
    }

    pub fn reset(&mut self) {
        if self.sample_count > 0 {
            log::debug!("Progressive reset after {} samples", self.sample_count);
        }
        self.sample_count = 0;
    }

    /// Reset when the scene changed since the last frame.
    pub fn sync(&mut self, scene: &Scene) {
        if self.revision != Some(scene.revision()) {
            self.reset();
            self.revision = Some(scene.revision());
        }
    }

    /// Seed for this frame's per-pixel generators.
    pub fn frame_seed(&self) -> u64 {
        self.seed ^ self.frame.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Jittered camera rays and blend weight for the next frame.
    pub fn frame_uniforms(&self, camera: &Camera) -> FrameUniforms {
        let mut rng = StdRng::seed_from_u64(self.frame_seed());
        let jitter = Vec2::new(rng.gen::<f32>() * 2.0 - 1.0, rng.gen::<f32>() * 2.0 - 1.0);
        FrameUniforms {
            rays: camera.corner_rays(jitter),
            texture_weight: self.texture_weight(),
            time_since_start: self.time_since_start(),
        }
    }

    /// Count the frame and swap the ping-pong pair.
    pub fn finish_frame(&mut self) {
        self.sample_count += 1;
        self.frame += 1;
        self.front = self.back();
    }
}

fn pixel_seed(frame_seed: u64, pixel: u64) -> u64 {
    frame_seed ^ pixel.wrapping_mul(0xD129_0C5B_E1E3_6B9D).rotate_left(17)
}

fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - 2.0 * n.dot(i) * n
}

/// What the closest intersection landed on.
enum Closest<'a> {
    Escape,
    Background(BackgroundHit),
    Object(&'a TracerObject, WorldHit),
}

/// Mutable state of one path, named after the program's locals.
struct Path {
    origin: Vec3,
    ray: Vec3,
    color_mask: Vec3,
    accumulated: Vec3,
    extinction: Vec3,
    emissive_extinction: Vec3,
    light_up1: bool,
    light_up2: bool,
    reduce_bounce: i32,
}

/// A light with this pixel's jittered position.
struct PixelLight<'a> {
    bound: &'a BoundLight,
    sample: LightSample,
}

/// Read-only view of a scene for host tracing.
pub struct HostTracer<'a> {
    scene: &'a Scene,
    ordered: Vec<&'a TracerObject>,
    lights: Vec<BoundLight>,
    intensities: Vec<Vec3>,
    default_material: Material,
}

impl<'a> HostTracer<'a> {
    /// The scene's meshes must already be prepared.
    pub fn new(scene: &'a Scene) -> Self {
        let lights = scene.lights();
        let intensities = lights.iter().map(|l| scene.effective_intensity(&l.light)).collect();
        Self {
            scene,
            ordered: scene.ordered_objects(),
            lights,
            intensities,
            default_material: Material::default(),
        }
    }

    fn images(&self) -> &ImageRegistry {
        self.scene.images()
    }

    fn material(&self, object: &TracerObject) -> &Material {
        self.scene.object_material(object).unwrap_or(&self.default_material)
    }

    /// Closest surface distance along `ray` (in units of `ray`), or
    /// `INFINITY`.
    pub fn closest_t(&self, origin: Vec3, ray: Vec3) -> f32 {
        self.closest(origin, ray).0
    }

    fn closest(&self, origin: Vec3, ray: Vec3) -> (f32, Closest<'_>) {
        let mut t = INFINITY;
        let mut best = Closest::Escape;
        if let Some(hit) = self.scene.background.hit(origin, ray) {
            t = hit.t;
            best = Closest::Background(hit);
        }
        for object in &self.ordered {
            if object.shape.is_light() || object.shape.is_volume() {
                continue;
            }
            let two_sided = object.two_sided(self.scene.object_material(object));
            if let Some(hit) = object.hit(origin, ray, t, two_sided) {
                if hit.t > 0.0 && hit.t < t {
                    t = hit.t;
                    best = Closest::Object(*object, hit);
                }
            }
        }
        (t, best)
    }

    /// Visibility along `ray` (t in `(0, 1)`), through every occluder and
    /// medium.
    pub fn shadow(&self, origin: Vec3, ray: Vec3) -> f32 {
        let mut intensity = 1.0;
        for object in &self.ordered {
            intensity *= object.shadow_factor(origin, ray, self.scene.object_material(object));
            if intensity <= 0.0 {
                return 0.0;
            }
        }
        intensity
    }

    fn pixel_lights(&self, rng: &mut StdRng) -> Vec<PixelLight<'_>> {
        self.lights
            .iter()
            .zip(&self.intensities)
            .map(|(bound, &intensity)| PixelLight {
                bound,
                sample: bound.light.sample(rng, intensity),
            })
            .collect()
    }

    fn lambertian(&self, lights: &[PixelLight<'_>], path: &mut Path, hit: Vec3, normal: Vec3) {
        for l in lights {
            let to_light = l.sample.to_light(hit);
            let diffuse = to_light.normalize_or_zero().dot(normal).max(0.0);
            let shadow = self.shadow(hit + normal * EPSILON, to_light);
            path.accumulated += path.color_mask * (l.sample.intensity * diffuse * shadow);
        }
    }

    fn specular(&self, lights: &[PixelLight<'_>], path: &mut Path, hit: Vec3, normal: Vec3) {
        for l in lights {
            let to_light = l.sample.to_light(hit);
            let reflected = reflect(to_light.normalize_or_zero(), normal.normalize_or_zero()).normalize_or_zero();
            let view = (hit - path.origin).normalize_or_zero();
            let highlight = 2.0 * reflected.dot(view).max(0.0).powf(20.0);
            let shadow = self.shadow(hit + normal * EPSILON, to_light);
            path.accumulated += path.color_mask * l.sample.intensity * highlight * shadow;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn diffuse_bounce(
        &self,
        lights: &[PixelLight<'_>],
        m: &Material,
        color: Vec3,
        path: &mut Path,
        hit: Vec3,
        normal: Vec3,
        rng: &mut StdRng,
    ) {
        path.ray = cosine_weighted_direction(rng, normal);
        path.color_mask *= color;
        self.lambertian(lights, path, hit, normal);
        path.origin = hit + path.ray * EPSILON;
        if m.emissive {
            path.accumulated += path.color_mask * color * m.intensity;
        }
        path.light_up2 = true;
        path.light_up1 = false;
        path.reduce_bounce += 1;
    }

    fn reflect_bounce(&self, lights: &[PixelLight<'_>], path: &mut Path, hit: Vec3, normal: Vec3) {
        path.ray = reflect(path.ray, normal).normalize_or_zero();
        self.specular(lights, path, hit, normal);
        path.origin = hit + path.ray * EPSILON;
    }

    fn emissive_extinction(m: &Material, color: Vec3, inside: bool) -> Vec3 {
        if m.emissive && !inside {
            color * m.intensity * m.concentration
        } else {
            Vec3::ZERO
        }
    }

    /// Run a material closure; `false` ends the path.
    #[allow(clippy::too_many_arguments)]
    fn shade(
        &self,
        lights: &[PixelLight<'_>],
        m: &Material,
        path: &mut Path,
        hit: Vec3,
        mut normal: Vec3,
        uv: Vec2,
        inside: bool,
        rng: &mut StdRng,
    ) -> bool {
        let images = self.images();
        let color = m.host_color(images, hit, uv);
        match m.closure {
            Closure::Diffuse => self.diffuse_bounce(lights, m, color, path, hit, normal, rng),
            Closure::Mirror => {
                path.ray = path.ray.normalize_or_zero();
                if path.ray.dot(normal) > 0.0 {
                    normal = -normal;
                }
                let kr = fresnel(path.ray, normal, m.ior, 1.0);
                path.ray = reflect(path.ray, normal).normalize_or_zero();
                path.color_mask *= Vec3::ONE - (Vec3::ONE - color) * (1.0 - kr);
                self.specular(lights, path, hit, normal);
                path.origin = hit + path.ray * EPSILON;
                if m.emissive {
                    path.accumulated += path.color_mask * color * m.intensity;
                }
                if path.light_up2 {
                    path.light_up1 = true;
                }
            }
            Closure::Glossy => {
                let gloss = m.host_glossiness(images, uv);
                path.ray = reflect(path.ray, normal).normalize_or_zero() + uniformly_random_vector(rng) * gloss;
                path.color_mask *= color;
                self.lambertian(lights, path, hit, normal);
                path.origin = hit + path.ray * EPSILON;
                if m.emissive {
                    path.accumulated += path.color_mask * color * m.intensity;
                }
                path.light_up2 = true;
                path.light_up1 = false;
                path.reduce_bounce += 1;
            }
            Closure::Smooth => {
                path.ray = path.ray.normalize_or_zero();
                if path.ray.dot(normal) > 0.0 {
                    normal = -normal;
                }
                let kr = fresnel(path.ray, normal, m.ior, 1.0);
                if rng.gen::<f32>() < kr {
                    self.reflect_bounce(lights, path, hit, normal);
                    if path.light_up2 {
                        path.light_up1 = true;
                    }
                } else {
                    self.diffuse_bounce(lights, m, color, path, hit, normal, rng);
                }
            }
            Closure::Glass => {
                path.ray = path.ray.normalize_or_zero();
                let kr = fresnel(path.ray, normal, m.ior, 1.0);
                if rng.gen::<f32>() < kr {
                    if path.ray.dot(normal) > 0.0 {
                        normal = -normal;
                    }
                    self.reflect_bounce(lights, path, hit, normal);
                } else {
                    path.ray = refraction(path.ray, normal, m.ior, 1.0).normalize_or_zero();
                    path.origin = hit + path.ray * EPSILON;
                    path.extinction = if inside {
                        Vec3::ZERO
                    } else {
                        (Vec3::ONE - color) * m.concentration
                    };
                    path.emissive_extinction = Self::emissive_extinction(m, color, inside);
                    path.reduce_bounce -= 1;
                }
                if path.light_up2 {
                    path.light_up1 = true;
                }
            }
            Closure::Bubble => {
                path.ray = path.ray.normalize_or_zero();
                if path.ray.dot(normal) > 0.0 {
                    normal = -normal;
                }
                let kr = fresnel(path.ray, normal, m.ior, 1.0);
                if rng.gen::<f32>() < kr {
                    if m.iridescent {
                        path.color_mask *= iridescence(path.ray, normal, m.ior, m.film_width);
                    }
                    self.reflect_bounce(lights, path, hit, normal);
                } else {
                    path.origin = hit + path.ray * EPSILON;
                    path.emissive_extinction = Self::emissive_extinction(m, color, inside);
                    path.reduce_bounce -= 1;
                }
            }
            Closure::Emissive => {
                path.accumulated += path.color_mask * color * m.intensity;
                return false;
            }
        }
        if let Some(map) = &m.maps.ambient_occlusion {
            path.color_mask *= map.host(images, uv * m.texture_scale).z;
        }
        true
    }

    fn caustics(&self, lights: &[PixelLight<'_>], path: &mut Path) {
        if !(path.light_up1 && path.light_up2) {
            return;
        }
        for l in lights {
            let light = &l.bound.light;
            if light.kind != LightKind::Point || light.size <= 0.0 {
                continue;
            }
            let (dist, t) = ray_dist_point(path.origin, path.ray, light.uniform_position());
            if t > 0.0 {
                let shadow = self.shadow(path.origin, path.ray * t);
                path.accumulated += path.color_mask * l.sample.intensity * light.caustic_falloff(dist) * shadow;
            }
        }
    }

    fn escape_caustics(&self, lights: &[PixelLight<'_>], path: &mut Path) {
        if !(path.light_up1 && path.light_up2) {
            return;
        }
        for l in lights {
            let light = &l.bound.light;
            if light.kind != LightKind::Directional || light.size <= 0.0 {
                continue;
            }
            let to = path.ray.normalize_or_zero() - light.position.normalize_or_zero();
            path.accumulated += path.color_mask * l.sample.intensity * light.caustic_falloff(to.dot(to));
        }
    }

    /// One path's radiance, mirroring `calculateColor`.
    pub fn radiance(&self, eye: Vec3, initial_ray: Vec3, rng: &mut StdRng) -> Vec3 {
        let lights = self.pixel_lights(rng);
        let samples: Vec<LightSample> = lights.iter().map(|l| l.sample).collect();
        let bounces = self.scene.bounces as i32;
        let background = &self.scene.background;
        let mut path = Path {
            origin: eye,
            ray: initial_ray,
            color_mask: Vec3::ONE,
            accumulated: Vec3::ZERO,
            extinction: Vec3::ZERO,
            emissive_extinction: Vec3::ZERO,
            light_up1: false,
            light_up2: false,
            reduce_bounce: 0,
        };

        for bounce in 0..bounces {
            if path.reduce_bounce + bounce >= bounces {
                break;
            }
            let (t, closest) = self.closest(path.origin, path.ray);
            let hit = path.origin + path.ray * t;

            for object in &self.ordered {
                if let Shape::Volume(v) = &object.shape {
                    v.scatter(
                        &object.world_matrix(),
                        path.origin,
                        path.ray,
                        t,
                        &samples,
                        rng,
                        &mut path.color_mask,
                        &mut path.accumulated,
                    );
                }
            }
            path.accumulated += path.color_mask * path.emissive_extinction;
            path.color_mask *= (-t * path.extinction).exp();

            if let Some(first) = lights.first() {
                let sun = LightSample {
                    intensity: self.scene.normalized_intensity(&first.bound.light),
                    ..first.sample
                };
                background.atmosphere(
                    path.origin,
                    path.ray,
                    t,
                    &sun,
                    hit,
                    rng,
                    &|o, r| self.shadow(o, r),
                    &mut path.color_mask,
                    &mut path.accumulated,
                );
            }
            self.caustics(&lights, &mut path);

            let keep_going = match closest {
                Closest::Escape => {
                    self.escape_caustics(&lights, &mut path);
                    path.accumulated += path.color_mask * background.sky(path.ray, self.images());
                    false
                }
                Closest::Background(bg) => self.shade(
                    &lights,
                    &background.material,
                    &mut path,
                    hit,
                    bg.normal,
                    bg.uv,
                    bg.inside,
                    rng,
                ),
                Closest::Object(object, surface) => self.shade(
                    &lights,
                    self.material(object),
                    &mut path,
                    hit,
                    surface.normal,
                    surface.uv,
                    surface.inside,
                    rng,
                ),
            };
            if !keep_going {
                break;
            }
            if path.color_mask.element_sum() < EPSILON {
                break;
            }
        }
        path.accumulated * self.scene.camera.exposure
    }

    /// One sample per pixel, rows in parallel.
    pub fn render(&self, width: u32, height: u32, frame: &FrameUniforms, frame_seed: u64) -> ImageBuffer {
        let mut image = ImageBuffer::new(width, height);
        let rays = frame.rays;
        image
            .pixels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    let index = (y * width as usize + x) as u64;
                    let mut rng = StdRng::seed_from_u64(pixel_seed(frame_seed, index));
                    let percent = Vec2::new(
                        (x as f32 + 0.5) / width as f32,
                        1.0 - (y as f32 + 0.5) / height as f32,
                    );
                    *pixel = self.radiance(rays.eye, rays.ray_at(percent), &mut rng);
                }
            });
        image
    }
}

/// Drives [`Progressive`] over the CPU reference with two ping-pong
/// accumulation buffers.
pub struct CpuTracer {
    width: u32,
    height: u32,
    progressive: Progressive,
    accumulation: [ImageBuffer; 2],
}

impl CpuTracer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            progressive: Progressive::new(config.seed),
            accumulation: [
                ImageBuffer::new(config.width, config.height),
                ImageBuffer::new(config.width, config.height),
            ],
        }
    }

    pub fn progressive(&self) -> &Progressive {
        &self.progressive
    }

    pub fn reset(&mut self) {
        self.progressive.reset();
    }

    /// Render one sample and blend it into the accumulation.
    pub fn render_frame(&mut self, scene: &mut Scene) {
        scene.prepare();
        self.progressive.sync(scene);
        let frame = self.progressive.frame_uniforms(&scene.camera);
        let sample = HostTracer::new(scene).render(self.width, self.height, &frame, self.progressive.frame_seed());

        let weight = frame.texture_weight;
        let (front, back) = (self.progressive.front(), self.progressive.back());
        let blended: Vec<Vec3> = sample
            .pixels
            .iter()
            .zip(&self.accumulation[front].pixels)
            .map(|(&new, &prev)| new.lerp(prev, weight))
            .collect();
        self.accumulation[back].pixels = blended;
        self.progressive.finish_frame();
    }

    pub fn render(&mut self, scene: &mut Scene, frames: u32) -> &ImageBuffer {
        for _ in 0..frames {
            self.render_frame(scene);
        }
        self.image()
    }

    /// The current accumulation.
    pub fn image(&self) -> &ImageBuffer {
        &self.accumulation[self.progressive.front()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Background, BackgroundPreset};
    use crate::light::Light;

    fn white_sphere_scene(light_size: f32) -> Scene {
        let mut scene = Scene::new();
        scene.background = Background::new(BackgroundPreset::None);
        scene.bounces = 1;
        let white = scene.add_material(Material::new("white", Closure::Diffuse, Vec3::ONE));
        scene.add_sphere(Vec3::ZERO, 1.0, white);
        let mut light = Light::point(Vec3::new(2.0, 2.0, 2.0), 0.5);
        light.size = light_size;
        scene.add_light(light);
        scene
    }

    #[test]
    fn test_primary_hit_distance() {
        let scene = white_sphere_scene(0.0);
        let tracer = HostTracer::new(&scene);
        let t = tracer.closest_t(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z);
        assert!((t - 2.0).abs() < 1e-4, "t = {t}");
        assert_eq!(tracer.closest_t(Vec3::new(0.0, 3.0, 3.0), Vec3::NEG_Z), INFINITY);
    }

    #[test]
    fn test_direct_radiance_is_cosine_weighted() {
        let scene = white_sphere_scene(0.0);
        let tracer = HostTracer::new(&scene);
        let mut rng = StdRng::seed_from_u64(1);
        let radiance = tracer.radiance(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, &mut rng);
        // One bounce: I / (0.5 * 1) with I = 0.5, and cos = n . l = 1/3
        let expected = 1.0 * (1.0 / 3.0);
        assert!((radiance.x - expected).abs() < 1e-4, "{radiance}");
        assert!((radiance.y - radiance.z).abs() < 1e-6);
    }

    #[test]
    fn test_occluder_removes_direct_light() {
        let mut scene = white_sphere_scene(0.0);
        scene.add_cube(Vec3::new(0.8, 0.8, 1.3), Vec3::new(1.2, 1.2, 1.7), 0);
        let tracer = HostTracer::new(&scene);
        let hit = Vec3::new(0.0, 0.0, 1.0);
        let shadow = tracer.shadow(hit + Vec3::Z * EPSILON, Vec3::new(2.0, 2.0, 2.0) - hit);
        assert_eq!(shadow, 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let radiance = tracer.radiance(Vec3::new(0.0, 0.0, 3.0), Vec3::NEG_Z, &mut rng);
        assert!(radiance.length() < 1e-6);
    }

    #[test]
    fn test_escape_sees_sky() {
        let mut scene = white_sphere_scene(0.0);
        scene.bounces = 4;
        let tracer = HostTracer::new(&scene);
        let mut rng = StdRng::seed_from_u64(5);
        let radiance = tracer.radiance(Vec3::new(0.0, 3.0, 3.0), Vec3::NEG_Z, &mut rng);
        assert!((radiance - Vec3::new(0.8, 0.9, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_accumulation_is_mean_of_samples() {
        let config = RenderConfig {
            width: 8,
            height: 6,
            seed: 11,
            ..Default::default()
        };
        let mut scene = white_sphere_scene(0.1);
        scene.bounces = 3;
        let mut tracer = CpuTracer::new(&config);
        tracer.render(&mut scene, 4);

        let mut progressive = Progressive::new(config.seed);
        let mut mean = vec![Vec3::ZERO; 48];
        for _ in 0..4 {
            let frame = progressive.frame_uniforms(&scene.camera);
            let sample = HostTracer::new(&scene).render(8, 6, &frame, progressive.frame_seed());
            for (m, p) in mean.iter_mut().zip(&sample.pixels) {
                *m += *p / 4.0;
            }
            progressive.finish_frame();
        }
        for (a, b) in tracer.image().pixels.iter().zip(&mean) {
            assert!((*a - *b).length() < 1e-4, "{a} vs {b}");
        }
        assert_eq!(tracer.progressive().sample_count(), 4);
    }

    #[test]
    fn test_progressive_weights_and_reset() {
        let mut progressive = Progressive::new(0);
        assert_eq!(progressive.texture_weight(), 0.0);
        progressive.finish_frame();
        assert!((progressive.texture_weight() - 0.5).abs() < 1e-6);
        assert_eq!(progressive.front(), 1);
        progressive.finish_frame();
        assert!((progressive.texture_weight() - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(progressive.front(), 0);
        progressive.reset();
        assert_eq!(progressive.sample_count(), 0);
        assert!(progressive.time_since_start() < 100.0);
    }

    #[test]
    fn test_scene_edit_restarts_accumulation() {
        let config = RenderConfig {
            width: 4,
            height: 4,
            ..Default::default()
        };
        let mut scene = white_sphere_scene(0.1);
        let mut tracer = CpuTracer::new(&config);
        tracer.render(&mut scene, 3);
        assert_eq!(tracer.progressive().sample_count(), 3);
        if let Some(sphere) = scene.object_mut(1) {
            sphere.translate(Vec3::X * 0.1);
        }
        tracer.render_frame(&mut scene);
        assert_eq!(tracer.progressive().sample_count(), 1);
    }

    #[test]
    fn test_rgba8_gamma() {
        let image = ImageBuffer {
            width: 2,
            height: 1,
            pixels: vec![Vec3::new(0.64, 0.0, 1.0), Vec3::splat(4.0)],
        };
        let bytes = image.to_rgba8(2.0);
        assert_eq!(&bytes[..4], &[204, 0, 255, 255]);
        assert_eq!(&bytes[4..], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_readback_length_checked() {
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let image = ImageBuffer::from_rgba_f32(2, 2, &data).unwrap();
        assert_eq!(image.get(1, 1), Some(Vec3::new(12.0, 13.0, 14.0)));
        assert_eq!(image.get(2, 0), None);
        assert_eq!(image.get(0, 2), None);
        assert!(ImageBuffer::from_rgba_f32(2, 2, &data[..12]).is_err());
    }
}
