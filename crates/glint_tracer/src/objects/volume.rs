//! Participating media.
//!
//! A volume occupies the object-space box `[0, size]`. Inside the bounce
//! loop, the segment between the volume's entry point and the closest
//! surface is ray-marched with a jittered stride: each sample attenuates
//! throughput by Beer-Lambert extinction and adds Henyey-Greenstein
//! in-scattering from every light, itself attenuated along a second march
//! towards the light. Shadow rays integrate optical depth through the box.

use glam::{Mat4, Vec3, Vec4};
use glint_core::VoxelGrid;
use glint_math::Aabb;
use rand::{rngs::StdRng, Rng};

use super::SdfField;
use crate::emit::{float, vec3, Namespace};
use crate::library::{intersect_volume, intersect_volume2, phase_hg, EPSILON};
use crate::light::{BoundLight, LightSample};

const STEP_SIZE: f32 = 1.0;
const MAX_SAMPLES: u32 = 100;
const MAX_LIGHT_SAMPLES: u32 = 50;
/// Scale of the in-scattered contribution
const SCATTER_GAIN: f32 = 20.0;

#[derive(Clone)]
pub enum Density {
    /// Sampled nearest from a 3D texture, one voxel per unit
    Voxel(VoxelGrid),
    Procedural {
        /// WGSL expression in `pos`
        wgsl: String,
        global: String,
        size: Vec3,
        host: Option<SdfField>,
    },
}

impl std::fmt::Debug for Density {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Density::Voxel(grid) => f.debug_tuple("Voxel").field(&grid.dims).finish(),
            Density::Procedural { wgsl, size, .. } => f
                .debug_struct("Procedural")
                .field("wgsl", wgsl)
                .field("size", size)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub density: Density,
    /// Absorption coefficient
    pub sigma_a: f32,
    /// Scattering coefficient
    pub sigma_s: f32,
    /// Henyey-Greenstein asymmetry
    pub g: f32,
}

impl Volume {
    pub fn new(density: Density) -> Self {
        let size = match &density {
            Density::Voxel(grid) => grid.size(),
            Density::Procedural { size, .. } => *size,
        };
        Self {
            density,
            sigma_a: 0.0,
            sigma_s: 5.0 / size.x.max(EPSILON),
            g: 0.0,
        }
    }

    pub fn voxel(grid: VoxelGrid) -> Self {
        Self::new(Density::Voxel(grid))
    }

    pub fn procedural(wgsl: impl Into<String>, size: Vec3, host: Option<SdfField>) -> Self {
        Self::new(Density::Procedural {
            wgsl: wgsl.into(),
            global: String::new(),
            size,
            host,
        })
    }

    pub fn size(&self) -> Vec3 {
        match &self.density {
            Density::Voxel(grid) => grid.size(),
            Density::Procedural { size, .. } => *size,
        }
    }

    pub fn sigma_t(&self) -> f32 {
        self.sigma_a + self.sigma_s
    }

    pub fn canonical_bounds(&self) -> Aabb {
        Aabb::new(Vec3::ZERO, self.size())
    }

    /// The grid uploaded as `voxTex<id>`, if this volume has one.
    pub fn grid(&self) -> Option<&VoxelGrid> {
        match &self.density {
            Density::Voxel(grid) => Some(grid),
            Density::Procedural { .. } => None,
        }
    }

    /// Host density at an object-space position, as the shader reads it.
    pub fn density_at(&self, pos: Vec3) -> f32 {
        match &self.density {
            Density::Voxel(grid) => grid.sample_quantized(pos),
            Density::Procedural { host: Some(f), .. } => f(pos),
            Density::Procedural { host: None, .. } => 0.0,
        }
    }

    // ---- code emission ----

    /// `density<Tag><id>(pos)` plus the voxel fetch or procedural helpers.
    pub fn wgsl_global(&self, ns: &Namespace) -> String {
        let density = ns.name("density");
        match &self.density {
            Density::Voxel(_) => format!(
                "fn {density}(pos: vec3<f32>) -> f32 {{
    let size = vec3<i32>(textureDimensions(voxTex{id}));
    let cell = vec3<i32>(floor(pos));
    if (any(cell < vec3<i32>(0)) || any(cell >= size)) {{
        return 0.0;
    }}
    let samp = textureLoad(voxTex{id}, cell, 0);
    return samp.r - samp.g;
}}",
                id = ns.id
            ),
            Density::Procedural { wgsl, global, .. } => {
                let mut out = String::new();
                if !global.trim().is_empty() {
                    out.push_str(global.trim());
                    out.push_str("\n\n");
                }
                out.push_str(&format!(
                    "fn {density}(pos: vec3<f32>) -> f32 {{\n    return {wgsl};\n}}"
                ));
                out
            }
        }
    }

    /// Box entry test in object space; `body` runs when the ray enters.
    fn wgsl_enter(&self, ns: &Namespace, body: &str) -> String {
        let id = ns.id;
        let t = ns.name("t");
        let inv = ns.uniform("transformInv");
        format!(
            "    var {t} = -1.0;
    if (intersectBox(origin, 1.0 / ray, {min}.xyz, {max}.xyz, t)) {{
        let Vorigin{id} = ({inv} * vec4<f32>(origin, 1.0)).xyz;
        let Vray{id} = normalize(({inv} * vec4<f32>(ray / lray, 0.0)).xyz);
        {t} = intersectVolume(Vorigin{id}, Vray{id}, vec3<f32>(0.0), {size});
        if ({t} >= 0.0) {{
            let Vhit{id} = Vorigin{id} + Vray{id} * {t};
{body}
        }}
    }}",
            min = ns.uniform("min"),
            max = ns.uniform("max"),
            size = vec3(self.size()),
        )
    }

    /// In-scattering march inside the bounce loop, after the closest
    /// surface `hit` is known.
    pub fn wgsl_march(&self, ns: &Namespace, lights: &[BoundLight]) -> String {
        let id = ns.id;
        let t = ns.name("t");
        let density = ns.name("density");
        let size = vec3(self.size());
        let prep: String = lights
            .iter()
            .map(|l| {
                let lid = l.ns.id;
                format!(
                    "                let toLight{lid} = normalize(({inv} * vec4<f32>({dir}, 0.0)).xyz);
                let phase{lid} = phaseHG(-Vray{id}, toLight{lid}, g);\n",
                    inv = ns.uniform("transformInv"),
                    dir = l.light.wgsl_to_light_normal(&l.ns, &format!("Ventry{id}")),
                )
            })
            .collect();
        let scatter: String = lights
            .iter()
            .map(|l| {
                let lid = l.ns.id;
                format!(
                    "                    let Ltval{lid} = intersectVolume2(samplePos, toLight{lid}, vec3<f32>(0.0), {size});
                    let Lns{lid} = i32(Ltval{lid}.y / stepSize / 2.0) + 1;
                    let Lstride{lid} = Ltval{lid}.y / f32(Lns{lid});
                    var tau{lid} = 0.0;
                    for (var j = 0; j < {light_samples}; j++) {{
                        if (j >= Lns{lid}) {{
                            break;
                        }}
                        tau{lid} += {density}(samplePos + toLight{lid} * (Lstride{lid} * (f32(j) + 0.5)));
                    }}
                    let att{lid} = exp(-tau{lid} * Lstride{lid} * sigmaT);
                    accumulatedColor += colorMask * {intensity} * att{lid} * phase{lid} * sigmaS * stride * density * {gain};\n",
                    light_samples = MAX_LIGHT_SAMPLES,
                    intensity = l.light.wgsl_intensity(&l.ns),
                    gain = float(SCATTER_GAIN),
                )
            })
            .collect();
        let body = format!(
            "            let VsceneT{id} = distance(Vorigin{id}, ({inv} * vec4<f32>(hit, 1.0)).xyz);
            if ({t} < VsceneT{id}) {{
                let Ventry{id} = ({transform} * vec4<f32>(Vhit{id}, 1.0)).xyz;
                let stepSize = {step};
                let sigmaS = {sigma_s};
                let sigmaT = {sigma_t};
                let g = {g};
{prep}                let tval = intersectVolume2(Vhit{id}, Vray{id}, vec3<f32>(0.0), {size});
                let dist = min(tval.y - tval.x, VsceneT{id} - {t});
                let jitter = random(vec3<f32>(151.7242, 14.098, 92.3421), u.timeSinceStart.x);
                let samples = i32((dist + jitter) / stepSize) + 1;
                let stride = dist / f32(samples);
                for (var i = 0; i < {max_samples}; i++) {{
                    if (i >= samples) {{
                        break;
                    }}
                    let offset = random(vec3<f32>(151.7242, 14.098, 92.3421), u.timeSinceStart.x + f32(i) / 10.0);
                    let samplePos = Vhit{id} + Vray{id} * (tval.x + stride * (f32(i) + offset));
                    let density = {density}(samplePos);
                    colorMask *= exp(-stepSize * density * sigmaT);
                    if (density < EPSILON) {{
                        continue;
                    }}
{scatter}                }}
            }}",
            inv = ns.uniform("transformInv"),
            transform = ns.uniform("transform"),
            step = float(STEP_SIZE),
            sigma_s = float(self.sigma_s),
            sigma_t = float(self.sigma_t()),
            g = float(self.g),
            max_samples = MAX_SAMPLES,
        );
        self.wgsl_enter(ns, &body)
    }

    /// Optical-depth attenuation inside `shadow(origin, ray)`.
    pub fn wgsl_shadow(&self, ns: &Namespace) -> String {
        let id = ns.id;
        let body = format!(
            "            let tval = intersectVolume2(Vhit{id}, Vray{id}, vec3<f32>(0.0), {size});
            let samples = i32((tval.y - tval.x) / {step}) + 1;
            let stride = (tval.y - tval.x) / f32(samples);
            var tau = 0.0;
            for (var i = 0; i < {light_samples}; i++) {{
                if (i >= samples) {{
                    break;
                }}
                tau += {density}(Vhit{id} + Vray{id} * (tval.x + stride * (f32(i) + 0.5)));
            }}
            shadowIntensity *= exp(-tau * stride * {sigma_t});",
            size = vec3(self.size()),
            step = float(STEP_SIZE),
            light_samples = MAX_LIGHT_SAMPLES,
            density = ns.name("density"),
            sigma_t = float(self.sigma_t()),
        );
        self.wgsl_enter(ns, &body)
    }

    // ---- host mirror ----

    /// Transmittance of a shadow ray through the medium.
    pub fn shadow_transmittance(&self, inv: &Mat4, origin: Vec3, ray: Vec3) -> f32 {
        let size = self.size();
        let vorigin = inv.transform_point3(origin);
        let vray = inv.transform_vector3(ray.normalize()).normalize();
        let entry = intersect_volume(vorigin, vray, Vec3::ZERO, size);
        if entry < 0.0 {
            return 1.0;
        }
        let vhit = vorigin + vray * entry;
        let tval = intersect_volume2(vhit, vray, Vec3::ZERO, size);
        let samples = ((tval.y - tval.x) / STEP_SIZE) as u32 + 1;
        let stride = (tval.y - tval.x) / samples as f32;
        let tau: f32 = (0..samples.min(MAX_LIGHT_SAMPLES))
            .map(|i| self.density_at(vhit + vray * (tval.x + stride * (i as f32 + 0.5))))
            .sum();
        (-tau * stride * self.sigma_t()).exp()
    }

    /// Host mirror of [`Volume::wgsl_march`]: attenuates `mask` and adds
    /// in-scattered light to `radiance` for the segment up to `scene_t`
    /// (in units of `ray`).
    #[allow(clippy::too_many_arguments)]
    pub fn scatter(
        &self,
        world: &Mat4,
        origin: Vec3,
        ray: Vec3,
        scene_t: f32,
        lights: &[LightSample],
        rng: &mut StdRng,
        mask: &mut Vec3,
        radiance: &mut Vec3,
    ) {
        let size = self.size();
        let inv = world.inverse();
        let lray = ray.length();
        let vorigin = inv.transform_point3(origin);
        let vray = (inv * Vec4::from((ray / lray, 0.0))).truncate().normalize();
        let entry = intersect_volume(vorigin, vray, Vec3::ZERO, size);
        if entry < 0.0 {
            return;
        }
        let scene_hit = inv.transform_point3(origin + ray * scene_t);
        let scene_dist = vorigin.distance(scene_hit);
        if entry >= scene_dist {
            return;
        }
        let vhit = vorigin + vray * entry;
        let world_entry = world.transform_point3(vhit);
        let sigma_t = self.sigma_t();
        let prepared: Vec<(Vec3, f32, Vec3)> = lights
            .iter()
            .map(|l| {
                let dir = inv
                    .transform_vector3(l.to_light_normal(world_entry))
                    .normalize_or_zero();
                (dir, phase_hg(-vray, dir, self.g), l.intensity)
            })
            .collect();

        let tval = intersect_volume2(vhit, vray, Vec3::ZERO, size);
        let dist = (tval.y - tval.x).min(scene_dist - entry);
        let jitter: f32 = rng.gen();
        let samples = ((dist + jitter) / STEP_SIZE) as u32 + 1;
        let stride = dist / samples as f32;
        for i in 0..samples.min(MAX_SAMPLES) {
            let offset: f32 = rng.gen();
            let pos = vhit + vray * (tval.x + stride * (i as f32 + offset));
            let density = self.density_at(pos);
            *mask *= (-STEP_SIZE * density * sigma_t).exp();
            if density < EPSILON {
                continue;
            }
            for &(dir, phase, intensity) in &prepared {
                let ltval = intersect_volume2(pos, dir, Vec3::ZERO, size);
                let lns = (ltval.y / STEP_SIZE / 2.0) as u32 + 1;
                let lstride = ltval.y / lns as f32;
                let tau: f32 = (0..lns.min(MAX_LIGHT_SAMPLES))
                    .map(|j| self.density_at(pos + dir * (lstride * (j as f32 + 0.5))))
                    .sum();
                let attenuation = (-tau * lstride * sigma_t).exp();
                *radiance += *mask
                    * intensity
                    * (attenuation * phase * self.sigma_s * stride * density * SCATTER_GAIN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::LightKind;
    use glam::UVec3;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn uniform_fog(value: f32) -> Volume {
        Volume::procedural(format!("{}", float(value)), Vec3::splat(4.0), Some(Arc::new(move |_| value)))
    }

    #[test]
    fn test_coefficients_follow_size() {
        let volume = Volume::voxel(VoxelGrid::blobs(1));
        assert!((volume.sigma_s - 5.0 / 24.0).abs() < 1e-6);
        assert_eq!(volume.sigma_a, 0.0);
        assert_eq!(volume.canonical_bounds().max, Vec3::new(24.0, 20.0, 24.0));
        assert!(volume.grid().is_some());
    }

    #[test]
    fn test_shadow_follows_beer_lambert() {
        let fog = uniform_fog(0.1);
        // Straight through four units of constant density
        let tr = fog.shadow_transmittance(&Mat4::IDENTITY, Vec3::new(-1.0, 2.0, 2.0), Vec3::X * 10.0);
        let expected = (-0.1 * 4.0 * fog.sigma_t()).exp();
        assert!((tr - expected).abs() < 1e-4, "{tr} vs {expected}");
        // Missing the box leaves the ray untouched
        let miss = fog.shadow_transmittance(&Mat4::IDENTITY, Vec3::new(-1.0, 9.0, 2.0), Vec3::X);
        assert_eq!(miss, 1.0);
    }

    #[test]
    fn test_empty_voxels_are_transparent() {
        let volume = Volume::voxel(VoxelGrid::new(UVec3::splat(4)));
        let tr = volume.shadow_transmittance(&Mat4::IDENTITY, Vec3::new(-1.0, 2.0, 2.0), Vec3::X);
        assert_eq!(tr, 1.0);
    }

    #[test]
    fn test_scatter_adds_light_and_attenuates() {
        let fog = uniform_fog(0.2);
        let light = LightSample {
            kind: LightKind::Point,
            position: Vec3::new(2.0, 10.0, 2.0),
            intensity: Vec3::ONE,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut mask = Vec3::ONE;
        let mut radiance = Vec3::ZERO;
        fog.scatter(
            &Mat4::IDENTITY,
            Vec3::new(-1.0, 2.0, 2.0),
            Vec3::X,
            crate::emit::INFINITY,
            &[light],
            &mut rng,
            &mut mask,
            &mut radiance,
        );
        assert!(mask.x < 1.0 && mask.x > 0.0);
        assert!(radiance.x > 0.0);

        // A surface in front of the box blocks the whole segment
        let mut mask = Vec3::ONE;
        let mut radiance = Vec3::ZERO;
        fog.scatter(
            &Mat4::IDENTITY,
            Vec3::new(-1.0, 2.0, 2.0),
            Vec3::X,
            0.5,
            &[light],
            &mut rng,
            &mut mask,
            &mut radiance,
        );
        assert_eq!(mask, Vec3::ONE);
        assert_eq!(radiance, Vec3::ZERO);
    }

    #[test]
    fn test_march_code_per_light() {
        let volume = Volume::voxel(VoxelGrid::blobs(2));
        let ns = Namespace::new("Volume", 6);
        let lights = vec![
            BoundLight::new(Namespace::new("Light", 1), crate::light::Light::default()),
            BoundLight::new(Namespace::new("Light", 2), crate::light::Light::default()),
        ];
        let code = volume.wgsl_march(&ns, &lights);
        assert!(code.contains("var tVolume6 = -1.0;"));
        assert!(code.contains("phaseHG(-Vray6, toLight1, g)"));
        assert!(code.contains("tau2 += densityVolume6("));
        assert!(code.contains("normalize(lightLight1 - Ventry6)"));
        assert!(volume.wgsl_global(&ns).contains("textureLoad(voxTex6, cell, 0)"));
        assert!(volume.wgsl_shadow(&ns).contains("shadowIntensity *= exp(-tau * stride"));
    }
}
