//! The scene background: an optional ground plane or Cornell room, the sky
//! a path sees when it escapes, and single-scattering atmosphere.

use glam::{Vec2, Vec3};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use crate::emit::{float, vec3, Namespace};
use crate::error::TracerResult;
use crate::library::{intersect_cube, intersect_ground, intersect_sphere, normal_for_box};
use crate::light::LightSample;
use crate::material::{sample_image, Closure, ColorPreset, ColorSource, ImageRegistry, Material, ShadeContext};
use crate::uniforms::{UniformBlock, UniformKind, UniformLayout};

const NAMESPACE: Namespace = Namespace {
    tag: "Background",
    id: 0,
};

/// Rayleigh and Mie scale heights, planet and atmosphere radii (meters).
const HR: f32 = 7994.0;
const HM: f32 = 1200.0;
const EARTH_RADIUS: f32 = 6360e3;
const ATMOSPHERE_RADIUS: f32 = 6420e3;
const BETA_R: Vec3 = Vec3::new(3.8e-6, 13.5e-6, 33.1e-6);
const BETA_M: f32 = 21e-6;
const MIE_EXTINCTION: f32 = 1.1;
const MIE_G: f32 = 0.76;
const VIEW_SAMPLES: u32 = 16;
const LIGHT_SAMPLES: u32 = 8;
const ATMOSPHERE_GAIN: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundPreset {
    GroundPlane = 0,
    CornellYellowBlue = 1,
    CornellRedGreen = 2,
    None = 3,
}

impl BackgroundPreset {
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::GroundPlane),
            1 => Some(Self::CornellYellowBlue),
            2 => Some(Self::CornellRedGreen),
            3 => Some(Self::None),
            _ => None,
        }
    }

    pub fn is_cornell(self) -> bool {
        matches!(self, Self::CornellYellowBlue | Self::CornellRedGreen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sky {
    Color(Vec3),
    /// Equirectangular image id
    Image(u32),
}

/// A background surface hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundHit {
    pub t: f32,
    pub normal: Vec3,
    pub uv: Vec2,
    pub inside: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Background {
    pub preset: BackgroundPreset,
    pub sky: Sky,
    pub sky_multiplier: f32,
    pub atmosphere: bool,
    pub ground_height: f32,
    #[serde(skip)]
    pub material: Material,
}

impl Default for Background {
    fn default() -> Self {
        Self::new(BackgroundPreset::CornellYellowBlue)
    }
}

impl Background {
    pub fn new(preset: BackgroundPreset) -> Self {
        let color = match preset {
            BackgroundPreset::GroundPlane => ColorSource::Preset(ColorPreset::Grid),
            BackgroundPreset::CornellYellowBlue => ColorSource::Preset(ColorPreset::CornellYellowBlue),
            BackgroundPreset::CornellRedGreen => ColorSource::Preset(ColorPreset::CornellRedGreen),
            BackgroundPreset::None => ColorSource::Constant(Vec3::splat(0.75)),
        };
        Self {
            preset,
            sky: Sky::Color(Vec3::new(0.8, 0.9, 1.0)),
            sky_multiplier: 1.0,
            atmosphere: false,
            ground_height: -1.0,
            material: Material::new("background", Closure::Diffuse, Vec3::splat(0.75)).with_color(color),
        }
    }

    /// Rebuild the surface material after deserializing a preset.
    pub fn restore_material(&mut self) {
        self.material = Self::new(self.preset).material;
    }

    pub fn namespace(&self) -> Namespace {
        NAMESPACE
    }

    pub fn images(&self) -> Vec<u32> {
        let mut ids = self.material.images();
        if let Sky::Image(id) = self.sky {
            ids.push(id);
        }
        ids
    }

    pub fn push_uniforms(&self, layout: &mut UniformLayout) {
        if self.atmosphere {
            layout.push(NAMESPACE.name("sun"), UniformKind::Vec4);
        }
    }

    /// `sun` is the first light's normalized intensity before filtering.
    pub fn write_uniforms(&self, block: &mut UniformBlock<'_>, sun: Vec3) -> TracerResult<()> {
        if self.atmosphere {
            block.set_vec3(&NAMESPACE.name("sun"), sun)?;
        }
        Ok(())
    }

    // ---- code emission ----

    /// Runs right after `t` is reset, before any object.
    pub fn wgsl_intersect(&self) -> String {
        match self.preset {
            p if p.is_cornell() => "    let tRoom = intersectCube(origin, ray, vec3<f32>(-1.0), vec3<f32>(1.0));
    if (tRoom.x < tRoom.y && tRoom.y > 0.0) {
        t = tRoom.y;
    }"
            .to_string(),
            BackgroundPreset::GroundPlane => format!(
                "    let tGround = intersectGround(origin, ray, {});
    if (tGround > 0.0) {{
        t = tGround;
    }}",
                float(self.ground_height)
            ),
            _ => String::new(),
        }
    }

    /// The background's `else if` branch, or nothing without a surface.
    pub fn wgsl_shade(&self, ctx: &ShadeContext<'_>) -> String {
        let head = match self.preset {
            p if p.is_cornell() => "    } else if (t == tRoom.y) {
        let room = normalForBox(hit, vec3<f32>(-1.0), vec3<f32>(1.0));
        normal = -room.normal;
        normal2 = normal;
        uv = room.uv;
        inside = false;"
                .to_string(),
            BackgroundPreset::GroundPlane => format!(
                "    }} else if (t == tGround) {{
        uv = vec2<f32>(hit.x, -hit.z);
        normal = vec3<f32>(0.0, 1.0, 0.0);
        normal2 = normal;
        inside = origin.y < {};",
                float(self.ground_height)
            ),
            _ => return String::new(),
        };
        format!("{head}\n{}", self.material.wgsl_shade(ctx))
    }

    /// Radiance picked up by an escaping path.
    pub fn wgsl_sky(&self) -> String {
        if self.preset.is_cornell() {
            return String::new();
        }
        let mult = float(self.sky_multiplier);
        match self.sky {
            Sky::Image(id) => format!(
                "            ray = normalize(ray);
            uv = vec2<f32>(0.5 + atan2(ray.z, ray.x) / TWO_PI, asin(ray.y) / PI - 0.5);
            accumulatedColor += colorMask * textureSampleLevel(imgTex{id}, imageSampler, uv, 0.0).rgb * {mult};"
            ),
            Sky::Color(_) if self.atmosphere => String::new(),
            Sky::Color(c) => format!("            accumulatedColor += colorMask * {} * {mult};", vec3(c)),
        }
    }

    /// Single scattering along the segment to `t`, lit by `to_sun`.
    pub fn wgsl_atmosphere(&self, to_sun: &str) -> String {
        if !self.atmosphere {
            return String::new();
        }
        let (br, bm) = (vec3(BETA_R), float(BETA_M * MIE_EXTINCTION));
        format!(
            "    {{
        let toSun = {to_sun};
        let betaR = {br};
        let betaM = vec3<f32>({beta_m});
        var sumR = vec3<f32>(0.0);
        var sumM = vec3<f32>(0.0);
        var opticalDepthR = 0.0;
        var opticalDepthM = 0.0;
        let nray = ray / lray;
        let mu = dot(nray, toSun);
        let phaseR = 3.0 / (16.0 * PI) * (1.0 + mu * mu);
        let g = {g};
        let denom = 1.0 + g * g - 2.0 * g * mu;
        let phaseM = 3.0 / (8.0 * PI) * ((1.0 - g * g) * (1.0 + mu * mu)) / ((2.0 + g * g) * denom * sqrt(denom));
        let earthCenter = vec3<f32>(origin.x, {center_y}, origin.z);
        let ts = intersectSphere(origin, nray, earthCenter, {ra});
        let dist = min(t * lray, ts);
        let stride = dist / {view};
        for (var i = 0; i < {view_samples}; i++) {{
            let jitter = random(vec3<f32>(151.7242, 14.098, 92.3421), u.timeSinceStart.x + f32(i) / {view});
            let samplePos = origin + nray * (stride * (f32(i) + jitter));
            let Lshad = shadow(samplePos, toSun * INFINITY);
            let height = distance(samplePos, earthCenter) - {re};
            let hr = exp(-height / {hr}) * stride;
            let hm = exp(-height / {hm}) * stride;
            opticalDepthR += hr;
            opticalDepthM += hm;
            let Lstride = intersectSphere(samplePos, toSun, earthCenter, {ra}) / {light};
            var lightR = 0.0;
            var lightM = 0.0;
            let jitter2 = random(vec3<f32>(72.1231, 16.621, 85.3212), u.timeSinceStart.x + f32(i) / {view});
            for (var j = 0; j < {light_samples}; j++) {{
                let lightPos = samplePos + toSun * (Lstride * (f32(j) + jitter2));
                let heightLight = distance(lightPos, earthCenter) - {re};
                lightR += exp(-heightLight / {hr}) * Lstride;
                lightM += exp(-heightLight / {hm}) * Lstride;
            }}
            let tau = betaR * (opticalDepthR + lightR) + betaM * (opticalDepthM + lightM);
            let attenuation = exp(-tau) * Lshad;
            sumR += attenuation * hr;
            sumM += attenuation * hm;
        }}
        accumulatedColor += {sun}.xyz * colorMask * (sumR * betaR * phaseR + sumM * {beta_raw} * phaseM) * {gain};
        colorMask *= exp(-(betaR * opticalDepthR + betaM * opticalDepthM));
    }}",
            beta_m = bm,
            g = float(MIE_G),
            center_y = float(-EARTH_RADIUS + self.ground_height),
            ra = float(ATMOSPHERE_RADIUS),
            re = float(EARTH_RADIUS),
            hr = float(HR),
            hm = float(HM),
            view = float(VIEW_SAMPLES as f32),
            view_samples = VIEW_SAMPLES,
            light = float(LIGHT_SAMPLES as f32),
            light_samples = LIGHT_SAMPLES,
            sun = NAMESPACE.uniform("sun"),
            beta_raw = float(BETA_M),
            gain = float(ATMOSPHERE_GAIN),
        )
    }

    // ---- host mirror ----

    pub fn hit(&self, origin: Vec3, ray: Vec3) -> Option<BackgroundHit> {
        match self.preset {
            p if p.is_cornell() => {
                let range = intersect_cube(origin, ray, Vec3::NEG_ONE, Vec3::ONE);
                if !(range.x < range.y && range.y > 0.0) {
                    return None;
                }
                let (normal, uv) = normal_for_box(origin + ray * range.y, Vec3::NEG_ONE, Vec3::ONE);
                Some(BackgroundHit {
                    t: range.y,
                    normal: -normal,
                    uv,
                    inside: false,
                })
            }
            BackgroundPreset::GroundPlane => {
                let t = intersect_ground(origin, ray, self.ground_height);
                if !(t > 0.0) {
                    return None;
                }
                let hit = origin + ray * t;
                Some(BackgroundHit {
                    t,
                    normal: Vec3::Y,
                    uv: Vec2::new(hit.x, -hit.z),
                    inside: origin.y < self.ground_height,
                })
            }
            _ => None,
        }
    }

    pub fn sky(&self, ray: Vec3, images: &ImageRegistry) -> Vec3 {
        if self.preset.is_cornell() {
            return Vec3::ZERO;
        }
        match self.sky {
            Sky::Image(id) => {
                let ray = ray.normalize();
                let uv = Vec2::new(
                    0.5 + ray.z.atan2(ray.x) / std::f32::consts::TAU,
                    ray.y.asin() / std::f32::consts::PI - 0.5,
                );
                sample_image(images, id, uv).truncate() * self.sky_multiplier
            }
            Sky::Color(_) if self.atmosphere => Vec3::ZERO,
            Sky::Color(c) => c * self.sky_multiplier,
        }
    }

    fn earth_center(&self, origin: Vec3) -> Vec3 {
        Vec3::new(origin.x, -EARTH_RADIUS + self.ground_height, origin.z)
    }

    fn density(&self, p: Vec3, center: Vec3) -> (f32, f32) {
        let height = p.distance(center) - EARTH_RADIUS;
        ((-height / HR).exp(), (-height / HM).exp())
    }

    /// Sun transmittance from the ground at the origin along `to_sun`.
    ///
    /// Light intensities are multiplied by this when the atmosphere is on,
    /// so surfaces see the same reddened sun as the sky.
    pub fn filter_light(&self, to_sun: Vec3) -> Vec3 {
        let to_sun = to_sun.normalize_or(Vec3::Y);
        let start = Vec3::new(0.0, self.ground_height, 0.0);
        let center = self.earth_center(start);
        let length = intersect_sphere(start, to_sun, center, ATMOSPHERE_RADIUS).unwrap_or(0.0);
        let samples = 32;
        let stride = length / samples as f32;
        let (r, m) = (0..samples).fold((0.0, 0.0), |(r, m), i| {
            let (hr, hm) = self.density(start + to_sun * stride * (i as f32 + 0.5), center);
            (r + hr * stride, m + hm * stride)
        });
        (-(BETA_R * r + Vec3::splat(BETA_M * MIE_EXTINCTION) * m)).exp()
    }

    /// Host mirror of [`Background::wgsl_atmosphere`].
    #[allow(clippy::too_many_arguments)]
    pub fn atmosphere(
        &self,
        origin: Vec3,
        ray: Vec3,
        t: f32,
        sun: &LightSample,
        hit: Vec3,
        rng: &mut StdRng,
        shadow: &dyn Fn(Vec3, Vec3) -> f32,
        mask: &mut Vec3,
        radiance: &mut Vec3,
    ) {
        if !self.atmosphere {
            return;
        }
        let to_sun = sun.to_light_normal(hit);
        let lray = ray.length();
        let nray = ray / lray;
        let mu = nray.dot(to_sun);
        let phase_r = 3.0 / (16.0 * std::f32::consts::PI) * (1.0 + mu * mu);
        let g = MIE_G;
        let denom = 1.0 + g * g - 2.0 * g * mu;
        let phase_m = 3.0 / (8.0 * std::f32::consts::PI) * ((1.0 - g * g) * (1.0 + mu * mu))
            / ((2.0 + g * g) * denom * denom.sqrt());
        let center = self.earth_center(origin);
        let beta_m = Vec3::splat(BETA_M * MIE_EXTINCTION);
        let ts = intersect_sphere(origin, nray, center, ATMOSPHERE_RADIUS).unwrap_or(crate::emit::INFINITY);
        let dist = (t * lray).min(ts);
        let stride = dist / VIEW_SAMPLES as f32;

        let (mut sum_r, mut sum_m) = (Vec3::ZERO, Vec3::ZERO);
        let (mut depth_r, mut depth_m) = (0.0, 0.0);
        for i in 0..VIEW_SAMPLES {
            let pos = origin + nray * (stride * (i as f32 + rng.gen::<f32>()));
            let lshad = shadow(pos, to_sun * crate::emit::INFINITY);
            let (dr, dm) = self.density(pos, center);
            let (hr, hm) = (dr * stride, dm * stride);
            depth_r += hr;
            depth_m += hm;
            let lstride = intersect_sphere(pos, to_sun, center, ATMOSPHERE_RADIUS)
                .unwrap_or(0.0)
                / LIGHT_SAMPLES as f32;
            let jitter: f32 = rng.gen();
            let (light_r, light_m) = (0..LIGHT_SAMPLES).fold((0.0, 0.0), |(r, m), j| {
                let (dr, dm) = self.density(pos + to_sun * (lstride * (j as f32 + jitter)), center);
                (r + dr * lstride, m + dm * lstride)
            });
            let tau = BETA_R * (depth_r + light_r) + beta_m * (depth_m + light_m);
            let attenuation = (-tau).exp() * lshad;
            sum_r += attenuation * hr;
            sum_m += attenuation * hm;
        }
        *radiance += sun.intensity
            * *mask
            * (sum_r * BETA_R * phase_r + sum_m * BETA_M * phase_m)
            * ATMOSPHERE_GAIN;
        *mask *= (-(BETA_R * depth_r + beta_m * depth_m)).exp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::LightKind;
    use rand::SeedableRng;

    fn context() -> ShadeContext<'static> {
        ShadeContext {
            object: NAMESPACE,
            material: Namespace::new("Material", 0),
            transformed: false,
            lights: &[],
        }
    }

    #[test]
    fn test_room_hit_faces_inward() {
        let bg = Background::new(BackgroundPreset::CornellRedGreen);
        let hit = bg.hit(Vec3::ZERO, Vec3::new(-1.0, 0.1, 0.2)).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-5);
        assert_eq!(hit.normal, Vec3::X);
        assert_eq!(bg.sky(Vec3::Y, &ImageRegistry::new()), Vec3::ZERO);
        assert!(bg.wgsl_sky().is_empty());
    }

    #[test]
    fn test_ground_plane() {
        let bg = Background::new(BackgroundPreset::GroundPlane);
        let hit = bg.hit(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -1.0, 1.0)).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-6);
        assert!((hit.uv - Vec2::new(0.0, -2.0)).length() < 1e-6);
        assert!(bg.hit(Vec3::ZERO, Vec3::Y).is_none());
        let sky = bg.sky(Vec3::Y, &ImageRegistry::new());
        assert!((sky - Vec3::new(0.8, 0.9, 1.0)).length() < 1e-6);
        assert!(bg.wgsl_shade(&context()).contains("} else if (t == tGround) {"));
    }

    #[test]
    fn test_empty_background() {
        let bg = Background::new(BackgroundPreset::None);
        assert!(bg.hit(Vec3::ZERO, Vec3::NEG_Y).is_none());
        assert!(bg.wgsl_intersect().is_empty());
        assert!(bg.wgsl_shade(&context()).is_empty());
        assert!(bg.wgsl_sky().contains("vec3<f32>(0.8, 0.9, 1.0)"));
    }

    #[test]
    fn test_filter_light_reddens_low_sun() {
        let bg = Background::new(BackgroundPreset::GroundPlane);
        let noon = bg.filter_light(Vec3::Y);
        let dusk = bg.filter_light(Vec3::new(1.0, 0.02, 0.0));
        assert!(noon.x > dusk.x);
        // Blue scatters out faster than red
        assert!(dusk.z < dusk.x);
        assert!(noon.x < 1.0 && noon.x > 0.8);
    }

    #[test]
    fn test_atmosphere_scatters_sky_light() {
        let mut bg = Background::new(BackgroundPreset::None);
        bg.atmosphere = true;
        assert!(bg.wgsl_sky().is_empty());
        assert!(bg.wgsl_atmosphere("normalize(light1)").contains("u.sunBackground0.xyz"));
        let sun = LightSample {
            kind: LightKind::Directional,
            position: Vec3::new(0.0, 1.0, 0.3).normalize(),
            intensity: Vec3::ONE,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let mut mask = Vec3::ONE;
        let mut radiance = Vec3::ZERO;
        bg.atmosphere(
            Vec3::ZERO,
            Vec3::new(1.0, 0.05, 0.0),
            crate::emit::INFINITY,
            &sun,
            Vec3::ZERO,
            &mut rng,
            &|_, _| 1.0,
            &mut mask,
            &mut radiance,
        );
        // A horizontal view through the sky is blue-tinted and dims throughput
        assert!(radiance.z > radiance.x);
        assert!(mask.x < 1.0);
    }
}
