//! Point and directional lights.
//!
//! Lights have no surface. Each one contributes a per-sample position
//! (`light{id}`, jittered inside a ball of radius `size` for soft shadows), a
//! direct-lighting block that every non-specular closure pastes in, and the
//! caustic boost applied after a diffuse-then-specular path.

use glam::Vec3;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::emit::{float, Namespace};
use crate::error::TracerResult;
use crate::library::uniformly_random_vector;
use crate::uniforms::{UniformBlock, UniformKind, UniformLayout};

/// Large distance standing in for a directional light's position.
const DIRECTIONAL_DISTANCE: f32 = crate::emit::INFINITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    Point,
    Directional,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Light {
    pub kind: LightKind,
    /// Position for point lights, direction towards the light otherwise
    pub position: Vec3,
    pub intensity: Vec3,
    /// Jitter radius, also the width of the caustic boost
    pub size: f32,
    pub caustic: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            position: Vec3::new(0.4, 0.5, -0.6),
            intensity: Vec3::splat(0.5),
            size: 0.1,
            caustic: 1.5,
        }
    }
}

/// A scene light with the namespace its uniforms and locals use.
#[derive(Debug, Clone)]
pub struct BoundLight {
    pub ns: Namespace,
    pub light: Light,
}

impl BoundLight {
    pub fn new(ns: Namespace, light: Light) -> Self {
        Self { ns, light }
    }
}

/// `0.5 * Σ bounceLight^i` over `i < bounces / 2`.
///
/// Dividing a light's intensity by this keeps scenes at a similar
/// brightness whatever the bounce count.
pub fn intensity_normalization(bounces: u32, bounce_light: f32) -> f32 {
    let terms = bounces.div_ceil(2).max(1);
    0.5 * (0..terms).map(|i| bounce_light.powi(i as i32)).sum::<f32>()
}

/// One frame's jittered light position with its effective intensity, as
/// the host integrator sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    pub kind: LightKind,
    pub position: Vec3,
    pub intensity: Vec3,
}

impl LightSample {
    pub fn to_light(&self, hit: Vec3) -> Vec3 {
        match self.kind {
            LightKind::Point => self.position - hit,
            LightKind::Directional => self.position * DIRECTIONAL_DISTANCE,
        }
    }

    pub fn to_light_normal(&self, from: Vec3) -> Vec3 {
        match self.kind {
            LightKind::Point => (self.position - from).normalize_or_zero(),
            LightKind::Directional => self.position.normalize_or_zero(),
        }
    }
}

impl Light {
    pub fn point(position: Vec3, intensity: f32) -> Self {
        Self {
            position,
            intensity: Vec3::splat(intensity),
            ..Default::default()
        }
    }

    pub fn directional(direction: Vec3, intensity: f32, size: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            position: direction,
            intensity: Vec3::splat(intensity),
            size,
            ..Default::default()
        }
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
    }

    /// Intensity after per-bounce normalization and atmospheric filtering.
    pub fn effective_intensity(&self, bounces: u32, bounce_light: f32, filter: Vec3) -> Vec3 {
        self.intensity / intensity_normalization(bounces, bounce_light) * filter
    }

    /// Unjittered direction or position, as uploaded.
    pub fn uniform_position(&self) -> Vec3 {
        match self.kind {
            LightKind::Point => self.position,
            LightKind::Directional => self.position.normalize_or_zero(),
        }
    }

    pub fn push_uniforms(&self, ns: &Namespace, layout: &mut UniformLayout) {
        layout.push(ns.name("ulight"), UniformKind::Vec4);
        layout.push(ns.name("intensity"), UniformKind::Vec4);
    }

    pub fn write_uniforms(
        &self,
        ns: &Namespace,
        block: &mut UniformBlock<'_>,
        intensity: Vec3,
    ) -> TracerResult<()> {
        block.set_vec4(&ns.name("ulight"), self.position.extend(self.size))?;
        block.set_vec3(&ns.name("intensity"), intensity)
    }

    /// `let light{id} = ...;` at the top of the integrator.
    pub fn wgsl_setup(&self, ns: &Namespace) -> String {
        let base = match self.kind {
            LightKind::Point => format!("{}.xyz", ns.uniform("ulight")),
            LightKind::Directional => format!("normalize({}.xyz)", ns.uniform("ulight")),
        };
        let shift = if self.size > 0.0 {
            format!(
                " + uniformlyRandomVector(u.timeSinceStart.x - 53.0) * {}",
                float(self.size)
            )
        } else {
            String::new()
        };
        format!("    let {} = {base}{shift};", ns.name("light"))
    }

    /// Unnormalized vector from `hit` to the light sample.
    pub fn wgsl_to_light(&self, ns: &Namespace) -> String {
        match self.kind {
            LightKind::Point => format!("{} - hit", ns.name("light")),
            LightKind::Directional => format!("{} * INFINITY", ns.name("light")),
        }
    }

    pub fn wgsl_to_light_normal(&self, ns: &Namespace, from: &str) -> String {
        match self.kind {
            LightKind::Point => format!("normalize({} - {from})", ns.name("light")),
            LightKind::Directional => format!("normalize({})", ns.name("light")),
        }
    }

    pub fn wgsl_intensity(&self, ns: &Namespace) -> String {
        format!("{}.xyz", ns.uniform("intensity"))
    }

    pub fn wgsl_lambertian(&self, ns: &Namespace) -> String {
        let id = ns.id;
        format!(
            "        {{
            let toLight{id} = {to_light};
            let diffuse{id} = max(0.0, dot(normalize(toLight{id}), normal));
            let shadowIntensity{id} = shadow(hit + normal * EPSILON, toLight{id});
            accumulatedColor += colorMask * ({intensity} * diffuse{id} * shadowIntensity{id});
        }}",
            to_light = self.wgsl_to_light(ns),
            intensity = self.wgsl_intensity(ns),
        )
    }

    pub fn wgsl_specular(&self, ns: &Namespace) -> String {
        let id = ns.id;
        format!(
            "        {{
            let toLight{id} = {to_light};
            let reflectedLight{id} = normalize(reflect(normalize(toLight{id}), normalize(normal)));
            let specularHighlight{id} = 2.0 * pow(max(0.0, dot(reflectedLight{id}, normalize(hit - origin))), 20.0);
            let shadowIntensity{id} = shadow(hit + normal * EPSILON, toLight{id});
            accumulatedColor += colorMask * {intensity} * specularHighlight{id} * shadowIntensity{id};
        }}",
            to_light = self.wgsl_to_light(ns),
            intensity = self.wgsl_intensity(ns),
        )
    }

    fn falloff(&self, dist: &str) -> String {
        let size = float(self.size);
        format!(
            "{} * {size} / ({dist} + 2.0 * {size} * sqrt({dist}) + {})",
            float(self.caustic),
            float(self.size * self.size)
        )
    }

    /// Caustic boost near a point light, evaluated after each intersection.
    pub fn wgsl_caustic(&self, ns: &Namespace) -> String {
        if self.kind != LightKind::Point || self.size <= 0.0 {
            return String::new();
        }
        let id = ns.id;
        format!(
            "        if (lightUp1 && lightUp2) {{
            let dist{id} = rayDistPoint(origin, ray, {ulight}.xyz);
            if (dist{id}.y > 0.0) {{
                let Lshad{id} = shadow(origin, ray * dist{id}.y);
                accumulatedColor += colorMask * {intensity} * {falloff} * Lshad{id};
            }}
        }}",
            ulight = ns.uniform("ulight"),
            intensity = self.wgsl_intensity(ns),
            falloff = self.falloff(&format!("dist{id}.x")),
        )
    }

    /// Caustic boost for a directional light, evaluated when a path escapes.
    pub fn wgsl_escape_caustic(&self, ns: &Namespace) -> String {
        if self.kind != LightKind::Directional || self.size <= 0.0 {
            return String::new();
        }
        let id = ns.id;
        format!(
            "            if (lightUp1 && lightUp2) {{
                let toL{id} = normalize(ray) - normalize({ulight}.xyz);
                let distL{id} = dot(toL{id}, toL{id});
                accumulatedColor += colorMask * {intensity} * {falloff};
            }}",
            ulight = ns.uniform("ulight"),
            intensity = self.wgsl_intensity(ns),
            falloff = self.falloff(&format!("distL{id}")),
        )
    }

    /// Host mirror of [`Light::wgsl_setup`].
    pub fn sample_position(&self, rng: &mut StdRng) -> Vec3 {
        let shift = if self.size > 0.0 {
            uniformly_random_vector(rng) * self.size
        } else {
            Vec3::ZERO
        };
        self.uniform_position() + shift
    }

    /// Draw this frame's position, paired with an already normalized
    /// intensity.
    pub fn sample(&self, rng: &mut StdRng, intensity: Vec3) -> LightSample {
        LightSample {
            kind: self.kind,
            position: self.sample_position(rng),
            intensity,
        }
    }

    /// The caustic falloff for a squared distance.
    pub fn caustic_falloff(&self, dist: f32) -> f32 {
        self.caustic * self.size / (dist + 2.0 * self.size * dist.sqrt() + self.size * self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        // One bounce keeps a single 0.5 term
        assert!((intensity_normalization(1, 0.5) - 0.5).abs() < 1e-6);
        // Six bounces: 0.5 * (1 + 0.5 + 0.25)
        assert!((intensity_normalization(6, 0.5) - 0.875).abs() < 1e-6);
        let light = Light::point(Vec3::ZERO, 0.5);
        let i = light.effective_intensity(1, 0.5, Vec3::ONE);
        assert!((i.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_setup_jitter_only_with_size() {
        let ns = Namespace::new("Light", 4);
        let mut light = Light::point(Vec3::ONE, 1.0);
        assert!(light.wgsl_setup(&ns).contains("uniformlyRandomVector"));
        light.size = 0.0;
        assert_eq!(light.wgsl_setup(&ns), "    let lightLight4 = u.ulightLight4.xyz;");
        assert!(light.wgsl_caustic(&ns).is_empty());
    }

    #[test]
    fn test_directional_to_light() {
        let ns = Namespace::new("Light", 2);
        let light = Light::directional(Vec3::new(0.0, 2.0, 0.0), 1.0, 0.02);
        assert!(light.wgsl_setup(&ns).contains("normalize(u.ulightLight2.xyz)"));
        assert_eq!(light.wgsl_to_light(&ns), "lightLight2 * INFINITY");
        assert!(light.wgsl_caustic(&ns).is_empty());
        assert!(light.wgsl_escape_caustic(&ns).contains("distL2"));
        assert_eq!(light.uniform_position(), Vec3::Y);
    }

    #[test]
    fn test_blocks_are_scoped() {
        let ns = Namespace::new("Light", 7);
        let light = Light::default();
        let block = light.wgsl_lambertian(&ns);
        assert!(block.trim_start().starts_with('{'));
        assert!(block.contains("shadow(hit + normal * EPSILON, toLight7)"));
        assert!(light.wgsl_specular(&ns).contains("pow("));
    }
}
