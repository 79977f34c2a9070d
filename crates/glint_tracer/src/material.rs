//! Surface materials and their closure code.
//!
//! A material is compiled into straight-line WGSL inside the shade branch of
//! every object that uses it. The branch runs, in order: the normal map
//! (with optional parallax), the color source, the closure, and ambient
//! occlusion. Closures that are not purely specular paste one direct-light
//! block per scene light.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use glint_core::Texture;
use serde::{Deserialize, Serialize};

use crate::emit::{float, vec3, Namespace};
use crate::light::BoundLight;

/// Image textures by id, shared by materials and objects.
pub type ImageRegistry = BTreeMap<u32, Texture>;

/// Host-side color function of hit point and uv.
pub type HostColor = Arc<dyn Fn(Vec3, Vec2) -> Vec3 + Send + Sync>;

/// Produces color code for the object whose branch it lands in.
pub type ColorGenerator = Arc<dyn Fn(&Namespace) -> String + Send + Sync>;

/// Index into a scene's material registry.
pub type MaterialId = usize;

/// Per-bounce seed shared by every closure.
const SEED: &str = "u.timeSinceStart.x + f32(bounce)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Closure {
    Diffuse = 0,
    Mirror = 1,
    Glossy = 2,
    Glass = 3,
    Smooth = 4,
    Bubble = 5,
    Emissive = 6,
}

impl Closure {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Closures whose objects must report back-face hits.
    pub fn is_two_sided(self) -> bool {
        matches!(self, Closure::Glass | Closure::Bubble)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPreset {
    /// Ground-plane grid lines
    Grid,
    CornellYellowBlue,
    CornellRedGreen,
}

impl ColorPreset {
    pub fn wgsl(self) -> String {
        match self {
            ColorPreset::Grid => "        surfaceColor = vec3<f32>(0.65);
        if (fract(uv.x + 0.025) < 0.05 || fract(uv.y + 0.025) < 0.05) {
            surfaceColor = vec3<f32>(0.76);
        } else if (fract(uv.x * 5.0 + 0.025) < 0.05 || fract(uv.y * 5.0 + 0.025) < 0.05) {
            surfaceColor = vec3<f32>(0.7);
        }"
            .to_string(),
            ColorPreset::CornellYellowBlue | ColorPreset::CornellRedGreen => {
                let (left, right) = self.walls();
                format!(
                    "        if (hit.x < -1.0 + EPSILON) {{
            surfaceColor = {};
        }} else if (hit.x > 1.0 - EPSILON) {{
            surfaceColor = {};
        }}",
                    vec3(left),
                    vec3(right)
                )
            }
        }
    }

    fn walls(self) -> (Vec3, Vec3) {
        match self {
            ColorPreset::CornellRedGreen => (Vec3::new(1.0, 0.3, 0.1), Vec3::new(0.3, 1.0, 0.1)),
            _ => (Vec3::new(0.1, 0.5, 1.0), Vec3::new(1.0, 0.9, 0.1)),
        }
    }

    pub fn host(self, hit: Vec3, uv: Vec2) -> Vec3 {
        let line = |v: f32, k: f32| (v * k + 0.025).rem_euclid(1.0) < 0.05;
        match self {
            ColorPreset::Grid => {
                if line(uv.x, 1.0) || line(uv.y, 1.0) {
                    Vec3::splat(0.76)
                } else if line(uv.x, 5.0) || line(uv.y, 5.0) {
                    Vec3::splat(0.7)
                } else {
                    Vec3::splat(0.65)
                }
            }
            _ => {
                let (left, right) = self.walls();
                if hit.x < -1.0 + crate::library::EPSILON {
                    left
                } else if hit.x > 1.0 - crate::library::EPSILON {
                    right
                } else {
                    Vec3::splat(0.75)
                }
            }
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSource {
    Constant(Vec3),
    /// Image id, sampled at `uv * texture_scale`
    Texture(u32),
    /// WGSL statements assigning `surfaceColor`
    Code {
        wgsl: String,
        #[serde(skip)]
        host: Option<HostColor>,
    },
    #[serde(skip)]
    Generator(ColorGenerator),
    Preset(ColorPreset),
}

impl fmt::Debug for ColorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorSource::Constant(c) => f.debug_tuple("Constant").field(c).finish(),
            ColorSource::Texture(id) => f.debug_tuple("Texture").field(id).finish(),
            ColorSource::Code { wgsl, host } => f
                .debug_struct("Code")
                .field("wgsl", wgsl)
                .field("host", &host.is_some())
                .finish(),
            ColorSource::Generator(_) => f.write_str("Generator"),
            ColorSource::Preset(p) => f.debug_tuple("Preset").field(p).finish(),
        }
    }
}

/// Where a map layer reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapSource {
    Image(u32),
    /// A `vec4<f32>` expression in `uv`
    Code(String),
}

impl MapSource {
    fn wgsl_body(&self) -> String {
        match self {
            MapSource::Image(id) => format!("textureSampleLevel(imgTex{id}, imageSampler, uv, 0.0)"),
            MapSource::Code(code) => code.clone(),
        }
    }

    pub fn image_id(&self) -> Option<u32> {
        match self {
            MapSource::Image(id) => Some(*id),
            MapSource::Code(_) => None,
        }
    }

    /// Code maps read as a flat normal on the host.
    pub fn host(&self, images: &ImageRegistry, uv: Vec2) -> Vec4 {
        match self {
            MapSource::Image(id) => sample_image(images, *id, uv),
            MapSource::Code(_) => Vec4::new(0.5, 0.5, 1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallaxKind {
    /// Red channel is height above the surface
    Height,
    /// Red channel is depth below it
    Depth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parallax {
    pub kind: ParallaxKind,
    pub map: MapSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapLayers {
    pub normal: Option<MapSource>,
    pub parallax: Option<Parallax>,
    pub ambient_occlusion: Option<MapSource>,
    pub roughness: Option<MapSource>,
}

impl MapLayers {
    fn named(&self) -> impl Iterator<Item = (&'static str, &MapSource)> {
        [
            ("Normal", self.normal.as_ref()),
            ("Parallax", self.parallax.as_ref().map(|p| &p.map)),
            ("Occlusion", self.ambient_occlusion.as_ref()),
            ("Roughness", self.roughness.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, map)| map.map(|m| (role, m)))
    }
}

/// Everything a shade branch needs beyond the material itself.
pub struct ShadeContext<'a> {
    /// The object the branch shades
    pub object: Namespace,
    /// This material's registry namespace, used for map functions
    pub material: Namespace,
    /// Whether the object has `transform`/`transformInv` uniforms
    pub transformed: bool,
    pub lights: &'a [BoundLight],
}

impl ShadeContext<'_> {
    fn lambertian(&self) -> String {
        self.lights
            .iter()
            .map(|l| l.light.wgsl_lambertian(&l.ns))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn specular(&self) -> String {
        self.lights
            .iter()
            .map(|l| l.light.wgsl_specular(&l.ns))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub name: String,
    pub closure: Closure,
    pub color: ColorSource,
    pub maps: MapLayers,
    pub ior: f32,
    /// Absorption per unit distance inside dielectrics
    pub concentration: f32,
    /// Emission strength
    pub intensity: f32,
    /// Adds emission on top of a non-emissive closure
    pub emissive: bool,
    pub glossiness: f32,
    pub texture_scale: f32,
    /// Soap-film thickness in nanometers
    pub film_width: f32,
    pub iridescent: bool,
    pub height_samples: u32,
    pub height_multiplier: f32,
    pub height_offset: f32,
    pub normal_strength: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            closure: Closure::Diffuse,
            color: ColorSource::Constant(Vec3::splat(0.75)),
            maps: MapLayers::default(),
            ior: 1.5,
            concentration: 0.5,
            intensity: 3.0,
            emissive: false,
            glossiness: 0.6,
            texture_scale: 1.0,
            film_width: 1000.0,
            iridescent: false,
            height_samples: 5,
            height_multiplier: 0.05,
            height_offset: 1.0,
            normal_strength: 1.0,
        }
    }
}

/// Sample an image, white when the id is unknown.
pub fn sample_image(images: &ImageRegistry, id: u32, uv: Vec2) -> Vec4 {
    images.get(&id).map_or(Vec4::ONE, |t| t.sample(uv))
}

impl Material {
    pub fn new(name: impl Into<String>, closure: Closure, color: Vec3) -> Self {
        Self {
            name: name.into(),
            closure,
            color: ColorSource::Constant(color),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: ColorSource) -> Self {
        self.color = color;
        self
    }

    /// Image ids this material samples.
    pub fn images(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.maps.named().filter_map(|(_, m)| m.image_id()).collect();
        if let ColorSource::Texture(id) = self.color {
            ids.push(id);
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn map_call(&self, ctx: &ShadeContext<'_>, role: &str, uv: &str) -> String {
        format!("{}({uv})", ctx.material.name(&format!("sample{role}")))
    }

    /// One `sample<Role>Material<n>(uv)` function per map layer.
    pub fn wgsl_global(&self, ns: &Namespace) -> String {
        self.maps
            .named()
            .map(|(role, map)| {
                format!(
                    "fn {}(uv: vec2<f32>) -> vec4<f32> {{\n    return {};\n}}",
                    ns.name(&format!("sample{role}")),
                    map.wgsl_body()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The body of a shade branch.
    pub fn wgsl_shade(&self, ctx: &ShadeContext<'_>) -> String {
        [
            self.wgsl_normals(ctx),
            self.wgsl_color(ctx),
            self.wgsl_closure(ctx),
            self.wgsl_occlusion(ctx),
        ]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
    }

    fn scaled_uv(&self) -> String {
        if self.texture_scale == 1.0 {
            "uv".to_string()
        } else {
            format!("uv * {}", float(self.texture_scale))
        }
    }

    fn wgsl_color(&self, ctx: &ShadeContext<'_>) -> String {
        match &self.color {
            ColorSource::Constant(c) => format!("        surfaceColor = {};", vec3(*c)),
            ColorSource::Texture(id) => format!(
                "        surfaceColor = textureSampleLevel(imgTex{id}, imageSampler, {}, 0.0).rgb;",
                self.scaled_uv()
            ),
            ColorSource::Code { wgsl, .. } => wgsl.clone(),
            ColorSource::Generator(generate) => generate(&ctx.object),
            ColorSource::Preset(preset) => preset.wgsl(),
        }
    }

    fn wgsl_normals(&self, ctx: &ShadeContext<'_>) -> String {
        if self.maps.normal.is_none() && self.maps.parallax.is_none() {
            return String::new();
        }
        let inv = ctx.object.uniform("transformInv");
        let mut out = String::from(
            "        let n2 = normalize(normal2);
        var tangent = cross(n2, vec3<f32>(0.0, 0.0, 1.0));
        if (length(tangent) < EPSILON) {
            tangent = vec3<f32>(1.0, 0.0, 0.0);
        }
        tangent = normalize(tangent);
        let binormal = normalize(cross(n2, tangent));
        let TBN = mat3x3<f32>(tangent, binormal, n2);\n",
        );
        if let Some(parallax) = &self.maps.parallax {
            out.push_str(&self.wgsl_parallax(ctx, parallax, &inv));
        }
        if self.maps.normal.is_some() {
            let sample = self.map_call(ctx, "Normal", &self.scaled_uv());
            out.push_str(&format!("        var mappedNormal = {sample}.rgb * 2.0 - 1.0;\n"));
            if self.normal_strength != 1.0 {
                let s = float(self.normal_strength);
                out.push_str(&format!(
                    "        mappedNormal = normalize(mappedNormal * vec3<f32>({s}, {s}, 1.0));\n"
                ));
            }
            out.push_str("        mappedNormal = normalize(TBN * mappedNormal);\n");
            if ctx.transformed {
                out.push_str(&format!(
                    "        mappedNormal = normalize((transpose({inv}) * vec4<f32>(mappedNormal, 0.0)).xyz);\n"
                ));
            }
            out.push_str(
                "        if (dot(normalize(ray), mappedNormal) <= 0.0) {\n            normal = mappedNormal;\n        }",
            );
        }
        out
    }

    fn wgsl_parallax(&self, ctx: &ShadeContext<'_>, parallax: &Parallax, inv: &str) -> String {
        let local_ray = if ctx.transformed {
            format!("normalize(({inv} * vec4<f32>(normalize(ray), 0.0)).xyz)")
        } else {
            "normalize(ray)".to_string()
        };
        let scale = float(self.texture_scale);
        let depth_at = |uv: &str| {
            let sample = self.map_call(ctx, "Parallax", uv);
            match parallax.kind {
                ParallaxKind::Height => format!("(1.0 - {sample}.r)"),
                ParallaxKind::Depth => format!("select({sample}.r, 1.0 - {sample}.r, inside)"),
            }
        };
        let start = match parallax.kind {
            ParallaxKind::Height => format!("        uv = uv + p * {};\n", float(self.height_offset)),
            ParallaxKind::Depth => "        if (inside) {\n            p = -p;\n            uv += p;\n        }\n".to_string(),
        };
        format!(
            "        let viewDir = normalize(transpose(TBN) * {local_ray});
        let layerDepth = 1.0 / {layers};
        var cdepth = 0.0;
        var p = viewDir.xy / viewDir.z * {mult};
{start}        p = p * layerDepth;
        var cheight = {first};
        for (var layer = 0; layer < {samples}; layer++) {{
            uv -= p;
            cheight = {first};
            cdepth += layerDepth;
            if (cdepth > cheight) {{
                break;
            }}
        }}
        let afterDepth = cheight - cdepth;
        let beforeDepth = {before} - cdepth + layerDepth;
        let weight = afterDepth / (afterDepth - beforeDepth);
        uv = (uv + p) * weight + uv * (1.0 - weight);\n",
            layers = float(self.height_samples as f32),
            mult = float(self.height_multiplier),
            samples = self.height_samples,
            first = depth_at(&format!("uv * {scale}")),
            before = depth_at(&format!("uv * {scale} + p")),
        )
    }

    fn wgsl_occlusion(&self, ctx: &ShadeContext<'_>) -> String {
        if self.maps.ambient_occlusion.is_none() {
            return String::new();
        }
        format!(
            "        colorMask *= {}.b;",
            self.map_call(ctx, "Occlusion", &self.scaled_uv())
        )
    }

    fn wgsl_emission(&self) -> String {
        if self.emissive {
            format!(
                "        accumulatedColor += colorMask * surfaceColor * {};\n",
                float(self.intensity)
            )
        } else {
            String::new()
        }
    }

    fn wgsl_emissive_extinction(&self) -> String {
        if self.emissive {
            format!(
                "select(surfaceColor * {} * {}, vec3<f32>(0.0), inside)",
                float(self.intensity),
                float(self.concentration)
            )
        } else {
            "vec3<f32>(0.0)".to_string()
        }
    }

    fn wgsl_glossiness(&self, ctx: &ShadeContext<'_>) -> String {
        match self.maps.roughness {
            Some(_) => format!(
                "{} * (1.0 - {}.r)",
                float(self.glossiness),
                self.map_call(ctx, "Roughness", &self.scaled_uv())
            ),
            None => float(self.glossiness),
        }
    }

    fn wgsl_diffuse(&self, ctx: &ShadeContext<'_>) -> String {
        format!(
            "        ray = cosineWeightedDirection({SEED}, normal);
        colorMask *= surfaceColor;
{lights}
        origin = hit + ray * EPSILON;
{emission}        lightUp2 = true;
        lightUp1 = false;
        reducebounce += 1;",
            lights = ctx.lambertian(),
            emission = self.wgsl_emission(),
        )
    }

    /// Reflect about `normal`, add highlights and move the origin.
    fn wgsl_reflect(&self, ctx: &ShadeContext<'_>) -> String {
        format!(
            "        ray = normalize(reflect(ray, normal));
{lights}
        origin = hit + ray * EPSILON;",
            lights = ctx.specular()
        )
    }

    fn wgsl_coin(&self) -> String {
        format!(
            "        let kr = fresnel(ray, normal, {}, 1.0);
        let coin = random(vec3<f32>(241.2234, 87.4223, 23.4567), {SEED});",
            float(self.ior)
        )
    }

    fn wgsl_closure(&self, ctx: &ShadeContext<'_>) -> String {
        let flip = "        if (dot(ray, normal) > 0.0) {\n            normal = -normal;\n        }";
        let ior = float(self.ior);
        match self.closure {
            Closure::Diffuse => self.wgsl_diffuse(ctx),
            Closure::Mirror => format!(
                "        ray = normalize(ray);
{flip}
        let kr = fresnel(ray, normal, {ior}, 1.0);
        ray = normalize(reflect(ray, normal));
        colorMask *= vec3<f32>(1.0) - (vec3<f32>(1.0) - surfaceColor) * (1.0 - kr);
{lights}
        origin = hit + ray * EPSILON;
{emission}        if (lightUp2) {{
            lightUp1 = true;
        }}",
                lights = ctx.specular(),
                emission = self.wgsl_emission(),
            ),
            Closure::Glossy => format!(
                "        ray = normalize(reflect(ray, normal)) + uniformlyRandomVector({SEED}) * {gloss};
        colorMask *= surfaceColor;
{lights}
        origin = hit + ray * EPSILON;
{emission}        lightUp2 = true;
        lightUp1 = false;
        reducebounce += 1;",
                gloss = self.wgsl_glossiness(ctx),
                lights = ctx.lambertian(),
                emission = self.wgsl_emission(),
            ),
            Closure::Smooth => format!(
                "        ray = normalize(ray);
{flip}
{coin}
        if (coin < kr) {{
{reflect}
            if (lightUp2) {{
                lightUp1 = true;
            }}
        }} else {{
{diffuse}
        }}",
                coin = self.wgsl_coin(),
                reflect = self.wgsl_reflect(ctx),
                diffuse = self.wgsl_diffuse(ctx),
            ),
            Closure::Glass => format!(
                "        ray = normalize(ray);
{coin}
        if (coin < kr) {{
{flip}
{reflect}
        }} else {{
            ray = normalize(refraction(ray, normal, {ior}, 1.0));
            origin = hit + ray * EPSILON;
            extinctionColor = select((vec3<f32>(1.0) - surfaceColor) * {concentration}, vec3<f32>(0.0), inside);
            emissiveExtinctionColor = {emissive};
            iorA = select({ior}, 1.0, inside);
            reducebounce -= 1;
        }}
        if (lightUp2) {{
            lightUp1 = true;
        }}",
                coin = self.wgsl_coin(),
                reflect = self.wgsl_reflect(ctx),
                concentration = float(self.concentration),
                emissive = self.wgsl_emissive_extinction(),
            ),
            Closure::Bubble => format!(
                "        ray = normalize(ray);
{flip}
{coin}
        if (coin < kr) {{
{tint}{reflect}
        }} else {{
            origin = hit + ray * EPSILON;
            emissiveExtinctionColor = {emissive};
            iorA = select({ior}, 1.0, inside);
            reducebounce -= 1;
        }}",
                coin = self.wgsl_coin(),
                tint = if self.iridescent {
                    format!(
                        "            colorMask *= iridescence(ray, normal, {ior}, {});\n",
                        float(self.film_width)
                    )
                } else {
                    String::new()
                },
                reflect = self.wgsl_reflect(ctx),
                emissive = self.wgsl_emissive_extinction(),
            ),
            Closure::Emissive => format!(
                "        accumulatedColor += colorMask * surfaceColor * {};\n        break;",
                float(self.intensity)
            ),
        }
    }

    /// Host color at a hit; procedural code without a host closure falls
    /// back to mid grey.
    pub fn host_color(&self, images: &ImageRegistry, hit: Vec3, uv: Vec2) -> Vec3 {
        match &self.color {
            ColorSource::Constant(c) => *c,
            ColorSource::Texture(id) => sample_image(images, *id, uv * self.texture_scale).truncate(),
            ColorSource::Code { host: Some(f), .. } => f(hit, uv),
            ColorSource::Code { host: None, .. } | ColorSource::Generator(_) => Vec3::splat(0.75),
            ColorSource::Preset(preset) => preset.host(hit, uv),
        }
    }

    pub fn host_glossiness(&self, images: &ImageRegistry, uv: Vec2) -> f32 {
        match &self.maps.roughness {
            Some(map) => self.glossiness * (1.0 - map.host(images, uv * self.texture_scale).x),
            None => self.glossiness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::Light;

    fn context(lights: &[BoundLight]) -> ShadeContext<'_> {
        ShadeContext {
            object: Namespace::new("Sphere", 3),
            material: Namespace::new("Material", 1),
            transformed: true,
            lights,
        }
    }

    fn lights() -> Vec<BoundLight> {
        vec![
            BoundLight::new(Namespace::new("Light", 1), Light::default()),
            BoundLight::new(Namespace::new("Light", 2), Light::default()),
        ]
    }

    #[test]
    fn test_diffuse_pastes_one_block_per_light() {
        let lights = lights();
        let code = Material::default().wgsl_shade(&context(&lights));
        assert!(code.contains("cosineWeightedDirection("));
        assert!(code.contains("toLight1"));
        assert!(code.contains("toLight2"));
        assert!(code.contains("reducebounce += 1;"));
        assert!(code.find("surfaceColor =").unwrap() < code.find("ray =").unwrap());
    }

    #[test]
    fn test_mirror_uses_specular_blocks_only() {
        let lights = lights();
        let mirror = Material::new("m", Closure::Mirror, Vec3::ONE);
        let code = mirror.wgsl_shade(&context(&lights));
        assert!(code.contains("specularHighlight1"));
        assert!(!code.contains("diffuse1"));
        assert!(!code.contains("reducebounce"));
    }

    #[test]
    fn test_glass_tracks_extinction() {
        let glass = Material::new("g", Closure::Glass, Vec3::new(0.9, 0.9, 1.0));
        let code = glass.wgsl_shade(&context(&[]));
        assert!(code.contains("refraction(ray, normal, 1.5, 1.0)"));
        assert!(code.contains("extinctionColor = select("));
        assert!(code.contains("reducebounce -= 1;"));
        assert!(Closure::Glass.is_two_sided());
        assert!(!Closure::Mirror.is_two_sided());
    }

    #[test]
    fn test_emissive_terminates() {
        let light = Material::new("e", Closure::Emissive, Vec3::ONE);
        assert!(light.wgsl_shade(&context(&[])).trim_end().ends_with("break;"));
    }

    #[test]
    fn test_maps_emit_functions_and_order() {
        let mut mat = Material::default();
        mat.maps.normal = Some(MapSource::Image(4));
        mat.maps.ambient_occlusion = Some(MapSource::Code("vec4<f32>(1.0, 1.0, 0.5, 1.0)".into()));
        let ns = Namespace::new("Material", 1);
        let global = mat.wgsl_global(&ns);
        assert!(global.contains("fn sampleNormalMaterial1(uv: vec2<f32>)"));
        assert!(global.contains("imgTex4"));
        assert!(global.contains("fn sampleOcclusionMaterial1"));

        let code = mat.wgsl_shade(&context(&[]));
        let normals = code.find("TBN").unwrap();
        let color = code.find("surfaceColor =").unwrap();
        let occlusion = code.find("colorMask *= sampleOcclusionMaterial1").unwrap();
        assert!(normals < color && color < occlusion);
        assert!(code.contains("transpose(u.transformInvSphere3)"));
        assert_eq!(mat.images(), vec![4]);
    }

    #[test]
    fn test_generator_receives_object_namespace() {
        let generator: ColorGenerator =
            Arc::new(|ns: &Namespace| format!("        surfaceColor = {}.xyz;", ns.uniform("min")));
        let mat = Material::default().with_color(ColorSource::Generator(generator));
        assert!(mat.wgsl_shade(&context(&[])).contains("surfaceColor = u.minSphere3.xyz;"));
    }

    #[test]
    fn test_preset_host_matches_walls() {
        let preset = ColorPreset::CornellRedGreen;
        assert_eq!(preset.host(Vec3::new(-1.0, 0.0, 0.0), Vec2::ZERO), Vec3::new(1.0, 0.3, 0.1));
        assert_eq!(preset.host(Vec3::ZERO, Vec2::ZERO), Vec3::splat(0.75));
        assert_eq!(ColorPreset::Grid.host(Vec3::ZERO, Vec2::new(0.5, 0.5)), Vec3::splat(0.65));
        assert_eq!(ColorPreset::Grid.host(Vec3::ZERO, Vec2::new(0.0, 0.5)), Vec3::splat(0.76));
    }
}
