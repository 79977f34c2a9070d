//! Heightfield terrain, ray-marched against a mip mosaic in world space.
//!
//! The mosaic's level `i` covers `2^i` times the ground width of level 0,
//! centered on the origin. A ground position picks the finest level that
//! still contains it. Heights are decoded exactly from the Terrarium bytes
//! with `textureLoad`; color and normals are filtered.

use glam::{Vec2, Vec3};
use glint_core::terrain::decode_terrarium;
use glint_core::{TerrainMosaic, Texture};
use glint_math::Aabb;

use super::WorldHit;
use crate::emit::{float, Namespace, INFINITY};

/// Image ids the mosaic's three rasters are registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainImages {
    pub color: u32,
    pub elevation: u32,
    pub normal: u32,
}

/// March limits for the closest-hit and the any-hit searches.
struct March {
    planck: f32,
    min_jump: f32,
    jump_factor: f32,
    base: f32,
    steps: u32,
}

const CLOSEST: March = March {
    planck: 0.01,
    min_jump: 0.1,
    jump_factor: 0.03,
    base: 0.2,
    steps: 128,
};

const ANY: March = March {
    planck: 0.02,
    min_jump: 0.2,
    jump_factor: 0.06,
    base: 0.25,
    steps: 64,
};

/// Farthest march distance, in units of `scalar`.
const MAX_MARCH: f32 = 2000.0;

pub struct TerrainMap {
    mosaic: TerrainMosaic,
    images: TerrainImages,
    /// Ground datum subtracted from every height, in meters
    pub elevation: f32,
    /// March scale; distances are divided by it before stepping
    pub scalar: f32,
    height_range: (f32, f32),
}

impl std::fmt::Debug for TerrainMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainMap")
            .field("mips", &self.mosaic.mips)
            .field("tile_size", &self.mosaic.tile_size)
            .field("images", &self.images)
            .finish()
    }
}

impl TerrainMap {
    pub fn new(mosaic: TerrainMosaic, images: TerrainImages, elevation: f32, scalar: f32) -> Self {
        let height_range = glint_core::terrain::decode_elevations(&mosaic.elevation)
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        let height_range = if height_range.0 <= height_range.1 {
            (height_range.0 as f32, height_range.1 as f32)
        } else {
            (0.0, 0.0)
        };
        Self {
            mosaic,
            images,
            elevation,
            scalar: if scalar > 0.0 { scalar } else { 1.0 },
            height_range,
        }
    }

    pub fn images(&self) -> TerrainImages {
        self.images
    }

    /// The three rasters with the ids they bind under.
    pub fn textures(&self) -> [(u32, &Texture); 3] {
        [
            (self.images.color, &self.mosaic.color),
            (self.images.elevation, &self.mosaic.elevation),
            (self.images.normal, &self.mosaic.normal),
        ]
    }

    fn mips(&self) -> f32 {
        self.mosaic.mips.max(1) as f32
    }

    /// Level-0 ground width in march units.
    fn tile_size(&self) -> f32 {
        self.mosaic.tile_size as f32 / self.scalar
    }

    /// Horizontal extent of the coarsest level and the decoded height range.
    pub fn bounds(&self) -> Aabb {
        let half = self.mosaic.tile_size as f32 * 2f32.powi(self.mips() as i32 - 1) / 2.0;
        let (lo, hi) = self.height_range;
        Aabb::new(
            Vec3::new(-half, lo - self.elevation, -half),
            Vec3::new(half, hi - self.elevation, half),
        )
        .padded(0.01)
    }

    // ---- host mirror ----

    /// Mosaic coordinates of a ground position in march units.
    fn mosaic_uv(&self, p: Vec2) -> Option<Vec2> {
        let uv = p / self.tile_size() * 4.0;
        let level = uv.abs().max_element().log2().max(0.0).floor();
        if level >= self.mips() {
            return None;
        }
        let uv = uv / 2f32.powf(level + 2.0) + Vec2::splat(0.5);
        Some(Vec2::new((uv.x + level) / self.mips(), uv.y))
    }

    /// Height above the datum in march units; far below everything off the
    /// mosaic.
    fn height(&self, p: Vec2) -> f32 {
        let Some(uv) = self.mosaic_uv(p) else {
            return -INFINITY;
        };
        let tex = &self.mosaic.elevation;
        let size = Vec2::new(tex.width as f32, tex.height as f32);
        let texel = (uv * size).floor().clamp(Vec2::ZERO, size - Vec2::ONE);
        let [r, g, b, _] = tex.fetch(texel.x as u32, texel.y as u32);
        (decode_terrarium(r, g, b) as f32 - self.elevation) / self.scalar
    }

    fn march(&self, ray: Vec3, origin: Vec3, max_t: f32) -> f32 {
        let m = self.scalar;
        let origin = origin / m;
        let limit = MAX_MARCH.min(max_t / m);
        let mut min_d = INFINITY;
        let mut min_t = 0.0;
        let mut t = CLOSEST.planck;
        for _ in 0..CLOSEST.steps {
            let samp = origin + ray * t;
            let d = samp.y - self.height(Vec2::new(samp.x, samp.z));
            if t > limit {
                return -1.0;
            } else if d.abs() < CLOSEST.planck * t * 0.1 {
                return t * m;
            } else if d < min_d {
                min_d = d;
                min_t = t;
            }
            t += d * (CLOSEST.base + t * CLOSEST.jump_factor + CLOSEST.min_jump);
        }
        min_t * m
    }

    /// Closest terrain hit nearer than `t_max`, in units of `ray`.
    pub fn hit(&self, origin: Vec3, ray: Vec3, t_max: f32) -> Option<WorldHit> {
        let lray = ray.length();
        let t = self.march(ray / lray, origin, t_max * lray) / lray;
        if !(t > 0.0 && t < t_max) {
            return None;
        }
        let hit = origin + ray * t;
        let uv = self
            .mosaic_uv(Vec2::new(hit.x, hit.z) / self.scalar)
            .unwrap_or(Vec2::splat(-1.0));
        let n = self.mosaic.normal.sample(uv);
        let normal = (Vec3::new(n.x, n.z, n.y) * 2.0 - Vec3::ONE).normalize_or(Vec3::Y);
        Some(WorldHit {
            t,
            normal,
            local_normal: normal,
            uv,
            inside: false,
        })
    }

    /// Whether anything of the terrain lies along `ray`, however far.
    pub fn occludes(&self, origin: Vec3, ray: Vec3) -> bool {
        let ray = ray.normalize();
        let origin = origin / self.scalar;
        let mut t = ANY.planck;
        for _ in 0..ANY.steps {
            let samp = origin + ray * t;
            let d = samp.y - self.height(Vec2::new(samp.x, samp.z));
            if d < ANY.planck * t * 0.1 {
                return true;
            } else if t > MAX_MARCH {
                return false;
            }
            t += d * (ANY.base + t * ANY.jump_factor + ANY.min_jump);
        }
        true
    }

    // ---- code emission ----

    fn march_step(march: &March) -> String {
        format!(
            "d * ({} + t * {} + {})",
            float(march.base),
            float(march.jump_factor),
            float(march.min_jump)
        )
    }

    /// Mosaic lookup, height decode, both marches and the normal fetch.
    pub fn wgsl_global(&self, ns: &Namespace) -> String {
        let m = float(self.scalar);
        let mips = float(self.mips());
        let elev = self.images.elevation;
        let uv_fn = ns.name("uv");
        let height_fn = ns.name("height");
        format!(
            "fn {uv_fn}(p: vec2<f32>) -> vec2<f32> {{
    var uv = p / {ts} * 4.0;
    let sz = floor(max(log2(max(abs(uv.x), abs(uv.y))), 0.0));
    if (sz >= {mips}) {{
        return vec2<f32>(-1.0);
    }}
    uv = uv / pow(2.0, sz + 2.0) + vec2<f32>(0.5);
    return vec2<f32>((uv.x + sz) / {mips}, uv.y);
}}

fn {height_fn}(p: vec2<f32>) -> f32 {{
    let uv = {uv_fn}(p);
    if (uv.x < 0.0) {{
        return -INFINITY;
    }}
    let size = vec2<i32>(textureDimensions(imgTex{elev}));
    let texel = clamp(vec2<i32>(uv * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
    let d = floor(textureLoad(imgTex{elev}, texel, 0).rgb * 255.0 + 0.5);
    return (d.r * 256.0 + d.g + d.b / 256.0 - 32768.0 - {datum}) / {m};
}}

fn {intersect}(ray: vec3<f32>, start: vec3<f32>, maxT: f32) -> f32 {{
    let origin = start / {m};
    let limit = min({max_march}, maxT / {m});
    var minD = INFINITY;
    var minT = 0.0;
    var t = {planck};
    for (var i = 0; i < {steps}; i++) {{
        let samp = origin + ray * t;
        let d = samp.y - {height_fn}(samp.xz);
        if (t > limit) {{
            return -1.0;
        }} else if (abs(d) < {planck} * t * 0.1) {{
            return t * {m};
        }} else if (d < minD) {{
            minD = d;
            minT = t;
        }}
        t += {step};
    }}
    return minT * {m};
}}

fn {any}(ray: vec3<f32>, start: vec3<f32>) -> bool {{
    let origin = start / {m};
    var t = {any_planck};
    for (var i = 0; i < {any_steps}; i++) {{
        let samp = origin + ray * t;
        let d = samp.y - {height_fn}(samp.xz);
        if (d < {any_planck} * t * 0.1) {{
            return true;
        }} else if (t > {max_march}) {{
            return false;
        }}
        t += {any_step};
    }}
    return true;
}}",
            ts = float(self.tile_size()),
            datum = float(self.elevation),
            intersect = ns.name("intersect"),
            any = ns.name("doesIntersect"),
            max_march = float(MAX_MARCH),
            planck = float(CLOSEST.planck),
            steps = CLOSEST.steps,
            step = Self::march_step(&CLOSEST),
            any_planck = float(ANY.planck),
            any_steps = ANY.steps,
            any_step = Self::march_step(&ANY),
        )
    }

    pub fn wgsl_intersect(&self, ns: &Namespace) -> String {
        let t = ns.name("t");
        format!(
            "    let {t} = {f}(ray / lray, origin, t * lray) / lray;
    if ({t} > 0.0 && {t} < t) {{
        t = {t};
    }}",
            f = ns.name("intersect"),
        )
    }

    pub fn wgsl_shade(&self, ns: &Namespace, body: &str) -> String {
        format!(
            "    }} else if (t == {t}) {{
        uv = {uv_fn}(hit.xz / {m});
        normal = normalize(textureSampleLevel(imgTex{normal}, imageSampler, uv, 0.0).xzy * 2.0 - vec3<f32>(1.0));
        normal2 = normal;
        inside = false;
{body}",
            t = ns.name("t"),
            uv_fn = ns.name("uv"),
            m = float(self.scalar),
            normal = self.images.normal,
        )
    }

    pub fn wgsl_shadow(&self, ns: &Namespace) -> String {
        format!(
            "    if ({}(ray / lray, origin)) {{\n        return 0.0;\n    }}",
            ns.name("doesIntersect")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::terrain::encode_terrarium;
    use glint_core::texture::Filter;

    const IMAGES: TerrainImages = TerrainImages {
        color: 1,
        elevation: 2,
        normal: 3,
    };

    /// A flat plateau at `height` meters, `mips` levels of 8×8 texels.
    fn flat(height: f64, mips: u32) -> TerrainMap {
        let size = 8;
        let mosaic = TerrainMosaic {
            elevation: Texture::from_fn(size * mips, size, |_, _| encode_terrarium(height))
                .with_filter(Filter::Nearest),
            color: Texture::from_fn(size * mips, size, |_, _| [90, 140, 60, 255]),
            normal: Texture::from_fn(size * mips, size, |_, _| [128, 128, 255, 255]),
            tile_size: 1000.0,
            mips,
        };
        TerrainMap::new(mosaic, IMAGES, 0.0, 1.0)
    }

    #[test]
    fn test_levels_by_distance() {
        let terrain = flat(100.0, 2);
        // The origin lands in the middle of level 0
        let uv = terrain.mosaic_uv(Vec2::ZERO).unwrap();
        assert!((uv - Vec2::new(0.25, 0.5)).length() < 1e-6);
        // 750 m out is past level 0's half-width of 500 m
        let uv = terrain.mosaic_uv(Vec2::new(750.0, 0.0)).unwrap();
        assert!(uv.x > 0.5);
        // Level 1 spans 2000 m, so 1100 m is off the mosaic
        assert!(terrain.mosaic_uv(Vec2::new(1100.0, 0.0)).is_none());
        assert!(terrain.height(Vec2::new(1100.0, 0.0)) < -1.0e6);
    }

    #[test]
    fn test_bounds_cover_plateau() {
        let terrain = flat(100.0, 2);
        let bounds = terrain.bounds();
        assert!((bounds.max.x - 1000.01).abs() < 1e-2);
        assert!(bounds.contains_point(Vec3::new(0.0, 100.0, 0.0), 1e-3));
    }

    #[test]
    fn test_march_finds_plateau() {
        let terrain = flat(100.0, 1);
        let hit = terrain
            .hit(Vec3::new(0.0, 150.0, 0.0), Vec3::new(0.0, -2.0, 0.0), f32::INFINITY)
            .unwrap();
        // 50 m down along a ray of length 2
        assert!((hit.t - 25.0).abs() < 0.05, "t = {}", hit.t);
        assert!((hit.normal - Vec3::Y).length() < 0.02);
        assert!(!hit.inside);

        let oblique = Vec3::new(0.3, -1.0, 0.2);
        let hit = terrain.hit(Vec3::new(0.0, 150.0, 0.0), oblique, f32::INFINITY).unwrap();
        let p = Vec3::new(0.0, 150.0, 0.0) + oblique * hit.t;
        assert!((p.y - 100.0).abs() < 0.2, "p = {p}");
    }

    #[test]
    fn test_march_respects_limits() {
        let terrain = flat(100.0, 1);
        let up = terrain.hit(Vec3::new(0.0, 150.0, 0.0), Vec3::Y, f32::INFINITY);
        assert!(up.is_none());
        // Closer hit already found at 20 m
        let blocked = terrain.hit(Vec3::new(0.0, 150.0, 0.0), Vec3::NEG_Y, 20.0);
        assert!(blocked.is_none());
    }

    #[test]
    fn test_occlusion() {
        let terrain = flat(100.0, 1);
        assert!(terrain.occludes(Vec3::new(0.0, 150.0, 0.0), Vec3::NEG_Y));
        assert!(!terrain.occludes(Vec3::new(0.0, 150.0, 0.0), Vec3::new(0.1, 1.0, 0.0)));
    }

    #[test]
    fn test_code_is_namespaced() {
        let terrain = flat(100.0, 3);
        let ns = Namespace::new("TerrainMap", 5);
        let global = terrain.wgsl_global(&ns);
        assert!(global.contains("fn uvTerrainMap5(p: vec2<f32>)"));
        assert!(global.contains("fn intersectTerrainMap5(ray: vec3<f32>"));
        assert!(global.contains("fn doesIntersectTerrainMap5("));
        assert!(global.contains("textureLoad(imgTex2, texel, 0)"));
        assert!(global.contains("if (sz >= 3.0)"));
        assert!(terrain.wgsl_intersect(&ns).contains("let tTerrainMap5 = intersectTerrainMap5("));
        assert!(terrain.wgsl_shade(&ns, "").contains("imgTex3"));
        assert!(terrain.wgsl_shadow(&ns).contains("doesIntersectTerrainMap5(ray / lray, origin)"));
    }
}
