//! Shared intersection and shading library.
//!
//! `SOURCE` is pasted verbatim into every synthesized program. The functions
//! below are the host mirrors the CPU reference integrator runs, kept
//! formula-for-formula with their WGSL counterparts. Random sampling is the
//! one deliberate difference: the host draws from a per-pixel `StdRng`
//! instead of the fragment-coordinate hash.

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3};
use rand::{rngs::StdRng, Rng};

pub const SOURCE: &str = include_str!("shaders/library.wgsl");

/// Ray offset and degenerate-determinant threshold.
pub const EPSILON: f32 = 1.0e-4;

/// A hit in the local frame of the object that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub t: f32,
    pub normal: Vec3,
    pub uv: Vec2,
    pub inside: bool,
}

impl SurfaceHit {
    pub fn new(t: f32, normal: Vec3, uv: Vec2, inside: bool) -> Self {
        Self {
            t,
            normal,
            uv,
            inside,
        }
    }
}

/// Ray parameter where `origin + ray * t` crosses the plane `y = height`.
pub fn intersect_ground(origin: Vec3, ray: Vec3, height: f32) -> f32 {
    (height - origin.y) / ray.y
}

/// `(tNear, tFar)` of a slab test; a miss has `tNear > tFar`.
pub fn intersect_cube(origin: Vec3, ray: Vec3, min: Vec3, max: Vec3) -> Vec2 {
    let t_min = (min - origin) / ray;
    let t_max = (max - origin) / ray;
    let t1 = t_min.min(t_max);
    let t2 = t_min.max(t_max);
    Vec2::new(t1.max_element(), t2.min_element())
}

pub fn normal_for_box(hit: Vec3, min: Vec3, max: Vec3) -> (Vec3, Vec2) {
    let p = (hit - min) / (max - min);
    if hit.x < min.x + EPSILON {
        (Vec3::NEG_X, Vec2::new(p.y, 1.0 - p.z))
    } else if hit.x > max.x - EPSILON {
        (Vec3::X, Vec2::new(1.0 - p.y, 1.0 - p.z))
    } else if hit.y < min.y + EPSILON {
        (Vec3::NEG_Y, Vec2::new(1.0 - p.x, 1.0 - p.z))
    } else if hit.y > max.y - EPSILON {
        (Vec3::Y, Vec2::new(p.x, 1.0 - p.z))
    } else if hit.z < min.z + EPSILON {
        (Vec3::NEG_Z, Vec2::new(p.x, 1.0 - p.y))
    } else {
        (Vec3::Z, Vec2::new(p.x, p.y))
    }
}

pub fn sphere_uv(p: Vec3) -> Vec2 {
    Vec2::new(
        0.5 + p.z.atan2(p.x) / TAU,
        p.y.clamp(-1.0, 1.0).asin() / PI - 0.5,
    )
}

/// Nearest positive distance to a sphere, `None` on a miss.
pub fn intersect_sphere(origin: Vec3, ray: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_sphere = origin - center;
    let a = ray.dot(ray);
    let b = 2.0 * to_sphere.dot(ray);
    let c = to_sphere.dot(to_sphere) - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant <= 0.0 {
        return None;
    }
    let s = discriminant.sqrt();
    [(-b - s) / (2.0 * a), (-b + s) / (2.0 * a)]
        .into_iter()
        .find(|&t| t > 0.0)
}

/// Barycentric triangle hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub inside: bool,
}

/// Möller–Trumbore; culled triangles reject back faces.
pub fn intersect_triangle(
    origin: Vec3,
    dir: Vec3,
    [v0, v1, v2]: [Vec3; 3],
    t_max: f32,
    two_sided: bool,
) -> Option<TriangleHit> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if (two_sided && det.abs() < EPSILON) || (!two_sided && det < EPSILON) {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t < 0.0 || t > t_max {
        return None;
    }
    Some(TriangleHit {
        t,
        u,
        v,
        inside: det < 0.0,
    })
}

pub fn intersect_volume(origin: Vec3, ray: Vec3, min: Vec3, max: Vec3) -> f32 {
    let range = intersect_cube(origin, ray, min, max);
    if range.x > range.y || range.y < 0.0 {
        -1.0
    } else {
        range.x.max(0.0)
    }
}

pub fn intersect_volume2(origin: Vec3, ray: Vec3, min: Vec3, max: Vec3) -> Vec2 {
    intersect_cube(origin, ray, min, max).max(Vec2::ZERO)
}

pub fn phase_hg(a: Vec3, b: Vec3, g: f32) -> f32 {
    let denom = 1.0 + g * g - 2.0 * g * a.dot(b);
    (1.0 / (4.0 * PI)) * (1.0 - g * g) / (denom * denom.sqrt())
}

/// Squared closest-approach distance to `point` and the ray parameter there.
pub fn ray_dist_point(origin: Vec3, ray: Vec3, point: Vec3) -> (f32, f32) {
    let to_point = origin - point;
    let a = ray.dot(ray);
    let b = to_point.dot(ray);
    let c = to_point.dot(to_point);
    (c - b * b / a, -b / a)
}

pub fn refraction(i: Vec3, n: Vec3, ior: f32, ior2: f32) -> Vec3 {
    let mut cosi = i.dot(n).clamp(-1.0, 1.0);
    let (mut etai, mut etat, mut normal) = (ior2, ior, n);
    if cosi < 0.0 {
        cosi = -cosi;
    } else {
        std::mem::swap(&mut etai, &mut etat);
        normal = -n;
    }
    let eta = etai / etat;
    let k = 1.0 - eta * eta * (1.0 - cosi * cosi);
    if k < 0.0 {
        Vec3::ZERO
    } else {
        eta * i + (eta * cosi - k.sqrt()) * normal
    }
}

pub fn fresnel(i: Vec3, n: Vec3, ior: f32, ior2: f32) -> f32 {
    let cosi = i.dot(n).clamp(-1.0, 1.0);
    let (etai, etat) = if cosi > 0.0 { (ior, ior2) } else { (ior2, ior) };
    let sint = etai / etat * (1.0 - cosi * cosi).max(0.0).sqrt();
    if sint >= 1.0 {
        return 1.0;
    }
    let cost = (1.0 - sint * sint).max(0.0).sqrt();
    let cosi = cosi.abs();
    let rs = (etat * cosi - etai * cost) / (etat * cosi + etai * cost);
    let rp = (etai * cosi - etat * cost) / (etai * cosi + etat * cost);
    (rs * rs + rp * rp) / 2.0
}

pub fn iridescence(ray: Vec3, normal: Vec3, ior: f32, film_width: f32) -> Vec3 {
    let cosi = ray.dot(normal).abs();
    let sint2 = (1.0 - cosi * cosi) / (ior * ior);
    let opd = 2.0 * ior * film_width * (1.0 - sint2).max(0.0).sqrt();
    let phase = |wavelength: f32| 0.5 - 0.5 * (TAU * opd / wavelength).cos();
    Vec3::new(phase(650.0), phase(510.0), phase(475.0))
}

pub fn cosine_weighted_direction(rng: &mut StdRng, normal: Vec3) -> Vec3 {
    let u: f32 = rng.gen();
    let v: f32 = rng.gen();
    let r = u.sqrt();
    let angle = TAU * v;
    let sdir = if normal.x.abs() < 0.5 {
        normal.cross(Vec3::X)
    } else {
        normal.cross(Vec3::Y)
    }
    .normalize();
    let tdir = normal.cross(sdir);
    r * angle.cos() * sdir + r * angle.sin() * tdir + (1.0 - u).sqrt() * normal
}

pub fn uniformly_random_direction(rng: &mut StdRng) -> Vec3 {
    let z = 1.0 - 2.0 * rng.gen::<f32>();
    let r = (1.0 - z * z).max(0.0).sqrt();
    let angle = TAU * rng.gen::<f32>();
    Vec3::new(r * angle.cos(), r * angle.sin(), z)
}

/// Uniform point inside the unit ball.
pub fn uniformly_random_vector(rng: &mut StdRng) -> Vec3 {
    uniformly_random_direction(rng) * rng.gen::<f32>().sqrt()
}
