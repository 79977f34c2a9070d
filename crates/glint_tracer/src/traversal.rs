//! Stackless traversal of a flattened BVH.
//!
//! The walk keeps only a node index and one of three states, so the same
//! loop runs in WGSL with no recursion and no stack. [`traverse`] is the
//! host version, reading the encoded buffers exactly as the shader does.
//! [`brute_force`] is the oracle both are checked against.

use glam::{Vec2, Vec3};

use crate::bvh::{MeshBuffers, MeshBvh};
use crate::emit::INFINITY;
use crate::library::{intersect_triangle, SurfaceHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FromParent,
    FromSibling,
    FromChild,
}

/// Closest triangle hit, in reordered triangle slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshHit {
    pub t: f32,
    pub triangle: u32,
    pub barycentric: Vec2,
    pub inside: bool,
}

fn corners(buffers: &MeshBuffers, k: u32) -> [Vec3; 3] {
    [0, 1, 2].map(|c| buffers.positions.decode_host(buffers.triangles.decode_index(k, c), 0))
}

fn test_triangle(
    buffers: &MeshBuffers,
    k: u32,
    origin: Vec3,
    dir: Vec3,
    best: &mut Option<MeshHit>,
    two_sided: bool,
) {
    let t_max = best.map_or(INFINITY, |b| b.t);
    if let Some(hit) = intersect_triangle(origin, dir, corners(buffers, k), t_max, two_sided) {
        *best = Some(MeshHit {
            t: hit.t,
            triangle: k,
            barycentric: Vec2::new(hit.u, hit.v),
            inside: hit.inside,
        });
    }
}

/// Which child of `parent` the ray reaches first.
fn near_far(bvh: &MeshBvh, parent: u32, origin: Vec3) -> (u32, u32) {
    let split = bvh.buffers.node_bounds.decode_host(parent, 2);
    let axis = (split.x + 0.5) as usize;
    let first = parent + 1;
    let second = bvh.buffers.nodes.decode_index(parent, 2);
    if origin[axis.min(2)] < split.y {
        (second, first)
    } else {
        (first, second)
    }
}

/// Host traversal over the encoded buffers, bounded like the shader loop.
pub fn traverse(bvh: &MeshBvh, origin: Vec3, dir: Vec3, two_sided: bool) -> Option<MeshHit> {
    if bvh.is_empty() {
        return None;
    }
    let buffers = &bvh.buffers;
    let inv = dir.recip();
    let mut best = None;
    let mut node = 0u32;
    let mut state = State::FromParent;

    for _ in 0..bvh.flat.node_length {
        let count = buffers.nodes.decode_index(node, 0);
        let parent = buffers.nodes.decode_index(node, 1);
        if state == State::FromChild {
            if node == 0 {
                break;
            }
            let (near, far) = near_far(bvh, parent, origin);
            if node == near {
                node = far;
                state = State::FromSibling;
            } else {
                node = parent;
            }
            continue;
        }

        let t = best.map_or(INFINITY, |b: MeshHit| b.t);
        let min = buffers.node_bounds.decode_host(node, 0);
        let max = buffers.node_bounds.decode_host(node, 1);
        if glint_math::Aabb::new(min, max).hit_before(origin, inv, t) {
            if count == 0 {
                node = near_far(bvh, node, origin).0;
                state = State::FromParent;
                continue;
            }
            let start = buffers.nodes.decode_index(node, 2);
            for j in 0..count.min(bvh.flat.largest_leaf) {
                test_triangle(buffers, start + j, origin, dir, &mut best, two_sided);
            }
        }
        if node == 0 {
            break;
        }
        match state {
            State::FromParent => {
                node = near_far(bvh, parent, origin).1;
                state = State::FromSibling;
            }
            _ => {
                node = parent;
                state = State::FromChild;
            }
        }
    }
    best
}

/// Every triangle, no hierarchy.
pub fn brute_force(bvh: &MeshBvh, origin: Vec3, dir: Vec3, two_sided: bool) -> Option<MeshHit> {
    let mut best = None;
    for k in 0..bvh.buffers.triangles.records() as u32 {
        test_triangle(&bvh.buffers, k, origin, dir, &mut best, two_sided);
    }
    best
}

/// Surface attributes of a hit: interpolated uv, and either the
/// interpolated vertex normal or the face normal.
pub fn surface(bvh: &MeshBvh, hit: &MeshHit, smooth: bool) -> SurfaceHit {
    let b = &bvh.buffers;
    let k = hit.triangle;
    let (u, v) = (hit.barycentric.x, hit.barycentric.y);
    let weights = [1.0 - u - v, u, v];
    let uv = if b.triangle_uvs.is_empty() {
        Vec2::ZERO
    } else {
        (0..3)
            .map(|c| b.uvs.decode_host(b.triangle_uvs.decode_index(k, c), 0).truncate() * weights[c as usize])
            .sum::<Vec2>()
    };
    let normal = if smooth && !b.triangle_normals.is_empty() {
        (0..3)
            .map(|c| b.normals.decode_host(b.triangle_normals.decode_index(k, c), 0) * weights[c as usize])
            .sum::<Vec3>()
            .normalize_or_zero()
    } else {
        let [p0, p1, p2] = corners(b, k);
        (p1 - p0).cross(p2 - p0).normalize_or_zero()
    };
    SurfaceHit::new(hit.t, normal, uv, hit.inside)
}

/// `intersectModel{id}(origin, ray) -> SurfaceHit`, the same walk as
/// [`traverse`] over the mesh's sampling functions.
pub fn emit_wgsl(id: u32, bvh: &MeshBvh, smooth: bool, two_sided: bool) -> String {
    let name = format!("intersectModel{id}");
    if bvh.is_empty() {
        return format!(
            "fn {name}(origin: vec3<f32>, ray: vec3<f32>) -> SurfaceHit {{\n    return missHit();\n}}\n"
        );
    }
    let b = &bvh.buffers;
    let node = |index: &str, offset| b.nodes.sample(index, offset);
    let bounds = |index: &str, offset| b.node_bounds.sample(index, offset);
    let corner = |c| b.positions.sample(&b.triangles.sample("k", c), 0);

    let uv = if b.triangle_uvs.is_empty() {
        "vec2<f32>(0.0)".to_string()
    } else {
        let at = |c| b.uvs.sample(&b.triangle_uvs.sample("hitTriangle", c), 0);
        format!(
            "{} * (1.0 - hitBary.x - hitBary.y) + {} * hitBary.x + {} * hitBary.y",
            at(0),
            at(1),
            at(2)
        )
    };
    let normal = if smooth && !b.triangle_normals.is_empty() {
        let at = |c| b.normals.sample(&b.triangle_normals.sample("hitTriangle", c), 0);
        format!(
            "normalize({} * (1.0 - hitBary.x - hitBary.y) + {} * hitBary.x + {} * hitBary.y)",
            at(0),
            at(1),
            at(2)
        )
    } else {
        let at = |c| b.positions.sample(&b.triangles.sample("hitTriangle", c), 0);
        format!(
            "normalize(cross({p1} - {p0}, {p2} - {p0}))",
            p0 = at(0),
            p1 = at(1),
            p2 = at(2)
        )
    };

    format!(
        "fn {name}(origin: vec3<f32>, ray: vec3<f32>) -> SurfaceHit {{
    var t = INFINITY;
    var hitTriangle = -1;
    var hitBary = vec2<f32>(0.0);
    var hitInside = false;
    let invRay = 1.0 / ray;
    var nodeIndex = 0;
    // 0 from parent, 1 from sibling, 2 from child
    var state = 0;
    for (var i = 0; i < {node_length}; i++) {{
        let count = {count};
        let parent = {parent};
        if (state == 2) {{
            if (nodeIndex == 0) {{
                break;
            }}
            let side = checkSplit(origin, {parent_split});
            let nearChild = select(parent + 1, {parent_child2}, side);
            let farChild = select({parent_child2}, parent + 1, side);
            if (nodeIndex == nearChild) {{
                nodeIndex = farChild;
                state = 1;
            }} else {{
                nodeIndex = parent;
            }}
            continue;
        }}
        if (intersectBox(origin, invRay, {min}, {max}, t)) {{
            if (count <= 0) {{
                let side = checkSplit(origin, {split});
                nodeIndex = select(nodeIndex + 1, {child2}, side);
                state = 0;
                continue;
            }}
            let start = {child2};
            for (var j = 0; j < {largest_leaf}; j++) {{
                if (j >= count) {{
                    break;
                }}
                let k = start + j;
                let hit = intersectTriangle(origin, ray, {c0}, {c1}, {c2}, t, {two_sided});
                if (hit.x >= 0.0) {{
                    t = hit.x;
                    hitTriangle = k;
                    hitBary = hit.yz;
                    hitInside = hit.w > 0.5;
                }}
            }}
        }}
        if (nodeIndex == 0) {{
            break;
        }}
        if (state == 0) {{
            let side = checkSplit(origin, {parent_split});
            nodeIndex = select({parent_child2}, parent + 1, side);
            state = 1;
        }} else {{
            nodeIndex = parent;
            state = 2;
        }}
    }}
    if (hitTriangle < 0) {{
        return missHit();
    }}
    return SurfaceHit(t, {normal}, {uv}, hitInside);
}}
",
        node_length = bvh.flat.node_length,
        largest_leaf = bvh.flat.largest_leaf,
        count = node("nodeIndex", 0),
        parent = node("nodeIndex", 1),
        child2 = node("nodeIndex", 2),
        parent_child2 = node("parent", 2),
        parent_split = bounds("parent", 2),
        split = bounds("nodeIndex", 2),
        min = bounds("nodeIndex", 0),
        max = bounds("nodeIndex", 1),
        c0 = corner(0),
        c1 = corner(1),
        c2 = corner(2),
    )
}
