//! Surface-area-heuristic BVH over mesh triangles.
//!
//! The tree is built once per mesh, then flattened depth-first with the
//! first child stored directly after its parent. The flattened arrays and
//! the reordered triangle streams become the mesh's data buffers.

use std::time::Instant;

use glam::Vec3;
use glint_core::Mesh;
use glint_math::Aabb;

use crate::buffer::{ElementKind, GpuBuffer, FLOAT_EPSILON};
use crate::emit::IdAllocator;

/// Candidate planes per axis for large nodes.
const SPLIT_CANDIDATES: usize = 20;

/// Nodes with this many triangles or fewer become leaves.
const LEAF_SIZE: usize = 2;

/// Growth applied to encoded node bounds so the fixed-point decode of a
/// box still contains the decode of its triangles.
const BOUNDS_PAD: f32 = 2.0 * FLOAT_EPSILON;

pub enum BvhNode {
    Branch {
        bounds: Aabb,
        axis: usize,
        split: f32,
        /// Triangles whose centroid lies above `split` (stored first)
        above: Box<BvhNode>,
        below: Box<BvhNode>,
    },
    Leaf {
        bounds: Aabb,
        triangles: Vec<u32>,
    },
}

impl BvhNode {
    pub fn bounds(&self) -> Aabb {
        match self {
            BvhNode::Branch { bounds, .. } | BvhNode::Leaf { bounds, .. } => *bounds,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            BvhNode::Branch { above, below, .. } => above.leaf_count() + below.leaf_count(),
            BvhNode::Leaf { .. } => 1,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            BvhNode::Branch { above, below, .. } => 1 + above.depth().max(below.depth()),
            BvhNode::Leaf { .. } => 1,
        }
    }
}

/// Recursive SAH construction state for one mesh.
struct Builder<'a> {
    mesh: &'a Mesh,
    centroids: Vec<Vec3>,
    max_depth: f32,
}

impl<'a> Builder<'a> {
    fn new(mesh: &'a Mesh) -> Self {
        let centroids = (0..mesh.triangle_count())
            .map(|i| {
                let [a, b, c] = mesh.triangle(i);
                (a + b + c) / 3.0
            })
            .collect();
        Self {
            mesh,
            centroids,
            max_depth: (mesh.vertex_count() as f32).log2(),
        }
    }

    fn bounds_of<'i>(&self, triangles: impl IntoIterator<Item = &'i u32>) -> Aabb {
        triangles.into_iter().fold(Aabb::EMPTY, |acc, &i| {
            self.mesh
                .triangle(i as usize)
                .into_iter()
                .fold(acc, |acc, p| acc.including(p))
        })
    }

    /// `above·area(above) + below·area(below)`; one-sided or degenerate
    /// splits cost infinity.
    fn evaluate_sah(&self, triangles: &[u32], axis: usize, t: f32) -> f32 {
        let (mut above, mut below) = (Aabb::EMPTY, Aabb::EMPTY);
        let (mut above_count, mut below_count) = (0usize, 0usize);
        for &i in triangles {
            let tri = self.mesh.triangle(i as usize);
            if self.centroids[i as usize][axis] > t {
                above_count += 1;
                above = tri.into_iter().fold(above, |acc, p| acc.including(p));
            } else {
                below_count += 1;
                below = tri.into_iter().fold(below, |acc, p| acc.including(p));
            }
        }
        if above_count == 0 || below_count == 0 {
            return f32::INFINITY;
        }
        let cost = above_count as f32 * above.area() + below_count as f32 * below.area();
        if cost > 0.0 {
            cost
        } else {
            f32::INFINITY
        }
    }

    fn best_split(&self, triangles: &[u32], bounds: &Aabb) -> Option<(usize, f32, f32)> {
        let mut best: Option<(usize, f32, f32)> = None;
        let mut consider = |axis: usize, t: f32| {
            let cost = self.evaluate_sah(triangles, axis, t);
            if cost < best.map_or(f32::INFINITY, |b| b.2) {
                best = Some((axis, t, cost));
            }
        };
        if triangles.len() > SPLIT_CANDIDATES * SPLIT_CANDIDATES {
            let extent = bounds.extent();
            for axis in 0..3 {
                let step = extent[axis] / SPLIT_CANDIDATES as f32;
                for i in 1..SPLIT_CANDIDATES {
                    consider(axis, bounds.min[axis] + i as f32 * step);
                }
            }
        } else {
            for axis in 0..3 {
                for &i in triangles {
                    consider(axis, self.centroids[i as usize][axis]);
                }
            }
        }
        best
    }

    fn subdivide(&self, triangles: Vec<u32>, depth: u32, parent_cost: f32) -> BvhNode {
        let bounds = self.bounds_of(&triangles);
        if (depth as f32) < self.max_depth && triangles.len() > LEAF_SIZE {
            if let Some((axis, split, cost)) = self.best_split(&triangles, &bounds) {
                if cost < parent_cost {
                    let (above, below): (Vec<u32>, Vec<u32>) = triangles
                        .iter()
                        .partition(|&&i| self.centroids[i as usize][axis] > split);
                    if !above.is_empty() && !below.is_empty() {
                        return BvhNode::Branch {
                            bounds,
                            axis,
                            split,
                            above: Box::new(self.subdivide(above, depth + 1, cost)),
                            below: Box::new(self.subdivide(below, depth + 1, cost)),
                        };
                    }
                }
            }
        }
        BvhNode::Leaf { bounds, triangles }
    }
}

/// Build the tree for every triangle of `mesh`.
pub fn build_tree(mesh: &Mesh) -> Option<BvhNode> {
    if mesh.is_empty() {
        return None;
    }
    let builder = Builder::new(mesh);
    let all = (0..mesh.triangle_count() as u32).collect();
    Some(builder.subdivide(all, 0, f32::INFINITY))
}

/// The tree as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatBvh {
    /// `[leafCount, parent, child2 | triangleStart]` per node
    pub nodes: Vec<[u32; 3]>,
    /// `[min, max, (axis, split, 0)]` per node
    pub bounds: Vec<[Vec3; 3]>,
    /// Original triangle index for each reordered slot
    pub order: Vec<u32>,
    pub largest_leaf: u32,
    /// Worst-case traversal iterations
    pub node_length: u32,
    pub depth: u32,
}

impl FlatBvh {
    /// Flatten depth-first, first child at `parent + 1`.
    ///
    /// `cap` optionally clamps the traversal budget to
    /// `floor(log2(vertexCount) * 16)`.
    pub fn flatten(root: &BvhNode, vertex_count: usize, cap: bool) -> Self {
        let mut flat = FlatBvh::default();
        flat.collapse(root, 0);
        let leaves = root.leaf_count() as u32;
        flat.node_length = 3 * leaves - 2;
        if cap {
            let limit = ((vertex_count as f32).log2() * 16.0).floor().max(1.0) as u32;
            flat.node_length = flat.node_length.min(limit);
        }
        flat.depth = root.depth() as u32;
        flat
    }

    fn collapse(&mut self, node: &BvhNode, parent: u32) -> u32 {
        let index = self.nodes.len() as u32;
        let bounds = node.bounds();
        match node {
            BvhNode::Leaf { triangles, .. } => {
                self.bounds.push([bounds.min, bounds.max, Vec3::ZERO]);
                self.nodes.push([triangles.len() as u32, parent, self.order.len() as u32]);
                self.largest_leaf = self.largest_leaf.max(triangles.len() as u32);
                self.order.extend_from_slice(triangles);
            }
            BvhNode::Branch {
                axis,
                split,
                above,
                below,
                ..
            } => {
                self.bounds
                    .push([bounds.min, bounds.max, Vec3::new(*axis as f32, *split, 0.0)]);
                self.nodes.push([0, parent, 0]);
                self.collapse(above, index);
                let second = self.collapse(below, index);
                self.nodes[index as usize][2] = second;
            }
        }
        index
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n[0] > 0).count()
    }
}

/// The data buffers of one mesh.
#[derive(Debug, Clone)]
pub struct MeshBuffers {
    pub positions: GpuBuffer,
    pub uvs: GpuBuffer,
    pub normals: GpuBuffer,
    pub triangles: GpuBuffer,
    pub triangle_uvs: GpuBuffer,
    pub triangle_normals: GpuBuffer,
    pub nodes: GpuBuffer,
    pub node_bounds: GpuBuffer,
}

impl MeshBuffers {
    fn new(ids: &mut IdAllocator) -> Self {
        let mut buffer = |label: &str, kind, group| GpuBuffer::new(ids.buffer(), label, kind, group);
        Self {
            positions: buffer("positions", ElementKind::Vec3, 1),
            uvs: buffer("uvs", ElementKind::Vec2, 1),
            normals: buffer("normals", ElementKind::Vec3, 1),
            triangles: buffer("triangles", ElementKind::Index, 3),
            triangle_uvs: buffer("triangleuvs", ElementKind::Index, 3),
            triangle_normals: buffer("trianglenormals", ElementKind::Index, 3),
            nodes: buffer("nodes", ElementKind::Index, 3),
            node_bounds: buffer("nodebounds", ElementKind::Vec3, 3),
        }
    }

    /// In allocation order.
    pub fn all(&self) -> [&GpuBuffer; 8] {
        [
            &self.positions,
            &self.uvs,
            &self.normals,
            &self.triangles,
            &self.triangle_uvs,
            &self.triangle_normals,
            &self.nodes,
            &self.node_bounds,
        ]
    }
}

fn flat_vec3(values: &[Vec3]) -> Vec<f32> {
    values.iter().flat_map(|v| v.to_array()).collect()
}

/// Corner indices of `stream` in the reordered triangle order.
fn reorder(stream: &[u32], order: &[u32]) -> Vec<f32> {
    if stream.is_empty() {
        return Vec::new();
    }
    order
        .iter()
        .flat_map(|&t| stream[t as usize * 3..t as usize * 3 + 3].iter().map(|&i| i as f32))
        .collect()
}

/// A built hierarchy and its encoded buffers.
#[derive(Debug, Clone)]
pub struct MeshBvh {
    pub flat: FlatBvh,
    pub buffers: MeshBuffers,
}

impl MeshBvh {
    pub fn build(mesh: &Mesh, ids: &mut IdAllocator, cap: bool) -> Self {
        let start = Instant::now();
        let flat = build_tree(mesh)
            .map(|root| FlatBvh::flatten(&root, mesh.vertex_count(), cap))
            .unwrap_or_default();

        let mut buffers = MeshBuffers::new(ids);
        buffers.positions.fill_data(&flat_vec3(&mesh.positions));
        buffers
            .uvs
            .fill_data(&mesh.uvs.iter().flat_map(|v| v.to_array()).collect::<Vec<_>>());
        buffers.normals.fill_data(&flat_vec3(&mesh.normals));
        buffers.triangles.fill_data(&reorder(&mesh.triangles, &flat.order));
        buffers
            .triangle_uvs
            .fill_data(&reorder(&mesh.triangle_uvs, &flat.order));
        buffers
            .triangle_normals
            .fill_data(&reorder(&mesh.triangle_normals, &flat.order));
        let nodes: Vec<f32> = flat.nodes.iter().flatten().map(|&v| v as f32).collect();
        buffers.nodes.fill_data(&nodes);
        let bounds: Vec<f32> = flat
            .bounds
            .iter()
            .flat_map(|[min, max, split]| {
                let pad = Vec3::splat(BOUNDS_PAD);
                [*min - pad, *max + pad, *split]
            })
            .flat_map(|v| v.to_array())
            .collect();
        buffers.node_bounds.fill_data(&bounds);

        log::info!(
            "BVH: {} triangles, {} nodes, depth {}, largest leaf {}, budget {} in {:.2?}",
            mesh.triangle_count(),
            flat.nodes.len(),
            flat.depth,
            flat.largest_leaf,
            flat.node_length,
            start.elapsed()
        );
        Self { flat, buffers }
    }

    pub fn is_empty(&self) -> bool {
        self.flat.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_soup(rng: &mut StdRng, count: usize) -> Mesh {
        let mut positions = Vec::new();
        for _ in 0..count {
            let c = Vec3::new(rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0));
            for _ in 0..3 {
                positions.push(c + Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0)));
            }
        }
        Mesh::new(positions, (0..count as u32 * 3).collect())
    }

    #[test]
    fn test_leaves_partition_triangles() {
        let mut rng = StdRng::seed_from_u64(3);
        for count in [1, 2, 3, 17, 150, 600] {
            let mesh = random_soup(&mut rng, count);
            let root = build_tree(&mesh).unwrap();
            let flat = FlatBvh::flatten(&root, mesh.vertex_count(), false);
            let mut seen = flat.order.clone();
            seen.sort_unstable();
            assert_eq!(seen, (0..count as u32).collect::<Vec<_>>(), "{count} triangles");

            // Leaf ranges tile the reordered stream without gaps
            let mut ranges: Vec<(u32, u32)> = flat
                .nodes
                .iter()
                .filter(|n| n[0] > 0)
                .map(|n| (n[2], n[0]))
                .collect();
            ranges.sort_unstable();
            let mut next = 0;
            for (start, len) in ranges {
                assert_eq!(start, next);
                next += len;
            }
            assert_eq!(next as usize, count);
        }
    }

    #[test]
    fn test_first_child_follows_parent() {
        let mut rng = StdRng::seed_from_u64(11);
        let mesh = random_soup(&mut rng, 300);
        let root = build_tree(&mesh).unwrap();
        let flat = FlatBvh::flatten(&root, mesh.vertex_count(), false);
        assert!(flat.nodes.len() > 1);
        for (i, node) in flat.nodes.iter().enumerate() {
            if node[0] == 0 {
                assert_eq!(flat.nodes[i + 1][1] as usize, i);
                assert_eq!(flat.nodes[node[2] as usize][1] as usize, i);
                assert!(node[2] as usize > i + 1);
            }
        }
        assert_eq!(flat.node_length as usize, 3 * flat.leaf_count() - 2);
        assert_eq!(flat.nodes[0][1], 0);
    }

    #[test]
    fn test_child_bounds_nest() {
        let mut rng = StdRng::seed_from_u64(5);
        let mesh = random_soup(&mut rng, 500);
        let flat = FlatBvh::flatten(&build_tree(&mesh).unwrap(), mesh.vertex_count(), false);
        for (i, node) in flat.nodes.iter().enumerate().skip(1) {
            let [pmin, pmax, _] = flat.bounds[node[1] as usize];
            let [min, max, _] = flat.bounds[i];
            assert!(min.cmpge(pmin).all() && max.cmple(pmax).all());
        }
    }

    #[test]
    fn test_small_mesh_is_single_leaf() {
        let mesh = Mesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z], vec![0, 1, 2, 0, 2, 3]);
        let flat = FlatBvh::flatten(&build_tree(&mesh).unwrap(), mesh.vertex_count(), false);
        assert_eq!(flat.nodes, vec![[2, 0, 0]]);
        assert_eq!(flat.node_length, 1);
        assert!(build_tree(&Mesh::default()).is_none());
    }

    #[test]
    fn test_budget_cap() {
        let mut rng = StdRng::seed_from_u64(9);
        let mesh = random_soup(&mut rng, 400);
        let root = build_tree(&mesh).unwrap();
        let capped = FlatBvh::flatten(&root, mesh.vertex_count(), true);
        let limit = ((mesh.vertex_count() as f32).log2() * 16.0).floor() as u32;
        assert!(capped.node_length <= limit);
    }

    #[test]
    fn test_buffers_encode_tree() {
        let mut rng = StdRng::seed_from_u64(2);
        let mesh = random_soup(&mut rng, 40);
        let mut ids = IdAllocator::new();
        let bvh = MeshBvh::build(&mesh, &mut ids, false);
        let ids: Vec<u32> = bvh.buffers.all().iter().map(|b| b.id()).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        for (i, node) in bvh.flat.nodes.iter().enumerate() {
            for (offset, &v) in node.iter().enumerate() {
                assert_eq!(bvh.buffers.nodes.decode_index(i as u32, offset as u32), v);
            }
            let min = bvh.buffers.node_bounds.decode_host(i as u32, 0);
            assert!(min.cmple(bvh.flat.bounds[i][0]).all());
        }
        assert!(bvh.buffers.uvs.is_empty());
        assert!(bvh.buffers.triangle_uvs.is_empty());
    }
}
