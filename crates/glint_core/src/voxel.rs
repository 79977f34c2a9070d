//! Voxel density grids backing 3D-texture volumes.

use glam::{UVec3, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A dense grid of signed densities, `x` fastest, then `y`, then `z`.
///
/// One voxel spans one object-space unit, so `dims` doubles as the
/// volume's extent.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    pub dims: UVec3,
    pub data: Vec<f32>,
}

impl VoxelGrid {
    pub fn new(dims: UVec3) -> Self {
        Self {
            dims,
            data: vec![0.0; (dims.x * dims.y * dims.z) as usize],
        }
    }

    pub fn from_fn(dims: UVec3, f: impl Fn(u32, u32, u32) -> f32) -> Self {
        let mut grid = Self::new(dims);
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let i = grid.index(x, y, z);
                    grid.data[i] = f(x, y, z);
                }
            }
        }
        grid
    }

    /// Four overlapping ellipsoid blobs with a little per-voxel noise.
    pub fn blobs(seed: u64) -> Self {
        const BLOBS: [(f32, f32, f32); 4] = [
            (8.0, 8.0, 8.0),
            (16.0, 8.0, 16.0),
            (12.0, 12.0, 12.0),
            (14.0, 8.0, 10.0),
        ];
        const RADIUS: f32 = 8.0;

        let mut rng = StdRng::seed_from_u64(seed);
        let dims = UVec3::new(24, 20, 24);
        let mut grid = Self::new(dims);
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let p = Vec3::new(x as f32, y as f32, z as f32);
                    let v: f32 = BLOBS
                        .iter()
                        .map(|&(cx, cy, cz)| {
                            let d = (p - Vec3::new(cx, cy, cz)) / RADIUS;
                            (1.0 - d.length() + rng.gen::<f32>() / 4.0).max(0.0)
                        })
                        .sum();
                    let i = grid.index(x, y, z);
                    grid.data[i] = v;
                }
            }
        }
        grid
    }

    pub fn size(&self) -> Vec3 {
        self.dims.as_vec3()
    }

    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        ((z * self.dims.y + y) * self.dims.x + x) as usize
    }

    /// Nearest-voxel density at an object-space position; zero outside.
    pub fn sample(&self, pos: Vec3) -> f32 {
        if pos.cmplt(Vec3::ZERO).any() {
            return 0.0;
        }
        let cell = pos.floor().as_uvec3();
        if cell.cmpge(self.dims).any() {
            return 0.0;
        }
        self.data[self.index(cell.x, cell.y, cell.z)]
    }

    /// The density the shader reads back after 8-bit quantization.
    pub fn sample_quantized(&self, pos: Vec3) -> f32 {
        let [r, g, _, _] = encode_density(self.sample(pos));
        (r as f32 - g as f32) / 255.0
    }

    /// RGBA8 texels: positive density in red, negative in green.
    pub fn encode(&self) -> Vec<[u8; 4]> {
        self.data.iter().map(|&v| encode_density(v)).collect()
    }
}

fn encode_density(v: f32) -> [u8; 4] {
    let channel = |v: f32| (v.max(0.0) * 255.0).round().min(255.0) as u8;
    [channel(v), channel(-v), 0, 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_encoding() {
        let grid = VoxelGrid::from_fn(UVec3::new(2, 1, 1), |x, _, _| if x == 0 { 0.5 } else { -0.25 });
        let texels = grid.encode();
        assert_eq!(texels[0], [128, 0, 0, 255]);
        assert_eq!(texels[1], [0, 64, 0, 255]);
        assert!((grid.sample_quantized(Vec3::new(1.5, 0.5, 0.5)) + 0.25).abs() < 0.01);
    }

    #[test]
    fn test_sample_outside_is_empty() {
        let grid = VoxelGrid::from_fn(UVec3::splat(2), |_, _, _| 1.0);
        assert_eq!(grid.sample(Vec3::new(0.5, 0.5, 0.5)), 1.0);
        assert_eq!(grid.sample(Vec3::new(-0.1, 0.5, 0.5)), 0.0);
        assert_eq!(grid.sample(Vec3::new(0.5, 2.0, 0.5)), 0.0);
    }

    #[test]
    fn test_blobs_are_deterministic() {
        let a = VoxelGrid::blobs(7);
        let b = VoxelGrid::blobs(7);
        assert_eq!(a, b);
        assert_eq!(a.size(), Vec3::new(24.0, 20.0, 24.0));
        // Dense near a blob center, empty in the far corner
        assert!(a.sample(Vec3::new(12.5, 10.5, 12.5)) > 0.5);
        assert!(a.sample(Vec3::new(23.5, 19.5, 0.5)) < 0.3);
    }
}
