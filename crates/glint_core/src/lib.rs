//! Glint Core - asset collaborators for the path tracer.
//!
//! This crate provides:
//!
//! - **Meshes**: flat position/uv/normal arrays with separate index streams,
//!   OBJ loading, UV/normal generation and import-time normalization
//! - **Textures**: RGBA8 images with host-side sampling
//! - **Terrain**: Terrarium elevation decoding, tile stitching and mip mosaics
//! - **Voxels**: signed density grids for 3D-texture-backed volumes
//!
//! Loaders degrade to placeholders (empty mesh, blank image) instead of
//! failing the render when assets are missing.

pub mod mesh;
pub mod terrain;
pub mod texture;
pub mod voxel;

// Re-export commonly used types
pub use mesh::{Mesh, MeshError, MeshResult};
pub use terrain::{TerrainError, TerrainMosaic, TileSource};
pub use texture::{Texture, TextureError, TextureResult};
pub use voxel::VoxelGrid;
