//! Glint Tracer - scene compiler and progressive integrator
//!
//! A scene of analytic shapes, BVH meshes, signed distance fields,
//! heightfield terrain and voxel volumes is compiled into one WGSL program
//! whose fragment stage runs a Monte Carlo path tracer. Flat scene data
//! reaches the program through RGBA8 buffer textures.
//!
//! The host side mirrors every intersection and closure so the same scene
//! can be rendered on the CPU as a reference.

pub mod background;
pub mod buffer;
pub mod bvh;
pub mod config;
pub mod demos;
pub mod emit;
pub mod error;
pub mod integrator;
pub mod library;
pub mod light;
pub mod material;
pub mod objects;
pub mod scene;
pub mod synth;
pub mod traversal;
pub mod uniforms;

pub use background::{Background, BackgroundPreset, Sky};
pub use buffer::{BufferLayout, ElementKind, GpuBuffer};
pub use bvh::{BvhNode, FlatBvh, MeshBuffers, MeshBvh};
pub use config::{ObjectConfig, RenderConfig, SceneConfig, ShapeConfig, TilesConfig};
pub use emit::{IdAllocator, Namespace, ProgramBuilder, Section};
pub use error::{TracerError, TracerResult};
pub use integrator::{CpuTracer, HostTracer, ImageBuffer, Progressive};
pub use light::{Light, LightKind};
pub use material::{Closure, ColorPreset, ColorSource, MapLayers, MapSource, Material, MaterialId};
pub use objects::{Shape, TracerObject};
pub use scene::Scene;
pub use synth::{synthesize, synthesize_prepared, ShaderProgram};
pub use uniforms::{FrameUniforms, UniformBlock, UniformLayout};
