//! Glint GPU - runs synthesized programs through wgpu
//!
//! The driver is headless: every frame renders the integrator into one of
//! two `Rgba32Float` accumulation targets, reading the other as the
//! previous average, and frames are read back on demand.

mod context;
mod error;
mod tracer;

pub use context::GpuContext;
pub use error::{GpuError, GpuResult};
pub use tracer::GpuTracer;
