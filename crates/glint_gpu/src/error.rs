use glint_tracer::TracerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter")]
    NoAdapter,

    #[error("failed to open the GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    /// The synthesized program failed validation.
    #[error("shader build failed:\n{diagnostic}")]
    ShaderBuild { diagnostic: String },

    #[error("frame readback failed: {0}")]
    Readback(String),

    #[error(transparent)]
    Tracer(#[from] TracerError),
}

pub type GpuResult<T> = Result<T, GpuError>;
