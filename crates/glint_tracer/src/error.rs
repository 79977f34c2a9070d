use std::path::PathBuf;

use glint_core::{MeshError, TerrainError};
use thiserror::Error;

/// Errors raised while building or compiling a scene.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("unknown material '{0}'")]
    UnknownMaterial(String),

    #[error("no object with id {0}")]
    ObjectNotFound(u32),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Terrain(#[from] TerrainError),

    #[error("scene description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("uniform '{0}' is not part of the program layout")]
    UnknownUniform(String),

    #[error("invalid scene: {0}")]
    Invalid(String),
}

pub type TracerResult<T> = Result<T, TracerError>;
