// Re-export glam for convenience
pub use glam::*;

// Glint math types
mod aabb;
mod camera;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use camera::{Camera, CornerRays};
pub use interval::Interval;
pub use ray::Ray;
pub use transform::{shear_matrix, skew_matrix, Mat4Ext};
