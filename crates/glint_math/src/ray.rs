use crate::Vec3;

/// A ray with an origin and an (unnormalized) direction.
///
/// Distances along a ray are measured in units of `direction`'s length,
/// matching the shader, which scales object distances by `1 / length(ray)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Returns: origin + t * direction
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Same ray with a unit-length direction.
    pub fn normalized(&self) -> Ray {
        Ray::new(self.origin, self.direction.normalize())
    }
}
