use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Pinhole camera for the path tracer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Final radiance multiplier applied by the integrator.
    pub exposure: f32,
}

/// Eye position and the four frustum corner rays.
///
/// `ray00` is the bottom-left corner, `ray01` top-left, `ray10`
/// bottom-right and `ray11` top-right (first digit x, second y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerRays {
    pub eye: Vec3,
    pub ray00: Vec3,
    pub ray01: Vec3,
    pub ray10: Vec3,
    pub ray11: Vec3,
}

impl CornerRays {
    /// Bilinear ray for a screen percentage (0..1, y up), the same
    /// interpolation the vertex stage performs.
    pub fn ray_at(&self, percent: Vec2) -> Vec3 {
        let left = self.ray00.lerp(self.ray01, percent.y);
        let right = self.ray10.lerp(self.ray11, percent.y);
        left.lerp(right, percent.x)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0)
    }
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: 55.0_f32.to_radians(),
            aspect,
            near: 0.1,
            far: 100.0,
            exposure: 1.0,
        }
    }

    /// Position on a sphere of radius `zoom` around the origin.
    pub fn orbit(angle_x: f32, angle_y: f32, zoom: f32) -> Vec3 {
        Vec3::new(
            angle_y.sin() * angle_x.cos(),
            angle_x.sin(),
            angle_y.cos() * angle_x.cos(),
        ) * zoom
    }

    /// Get the view matrix (world → camera space)
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix (camera → clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Get the combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Corner rays for one frame.
    ///
    /// `jitter` holds two values in [-1, 1]; it shifts the clip-space image
    /// by up to 1/512 before inversion to antialias across frames.
    pub fn corner_rays(&self, jitter: Vec2) -> CornerRays {
        let shift = Mat4::from_translation((jitter / 512.0).extend(0.0));
        let inv = (shift * self.view_projection_matrix()).inverse();
        let corner = |x: f32, y: f32| inv.project_point3(Vec3::new(x, y, 0.0)) - self.position;
        CornerRays {
            eye: self.position,
            ray00: corner(-1.0, -1.0),
            ray01: corner(-1.0, 1.0),
            ray10: corner(1.0, -1.0),
            ray11: corner(1.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_defaults() {
        let camera = Camera::default();
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 3.0));
        assert!((camera.fov_y - 55.0_f32.to_radians()).abs() < 0.0001);
        assert_eq!(camera.exposure, 1.0);
    }

    #[test]
    fn test_center_ray_points_at_target() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0);
        let rays = camera.corner_rays(Vec2::ZERO);
        let center = rays.ray_at(Vec2::splat(0.5)).normalize();
        assert!((center - Vec3::new(0.0, 0.0, -1.0)).length() < 0.001);
    }

    #[test]
    fn test_corner_ray_orientation() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 1.0);
        let rays = camera.corner_rays(Vec2::ZERO);
        assert!(rays.ray00.x < 0.0 && rays.ray00.y < 0.0);
        assert!(rays.ray01.x < 0.0 && rays.ray01.y > 0.0);
        assert!(rays.ray10.x > 0.0 && rays.ray10.y < 0.0);
        assert!(rays.ray11.x > 0.0 && rays.ray11.y > 0.0);
    }

    #[test]
    fn test_jitter_is_subpixel() {
        let camera = Camera::default();
        let still = camera.corner_rays(Vec2::ZERO);
        let shaken = camera.corner_rays(Vec2::new(1.0, -1.0));
        let a = still.ray00.normalize();
        let b = shaken.ray00.normalize();
        assert!((a - b).length() > 0.0);
        assert!((a - b).length() < 0.01);
    }

    #[test]
    fn test_orbit_radius() {
        let p = Camera::orbit(0.3, 1.2, 4.0);
        assert!((p.length() - 4.0).abs() < 0.001);
        assert!((Camera::orbit(0.0, 0.0, 2.0) - Vec3::new(0.0, 0.0, 2.0)).length() < 0.001);
    }
}
