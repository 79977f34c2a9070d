// Transform utilities for Mat4
//
// Extends glam::Mat4 with the helpers the object model needs: normal
// transforms, corner-based bounds, and the shear/skew constructors the
// interactive editing operations are built from.

use glam::{Mat3, Mat4, Vec3, Vec4};
use crate::Aabb;

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Transform a surface normal by the inverse-transpose of this matrix.
    fn transform_normal(&self, normal: Vec3) -> Vec3;

    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl Mat4Ext for Mat4 {
    fn transform_normal(&self, normal: Vec3) -> Vec3 {
        let inv_t = self.inverse().transpose();
        (inv_t * Vec4::new(normal.x, normal.y, normal.z, 0.0))
            .truncate()
            .normalize_or_zero()
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        Aabb::enclosing(aabb.corners().iter().map(|&c| self.transform_point3(c)))
    }
}

/// Shear matrix: each output coordinate picks up a multiple of the others.
///
/// `xy` is the amount of y added to x, and so on.
pub fn shear_matrix(xy: f32, xz: f32, yx: f32, yz: f32, zx: f32, zy: f32) -> Mat4 {
    // Mat3::from_cols takes columns; entry (row, col) = amount of col added to row
    Mat4::from_mat3(Mat3::from_cols(
        Vec3::new(1.0, yx, zx),
        Vec3::new(xy, 1.0, zy),
        Vec3::new(xz, yz, 1.0),
    ))
}

/// Skew by angles (radians) of the y and z axes towards x, and z towards y.
pub fn skew_matrix(angle_xy: f32, angle_xz: f32, angle_yz: f32) -> Mat4 {
    shear_matrix(angle_xy.tan(), angle_xz.tan(), 0.0, angle_yz.tan(), 0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_normal_nonuniform_scale() {
        let mat = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        // Normal of the plane x + y = const
        let n = mat.transform_normal(Vec3::new(1.0, 1.0, 0.0).normalize());
        // The scaled plane is x/2 + y = const, normal (0.5, 1, 0)
        let expected = Vec3::new(0.5, 1.0, 0.0).normalize();
        assert!((n - expected).length() < 0.001);
    }

    #[test]
    fn test_transform_aabb_translation() {
        let mat = Mat4::from_translation(Vec3::new(5.0, 5.0, 5.0));
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let transformed = mat.transform_aabb(&aabb);

        assert!((transformed.min - Vec3::new(5.0, 5.0, 5.0)).length() < 0.001);
        assert!((transformed.max - Vec3::new(6.0, 6.0, 6.0)).length() < 0.001);
    }

    #[test]
    fn test_transform_aabb_rotation_grows() {
        use std::f32::consts::PI;

        let mat = Mat4::from_rotation_z(PI / 4.0);
        let transformed = mat.transform_aabb(&Aabb::UNIT);
        let r = 2.0_f32.sqrt();
        assert!((transformed.max.x - r).abs() < 0.001);
        assert!((transformed.max.z - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_shear_moves_x_by_y() {
        let mat = shear_matrix(0.5, 0.0, 0.0, 0.0, 0.0, 0.0);
        let p = mat.transform_point3(Vec3::new(0.0, 2.0, 0.0));
        assert!((p - Vec3::new(1.0, 2.0, 0.0)).length() < 0.001);
    }

    #[test]
    fn test_skew_zero_is_identity() {
        assert!(skew_matrix(0.0, 0.0, 0.0).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
