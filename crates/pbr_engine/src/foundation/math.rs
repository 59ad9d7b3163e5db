//! Math utilities and types
//!
//! Provides the nalgebra aliases used across the renderer plus the two
//! projection conventions it needs: the presentation projection (Vulkan
//! depth range 0..1, Y pointing down in clip space) and the cube-capture
//! projection (same depth range, no Y flip so rows follow cubemap face
//! orientation).

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Convert degrees to radians
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees * constants::DEG_TO_RAD
}

/// Right-handed perspective with depth mapped to 0..1 and clip-space Y flipped
/// for presentation.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = perspective_zero_to_one(fov_y, aspect, near, far);
    projection[(1, 1)] *= -1.0;
    projection
}

/// Right-handed perspective with depth mapped to 0..1, no Y flip.
pub fn perspective_zero_to_one(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y * 0.5).tan();
    Mat4::new(
        f / aspect, 0.0, 0.0, 0.0,
        0.0, f, 0.0, 0.0,
        0.0, 0.0, far / (near - far), (near * far) / (near - far),
        0.0, 0.0, -1.0, 0.0,
    )
}

/// Right-handed view matrix looking from `eye` towards `target`
pub fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_depth_range() {
        let near = 0.1;
        let far = 10.0;
        let projection = perspective_zero_to_one(deg_to_rad(90.0), 1.0, near, far);

        let at_near = projection * Vec4::new(0.0, 0.0, -near, 1.0);
        let at_far = projection * Vec4::new(0.0, 0.0, -far, 1.0);

        assert_relative_eq!(at_near.z / at_near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(at_far.z / at_far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_presentation_projection_flips_y() {
        let capture = perspective_zero_to_one(1.0, 1.5, 0.1, 100.0);
        let present = perspective(1.0, 1.5, 0.1, 100.0);

        assert_relative_eq!(present[(1, 1)], -capture[(1, 1)]);
        assert_relative_eq!(present[(0, 0)], capture[(0, 0)]);
    }

    #[test]
    fn test_look_at_maps_target_onto_negative_z() {
        let view = look_at(&Vec3::new(0.0, 0.0, 5.0), &Vec3::zeros(), &Vec3::y());
        let target_in_view = view.transform_point(&Point3::origin());

        assert_relative_eq!(target_in_view.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target_in_view.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target_in_view.z, -5.0, epsilon = 1e-6);
    }
}
