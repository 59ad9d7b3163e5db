//! Fly camera
//!
//! Yaw (`theta`) and pitch (`phi`) around a +Y vertical axis, driven by mouse
//! deltas and WASD. Window polling stays in the caller; the camera only sees
//! a [`CameraInput`] snapshot.

use crate::core::config::CameraConfig;
use crate::foundation::math::{constants, deg_to_rad, look_at, perspective, Mat4, Vec3};

/// Keeps the view direction off the vertical axis
const PITCH_LIMIT: f32 = constants::HALF_PI - 0.01;

/// Input sampled once per frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraInput {
    /// Cursor position in window pixels
    pub cursor: (f64, f64),
    /// W
    pub forward: bool,
    /// S
    pub backward: bool,
    /// A
    pub left: bool,
    /// D
    pub right: bool,
}

/// First-person camera
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    orientation: Vec3,
    lateral: Vec3,
    theta: f32,
    phi: f32,
    sensitivity: f32,
    speed: f32,
    fov: f32,
    near: f32,
    far: f32,
    last_cursor: Option<(f64, f64)>,
}

impl Camera {
    /// Camera at `config.position` looking at `config.target`
    pub fn new(config: &CameraConfig) -> Self {
        let position = Vec3::from(config.position);
        let to_target = Vec3::from(config.target) - position;
        let direction = to_target.try_normalize(f32::EPSILON).unwrap_or_else(|| -Vec3::z());

        let phi = direction.y.clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
        let theta = direction.x.atan2(direction.z);

        let mut camera = Self {
            position,
            orientation: direction,
            lateral: Vec3::x(),
            theta,
            phi,
            sensitivity: config.sensitivity,
            speed: config.speed,
            fov: deg_to_rad(config.fov_degrees),
            near: config.near,
            far: config.far,
            last_cursor: None,
        };
        camera.rotate(0.0, 0.0);
        camera
    }

    fn rotate(&mut self, dx: f32, dy: f32) {
        self.phi = (self.phi - dy * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.theta -= dx * self.sensitivity;

        self.orientation = Vec3::new(
            self.phi.cos() * self.theta.sin(),
            self.phi.sin(),
            self.phi.cos() * self.theta.cos(),
        );
        self.lateral = Vec3::y().cross(&self.orientation).normalize();
    }

    /// Apply one frame of input; the first call only records the cursor
    pub fn update(&mut self, input: &CameraInput, elapsed_seconds: f32) {
        let Some((last_x, last_y)) = self.last_cursor.replace(input.cursor) else {
            return;
        };
        self.rotate((input.cursor.0 - last_x) as f32, (input.cursor.1 - last_y) as f32);

        let step = self.speed * elapsed_seconds;
        if input.forward {
            self.position += self.orientation * step;
        } else if input.backward {
            self.position -= self.orientation * step;
        }
        if input.left {
            self.position += self.lateral * step;
        } else if input.right {
            self.position -= self.lateral * step;
        }
    }

    /// World to view
    pub fn view_matrix(&self) -> Mat4 {
        look_at(&self.position, &self.target(), &Vec3::y())
    }

    /// View to clip for a target of `aspect`, Y flipped for presentation
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        perspective(self.fov, aspect, self.near, self.far)
    }

    /// Eye position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Unit view direction
    pub fn orientation(&self) -> Vec3 {
        self.orientation
    }

    /// Point one unit ahead
    pub fn target(&self) -> Vec3 {
        self.position + self.orientation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn config() -> CameraConfig {
        CameraConfig {
            position: [0.0, 0.0, 10.0],
            target: [0.0, 0.0, 0.0],
            sensitivity: 0.01,
            speed: 2.0,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_initial_orientation_points_at_target() {
        let camera = Camera::new(&config());
        assert_abs_diff_eq!(camera.orientation(), Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(camera.target(), Vec3::new(0.0, 0.0, 9.0), epsilon = 1e-6);
    }

    #[test]
    fn test_first_update_only_records_cursor() {
        let mut camera = Camera::new(&config());
        let input = CameraInput {
            cursor: (500.0, 300.0),
            forward: true,
            ..CameraInput::default()
        };
        camera.update(&input, 1.0);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 0.0, 10.0));
    }

    #[test]
    fn test_forward_moves_along_orientation() {
        let mut camera = Camera::new(&config());
        camera.update(&CameraInput::default(), 0.0);
        camera.update(
            &CameraInput {
                forward: true,
                ..CameraInput::default()
            },
            0.5,
        );
        assert_abs_diff_eq!(camera.position(), Vec3::new(0.0, 0.0, 9.0), epsilon = 1e-5);
    }

    #[test]
    fn test_strafe_is_perpendicular() {
        let mut camera = Camera::new(&config());
        camera.update(&CameraInput::default(), 0.0);
        camera.update(
            &CameraInput {
                left: true,
                ..CameraInput::default()
            },
            1.0,
        );
        let moved = camera.position() - Vec3::new(0.0, 0.0, 10.0);
        assert_abs_diff_eq!(moved.norm(), 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(moved.dot(&camera.orientation()), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::new(&config());
        camera.update(&CameraInput::default(), 0.0);
        camera.update(
            &CameraInput {
                cursor: (0.0, -100_000.0),
                ..CameraInput::default()
            },
            0.0,
        );
        assert_relative_eq!(camera.orientation().y, PITCH_LIMIT.sin(), epsilon = 1e-6);
        assert!(camera.view_matrix().iter().all(|v| v.is_finite()));
    }
}
