// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};

/// Fly-style camera without roll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Radians around the x axis.
    pub pitch: f32,
    /// Radians around the y axis.
    pub yaw: f32,
}

impl Camera {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            pitch: 0.0,
            yaw: 0.0,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.pitch)
            * Mat4::from_rotation_y(self.yaw)
            * Mat4::from_translation(-self.position)
    }
}

/// Right-handed perspective with `[0, 1]` depth and y pointing down in clip
/// space, as Vulkan expects.
pub fn vulkan_perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::Vec4;

    #[test]
    fn unrotated_view_is_a_translation() {
        let cam = Camera::at(Vec3::new(0.0, 1.0, 3.5));
        let expected = Mat4::from_translation(Vec3::new(0.0, -1.0, -3.5));
        assert!(cam.view_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn yaw_turns_the_world_around_the_camera() {
        let mut cam = Camera::at(Vec3::ZERO);
        cam.yaw = std::f32::consts::FRAC_PI_2;
        let v = cam.view_matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_abs_diff_eq!(v.z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let proj = vulkan_perspective(45f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        let up = proj * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(up.y / up.w < 0.0);
        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert_abs_diff_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
    }
}
