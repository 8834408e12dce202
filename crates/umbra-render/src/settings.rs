// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};
use std::path::PathBuf;
use umbra_math::{vulkan_perspective, Camera, LightMatrices, ShadowBias};

/// Number of frame slots in flight.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PresentPreference {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShadowSettings {
    /// Edge length of each cube face in texels.
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
    pub bias: ShadowBias,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            near: 0.05,
            far: 10.0,
            bias: ShadowBias::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    pub camera: Camera,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            camera: Camera::at(Vec3::new(0.0, 1.0, 3.5)),
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl CameraSettings {
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        vulkan_perspective(self.fov_y_degrees.to_radians(), aspect, self.near, self.far)
            * self.camera.view_matrix()
    }
}

/// Everything a backend needs besides the window and the model.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneSettings {
    pub frames_in_flight: usize,
    pub present: PresentPreference,
    /// Upper bound; the device may support fewer samples.
    pub max_msaa_samples: u32,
    pub clear_color: [f32; 4],
    /// Compiled shader directory. `None` means the backend's own build output.
    pub shader_dir: Option<PathBuf>,
    pub light_position: Vec3,
    pub model_transform: Mat4,
    pub shadow: ShadowSettings,
    pub camera: CameraSettings,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            present: PresentPreference::default(),
            max_msaa_samples: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: None,
            light_position: Vec3::new(0.0, 1.9, 0.0),
            model_transform: Mat4::IDENTITY,
            shadow: ShadowSettings::default(),
            camera: CameraSettings::default(),
        }
    }
}

impl SceneSettings {
    pub fn light_matrices(&self) -> LightMatrices {
        LightMatrices::new(self.light_position, self.shadow.near, self.shadow.far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_cornell_scene() {
        let s = SceneSettings::default();
        assert_eq!(s.frames_in_flight, 3);
        assert_eq!(s.present, PresentPreference::Mailbox);
        assert_eq!(s.shader_dir, None);
        let light = s.light_matrices();
        assert_eq!(light.position(), Vec3::new(0.0, 1.9, 0.0));
        assert_eq!(light.near(), s.shadow.near);
    }

    #[test]
    fn camera_sees_the_origin_in_front() {
        let s = CameraSettings::default();
        let clip = s.view_projection(800.0 / 600.0) * glam::Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        assert!((clip.z / clip.w) > 0.0 && (clip.z / clip.w) < 1.0);
    }
}
