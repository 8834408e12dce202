// SPDX-License-Identifier: CEPL-1.0
//! `umbra.toml`: every key optional, anything unreadable falls back to defaults.
use glam::Vec3;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use umbra_math::{Camera, ShadowBias};
use umbra_platform::WindowConfig;
use umbra_render::{
    CameraSettings, PresentPreference, SceneSettings, ShadowSettings, DEFAULT_FRAMES_IN_FLIGHT,
};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub shadow: ShadowCfg,
    pub scene: SceneCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let w = WindowConfig::default();
        Self {
            width: w.width,
            height: w.height,
            title: w.title,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub max_msaa_samples: u32,
    pub frames_in_flight: usize,
    /// Defaults to the shaders compiled alongside the binary.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModeCfg::default(),
            max_msaa_samples: 4,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShadowCfg {
    pub resolution: u32,
    pub near: f32,
    pub far: f32,
    pub bias_base: f32,
    pub bias_depth: f32,
    pub bias_edge: f32,
}

impl Default for ShadowCfg {
    fn default() -> Self {
        let s = ShadowSettings::default();
        Self {
            resolution: s.resolution,
            near: s.near,
            far: s.far,
            bias_base: s.bias.base,
            bias_depth: s.bias.depth_scale,
            bias_edge: s.bias.edge_scale,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub model: PathBuf,
    pub light_position: [f32; 3],
    pub camera_position: [f32; 3],
    pub camera_pitch_degrees: f32,
    pub camera_yaw_degrees: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        let s = SceneSettings::default();
        Self {
            model: PathBuf::from("assets/cornell_box.obj"),
            light_position: s.light_position.to_array(),
            camera_position: s.camera.camera.position.to_array(),
            camera_pitch_degrees: s.camera.camera.pitch.to_degrees(),
            camera_yaw_degrees: s.camera.camera.yaw.to_degrees(),
            fov_y_degrees: s.camera.fov_y_degrees,
            near: s.camera.near,
            far: s.camera.far,
        }
    }
}

impl AppConfig {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// A missing file is normal; a broken one is worth a warning.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(src) => match Self::parse(&src) {
                Ok(cfg) => {
                    info!("config: {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("{}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            width: self.window.width,
            height: self.window.height,
            title: self.window.title.clone(),
        }
    }

    pub fn scene_settings(&self) -> SceneSettings {
        SceneSettings {
            frames_in_flight: self.render.frames_in_flight.max(1),
            present: match self.render.present_mode {
                PresentModeCfg::Fifo => PresentPreference::Fifo,
                PresentModeCfg::Mailbox => PresentPreference::Mailbox,
            },
            max_msaa_samples: self.render.max_msaa_samples.max(1),
            clear_color: self.render.clear_color,
            shader_dir: self.render.shader_dir.clone(),
            light_position: Vec3::from_array(self.scene.light_position),
            model_transform: glam::Mat4::IDENTITY,
            shadow: ShadowSettings {
                resolution: self.shadow.resolution.max(1),
                near: self.shadow.near,
                far: self.shadow.far,
                bias: ShadowBias {
                    base: self.shadow.bias_base,
                    depth_scale: self.shadow.bias_depth,
                    edge_scale: self.shadow.bias_edge,
                },
            },
            camera: CameraSettings {
                camera: Camera {
                    position: Vec3::from_array(self.scene.camera_position),
                    pitch: self.scene.camera_pitch_degrees.to_radians(),
                    yaw: self.scene.camera_yaw_degrees.to_radians(),
                },
                fov_y_degrees: self.scene.fov_y_degrees,
                near: self.scene.near,
                far: self.scene.far,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_matches_built_in_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        let settings = cfg.scene_settings();
        assert_eq!(settings, SceneSettings::default());
        assert_eq!(cfg.window_config().title, "Vulkan Application");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [render]
            present_mode = "fifo"
            max_msaa_samples = 8

            [shadow]
            resolution = 512
            bias_edge = 0.001

            [scene]
            camera_pitch_degrees = 90.0
            "#,
        )
        .unwrap();
        let s = cfg.scene_settings();
        assert_eq!(s.present, PresentPreference::Fifo);
        assert_eq!(s.max_msaa_samples, 8);
        assert_eq!(s.frames_in_flight, 3);
        assert_eq!(s.shadow.resolution, 512);
        assert_eq!(s.shadow.bias.edge_scale, 0.001);
        assert_eq!(s.shadow.bias.base, ShadowBias::default().base);
        assert_eq!(s.shadow.far, 10.0);
        assert!((s.camera.camera.pitch - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(s.shader_dir, None);
        assert_eq!(cfg.scene.model, PathBuf::from("assets/cornell_box.obj"));
    }

    #[test]
    fn explicit_shader_dir_wins() {
        let cfg = AppConfig::parse("[render]\nshader_dir = \"my/shaders\"\n").unwrap();
        assert_eq!(
            cfg.scene_settings().shader_dir,
            Some(PathBuf::from("my/shaders"))
        );
    }

    #[test]
    fn bad_values_are_rejected_by_parse() {
        assert!(AppConfig::parse("[render]\npresent_mode = \"immediate\"\n").is_err());
        assert!(AppConfig::parse("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("umbra-config-test-missing");
        let cfg = AppConfig::load(&dir.join("nope.toml"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cfg = AppConfig::parse("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.scene_settings().frames_in_flight, 1);
    }
}
