// SPDX-License-Identifier: CEPL-1.0
//! Math shared by the renderer crates: cube faces, point-light shadow
//! matrices and the scene camera.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod camera;
pub mod cube;
pub mod light;

pub use camera::{vulkan_perspective, Camera};
pub use cube::{cube_lookup, sample_direction, CubeFace, CubeFaces, CubeLookup};
pub use light::{shadow_depth, LightMatrices, ShadowBias};

pub use glam;
