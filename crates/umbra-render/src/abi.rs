// SPDX-License-Identifier: CEPL-1.0
//! Host-side mirrors of the shader interface blocks. Field order and padding
//! follow std140 and must match the GLSL declarations exactly.
use crate::model::{Material, MAX_MATERIALS};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Scene vertex stage, set 0 binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VertexUniforms {
    pub model: Mat4,
    pub model_view_projection: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct MaterialStd140 {
    pub ambient: Vec4,
    pub diffuse: Vec4,
}

impl From<&Material> for MaterialStd140 {
    fn from(m: &Material) -> Self {
        Self {
            ambient: m.ambient.extend(1.0),
            diffuse: m.diffuse.extend(1.0),
        }
    }
}

/// Scene fragment stage, set 0 binding 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FragmentUniforms {
    pub light_pos: Vec4,
    pub shadow_near: f32,
    pub shadow_far: f32,
    pub _pad: [f32; 2],
    pub materials: [MaterialStd140; MAX_MATERIALS],
}

impl FragmentUniforms {
    /// Unused slots stay zeroed. Callers must have rejected models with more
    /// than [`MAX_MATERIALS`] materials already; extras are never written.
    pub fn new(light_pos: glam::Vec3, near: f32, far: f32, materials: &[Material]) -> Self {
        let mut out = Self {
            light_pos: light_pos.extend(1.0),
            shadow_near: near,
            shadow_far: far,
            _pad: [0.0; 2],
            materials: [MaterialStd140::default(); MAX_MATERIALS],
        };
        for (slot, m) in out.materials.iter_mut().zip(materials) {
            *slot = m.into();
        }
        out
    }
}

/// Shadow vertex stage push constant: projection * face view * model.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FacePushConstant {
    pub face_transform: Mat4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::mem::{offset_of, size_of};

    #[test]
    fn vertex_block_is_two_matrices() {
        assert_eq!(size_of::<VertexUniforms>(), 128);
        assert_eq!(offset_of!(VertexUniforms, model_view_projection), 64);
    }

    #[test]
    fn fragment_block_matches_std140() {
        assert_eq!(offset_of!(FragmentUniforms, shadow_near), 16);
        assert_eq!(offset_of!(FragmentUniforms, shadow_far), 20);
        assert_eq!(offset_of!(FragmentUniforms, materials), 32);
        assert_eq!(size_of::<MaterialStd140>(), 32);
        assert_eq!(size_of::<FragmentUniforms>(), 32 + 32 * MAX_MATERIALS);
    }

    #[test]
    fn push_constant_fits_the_guaranteed_minimum() {
        assert!(size_of::<FacePushConstant>() <= 128);
    }

    #[test]
    fn materials_fill_leading_slots() {
        let mats = [Material {
            ambient: Vec3::splat(0.2),
            diffuse: Vec3::new(1.0, 0.0, 0.0),
        }];
        let u = FragmentUniforms::new(Vec3::new(0.0, 1.9, 0.0), 0.05, 10.0, &mats);
        assert_eq!(u.materials[0].diffuse, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(u.materials[1].diffuse, Vec4::ZERO);
        assert_eq!(u.light_pos.w, 1.0);
        assert_eq!(bytemuck::bytes_of(&u).len(), size_of::<FragmentUniforms>());
    }
}
